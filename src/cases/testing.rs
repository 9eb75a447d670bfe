//! Shared fixtures for case tests

use crate::cases::{
    Case, CaseEvent, CaseFilter, CasePatch, CaseStore, MemoryCaseStore, NotificationSink,
    NotifyError, StoreError, StoreResult,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

pub const GUILD: u64 = 67890;
pub const TARGET: u64 = 12345;
pub const MODERATOR: u64 = 42;

/// Fixed start time so expiry arithmetic is easy to read
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

/// Remembers every event it is given
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CaseEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<CaseEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&CaseEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn report(&self, event: &CaseEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Memory store whose next creates fail with scripted errors
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryCaseStore,
    create_errors: Mutex<VecDeque<StoreError>>,
}

impl FlakyStore {
    pub fn failing_creates(errors: impl IntoIterator<Item = StoreError>) -> Self {
        Self {
            inner: MemoryCaseStore::new(),
            create_errors: Mutex::new(errors.into_iter().collect()),
        }
    }
}

#[async_trait]
impl CaseStore for FlakyStore {
    async fn create(&self, case: Case) -> StoreResult<()> {
        let scripted = self.create_errors.lock().unwrap().pop_front();
        match scripted {
            Some(error) => Err(error),
            None => self.inner.create(case).await,
        }
    }

    async fn find_one(&self, filter: &CaseFilter) -> StoreResult<Option<Case>> {
        self.inner.find_one(filter).await
    }

    async fn find(&self, filter: &CaseFilter) -> StoreResult<Vec<Case>> {
        self.inner.find(filter).await
    }

    async fn conditional_update(
        &self,
        filter: &CaseFilter,
        patch: &CasePatch,
    ) -> StoreResult<u64> {
        self.inner.conditional_update(filter, patch).await
    }

    async fn exists(&self, filter: &CaseFilter) -> StoreResult<bool> {
        self.inner.exists(filter).await
    }

    async fn delete(&self, filter: &CaseFilter) -> StoreResult<u64> {
        self.inner.delete(filter).await
    }
}
