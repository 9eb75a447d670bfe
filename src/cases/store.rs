//! Case store
//!
//! The repository interface the moderation service and the sweeper write
//! through, and an in-memory implementation of it.

use crate::cases::{Case, CaseId, CaseKind, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Conjunction of conditions a case must satisfy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseFilter {
    pub case_id: Option<CaseId>,
    pub kind: Option<CaseKind>,
    pub guild_id: Option<u64>,
    pub target_user_id: Option<u64>,
    pub active: Option<bool>,
    /// Matches cases whose `expires_at` is set and at or before this time
    pub expires_at_or_before: Option<DateTime<Utc>>,
}

impl CaseFilter {
    /// Filter that matches every case
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn case_id(mut self, case_id: &CaseId) -> Self {
        self.case_id = Some(case_id.clone());
        self
    }

    #[must_use]
    pub const fn kind(mut self, kind: CaseKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub const fn guild(mut self, guild_id: u64) -> Self {
        self.guild_id = Some(guild_id);
        self
    }

    #[must_use]
    pub const fn target(mut self, user_id: u64) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    #[must_use]
    pub const fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    #[must_use]
    pub const fn expired_by(mut self, now: DateTime<Utc>) -> Self {
        self.expires_at_or_before = Some(now);
        self
    }

    /// Active cases of `kind` whose expiry has passed at `now`
    #[must_use]
    pub fn due(kind: CaseKind, now: DateTime<Utc>) -> Self {
        Self::new().kind(kind).active(true).expired_by(now)
    }

    #[must_use]
    pub fn matches(&self, case: &Case) -> bool {
        self.case_id.as_ref().is_none_or(|id| *id == case.case_id)
            && self.kind.is_none_or(|kind| kind == case.kind)
            && self.guild_id.is_none_or(|id| id == case.guild_id)
            && self.target_user_id.is_none_or(|id| id == case.target_user_id)
            && self.active.is_none_or(|active| active == case.active)
            && self
                .expires_at_or_before
                .is_none_or(|now| case.expires_at.is_some_and(|at| at <= now))
    }
}

/// Change applied by a conditional update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasePatch {
    /// Mark the case inactive and record who resolved it and why
    Deactivate {
        at: DateTime<Utc>,
        by: Option<u64>,
        reason: Option<String>,
    },
}

impl CasePatch {
    #[must_use]
    pub fn deactivate(at: DateTime<Utc>, by: Option<u64>, reason: Option<String>) -> Self {
        Self::Deactivate { at, by, reason }
    }

    /// Apply to a case; returns whether anything changed
    pub fn apply(&self, case: &mut Case) -> bool {
        match self {
            Self::Deactivate { at, by, reason } => case.deactivate(*at, *by, reason.clone()),
        }
    }
}

/// Persistence for moderation cases.
///
/// Implementations must reject a `create` whose case id already exists, in
/// any kind, and must apply `conditional_update` atomically per case so that
/// of two racing updates with the same filter only one matches.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Insert a new case
    async fn create(&self, case: Case) -> StoreResult<()>;

    /// First case matching the filter
    async fn find_one(&self, filter: &CaseFilter) -> StoreResult<Option<Case>>;

    /// All cases matching the filter, oldest first
    async fn find(&self, filter: &CaseFilter) -> StoreResult<Vec<Case>>;

    /// Apply `patch` to every case matching `filter`; returns the number of
    /// cases changed
    async fn conditional_update(&self, filter: &CaseFilter, patch: &CasePatch)
    -> StoreResult<u64>;

    /// Whether any case matches
    async fn exists(&self, filter: &CaseFilter) -> StoreResult<bool>;

    /// Remove every matching case; returns the number removed
    async fn delete(&self, filter: &CaseFilter) -> StoreResult<u64>;
}

/// In-memory case store keyed by case id
#[derive(Clone, Default)]
pub struct MemoryCaseStore {
    records: Arc<DashMap<CaseId, Case>>,
}

impl MemoryCaseStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from existing cases.
    ///
    /// # Errors
    /// Returns `DuplicateCaseId` if two cases share an id.
    pub fn from_cases(cases: impl IntoIterator<Item = Case>) -> StoreResult<Self> {
        let store = Self::new();
        for case in cases {
            store.insert(case)?;
        }
        Ok(store)
    }

    /// All cases, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<Case> {
        self.collect(&CaseFilter::new())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn insert(&self, case: Case) -> StoreResult<()> {
        match self.records.entry(case.case_id.clone()) {
            Entry::Occupied(entry) => Err(StoreError::DuplicateCaseId(entry.key().to_string())),
            Entry::Vacant(entry) => {
                entry.insert(case);
                Ok(())
            }
        }
    }

    pub(crate) fn contains(&self, case_id: &CaseId) -> bool {
        self.records.contains_key(case_id)
    }

    /// Insert or replace a case
    pub(crate) fn put(&self, case: Case) {
        self.records.insert(case.case_id.clone(), case);
    }

    pub(crate) fn collect(&self, filter: &CaseFilter) -> Vec<Case> {
        // Point lookups avoid scanning the whole map
        let mut cases: Vec<Case> = if let Some(id) = &filter.case_id {
            self.records
                .get(id)
                .filter(|entry| filter.matches(entry.value()))
                .map(|entry| entry.value().clone())
                .into_iter()
                .collect()
        } else {
            self.records
                .iter()
                .filter(|entry| filter.matches(entry.value()))
                .map(|entry| entry.value().clone())
                .collect()
        };
        cases.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.case_id.cmp(&b.case_id))
        });
        cases
    }

    pub(crate) fn update(&self, filter: &CaseFilter, patch: &CasePatch) -> u64 {
        if let Some(id) = &filter.case_id {
            // The entry guard holds the shard lock across check and write
            return self.records.get_mut(id).map_or(0, |mut entry| {
                u64::from(filter.matches(entry.value()) && patch.apply(entry.value_mut()))
            });
        }

        let mut changed = 0;
        for mut entry in self.records.iter_mut() {
            if filter.matches(entry.value()) && patch.apply(entry.value_mut()) {
                changed += 1;
            }
        }
        changed
    }

    pub(crate) fn remove(&self, filter: &CaseFilter) -> u64 {
        let before = self.records.len();
        self.records.retain(|_, case| !filter.matches(case));
        u64::try_from(before.saturating_sub(self.records.len())).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl CaseStore for MemoryCaseStore {
    async fn create(&self, case: Case) -> StoreResult<()> {
        self.insert(case)
    }

    async fn find_one(&self, filter: &CaseFilter) -> StoreResult<Option<Case>> {
        Ok(self.collect(filter).into_iter().next())
    }

    async fn find(&self, filter: &CaseFilter) -> StoreResult<Vec<Case>> {
        Ok(self.collect(filter))
    }

    async fn conditional_update(
        &self,
        filter: &CaseFilter,
        patch: &CasePatch,
    ) -> StoreResult<u64> {
        Ok(self.update(filter, patch))
    }

    async fn exists(&self, filter: &CaseFilter) -> StoreResult<bool> {
        if let Some(id) = &filter.case_id {
            return Ok(self
                .records
                .get(id)
                .is_some_and(|entry| filter.matches(entry.value())));
        }
        Ok(self.records.iter().any(|entry| filter.matches(entry.value())))
    }

    async fn delete(&self, filter: &CaseFilter) -> StoreResult<u64> {
        Ok(self.remove(filter))
    }
}
