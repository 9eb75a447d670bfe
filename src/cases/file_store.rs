//! File-backed case store
//!
//! Keeps cases in a `MemoryCaseStore` backed by a YAML snapshot. A mutation
//! only reaches memory once its snapshot is on disk.

use crate::cases::{
    Case, CaseFilter, CasePatch, CaseStore, MemoryCaseStore, StoreError, StoreResult,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info};

/// Case store persisted to a YAML file
pub struct FileCaseStore {
    cases: MemoryCaseStore,
    path: PathBuf,
    /// Serializes mutations and snapshot writes
    write_lock: Mutex<()>,
}

impl FileCaseStore {
    /// Open the store at `path`, loading existing cases if the file exists.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or decoded, or
    /// if it holds duplicate case ids.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let cases = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => MemoryCaseStore::new(),
            Ok(content) => {
                let cases: Vec<Case> = serde_yaml::from_str(&content)?;
                MemoryCaseStore::from_cases(cases)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MemoryCaseStore::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            target: crate::CONSOLE_TARGET,
            path = %path.display(),
            cases = cases.len(),
            "Case store opened"
        );

        Ok(Self {
            cases,
            path,
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `cases` as the new snapshot. Callers hold `write_lock`.
    async fn write_snapshot(&self, cases: &[Case]) -> StoreResult<()> {
        let result = async {
            let yaml = serde_yaml::to_string(cases)?;

            if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir).await?;
            }
            let tmp = self.path.with_extension("yaml.tmp");
            tokio::fs::write(&tmp, yaml).await?;
            tokio::fs::rename(&tmp, &self.path).await?;
            Ok::<(), StoreError>(())
        }
        .await;

        result.inspect_err(|e| {
            error!(
                target: crate::ERROR_TARGET,
                path = %self.path.display(),
                error = %e,
                "Failed to write case snapshot"
            );
        })
    }
}

// Every mutation writes the changed snapshot first and only then applies it
// in memory, so a failed write leaves both sides as they were.
#[async_trait]
impl CaseStore for FileCaseStore {
    async fn create(&self, case: Case) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        if self.cases.contains(&case.case_id) {
            return Err(StoreError::DuplicateCaseId(case.case_id.to_string()));
        }

        let mut next = self.cases.snapshot();
        next.push(case.clone());
        self.write_snapshot(&next).await?;

        self.cases.insert(case)
    }

    async fn find_one(&self, filter: &CaseFilter) -> StoreResult<Option<Case>> {
        self.cases.find_one(filter).await
    }

    async fn find(&self, filter: &CaseFilter) -> StoreResult<Vec<Case>> {
        self.cases.find(filter).await
    }

    async fn conditional_update(
        &self,
        filter: &CaseFilter,
        patch: &CasePatch,
    ) -> StoreResult<u64> {
        let _guard = self.write_lock.lock().await;

        let mut next = self.cases.snapshot();
        let mut changed = Vec::new();
        for case in &mut next {
            if filter.matches(case) && patch.apply(case) {
                changed.push(case.clone());
            }
        }
        if changed.is_empty() {
            return Ok(0);
        }

        self.write_snapshot(&next).await?;

        let count = u64::try_from(changed.len()).unwrap_or(u64::MAX);
        for case in changed {
            self.cases.put(case);
        }
        Ok(count)
    }

    async fn exists(&self, filter: &CaseFilter) -> StoreResult<bool> {
        self.cases.exists(filter).await
    }

    async fn delete(&self, filter: &CaseFilter) -> StoreResult<u64> {
        let _guard = self.write_lock.lock().await;

        let (removed, kept): (Vec<Case>, Vec<Case>) = self
            .cases
            .snapshot()
            .into_iter()
            .partition(|case| filter.matches(case));
        if removed.is_empty() {
            return Ok(0);
        }

        self.write_snapshot(&kept).await?;
        Ok(self.cases.remove(filter))
    }
}
