//! Case id allocation
//!
//! Ids are drawn uniformly from a 36^12 space and checked against every case
//! kind before being handed out. The check is an optimization; the store's
//! uniqueness constraint is what actually guarantees no two cases share an
//! id.

use crate::cases::record::{CASE_ID_ALPHABET, SEGMENT_LEN};
use crate::cases::{CaseFilter, CaseId, CaseKind, CaseStore, StoreResult};
use rand::Rng;
use std::sync::Arc;
use tracing::debug;

/// Source of uniform random indices
pub trait RandomSource: Send + Sync {
    /// Uniform value in `0..upper`
    fn index(&self, upper: usize) -> usize;
}

/// Thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn index(&self, upper: usize) -> usize {
        rand::rng().random_range(0..upper)
    }
}

/// Generates case ids that do not exist yet in the store
#[derive(Clone)]
pub struct CaseIdAllocator {
    store: Arc<dyn CaseStore>,
    random: Arc<dyn RandomSource>,
}

impl CaseIdAllocator {
    pub fn new(store: Arc<dyn CaseStore>, random: Arc<dyn RandomSource>) -> Self {
        Self { store, random }
    }

    /// A fresh candidate, not checked against the store
    #[must_use]
    pub fn candidate(&self) -> CaseId {
        let segment = || -> [usize; SEGMENT_LEN] {
            std::array::from_fn(|_| self.random.index(CASE_ID_ALPHABET.len()))
        };
        let first = segment();
        let second = segment();
        CaseId::from_indices(first, second)
    }

    /// Allocate an id unused by any Ban, Timeout or Warn case.
    ///
    /// Retries with a new candidate on every collision and never gives up.
    ///
    /// # Errors
    /// Returns an error only if the store cannot answer the existence checks.
    pub async fn allocate(&self) -> StoreResult<CaseId> {
        loop {
            let candidate = self.candidate();

            let [ban, timeout, warn] =
                CaseKind::ALL.map(|kind| CaseFilter::new().case_id(&candidate).kind(kind));
            let (in_bans, in_timeouts, in_warns) = tokio::try_join!(
                self.store.exists(&ban),
                self.store.exists(&timeout),
                self.store.exists(&warn),
            )?;

            if !in_bans && !in_timeouts && !in_warns {
                return Ok(candidate);
            }

            debug!(
                target: crate::CASE_TARGET,
                case_id = %candidate,
                "Case id collision, drawing a new one"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::{Case, MemoryCaseStore};
    use chrono::Utc;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    /// Replays scripted indices, then falls back to zeros
    struct Scripted(Mutex<VecDeque<usize>>);

    impl Scripted {
        fn new(values: impl IntoIterator<Item = usize>) -> Self {
            Self(Mutex::new(values.into_iter().collect()))
        }
    }

    impl RandomSource for Scripted {
        fn index(&self, upper: usize) -> usize {
            self.0.lock().unwrap().pop_front().unwrap_or(0) % upper
        }
    }

    fn is_well_formed(id: &str) -> bool {
        let parts: Vec<&str> = id.split('-').collect();
        parts.len() == 3
            && parts[0] == "PL"
            && parts[1..].iter().all(|p| {
                p.len() == 6 && p.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
            })
    }

    #[tokio::test]
    async fn test_allocated_ids_are_well_formed_and_distinct() {
        let store = Arc::new(MemoryCaseStore::new());
        let allocator = CaseIdAllocator::new(store.clone(), Arc::new(ThreadRandom));

        let mut seen = HashSet::new();
        for _ in 0..500 {
            let id = allocator.allocate().await.unwrap();
            assert!(is_well_formed(id.as_str()), "bad id {id}");
            assert!(seen.insert(id.clone()), "duplicate id {id}");

            let case = Case::open(id, CaseKind::Warn, 1, 2, 3, "x", Utc::now(), None).unwrap();
            store.create(case).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_collision_in_any_kind_retries() {
        let store = Arc::new(MemoryCaseStore::new());

        // Occupy the all-ones id as a Warn, and the all-twos id as a Timeout
        for (seed, kind, duration) in [(1, CaseKind::Warn, None), (2, CaseKind::Timeout, Some(5))] {
            let id = CaseId::from_indices([seed; 6], [seed; 6]);
            let case = Case::open(id, kind, 1, 2, 3, "x", Utc::now(), duration).unwrap();
            store.create(case).await.unwrap();
        }

        let script = std::iter::repeat_n(1, 12)
            .chain(std::iter::repeat_n(2, 12))
            .chain(std::iter::repeat_n(3, 12));
        let allocator = CaseIdAllocator::new(store, Arc::new(Scripted::new(script)));

        let id = allocator.allocate().await.unwrap();
        assert_eq!(id.as_str(), "PL-333333-333333");
    }
}
