use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::data_types::DatasetKey;

type LockMap = DashMap<DatasetKey, Arc<Mutex<()>>>;

/// Named locks serialising every write to a dataset (original and copy alike).
///
/// A dataset only has an entry while somebody holds or waits for its lock, so the map stays
/// as small as the number of datasets in use.
#[derive(Debug, Default)]
pub struct DatasetLocks {
    locks: Arc<LockMap>,
}

/// Exclusive access to one dataset, released on drop
#[derive(Debug)]
pub struct DatasetGuard {
    key: DatasetKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Drop for DatasetGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own reference to the mutex, so theirs keeps the entry alive
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl DatasetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the dataset. Access lasts as long as the guard.
    pub async fn lock(&self, key: &DatasetKey) -> DatasetGuard {
        // Clone the mutex out so the map shard isn't held across the await
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        DatasetGuard {
            key: key.clone(),
            guard: Some(mutex.lock_owned().await),
            locks: self.locks.clone(),
        }
    }

    /// Lock two datasets, always in the same order so that concurrent pairs can't deadlock
    pub async fn lock_pair(
        &self,
        first: &DatasetKey,
        second: &DatasetKey,
    ) -> (DatasetGuard, Option<DatasetGuard>) {
        if first == second {
            return (self.lock(first).await, None);
        }
        let (low, high) = if first < second {
            (first, second)
        } else {
            (second, first)
        };
        let low_guard = self.lock(low).await;
        let high_guard = self.lock(high).await;
        (low_guard, Some(high_guard))
    }

    /// Number of datasets currently locked or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
