//! Per-aggregate mutual exclusion
//!
//! Every mutation of a policy or a request runs while holding that
//! aggregate's lock. Different aggregates never contend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use verification_types::{PolicyId, RequestId};

/// Registry of async mutexes keyed by `policy:<id>` / `request:<id>`
#[derive(Debug, Clone, Default)]
pub struct AggregateLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AggregateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock_policy(&self, id: &PolicyId) -> OwnedMutexGuard<()> {
        self.acquire(format!("policy:{}", id)).await
    }

    pub async fn lock_request(&self, id: &RequestId) -> OwnedMutexGuard<()> {
        self.acquire(format!("request:{}", id)).await
    }

    async fn acquire(&self, key: String) -> OwnedMutexGuard<()> {
        // The shard guard must be released before awaiting the mutex.
        let mutex = self
            .inner
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop entries nobody holds or waits on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before.saturating_sub(self.inner.len())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_aggregate_serializes() {
        let locks = AggregateLocks::new();
        let id = RequestId::new("req-1");

        let guard = locks.lock_request(&id).await;
        let contender = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock_request(&id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_aggregates_do_not_block() {
        let locks = AggregateLocks::new();
        let _a = locks.lock_request(&RequestId::new("a")).await;
        let _b = locks.lock_request(&RequestId::new("b")).await;
        let _p = locks.lock_policy(&PolicyId::new("a")).await;
        assert_eq!(locks.len(), 3);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = AggregateLocks::new();
        let held = locks.lock_policy(&PolicyId::new("held")).await;
        drop(locks.lock_policy(&PolicyId::new("idle")).await);

        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);

        drop(held);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }
}
