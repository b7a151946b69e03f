//! Keyed per-(chat, user) turn serialization.
//!
//! Turns for the same pair run one at a time so the model always sees a
//! consistent history; different pairs proceed in parallel. Background
//! loops never take these locks.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct TurnLocks {
    locks: DashMap<(i64, i64), Arc<Mutex<()>>>,
}

impl TurnLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, chat_id: i64, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry((chat_id, user_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = Arc::new(TurnLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(100, 42).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_run_in_parallel() {
        let locks = Arc::new(TurnLocks::new());
        let g1 = locks.acquire(100, 1).await;
        // A second key must not block on the first guard being held.
        let acquired =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(100, 2)).await;
        assert!(acquired.is_ok());
        drop(g1);
    }
}
