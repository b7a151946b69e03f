//! The gate capability set shared by distributed and in-process backends:
//! `{try_lock(key, ttl), release(key), allow(key, max, window)}`.
//!
//! A Redis-backed gate would implement the same trait; when `redis_url` is
//! unset (or the backend is unavailable) the in-process gate provides
//! identical semantics with per-process scope.

use std::time::{Duration, Instant};

use dashmap::DashMap;

pub trait Gate: Send + Sync {
    /// Acquire a named lock for `ttl`. Returns false while held elsewhere.
    fn try_lock(&self, key: &str, ttl: Duration) -> bool;

    /// Release a named lock early.
    fn release(&self, key: &str);

    /// Sliding-window counter: admit up to `max` hits per `window` per key.
    fn allow(&self, key: &str, max: u32, window: Duration) -> bool;
}

#[derive(Default)]
pub struct InProcessGate {
    locks: DashMap<String, Instant>,
    counters: DashMap<String, Vec<Instant>>,
}

impl InProcessGate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Gate for InProcessGate {
    fn try_lock(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut acquired = false;
        self.locks
            .entry(key.to_string())
            .and_modify(|expires| {
                if *expires <= now {
                    *expires = now + ttl;
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                now + ttl
            });
        acquired
    }

    fn release(&self, key: &str) {
        self.locks.remove(key);
    }

    fn allow(&self, key: &str, max: u32, window: Duration) -> bool {
        let now = Instant::now();
        let mut hits = self.counters.entry(key.to_string()).or_default();
        hits.retain(|t| now.duration_since(*t) < window);
        if hits.len() < max as usize {
            hits.push(now);
            true
        } else {
            false
        }
    }
}
