//! Process-wide circuit breaker for LLM calls.
//!
//! Three consecutive failures open the circuit for 60 s; while open, calls
//! fail immediately without touching the provider. The first success resets
//! everything. The lock is never held across I/O.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::LlmError;

#[derive(Debug)]
struct BreakerState {
    failures: u32,
    open_until: Option<Instant>,
}

/// Snapshot for the resource sampler.
#[derive(Debug, Clone, Copy)]
pub struct BreakerStatus {
    pub failures: u32,
    pub open: bool,
}

pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                failures: 0,
                open_until: None,
            }),
            threshold,
            cooldown,
        }
    }

    /// Admit or reject a call right now.
    pub fn check(&self) -> Result<(), LlmError> {
        self.check_at(Instant::now())
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.failures = 0;
        state.open_until = None;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub fn status(&self) -> BreakerStatus {
        let state = self.state.lock().unwrap();
        BreakerStatus {
            failures: state.failures,
            open: state
                .open_until
                .is_some_and(|until| Instant::now() < until),
        }
    }

    fn check_at(&self, now: Instant) -> Result<(), LlmError> {
        let mut state = self.state.lock().unwrap();
        match state.open_until {
            Some(until) if now < until => Err(LlmError::Unavailable("circuit open".into())),
            Some(_) => {
                // Cooldown elapsed: half-open, let the next call probe.
                state.open_until = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record_failure_at(&self, now: Instant) {
        let mut state = self.state.lock().unwrap();
        state.failures += 1;
        if state.failures >= self.threshold && state.open_until.is_none() {
            state.open_until = Some(now + self.cooldown);
            warn!(
                failures = state.failures,
                cooldown_secs = self.cooldown.as_secs(),
                "circuit breaker opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_secs(60))
    }

    #[test]
    fn opens_after_exactly_three_failures() {
        let b = breaker();
        let t0 = Instant::now();
        b.record_failure_at(t0);
        b.record_failure_at(t0);
        assert!(b.check_at(t0).is_ok());
        b.record_failure_at(t0);
        assert!(b.check_at(t0).is_err());
    }

    #[test]
    fn rejects_while_open_admits_after_cooldown() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(t0);
        }
        assert!(b.check_at(t0 + Duration::from_secs(59)).is_err());
        assert!(b.check_at(t0 + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn success_resets_the_count() {
        let b = breaker();
        let t0 = Instant::now();
        b.record_failure_at(t0);
        b.record_failure_at(t0);
        b.record_success();
        b.record_failure_at(t0);
        b.record_failure_at(t0);
        assert!(b.check_at(t0).is_ok());
    }

    #[test]
    fn success_after_cooldown_closes_fully() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(t0);
        }
        let after = t0 + Duration::from_secs(61);
        assert!(b.check_at(after).is_ok());
        b.record_success();
        assert!(b.check_at(after).is_ok());
        assert_eq!(b.status().failures, 0);
    }
}
