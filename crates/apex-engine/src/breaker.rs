//! Fail-fast circuit breaker shared by the event processor (one instance
//! per registered handler) and the risk manager (one instance per risk
//! regime).
//!
//! All state is atomic so `is_closed()` stays a single load on the dispatch
//! hot path. Transitions: closed -> open after `error_threshold` consecutive
//! failures; open -> half-open once the recovery window elapses; the first
//! attempt after that is a probe. A probe success closes the breaker, a
//! probe failure re-opens it for a full window.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub error_threshold: u32,

    /// How long the breaker stays open before allowing a probe.
    pub recovery_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            recovery_window: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    pub fn new(error_threshold: u32, recovery_window: Duration) -> Self {
        Self {
            error_threshold,
            recovery_window,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time breaker snapshot for stats endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_errors: u32,
    pub total_trips: u64,
    pub opened_at: Option<DateTime<Utc>>,
    pub retry_after_ms: Option<u64>,
}

/// Lock-free circuit breaker.
pub struct CircuitBreaker {
    config: BreakerConfig,
    open: AtomicBool,
    half_open: AtomicBool,
    consecutive_errors: AtomicU32,
    opened_at_ms: AtomicI64,
    total_trips: AtomicU32,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field(
                "consecutive_errors",
                &self.consecutive_errors.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            open: AtomicBool::new(false),
            half_open: AtomicBool::new(false),
            consecutive_errors: AtomicU32::new(0),
            opened_at_ms: AtomicI64::new(0),
            total_trips: AtomicU32::new(0),
        }
    }

    /// Whether calls may currently pass through.
    ///
    /// Hot path: a single atomic load, plus the recovery-window transition
    /// when the breaker is open. Once the window elapses this flips the
    /// breaker to half-open and admits the probe call.
    #[inline]
    pub fn allow(&self) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return true;
        }
        if self.half_open.load(Ordering::Acquire) {
            // Probe already admitted; block everything else until it settles.
            return false;
        }
        if self.window_elapsed() {
            self.half_open.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Whether the breaker is fully closed (no open, no pending probe).
    #[inline]
    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BreakerState {
        if self.open.load(Ordering::Acquire) {
            if self.half_open.load(Ordering::Acquire) {
                BreakerState::HalfOpen
            } else {
                BreakerState::Open
            }
        } else {
            BreakerState::Closed
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Acquire)
    }

    /// Record a successful call. Closes the breaker if a probe was in flight.
    pub fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::Release);
        if self.half_open.load(Ordering::Acquire) {
            self.half_open.store(false, Ordering::Release);
            self.open.store(false, Ordering::Release);
        }
    }

    /// Record a failed call. Returns true if this failure opened the breaker.
    pub fn record_failure(&self) -> bool {
        let errors = self.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;

        // A failed probe re-opens immediately for a full window.
        if self.half_open.load(Ordering::Acquire) {
            self.trip();
            return true;
        }

        if errors >= self.config.error_threshold {
            self.trip();
            return true;
        }
        false
    }

    /// Force the breaker open and restart the recovery window.
    pub fn trip(&self) {
        if !self.open.swap(true, Ordering::AcqRel) {
            self.total_trips.fetch_add(1, Ordering::Relaxed);
        }
        self.half_open.store(false, Ordering::Release);
        self.opened_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    /// Force the breaker closed and clear the error streak.
    pub fn reset(&self) {
        self.open.store(false, Ordering::Release);
        self.half_open.store(false, Ordering::Release);
        self.consecutive_errors.store(0, Ordering::Release);
    }

    /// Whether the recovery window has elapsed since the last trip.
    pub fn window_elapsed(&self) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return true;
        }
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        let elapsed = Utc::now().timestamp_millis() - opened;
        elapsed >= self.config.recovery_window.as_millis() as i64
    }

    /// Milliseconds until the next probe is admitted, if open.
    pub fn retry_after_ms(&self) -> Option<u64> {
        if !self.open.load(Ordering::Acquire) {
            return None;
        }
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        let elapsed = Utc::now().timestamp_millis() - opened;
        let window = self.config.recovery_window.as_millis() as i64;
        Some((window - elapsed).max(0) as u64)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let opened_at = if self.open.load(Ordering::Acquire) {
            DateTime::from_timestamp_millis(self.opened_at_ms.load(Ordering::Acquire))
        } else {
            None
        };
        BreakerSnapshot {
            state: self.state(),
            consecutive_errors: self.consecutive_errors.load(Ordering::Relaxed),
            total_trips: self.total_trips.load(Ordering::Relaxed) as u64,
            opened_at,
            retry_after_ms: self.retry_after_ms(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig::new(threshold, Duration::from_millis(20)))
    }

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::default();
        assert!(cb.allow());
        assert!(cb.is_closed());
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn opens_after_threshold() {
        let cb = fast_breaker(3);
        assert!(!cb.record_failure());
        assert!(!cb.record_failure());
        assert!(cb.record_failure());
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow());
    }

    #[test]
    fn success_resets_streak() {
        let cb = fast_breaker(3);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.consecutive_errors(), 0);
        assert!(!cb.record_failure());
        assert!(cb.is_closed());
    }

    #[test]
    fn probe_admitted_after_window() {
        let cb = fast_breaker(1);
        cb.record_failure();
        assert!(!cb.allow());

        std::thread::sleep(Duration::from_millis(25));
        // First call after the window is the probe.
        assert!(cb.allow());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        // Only one probe until it settles.
        assert!(!cb.allow());
    }

    #[test]
    fn probe_success_closes() {
        let cb = fast_breaker(1);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.allow());
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allow());
    }

    #[test]
    fn probe_failure_reopens() {
        let cb = fast_breaker(1);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.allow());
        assert!(cb.record_failure());
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow());
    }

    #[test]
    fn manual_trip_and_reset() {
        let cb = fast_breaker(5);
        cb.trip();
        assert!(!cb.allow());
        cb.reset();
        assert!(cb.allow());
        assert_eq!(cb.consecutive_errors(), 0);
    }

    #[test]
    fn trip_counts_once_per_open() {
        let cb = fast_breaker(5);
        cb.trip();
        cb.trip();
        assert_eq!(cb.snapshot().total_trips, 1);
        cb.reset();
        cb.trip();
        assert_eq!(cb.snapshot().total_trips, 2);
    }

    #[test]
    fn retry_after_counts_down() {
        let cb = CircuitBreaker::new(BreakerConfig::new(1, Duration::from_secs(300)));
        assert!(cb.retry_after_ms().is_none());
        cb.trip();
        let remaining = cb.retry_after_ms().unwrap();
        assert!(remaining > 290_000);
    }

    #[test]
    fn snapshot_reflects_state() {
        let cb = fast_breaker(1);
        cb.record_failure();
        let snap = cb.snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.total_trips, 1);
        assert!(snap.opened_at.is_some());
    }
}
