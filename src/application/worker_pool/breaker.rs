//! Consecutive-failure circuit breaker for the signal worker pool.
//!
//! Two thresholds: a general one and a stricter one for rate-limited
//! failures, which also holds the breaker open longer. While open, the
//! pool dispatches nothing; the breaker auto-closes after the cooldown
//! and the consecutive counter resets.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub rate_limit_threshold: u32,
    pub open_duration: Duration,
    pub rate_limit_open_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            rate_limit_threshold: 5,
            open_duration: Duration::from_secs(300),
            rate_limit_open_duration: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    consecutive_rate_limits: u32,
    opened_at: Option<Instant>,
    open_duration: Duration,
    opened_by_rate_limit: bool,
}

/// Raised by [`CircuitBreaker::record_failure`] when the failure crossed
/// a threshold and the breaker just opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerOpened {
    pub is_rate_limit: bool,
    pub pause_ms: u64,
    pub consecutive_errors: u32,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                consecutive_rate_limits: 0,
                opened_at: None,
                open_duration: Duration::ZERO,
                opened_by_rate_limit: false,
            }),
        }
    }

    /// Whether dispatch is currently blocked. Auto-closes once the
    /// cooldown has elapsed, resetting the consecutive counters.
    pub fn is_open(&self) -> bool {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        if let Some(opened_at) = state.opened_at {
            if opened_at.elapsed() >= state.open_duration {
                info!(
                    "CircuitBreaker: Auto-closing after {:?} (rate-limited: {})",
                    state.open_duration, state.opened_by_rate_limit
                );
                state.opened_at = None;
                state.consecutive_failures = 0;
                state.consecutive_rate_limits = 0;
                state.opened_by_rate_limit = false;
                false
            } else {
                true
            }
        } else {
            false
        }
    }

    /// Record a task failure. Returns `Some` exactly when this failure
    /// opened the breaker.
    pub fn record_failure(&self, is_rate_limited: bool) -> Option<BreakerOpened> {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        if state.opened_at.is_some() {
            return None;
        }

        state.consecutive_failures += 1;
        if is_rate_limited {
            state.consecutive_rate_limits += 1;
        } else {
            state.consecutive_rate_limits = 0;
        }

        let rate_limit_trip = state.consecutive_rate_limits >= self.config.rate_limit_threshold;
        let general_trip = state.consecutive_failures >= self.config.failure_threshold;

        if !rate_limit_trip && !general_trip {
            return None;
        }

        let (duration, consecutive) = if rate_limit_trip {
            (
                self.config.rate_limit_open_duration,
                state.consecutive_rate_limits,
            )
        } else {
            (self.config.open_duration, state.consecutive_failures)
        };

        state.opened_at = Some(Instant::now());
        state.open_duration = duration;
        state.opened_by_rate_limit = rate_limit_trip;

        warn!(
            "CircuitBreaker: Opened after {} consecutive failures (rate-limited: {}), pausing {:?}",
            consecutive, rate_limit_trip, duration
        );

        Some(BreakerOpened {
            is_rate_limit: rate_limit_trip,
            pause_ms: duration.as_millis() as u64,
            consecutive_errors: consecutive,
        })
    }

    /// A successful task resets the consecutive counters.
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.consecutive_failures = 0;
        state.consecutive_rate_limits = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state
            .lock()
            .expect("breaker lock poisoned")
            .consecutive_failures
    }
}
