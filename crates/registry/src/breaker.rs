//! Per-provider circuit breaker.
//!
//! Closed → (N consecutive failures) → Open → (cooldown elapsed) →
//! HalfOpen admitting one probe → Closed on success, or back to Open with
//! a doubled cooldown (capped) on failure. Breaker operations never fail;
//! they return state.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Initial open-state cooldown.
    pub cooldown: Duration,
    /// Ceiling for the exponential cooldown.
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    /// Cooldown applied on the next open; doubles on reopen.
    cooldown: Duration,
    cooldown_until: Option<Instant>,
    /// One probe at a time while half-open.
    probe_in_flight: bool,
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Remaining cooldown, if open.
    pub cooldown_remaining_secs: Option<u64>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                cooldown: config.cooldown,
                cooldown_until: None,
                probe_in_flight: false,
            }),
            config,
        }
    }

    /// Non-mutating eligibility check used while ranking providers.
    pub fn would_allow(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner
                .cooldown_until
                .map(|t| Instant::now() >= t)
                .unwrap_or(true),
            CircuitState::HalfOpen => !inner.probe_in_flight,
        }
    }

    /// Admit a call. Performs the open→half-open transition when the
    /// cooldown has elapsed and claims the single half-open probe slot.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .cooldown_until
                    .map(|t| Instant::now() >= t)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    inner.cooldown_until = None;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.cooldown = self.config.cooldown;
                inner.cooldown_until = None;
                inner.probe_in_flight = false;
            }
            _ => {
                inner.consecutive_failures = 0;
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    let cooldown = inner.cooldown;
                    Self::open(&mut inner, cooldown);
                }
            }
            CircuitState::HalfOpen => {
                // Probe failed: reopen with doubled cooldown, capped.
                let doubled = (inner.cooldown * 2).min(self.config.max_cooldown);
                inner.cooldown = doubled;
                inner.probe_in_flight = false;
                Self::open(&mut inner, doubled);
            }
            CircuitState::Open => {}
        }
    }

    fn open(inner: &mut Inner, cooldown: Duration) {
        inner.state = CircuitState::Open;
        inner.cooldown_until = Some(Instant::now() + cooldown);
    }

    /// Return to closed with cleared counters and the initial cooldown.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.cooldown = self.config.cooldown;
        inner.cooldown_until = None;
        inner.probe_in_flight = false;
    }

    /// Force half-open, as a targeted reset does for an open circuit:
    /// the provider gets one probe rather than full trust.
    pub fn reset_to_half_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = false;
            inner.cooldown_until = None;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            cooldown_remaining_secs: inner.cooldown_until.map(|t| {
                t.saturating_duration_since(Instant::now()).as_secs()
            }),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
