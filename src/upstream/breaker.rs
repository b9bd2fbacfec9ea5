//! Per-upstream circuit breaker.
//!
//! State machine: Closed → (threshold consecutive transient failures within
//! the window) → Open → (cool-down elapses) → HalfOpen → one probe →
//! Closed on success, Open again on failure. State is owned here and only
//! reachable through [`CircuitBreaker::try_acquire`] and the returned
//! permit — callers never touch the raw counters.

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use super::UpstreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    /// Failures further apart than this restart the count.
    pub failure_window: Duration,
    /// How long an open circuit rejects calls before allowing a probe.
    pub cooldown: Duration,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    upstream: UpstreamId,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(upstream: UpstreamId, config: BreakerConfig) -> Self {
        Self {
            upstream,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                window_start: None,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Ask permission for one attempt. `Err` carries the suggested wait
    /// before the next try. An Open circuit whose cool-down has elapsed
    /// transitions to HalfOpen here and hands out the single probe permit.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, Duration> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let opened = inner.opened_at.unwrap_or_else(Instant::now);
                let elapsed = opened.elapsed();
                if elapsed >= self.config.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(upstream = %self.upstream, "circuit half-open — probing");
                    Ok(self.permit(true))
                } else {
                    Err(self.config.cooldown - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.config.cooldown)
                } else {
                    inner.probe_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    fn permit(&self, probe: bool) -> CallPermit<'_> {
        CallPermit { breaker: self, probe, resolved: false }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(upstream = %self.upstream, "circuit closed — upstream recovered");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.window_start = None;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.lock();
        if probe {
            // A failed probe reopens immediately and restarts the cool-down.
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
            inner.consecutive_failures = 0;
            inner.window_start = None;
            warn!(upstream = %self.upstream, "circuit reopened — probe failed");
            return;
        }

        let now = Instant::now();
        let in_window = inner
            .window_start
            .is_some_and(|start| now.duration_since(start) <= self.config.failure_window);
        if !in_window {
            inner.window_start = Some(now);
            inner.consecutive_failures = 0;
        }
        inner.consecutive_failures += 1;

        if inner.consecutive_failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            warn!(
                upstream = %self.upstream,
                failures = inner.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit opened — failure threshold reached"
            );
        }
    }

    fn restore_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Permission for exactly one attempt. The holder must report the outcome;
/// dropping it unreported (a cancelled call) counts as neither success nor
/// failure, and returns a half-open probe slot so recovery is not wedged.
#[must_use]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl CallPermit<'_> {
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success();
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.probe);
    }

    /// Explicitly report "no outcome" (non-transient caller-side errors).
    pub fn abandon(mut self) {
        self.resolved = true;
        if self.probe {
            self.breaker.restore_probe();
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.restore_probe();
        }
    }
}
