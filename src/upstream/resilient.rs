//! Resilient upstream calling: timeout, bounded retry, circuit breaker.
//!
//! One [`ResilientClient`] per upstream. Every attempt runs under the
//! remaining call budget; only transient failures (timeout, connection
//! reset, 5xx) are retried or counted by the breaker. Non-transient
//! failures — malformed bodies, 4xx — fail immediately without touching
//! the circuit: a caller bug must not take the upstream offline for
//! everyone.

use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use super::breaker::{CircuitBreaker, CircuitState};
use super::transport::{Transport, TransportError};
use super::{ServiceError, UpstreamId};
use crate::config::ResilienceConfig;

/// Exponential backoff with jitter, bounded attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before the retry following `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff.as_millis() as f64 * 2f64.powi(attempt as i32 - 1);
        let capped = exp.min(self.max_backoff.as_millis() as f64);
        let jittered = if self.jitter > 0.0 {
            capped * (1.0 + rand::thread_rng().gen_range(-self.jitter..self.jitter))
        } else {
            capped
        };
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Calls one upstream with retries under a total budget, guarded by that
/// upstream's circuit breaker. The breaker is owned here and never shared.
#[derive(Debug)]
pub struct ResilientClient {
    upstream: UpstreamId,
    transport: Transport,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ResilientClient {
    pub fn new(
        upstream: UpstreamId,
        transport: Transport,
        breaker: CircuitBreaker,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self { upstream, transport, breaker, retry, call_timeout }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// POST `body` to `path` on the upstream. Returns the parsed JSON body
    /// or a [`ServiceError`] once retries, budget, or the breaker give up.
    pub async fn call(&self, path: &str, body: Value) -> Result<Value, ServiceError> {
        let deadline = Instant::now() + self.call_timeout;
        let mut attempt: u32 = 1;
        let mut last_reason = String::new();

        loop {
            let permit = match self.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(retry_after) => {
                    warn!(
                        upstream = %self.upstream,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "circuit open — rejecting call without a network attempt"
                    );
                    return Err(self.unavailable("circuit open"));
                }
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                permit.abandon();
                return Err(self.unavailable("call budget exhausted"));
            }

            debug!(
                upstream = %self.upstream,
                %path,
                attempt,
                max_attempts = self.retry.max_attempts,
                "upstream attempt"
            );

            match timeout(remaining, self.transport.send(path, &body)).await {
                Ok(Ok(value)) => {
                    permit.success();
                    return Ok(value);
                }
                Ok(Err(err)) if !err.is_transient() => {
                    // Not an upstream health signal — leave the breaker alone.
                    permit.abandon();
                    warn!(upstream = %self.upstream, attempt, error = %err, "non-retryable failure");
                    return Err(ServiceError::Malformed {
                        upstream: self.upstream,
                        reason: err.to_string(),
                    });
                }
                Ok(Err(err)) => {
                    permit.failure();
                    warn!(upstream = %self.upstream, attempt, error = %err, "transient failure");
                    last_reason = err.to_string();
                }
                Err(_elapsed) => {
                    permit.failure();
                    warn!(upstream = %self.upstream, attempt, "attempt timed out");
                    last_reason = TransportError::Timeout.to_string();
                }
            }

            if attempt >= self.retry.max_attempts {
                return Err(self.unavailable(&format!("retries exhausted: {last_reason}")));
            }

            let backoff = self.retry.backoff(attempt);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if backoff >= remaining {
                // A retry that cannot finish inside the budget is not taken.
                return Err(self.unavailable(&format!("call budget exhausted: {last_reason}")));
            }
            sleep(backoff).await;
            attempt += 1;
        }
    }

    fn unavailable(&self, reason: &str) -> ServiceError {
        ServiceError::Unavailable { upstream: self.upstream, reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::breaker::BreakerConfig;
    use crate::upstream::transport::FixtureTransport;
    use serde_json::json;

    fn client(fixture: FixtureTransport) -> ResilientClient {
        let retry = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            jitter: 0.0,
        };
        ResilientClient::new(
            UpstreamId::Knowledge,
            Transport::Fixture(fixture),
            CircuitBreaker::new(
                UpstreamId::Knowledge,
                BreakerConfig {
                    failure_threshold: 3,
                    failure_window: Duration::from_secs(60),
                    cooldown: Duration::from_secs(30),
                },
            ),
            retry,
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success() {
        let fixture = FixtureTransport::canned(json!({"ok": 1}));
        let c = client(fixture.clone());
        let value = c.call("/q", json!({})).await.unwrap();
        assert_eq!(value, json!({"ok": 1}));
        assert_eq!(fixture.calls(), 1);
        assert_eq!(c.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let fixture = FixtureTransport::scripted(vec![
            Err(TransportError::Timeout),
            Ok(json!({"ok": 2})),
        ]);
        let c = client(fixture.clone());
        let value = c.call("/q", json!({})).await.unwrap();
        assert_eq!(value, json!({"ok": 2}));
        assert_eq!(fixture.calls(), 2);
        assert_eq!(c.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_failure_is_not_retried_and_spares_breaker() {
        let fixture = FixtureTransport::scripted(vec![Err(TransportError::Malformed(
            "not json".into(),
        ))]);
        let c = client(fixture.clone());
        let err = c.call("/q", json!({})).await.unwrap_err();
        assert!(matches!(err, ServiceError::Malformed { .. }));
        assert_eq!(fixture.calls(), 1);
        assert_eq!(c.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_status_is_not_retried() {
        let fixture = FixtureTransport::scripted(vec![Err(TransportError::Status {
            status: 400,
            body: "bad request".into(),
        })]);
        let c = client(fixture.clone());
        let err = c.call("/q", json!({})).await.unwrap_err();
        assert!(matches!(err, ServiceError::Malformed { .. }));
        assert_eq!(fixture.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_open_the_circuit() {
        let fixture = FixtureTransport::scripted(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ]);
        let c = client(fixture.clone());
        let err = c.call("/q", json!({})).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable { .. }));
        assert_eq!(fixture.calls(), 3);
        assert_eq!(c.circuit_state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_short_circuits_without_network() {
        let fixture = FixtureTransport::scripted(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ]);
        let c = client(fixture.clone());
        let _ = c.call("/q", json!({})).await;
        assert_eq!(c.circuit_state(), CircuitState::Open);

        let calls_before = fixture.calls();
        let err = c.call("/q", json!({})).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable { .. }));
        assert_eq!(fixture.calls(), calls_before, "no network attempt while open");
    }

    #[tokio::test(start_paused = true)]
    async fn probe_after_cooldown_recovers() {
        let fixture = FixtureTransport::scripted(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Ok(json!({"ok": true})),
        ]);
        let c = client(fixture.clone());
        let _ = c.call("/q", json!({})).await;
        assert_eq!(c.circuit_state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        let value = c.call("/q", json!({})).await.unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(c.circuit_state(), CircuitState::Closed);
    }
}
