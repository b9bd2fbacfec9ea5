//! Wire transports for upstream calls.
//!
//! [`Transport`] is an enum over the real HTTP backend and a fixture-backed
//! double, so the resilient client and the adapters never care which one
//! they are talking to. The double also powers tests that script failure
//! sequences (timeouts, 5xx, malformed bodies) without a network.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unparsable response body: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Transient failures are retried and count toward the circuit breaker;
    /// everything else fails the call on first occurrence.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::Connect(_) => true,
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::Malformed(_) => false,
        }
    }
}

/// All available transport backends. Enum dispatch keeps the call path free
/// of trait objects; adding a backend = new variant + new `send` arm.
#[derive(Debug, Clone)]
pub enum Transport {
    Http(HttpTransport),
    Fixture(FixtureTransport),
}

impl Transport {
    pub async fn send(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        match self {
            Transport::Http(t) => t.send(path, body).await,
            Transport::Fixture(t) => t.send(path, body).await,
        }
    }
}

// ── HTTP transport ────────────────────────────────────────────────────────────

/// JSON-over-HTTP POST transport. Constructed once at startup, then cheaply
/// cloned because `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    /// `api_key` is `None` for keyless deployments. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        base_url: String,
        timeout: Duration,
        api_key: Option<String>,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connect(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url, api_key })
    }

    async fn send(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        debug!(%url, "sending upstream request");

        let mut req = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                error!(%url, error = %e, "upstream request failed (transport)");
                TransportError::Connect(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            error!(%url, %status, "upstream returned HTTP error");
            return Err(TransportError::Status { status: status.as_u16(), body });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

// ── Fixture transport ─────────────────────────────────────────────────────────

/// Test/offline double. Pops scripted steps first, then repeats the canned
/// fallback. Counts every send so tests can assert how many wire attempts a
/// call produced (including zero, when a circuit is open).
#[derive(Debug, Clone)]
pub struct FixtureTransport {
    inner: Arc<FixtureInner>,
}

#[derive(Debug)]
struct FixtureInner {
    script: Mutex<VecDeque<Result<Value, TransportError>>>,
    fallback: Option<Value>,
    calls: AtomicUsize,
}

impl FixtureTransport {
    /// Always answer with `fallback`.
    pub fn canned(fallback: Value) -> Self {
        Self {
            inner: Arc::new(FixtureInner {
                script: Mutex::new(VecDeque::new()),
                fallback: Some(fallback),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Answer with `steps` in order; once exhausted, every send fails.
    pub fn scripted(steps: Vec<Result<Value, TransportError>>) -> Self {
        Self {
            inner: Arc::new(FixtureInner {
                script: Mutex::new(steps.into()),
                fallback: None,
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Total sends observed by this fixture.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    async fn send(&self, _path: &str, _body: &Value) -> Result<Value, TransportError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = {
            let mut script = self
                .inner
                .script
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            script.pop_front()
        };
        match scripted {
            Some(step) => step,
            None => match &self.inner.fallback {
                Some(value) => Ok(value.clone()),
                None => Err(TransportError::Connect("fixture script exhausted".into())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn canned_fixture_repeats() {
        let t = FixtureTransport::canned(json!({"ok": true}));
        for _ in 0..3 {
            assert_eq!(t.send("/x", &json!({})).await.unwrap(), json!({"ok": true}));
        }
        assert_eq!(t.calls(), 3);
    }

    #[tokio::test]
    async fn scripted_fixture_pops_in_order() {
        let t = FixtureTransport::scripted(vec![
            Err(TransportError::Timeout),
            Ok(json!({"n": 2})),
        ]);
        assert!(matches!(
            t.send("/x", &json!({})).await,
            Err(TransportError::Timeout)
        ));
        assert_eq!(t.send("/x", &json!({})).await.unwrap(), json!({"n": 2}));
        assert!(t.send("/x", &json!({})).await.is_err());
    }

    #[test]
    fn transience_classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Connect("refused".into()).is_transient());
        assert!(TransportError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!TransportError::Status { status: 400, body: String::new() }.is_transient());
        assert!(!TransportError::Malformed("bad json".into()).is_transient());
    }
}
