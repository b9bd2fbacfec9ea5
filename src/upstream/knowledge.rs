//! Knowledge service adapter — natural-language question in, cited answer out.
//!
//! Wire types are private to this module; callers only see
//! [`ServiceResult::Answer`]. Any parse failure becomes a non-retryable
//! malformed-response error.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::breaker::CircuitState;
use super::resilient::ResilientClient;
use super::{ServiceError, ServiceResult, UpstreamId};

const QUERY_PATH: &str = "/query";

/// Answers shorter than this are retrieval misses dressed up as text;
/// treat them as contract violations rather than surfacing boilerplate.
const MIN_ANSWER_LEN: usize = 10;

#[derive(Debug)]
pub struct KnowledgeClient {
    client: ResilientClient,
    top_k: usize,
}

impl KnowledgeClient {
    pub fn new(client: ResilientClient, top_k: usize) -> Self {
        Self { client, top_k }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.client.circuit_state()
    }

    pub async fn ask(&self, question: &str) -> Result<ServiceResult, ServiceError> {
        let payload = serde_json::to_value(QueryRequest { question, top_k: self.top_k })
            .map_err(|e| self.malformed(format!("request serialization: {e}")))?;

        let raw = self.client.call(QUERY_PATH, payload).await?;

        let parsed: QueryResponse = serde_json::from_value(raw)
            .map_err(|e| self.malformed(format!("unexpected response shape: {e}")))?;

        let text = parsed.answer.trim();
        if text.len() < MIN_ANSWER_LEN {
            return Err(self.malformed("empty or truncated answer".into()));
        }

        debug!(
            answer_len = text.len(),
            sources = parsed.sources.len(),
            "knowledge answer received"
        );

        Ok(ServiceResult::Answer { text: text.to_string(), sources: parsed.sources })
    }

    fn malformed(&self, reason: String) -> ServiceError {
        ServiceError::Malformed { upstream: UpstreamId::Knowledge, reason }
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    question: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    answer: String,
    #[serde(default)]
    sources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResilienceConfig;
    use crate::upstream::breaker::{BreakerConfig, CircuitBreaker};
    use crate::upstream::resilient::RetryPolicy;
    use crate::upstream::transport::{FixtureTransport, Transport};
    use serde_json::json;
    use std::time::Duration;

    fn knowledge_client(fixture: FixtureTransport) -> KnowledgeClient {
        let resilience = ResilienceConfig {
            max_attempts: 1,
            base_backoff_ms: 1,
            max_backoff_ms: 10,
            jitter: 0.0,
            failure_threshold: 3,
            failure_window_seconds: 60,
            cooldown_seconds: 30,
        };
        KnowledgeClient::new(
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
                RetryPolicy::new(&resilience),
                Duration::from_secs(2),
            ),
            8,
        )
    }

    #[tokio::test]
    async fn parses_answer_and_sources() {
        let fixture = FixtureTransport::canned(json!({
            "answer": "Jal Jeevan Mission provides rural tap connections.",
            "sources": ["guidelines.pdf"],
        }));
        let result = knowledge_client(fixture).ask("what is jjm").await.unwrap();
        match result {
            ServiceResult::Answer { text, sources } => {
                assert!(text.contains("Jal Jeevan Mission"));
                assert_eq!(sources, vec!["guidelines.pdf".to_string()]);
            }
            other => panic!("expected answer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_answer_field_is_malformed() {
        let fixture = FixtureTransport::canned(json!({"result": "nope"}));
        let err = knowledge_client(fixture).ask("q").await.unwrap_err();
        assert!(matches!(err, ServiceError::Malformed { .. }));
    }

    #[tokio::test]
    async fn stub_answer_is_malformed() {
        let fixture = FixtureTransport::canned(json!({"answer": "   ok   "}));
        let err = knowledge_client(fixture).ask("q").await.unwrap_err();
        assert!(matches!(err, ServiceError::Malformed { .. }));
    }
}
