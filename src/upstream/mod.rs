//! Upstream service integration.
//!
//! Two external services are reachable from the pipeline: the knowledge
//! service (free-text question answering) and the records service
//! (aggregate analytics). Both are called through [`resilient::ResilientClient`],
//! which owns that upstream's circuit breaker. Transports are enum-dispatched
//! ([`transport::Transport`]) so the fixture double can stand in for the real
//! HTTP backend — selected from config at construction, never at runtime.

pub mod breaker;
pub mod knowledge;
pub mod records;
pub mod resilient;
pub mod transport;

use std::fmt;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::config::Config;
use crate::error::AppError;

use breaker::{BreakerConfig, CircuitBreaker};
use knowledge::KnowledgeClient;
use records::RecordsClient;
use resilient::{ResilientClient, RetryPolicy};
use transport::{FixtureTransport, HttpTransport, Transport};

/// Identity of an upstream service. Each has its own circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamId {
    Knowledge,
    Records,
}

impl fmt::Display for UpstreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamId::Knowledge => write!(f, "knowledge"),
            UpstreamId::Records => write!(f, "records"),
        }
    }
}

/// One labeled data point in an analytics result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub label: String,
    pub value: f64,
}

/// What an upstream returned, in domain form.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceResult {
    /// Ordered label/value rows from the records service.
    Rows(Vec<Row>),
    /// Answer text plus source citations from the knowledge service.
    Answer { text: String, sources: Vec<String> },
}

/// Failures surfaced by upstream clients after retries and parsing.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Circuit open, retries exhausted, or budget spent.
    #[error("{upstream} service unavailable: {reason}")]
    Unavailable { upstream: UpstreamId, reason: String },
    /// Response did not match the published contract, or the service
    /// rejected the request outright. Not retryable.
    #[error("{upstream} service returned a malformed response: {reason}")]
    Malformed { upstream: UpstreamId, reason: String },
}

impl ServiceError {
    pub fn upstream(&self) -> UpstreamId {
        match self {
            ServiceError::Unavailable { upstream, .. }
            | ServiceError::Malformed { upstream, .. } => *upstream,
        }
    }
}

/// Construct both upstream clients from config.
///
/// Each client gets its own breaker; retry tuning is shared. Unknown
/// provider names are a startup error, not a runtime fallback.
pub fn build_clients(config: &Config) -> Result<(KnowledgeClient, RecordsClient), AppError> {
    let retry = RetryPolicy::new(&config.resilience);
    let breaker_config = BreakerConfig {
        failure_threshold: config.resilience.failure_threshold,
        failure_window: Duration::from_secs(config.resilience.failure_window_seconds),
        cooldown: Duration::from_secs(config.resilience.cooldown_seconds),
    };

    let knowledge_transport = build_transport(
        &config.knowledge.provider,
        &config.knowledge.base_url,
        Duration::from_secs(config.knowledge.timeout_seconds),
        config.knowledge_api_key.clone(),
        json!({
            "answer": "Jal Jeevan Mission is a Government of India programme providing \
                       functional household tap connections to rural households.",
            "sources": ["fixture"],
        }),
    )?;
    let knowledge = KnowledgeClient::new(
        ResilientClient::new(
            UpstreamId::Knowledge,
            knowledge_transport,
            CircuitBreaker::new(UpstreamId::Knowledge, breaker_config.clone()),
            retry.clone(),
            Duration::from_secs(config.knowledge.timeout_seconds),
        ),
        config.knowledge.top_k,
    );

    let records_transport = build_transport(
        &config.records.provider,
        &config.records.base_url,
        Duration::from_secs(config.records.timeout_seconds),
        config.records_api_key.clone(),
        json!({
            "rows": [
                { "label": "2021", "value": 118.0 },
                { "label": "2022", "value": 204.5 },
                { "label": "2023", "value": 157.25 },
            ],
        }),
    )?;
    let records = RecordsClient::new(ResilientClient::new(
        UpstreamId::Records,
        records_transport,
        CircuitBreaker::new(UpstreamId::Records, breaker_config),
        retry,
        Duration::from_secs(config.records.timeout_seconds),
    ));

    Ok((knowledge, records))
}

fn build_transport(
    provider: &str,
    base_url: &str,
    timeout: Duration,
    api_key: Option<String>,
    fixture_response: serde_json::Value,
) -> Result<Transport, AppError> {
    match provider {
        "http" => Ok(Transport::Http(
            HttpTransport::new(base_url.to_string(), timeout, api_key)
                .map_err(|e| AppError::Config(e.to_string()))?,
        )),
        "fixture" => Ok(Transport::Fixture(FixtureTransport::canned(fixture_response))),
        other => Err(AppError::Config(format!("unknown upstream provider: {other}"))),
    }
}
