//! End-to-end chat turns over fixture transports — no network anywhere.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use serde_json::json;
use tempfile::NamedTempFile;

use jalmitra_bot::config::{self, Config};
use jalmitra_bot::pipeline::{ChatRequest, Pipeline, ReplyKind, ReplyStatus};
use jalmitra_bot::upstream::breaker::{BreakerConfig, CircuitBreaker};
use jalmitra_bot::upstream::knowledge::KnowledgeClient;
use jalmitra_bot::upstream::records::RecordsClient;
use jalmitra_bot::upstream::resilient::{ResilientClient, RetryPolicy};
use jalmitra_bot::upstream::transport::{FixtureTransport, Transport, TransportError};
use jalmitra_bot::upstream::UpstreamId;

const TEST_TOML: &str = r#"
[service]
name = "jalmitra-test"

[knowledge]
provider = "fixture"
timeout_seconds = 2

[records]
provider = "fixture"
timeout_seconds = 2

[resilience]
max_attempts = 3
base_backoff_ms = 10
max_backoff_ms = 50
jitter = 0.0
failure_threshold = 3
failure_window_seconds = 60
cooldown_seconds = 30
"#;

fn test_config() -> Config {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(TEST_TOML.as_bytes()).unwrap();
    config::load_from(f.path(), None, None).unwrap()
}

fn resilient(config: &Config, upstream: UpstreamId, fixture: FixtureTransport) -> ResilientClient {
    ResilientClient::new(
        upstream,
        Transport::Fixture(fixture),
        CircuitBreaker::new(
            upstream,
            BreakerConfig {
                failure_threshold: config.resilience.failure_threshold,
                failure_window: Duration::from_secs(config.resilience.failure_window_seconds),
                cooldown: Duration::from_secs(config.resilience.cooldown_seconds),
            },
        ),
        RetryPolicy::new(&config.resilience),
        Duration::from_secs(2),
    )
}

/// Pipeline wired to the given fixtures.
fn pipeline(
    config: &Config,
    knowledge: FixtureTransport,
    records: FixtureTransport,
) -> Pipeline {
    let knowledge_client = KnowledgeClient::new(
        resilient(config, UpstreamId::Knowledge, knowledge),
        config.knowledge.top_k,
    );
    let records_client = RecordsClient::new(resilient(config, UpstreamId::Records, records));
    Pipeline::new(config, knowledge_client, records_client)
}

fn knowledge_fixture() -> FixtureTransport {
    FixtureTransport::canned(json!({
        "answer": "Jal Jeevan Mission is a Government of India programme that \
                   provides functional household tap connections in rural areas.",
        "sources": ["jjm_guidelines.pdf"],
    }))
}

fn records_fixture() -> FixtureTransport {
    FixtureTransport::canned(json!({
        "rows": [
            { "label": "2021", "value": 118.0 },
            { "label": "2022", "value": 204.5 },
            { "label": "2023", "value": 157.25 },
        ],
    }))
}

fn turn(message: &str) -> ChatRequest {
    ChatRequest { message: message.to_string(), context: HashMap::new() }
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn knowledge_question_reaches_the_knowledge_service() {
    let config = test_config();
    let knowledge = knowledge_fixture();
    let records = records_fixture();
    let p = pipeline(&config, knowledge.clone(), records.clone());

    let reply = p.handle(turn("what is the Jal Jeevan Mission")).await;

    assert_eq!(reply.kind, ReplyKind::Knowledge);
    assert_eq!(reply.status, ReplyStatus::Success);
    assert!(reply.answer.contains("Jal Jeevan Mission"));
    assert_eq!(knowledge.calls(), 1);
    assert_eq!(records.calls(), 0);
}

#[tokio::test]
async fn analytics_question_becomes_a_line_chart() {
    let config = test_config();
    let knowledge = knowledge_fixture();
    let records = records_fixture();
    let p = pipeline(&config, knowledge.clone(), records.clone());

    let reply = p.handle(turn("show me cost by year for 2023")).await;

    assert_eq!(reply.kind, ReplyKind::Visualization);
    assert_eq!(reply.status, ReplyStatus::Success);
    assert_eq!(records.calls(), 1);
    assert_eq!(knowledge.calls(), 0);

    // Time grouping selects a line chart.
    let uri = reply.visualization.expect("expected a chart");
    let prefix = "data:image/svg+xml;base64,";
    assert!(uri.starts_with(prefix));
    let bytes = {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&uri[prefix.len()..])
            .unwrap()
    };
    let doc = String::from_utf8(bytes).unwrap();
    assert!(doc.contains("<polyline"));
    assert!(doc.contains("Estimated cost by sanction year"));
}

#[tokio::test]
async fn gibberish_is_clarified_without_any_upstream_call() {
    let config = test_config();
    let knowledge = knowledge_fixture();
    let records = records_fixture();
    let p = pipeline(&config, knowledge.clone(), records.clone());

    let reply = p.handle(turn("asdkjasd")).await;

    assert_eq!(reply.status, ReplyStatus::Error);
    assert_eq!(reply.kind, ReplyKind::Text);
    assert!(reply.answer.contains("Try a data question"));
    assert_eq!(knowledge.calls(), 0);
    assert_eq!(records.calls(), 0);
}

#[tokio::test]
async fn empty_result_is_text_not_a_blank_chart() {
    let config = test_config();
    let records = FixtureTransport::canned(json!({"rows": []}));
    let p = pipeline(&config, knowledge_fixture(), records);

    let reply = p.handle(turn("show me cost by year for 1999")).await;

    assert_eq!(reply.kind, ReplyKind::Data);
    assert!(reply.answer.contains("No matching records"));
    assert!(reply.visualization.is_none());
    assert_eq!(reply.error_message.as_deref(), Some("no matching records"));
}

#[tokio::test(start_paused = true)]
async fn consecutive_timeouts_open_the_circuit_and_short_circuit() {
    let config = test_config();
    let knowledge = FixtureTransport::scripted(vec![
        Err(TransportError::Timeout),
        Err(TransportError::Timeout),
        Err(TransportError::Timeout),
    ]);
    let p = pipeline(&config, knowledge.clone(), records_fixture());

    // First turn: three attempts, all time out; threshold 3 opens the circuit.
    let reply = p.handle(turn("what is the Jal Jeevan Mission")).await;
    assert_eq!(reply.status, ReplyStatus::Error);
    assert!(reply.answer.contains("temporarily unable"));
    assert_eq!(knowledge.calls(), 3);

    // Second turn fails fast without touching the wire.
    let reply = p.handle(turn("what is the Jal Jeevan Mission")).await;
    assert_eq!(reply.status, ReplyStatus::Error);
    assert_eq!(knowledge.calls(), 3, "open circuit must not attempt the network");

    let health = p.health().await;
    assert_eq!(health.status, "degraded");
    assert_eq!(health.knowledge_circuit, "open");
    assert_eq!(health.records_circuit, "closed");
}

#[tokio::test]
async fn identical_analytics_queries_share_a_cache_entry() {
    let config = test_config();
    let records = FixtureTransport::scripted(vec![Ok(json!({
        "rows": [
            { "label": "2022", "value": 10.0 },
            { "label": "2023", "value": 20.0 },
        ],
    }))]);
    let p = pipeline(&config, knowledge_fixture(), records.clone());

    let first = p.handle(turn("cost by year for 2023")).await;
    assert_eq!(first.status, ReplyStatus::Success);
    assert_eq!(records.calls(), 1);

    // A different phrasing with the same canonical spec must hit the cache;
    // the fixture script is exhausted, so a miss would fail.
    let second = p.handle(turn("2023 cost by year")).await;
    assert_eq!(second.status, ReplyStatus::Success);
    assert_eq!(second.answer, first.answer);
    assert_eq!(records.calls(), 1);
}

#[tokio::test]
async fn malformed_upstream_body_is_a_generic_failure() {
    let config = test_config();
    let records = FixtureTransport::canned(json!({"data": {"2022": 1}}));
    let p = pipeline(&config, knowledge_fixture(), records.clone());

    let reply = p.handle(turn("cost by year")).await;

    assert_eq!(reply.status, ReplyStatus::Error);
    assert!(reply.answer.contains("Something went wrong"));
    // Contract violations are not retried.
    assert_eq!(records.calls(), 1);
}

#[tokio::test]
async fn knowledge_turns_are_cached_by_normalized_text() {
    let config = test_config();
    let knowledge = FixtureTransport::scripted(vec![Ok(json!({
        "answer": "Har Ghar Jal is the goal of assured tap water supply.",
        "sources": [],
    }))]);
    let p = pipeline(&config, knowledge.clone(), records_fixture());

    let first = p.handle(turn("what is the Jal Jeevan Mission")).await;
    assert_eq!(first.status, ReplyStatus::Success);

    // Case and spacing differences normalize to the same cache key.
    let second = p.handle(turn("  WHAT   IS the jal jeevan mission ")).await;
    assert_eq!(second.status, ReplyStatus::Success);
    assert_eq!(second.answer, first.answer);
    assert_eq!(knowledge.calls(), 1);
}
