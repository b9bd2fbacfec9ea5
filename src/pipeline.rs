//! Request pipeline: classify → translate → call → render → assemble.
//!
//! [`Pipeline::handle`] is the error boundary for a chat turn — every
//! failure in the taxonomy (unclassified text, translation failure,
//! unavailable or malformed upstream, empty result, render failure) is
//! mapped to a reply envelope here. Nothing propagates to the server layer
//! and upstream internals never reach the user.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{ResponseCache, cache_key};
use crate::config::Config;
use crate::error::AppError;
use crate::nlu::translator::{QueryTranslator, TranslationError};
use crate::nlu::{Intent, IntentClassifier, normalize};
use crate::upstream::knowledge::KnowledgeClient;
use crate::upstream::records::RecordsClient;
use crate::upstream::{self, Row, ServiceError, ServiceResult};
use crate::viz::{self, VizError};

// ── Envelope types ────────────────────────────────────────────────────────────

/// One inbound chat turn.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Optional prior-turn context, opaque to the pipeline.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Immutable query as accepted into the pipeline.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub context: HashMap<String, String>,
}

impl Query {
    pub fn new(request: ChatRequest) -> Self {
        Self {
            text: request.message,
            received_at: Utc::now(),
            context: request.context,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    Text,
    Knowledge,
    Visualization,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Error,
}

/// Outbound reply envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<String>,
    #[serde(rename = "type")]
    pub kind: ReplyKind,
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChatReply {
    fn error(kind: ReplyKind, answer: &str, error_message: &str) -> Self {
        Self {
            answer: answer.to_string(),
            visualization: None,
            kind,
            status: ReplyStatus::Error,
            error_message: Some(error_message.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Cached portion of a successful reply; each cache hit is restamped.
#[derive(Debug, Clone)]
struct CachedReply {
    answer: String,
    visualization: Option<String>,
    kind: ReplyKind,
}

impl CachedReply {
    fn into_reply(self) -> ChatReply {
        ChatReply {
            answer: self.answer,
            visualization: self.visualization,
            kind: self.kind,
            status: ReplyStatus::Success,
            error_message: None,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregate service health, exposed on `/api/health`.
#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: String,
    pub knowledge_circuit: String,
    pub records_circuit: String,
    pub cached_replies: usize,
    pub timestamp: DateTime<Utc>,
}

// ── User-facing copy ──────────────────────────────────────────────────────────

const CLARIFICATION: &str = "I couldn't work out what you're asking. Try a data \
    question like \"show cost by year\" or \"scheme count by type\", or a \
    knowledge question like \"what is the Jal Jeevan Mission\".";

const REPHRASE: &str = "I can chart queries like \"cost by year\", \"scheme count \
    by type\", \"average progress\" or \"total schemes\", optionally with a state \
    or division name. Could you rephrase?";

const UNAVAILABLE: &str =
    "I'm temporarily unable to retrieve this. Please try again in a little while.";

const PROCESSING_FAILED: &str =
    "Something went wrong while processing your request. Please try again.";

const NO_RECORDS: &str = "No matching records were found for your query.";

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    classifier: IntentClassifier,
    translator: QueryTranslator,
    knowledge: KnowledgeClient,
    records: RecordsClient,
    cache: ResponseCache<CachedReply>,
    confidence_threshold: f64,
}

impl Pipeline {
    /// Build the full pipeline with config-selected transports.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let (knowledge, records) = upstream::build_clients(config)?;
        Ok(Self::new(config, knowledge, records))
    }

    /// Build with injected upstream clients (tests use scripted fixtures).
    pub fn new(config: &Config, knowledge: KnowledgeClient, records: RecordsClient) -> Self {
        Self {
            classifier: IntentClassifier::new(config.nlu.aliases.clone()),
            translator: QueryTranslator::new(&config.nlu, &config.records),
            knowledge,
            records,
            cache: ResponseCache::new(std::time::Duration::from_secs(
                config.cache.ttl_seconds,
            )),
            confidence_threshold: config.nlu.confidence_threshold,
        }
    }

    /// Handle one chat turn. Never fails — every failure becomes an error
    /// envelope.
    pub async fn handle(&self, request: ChatRequest) -> ChatReply {
        let query = Query::new(request);
        let request_id = Uuid::new_v4();
        debug!(
            %request_id,
            received_at = %query.received_at,
            context_keys = query.context.len(),
            "query accepted"
        );

        let classification = self.classifier.classify(&query.text);
        info!(
            %request_id,
            intent = %classification.intent,
            confidence = classification.confidence,
            evidence = ?classification.evidence,
            "query classified"
        );

        match classification.intent {
            Intent::Unrecognized => self.clarification_reply(),
            _ if classification.confidence < self.confidence_threshold => {
                debug!(%request_id, "confidence below threshold — asking for clarification");
                self.clarification_reply()
            }
            Intent::Analytics => self.handle_analytics(&query, request_id).await,
            Intent::Knowledge => self.handle_knowledge(&query, request_id).await,
        }
    }

    pub async fn health(&self) -> HealthSnapshot {
        let knowledge = self.knowledge.circuit_state();
        let records = self.records.circuit_state();
        let degraded = knowledge == crate::upstream::breaker::CircuitState::Open
            || records == crate::upstream::breaker::CircuitState::Open;
        HealthSnapshot {
            status: if degraded { "degraded" } else { "ok" }.to_string(),
            knowledge_circuit: knowledge.to_string(),
            records_circuit: records.to_string(),
            cached_replies: self.cache.len().await,
            timestamp: Utc::now(),
        }
    }

    // ── Knowledge path ────────────────────────────────────────────────────────

    async fn handle_knowledge(&self, query: &Query, request_id: Uuid) -> ChatReply {
        let key = cache_key("knowledge", &normalize(&query.text));
        if let Some(hit) = self.cache.get(&key).await {
            debug!(%request_id, "knowledge cache hit");
            return hit.into_reply();
        }

        match self.knowledge.ask(&query.text).await {
            Ok(ServiceResult::Answer { text, sources }) => {
                if !sources.is_empty() {
                    debug!(%request_id, sources = ?sources, "knowledge answer sources");
                }
                let cached = CachedReply {
                    answer: text,
                    visualization: None,
                    kind: ReplyKind::Knowledge,
                };
                self.cache
                    .put(key, cached.clone(), self.cache.default_ttl())
                    .await;
                cached.into_reply()
            }
            Ok(other) => {
                error!(%request_id, result = ?other, "knowledge service returned a non-answer result");
                ChatReply::error(ReplyKind::Text, PROCESSING_FAILED, "upstream returned unusable data")
            }
            Err(err) => self.service_error_reply(request_id, err),
        }
    }

    // ── Analytics path ────────────────────────────────────────────────────────

    async fn handle_analytics(&self, query: &Query, request_id: Uuid) -> ChatReply {
        let spec = match self.translator.translate(&query.text) {
            Ok(spec) => spec,
            Err(err) => {
                info!(%request_id, error = %err, "translation failed");
                return ChatReply::error(ReplyKind::Text, REPHRASE, &translation_message(&err));
            }
        };

        let key = cache_key("analytics", &spec.cache_repr());
        if let Some(hit) = self.cache.get(&key).await {
            debug!(%request_id, "analytics cache hit");
            return hit.into_reply();
        }

        let rows = match self.records.aggregate(&spec).await {
            Ok(ServiceResult::Rows(rows)) => rows,
            Ok(other) => {
                error!(%request_id, result = ?other, "records service returned a non-row result");
                return ChatReply::error(
                    ReplyKind::Text,
                    PROCESSING_FAILED,
                    "upstream returned unusable data",
                );
            }
            Err(err) => return self.service_error_reply(request_id, err),
        };

        match viz::render(&spec, &rows) {
            Ok(bytes) => {
                let uri = format!("data:image/svg+xml;base64,{}", STANDARD.encode(&bytes));
                let cached = CachedReply {
                    answer: format!("Here's the visualization for your query: {}", query.text),
                    visualization: Some(uri),
                    kind: ReplyKind::Visualization,
                };
                self.cache
                    .put(key, cached.clone(), self.cache.default_ttl())
                    .await;
                cached.into_reply()
            }
            Err(VizError::EmptyResult) => {
                info!(%request_id, "valid query matched no records");
                ChatReply::error(ReplyKind::Data, NO_RECORDS, "no matching records")
            }
            Err(VizError::Render(reason)) => {
                // The data is in hand; a render bug must not block delivery.
                warn!(%request_id, %reason, "render failed — falling back to tabular answer");
                let cached = CachedReply {
                    answer: tabulate(&viz::chart_title(&spec), &rows),
                    visualization: None,
                    kind: ReplyKind::Data,
                };
                self.cache
                    .put(key, cached.clone(), self.cache.default_ttl())
                    .await;
                cached.into_reply()
            }
        }
    }

    // ── Failure mapping ───────────────────────────────────────────────────────

    fn clarification_reply(&self) -> ChatReply {
        ChatReply::error(ReplyKind::Text, CLARIFICATION, "query did not match a known intent")
    }

    fn service_error_reply(&self, request_id: Uuid, err: ServiceError) -> ChatReply {
        match &err {
            ServiceError::Unavailable { upstream, reason } => {
                warn!(%request_id, %upstream, %reason, "upstream unavailable");
                ChatReply::error(ReplyKind::Text, UNAVAILABLE, "upstream temporarily unavailable")
            }
            ServiceError::Malformed { upstream, reason } => {
                // Contract violation — log as a defect, answer generically.
                error!(%request_id, %upstream, %reason, "malformed upstream response");
                ChatReply::error(ReplyKind::Text, PROCESSING_FAILED, "upstream returned unusable data")
            }
        }
    }
}

fn translation_message(err: &TranslationError) -> String {
    match err {
        TranslationError::NoTemplate => "no analytics template matched".to_string(),
        TranslationError::UnknownField(_) => "query referenced an unknown field".to_string(),
    }
}

fn tabulate(title: &str, rows: &[Row]) -> String {
    let mut out = format!("{title}:");
    for row in rows {
        let value = if row.value.fract() == 0.0 && row.value.abs() < 1e15 {
            format!("{}", row.value as i64)
        } else {
            format!("{:.2}", row.value)
        };
        out.push_str(&format!("\n- {}: {}", row.label, value));
    }
    out
}
