//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` (or the `-f` path) relative to the current
//! working directory, then applies `JALMITRA_BIND` and `JALMITRA_LOG_LEVEL`
//! env overrides. Upstream API keys come from `KNOWLEDGE_API_KEY` and
//! `RECORDS_API_KEY` env vars only — never TOML.

use std::{collections::HashMap, env, fs, path::Path};

use serde::Deserialize;

use crate::error::AppError;

/// HTTP serving configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to bind the API listener to.
    pub bind: String,
}

/// Classifier/translator vocabulary and thresholds.
#[derive(Debug, Clone)]
pub struct NluConfig {
    /// Classifications with confidence below this are demoted to unrecognized.
    pub confidence_threshold: f64,
    /// Known state names, lowercase.
    pub states: Vec<String>,
    /// Known division names, lowercase.
    pub divisions: Vec<String>,
    /// Abbreviation → expansion pairs, sorted by abbreviation for
    /// deterministic application order.
    pub aliases: Vec<(String, String)>,
}

/// Knowledge service (question answering) upstream configuration.
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Which transport is active (`"http"` or `"fixture"`).
    pub provider: String,
    /// Service base URL; request paths are appended.
    pub base_url: String,
    /// Overall per-call timeout budget in seconds.
    pub timeout_seconds: u64,
    /// Number of passages the service should retrieve per question.
    pub top_k: usize,
}

/// Records service (aggregate analytics) upstream configuration.
#[derive(Debug, Clone)]
pub struct RecordsConfig {
    /// Which transport is active (`"http"` or `"fixture"`).
    pub provider: String,
    /// Service base URL; request paths are appended.
    pub base_url: String,
    /// Overall per-call timeout budget in seconds.
    pub timeout_seconds: u64,
    /// Field names the records service publishes. Translated queries may
    /// only reference fields on this list.
    pub schema_fields: Vec<String>,
}

/// Retry and circuit-breaker tuning, shared by both upstreams.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Maximum attempts per call (first try included).
    pub max_attempts: u32,
    /// Base backoff before the first retry, in milliseconds.
    pub base_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_backoff_ms: u64,
    /// Jitter fraction applied to each backoff (0.0 disables).
    pub jitter: f64,
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    pub failure_window_seconds: u64,
    /// How long an open circuit rejects calls before allowing a probe.
    pub cooldown_seconds: u64,
}

/// Response cache tuning.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry time-to-live in seconds.
    pub ttl_seconds: u64,
}

/// Fully-resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub log_level: String,
    pub server: ServerConfig,
    pub nlu: NluConfig,
    pub knowledge: KnowledgeConfig,
    pub records: RecordsConfig,
    pub resilience: ResilienceConfig,
    pub cache: CacheConfig,
    /// API key for the knowledge service, from `KNOWLEDGE_API_KEY` env.
    pub knowledge_api_key: Option<String>,
    /// API key for the records service, from `RECORDS_API_KEY` env.
    pub records_api_key: Option<String>,
}

// ── Raw TOML shape — serde target before resolution ──────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    service: RawService,
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    nlu: RawNlu,
    #[serde(default)]
    knowledge: RawKnowledge,
    #[serde(default)]
    records: RawRecords,
    #[serde(default)]
    resilience: RawResilience,
    #[serde(default)]
    cache: RawCache,
}

#[derive(Deserialize)]
struct RawService {
    name: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_bind")]
    bind: String,
}

impl Default for RawServer {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Deserialize)]
struct RawNlu {
    #[serde(default = "default_confidence_threshold")]
    confidence_threshold: f64,
    #[serde(default = "default_states")]
    states: Vec<String>,
    #[serde(default = "default_divisions")]
    divisions: Vec<String>,
    #[serde(default = "default_aliases")]
    aliases: HashMap<String, String>,
}

impl Default for RawNlu {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            states: default_states(),
            divisions: default_divisions(),
            aliases: default_aliases(),
        }
    }
}

#[derive(Deserialize)]
struct RawKnowledge {
    #[serde(default = "default_provider")]
    provider: String,
    #[serde(default = "default_knowledge_base_url")]
    base_url: String,
    #[serde(default = "default_knowledge_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

impl Default for RawKnowledge {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_knowledge_base_url(),
            timeout_seconds: default_knowledge_timeout_seconds(),
            top_k: default_top_k(),
        }
    }
}

#[derive(Deserialize)]
struct RawRecords {
    #[serde(default = "default_provider")]
    provider: String,
    #[serde(default = "default_records_base_url")]
    base_url: String,
    #[serde(default = "default_records_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_schema_fields")]
    schema_fields: Vec<String>,
}

impl Default for RawRecords {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_records_base_url(),
            timeout_seconds: default_records_timeout_seconds(),
            schema_fields: default_schema_fields(),
        }
    }
}

#[derive(Deserialize)]
struct RawResilience {
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    max_backoff_ms: u64,
    #[serde(default = "default_jitter")]
    jitter: f64,
    #[serde(default = "default_failure_threshold")]
    failure_threshold: u32,
    #[serde(default = "default_failure_window_seconds")]
    failure_window_seconds: u64,
    #[serde(default = "default_cooldown_seconds")]
    cooldown_seconds: u64,
}

impl Default for RawResilience {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: default_jitter(),
            failure_threshold: default_failure_threshold(),
            failure_window_seconds: default_failure_window_seconds(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawCache {
    #[serde(default = "default_cache_ttl_seconds")]
    ttl_seconds: u64,
}

impl Default for RawCache {
    fn default() -> Self {
        Self { ttl_seconds: default_cache_ttl_seconds() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_confidence_threshold() -> f64 {
    0.4
}

fn default_states() -> Vec<String> {
    [
        "andaman and nicobar islands",
        "andhra pradesh",
        "haryana",
        "madhya pradesh",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_divisions() -> Vec<String> {
    [
        "ambala", "bhopal", "gwalior", "guntur", "indore", "jabalpur",
        "kurnool", "nellore", "port blair", "ujjain", "vijayawada",
        "visakhapatnam",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_aliases() -> HashMap<String, String> {
    [
        ("mp", "madhya pradesh"),
        ("ap", "andhra pradesh"),
        ("hr", "haryana"),
        ("a&n", "andaman and nicobar islands"),
        ("andaman", "andaman and nicobar islands"),
        ("nicobar", "andaman and nicobar islands"),
        ("jjm", "jal jeevan mission"),
        ("sbm", "swachh bharat mission"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_provider() -> String {
    "http".to_string()
}

fn default_knowledge_base_url() -> String {
    "http://127.0.0.1:9091".to_string()
}

fn default_knowledge_timeout_seconds() -> u64 {
    20
}

fn default_top_k() -> usize {
    8
}

fn default_records_base_url() -> String {
    "http://127.0.0.1:9090".to_string()
}

fn default_records_timeout_seconds() -> u64 {
    10
}

fn default_schema_fields() -> Vec<String> {
    ["sanction_year", "state_name", "division_name", "scheme_type"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_failure_window_seconds() -> u64 {
    60
}

fn default_cooldown_seconds() -> u64 {
    30
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

/// Load config from `config/default.toml` (or `path_override`), then apply
/// env-var overrides.
pub fn load(path_override: Option<&str>) -> Result<Config, AppError> {
    let bind_override = env::var("JALMITRA_BIND").ok();
    let log_level_override = env::var("JALMITRA_LOG_LEVEL").ok();
    load_from(
        Path::new(path_override.unwrap_or("config/default.toml")),
        bind_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    bind_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let bind = bind_override.unwrap_or(&parsed.server.bind).to_string();
    let log_level = log_level_override
        .unwrap_or(&parsed.service.log_level)
        .to_string();

    let mut aliases: Vec<(String, String)> = parsed
        .nlu
        .aliases
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
        .collect();
    aliases.sort();

    Ok(Config {
        service_name: parsed.service.name,
        log_level,
        server: ServerConfig { bind },
        nlu: NluConfig {
            confidence_threshold: parsed.nlu.confidence_threshold,
            states: lowercased(parsed.nlu.states),
            divisions: lowercased(parsed.nlu.divisions),
            aliases,
        },
        knowledge: KnowledgeConfig {
            provider: parsed.knowledge.provider,
            base_url: parsed.knowledge.base_url,
            timeout_seconds: parsed.knowledge.timeout_seconds,
            top_k: parsed.knowledge.top_k,
        },
        records: RecordsConfig {
            provider: parsed.records.provider,
            base_url: parsed.records.base_url,
            timeout_seconds: parsed.records.timeout_seconds,
            schema_fields: lowercased(parsed.records.schema_fields),
        },
        resilience: ResilienceConfig {
            max_attempts: parsed.resilience.max_attempts.max(1),
            base_backoff_ms: parsed.resilience.base_backoff_ms,
            max_backoff_ms: parsed.resilience.max_backoff_ms,
            jitter: parsed.resilience.jitter.clamp(0.0, 1.0),
            failure_threshold: parsed.resilience.failure_threshold.max(1),
            failure_window_seconds: parsed.resilience.failure_window_seconds,
            cooldown_seconds: parsed.resilience.cooldown_seconds,
        },
        cache: CacheConfig { ttl_seconds: parsed.cache.ttl_seconds },
        knowledge_api_key: env::var("KNOWLEDGE_API_KEY").ok(),
        records_api_key: env::var("RECORDS_API_KEY").ok(),
    })
}

fn lowercased(values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|v| v.to_lowercase()).collect()
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests — fixture transports, no API keys, no
/// external calls.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            service_name: "test".into(),
            log_level: "info".into(),
            server: ServerConfig { bind: default_bind() },
            nlu: NluConfig {
                confidence_threshold: default_confidence_threshold(),
                states: default_states(),
                divisions: default_divisions(),
                aliases: {
                    let mut a: Vec<(String, String)> =
                        default_aliases().into_iter().collect();
                    a.sort();
                    a
                },
            },
            knowledge: KnowledgeConfig {
                provider: "fixture".into(),
                base_url: "http://localhost:0".into(),
                timeout_seconds: 1,
                top_k: default_top_k(),
            },
            records: RecordsConfig {
                provider: "fixture".into(),
                base_url: "http://localhost:0".into(),
                timeout_seconds: 1,
                schema_fields: default_schema_fields(),
            },
            resilience: ResilienceConfig {
                max_attempts: default_max_attempts(),
                base_backoff_ms: 10,
                max_backoff_ms: 50,
                jitter: 0.0,
                failure_threshold: default_failure_threshold(),
                failure_window_seconds: default_failure_window_seconds(),
                cooldown_seconds: default_cooldown_seconds(),
            },
            cache: CacheConfig { ttl_seconds: default_cache_ttl_seconds() },
            knowledge_api_key: None,
            records_api_key: None,
        }
    }
}
