//! Jalmitra Bot — backend for the scheme-data assistant.
//!
//! Routes each chat turn to one of two external capabilities: the knowledge
//! service (free-text questions over the curated corpus) or the records
//! service (aggregate queries over the schemes store). Analytics results are
//! rendered as charts. Upstream calls go through a resilient client with
//! timeout, bounded retry, and a per-upstream circuit breaker.

pub mod cache;
pub mod config;
pub mod error;
pub mod logger;
pub mod nlu;
pub mod pipeline;
pub mod server;
pub mod upstream;
pub mod viz;
