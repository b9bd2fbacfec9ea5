//! Records service adapter — structured query spec in, labeled rows out.
//!
//! Builds the aggregate request from a [`QuerySpec`]; an empty row set is a
//! valid result here (the caller decides how to present it), but a body
//! that does not match the contract is a non-retryable malformed response.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::breaker::CircuitState;
use super::resilient::ResilientClient;
use super::{Row, ServiceError, ServiceResult, UpstreamId};
use crate::nlu::translator::QuerySpec;

const AGGREGATE_PATH: &str = "/aggregate";

#[derive(Debug)]
pub struct RecordsClient {
    client: ResilientClient,
}

impl RecordsClient {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.client.circuit_state()
    }

    pub async fn aggregate(&self, spec: &QuerySpec) -> Result<ServiceResult, ServiceError> {
        let request = AggregateRequest {
            metric: spec.metric.wire_name(),
            group_by: spec.grouping.wire_name(),
            filters: spec
                .filters
                .iter()
                .map(|f| WireFilter {
                    field: &f.field,
                    op: f.op.to_string(),
                    value: &f.value,
                })
                .collect(),
        };

        let payload = serde_json::to_value(&request)
            .map_err(|e| self.malformed(format!("request serialization: {e}")))?;

        let raw = self.client.call(AGGREGATE_PATH, payload).await?;

        let parsed: AggregateResponse = serde_json::from_value(raw)
            .map_err(|e| self.malformed(format!("unexpected response shape: {e}")))?;

        let rows: Vec<Row> = parsed
            .rows
            .into_iter()
            .map(|r| Row { label: r.label, value: r.value })
            .collect();

        debug!(rows = rows.len(), metric = spec.metric.wire_name(), "aggregate received");

        Ok(ServiceResult::Rows(rows))
    }

    fn malformed(&self, reason: String) -> ServiceError {
        ServiceError::Malformed { upstream: UpstreamId::Records, reason }
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AggregateRequest<'a> {
    metric: &'a str,
    group_by: &'a str,
    filters: Vec<WireFilter<'a>>,
}

#[derive(Debug, Serialize)]
struct WireFilter<'a> {
    field: &'a str,
    op: String,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct AggregateResponse {
    rows: Vec<WireRow>,
}

#[derive(Debug, Deserialize)]
struct WireRow {
    label: String,
    value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResilienceConfig;
    use crate::nlu::translator::{ChartHint, Filter, FilterOp, Grouping, Metric, FIELD_YEAR};
    use crate::upstream::breaker::{BreakerConfig, CircuitBreaker};
    use crate::upstream::resilient::RetryPolicy;
    use crate::upstream::transport::{FixtureTransport, Transport};
    use serde_json::json;
    use std::time::Duration;

    fn records_client(fixture: FixtureTransport) -> RecordsClient {
        let resilience = ResilienceConfig {
            max_attempts: 1,
            base_backoff_ms: 1,
            max_backoff_ms: 10,
            jitter: 0.0,
            failure_threshold: 3,
            failure_window_seconds: 60,
            cooldown_seconds: 30,
        };
        RecordsClient::new(ResilientClient::new(
            UpstreamId::Records,
            Transport::Fixture(fixture),
            CircuitBreaker::new(
                UpstreamId::Records,
                BreakerConfig {
                    failure_threshold: 3,
                    failure_window: Duration::from_secs(60),
                    cooldown: Duration::from_secs(30),
                },
            ),
            RetryPolicy::new(&resilience),
            Duration::from_secs(2),
        ))
    }

    fn cost_by_year_spec() -> QuerySpec {
        QuerySpec {
            metric: Metric::Cost,
            grouping: Grouping::Year,
            filters: vec![Filter {
                field: FIELD_YEAR.to_string(),
                op: FilterOp::Eq,
                value: "2023".to_string(),
            }],
            chart_hint: ChartHint::Auto,
        }
    }

    #[tokio::test]
    async fn parses_ordered_rows() {
        let fixture = FixtureTransport::canned(json!({
            "rows": [
                { "label": "2022", "value": 10.5 },
                { "label": "2023", "value": 20.0 },
            ],
        }));
        let result = records_client(fixture)
            .aggregate(&cost_by_year_spec())
            .await
            .unwrap();
        assert_eq!(
            result,
            ServiceResult::Rows(vec![
                Row { label: "2022".into(), value: 10.5 },
                Row { label: "2023".into(), value: 20.0 },
            ])
        );
    }

    #[tokio::test]
    async fn empty_rows_are_a_valid_result() {
        let fixture = FixtureTransport::canned(json!({"rows": []}));
        let result = records_client(fixture)
            .aggregate(&cost_by_year_spec())
            .await
            .unwrap();
        assert_eq!(result, ServiceResult::Rows(Vec::new()));
    }

    #[tokio::test]
    async fn wrong_shape_is_malformed() {
        let fixture = FixtureTransport::canned(json!({"data": {"2022": 10}}));
        let err = records_client(fixture)
            .aggregate(&cost_by_year_spec())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Malformed { .. }));
    }
}
