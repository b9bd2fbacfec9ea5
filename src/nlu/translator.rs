//! Analytics text → structured query spec.
//!
//! Translation matches normalized text against an ordered template list,
//! most specific first; the first matching template wins. Templates are an
//! explicit data table rather than branching so precedence is visible and
//! testable. Every field a translated query references must be on the
//! records schema whitelist — an unknown field is a translation failure,
//! never a silently dropped filter.

use std::fmt;

use thiserror::Error;

use super::{contains_phrase, expand_aliases, normalize};
use crate::config::{NluConfig, RecordsConfig};

/// What the records service should aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cost,
    Count,
    Progress,
    Other,
}

impl Metric {
    pub fn wire_name(self) -> &'static str {
        match self {
            Metric::Cost => "cost",
            Metric::Count => "count",
            Metric::Progress => "progress",
            Metric::Other => "other",
        }
    }

    /// Human-readable axis/title label.
    pub fn title(self) -> &'static str {
        match self {
            Metric::Cost => "Estimated cost",
            Metric::Count => "Scheme count",
            Metric::Progress => "Completion progress",
            Metric::Other => "Value",
        }
    }
}

/// Dimension the aggregate is grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    Year,
    State,
    Division,
    SchemeType,
    None,
}

impl Grouping {
    pub fn wire_name(self) -> &'static str {
        match self {
            Grouping::Year => "year",
            Grouping::State => "state",
            Grouping::Division => "division",
            Grouping::SchemeType => "scheme_type",
            Grouping::None => "none",
        }
    }

    /// Records-schema field this grouping reads, if any.
    pub fn field_name(self) -> Option<&'static str> {
        match self {
            Grouping::Year => Some(FIELD_YEAR),
            Grouping::State => Some(FIELD_STATE),
            Grouping::Division => Some(FIELD_DIVISION),
            Grouping::SchemeType => Some(FIELD_SCHEME_TYPE),
            Grouping::None => None,
        }
    }

    /// True for time-axis groupings (drives line-chart selection).
    pub fn is_time(self) -> bool {
        matches!(self, Grouping::Year)
    }

    pub fn title(self) -> &'static str {
        match self {
            Grouping::Year => "sanction year",
            Grouping::State => "state",
            Grouping::Division => "division",
            Grouping::SchemeType => "scheme type",
            Grouping::None => "overall",
        }
    }
}

pub const FIELD_YEAR: &str = "sanction_year";
pub const FIELD_STATE: &str = "state_name";
pub const FIELD_DIVISION: &str = "division_name";
pub const FIELD_SCHEME_TYPE: &str = "scheme_type";

/// Requested chart style, if the user named one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartHint {
    Bar,
    Line,
    Pie,
    HorizontalBar,
    Auto,
}

impl ChartHint {
    pub fn wire_name(self) -> &'static str {
        match self {
            ChartHint::Bar => "bar",
            ChartHint::Line => "line",
            ChartHint::Pie => "pie",
            ChartHint::HorizontalBar => "horizontal-bar",
            ChartHint::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOp::Eq => write!(f, "="),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

/// Structured analytics request, ready for the records client.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub metric: Metric,
    pub grouping: Grouping,
    pub filters: Vec<Filter>,
    pub chart_hint: ChartHint,
}

impl QuerySpec {
    /// Canonical text form for cache keying: filters sorted by field then
    /// value, so filter order in the source text does not split entries.
    pub fn cache_repr(&self) -> String {
        let mut filters: Vec<String> = self
            .filters
            .iter()
            .map(|f| format!("{}{}{}", f.field, f.op, f.value))
            .collect();
        filters.sort();
        format!(
            "metric={};group={};filters={};chart={}",
            self.metric.wire_name(),
            self.grouping.wire_name(),
            filters.join(","),
            self.chart_hint.wire_name(),
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslationError {
    #[error("no template matched")]
    NoTemplate,
    #[error("field not in records schema: {0}")]
    UnknownField(String),
}

/// One translation template: every phrase group must have at least one
/// member present in the text.
struct Template {
    name: &'static str,
    requires: &'static [&'static [&'static str]],
    metric: Metric,
    grouping: Grouping,
}

impl Template {
    fn matches(&self, text: &str) -> bool {
        self.requires
            .iter()
            .all(|group| group.iter().any(|p| contains_phrase(text, p)))
    }
}

const COST_WORDS: &[&str] = &["cost", "expenditure", "budget", "spending"];
const COUNT_WORDS: &[&str] = &["how many", "count", "total", "number of"];
const SCHEME_WORDS: &[&str] = &["scheme", "schemes", "project", "projects"];

/// Ordered most-specific-first; the first match wins.
const TEMPLATES: &[Template] = &[
    Template {
        name: "cost_by_year",
        requires: &[COST_WORDS, &["year", "yearly", "annual", "annually"]],
        metric: Metric::Cost,
        grouping: Grouping::Year,
    },
    Template {
        name: "cost_by_state",
        requires: &[COST_WORDS, &["by state", "per state", "across states"]],
        metric: Metric::Cost,
        grouping: Grouping::State,
    },
    Template {
        name: "cost_by_division",
        requires: &[COST_WORDS, &["by division", "per division"]],
        metric: Metric::Cost,
        grouping: Grouping::Division,
    },
    Template {
        name: "count_by_type",
        requires: &[SCHEME_WORDS, &["type", "types", "category", "categories"]],
        metric: Metric::Count,
        grouping: Grouping::SchemeType,
    },
    Template {
        name: "progress_by_state",
        requires: &[
            &["progress", "completion"],
            &["by state", "per state", "across states"],
        ],
        metric: Metric::Progress,
        grouping: Grouping::State,
    },
    Template {
        name: "progress_overall",
        requires: &[&["progress", "completion", "status"]],
        metric: Metric::Progress,
        grouping: Grouping::None,
    },
    Template {
        name: "cost_overall",
        requires: &[COST_WORDS],
        metric: Metric::Cost,
        grouping: Grouping::None,
    },
    Template {
        name: "scheme_count",
        requires: &[COUNT_WORDS],
        metric: Metric::Count,
        grouping: Grouping::None,
    },
];

/// Translates classified analytics text into a [`QuerySpec`].
///
/// Vocabulary (states, divisions, aliases) and the schema whitelist come
/// from configuration; both are fixed at construction.
pub struct QueryTranslator {
    /// Sorted longest-first so the most specific location name wins.
    states: Vec<String>,
    divisions: Vec<String>,
    aliases: Vec<(String, String)>,
    schema_fields: Vec<String>,
}

impl QueryTranslator {
    pub fn new(nlu: &NluConfig, records: &RecordsConfig) -> Self {
        let mut states = nlu.states.clone();
        states.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        let mut divisions = nlu.divisions.clone();
        divisions.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        Self {
            states,
            divisions,
            aliases: nlu.aliases.clone(),
            schema_fields: records.schema_fields.clone(),
        }
    }

    pub fn translate(&self, text: &str) -> Result<QuerySpec, TranslationError> {
        let normalized = expand_aliases(&normalize(text), &self.aliases);

        let template = TEMPLATES
            .iter()
            .find(|t| t.matches(&normalized))
            .ok_or(TranslationError::NoTemplate)?;

        tracing::debug!(template = template.name, "translation template matched");

        let mut filters = Vec::new();
        if let Some(year) = extract_year(&normalized) {
            filters.push(Filter {
                field: FIELD_YEAR.to_string(),
                op: FilterOp::Eq,
                value: year,
            });
        }
        // States take precedence over divisions; at most one location filter.
        if let Some(state) = longest_location(&normalized, &self.states) {
            filters.push(Filter {
                field: FIELD_STATE.to_string(),
                op: FilterOp::Eq,
                value: state,
            });
        } else if let Some(division) = longest_location(&normalized, &self.divisions) {
            filters.push(Filter {
                field: FIELD_DIVISION.to_string(),
                op: FilterOp::Eq,
                value: division,
            });
        }

        let spec = QuerySpec {
            metric: template.metric,
            grouping: template.grouping,
            filters,
            chart_hint: extract_chart_hint(&normalized),
        };

        self.validate(&spec)?;
        Ok(spec)
    }

    fn validate(&self, spec: &QuerySpec) -> Result<(), TranslationError> {
        if let Some(field) = spec.grouping.field_name() {
            if !self.schema_fields.iter().any(|f| f == field) {
                return Err(TranslationError::UnknownField(field.to_string()));
            }
        }
        for filter in &spec.filters {
            if !self.schema_fields.iter().any(|f| *f == filter.field) {
                return Err(TranslationError::UnknownField(filter.field.clone()));
            }
        }
        Ok(())
    }
}

/// First plausible 4-digit year token, if any.
fn extract_year(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() == 4 && t.bytes().all(|b| b.is_ascii_digit()))
        .find(|t| {
            let year: u32 = t.parse().unwrap_or(0);
            (1900..=2099).contains(&year)
        })
        .map(|t| t.to_string())
}

fn longest_location(text: &str, names: &[String]) -> Option<String> {
    names
        .iter()
        .find(|name| contains_phrase(text, name))
        .cloned()
}

fn extract_chart_hint(text: &str) -> ChartHint {
    if contains_phrase(text, "pie") {
        ChartHint::Pie
    } else if contains_phrase(text, "line") || contains_phrase(text, "trend") {
        ChartHint::Line
    } else if contains_phrase(text, "horizontal bar") || contains_phrase(text, "horizontal") {
        ChartHint::HorizontalBar
    } else if contains_phrase(text, "bar") {
        ChartHint::Bar
    } else {
        ChartHint::Auto
    }
}
