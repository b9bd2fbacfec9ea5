//! Chart rendering for analytics results.
//!
//! Chart-type selection is a pure function of the query spec and the row
//! count, evaluated in a fixed order, so the same result set always gets
//! the same chart. Rendering produces a self-contained SVG document; the
//! pipeline base64-encodes it into a data URI for the reply envelope.

mod svg;

use std::fmt;

use thiserror::Error;

use crate::nlu::translator::{ChartHint, Grouping, Metric, QuerySpec};
use crate::upstream::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    HorizontalBar,
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartKind::Bar => write!(f, "bar"),
            ChartKind::Line => write!(f, "line"),
            ChartKind::Pie => write!(f, "pie"),
            ChartKind::HorizontalBar => write!(f, "horizontal-bar"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VizError {
    /// Zero rows — the caller must answer with text, not a blank image.
    #[error("no rows to render")]
    EmptyResult,
    #[error("render failed: {0}")]
    Render(String),
}

/// Pick the chart type. Policy, in order: explicit user hint; time-axis
/// grouping gets a line; small result sets get bars; share-of-whole
/// metrics get a pie; everything else gets horizontal bars for label
/// legibility.
pub fn select_chart(spec: &QuerySpec, row_count: usize) -> ChartKind {
    match spec.chart_hint {
        ChartHint::Bar => return ChartKind::Bar,
        ChartHint::Line => return ChartKind::Line,
        ChartHint::Pie => return ChartKind::Pie,
        ChartHint::HorizontalBar => return ChartKind::HorizontalBar,
        ChartHint::Auto => {}
    }
    if spec.grouping.is_time() {
        ChartKind::Line
    } else if row_count <= 8 {
        ChartKind::Bar
    } else if is_share_of_whole(spec) {
        ChartKind::Pie
    } else {
        ChartKind::HorizontalBar
    }
}

/// Counts split across a categorical dimension read as parts of a whole.
fn is_share_of_whole(spec: &QuerySpec) -> bool {
    spec.metric == Metric::Count && spec.grouping != Grouping::None
}

/// Title shown above the chart, e.g. "Estimated cost by sanction year".
pub fn chart_title(spec: &QuerySpec) -> String {
    match spec.grouping {
        Grouping::None => spec.metric.title().to_string(),
        grouping => format!("{} by {}", spec.metric.title(), grouping.title()),
    }
}

/// Render `rows` according to the selection policy. Returns SVG bytes.
pub fn render(spec: &QuerySpec, rows: &[Row]) -> Result<Vec<u8>, VizError> {
    if rows.is_empty() {
        return Err(VizError::EmptyResult);
    }
    if rows.iter().any(|r| !r.value.is_finite()) {
        return Err(VizError::Render("non-finite value in result rows".into()));
    }

    let kind = select_chart(spec, rows.len());
    let title = chart_title(spec);

    let document = match kind {
        ChartKind::Bar => svg::bar(&title, rows),
        ChartKind::Line => svg::line(&title, rows),
        ChartKind::Pie => svg::pie(&title, rows)?,
        ChartKind::HorizontalBar => svg::horizontal_bar(&title, rows),
    };

    Ok(document.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlu::translator::{ChartHint, Grouping, Metric, QuerySpec};

    fn spec(metric: Metric, grouping: Grouping, hint: ChartHint) -> QuerySpec {
        QuerySpec { metric, grouping, filters: Vec::new(), chart_hint: hint }
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row { label: format!("r{i}"), value: (i + 1) as f64 })
            .collect()
    }

    #[test]
    fn explicit_hint_wins_over_policy() {
        let s = spec(Metric::Cost, Grouping::Year, ChartHint::Pie);
        assert_eq!(select_chart(&s, 3), ChartKind::Pie);
    }

    #[test]
    fn time_grouping_selects_line() {
        let s = spec(Metric::Cost, Grouping::Year, ChartHint::Auto);
        assert_eq!(select_chart(&s, 20), ChartKind::Line);
    }

    #[test]
    fn small_result_selects_bar() {
        let s = spec(Metric::Cost, Grouping::State, ChartHint::Auto);
        assert_eq!(select_chart(&s, 8), ChartKind::Bar);
    }

    #[test]
    fn large_share_of_whole_selects_pie() {
        let s = spec(Metric::Count, Grouping::SchemeType, ChartHint::Auto);
        assert_eq!(select_chart(&s, 9), ChartKind::Pie);
    }

    #[test]
    fn large_plain_metric_selects_horizontal_bar() {
        let s = spec(Metric::Cost, Grouping::Division, ChartHint::Auto);
        assert_eq!(select_chart(&s, 9), ChartKind::HorizontalBar);
    }

    #[test]
    fn selection_is_pure() {
        let s = spec(Metric::Count, Grouping::SchemeType, ChartHint::Auto);
        assert_eq!(select_chart(&s, 12), select_chart(&s, 12));
    }

    #[test]
    fn empty_rows_are_an_error_not_a_blank_image() {
        let s = spec(Metric::Cost, Grouping::Year, ChartHint::Auto);
        assert_eq!(render(&s, &[]), Err(VizError::EmptyResult));
    }

    #[test]
    fn render_produces_svg_with_title() {
        let s = spec(Metric::Cost, Grouping::Year, ChartHint::Auto);
        let bytes = render(&s, &rows(4)).unwrap();
        let doc = String::from_utf8(bytes).unwrap();
        assert!(doc.starts_with("<svg"));
        assert!(doc.contains("Estimated cost by sanction year"));
        assert!(doc.ends_with("</svg>"));
    }

    #[test]
    fn render_is_deterministic() {
        let s = spec(Metric::Count, Grouping::SchemeType, ChartHint::Auto);
        let data = rows(5);
        assert_eq!(render(&s, &data).unwrap(), render(&s, &data).unwrap());
    }

    #[test]
    fn pie_with_zero_total_fails_cleanly() {
        let s = spec(Metric::Count, Grouping::SchemeType, ChartHint::Pie);
        let data = vec![
            Row { label: "a".into(), value: 0.0 },
            Row { label: "b".into(), value: 0.0 },
        ];
        assert!(matches!(render(&s, &data), Err(VizError::Render(_))));
    }

    #[test]
    fn non_finite_values_fail_cleanly() {
        let s = spec(Metric::Cost, Grouping::Year, ChartHint::Auto);
        let data = vec![Row { label: "2023".into(), value: f64::NAN }];
        assert!(matches!(render(&s, &data), Err(VizError::Render(_))));
    }

    #[test]
    fn labels_are_escaped() {
        let s = spec(Metric::Cost, Grouping::State, ChartHint::Bar);
        let data = vec![Row { label: "a&b <c>".into(), value: 1.0 }];
        let doc = String::from_utf8(render(&s, &data).unwrap()).unwrap();
        assert!(doc.contains("a&amp;b &lt;c&gt;"));
        assert!(!doc.contains("a&b <c>"));
    }
}
