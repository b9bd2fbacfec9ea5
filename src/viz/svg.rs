//! SVG document assembly for each chart kind.
//!
//! Fixed 640×400 canvas. All output is plain markup built from the rows —
//! no scripts, no external references — so the documents are safe to embed
//! as data URIs.

use std::fmt::Write as _;

use super::VizError;
use crate::upstream::Row;

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 400.0;
const MARGIN_TOP: f64 = 48.0;
const MARGIN_BOTTOM: f64 = 56.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 24.0;

const PALETTE: &[&str] = &[
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948",
    "#b07aa1", "#ff9da7", "#9c755f", "#bab0ac",
];

fn plot_width() -> f64 {
    WIDTH - MARGIN_LEFT - MARGIN_RIGHT
}

fn plot_height() -> f64 {
    HEIGHT - MARGIN_TOP - MARGIN_BOTTOM
}

fn open_document(title: &str) -> String {
    let mut doc = String::with_capacity(4096);
    let _ = write!(
        doc,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif">"#
    );
    let _ = write!(
        doc,
        r##"<rect width="{WIDTH}" height="{HEIGHT}" fill="#ffffff"/><text x="{x}" y="28" font-size="16" text-anchor="middle" fill="#333333">{title}</text>"##,
        x = WIDTH / 2.0,
        title = escape(title),
    );
    doc
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value:.2}")
    }
}

fn color(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

fn max_value(rows: &[Row]) -> f64 {
    let max = rows.iter().map(|r| r.value).fold(0.0, f64::max);
    if max > 0.0 { max } else { 1.0 }
}

/// Y axis with four gridlines and value labels.
fn value_axis(doc: &mut String, max: f64) {
    for step in 0..=4 {
        let fraction = f64::from(step) / 4.0;
        let y = MARGIN_TOP + plot_height() * (1.0 - fraction);
        let _ = write!(
            doc,
            r##"<line x1="{x1}" y1="{y:.1}" x2="{x2}" y2="{y:.1}" stroke="#dddddd"/><text x="{tx}" y="{ty:.1}" font-size="11" text-anchor="end" fill="#666666">{label}</text>"##,
            x1 = MARGIN_LEFT,
            x2 = WIDTH - MARGIN_RIGHT,
            tx = MARGIN_LEFT - 6.0,
            ty = y + 4.0,
            label = format_value(max * fraction),
        );
    }
}

pub fn bar(title: &str, rows: &[Row]) -> String {
    let mut doc = open_document(title);
    let max = max_value(rows);
    value_axis(&mut doc, max);

    let slot = plot_width() / rows.len() as f64;
    let bar_width = slot * 0.7;
    for (i, row) in rows.iter().enumerate() {
        let h = plot_height() * (row.value / max);
        let x = MARGIN_LEFT + slot * i as f64 + (slot - bar_width) / 2.0;
        let y = MARGIN_TOP + plot_height() - h;
        let _ = write!(
            doc,
            r##"<rect x="{x:.1}" y="{y:.1}" width="{bar_width:.1}" height="{h:.1}" fill="{fill}"/><text x="{lx:.1}" y="{ly:.1}" font-size="11" text-anchor="middle" fill="#333333">{label}</text>"##,
            fill = color(0),
            lx = x + bar_width / 2.0,
            ly = HEIGHT - MARGIN_BOTTOM + 16.0,
            label = escape(&truncate(&row.label, 12)),
        );
    }
    doc.push_str("</svg>");
    doc
}

pub fn line(title: &str, rows: &[Row]) -> String {
    let mut doc = open_document(title);
    let max = max_value(rows);
    value_axis(&mut doc, max);

    let step = if rows.len() > 1 {
        plot_width() / (rows.len() - 1) as f64
    } else {
        0.0
    };
    let point = |i: usize, value: f64| -> (f64, f64) {
        let x = if rows.len() > 1 {
            MARGIN_LEFT + step * i as f64
        } else {
            MARGIN_LEFT + plot_width() / 2.0
        };
        (x, MARGIN_TOP + plot_height() * (1.0 - value / max))
    };

    let mut points = String::new();
    for (i, row) in rows.iter().enumerate() {
        let (x, y) = point(i, row.value);
        let _ = write!(points, "{x:.1},{y:.1} ");
    }
    let _ = write!(
        doc,
        r#"<polyline points="{points}" fill="none" stroke="{stroke}" stroke-width="2"/>"#,
        points = points.trim_end(),
        stroke = color(0),
    );

    for (i, row) in rows.iter().enumerate() {
        let (x, y) = point(i, row.value);
        let _ = write!(
            doc,
            r##"<circle cx="{x:.1}" cy="{y:.1}" r="3" fill="{fill}"/><text x="{x:.1}" y="{ly:.1}" font-size="11" text-anchor="middle" fill="#333333">{label}</text>"##,
            fill = color(0),
            ly = HEIGHT - MARGIN_BOTTOM + 16.0,
            label = escape(&truncate(&row.label, 12)),
        );
    }
    doc.push_str("</svg>");
    doc
}

pub fn pie(title: &str, rows: &[Row]) -> Result<String, VizError> {
    let total: f64 = rows.iter().map(|r| r.value.max(0.0)).sum();
    if total <= 0.0 {
        return Err(VizError::Render("all values are zero".into()));
    }

    let mut doc = open_document(title);
    let cx = 220.0;
    let cy = MARGIN_TOP + plot_height() / 2.0;
    let radius = (plot_height() / 2.0) - 8.0;

    let mut angle = -std::f64::consts::FRAC_PI_2;
    for (i, row) in rows.iter().enumerate() {
        let fraction = row.value.max(0.0) / total;
        if fraction == 0.0 {
            continue;
        }
        if fraction >= 0.999 {
            let _ = write!(
                doc,
                r#"<circle cx="{cx}" cy="{cy:.1}" r="{radius:.1}" fill="{fill}"/>"#,
                fill = color(i),
            );
            break;
        }
        let sweep = fraction * std::f64::consts::TAU;
        let (x1, y1) = (cx + radius * angle.cos(), cy + radius * angle.sin());
        let end = angle + sweep;
        let (x2, y2) = (cx + radius * end.cos(), cy + radius * end.sin());
        let large_arc = i32::from(sweep > std::f64::consts::PI);
        let _ = write!(
            doc,
            r#"<path d="M {cx} {cy:.1} L {x1:.1} {y1:.1} A {radius:.1} {radius:.1} 0 {large_arc} 1 {x2:.1} {y2:.1} Z" fill="{fill}"/>"#,
            fill = color(i),
        );
        angle = end;
    }

    // Legend with percentages, matching the labels-on-slices style of the
    // equivalent pie in spreadsheets.
    let legend_x = 420.0;
    for (i, row) in rows.iter().enumerate() {
        let percent = 100.0 * row.value.max(0.0) / total;
        let y = MARGIN_TOP + 18.0 * i as f64 + 8.0;
        let _ = write!(
            doc,
            r##"<rect x="{legend_x}" y="{ry:.1}" width="12" height="12" fill="{fill}"/><text x="{tx}" y="{ty:.1}" font-size="11" fill="#333333">{label} ({percent:.1}%)</text>"##,
            ry = y - 10.0,
            fill = color(i),
            tx = legend_x + 18.0,
            ty = y,
            label = escape(&truncate(&row.label, 20)),
        );
    }
    doc.push_str("</svg>");
    Ok(doc)
}

pub fn horizontal_bar(title: &str, rows: &[Row]) -> String {
    let mut doc = open_document(title);
    let max = max_value(rows);
    let label_width = 140.0;
    let track_width = WIDTH - label_width - MARGIN_RIGHT - 60.0;
    let slot = plot_height() / rows.len() as f64;
    let bar_height = (slot * 0.7).min(22.0);

    for (i, row) in rows.iter().enumerate() {
        let w = track_width * (row.value / max);
        let y = MARGIN_TOP + slot * i as f64 + (slot - bar_height) / 2.0;
        let _ = write!(
            doc,
            r##"<text x="{lx}" y="{ly:.1}" font-size="11" text-anchor="end" fill="#333333">{label}</text><rect x="{x}" y="{y:.1}" width="{w:.1}" height="{bar_height:.1}" fill="{fill}"/><text x="{vx:.1}" y="{ly:.1}" font-size="11" fill="#666666">{value}</text>"##,
            lx = label_width - 6.0,
            ly = y + bar_height / 2.0 + 4.0,
            x = label_width,
            fill = color(0),
            vx = label_width + w + 6.0,
            value = format_value(row.value),
            label = escape(&truncate(&row.label, 18)),
        );
    }
    doc.push_str("</svg>");
    doc
}

fn truncate(label: &str, max_chars: usize) -> String {
    if label.chars().count() <= max_chars {
        label.to_string()
    } else {
        let mut out: String = label.chars().take(max_chars.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<Row> {
        vec![
            Row { label: "2021".into(), value: 10.0 },
            Row { label: "2022".into(), value: 25.5 },
            Row { label: "2023".into(), value: 17.0 },
        ]
    }

    #[test]
    fn bar_contains_one_rect_per_row() {
        let doc = bar("t", &rows());
        // One background rect plus one per row.
        assert_eq!(doc.matches("<rect").count(), 1 + rows().len());
    }

    #[test]
    fn line_has_polyline_and_points() {
        let doc = line("t", &rows());
        assert!(doc.contains("<polyline"));
        assert_eq!(doc.matches("<circle").count(), rows().len());
    }

    #[test]
    fn single_point_line_renders() {
        let doc = line("t", &rows()[..1]);
        assert!(doc.contains("<polyline"));
    }

    #[test]
    fn pie_has_one_slice_per_nonzero_row() {
        let doc = pie("t", &rows()).unwrap();
        assert_eq!(doc.matches("<path").count(), rows().len());
        assert!(doc.contains("%"));
    }

    #[test]
    fn single_row_pie_draws_full_circle() {
        let doc = pie("t", &rows()[..1]).unwrap();
        assert!(doc.contains("<circle"));
        assert!(!doc.contains("<path"));
    }

    #[test]
    fn horizontal_bar_lists_values() {
        let doc = horizontal_bar("t", &rows());
        assert!(doc.contains(">25.50<"));
        assert!(doc.contains(">2021<"));
    }

    #[test]
    fn value_formatting() {
        assert_eq!(format_value(12.0), "12");
        assert_eq!(format_value(12.5), "12.50");
    }

    #[test]
    fn long_labels_are_truncated() {
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
        assert_eq!(truncate("abc", 5), "abc");
    }
}
