//! SVG rendering of the Kudos chart.
//!
//! The balance and its moving average share the left axis; the difference
//! series share a secondary right axis.

use super::stats::KudosSeries;
use crate::config::ReportConfig;
use std::fmt::Write;

const WIDTH: f64 = 1000.0;
const HEIGHT: f64 = WIDTH * 9.0 / 16.0;
const MARGIN_LEFT: f64 = 90.0;
const MARGIN_RIGHT: f64 = 90.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 60.0;
const TICKS: usize = 5;

/// Linear mapping from a value range onto a pixel range.
#[derive(Debug, Clone, Copy)]
struct Axis {
    min: f64,
    max: f64,
    from_px: f64,
    to_px: f64,
}

impl Axis {
    /// Fits the axis to `values`, widening a degenerate range.
    fn fit<I>(values: I, from_px: f64, to_px: f64) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let (mut min, mut max) = values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        if !min.is_finite() {
            min = 0.0;
            max = 1.0;
        } else if (max - min).abs() < f64::EPSILON {
            let pad = (min.abs() * 0.01).max(1.0);
            min -= pad;
            max += pad;
        }
        Self {
            min,
            max,
            from_px,
            to_px,
        }
    }

    fn map(&self, value: f64) -> f64 {
        self.from_px + (value - self.min) / (self.max - self.min) * (self.to_px - self.from_px)
    }

    #[allow(clippy::cast_precision_loss)]
    fn ticks(&self) -> impl Iterator<Item = f64> + '_ {
        (0..=TICKS).map(move |i| self.min + (self.max - self.min) * i as f64 / TICKS as f64)
    }
}

fn format_tick(value: f64) -> String {
    if value.abs() >= 100.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

/// One plotted line.
struct Line<'a> {
    label: &'a str,
    color: &'a str,
    dashed: bool,
    points: Vec<Option<(f64, f64)>>,
}

/// Appends a polyline per unbroken run of defined points.
fn draw_line(svg: &mut String, line: &Line<'_>, x: &Axis, y: &Axis) {
    let dash = if line.dashed {
        r#" stroke-dasharray="6 4""#
    } else {
        ""
    };
    let mut run: Vec<String> = Vec::new();
    let flush = |run: &mut Vec<String>, svg: &mut String| {
        if !run.is_empty() {
            let _ = writeln!(
                svg,
                r#"<polyline fill="none" stroke="{}" stroke-width="1.5"{dash} points="{}"/>"#,
                line.color,
                run.join(" ")
            );
            run.clear();
        }
    };

    for point in &line.points {
        match point {
            Some((px, py)) => run.push(format!("{:.1},{:.1}", x.map(*px), y.map(*py))),
            None => flush(&mut run, svg),
        }
    }
    flush(&mut run, svg);
}

/// Renders the chart for `series` as a standalone SVG document.
#[must_use]
pub fn render_svg(series: &KudosSeries, config: &ReportConfig) -> String {
    let plot_left = MARGIN_LEFT;
    let plot_right = WIDTH - MARGIN_RIGHT;
    let plot_top = MARGIN_TOP;
    let plot_bottom = HEIGHT - MARGIN_BOTTOM;

    let mut left_lines = vec![Line {
        label: "Kudos",
        color: "#1f3fbf",
        dashed: false,
        points: series
            .elapsed_secs
            .iter()
            .zip(&series.kudos)
            .map(|(t, k)| Some((*t, *k)))
            .collect(),
    }];
    if config.show_ma {
        left_lines.push(Line {
            label: "Kudos (Moving Average)",
            color: "#d62728",
            dashed: false,
            points: series
                .elapsed_secs
                .iter()
                .zip(&series.moving_average)
                .map(|(t, m)| Some((*t, *m)))
                .collect(),
        });
    }

    let mut right_lines = Vec::new();
    if config.show_d1 {
        right_lines.push(Line {
            label: "Kudos 1st difference",
            color: "#2ca02c",
            dashed: true,
            points: series
                .elapsed_secs
                .iter()
                .zip(&series.first_difference)
                .map(|(t, d)| d.map(|d| (*t, d)))
                .collect(),
        });
    }
    if config.show_mad1 {
        right_lines.push(Line {
            label: "Kudos 1st difference (M.A.)",
            color: "#c9a800",
            dashed: true,
            points: series
                .elapsed_secs
                .iter()
                .zip(&series.difference_average)
                .map(|(t, d)| d.map(|d| (*t, d)))
                .collect(),
        });
    }

    let x = Axis::fit(series.elapsed_secs.iter().copied(), plot_left, plot_right);
    let y_left = Axis::fit(
        left_lines
            .iter()
            .flat_map(|l| l.points.iter().flatten().map(|(_, v)| *v)),
        plot_bottom,
        plot_top,
    );
    let y_right = Axis::fit(
        right_lines
            .iter()
            .flat_map(|l| l.points.iter().flatten().map(|(_, v)| *v)),
        plot_bottom,
        plot_top,
    );

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif" font-size="12">"#
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = writeln!(
        svg,
        r#"<text x="{:.1}" y="28" text-anchor="middle" font-size="16">Kudos plot</text>"#,
        WIDTH / 2.0
    );

    // Grid and tick labels.
    for (tick_x, tick_y) in x.ticks().zip(y_left.ticks()) {
        let px = x.map(tick_x);
        let py = y_left.map(tick_y);
        let _ = writeln!(
            svg,
            r##"<line x1="{px:.1}" y1="{plot_top}" x2="{px:.1}" y2="{plot_bottom}" stroke="#dddddd"/>"##
        );
        let _ = writeln!(
            svg,
            r##"<line x1="{plot_left}" y1="{py:.1}" x2="{plot_right}" y2="{py:.1}" stroke="#dddddd"/>"##
        );
        let _ = writeln!(
            svg,
            r#"<text x="{px:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
            plot_bottom + 18.0,
            format_tick(tick_x)
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{py:.1}" text-anchor="end" dominant-baseline="middle">{}</text>"#,
            plot_left - 6.0,
            format_tick(tick_y)
        );
    }
    if !right_lines.is_empty() {
        for tick in y_right.ticks() {
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" dominant-baseline="middle">{}</text>"#,
                plot_right + 6.0,
                y_right.map(tick),
                format_tick(tick)
            );
        }
    }

    // Frame and axis titles.
    let _ = writeln!(
        svg,
        r#"<rect x="{plot_left}" y="{plot_top}" width="{:.1}" height="{:.1}" fill="none" stroke="black"/>"#,
        plot_right - plot_left,
        plot_bottom - plot_top
    );
    let _ = writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">Time (seconds since first reading)</text>"#,
        (plot_left + plot_right) / 2.0,
        HEIGHT - 16.0
    );
    let mid_y = (plot_top + plot_bottom) / 2.0;
    let _ = writeln!(
        svg,
        r#"<text x="20" y="{mid_y:.1}" text-anchor="middle" transform="rotate(-90 20 {mid_y:.1})">Kudos</text>"#
    );
    if !right_lines.is_empty() {
        let right_x = WIDTH - 16.0;
        let _ = writeln!(
            svg,
            r#"<text x="{right_x:.1}" y="{mid_y:.1}" text-anchor="middle" transform="rotate(90 {right_x:.1} {mid_y:.1})">&#916;Kudos/&#916;Time</text>"#
        );
    }

    for line in &left_lines {
        draw_line(&mut svg, line, &x, &y_left);
    }
    for line in &right_lines {
        draw_line(&mut svg, line, &x, &y_right);
    }

    // Legend.
    for (i, line) in left_lines.iter().chain(&right_lines).enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let ly = plot_top + 16.0 + 18.0 * i as f64;
        let dash = if line.dashed {
            r#" stroke-dasharray="6 4""#
        } else {
            ""
        };
        let _ = writeln!(
            svg,
            r#"<line x1="{:.1}" y1="{ly:.1}" x2="{:.1}" y2="{ly:.1}" stroke="{}" stroke-width="2"{dash}/>"#,
            plot_left + 10.0,
            plot_left + 40.0,
            line.color
        );
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{ly:.1}" dominant-baseline="middle">{}</text>"#,
            plot_left + 46.0,
            line.label
        );
    }

    svg.push_str("</svg>\n");
    svg
}
