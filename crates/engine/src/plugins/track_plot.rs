//! Line charts for tracked numeric series
//!
//! After finalization this plugin renders every tracked series that holds
//! numbers into an SVG line chart next to the tracked figures. Series
//! without numeric entries, such as tracked figure files, are skipped.

use std::fs;

use serde_json::Value;

use crate::artifact::numeric_samples;
use crate::error::{Error, Result};
use crate::experiment::Run;
use crate::hooks::{Flow, HookName, HookRegistry, RegisterMode};
use crate::plugin::Plugin;

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 360.0;
const MARGIN: f64 = 42.0;

/// Renders tracked numeric series as SVG line charts at finalization.
pub struct TrackPlotPlugin;

impl Plugin for TrackPlotPlugin {
    fn name(&self) -> &'static str {
        "track_plot"
    }

    fn register(&self, hooks: &mut HookRegistry) -> Result<()> {
        hooks.register(
            HookName::AfterExperimentFinalize,
            0,
            RegisterMode::Append,
            |event| {
                if let Some(run) = event.run_mut() {
                    render_tracked(run)?;
                }
                Ok(Flow::Continue(None))
            },
        );
        Ok(())
    }
}

fn render_tracked(run: &mut Run) -> Result<()> {
    let Some(archive) = run.archive().cloned() else {
        return Ok(());
    };

    let keys: Vec<String> = run.tracked().to_vec();
    for key in keys {
        let samples = match run.get_opt(&key) {
            Some(Value::Array(items)) => numeric_samples(items),
            _ => continue,
        };
        if samples.is_empty() {
            continue;
        }

        let chart = svg_line_chart(&key, &samples);
        let file_name = format!("{}_plot.svg", key.replace('/', "_"));
        let path = archive.track_dir().join(&file_name);
        fs::write(&path, chart).map_err(|source| Error::FileWrite {
            path: path.clone(),
            source,
        })?;
        let last = samples.last().copied().unwrap_or_default();
        run.log(&format!(
            "rendered series '{key}' into {file_name} ({} values, last {last})",
            samples.len()
        ))?;
    }
    Ok(())
}

/// Render samples as a minimal self-contained SVG line chart.
#[allow(clippy::cast_precision_loss)]
fn svg_line_chart(title: &str, samples: &[f64]) -> String {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &sample in samples {
        min = min.min(sample);
        max = max.max(sample);
    }
    // A flat series still needs a visible vertical range.
    if (max - min).abs() < f64::EPSILON {
        min -= 0.5;
        max += 0.5;
    }

    let span_x = WIDTH - 2.0 * MARGIN;
    let span_y = HEIGHT - 2.0 * MARGIN;
    let last = samples.len().saturating_sub(1).max(1) as f64;

    let mut points = String::new();
    let mut first_point = (MARGIN, HEIGHT - MARGIN);
    for (index, &sample) in samples.iter().enumerate() {
        let x = MARGIN + index as f64 / last * span_x;
        let y = HEIGHT - MARGIN - (sample - min) / (max - min) * span_y;
        if index == 0 {
            first_point = (x, y);
        }
        if !points.is_empty() {
            points.push(' ');
        }
        points.push_str(&format!("{x:.1},{y:.1}"));
    }
    let marker = if samples.len() == 1 {
        let (x, y) = first_point;
        format!("\n  <circle cx=\"{x:.1}\" cy=\"{y:.1}\" r=\"3\" fill=\"#2563eb\"/>")
    } else {
        String::new()
    };

    let title = escape_text(title);
    let center = WIDTH / 2.0;
    let top = MARGIN;
    let bottom = HEIGHT - MARGIN;
    let right = WIDTH - MARGIN;
    let label_x = MARGIN - 6.0;
    let top_label = MARGIN + 4.0;
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {WIDTH} {HEIGHT}">
  <rect width="{WIDTH}" height="{HEIGHT}" fill="white"/>
  <text x="{center}" y="24" text-anchor="middle" font-family="monospace" font-size="14">{title}</text>
  <line x1="{MARGIN}" y1="{top}" x2="{MARGIN}" y2="{bottom}" stroke="#94a3b8"/>
  <line x1="{MARGIN}" y1="{bottom}" x2="{right}" y2="{bottom}" stroke="#94a3b8"/>
  <text x="{label_x}" y="{bottom}" text-anchor="end" font-family="monospace" font-size="11">{min:.3}</text>
  <text x="{label_x}" y="{top_label}" text-anchor="end" font-family="monospace" font-size="11">{max:.3}</text>
  <polyline fill="none" stroke="#2563eb" stroke-width="1.5" points="{points}"/>{marker}
</svg>
"##
    )
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
