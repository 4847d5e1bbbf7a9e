// src/plot.rs

use crate::analysis::MetricSummary;
use crate::error::{Result, VqaError};
use crate::metrics::MetricsTable;
use log::info;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::path::Path;

const PLOT_CAP_VALUE: f64 = 100.0; // Value to cap infinite scores at (identical frames give inf PSNR)
const HISTOGRAM_BINS: usize = 20;
const CHART_WIDTH: u32 = 1000;
const SUBPLOT_HEIGHT: u32 = 500;

/// Decimal places for a metric: dB-scale metrics get 2, unit-range metrics 4.
pub fn precision(scores: &[f64]) -> usize {
    let magnitude = scores
        .iter()
        .filter(|s| s.is_finite())
        .fold(0.0_f64, |acc, s| acc.max(s.abs()));
    if magnitude >= 10.0 { 2 } else { 4 }
}

pub fn unit(metric: &str) -> &'static str {
    if metric.to_ascii_lowercase().contains("psnr") { "dB" } else { "" }
}

/// `None` means no finite score contributed to the statistic.
fn format_score(value: Option<f64>, precision: usize, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.*}{}", precision, v, unit),
        None => "n/a".to_string(),
    }
}

/// Legend text for the minimum reference line.
pub fn min_label(summary: &MetricSummary, precision: usize) -> String {
    match summary.min {
        Some(_) => format!("min: {}", format_score(summary.min, precision, unit(&summary.name))),
        None => "min: inf".to_string(), // Every frame identical
    }
}

fn axis_label(metric: &str) -> String {
    match unit(metric) {
        "" => metric.to_uppercase(),
        u => format!("{} ({})", metric.to_uppercase(), u),
    }
}

/// Scores as drawn: +inf capped, other non-finite values dropped.
fn plot_points(frames: &[u64], scores: &[f64]) -> Vec<(u64, f64)> {
    frames
        .iter()
        .zip(scores)
        .filter_map(|(&frame, &score)| {
            if score == f64::INFINITY {
                Some((frame, PLOT_CAP_VALUE))
            } else if score.is_finite() {
                Some((frame, score))
            } else {
                None
            }
        })
        .collect()
}

/// Equal-width bins over [min, max]; returns (lower bound, bin width, counts).
pub fn histogram(values: &[f64], bins: usize) -> (f64, f64, Vec<u32>) {
    let mut lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if hi - lo <= 0.0 {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0u32; bins];
    for v in values {
        let index = (((v - lo) / width) as usize).min(bins - 1);
        counts[index] += 1;
    }
    (lo, width, counts)
}

fn value_range(values: &[f64]) -> (f64, f64) {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
    (lo - pad, hi + pad)
}

fn plot_error(what: &str, e: impl std::fmt::Debug) -> VqaError {
    VqaError::Plot(format!("Failed to {}: {:?}", what, e))
}

/// One subplot per metric: score over frame index with a line at the minimum.
pub fn time_series_chart(table: &MetricsTable, summaries: &[MetricSummary], output_path: &Path) -> Result<()> {
    info!("Generating time-series chart: {}", output_path.display());
    // --- 1. Shared X Axis ---
    let frames: Vec<u64> = table.frames().collect(); // Already sorted by the analyzer
    let x_min = frames.first().copied().unwrap_or(0);
    let x_max = frames.last().copied().unwrap_or(0).max(x_min + 1); // Single-frame tables still get a range

    // --- 2. Setup Canvas ---
    let height = SUBPLOT_HEIGHT * summaries.len() as u32;
    let root = BitMapBackend::new(output_path, (CHART_WIDTH, height)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error("fill plot background", e))?;
    let areas = root.split_evenly((summaries.len(), 1));

    for (i, (area, summary)) in areas.iter().zip(summaries).enumerate() {
        // --- 3. Prepare Data ---
        let scores = table.column(i);
        let points = plot_points(&frames, &scores);
        if points.is_empty() {
            return Err(VqaError::Plot(format!("No finite {} scores to plot", summary.name)));
        }
        let capped = points.len() - scores.iter().filter(|s| s.is_finite()).count();
        if capped > 0 {
            info!("Note: Capped {} infinite {} values to {} for plotting.", capped, summary.name, PLOT_CAP_VALUE);
        }

        let values: Vec<f64> = points.iter().map(|(_, s)| *s).collect();
        let (y_min, y_max) = value_range(&values);
        let digits = precision(&scores);
        // All-inf columns draw the line at the cap, where every point sits
        let min_line = summary.min.unwrap_or(PLOT_CAP_VALUE);

        // --- 4. Configure Mesh ---
        let mut chart = ChartBuilder::on(area)
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(70)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)
            .map_err(|e| plot_error("build chart", e))?;

        let y_label_format = |y: &f64| format!("{:.*}", digits, y);
        let mut mesh = chart.configure_mesh();
        mesh.y_desc(axis_label(&summary.name))
            .y_label_formatter(&y_label_format)
            .axis_desc_style(("sans-serif", 16))
            .label_style(("sans-serif", 14));
        if i + 1 == summaries.len() {
            mesh.x_desc("Frame number"); // Only the bottom subplot is labelled
        }
        mesh.draw().map_err(|e| plot_error("draw mesh", e))?;

        // --- 5. Draw Scores and Minimum Line ---
        chart
            .draw_series(LineSeries::new(points, BLUE.mix(0.8).stroke_width(1)))
            .map_err(|e| plot_error("draw score series", e))?;

        chart
            .draw_series(LineSeries::new(vec![(x_min, min_line), (x_max, min_line)], RED.stroke_width(1)))
            .map_err(|e| plot_error("draw minimum line", e))?
            .label(min_label(summary, digits))
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED.stroke_width(1)));

        // --- 6. Draw Legend ---
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .margin(10)
            .label_font(("sans-serif", 14))
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(|e| plot_error("draw legend", e))?;
    }

    // --- 7. Save Plot ---
    root.present().map_err(|e| plot_error("save plot", e))?;
    info!("Saved time-series chart: {}", output_path.display());
    Ok(())
}

/// One histogram subplot per metric, annotated with mean and std.
pub fn histogram_chart(table: &MetricsTable, summaries: &[MetricSummary], output_path: &Path) -> Result<()> {
    info!("Generating histogram chart: {}", output_path.display());
    let frames: Vec<u64> = table.frames().collect();

    let height = SUBPLOT_HEIGHT * summaries.len() as u32;
    let root = BitMapBackend::new(output_path, (CHART_WIDTH, height)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error("fill plot background", e))?;
    let areas = root.split_evenly((summaries.len(), 1));

    for (i, (area, summary)) in areas.iter().zip(summaries).enumerate() {
        // --- 1. Bin Scores ---
        let scores = table.column(i);
        let values: Vec<f64> = plot_points(&frames, &scores).into_iter().map(|(_, s)| s).collect();
        if values.is_empty() {
            return Err(VqaError::Plot(format!("No finite {} scores to plot", summary.name)));
        }
        let (lo, width, counts) = histogram(&values, HISTOGRAM_BINS);
        let hi = lo + width * HISTOGRAM_BINS as f64;
        let peak = counts.iter().copied().max().unwrap_or(0);
        let y_top = peak + peak / 4 + 1; // Headroom for the annotation
        let digits = precision(&scores);
        let suffix = unit(&summary.name);

        // --- 2. Configure Mesh ---
        let mut chart = ChartBuilder::on(area)
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(lo..hi, 0u32..y_top)
            .map_err(|e| plot_error("build chart", e))?;

        let x_label_format = |x: &f64| format!("{:.*}", digits, x);
        chart
            .configure_mesh()
            .x_desc(axis_label(&summary.name))
            .y_desc("Count")
            .x_label_formatter(&x_label_format)
            .axis_desc_style(("sans-serif", 16))
            .label_style(("sans-serif", 14))
            .draw()
            .map_err(|e| plot_error("draw mesh", e))?;

        // --- 3. Draw Bars ---
        chart
            .draw_series(counts.iter().enumerate().map(|(bin, &count)| {
                let x0 = lo + width * bin as f64;
                Rectangle::new([(x0, 0), (x0 + width, count)], BLUE.mix(0.6).filled())
            }))
            .map_err(|e| plot_error("draw histogram bars", e))?;

        // --- 4. Annotate Mean and Std ---
        // Stats cover finite scores only; capped inf values still appear as bars
        let lines = [
            format!("mean: {}", format_score(summary.mean, digits, suffix)),
            format!("std: {}", format_score(summary.std, digits, suffix)),
        ];
        let style = TextStyle::from(("sans-serif", 16).into_font()).pos(Pos::new(HPos::Right, VPos::Top));
        chart
            .draw_series(lines.iter().enumerate().map(|(row, text)| {
                EmptyElement::at((hi, y_top)) + Text::new(text.clone(), (-10, 10 + 22 * row as i32), style.clone())
            }))
            .map_err(|e| plot_error("draw annotation", e))?;
    }

    // --- 5. Save Plot ---
    root.present().map_err(|e| plot_error("save plot", e))?;
    info!("Saved histogram chart: {}", output_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_label_reports_column_minimum() {
        let summary = MetricSummary::from_scores("psnr", &[40.1, 35.2, 38.0]);
        assert_eq!(min_label(&summary, precision(&[40.1, 35.2, 38.0])), "min: 35.20dB");

        let ssim = [0.97312, 0.90126, 0.95];
        let summary = MetricSummary::from_scores("ssim", &ssim);
        assert_eq!(min_label(&summary, precision(&ssim)), "min: 0.9013");
    }

    #[test]
    fn min_label_skips_infinite_scores() {
        let scores = [f64::INFINITY, 41.5, 44.0];
        let summary = MetricSummary::from_scores("psnr", &scores);
        assert_eq!(min_label(&summary, precision(&scores)), "min: 41.50dB");

        let identical = MetricSummary::from_scores("psnr", &[f64::INFINITY]);
        assert_eq!(min_label(&identical, 2), "min: inf");
        assert_eq!(format_score(identical.mean, 2, "dB"), "n/a");
    }

    #[test]
    fn renders_one_subplot_per_metric() {
        let dir = tempfile::tempdir().unwrap();
        let mut table =
            MetricsTable::from_reader("frame,psnr,ssim\n1,inf,0.99\n0,36.0,0.93\n2,33.5,0.88\n".as_bytes()).unwrap();
        table.sort_by_frame();
        let summaries: Vec<MetricSummary> = table
            .metrics
            .iter()
            .enumerate()
            .map(|(i, name)| MetricSummary::from_scores(name, &table.column(i)))
            .collect();

        let series = dir.path().join("series.png");
        let hist = dir.path().join("hist.png");
        time_series_chart(&table, &summaries, &series).unwrap();
        histogram_chart(&table, &summaries, &hist).unwrap();
        assert!(std::fs::metadata(&series).unwrap().len() > 0);
        assert!(std::fs::metadata(&hist).unwrap().len() > 0);
    }

    #[test]
    fn all_infinite_column_still_renders() {
        let dir = tempfile::tempdir().unwrap();
        let table = MetricsTable::from_reader("frame,psnr\n0,inf\n1,inf\n".as_bytes()).unwrap();
        let summaries = vec![MetricSummary::from_scores("psnr", &table.column(0))];

        time_series_chart(&table, &summaries, &dir.path().join("series.png")).unwrap();
        histogram_chart(&table, &summaries, &dir.path().join("hist.png")).unwrap();
    }

    #[test]
    fn precision_ignores_infinite_scores() {
        assert_eq!(precision(&[0.5, f64::INFINITY]), 4);
        assert_eq!(precision(&[45.0, f64::INFINITY]), 2);
    }

    #[test]
    fn axis_labels_carry_units() {
        assert_eq!(axis_label("psnr"), "PSNR (dB)");
        assert_eq!(axis_label("ssim"), "SSIM");
    }

    #[test]
    fn histogram_uses_twenty_inclusive_bins() {
        let values: Vec<f64> = (0..=40).map(|v| v as f64 * 0.5).collect();
        let (lo, width, counts) = histogram(&values, HISTOGRAM_BINS);
        assert_eq!(lo, 0.0);
        assert_eq!(width, 1.0);
        assert_eq!(counts.len(), 20);
        assert_eq!(counts.iter().sum::<u32>(), 41);
        assert_eq!(counts[19], 3); // 19.0, 19.5 and the maximum 20.0
    }

    #[test]
    fn histogram_of_constant_values_is_centered() {
        let (lo, width, counts) = histogram(&[0.9, 0.9], HISTOGRAM_BINS);
        assert_eq!(lo, 0.4);
        assert!((width - 0.05).abs() < 1e-12);
        assert_eq!(counts.iter().sum::<u32>(), 2);
    }

    #[test]
    fn infinite_scores_are_capped_for_plotting() {
        let points = plot_points(&[0, 1, 2], &[f64::INFINITY, 42.0, f64::NEG_INFINITY]);
        assert_eq!(points, vec![(0, PLOT_CAP_VALUE), (1, 42.0)]);
    }
}
