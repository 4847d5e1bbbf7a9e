// src/analysis.rs

use crate::config::JobDescriptor;
use crate::error::Result;
use crate::metrics::MetricsTable;
use crate::plot;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const TIME_SERIES_CHART_FILE: &str = "vqa_plot.png";
pub const HISTOGRAM_CHART_FILE: &str = "vqa_hist.png";
pub const SUMMARY_FILE: &str = "vqa_summary.json";

/// Statistics of one metric column.
///
/// Identical frames score `+inf`; those are counted in `infinite_frames` and left
/// out of `min`, `mean` and `std`. All three are `None` when no score is finite.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricSummary {
    pub name: String,
    pub min: Option<f64>,
    pub mean: Option<f64>,
    /// Population standard deviation.
    pub std: Option<f64>,
    pub infinite_frames: usize,
}

impl MetricSummary {
    pub fn from_scores(name: &str, scores: &[f64]) -> Self {
        let finite: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
        let infinite_frames = scores.len() - finite.len();
        if finite.is_empty() {
            return MetricSummary { name: name.to_string(), min: None, mean: None, std: None, infinite_frames };
        }

        let count = finite.len() as f64;
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let mean = finite.iter().sum::<f64>() / count;
        let variance = finite.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count;
        MetricSummary {
            name: name.to_string(),
            min: Some(min),
            mean: Some(mean),
            std: Some(variance.sqrt()),
            infinite_frames,
        }
    }
}

fn stat(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub reference: String,
    pub distorted: String,
    pub frames: usize,
    pub metrics: Vec<MetricSummary>,
}

/// Sorted table plus per-metric statistics, in column order.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub table: MetricsTable,
    pub summaries: Vec<MetricSummary>,
}

/// Loads and sorts the metrics table, then computes per-metric statistics.
pub fn analyze_table(table_path: &Path) -> Result<Analysis> {
    let mut table = MetricsTable::load(table_path)?;
    table.sort_by_frame();

    let summaries: Vec<MetricSummary> = table
        .metrics
        .iter()
        .enumerate()
        .map(|(i, name)| MetricSummary::from_scores(name, &table.column(i)))
        .collect();

    for s in &summaries {
        info!("{}: min {}, mean {}, std {}", s.name, stat(s.min), stat(s.mean), stat(s.std));
        if s.infinite_frames > 0 {
            info!("{}: {} frame(s) scored inf and are left out of the statistics", s.name, s.infinite_frames);
        }
    }
    Ok(Analysis { table, summaries })
}

/// Full analyzer step: statistics, summary file and (optionally) both charts in `work_dir`.
pub fn analyze_metrics(
    table_path: &Path,
    work_dir: &Path,
    job: &JobDescriptor,
    render_charts: bool,
) -> Result<Analysis> {
    let analysis = analyze_table(table_path)?;

    let job_summary = JobSummary {
        reference: job.reference.to_string_lossy().to_string(),
        distorted: job.distorted.to_string_lossy().to_string(),
        frames: analysis.table.rows.len(),
        metrics: analysis.summaries.clone(),
    };
    let summary_path = work_dir.join(SUMMARY_FILE);
    fs::write(&summary_path, serde_json::to_string_pretty(&job_summary)?)?;
    info!("Saved summary: {}", summary_path.display());

    if render_charts {
        let time_series_path = work_dir.join(TIME_SERIES_CHART_FILE);
        let histogram_path = work_dir.join(HISTOGRAM_CHART_FILE);
        plot::time_series_chart(&analysis.table, &analysis.summaries, &time_series_path)?;
        plot::histogram_chart(&analysis.table, &analysis.summaries, &histogram_path)?;
    } else {
        info!("Chart rendering disabled");
    }
    Ok(analysis)
}
