// src/metrics.rs

use crate::error::{Result, VqaError};
use crate::job::JobContext;
use crate::script::OutputStage;
use log::{debug, info};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// File name the metrics output stage writes into the job directory.
pub const METRICS_TABLE_FILE: &str = "vqa_metrics.csv";

// --- Data Structures ---

#[derive(Debug, Clone, PartialEq)]
pub struct FrameRow {
    pub frame: u64,
    /// One score per metric, in column order.
    pub scores: Vec<f64>,
}

/// Per-frame metrics: a frame index column followed by one column per metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsTable {
    pub frame_column: String,
    pub metrics: Vec<String>,
    pub rows: Vec<FrameRow>,
}

impl MetricsTable {
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading metrics table: {}", path.display());
        let file = File::open(path).map_err(|e| VqaError::from_read(path, e))?;
        Self::from_reader(file)
    }

    /// Parses CSV with a header row. Every cell must be numeric.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(false)
            .from_reader(reader);

        let headers = csv.headers().map_err(data_format)?.clone();
        if headers.len() < 2 {
            return Err(VqaError::DataFormat(format!(
                "expected a frame column and at least one metric column, got {} column(s)",
                headers.len()
            )));
        }
        let frame_column = headers[0].to_string();
        let metrics: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

        // Metric names key the worst-frame mapping, so they must be unique.
        let mut names = HashSet::new();
        if let Some(dup) = metrics.iter().find(|m| !names.insert(m.as_str())) {
            return Err(VqaError::DataFormat(format!("duplicate metric column '{}'", dup)));
        }

        let mut rows = Vec::new();
        let mut seen = HashSet::new();
        for (line, record) in csv.records().enumerate() {
            let record = record.map_err(data_format)?;
            let values = record
                .iter()
                .map(|cell| parse_score(cell, line))
                .collect::<Result<Vec<f64>>>()?;

            let frame = frame_index(values[0], line)?;
            if !seen.insert(frame) {
                return Err(VqaError::DataFormat(format!("duplicate frame index {}", frame)));
            }
            rows.push(FrameRow { frame, scores: values[1..].to_vec() });
        }

        if rows.is_empty() {
            return Err(VqaError::DataFormat("metrics table has no rows".to_string()));
        }
        debug!("Parsed {} rows with metrics {:?}", rows.len(), metrics);
        Ok(MetricsTable { frame_column, metrics, rows })
    }

    pub fn sort_by_frame(&mut self) {
        self.rows.sort_by_key(|row| row.frame);
    }

    pub fn frames(&self) -> impl Iterator<Item = u64> + '_ {
        self.rows.iter().map(|row| row.frame)
    }

    /// Scores of one metric, in row order.
    pub fn column(&self, metric: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row.scores[metric]).collect()
    }

    /// The `count` rows with the lowest score for `metric`, lowest first.
    ///
    /// The sort is stable: equal scores keep their current row order.
    pub fn worst_frames(&self, metric: usize, count: usize) -> Vec<&FrameRow> {
        let mut ranked: Vec<&FrameRow> = self.rows.iter().collect();
        ranked.sort_by(|a, b| a.scores[metric].total_cmp(&b.scores[metric]));
        ranked.truncate(count);
        ranked
    }

    /// Writes `rows` as CSV using this table's header.
    pub fn write_rows<'a>(&self, path: &Path, rows: impl IntoIterator<Item = &'a FrameRow>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec![self.frame_column.clone()];
        header.extend(self.metrics.iter().cloned());
        writer.write_record(&header)?;
        for row in rows {
            let mut record = vec![row.frame.to_string()];
            record.extend(row.scores.iter().map(f64::to_string));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn data_format(e: csv::Error) -> VqaError {
    VqaError::DataFormat(e.to_string())
}

fn parse_score(cell: &str, line: usize) -> Result<f64> {
    let value: f64 = cell
        .parse()
        .map_err(|_| VqaError::DataFormat(format!("non-numeric value '{}' in data row {}", cell, line + 1)))?;
    if value.is_nan() {
        return Err(VqaError::DataFormat(format!("NaN value in data row {}", line + 1)));
    }
    // +inf marks identical frames; nothing scores below negative infinity.
    if value == f64::NEG_INFINITY {
        return Err(VqaError::DataFormat(format!("negative infinite value in data row {}", line + 1)));
    }
    Ok(value)
}

fn frame_index(value: f64, line: usize) -> Result<u64> {
    if value < 0.0 || value.fract() != 0.0 || !value.is_finite() {
        return Err(VqaError::DataFormat(format!(
            "invalid frame index {} in data row {}",
            value,
            line + 1
        )));
    }
    Ok(value as u64)
}

// --- Extraction ---

/// Runs the metrics pass and returns the path of the table the engine wrote.
pub fn extract_metrics(ctx: &JobContext<'_>) -> Result<PathBuf> {
    info!("Computing metrics for {}", ctx.job.distorted.display());
    ctx.run_stage(&OutputStage::Metrics)?;

    let table_path = ctx.metrics_table_path();
    if !table_path.exists() {
        return Err(VqaError::DataFormat(format!(
            "engine did not produce a metrics table at {}",
            table_path.display()
        )));
    }
    info!("Metrics table written: {}", table_path.display());
    Ok(table_path.to_path_buf())
}
