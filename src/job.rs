// src/job.rs

use crate::analysis;
use crate::config::{self, Config, JobDescriptor};
use crate::engine::Engine;
use crate::error::Result;
use crate::frames;
use crate::metrics::{self, METRICS_TABLE_FILE};
use crate::script::{OutputStage, ScriptBindings, Templates};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Settings shared by every job of a run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub templates: Templates,
    pub engine: Engine,
    /// Worst frames to sample per metric; 0 disables the second pass.
    pub num_frames: usize,
    pub timeout: Option<Duration>,
    pub render_charts: bool,
}

/// Everything a pipeline step needs to know about the job it runs for.
///
/// Output paths are derived from the job's output directory, which is also the
/// engine's working directory. Temporary names carry the job tag so no two
/// jobs share a file.
#[derive(Debug)]
pub struct JobContext<'a> {
    pub job: &'a JobDescriptor,
    pub tag: String,
    pub settings: &'a PipelineSettings,
    metrics_table: PathBuf,
}

impl<'a> JobContext<'a> {
    pub fn new(job: &'a JobDescriptor, index: usize, settings: &'a PipelineSettings) -> Self {
        JobContext {
            job,
            tag: format!("job{:03}", index),
            settings,
            metrics_table: job.output.join(METRICS_TABLE_FILE),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.job.output
    }

    pub fn metrics_table_path(&self) -> &Path {
        &self.metrics_table
    }

    pub fn script_path(&self, stage: &OutputStage) -> PathBuf {
        self.work_dir().join(format!("__vqa_{}_{}__.vpy", self.tag, stage.label()))
    }

    pub fn worst_frames_path(&self, column: usize, metric: &str) -> PathBuf {
        let name: String = metric
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        self.work_dir().join(format!("__vqa_{}_low_{}_{}__.csv", self.tag, column, name))
    }

    fn bindings(&self) -> ScriptBindings<'_> {
        ScriptBindings {
            reference: &self.job.reference,
            distorted: &self.job.distorted,
            subtitle: self.job.subtitle.as_deref(),
            metrics_table: &self.metrics_table,
        }
    }

    /// Generates the script for `stage`, runs the engine on it and deletes it.
    pub fn run_stage(&self, stage: &OutputStage) -> Result<()> {
        let script = self.settings.templates.write_script(
            &self.bindings(),
            &self.job.script,
            stage,
            self.script_path(stage),
        )?;
        self.settings
            .engine
            .run(&script, self.work_dir(), self.settings.timeout)?;
        script.close()?;
        Ok(())
    }
}

/// Metrics pass, analysis, then the optional frame-sampling pass for one job.
pub fn run_job(job: &JobDescriptor, index: usize, settings: &PipelineSettings) -> Result<()> {
    let start_time = Instant::now();
    info!("Job #{}: {} vs {}", index, job.distorted.display(), job.reference.display());

    if !job.output.exists() {
        info!("Creating output directory: {}", job.output.display());
    }
    fs::create_dir_all(&job.output)?;

    let ctx = JobContext::new(job, index, settings);
    let table_path = metrics::extract_metrics(&ctx)?;
    let analysis = analysis::analyze_metrics(&table_path, ctx.work_dir(), job, settings.render_charts)?;
    frames::sample_frames(&ctx, &analysis.table, settings.num_frames)?;

    info!("Job #{} finished in {:.2?}", index, start_time.elapsed());
    Ok(())
}

/// Runs every job in order; the first failure aborts the run.
pub fn run_all(config: &Config, settings: &PipelineSettings) -> Result<()> {
    for (index, job) in config.jobs.iter().enumerate() {
        run_job(job, index, settings)?;
    }
    Ok(())
}

/// Loads the configuration at `config_path` and runs all of its jobs.
pub fn run_config(config_path: &Path, settings: &PipelineSettings) -> Result<usize> {
    let config = config::load_config(config_path)?;
    info!("Relative job paths resolve against {}", config.base_dir.display());
    run_all(&config, settings)?;
    Ok(config.jobs.len())
}
