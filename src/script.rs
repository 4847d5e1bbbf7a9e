// src/script.rs

use crate::error::{Result, VqaError};
use log::{debug, info};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

pub const HEADER_TEMPLATE: &str = "header.vpy";
pub const METRICS_TEMPLATE: &str = "metrics_out.vpy";
pub const FRAMES_TEMPLATE: &str = "frames_out.vpy";

/// Which output stage the generated script ends with.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputStage {
    /// Emit the per-frame metrics table.
    Metrics,
    /// Dump the frames listed in the worst-frame sets, keyed by metric name.
    Frames { worst_frames: Vec<(String, PathBuf)> },
}

impl OutputStage {
    pub fn template_name(&self) -> &'static str {
        match self {
            OutputStage::Metrics => METRICS_TEMPLATE,
            OutputStage::Frames { .. } => FRAMES_TEMPLATE,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutputStage::Metrics => "metrics",
            OutputStage::Frames { .. } => "frames",
        }
    }
}

/// Values bound into the generated script ahead of the user script.
#[derive(Debug, Clone, Copy)]
pub struct ScriptBindings<'a> {
    pub reference: &'a Path,
    pub distorted: &'a Path,
    pub subtitle: Option<&'a Path>,
    pub metrics_table: &'a Path,
}

/// The fixed template set shared by every job.
#[derive(Debug, Clone)]
pub struct Templates {
    dir: PathBuf,
}

impl Templates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Templates { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Renders header, bindings, user script and output-stage template into one document.
    pub fn render(&self, bindings: &ScriptBindings<'_>, user_script: &Path, stage: &OutputStage) -> Result<String> {
        let mut script = read_template(&self.dir.join(HEADER_TEMPLATE))?;
        script.push('\n');
        script.push_str(&render_bindings(bindings, stage)?);
        script.push_str(&read_template(user_script)?);
        script.push('\n');
        script.push_str(&read_template(&self.dir.join(stage.template_name()))?);
        Ok(script)
    }

    /// Renders the script and writes it to `destination`, replacing any previous file.
    ///
    /// The returned handle deletes the script when dropped; `close()` it on the
    /// success path so a failed delete is reported.
    pub fn write_script(
        &self,
        bindings: &ScriptBindings<'_>,
        user_script: &Path,
        stage: &OutputStage,
        destination: PathBuf,
    ) -> Result<TempPath> {
        let script = self.render(bindings, user_script, stage)?;
        fs::write(&destination, script)?;
        info!("Generated {} script: {}", stage.label(), destination.display());
        Ok(TempPath::from_path(destination))
    }
}

fn read_template(path: &Path) -> Result<String> {
    debug!("Reading script fragment {}", path.display());
    fs::read_to_string(path).map_err(|e| VqaError::from_read(path, e))
}

/// JSON string literals double as script string literals, escaping included.
fn literal(path: &Path) -> Result<String> {
    Ok(serde_json::to_string(&path.to_string_lossy())?)
}

fn render_bindings(bindings: &ScriptBindings<'_>, stage: &OutputStage) -> Result<String> {
    let subtitle = match bindings.subtitle {
        Some(path) => literal(path)?,
        None => "None".to_string(),
    };

    let mut block = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(block, "reference_path = {}", literal(bindings.reference)?);
    let _ = writeln!(block, "distorted_path = {}", literal(bindings.distorted)?);
    let _ = writeln!(block, "subtitle_path = {}", subtitle);
    let _ = writeln!(block, "metrics_path = {}", literal(bindings.metrics_table)?);

    if let OutputStage::Frames { worst_frames } = stage {
        let entries = worst_frames
            .iter()
            .map(|(metric, path)| Ok(format!("{}: {}", serde_json::to_string(metric)?, literal(path)?)))
            .collect::<Result<Vec<_>>>()?;
        let _ = writeln!(block, "worst_frames = {{{}}}", entries.join(", "));
    }
    Ok(block)
}
