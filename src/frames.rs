// src/frames.rs

use crate::error::Result;
use crate::job::JobContext;
use crate::metrics::MetricsTable;
use crate::script::OutputStage;
use log::{debug, info};
use tempfile::TempPath;

/// Second pass: has the engine dump the `count` worst frames of every metric.
///
/// Does nothing when `count` is zero.
pub fn sample_frames(ctx: &JobContext<'_>, table: &MetricsTable, count: usize) -> Result<()> {
    if count == 0 {
        info!("Frame sampling disabled, skipping second pass");
        return Ok(());
    }

    let mut transient = Vec::with_capacity(table.metrics.len());
    let mut worst_frames = Vec::with_capacity(table.metrics.len());
    for (i, metric) in table.metrics.iter().enumerate() {
        let rows = table.worst_frames(i, count);
        info!(
            "Lowest {} frame(s) by {}: {:?}",
            rows.len(),
            metric,
            rows.iter().map(|r| r.frame).collect::<Vec<_>>()
        );

        // Owned before writing so a partial file is removed on error.
        let file = TempPath::from_path(ctx.worst_frames_path(i, metric));
        table.write_rows(&file, rows)?;
        debug!("Wrote worst-frame set {}", file.display());
        worst_frames.push((metric.clone(), file.to_path_buf()));
        transient.push(file);
    }

    ctx.run_stage(&OutputStage::Frames { worst_frames })?;

    for file in transient {
        file.close()?;
    }
    info!("Frame sampling complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobDescriptor;
    use crate::engine::Engine;
    use crate::job::PipelineSettings;
    use crate::script::Templates;

    #[test]
    fn zero_count_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDescriptor {
            distorted: dir.path().join("d.mkv"),
            reference: dir.path().join("r.mkv"),
            output: dir.path().to_path_buf(),
            script: dir.path().join("missing.vpy"),
            subtitle: None,
        };
        let settings = PipelineSettings {
            templates: Templates::new(dir.path().join("no-templates")),
            engine: Engine::new(dir.path().join("no-engine")),
            num_frames: 0,
            timeout: None,
            render_charts: false,
        };
        let table = MetricsTable::from_reader("frame,psnr\n0,30.0\n1,25.0\n".as_bytes()).unwrap();

        let ctx = JobContext::new(&job, 0, &settings);
        sample_frames(&ctx, &table, 0).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_pass_removes_worst_frame_files() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobDescriptor {
            distorted: dir.path().join("d.mkv"),
            reference: dir.path().join("r.mkv"),
            output: dir.path().to_path_buf(),
            script: dir.path().join("missing.vpy"),
            subtitle: None,
        };
        let settings = PipelineSettings {
            templates: Templates::new(dir.path()),
            engine: Engine::new(dir.path().join("no-engine")),
            num_frames: 1,
            timeout: None,
            render_charts: false,
        };
        let table = MetricsTable::from_reader("frame,psnr\n0,30.0\n1,25.0\n".as_bytes()).unwrap();

        let ctx = JobContext::new(&job, 0, &settings);
        assert!(sample_frames(&ctx, &table, 1).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
