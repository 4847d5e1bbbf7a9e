// src/cli.rs

use clap::Parser;
use std::path::PathBuf;

/// VQA - Video Quality Assurance tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file (JSON list of jobs)
    #[arg(short, long, value_name = "PATH", default_value = "config.json")]
    pub config: PathBuf,

    /// Save the n frames with the lowest quality by each metric (0 disables)
    #[arg(short, long, default_value_t = 20, allow_negative_numbers = true)]
    pub num_frames: i64,

    /// Directory holding header.vpy, metrics_out.vpy and frames_out.vpy
    /// (default: directory of the vqa executable)
    #[arg(long, value_name = "DIR")]
    pub template_dir: Option<PathBuf>,

    /// Frame-processing engine executable
    #[arg(long, value_name = "PROGRAM", default_value = "vspipe")]
    pub engine: PathBuf,

    /// Extra argument passed to the engine ahead of its standard arguments (repeatable)
    #[arg(long = "engine-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Abort an engine invocation after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Skip rendering the time-series and histogram charts
    #[arg(long)]
    pub no_charts: bool,

    /// Enable logging to file (e.g., vqa_YYYYMMDD_HHMMSS.log next to the config)
    #[arg(long)]
    pub log: bool,
}

impl CliArgs {
    /// Frames to sample per metric; non-positive values disable sampling.
    pub fn frames_per_metric(&self) -> usize {
        usize::try_from(self.num_frames.max(0)).unwrap_or(usize::MAX)
    }
}

pub fn parse_args() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = CliArgs::try_parse_from(["vqa"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.json"));
        assert_eq!(args.num_frames, 20);
        assert_eq!(args.engine, PathBuf::from("vspipe"));
        assert!(args.engine_args.is_empty());
        assert!(args.timeout.is_none());
        assert!(!args.no_charts);
    }

    #[test]
    fn short_flags_and_negative_counts() {
        let args = CliArgs::try_parse_from(["vqa", "-c", "jobs.json", "-n", "-3"]).unwrap();
        assert_eq!(args.config, PathBuf::from("jobs.json"));
        assert_eq!(args.num_frames, -3);
        assert_eq!(args.frames_per_metric(), 0);
    }

    #[test]
    fn engine_args_are_repeatable() {
        let args = CliArgs::try_parse_from([
            "vqa", "--engine-arg", "--arg", "--engine-arg", "depth=10", "--timeout", "600",
        ])
        .unwrap();
        assert_eq!(args.engine_args, vec!["--arg", "depth=10"]);
        assert_eq!(args.timeout, Some(600));
    }
}
