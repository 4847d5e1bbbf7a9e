mod analysis;
mod cli;
mod config;
mod engine;
mod error;
mod frames;
mod job;
mod metrics;
mod plot;
mod script;

use crate::cli::CliArgs;
use crate::engine::Engine;
use crate::error::Result;
use crate::job::PipelineSettings;
use crate::script::Templates;
use chrono::Local;
use log::{error, info, LevelFilter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

fn main() -> ExitCode {
    let start_time = Instant::now();
    let args = cli::parse_args();

    if let Err(e) = setup_logging(&args) {
        eprintln!("Error setting up logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting vqa...");
    info!("Arguments: {:?}", args);

    match run(args) {
        Ok(jobs) => {
            let duration = start_time.elapsed();
            info!("Finished {} job(s) in {:.2?}", jobs, duration);
            println!("Finished {} job(s) in {:.2?}", jobs, duration);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let duration = start_time.elapsed();
            error!("Run failed after {:.2?}: {}", duration, e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Sets up logging to console and optionally to a file next to the config.
fn setup_logging(args: &CliArgs) -> std::result::Result<(), fern::InitError> {
    let base_config = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::Info)
        .level_for("vqa", LevelFilter::Debug);

    let mut logger = base_config.chain(fern::Dispatch::new().chain(std::io::stdout()));

    let mut log_path = None;
    if args.log {
        let config_path = std::path::absolute(&args.config)?;
        let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let path = dir.join(format!("vqa_{}.log", Local::now().format("%Y%m%d_%H%M%S")));
        logger = logger.chain(fern::Dispatch::new().chain(fern::log_file(&path)?));
        log_path = Some(path);
    }

    logger.apply()?;
    if let Some(path) = log_path {
        info!("Logging to file: {}", path.display());
    }
    Ok(())
}

/// Template directory: explicit flag, else the directory holding the executable.
fn template_dir(args: &CliArgs) -> Result<PathBuf> {
    if let Some(dir) = &args.template_dir {
        return Ok(std::path::absolute(dir)?);
    }
    let exe = std::env::current_exe()?;
    Ok(exe.parent().map(Path::to_path_buf).unwrap_or_default())
}

fn run(args: CliArgs) -> Result<usize> {
    let settings = PipelineSettings {
        templates: Templates::new(template_dir(&args)?),
        engine: Engine::new(args.engine.clone()).with_leading_args(args.engine_args.clone()),
        num_frames: args.frames_per_metric(),
        timeout: args.timeout.map(Duration::from_secs),
        render_charts: !args.no_charts,
    };
    info!("Templates: {}", settings.templates.dir().display());
    info!("Engine: {}", settings.engine.program().display());
    if settings.num_frames == 0 {
        info!("Frame sampling disabled");
    }

    job::run_config(&args.config, &settings)
}
