// src/engine.rs

use crate::error::{Result, VqaError};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

static PROGRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Frame:\s*(?P<done>\d+)\s*/\s*(?P<total>\d+)").expect("Invalid progress Regex")
});

/// The external frame-processing engine (vspipe-compatible command line).
#[derive(Debug, Clone)]
pub struct Engine {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl Engine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Engine { program: program.into(), leading_args: Vec::new() }
    }

    /// Arguments placed before the fixed vspipe arguments.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn arguments(&self, script: &Path) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend([
            "-p".to_string(),
            "-c".to_string(),
            "y4m".to_string(),
            script.to_string_lossy().to_string(),
            ".".to_string(), // Discard the y4m stream; the output stage writes files
        ]);
        args
    }

    /// Runs the engine on `script` inside `work_dir` and blocks until it exits.
    ///
    /// With a `timeout`, the process is killed once it runs longer than that
    /// and the call fails with [`VqaError::Engine`].
    pub fn run(&self, script: &Path, work_dir: &Path, timeout: Option<Duration>) -> Result<()> {
        let args = self.arguments(script);
        info!("Running engine: {} {}", self.program.display(), args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!("Failed to start engine {}: {}", self.program.display(), e);
                VqaError::Engine(format!("failed to start {}: {}", self.program.display(), e))
            })?;

        let stderr = child.stderr.take();
        let reader = thread::spawn(move || match stderr {
            Some(stream) => collect_stderr(stream),
            None => VecDeque::new(),
        });

        // --- Wait, draining stderr on the side ---
        let start_time = Instant::now();
        let waited = wait_with_timeout(&mut child, timeout);
        let duration = start_time.elapsed();
        let tail: Vec<String> = reader.join().unwrap_or_default().into_iter().collect();
        let tail = tail.join("\n");

        // --- Classify the outcome ---
        let status = match waited? {
            Some(status) => status,
            None => {
                error!("Engine timed out after {:.2?} on {}", duration, script.display());
                return Err(VqaError::Engine(format!(
                    "{} timed out after {:.2?}: {}",
                    self.program.display(),
                    duration,
                    tail
                )));
            }
        };

        if !status.success() {
            error!("Engine failed ({}ms) with {}: {}", duration.as_millis(), status, tail);
            return Err(VqaError::Engine(format!(
                "{} exited with {}: {}",
                self.program.display(),
                status,
                tail
            )));
        }

        debug!("Engine stderr tail: {}", tail);
        info!("Engine finished successfully ({}ms)", duration.as_millis());
        Ok(())
    }
}

/// The handful of process operations the wait loop needs.
trait EngineProcess {
    fn id(&self) -> u32;
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
    fn wait(&mut self) -> io::Result<ExitStatus>;
    fn kill(&mut self) -> io::Result<()>;
}

impl EngineProcess for Child {
    fn id(&self) -> u32 {
        Child::id(self)
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Child::try_wait(self)
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        Child::wait(self)
    }

    fn kill(&mut self) -> io::Result<()> {
        Child::kill(self)
    }
}

/// Returns `None` when the timeout expired and the process was killed.
///
/// The process never outlives a failed wait: it is killed before the error is
/// returned, so the stderr reader reaches EOF.
fn wait_with_timeout(process: &mut impl EngineProcess, timeout: Option<Duration>) -> Result<Option<ExitStatus>> {
    poll_exit(process, timeout).map_err(|e| {
        error!("Lost track of engine process {}: {}", process.id(), e);
        kill_and_reap(process);
        VqaError::Engine(format!("failed to wait for engine process: {}", e))
    })
}

fn poll_exit(process: &mut impl EngineProcess, timeout: Option<Duration>) -> io::Result<Option<ExitStatus>> {
    let Some(limit) = timeout else {
        return process.wait().map(Some);
    };

    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = process.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            warn!("Engine exceeded {:?}, killing process {}", limit, process.id());
            kill_and_reap(process);
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Best effort: failures are logged, the caller is already on an error path.
fn kill_and_reap(process: &mut impl EngineProcess) {
    if let Err(e) = process.kill() {
        warn!("Failed to kill engine process {}: {}", process.id(), e);
    }
    if let Err(e) = process.wait() {
        warn!("Failed to reap engine process {}: {}", process.id(), e);
    }
}

/// Drains stderr, logging progress and keeping the tail of everything else.
///
/// vspipe redraws its progress line with carriage returns, so both `\r` and
/// `\n` end a line here.
fn collect_stderr(stream: impl Read) -> VecDeque<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut last_decile = None;

    for chunk in BufReader::new(stream).split(b'\r') {
        let Ok(chunk) = chunk else { break };
        for line in String::from_utf8_lossy(&chunk).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((done, total)) = parse_progress(line) {
                let decile = if total == 0 { 10 } else { done * 10 / total };
                if last_decile != Some(decile) {
                    last_decile = Some(decile);
                    debug!("Engine progress: {}/{} frames", done, total);
                }
                continue;
            }
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        }
    }
    tail
}

fn parse_progress(line: &str) -> Option<(u64, u64)> {
    let caps = PROGRESS_REGEX.captures(line)?;
    let done = caps.name("done")?.as_str().parse().ok()?;
    let total = caps.name("total")?.as_str().parse().ok()?;
    Some((done, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_vspipe_command_line() {
        let engine = Engine::new("vspipe").with_leading_args(["--arg", "x=1"]);
        assert_eq!(
            engine.arguments(Path::new("/out/__vqa_job000_metrics__.vpy")),
            vec!["--arg", "x=1", "-p", "-c", "y4m", "/out/__vqa_job000_metrics__.vpy", "."]
        );
    }

    #[test]
    fn parses_progress_lines() {
        assert_eq!(parse_progress("Frame: 120/2400 (35.12 fps)"), Some((120, 2400)));
        assert_eq!(parse_progress("Output 2400 frames in 68.3 seconds"), None);
    }

    #[test]
    fn stderr_tail_skips_progress_and_keeps_last_lines() {
        let mut input = String::new();
        for i in 0..30 {
            input.push_str(&format!("Frame: {}/30\r", i));
        }
        for i in 0..25 {
            input.push_str(&format!("line {}\n", i));
        }
        let tail = collect_stderr(input.as_bytes());
        assert_eq!(tail.len(), STDERR_TAIL_LINES);
        assert_eq!(tail.front().map(String::as_str), Some("line 5"));
        assert_eq!(tail.back().map(String::as_str), Some("line 24"));
    }

    /// A process whose wait calls always fail.
    #[derive(Default)]
    struct UnwaitableProcess {
        kills: usize,
    }

    impl EngineProcess for UnwaitableProcess {
        fn id(&self) -> u32 {
            4242
        }

        fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
            Err(io::Error::other("try_wait failed"))
        }

        fn wait(&mut self) -> io::Result<ExitStatus> {
            Err(io::Error::other("wait failed"))
        }

        fn kill(&mut self) -> io::Result<()> {
            self.kills += 1;
            Ok(())
        }
    }

    #[test]
    fn failed_wait_kills_the_process() {
        for timeout in [None, Some(Duration::from_secs(30))] {
            let mut process = UnwaitableProcess::default();
            let err = wait_with_timeout(&mut process, timeout).unwrap_err();
            assert!(matches!(err, VqaError::Engine(ref m) if m.contains("failed")), "{err}");
            assert_eq!(process.kills, 1, "timeout {timeout:?}");
        }
    }

    #[test]
    fn missing_program_is_engine_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(dir.path().join("no-such-engine"));
        let err = engine.run(Path::new("x.vpy"), dir.path(), None).unwrap_err();
        assert!(matches!(err, VqaError::Engine(_)));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_engine_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new("sh").with_leading_args(["-c", "echo broken >&2; exit 3", "engine"]);
        let err = engine.run(Path::new("x.vpy"), dir.path(), None).unwrap_err();
        match err {
            VqaError::Engine(message) => assert!(message.contains("broken"), "{message}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn runs_inside_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new("sh").with_leading_args(["-c", "touch ran_here", "engine"]);
        engine.run(Path::new("x.vpy"), dir.path(), Some(Duration::from_secs(30))).unwrap();
        assert!(dir.path().join("ran_here").exists());
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_hung_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new("sh").with_leading_args(["-c", "exec sleep 30", "engine"]);
        let start = Instant::now();
        let err = engine
            .run(Path::new("x.vpy"), dir.path(), Some(Duration::from_millis(300)))
            .unwrap_err();
        assert!(matches!(err, VqaError::Engine(ref m) if m.contains("timed out")));
        assert!(start.elapsed() < Duration::from_secs(20));
    }
}
