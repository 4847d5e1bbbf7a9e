// src/config.rs

use crate::error::{Result, VqaError};
use log::{debug, info};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// One comparison task. All paths are absolute once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub distorted: PathBuf,
    pub reference: PathBuf,
    pub output: PathBuf,
    pub script: PathBuf,
    pub subtitle: Option<PathBuf>,
}

/// Parsed job list together with the directory relative paths resolve against.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub jobs: Vec<JobDescriptor>,
}

/// Reads and validates the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let config_path = std::path::absolute(path)?;
    info!("Loading configuration: {}", config_path.display());
    let content = fs::read_to_string(&config_path).map_err(|e| VqaError::from_read(&config_path, e))?;
    let value: Value = serde_json::from_str(&content)?;

    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    let jobs = parse_jobs(&value, &base_dir)?;
    info!("Loaded {} job(s) from {}", jobs.len(), config_path.display());
    Ok(Config { base_dir, jobs })
}

/// Validates the configuration shape and resolves every path against `base_dir`.
pub fn parse_jobs(value: &Value, base_dir: &Path) -> Result<Vec<JobDescriptor>> {
    let entries = value
        .as_array()
        .ok_or_else(|| VqaError::Config("configuration root should be a list of objects".to_string()))?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let object = entry.as_object().ok_or_else(|| {
                VqaError::Config(format!("job #{} should be an object", index))
            })?;
            let job = JobDescriptor {
                distorted: resolve(base_dir, &required(object, "distorted", index)?),
                reference: resolve(base_dir, &required(object, "reference", index)?),
                output: resolve(base_dir, &required(object, "output", index)?),
                script: resolve(base_dir, &required(object, "script", index)?),
                subtitle: optional(object, "subtitle", index)?.map(|s| resolve(base_dir, &s)),
            };
            debug!("Job #{}: {:?}", index, job);
            Ok(job)
        })
        .collect()
}

fn required(object: &Map<String, Value>, field: &str, index: usize) -> Result<String> {
    optional(object, field, index)?.ok_or_else(|| {
        VqaError::Config(format!("job #{} is missing required field '{}'", index, field))
    })
}

fn optional(object: &Map<String, Value>, field: &str, index: usize) -> Result<Option<String>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(VqaError::Config(format!(
            "job #{} field '{}' should be a string, got {}",
            index, field, other
        ))),
    }
}

fn resolve(base_dir: &Path, raw: &str) -> PathBuf {
    // `join` keeps absolute paths untouched.
    normalize(&base_dir.join(raw))
}

/// Drops `.` and folds `..` into its parent without touching the filesystem.
/// `..` at the root stays at the root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."), // Relative path climbing above its start
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
