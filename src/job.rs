//! Supervising one pipeline step.
//!
//! A step runs once under the tee. When it exits nonzero its analyzer turns
//! the finished job into a classification, which replaces the failure marker
//! in the output directory. The step's exit code is reported back untouched.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, info};

use crate::analyzer::{Analyzer, AnalyzerType, Classification};
use crate::config::ShellConfig;
use crate::error::JobError;
use crate::marker::LatestFailureStore;
use crate::tee;

/// Decoded `--args` mapping; interpretation is up to the analyzer.
pub type AnalyzerArgs = serde_json::Map<String, serde_json::Value>;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Render a UTC timestamp with microsecond precision, e.g. `2024-05-01T12:00:00.000042Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(ts))
}

/// Everything needed to run and classify one step.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub step: String,
    pub analyzer_type: AnalyzerType,
    pub analyzer_args: Option<AnalyzerArgs>,
    pub dir: PathBuf,
    pub command: String,
}

impl JobSpec {
    pub fn new(
        step: impl Into<String>,
        analyzer_type: AnalyzerType,
        analyzer_args: Option<AnalyzerArgs>,
        dir: impl Into<PathBuf>,
        command: impl Into<String>,
    ) -> Result<Self> {
        let step = step.into();
        if step.is_empty() {
            return Err(JobError::config("step id must not be empty").into());
        }
        if step.contains(std::path::is_separator) {
            return Err(JobError::config(format!(
                "step id '{step}' must not contain a path separator"
            ))
            .into());
        }
        Ok(Self {
            step,
            analyzer_type,
            analyzer_args,
            dir: dir.into(),
            command: command.into(),
        })
    }

    /// `<dir>/<step>.log`; the step id is a bare file stem, so this stays in `dir`.
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.step))
    }
}

/// A finished step, as handed to its analyzer.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub step: String,
    #[serde(rename = "type")]
    pub analyzer_type: AnalyzerType,
    #[serde(rename = "args")]
    pub analyzer_args: Option<AnalyzerArgs>,
    pub exit_code: i32,
    pub log_path: PathBuf,
    #[serde(rename = "start_time", serialize_with = "serialize_timestamp")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "end_time", serialize_with = "serialize_timestamp")]
    pub finished_at: DateTime<Utc>,
}

/// What the supervisor did with a step.
#[derive(Debug)]
pub struct JobOutcome {
    pub result: JobResult,
    pub classification: Classification,
}

impl JobOutcome {
    /// The exit code the calling process should terminate with.
    pub fn exit_code(&self) -> i32 {
        self.result.exit_code
    }
}

/// Run a step under the tee and, if it fails, record its classification.
///
/// The analyzer is resolved first, so configuration errors surface before
/// the command is executed.
pub fn run_job(spec: &JobSpec, shell: &ShellConfig) -> Result<JobOutcome> {
    let analyzer = Analyzer::resolve(spec.analyzer_type, spec.analyzer_args.as_ref())
        .with_context(|| format!("invalid analyzer for step '{}'", spec.step))?;

    let dir = absolute_dir(&spec.dir)?;
    let spec = JobSpec {
        dir,
        ..spec.clone()
    };
    let log_path = spec.log_path();

    info!(step = %spec.step, analyzer = %spec.analyzer_type, "running step");
    let tee = tee::run_tee(shell, &spec.command, &log_path)?;

    let result = JobResult {
        step: spec.step.clone(),
        analyzer_type: spec.analyzer_type,
        analyzer_args: spec.analyzer_args.clone(),
        exit_code: tee.exit_code,
        log_path,
        started_at: tee.started_at,
        finished_at: tee.finished_at,
    };
    debug!(
        job = %serde_json::to_string(&result).unwrap_or_default(),
        "step finished"
    );

    if result.exit_code == 0 {
        return Ok(JobOutcome {
            result,
            classification: Classification::Success,
        });
    }

    let classification = analyzer
        .analyze(&result)
        .with_context(|| format!("failed to analyze step '{}'", result.step))?;
    let store = LatestFailureStore::new(&spec.dir);
    store.record(&classification)?;
    if tracing::enabled!(tracing::Level::DEBUG) {
        match store.latest() {
            Ok(marker) => {
                debug!(marker = ?marker, path = %store.path().display(), "failure marker")
            }
            Err(e) => debug!("failed to read back failure marker: {e:#}"),
        }
    }

    info!(
        step = %result.step,
        exit_code = result.exit_code,
        classification = %classification,
        "step failed"
    );

    Ok(JobOutcome {
        result,
        classification,
    })
}

fn absolute_dir(dir: &Path) -> Result<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .context("failed to get current directory (was it deleted?)")?;
    Ok(cwd.join(dir))
}
