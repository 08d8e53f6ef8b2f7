//! Failure classification strategies.
//!
//! Each step names an analyzer type on the command line. The type plus the
//! step's optional argument mapping is resolved into an [`Analyzer`] before
//! the command runs.
//!
//! Analyzers are pure functions of the finished job: they look at the exit
//! code and, for log-content strategies, the captured log text.

use std::fmt;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobError;
use crate::job::{AnalyzerArgs, JobResult};

const CHERRY_PICK_EMPTY: &str =
    "The previous cherry-pick is now empty, possibly due to conflict resolution.";

/// Analyzer types a step may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerType {
    /// Tag any failure with the step author's own (category, subcategory).
    #[value(name = "exitcode")]
    #[serde(rename = "exitcode")]
    ExitCode,
    /// Diff application: recognise diffs that already landed.
    #[value(name = "sq_apply_diffs")]
    SqApplyDiffs,
}

impl AnalyzerType {
    pub fn name(self) -> &'static str {
        match self {
            AnalyzerType::ExitCode => "exitcode",
            AnalyzerType::SqApplyDiffs => "sq_apply_diffs",
        }
    }

    /// Whether [`Analyzer::resolve`] looks at the argument mapping at all.
    pub fn reads_args(self) -> bool {
        match self {
            AnalyzerType::ExitCode => true,
            AnalyzerType::SqApplyDiffs => false,
        }
    }
}

impl fmt::Display for AnalyzerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of analyzing a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Classification {
    /// Nothing to record.
    Success,
    Failure {
        category: String,
        subcategory: String,
    },
}

impl Classification {
    pub fn failure(category: impl Into<String>, subcategory: impl Into<String>) -> Self {
        Classification::Failure {
            category: category.into(),
            subcategory: subcategory.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Classification::Success)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Success => f.write_str("success"),
            Classification::Failure {
                category,
                subcategory,
            } => write!(f, "{category} {subcategory}"),
        }
    }
}

/// A known error string and what it means when found in a failed step's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSignature {
    pub needle: &'static str,
    pub on_match: (&'static str, &'static str),
    pub fallback: (&'static str, &'static str),
}

impl LogSignature {
    /// An empty cherry-pick means the diff is already on the target branch.
    pub fn diff_already_landed() -> Self {
        Self {
            needle: CHERRY_PICK_EMPTY,
            on_match: ("user_failure", "diff_already_landed"),
            fallback: ("infra_failure", AnalyzerType::SqApplyDiffs.name()),
        }
    }
}

/// A resolved classification strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Analyzer {
    /// Author-supplied classification, applied to any nonzero exit.
    ExitCode {
        category: String,
        subcategory: String,
    },
    /// Classification driven by what the step printed.
    LogContent(LogSignature),
}

impl Analyzer {
    /// Resolve an analyzer type and its arguments into a strategy.
    ///
    /// Fails with [`JobError::Config`] when a required argument is missing.
    pub fn resolve(kind: AnalyzerType, args: Option<&AnalyzerArgs>) -> Result<Self> {
        match kind {
            AnalyzerType::ExitCode => {
                let args = args.ok_or_else(|| {
                    JobError::config(
                        "the exitcode analyzer requires --args with \"category\" and \"subcategory\"",
                    )
                })?;
                Ok(Analyzer::ExitCode {
                    category: required_field(args, "category")?,
                    subcategory: required_field(args, "subcategory")?,
                })
            }
            AnalyzerType::SqApplyDiffs => {
                Ok(Analyzer::LogContent(LogSignature::diff_already_landed()))
            }
        }
    }

    /// Classify a finished job.
    pub fn analyze(&self, job: &JobResult) -> Result<Classification> {
        if job.exit_code == 0 {
            return Ok(Classification::Success);
        }

        let log = match self {
            Analyzer::ExitCode { .. } => String::new(),
            Analyzer::LogContent(_) => {
                let bytes = std::fs::read(&job.log_path).with_context(|| {
                    format!("failed to read step log: {}", job.log_path.display())
                })?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
        };
        Ok(self.classify_log(job.exit_code, &log))
    }

    /// Classify from an exit code and already-loaded log text.
    pub fn classify_log(&self, exit_code: i32, log: &str) -> Classification {
        if exit_code == 0 {
            return Classification::Success;
        }

        match self {
            Analyzer::ExitCode {
                category,
                subcategory,
            } => Classification::failure(category, subcategory),
            Analyzer::LogContent(signature) => {
                let (category, subcategory) = if log.contains(signature.needle) {
                    signature.on_match
                } else {
                    signature.fallback
                };
                Classification::failure(category, subcategory)
            }
        }
    }
}

fn required_field(args: &AnalyzerArgs, key: &str) -> Result<String> {
    match args.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => {
            Err(JobError::config(format!("analyzer argument \"{key}\" is empty")).into())
        }
        Some(other) => Err(JobError::config(format!(
            "analyzer argument \"{key}\" must be a string, got {other}"
        ))
        .into()),
        None => Err(JobError::config(format!("missing analyzer argument \"{key}\"")).into()),
    }
}
