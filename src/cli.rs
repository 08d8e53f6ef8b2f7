use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde_json::Value;

use tracing::warn;

use crate::analyzer::AnalyzerType;
use crate::error::JobError;
use crate::job::AnalyzerArgs;

#[derive(Parser, Debug)]
#[command(
    name = "job-analysis",
    about = "Wrap a shell command invocation with failure analysis markers",
    version
)]
pub struct Cli {
    /// Unique identifier for this step (names the log file)
    #[arg(long, value_parser = clap::builder::NonEmptyStringValueParser::new())]
    pub step: String,

    /// Analyzer used to classify a failure
    #[arg(long = "type", value_enum)]
    pub analyzer: AnalyzerType,

    /// Arguments for the analyzer (JSON object)
    #[arg(long)]
    pub args: Option<String>,

    /// Directory for logs and the failure marker, relative to cwd
    /// [default: artifacts/analysis, or defaults.dir from .job-analysis/config.toml]
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Command to run through the shell; read from stdin when omitted
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// Decode `--args` into a mapping.
    ///
    /// Anything but a JSON object is a configuration error for analyzers that
    /// read their arguments. Analyzers that ignore them get `None` instead.
    pub fn analyzer_args(&self) -> Result<Option<AnalyzerArgs>> {
        let Some(raw) = self.args.as_deref() else {
            return Ok(None);
        };
        match decode_args(raw) {
            Ok(map) => Ok(Some(map)),
            Err(reason) if !self.analyzer.reads_args() => {
                warn!(analyzer = %self.analyzer, "ignoring --args: {reason}");
                Ok(None)
            }
            Err(reason) => Err(JobError::config(reason).into()),
        }
    }
}

fn decode_args(raw: &str) -> std::result::Result<AnalyzerArgs, String> {
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("--args must be a JSON object, got {other}")),
        Err(e) => Err(format!("--args is not valid JSON: {e}")),
    }
}
