use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::JobError;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".job-analysis";

#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Output directory for logs and the failure marker, relative to cwd.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
}

/// Shell used to interpret the step's command line.
///
/// ```toml
/// [shell]
/// program = "/bin/bash"
/// args = ["-c"]
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ShellConfig {
    #[serde(default = "default_shell_program")]
    pub program: String,
    #[serde(default = "default_shell_args")]
    pub args: Vec<String>,
}

fn default_dir() -> PathBuf {
    PathBuf::from("artifacts/analysis")
}

fn default_shell_program() -> String {
    "/bin/bash".to_string()
}

fn default_shell_args() -> Vec<String> {
    vec!["-c".to_string()]
}

impl Default for Defaults {
    fn default() -> Self {
        Self { dir: default_dir() }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: default_shell_program(),
            args: default_shell_args(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub shell: ShellConfig,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.job-analysis/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                JobError::config(format!("failed to read {}: {e}", path.display()))
            })?;
            let config: ProjectConfig = toml::from_str(&contents).map_err(|e| {
                JobError::config(format!("failed to parse {}: {e}", path.display()))
            })?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}
