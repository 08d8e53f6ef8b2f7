//! The failure marker shared by every step in an output directory.
//!
//! `<dir>/failure` holds the classification of the most recently failed step
//! and nothing else. Each recorded failure replaces the previous content;
//! successes never touch the file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::analyzer::Classification;

const MARKER_FILENAME: &str = "failure";

pub struct LatestFailureStore {
    path: PathBuf,
}

impl LatestFailureStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(MARKER_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the marker with `classification`.
    ///
    /// Returns `false` without touching the file for [`Classification::Success`].
    pub fn record(&self, classification: &Classification) -> Result<bool> {
        let Classification::Failure {
            category,
            subcategory,
        } = classification
        else {
            return Ok(false);
        };

        fs::write(&self.path, format!("{category} {subcategory}")).with_context(|| {
            format!("failed to write failure marker: {}", self.path.display())
        })?;
        info!(
            category = %category,
            subcategory = %subcategory,
            marker = %self.path.display(),
            "recorded failure"
        );
        Ok(true)
    }

    /// Read back the current marker, if any failure has been recorded.
    pub fn latest(&self) -> Result<Option<(String, String)>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read failure marker: {}", self.path.display())
                });
            }
        };

        Ok(contents
            .split_once(' ')
            .map(|(category, subcategory)| (category.to_string(), subcategory.to_string())))
    }
}
