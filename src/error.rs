//! Error taxonomy and the process exit statuses it maps to.
//!
//! Most code returns `anyhow::Result`. The entry point only needs to tell
//! configuration mistakes apart from everything else, so that one case gets a
//! typed variant it can downcast to.

use thiserror::Error;

/// Exit status for configuration errors (same convention as clap usage errors).
pub const EXIT_CONFIG: i32 = 2;

/// Exit status for any other fatal error before or after the child ran (`EX_IOERR`).
pub const EXIT_FATAL: i32 = 74;

#[derive(Debug, Error)]
pub enum JobError {
    /// Invocation or project configuration is unusable; nothing was executed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl JobError {
    pub fn config(detail: impl Into<String>) -> Self {
        JobError::Config(detail.into())
    }
}

/// Pick the process exit status for a fatal error.
pub fn exit_status_for(err: &anyhow::Error) -> i32 {
    let is_config = err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<JobError>(), Some(JobError::Config(_))));
    if is_config { EXIT_CONFIG } else { EXIT_FATAL }
}
