//! Error types for the EDA sandbox.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that prevent a run from being attempted or recorded.
///
/// Run outcomes (timeouts, non-zero exits, kills) are not errors at this
/// layer; they are reported through [`crate::ExecutionRun::status`].
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The run request is malformed.
    #[error("invalid run request: {reason}")]
    InvalidRequest {
        /// What was wrong with it.
        reason: String,
    },

    /// Reading or writing a run record failed.
    #[error("run ledger I/O failed for {path}: {source}")]
    Ledger {
        /// The record or directory involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A run record could not be encoded or decoded.
    #[error("run record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The executor was shut down while the run waited for a slot.
    #[error("sandbox executor is shut down")]
    Closed,
}

impl SandboxError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

impl From<SandboxError> for eda_error::EdaError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::InvalidRequest { reason } => Self::InvalidArgument {
                field: "request".to_string(),
                reason,
            },
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}
