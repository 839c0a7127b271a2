use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::job::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// A terminal write from a worker whose lease expired or was taken over.
    #[error("Lease on job {id} is no longer held")]
    LeaseLost { id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a missing job.
    pub fn job_not_found(id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity: "Job",
            id: id.to_string(),
        }
    }

    /// The stable error kind clients can branch on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::InvalidTransition { .. } | Self::LeaseLost { .. } => ErrorKind::InvalidTransition,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Error kinds
// ---------------------------------------------------------------------------

/// Closed taxonomy of failure causes.
///
/// Stored on failed jobs and rendered by the status API, so the names are
/// part of the external contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    SynthesisUnavailable,
    InvalidSynthesisOutput,
    ExecutionTimeout,
    ExecutionFailed,
    EmptyArtifact,
    NotFound,
    InvalidTransition,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        Self::ValidationError,
        Self::SynthesisUnavailable,
        Self::InvalidSynthesisOutput,
        Self::ExecutionTimeout,
        Self::ExecutionFailed,
        Self::EmptyArtifact,
        Self::NotFound,
        Self::InvalidTransition,
        Self::Cancelled,
        Self::Internal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "ValidationError",
            Self::SynthesisUnavailable => "SynthesisUnavailable",
            Self::InvalidSynthesisOutput => "InvalidSynthesisOutput",
            Self::ExecutionTimeout => "ExecutionTimeout",
            Self::ExecutionFailed => "ExecutionFailed",
            Self::EmptyArtifact => "EmptyArtifact",
            Self::NotFound => "NotFound",
            Self::InvalidTransition => "InvalidTransition",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        }
    }

    /// Transient kinds are retried by the dispatcher; everything else is
    /// deterministic for the same input and fails the job immediately.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::SynthesisUnavailable | Self::ExecutionTimeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::Internal(format!("Unknown error kind '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
