//! Worker error types.

use reel_models::{ProjectError, ProjectId, Stage};
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transient remote failure: {0}")]
    TransientRemote(String),

    #[error("Permanent remote failure: {0}")]
    PermanentRemote(String),

    #[error("{stage} stage incomplete: {succeeded} succeeded, segments {} failed: {detail}", format_indices(.failed))]
    PartialStage {
        stage: Stage,
        failed: Vec<u32>,
        succeeded: usize,
        detail: String,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{stage} stage timed out after {secs}s")]
    StageTimeout { stage: Stage, secs: u64 },

    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Project {0} is already being run")]
    ProjectBusy(ProjectId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_indices(indices: &[u32]) -> String {
    indices.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

impl WorkerError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientRemote(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::PermanentRemote(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::TransientRemote(_))
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, WorkerError::InvalidInput(_))
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, WorkerError::InvariantViolation(_))
    }

    /// Check if this is a permanent failure that should NOT be retried.
    pub fn is_permanent_failure(&self) -> bool {
        matches!(
            self,
            WorkerError::InvalidInput(_)
                | WorkerError::PermanentRemote(_)
                | WorkerError::InvariantViolation(_)
        )
    }

    /// Short label for metrics and logs describing how a stage failed.
    pub fn failure_class(&self) -> &'static str {
        if self.is_retryable() {
            return "transient";
        }
        if self.is_invalid_input() {
            return "invalid_input";
        }
        if self.is_invariant_violation() {
            return "invariant";
        }
        if self.is_permanent_failure() {
            return "permanent";
        }
        match self {
            WorkerError::PartialStage { .. } => "partial",
            WorkerError::Cancelled => "cancelled",
            WorkerError::StageTimeout { .. } => "timeout",
            _ => "internal",
        }
    }

    /// Segment indices that failed, for partial stage failures.
    pub fn failed_segments(&self) -> &[u32] {
        match self {
            WorkerError::PartialStage { failed, .. } => failed,
            _ => &[],
        }
    }
}

/// Project state mutations only fail when the sequencer breaks an ordering
/// or write-once rule, which is a defect.
impl From<ProjectError> for WorkerError {
    fn from(err: ProjectError) -> Self {
        WorkerError::InvariantViolation(err.to_string())
    }
}

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteFailure {
    /// Timeout, rate limit or other condition worth retrying
    #[error("{0}")]
    Transient(String),

    /// Malformed input or permanent rejection
    #[error("{0}")]
    Permanent(String),
}

impl RemoteFailure {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteFailure::Transient(_))
    }
}

impl From<RemoteFailure> for WorkerError {
    fn from(err: RemoteFailure) -> Self {
        match err {
            RemoteFailure::Transient(msg) => WorkerError::TransientRemote(msg),
            RemoteFailure::Permanent(msg) => WorkerError::PermanentRemote(msg),
        }
    }
}
