//! Generation jobs submitted to remote generators.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::AssetRef;

/// Opaque job identifier issued by a remote generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RemoteJobId(pub String);

impl RemoteJobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of one generation job attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for an execution slot
    #[default]
    Queued,
    /// Accepted by the remote generator
    Submitted { remote_id: RemoteJobId },
    /// Being polled for completion
    Polling { remote_id: RemoteJobId, polls: u32 },
    /// Finished with an artifact
    Succeeded { artifact: AssetRef },
    /// Finished without an artifact
    Failed { reason: String, transient: bool },
    /// No terminal status within the per-job timeout
    TimedOut { after_secs: u64 },
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Submitted { .. } => "submitted",
            JobState::Polling { .. } => "polling",
            JobState::Succeeded { .. } => "succeeded",
            JobState::Failed { .. } => "failed",
            JobState::TimedOut { .. } => "timed_out",
        }
    }

    /// Holding an execution slot at the remote generator.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobState::Submitted { .. } | JobState::Polling { .. })
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work for one segment, owned by the executor for its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationJob {
    pub segment_index: u32,
    /// Attempts started so far
    pub attempt: u32,
    pub state: JobState,
}

impl GenerationJob {
    pub fn new(segment_index: u32) -> Self {
        Self {
            segment_index,
            attempt: 0,
            state: JobState::Queued,
        }
    }

    /// Start a new attempt from `Queued`.
    pub fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.state = JobState::Queued;
    }

    pub fn mark_submitted(&mut self, remote_id: RemoteJobId) {
        self.state = JobState::Submitted { remote_id };
    }

    /// Count one poll of the remote job.
    pub fn record_poll(&mut self) {
        self.state = match std::mem::take(&mut self.state) {
            JobState::Submitted { remote_id } => JobState::Polling { remote_id, polls: 1 },
            JobState::Polling { remote_id, polls } => JobState::Polling {
                remote_id,
                polls: polls + 1,
            },
            other => other,
        };
    }

    pub fn succeed(&mut self, artifact: AssetRef) {
        self.state = JobState::Succeeded { artifact };
    }

    pub fn fail(&mut self, reason: impl Into<String>, transient: bool) {
        self.state = JobState::Failed {
            reason: reason.into(),
            transient,
        };
    }

    pub fn time_out(&mut self, after_secs: u64) {
        self.state = JobState::TimedOut { after_secs };
    }

    pub fn remote_id(&self) -> Option<&RemoteJobId> {
        match &self.state {
            JobState::Submitted { remote_id } | JobState::Polling { remote_id, .. } => Some(remote_id),
            _ => None,
        }
    }
}
