//! Progress messages published while a project runs.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ProjectStatus, Stage};

/// Progress message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressMessage {
    /// A stage transition began
    StageStarted {
        stage: Stage,
        timestamp: DateTime<Utc>,
    },

    /// A stage finished and the project advanced
    StageCompleted {
        stage: Stage,
        status: ProjectStatus,
        timestamp: DateTime<Utc>,
    },

    /// One segment job reached a terminal state
    JobFinished {
        stage: Stage,
        #[serde(rename = "segmentIndex")]
        segment_index: u32,
        succeeded: bool,
        attempts: u32,
    },

    /// Progress update (0-100)
    Progress { value: u8 },

    /// The project failed
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The composite is ready
    Done {
        #[serde(rename = "outputUri")]
        output_uri: String,
    },
}

impl ProgressMessage {
    pub fn stage_started(stage: Stage) -> Self {
        Self::StageStarted {
            stage,
            timestamp: Utc::now(),
        }
    }

    pub fn stage_completed(stage: Stage, status: ProjectStatus) -> Self {
        Self::StageCompleted {
            stage,
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn job_finished(stage: Stage, segment_index: u32, succeeded: bool, attempts: u32) -> Self {
        Self::JobFinished {
            stage,
            segment_index,
            succeeded,
            attempts,
        }
    }

    pub fn progress(value: u8) -> Self {
        Self::Progress {
            value: value.min(100),
        }
    }

    pub fn error(stage: Option<Stage>, message: impl Into<String>) -> Self {
        Self::Error {
            stage,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn done(output_uri: impl Into<String>) -> Self {
        Self::Done {
            output_uri: output_uri.into(),
        }
    }

    pub fn type_str(&self) -> &'static str {
        match self {
            ProgressMessage::StageStarted { .. } => "stage_started",
            ProgressMessage::StageCompleted { .. } => "stage_completed",
            ProgressMessage::JobFinished { .. } => "job_finished",
            ProgressMessage::Progress { .. } => "progress",
            ProgressMessage::Error { .. } => "error",
            ProgressMessage::Done { .. } => "done",
        }
    }
}
