//! Read-only status surface for projects.
//!
//! `ProjectSnapshot` is the only view of a project handed to status
//! queries. It is a copy, so callers can never mutate project state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{AssetRef, ErrorInfo, Project, ProjectId, ProjectStatus, RenderedArtifact};

/// Snapshot of a project for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProjectSnapshot {
    /// Unique project identifier
    pub project_id: ProjectId,
    /// Topic from the originating request
    pub topic: String,
    /// Current status
    pub status: ProjectStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Sequencer invocation count
    pub run: u32,
    /// Script title once the script exists
    pub script_title: Option<String>,
    /// Measured voiceover length
    pub voiceover_duration_secs: Option<f64>,
    /// Planned composite length
    pub target_duration_secs: Option<u32>,
    /// Planned scene count
    pub scene_count: Option<u32>,
    pub voiceover: Option<AssetRef>,
    pub images: BTreeMap<u32, AssetRef>,
    pub clips: BTreeMap<u32, AssetRef>,
    pub music: Option<AssetRef>,
    pub output: Option<RenderedArtifact>,
    /// Present only when status is `Failed`
    pub error: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Sequence number for event ordering (monotonically increasing)
    pub event_seq: u64,
}

impl ProjectSnapshot {
    pub fn from_project(project: &Project) -> Self {
        // A failed project reports the progress of the last checkpoint.
        let progress = match project.status() {
            ProjectStatus::Failed => project.checkpoint().progress(),
            status => status.progress(),
        };

        Self {
            project_id: project.id().clone(),
            topic: project.request().topic.clone(),
            status: project.status(),
            progress,
            run: project.run(),
            script_title: project.script().map(|s| s.title.clone()),
            voiceover_duration_secs: project.voiceover().map(|v| v.duration_secs),
            target_duration_secs: project.plan().map(|p| p.target_duration_secs),
            scene_count: project.scene_count(),
            voiceover: project.voiceover().map(|v| v.audio.clone()),
            images: project.images().clone(),
            clips: project.clips().clone(),
            music: project.music().cloned(),
            output: project.output().cloned(),
            error: project.error().cloned(),
            created_at: project.created_at(),
            updated_at: project.updated_at(),
            event_seq: project.event_seq(),
        }
    }

    /// Check if the project is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl From<&Project> for ProjectSnapshot {
    fn from(project: &Project) -> Self {
        Self::from_project(project)
    }
}
