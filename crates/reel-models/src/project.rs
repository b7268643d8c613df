//! Project: the end-to-end unit of orchestration for one video.
//!
//! A `Project` owns every artifact produced for one video and enforces the
//! status state machine. Mutators return `ProjectError` instead of silently
//! overwriting: the script, voiceover, plan and per-segment assets are all
//! write-once.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{AssetRef, DurationPlan, GenerationRequest, RenderedArtifact, Script, Segment, Voiceover};

/// Unique identifier for a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    /// Generate a new random project ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Script,
    Voiceover,
    Images,
    Clips,
    Composition,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Script,
        Stage::Voiceover,
        Stage::Images,
        Stage::Clips,
        Stage::Composition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Script => "script",
            Stage::Voiceover => "voiceover",
            Stage::Images => "images",
            Stage::Clips => "clips",
            Stage::Composition => "composition",
        }
    }

    /// Status the project reaches when this stage succeeds.
    pub fn completes_to(&self) -> ProjectStatus {
        match self {
            Stage::Script => ProjectStatus::ScriptReady,
            Stage::Voiceover => ProjectStatus::VoiceoverReady,
            Stage::Images => ProjectStatus::ImagesReady,
            Stage::Clips => ProjectStatus::ClipsReady,
            Stage::Composition => ProjectStatus::Composed,
        }
    }

    /// Whether the stage fans out into per-segment generation jobs.
    pub fn is_job_set(&self) -> bool {
        matches!(self, Stage::Images | Stage::Clips)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Project status.
///
/// Advances strictly forward through the declared order, or jumps to
/// `Failed` from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Created,
    ScriptReady,
    VoiceoverReady,
    ImagesReady,
    ClipsReady,
    Composed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Created => "created",
            ProjectStatus::ScriptReady => "script_ready",
            ProjectStatus::VoiceoverReady => "voiceover_ready",
            ProjectStatus::ImagesReady => "images_ready",
            ProjectStatus::ClipsReady => "clips_ready",
            ProjectStatus::Composed => "composed",
            ProjectStatus::Failed => "failed",
        }
    }

    /// Position in the forward order; `None` for `Failed`.
    pub fn rank(&self) -> Option<u8> {
        match self {
            ProjectStatus::Created => Some(0),
            ProjectStatus::ScriptReady => Some(1),
            ProjectStatus::VoiceoverReady => Some(2),
            ProjectStatus::ImagesReady => Some(3),
            ProjectStatus::ClipsReady => Some(4),
            ProjectStatus::Composed => Some(5),
            ProjectStatus::Failed => None,
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Composed | ProjectStatus::Failed)
    }

    /// The stage that moves the project out of this status.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            ProjectStatus::Created => Some(Stage::Script),
            ProjectStatus::ScriptReady => Some(Stage::Voiceover),
            ProjectStatus::VoiceoverReady => Some(Stage::Images),
            ProjectStatus::ImagesReady => Some(Stage::Clips),
            ProjectStatus::ClipsReady => Some(Stage::Composition),
            ProjectStatus::Composed | ProjectStatus::Failed => None,
        }
    }

    pub fn can_transition_to(&self, to: ProjectStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == ProjectStatus::Failed {
            return true;
        }
        self.next_stage().map(|s| s.completes_to()) == Some(to)
    }

    /// Coarse progress percentage for status displays.
    pub fn progress(&self) -> u8 {
        match self {
            ProjectStatus::Created => 0,
            ProjectStatus::ScriptReady => 10,
            ProjectStatus::VoiceoverReady => 25,
            ProjectStatus::ImagesReady => 50,
            ProjectStatus::ClipsReady => 85,
            ProjectStatus::Composed => 100,
            ProjectStatus::Failed => 0,
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure details recorded when a project enters `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorInfo {
    /// Stage that failed
    pub stage: Stage,
    /// Human-readable cause
    pub cause: String,
    /// Segment indices whose jobs failed (job-set stages only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_segments: Vec<u32>,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn new(stage: Stage, cause: impl Into<String>) -> Self {
        Self {
            stage,
            cause: cause.into(),
            failed_segments: Vec::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_failed_segments(mut self, mut segments: Vec<u32>) -> Self {
        segments.sort_unstable();
        segments.dedup();
        self.failed_segments = segments;
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {}", self.stage, self.cause)?;
        if !self.failed_segments.is_empty() {
            let list: Vec<String> = self.failed_segments.iter().map(|i| i.to_string()).collect();
            write!(f, " (failed segments: {})", list.join(", "))?;
        }
        Ok(())
    }
}

/// Violations of the project's write-once and ordering rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectError {
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: ProjectStatus,
        to: ProjectStatus,
    },

    #[error("{0} is already set")]
    AlreadySet(&'static str),

    #[error("{0} is not set yet")]
    Missing(&'static str),

    #[error("{kind} for segment {index} is already recorded")]
    SlotTaken { kind: &'static str, index: u32 },

    #[error("segment index {index} is outside the planned range 0..{scene_count}")]
    OutOfRange { index: u32, scene_count: u32 },

    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("invalid scenes: {0}")]
    InvalidScenes(String),
}

/// Complete video project.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    id: ProjectId,
    request: GenerationRequest,
    status: ProjectStatus,
    /// Last non-failed status reached; where a resumed run continues from
    checkpoint: ProjectStatus,
    script: Option<Script>,
    voiceover: Option<Voiceover>,
    plan: Option<DurationPlan>,
    scenes: Vec<Segment>,
    images: BTreeMap<u32, AssetRef>,
    clips: BTreeMap<u32, AssetRef>,
    music: Option<AssetRef>,
    output: Option<RenderedArtifact>,
    error: Option<ErrorInfo>,
    /// Number of sequencer invocations (1 for the first run)
    run: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Bumped on every mutation
    event_seq: u64,
}

impl Project {
    pub fn new(request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            request,
            status: ProjectStatus::Created,
            checkpoint: ProjectStatus::Created,
            script: None,
            voiceover: None,
            plan: None,
            scenes: Vec::new(),
            images: BTreeMap::new(),
            clips: BTreeMap::new(),
            music: None,
            output: None,
            error: None,
            run: 1,
            created_at: now,
            updated_at: now,
            event_seq: 0,
        }
    }

    pub fn id(&self) -> &ProjectId {
        &self.id
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn status(&self) -> ProjectStatus {
        self.status
    }

    pub fn checkpoint(&self) -> ProjectStatus {
        self.checkpoint
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub fn voiceover(&self) -> Option<&Voiceover> {
        self.voiceover.as_ref()
    }

    pub fn plan(&self) -> Option<DurationPlan> {
        self.plan
    }

    pub fn scene_count(&self) -> Option<u32> {
        self.plan.map(|p| p.scene_count)
    }

    pub fn scenes(&self) -> &[Segment] {
        &self.scenes
    }

    pub fn images(&self) -> &BTreeMap<u32, AssetRef> {
        &self.images
    }

    pub fn clips(&self) -> &BTreeMap<u32, AssetRef> {
        &self.clips
    }

    pub fn music(&self) -> Option<&AssetRef> {
        self.music.as_ref()
    }

    pub fn output(&self) -> Option<&RenderedArtifact> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn run(&self) -> u32 {
        self.run
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn event_seq(&self) -> u64 {
        self.event_seq
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.event_seq += 1;
    }

    /// Record the generated script. Write-once.
    pub fn set_script(&mut self, script: Script) -> Result<(), ProjectError> {
        if self.script.is_some() {
            return Err(ProjectError::AlreadySet("script"));
        }
        script.validate().map_err(ProjectError::InvalidScript)?;
        self.script = Some(script);
        self.touch();
        Ok(())
    }

    /// Record the synthesized voiceover. Write-once.
    pub fn set_voiceover(&mut self, voiceover: Voiceover) -> Result<(), ProjectError> {
        if self.voiceover.is_some() {
            return Err(ProjectError::AlreadySet("voiceover"));
        }
        self.voiceover = Some(voiceover);
        self.touch();
        Ok(())
    }

    /// Record the duration plan together with the fitted scenes. Write-once;
    /// the scene count is never recomputed afterwards.
    pub fn set_plan(&mut self, plan: DurationPlan, scenes: Vec<Segment>) -> Result<(), ProjectError> {
        if self.plan.is_some() {
            return Err(ProjectError::AlreadySet("duration plan"));
        }
        if scenes.len() != plan.scene_count as usize {
            return Err(ProjectError::InvalidScenes(format!(
                "expected {} scenes, got {}",
                plan.scene_count,
                scenes.len()
            )));
        }
        if let Some((pos, s)) = scenes
            .iter()
            .enumerate()
            .find(|(pos, s)| s.index as usize != *pos)
        {
            return Err(ProjectError::InvalidScenes(format!(
                "scene at position {} has index {}",
                pos, s.index
            )));
        }
        self.plan = Some(plan);
        self.scenes = scenes;
        self.touch();
        Ok(())
    }

    fn check_slot(&self, index: u32) -> Result<(), ProjectError> {
        let scene_count = self.scene_count().ok_or(ProjectError::Missing("duration plan"))?;
        if index >= scene_count {
            return Err(ProjectError::OutOfRange { index, scene_count });
        }
        Ok(())
    }

    /// Record the image for one segment. Each index is written at most once.
    pub fn insert_image(&mut self, index: u32, asset: AssetRef) -> Result<(), ProjectError> {
        self.check_slot(index)?;
        if self.images.contains_key(&index) {
            return Err(ProjectError::SlotTaken { kind: "image", index });
        }
        self.images.insert(index, asset);
        self.touch();
        Ok(())
    }

    /// Record the clip for one segment. Each index is written at most once.
    pub fn insert_clip(&mut self, index: u32, asset: AssetRef) -> Result<(), ProjectError> {
        self.check_slot(index)?;
        if self.clips.contains_key(&index) {
            return Err(ProjectError::SlotTaken { kind: "clip", index });
        }
        self.clips.insert(index, asset);
        self.touch();
        Ok(())
    }

    /// Record the background music track. Write-once.
    pub fn set_music(&mut self, music: AssetRef) -> Result<(), ProjectError> {
        if self.music.is_some() {
            return Err(ProjectError::AlreadySet("music"));
        }
        self.music = Some(music);
        self.touch();
        Ok(())
    }

    /// Record the final composite. Write-once.
    pub fn set_output(&mut self, output: RenderedArtifact) -> Result<(), ProjectError> {
        if self.output.is_some() {
            return Err(ProjectError::AlreadySet("output"));
        }
        self.output = Some(output);
        self.touch();
        Ok(())
    }

    /// Segment indices in `0..scene_count` with no image yet.
    pub fn missing_images(&self) -> Vec<u32> {
        missing_indices(self.scene_count(), &self.images)
    }

    /// Segment indices in `0..scene_count` with no clip yet.
    pub fn missing_clips(&self) -> Vec<u32> {
        missing_indices(self.scene_count(), &self.clips)
    }

    /// Move to the next status in order.
    pub fn advance(&mut self, to: ProjectStatus) -> Result<(), ProjectError> {
        if to == ProjectStatus::Failed || !self.status.can_transition_to(to) {
            return Err(ProjectError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.checkpoint = to;
        self.touch();
        Ok(())
    }

    /// Jump to `Failed` with the given cause.
    pub fn fail(&mut self, error: ErrorInfo) -> Result<(), ProjectError> {
        if !self.status.can_transition_to(ProjectStatus::Failed) {
            return Err(ProjectError::InvalidTransition {
                from: self.status,
                to: ProjectStatus::Failed,
            });
        }
        self.status = ProjectStatus::Failed;
        self.error = Some(error);
        self.touch();
        Ok(())
    }

    /// Start a new run of a failed project from its checkpoint.
    ///
    /// Artifacts already recorded are kept; only the error is cleared.
    pub fn resume(&mut self) -> Result<(), ProjectError> {
        if self.status != ProjectStatus::Failed {
            return Err(ProjectError::InvalidTransition {
                from: self.status,
                to: self.checkpoint,
            });
        }
        self.status = self.checkpoint;
        self.error = None;
        self.run += 1;
        self.touch();
        Ok(())
    }
}

fn missing_indices(scene_count: Option<u32>, present: &BTreeMap<u32, AssetRef>) -> Vec<u32> {
    match scene_count {
        Some(n) => (0..n).filter(|i| !present.contains_key(i)).collect(),
        None => Vec::new(),
    }
}
