//! Shared data models for the ReelForge pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Projects and their status state machine
//! - Scripts, segments and music moods
//! - Generated asset references and duration plans
//! - Generation jobs submitted to remote generators
//! - The read-only status surface and progress messages

pub mod asset;
pub mod generation;
pub mod progress;
pub mod project;
pub mod script;
pub mod status;

// Re-export common types
pub use asset::{AssetRef, DurationPlan, RenderedArtifact, Voiceover};
pub use generation::{GenerationJob, JobState, RemoteJobId};
pub use progress::ProgressMessage;
pub use project::{ErrorInfo, Project, ProjectError, ProjectId, ProjectStatus, Stage};
pub use script::{GenerationRequest, MusicMood, Script, Segment};
pub use status::ProjectSnapshot;
