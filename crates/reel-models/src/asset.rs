//! References to generated artifacts.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to an artifact produced by an external generator.
///
/// The orchestrator never interprets the bytes behind a reference; it only
/// passes references between stages and into the render capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssetRef {
    /// Location of the artifact (remote URL or local path)
    pub uri: String,
    /// Measured duration, for time-based media that reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl AssetRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            duration_secs: None,
        }
    }

    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }
}

/// Synthesized narration track with its measured length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Voiceover {
    pub audio: AssetRef,
    pub duration_secs: f64,
}

/// Target video length and scene count derived from the voiceover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct DurationPlan {
    /// Target composite length in whole seconds
    pub target_duration_secs: u32,
    /// Number of scenes (one image and one clip each)
    pub scene_count: u32,
}

/// Final composite returned by the render capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderedArtifact {
    pub asset: AssetRef,
    /// Measured duration of the composite
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}
