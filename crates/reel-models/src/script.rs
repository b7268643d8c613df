//! Scripts, narrative segments and generation requests.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Background music mood categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum MusicMood {
    #[default]
    Dramatic,
    Suspense,
    Inspiring,
    Emotional,
    Adventure,
}

impl MusicMood {
    pub fn as_str(&self) -> &'static str {
        match self {
            MusicMood::Dramatic => "dramatic",
            MusicMood::Suspense => "suspense",
            MusicMood::Inspiring => "inspiring",
            MusicMood::Emotional => "emotional",
            MusicMood::Adventure => "adventure",
        }
    }
}

impl std::fmt::Display for MusicMood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One narrative beat.
///
/// Narration and visual prompt are owned by the upstream generator and are
/// passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    /// 0-based position, contiguous within a script
    pub index: u32,
    pub narration_text: String,
    pub visual_prompt: String,
    /// Nominal pacing length; never used for scheduling
    pub planned_duration_secs: f64,
}

/// Complete script for one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Script {
    pub title: String,
    pub hook: String,
    pub era: String,
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub music_mood: MusicMood,
}

impl Script {
    /// Check that segments are non-empty and indexed `0..n` in order.
    pub fn validate(&self) -> Result<(), String> {
        if self.segments.is_empty() {
            return Err("script has no segments".to_string());
        }
        for (position, segment) in self.segments.iter().enumerate() {
            if segment.index as usize != position {
                return Err(format!(
                    "segment at position {} has index {}",
                    position, segment.index
                ));
            }
        }
        Ok(())
    }

    /// Full narration, segments joined in order.
    pub fn full_narration(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.narration_text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Derive exactly `scene_count` scene segments from the script.
    ///
    /// Scene `i` covers script segments `[i*n/k, (i+1)*n/k)` (at least one),
    /// joining their narration and taking the first visual prompt. Shorter
    /// scripts repeat segments. Output indices are `0..scene_count`.
    pub fn fit_to_scenes(&self, scene_count: u32, scene_secs: f64) -> Vec<Segment> {
        let n = self.segments.len();
        let k = scene_count as usize;
        if n == 0 || k == 0 {
            return Vec::new();
        }

        (0..k)
            .map(|i| {
                let start = (i * n / k).min(n - 1);
                let end = ((i + 1) * n / k).max(start + 1).min(n);
                let covered = &self.segments[start..end];

                let narration_text = covered
                    .iter()
                    .map(|s| s.narration_text.trim())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");

                Segment {
                    index: i as u32,
                    narration_text,
                    visual_prompt: covered[0].visual_prompt.clone(),
                    planned_duration_secs: scene_secs,
                }
            })
            .collect()
    }
}

/// Request to create a new video project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationRequest {
    /// Event or topic for the video
    pub topic: String,
    /// Era the topic belongs to
    pub era: String,
    /// Preferred music mood; the script's mood wins when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_hint: Option<MusicMood>,
    /// Narration word budget handed to the script generator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_word_budget: Option<u32>,
}

impl GenerationRequest {
    pub fn new(topic: impl Into<String>, era: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            era: era.into(),
            mood_hint: None,
            target_word_budget: None,
        }
    }
}
