//! Composition contract.
//!
//! What the orchestrator hands the render capability and what it checks on
//! the way back. Rendering itself is external.

use std::collections::BTreeMap;

use reel_models::{AssetRef, DurationPlan, Project, ProjectId, RenderedArtifact, Voiceover};
use serde::{Deserialize, Serialize};

use crate::captions::CaptionSpec;
use crate::config::CompositionConfig;
use crate::error::{WorkerError, WorkerResult};

/// Audio levels relative to the reference level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioMix {
    pub voiceover_level: f64,
    pub music_level: f64,
    /// Music fades out over this many seconds before the composite ends
    pub music_fade_out_secs: f64,
}

/// Output frame geometry and rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFormat {
    /// (width, height) ratio
    pub aspect_ratio: (u32, u32),
    pub fps: u32,
}

/// Uniform playback rate change applied to the concatenated clips.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedAdjustment {
    /// Concatenated clip length divided by the target length. Above 1 speeds
    /// the clips up.
    pub factor: f64,
}

/// Everything the render capability needs for one composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionRequest {
    pub project_id: ProjectId,
    /// Clips in segment order, `0..scene_count`
    pub clips: Vec<AssetRef>,
    pub voiceover: Voiceover,
    pub music: Option<AssetRef>,
    pub captions: CaptionSpec,
    pub mix: AudioMix,
    pub reconciliation: Option<SpeedAdjustment>,
    pub output: OutputFormat,
    pub target_duration_secs: u32,
}

/// Applies the composition rules for one pipeline configuration.
#[derive(Debug, Clone)]
pub struct CompositionContract {
    config: CompositionConfig,
    /// Fallback length for clips that report no duration
    scene_secs: u32,
}

impl CompositionContract {
    pub fn new(config: CompositionConfig, scene_secs: u32) -> Self {
        Self { config, scene_secs }
    }

    pub fn mix(&self) -> AudioMix {
        AudioMix {
            voiceover_level: self.config.voiceover_level,
            music_level: self.config.music_level,
            music_fade_out_secs: self.config.music_fade_out_secs,
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat {
            aspect_ratio: self.config.aspect_ratio,
            fps: self.config.fps,
        }
    }

    /// Verify the project holds everything composition needs: a plan, a
    /// voiceover, and exactly one image and one clip for every index in
    /// `0..scene_count`.
    pub fn check_complete(&self, project: &Project) -> WorkerResult<DurationPlan> {
        let plan = project
            .plan()
            .ok_or_else(|| WorkerError::invariant("composition requires a duration plan"))?;
        if project.voiceover().is_none() {
            return Err(WorkerError::invariant("composition requires a voiceover"));
        }
        check_contiguous("images", project.images(), plan.scene_count)?;
        check_contiguous("clips", project.clips(), plan.scene_count)?;
        Ok(plan)
    }

    /// Sum of clip lengths, using the scene length for clips without one.
    pub fn clip_total_secs<'a>(&self, clips: impl IntoIterator<Item = &'a AssetRef>) -> f64 {
        clips
            .into_iter()
            .map(|c| c.duration_secs.unwrap_or(f64::from(self.scene_secs)))
            .sum()
    }

    /// Speed change needed to bring `clip_total_secs` onto the target, if
    /// the drift exceeds the tolerance.
    pub fn reconciliation(&self, clip_total_secs: f64, target_secs: u32) -> Option<SpeedAdjustment> {
        let target = f64::from(target_secs);
        if target <= 0.0 || clip_total_secs <= 0.0 {
            return None;
        }
        if (clip_total_secs - target).abs() > self.config.duration_tolerance_secs {
            Some(SpeedAdjustment {
                factor: clip_total_secs / target,
            })
        } else {
            None
        }
    }

    /// Assemble the render request. Fails with `InvariantViolation` unless
    /// the project is complete.
    pub fn build_request(
        &self,
        project: &Project,
        music: Option<AssetRef>,
    ) -> WorkerResult<CompositionRequest> {
        let plan = self.check_complete(project)?;
        let voiceover = project
            .voiceover()
            .cloned()
            .ok_or_else(|| WorkerError::invariant("composition requires a voiceover"))?;

        // BTreeMap iteration is index order.
        let clips: Vec<AssetRef> = project.clips().values().cloned().collect();
        let clip_total = self.clip_total_secs(&clips);

        Ok(CompositionRequest {
            project_id: project.id().clone(),
            captions: CaptionSpec::from_scenes(project.scenes(), voiceover.duration_secs),
            reconciliation: self.reconciliation(clip_total, plan.target_duration_secs),
            clips,
            voiceover,
            music,
            mix: self.mix(),
            output: self.output_format(),
            target_duration_secs: plan.target_duration_secs,
        })
    }

    /// Check the returned composite against the output contract.
    pub fn validate_rendered(&self, artifact: &RenderedArtifact, target_secs: u32) -> WorkerResult<()> {
        let target = f64::from(target_secs);
        let drift = (artifact.duration_secs - target).abs();
        if !artifact.duration_secs.is_finite() || drift > self.config.duration_tolerance_secs {
            return Err(WorkerError::invariant(format!(
                "rendered duration {:.2}s is not within {:.1}s of target {}s",
                artifact.duration_secs, self.config.duration_tolerance_secs, target_secs
            )));
        }

        let (aw, ah) = self.config.aspect_ratio;
        let matches_aspect = artifact.width > 0
            && artifact.height > 0
            && u64::from(artifact.width) * u64::from(ah) == u64::from(artifact.height) * u64::from(aw);
        if !matches_aspect {
            return Err(WorkerError::invariant(format!(
                "rendered frame {}x{} is not {}:{}",
                artifact.width, artifact.height, aw, ah
            )));
        }

        if artifact.fps != self.config.fps {
            return Err(WorkerError::invariant(format!(
                "rendered at {}fps, expected {}fps",
                artifact.fps, self.config.fps
            )));
        }
        Ok(())
    }
}

fn check_contiguous(kind: &str, assets: &BTreeMap<u32, AssetRef>, scene_count: u32) -> WorkerResult<()> {
    let missing: Vec<String> = (0..scene_count)
        .filter(|i| !assets.contains_key(i))
        .map(|i| i.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(WorkerError::invariant(format!(
            "{} missing for segments {} ({} of {} present)",
            kind,
            missing.join(", "),
            assets.len(),
            scene_count
        )));
    }
    if assets.len() != scene_count as usize {
        return Err(WorkerError::invariant(format!(
            "{} has {} entries for {} scenes",
            kind,
            assets.len(),
            scene_count
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{GenerationRequest, Script, Segment};

    fn contract() -> CompositionContract {
        CompositionContract::new(CompositionConfig::default(), 5)
    }

    fn segment(index: u32) -> Segment {
        Segment {
            index,
            narration_text: format!("beat {}", index),
            visual_prompt: format!("prompt {}", index),
            planned_duration_secs: 5.0,
        }
    }

    /// Project through the voiceover stage with a 6-scene plan.
    fn planned_project() -> Project {
        let mut project = Project::new(GenerationRequest::new("The fall of Vijayanagara", "medieval"));
        project
            .set_script(Script {
                title: "Fall".into(),
                hook: "An empire in a day".into(),
                era: "medieval".into(),
                segments: (0..6).map(segment).collect(),
                music_mood: Default::default(),
            })
            .unwrap();
        project
            .set_voiceover(Voiceover {
                audio: AssetRef::new("vo.mp3"),
                duration_secs: 28.0,
            })
            .unwrap();
        project
            .set_plan(
                DurationPlan {
                    target_duration_secs: 30,
                    scene_count: 6,
                },
                (0..6).map(segment).collect(),
            )
            .unwrap();
        project
    }

    fn fill(project: &mut Project, clip_secs: Option<f64>) {
        for i in 0..6 {
            project.insert_image(i, AssetRef::new(format!("img{}.png", i))).unwrap();
            let mut clip = AssetRef::new(format!("clip{}.mp4", i));
            clip.duration_secs = clip_secs;
            project.insert_clip(i, clip).unwrap();
        }
    }

    #[test]
    fn test_gap_is_invariant_violation() {
        let mut project = planned_project();
        for i in [0, 1, 2, 4, 5] {
            project.insert_image(i, AssetRef::new("img.png")).unwrap();
        }
        let err = contract().build_request(&project, None).unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(err.to_string().contains("segments 3"));
    }

    #[test]
    fn test_missing_clips_is_invariant_violation() {
        let mut project = planned_project();
        for i in 0..6 {
            project.insert_image(i, AssetRef::new("img.png")).unwrap();
        }
        project.insert_clip(0, AssetRef::new("c.mp4")).unwrap();
        assert!(contract().check_complete(&project).unwrap_err().is_invariant_violation());
    }

    #[test]
    fn test_request_orders_clips_by_index() {
        let mut project = planned_project();
        fill(&mut project, None);
        let request = contract().build_request(&project, Some(AssetRef::new("bgm.mp3"))).unwrap();

        let uris: Vec<&str> = request.clips.iter().map(|c| c.uri.as_str()).collect();
        assert_eq!(uris, vec!["clip0.mp4", "clip1.mp4", "clip2.mp4", "clip3.mp4", "clip4.mp4", "clip5.mp4"]);
        assert_eq!(request.target_duration_secs, 30);
        assert_eq!(request.mix.music_level, 0.18);
        assert_eq!(request.mix.music_fade_out_secs, 2.0);
        assert_eq!(request.output.aspect_ratio, (9, 16));
        assert_eq!(request.captions.cues.len(), 6);
        // 6 clips at the 5s fallback match the target exactly.
        assert!(request.reconciliation.is_none());
    }

    #[test]
    fn test_drift_beyond_tolerance_requests_speed_change() {
        let mut project = planned_project();
        fill(&mut project, Some(6.0));
        let request = contract().build_request(&project, None).unwrap();
        let adjustment = request.reconciliation.unwrap();
        assert!((adjustment.factor - 36.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_drift_within_tolerance_is_left_alone() {
        assert!(contract().reconciliation(32.5, 30).is_none());
        assert!(contract().reconciliation(27.0, 30).is_none());
        assert!(contract().reconciliation(26.9, 30).is_some());
    }

    fn artifact(duration_secs: f64, width: u32, height: u32, fps: u32) -> RenderedArtifact {
        RenderedArtifact {
            asset: AssetRef::new("final.mp4"),
            duration_secs,
            width,
            height,
            fps,
        }
    }

    #[test]
    fn test_validate_rendered() {
        let c = contract();
        assert!(c.validate_rendered(&artifact(30.4, 1080, 1920, 30), 30).is_ok());
        assert!(c.validate_rendered(&artifact(34.0, 1080, 1920, 30), 30).unwrap_err().is_invariant_violation());
        assert!(c.validate_rendered(&artifact(30.0, 1920, 1080, 30), 30).is_err());
        assert!(c.validate_rendered(&artifact(30.0, 1080, 1920, 25), 30).is_err());
        assert!(c.validate_rendered(&artifact(f64::NAN, 1080, 1920, 30), 30).is_err());
    }
}
