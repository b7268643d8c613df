//! Duration planner.
//!
//! Maps a measured voiceover length to the target composite length and the
//! number of scenes. Pure: no I/O, same input gives the same plan.

use reel_models::DurationPlan;

use crate::config::PlannerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Plan the composite for a voiceover of `voiceover_secs`.
///
/// The buffered length is rounded up to a whole number of scenes, the scene
/// count is clamped to `[min_scenes, max_scenes]`, and the target is always
/// `scene_count * scene_secs`.
pub fn plan(config: &PlannerConfig, voiceover_secs: f64) -> WorkerResult<DurationPlan> {
    if !voiceover_secs.is_finite() || voiceover_secs <= 0.0 {
        return Err(WorkerError::invalid_input(format!(
            "voiceover duration must be a positive number of seconds, got {}",
            voiceover_secs
        )));
    }
    if config.scene_secs == 0 {
        return Err(WorkerError::invalid_input("scene length must be positive"));
    }

    let scene_secs = f64::from(config.scene_secs);
    let buffered = voiceover_secs + config.buffer_secs;
    // Saturating float-to-int cast; the clamp below bounds the result.
    let unclamped = (buffered / scene_secs).ceil() as u32;
    let scene_count = unclamped.clamp(config.min_scenes, config.max_scenes);

    Ok(DurationPlan {
        target_duration_secs: scene_count * config.scene_secs,
        scene_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PlannerConfig {
        PlannerConfig::default()
    }

    #[test]
    fn test_exact_multiple() {
        let p = plan(&config(), 28.0).unwrap();
        assert_eq!(p.target_duration_secs, 30);
        assert_eq!(p.scene_count, 6);
    }

    #[test]
    fn test_clamped_down_recomputes_target() {
        let p = plan(&config(), 53.0).unwrap();
        assert_eq!(p.scene_count, 10);
        assert_eq!(p.target_duration_secs, 50);
    }

    #[test]
    fn test_rounds_up_to_next_scene() {
        let p = plan(&config(), 36.4).unwrap();
        assert_eq!(p.target_duration_secs, 40);
        assert_eq!(p.scene_count, 8);
    }

    #[test]
    fn test_short_voiceover_clamped_up() {
        let p = plan(&config(), 4.0).unwrap();
        assert_eq!(p.scene_count, 6);
        assert_eq!(p.target_duration_secs, 30);
    }

    #[test]
    fn test_rejects_non_positive_and_non_finite() {
        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = plan(&config(), bad).unwrap_err();
            assert!(err.is_invalid_input(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_bounds_hold_across_range() {
        let cfg = config();
        let mut d = 0.1;
        while d < 200.0 {
            let p = plan(&cfg, d).unwrap();
            assert!((6..=10).contains(&p.scene_count), "d={}", d);
            assert_eq!(p.target_duration_secs, p.scene_count * 5, "d={}", d);
            assert_eq!(plan(&cfg, d).unwrap(), p);
            d += 0.7;
        }
    }

    #[test]
    fn test_huge_duration_saturates_to_max() {
        let p = plan(&config(), 1e300).unwrap();
        assert_eq!(p.scene_count, 10);
    }
}
