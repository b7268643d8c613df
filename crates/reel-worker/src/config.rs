//! Pipeline configuration.
//!
//! All tunables live in one immutable `PipelineConfig` handed to the
//! sequencer and executor at construction.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Duration planner settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    /// Seconds added to the measured voiceover before rounding
    pub buffer_secs: f64,
    /// Length of one scene (one image, one clip)
    pub scene_secs: u32,
    pub min_scenes: u32,
    pub max_scenes: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            buffer_secs: 2.0,
            scene_secs: 5,
            min_scenes: 6,
            max_scenes: 10,
        }
    }
}

/// Bounded job executor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Jobs allowed in submitted/polling state at once
    pub concurrency_limit: usize,
    /// Attempts per job, including the first
    pub max_attempts: u32,
    /// Fixed wait between attempts
    pub retry_backoff: Duration,
    /// Wait between polls of one remote job
    pub poll_interval: Duration,
    /// Bound on one attempt from submission to terminal status. A timed-out
    /// attempt is a transient failure and is retried, so one job can hold a
    /// slot for `max_attempts` timeouts plus the backoffs between them.
    pub job_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(600), // 10 minutes
        }
    }
}

/// Composition contract settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionConfig {
    /// Allowed drift between clip total / render and the target
    pub duration_tolerance_secs: f64,
    pub voiceover_level: f64,
    pub music_level: f64,
    /// Music fade-out window before the composite ends
    pub music_fade_out_secs: f64,
    /// Output aspect ratio as (width, height)
    pub aspect_ratio: (u32, u32),
    pub fps: u32,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_secs: 3.0,
            voiceover_level: 1.0,
            music_level: 0.18,
            music_fade_out_secs: 2.0,
            aspect_ratio: (9, 16),
            fps: 30,
        }
    }
}

/// Background music library settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MusicConfig {
    /// Root of the mood-organized music directory
    pub music_dir: PathBuf,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            music_dir: PathBuf::from("./music"),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub composition: CompositionConfig,
    pub music: MusicConfig,
    /// Upper bound on one stage transition
    pub stage_timeout: Duration,
    /// Word budget for scripts when the request has none
    pub default_word_budget: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            planner: PlannerConfig::default(),
            executor: ExecutorConfig::default(),
            composition: CompositionConfig::default(),
            music: MusicConfig::default(),
            stage_timeout: Duration::from_secs(3600), // 1 hour
            default_word_budget: 100,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl PipelineConfig {
    /// Create config from environment variables (`.env` is honored).
    pub fn from_env() -> WorkerResult<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            planner: PlannerConfig {
                buffer_secs: env_parse("REEL_BUFFER_SECS").unwrap_or(defaults.planner.buffer_secs),
                scene_secs: env_parse("REEL_SCENE_SECS").unwrap_or(defaults.planner.scene_secs),
                min_scenes: env_parse("REEL_MIN_SCENES").unwrap_or(defaults.planner.min_scenes),
                max_scenes: env_parse("REEL_MAX_SCENES").unwrap_or(defaults.planner.max_scenes),
            },
            executor: ExecutorConfig {
                concurrency_limit: env_parse("REEL_MAX_CONCURRENT_JOBS")
                    .unwrap_or(defaults.executor.concurrency_limit),
                max_attempts: env_parse("REEL_MAX_ATTEMPTS").unwrap_or(defaults.executor.max_attempts),
                retry_backoff: env_parse("REEL_RETRY_BACKOFF_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.executor.retry_backoff),
                poll_interval: env_parse("REEL_POLL_INTERVAL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.executor.poll_interval),
                job_timeout: env_parse("REEL_JOB_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.executor.job_timeout),
            },
            composition: CompositionConfig {
                duration_tolerance_secs: env_parse("REEL_DURATION_TOLERANCE_SECS")
                    .unwrap_or(defaults.composition.duration_tolerance_secs),
                music_level: env_parse("REEL_MUSIC_LEVEL").unwrap_or(defaults.composition.music_level),
                ..defaults.composition
            },
            music: MusicConfig {
                music_dir: std::env::var("REEL_MUSIC_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.music.music_dir),
            },
            stage_timeout: env_parse("REEL_STAGE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stage_timeout),
            default_word_budget: env_parse("REEL_WORD_BUDGET").unwrap_or(defaults.default_word_budget),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        let p = &self.planner;
        if p.scene_secs == 0 {
            return Err(WorkerError::invalid_input("scene length must be positive"));
        }
        if !p.buffer_secs.is_finite() || p.buffer_secs < 0.0 {
            return Err(WorkerError::invalid_input("buffer must be a non-negative number of seconds"));
        }
        if p.min_scenes == 0 || p.min_scenes > p.max_scenes {
            return Err(WorkerError::invalid_input(format!(
                "scene bounds [{}, {}] are empty",
                p.min_scenes, p.max_scenes
            )));
        }

        let e = &self.executor;
        if e.concurrency_limit == 0 {
            return Err(WorkerError::invalid_input("concurrency limit must be at least 1"));
        }
        if e.max_attempts == 0 {
            return Err(WorkerError::invalid_input("max attempts must be at least 1"));
        }
        if e.job_timeout.is_zero() {
            return Err(WorkerError::invalid_input("job timeout must be positive"));
        }

        let c = &self.composition;
        if !c.duration_tolerance_secs.is_finite() || c.duration_tolerance_secs < 0.0 {
            return Err(WorkerError::invalid_input("duration tolerance must be non-negative"));
        }
        if !(0.0..=1.0).contains(&c.music_level) || !(0.0..=1.0).contains(&c.voiceover_level) {
            return Err(WorkerError::invalid_input("mix levels must be within [0, 1]"));
        }
        Ok(())
    }
}
