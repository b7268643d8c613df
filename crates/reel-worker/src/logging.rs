//! Structured project logging utilities.
//!
//! Provides consistent, structured logging for pipeline runs with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use reel_models::{ProjectId, Stage};

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG` (default `info`) and `LOG_FORMAT=json` for JSON lines.
/// Errors if a global subscriber is already set.
pub fn init_tracing() -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    }
}

/// Project logger for structured logging with consistent formatting.
///
/// Every line carries the project id and, once set, the stage.
#[derive(Debug, Clone)]
pub struct ProjectLogger {
    project_id: String,
    stage: Option<Stage>,
}

impl ProjectLogger {
    pub fn new(project_id: &ProjectId) -> Self {
        Self {
            project_id: project_id.to_string(),
            stage: None,
        }
    }

    /// Logger for the same project scoped to one stage.
    pub fn for_stage(&self, stage: Stage) -> Self {
        Self {
            project_id: self.project_id.clone(),
            stage: Some(stage),
        }
    }

    fn stage_str(&self) -> &'static str {
        self.stage.map(|s| s.as_str()).unwrap_or("pipeline")
    }

    pub fn log_start(&self, message: &str) {
        info!(
            project_id = %self.project_id,
            stage = self.stage_str(),
            "Stage started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            project_id = %self.project_id,
            stage = self.stage_str(),
            "Stage progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            project_id = %self.project_id,
            stage = self.stage_str(),
            "Stage warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            project_id = %self.project_id,
            stage = self.stage_str(),
            "Stage error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            project_id = %self.project_id,
            stage = self.stage_str(),
            "Stage completed: {}", message
        );
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// Span covering one sequencer run of the project.
    pub fn create_span(&self, run: u32) -> Span {
        tracing::info_span!(
            "project_run",
            project_id = %self.project_id,
            run
        )
    }
}
