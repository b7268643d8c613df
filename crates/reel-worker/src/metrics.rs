//! Pipeline metrics.
//!
//! Emitted through the `metrics` facade; installing a recorder is up to the
//! embedding process. Without one every call is a no-op.

use metrics::{counter, gauge, histogram};
use reel_models::Stage;

/// Metric names as constants for consistency.
pub mod names {
    // Stage metrics
    pub const STAGES_STARTED_TOTAL: &str = "reel_stages_started_total";
    pub const STAGES_COMPLETED_TOTAL: &str = "reel_stages_completed_total";
    pub const STAGES_FAILED_TOTAL: &str = "reel_stages_failed_total";
    pub const STAGE_DURATION_SECONDS: &str = "reel_stage_duration_seconds";

    // Generation job metrics
    pub const JOBS_FINISHED_TOTAL: &str = "reel_jobs_finished_total";
    pub const JOB_ATTEMPTS: &str = "reel_job_attempts";
    pub const JOBS_IN_FLIGHT: &str = "reel_jobs_in_flight";

    // Project metrics
    pub const PROJECTS_CREATED_TOTAL: &str = "reel_projects_created_total";
    pub const PROJECTS_COMPOSED_TOTAL: &str = "reel_projects_composed_total";
}

/// Record a stage starting.
pub fn record_stage_started(stage: Stage) {
    let labels = [("stage", stage.as_str().to_string())];
    counter!(names::STAGES_STARTED_TOTAL, &labels).increment(1);
}

/// Record a stage finishing, successfully or not.
pub fn record_stage_finished(stage: Stage, failure: Option<&'static str>, duration_secs: f64) {
    let labels = [("stage", stage.as_str().to_string())];
    match failure {
        None => counter!(names::STAGES_COMPLETED_TOTAL, &labels).increment(1),
        Some(reason) => {
            let failed = [
                ("stage", stage.as_str().to_string()),
                ("reason", reason.to_string()),
            ];
            counter!(names::STAGES_FAILED_TOTAL, &failed).increment(1);
        }
    }
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record one generation job reaching its final outcome.
pub fn record_job_finished(kind: &str, outcome: &str, attempts: u32) {
    let labels = [
        ("kind", kind.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::JOBS_FINISHED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_ATTEMPTS, &labels).record(f64::from(attempts));
}

/// Adjust the in-flight job gauge.
pub fn adjust_jobs_in_flight(kind: &str, delta: f64) {
    let labels = [("kind", kind.to_string())];
    gauge!(names::JOBS_IN_FLIGHT, &labels).increment(delta);
}

pub fn record_project_created() {
    counter!(names::PROJECTS_CREATED_TOTAL).increment(1);
}

pub fn record_project_composed() {
    counter!(names::PROJECTS_COMPOSED_TOTAL).increment(1);
}
