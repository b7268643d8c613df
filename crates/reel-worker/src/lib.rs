//! Video generation pipeline worker.
//!
//! This crate provides:
//! - Stage sequencing from topic to composite (script, voiceover, images,
//!   clips, composition) with a single writer per project
//! - Duration planning from the measured voiceover
//! - Bounded, retrying, cancellable execution of per-segment generation jobs
//! - The composition contract handed to the renderer and checked on return
//! - Music selection, caption timing, progress events and the project store

pub mod captions;
pub mod collaborators;
pub mod composition;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod music;
pub mod planner;
pub mod producers;
pub mod progress;
pub mod retry;
pub mod sequencer;
pub mod store;

pub use captions::{CaptionCue, CaptionSpec};
pub use collaborators::{
    ClipJobProducer, Collaborators, ImageJobProducer, JobBackend, MusicSource, RemoteStatus,
    RenderCapability, ScriptGenerator, VoiceoverGenerator,
};
pub use composition::{AudioMix, CompositionContract, CompositionRequest, OutputFormat, SpeedAdjustment};
pub use config::{CompositionConfig, ExecutorConfig, MusicConfig, PipelineConfig, PlannerConfig};
pub use error::{RemoteFailure, WorkerError, WorkerResult};
pub use executor::{cancel_pair, BoundedJobExecutor, CancelHandle, CancelSignal, JobFailure, JobReport, JobSetOutcome};
pub use logging::{init_tracing, ProjectLogger};
pub use music::MusicLibrary;
pub use planner::plan;
pub use producers::{ClipModelConfig, ImageModelConfig, PredictionClipProducer, PredictionImageProducer};
pub use progress::{ProgressChannel, ProgressEvent};
pub use retry::RetryPolicy;
pub use sequencer::StageSequencer;
pub use store::ProjectStore;
