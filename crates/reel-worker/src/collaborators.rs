//! Capabilities the pipeline drives but does not implement.
//!
//! Script writing, speech synthesis, image and clip generation, rendering and
//! music selection are all external. The sequencer only sees these traits,
//! so tests substitute fakes and production wires in HTTP-backed producers.

use std::sync::Arc;

use async_trait::async_trait;
use reel_models::{AssetRef, MusicMood, RemoteJobId, RenderedArtifact, Script, Segment, Voiceover};

use crate::composition::CompositionRequest;
use crate::error::RemoteFailure;

/// Status of a remote generation job as reported by a poll.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStatus {
    /// Accepted but not started
    Pending,
    /// Generating
    Running,
    /// Finished with an artifact
    Succeeded(AssetRef),
    /// Finished without an artifact
    Failed(RemoteFailure),
}

/// Writes the narration script for a topic.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate_script(
        &self,
        topic: &str,
        era: &str,
        word_budget: u32,
    ) -> Result<Script, RemoteFailure>;
}

/// Synthesizes the narration track and reports its measured length.
#[async_trait]
pub trait VoiceoverGenerator: Send + Sync {
    async fn synthesize_voiceover(&self, script: &Script) -> Result<Voiceover, RemoteFailure>;
}

/// Asynchronous image generation, one job per segment.
#[async_trait]
pub trait ImageJobProducer: Send + Sync {
    async fn submit_image_job(&self, segment: &Segment) -> Result<RemoteJobId, RemoteFailure>;

    async fn poll_image_job(&self, job: &RemoteJobId) -> Result<RemoteStatus, RemoteFailure>;
}

/// Asynchronous image-to-clip animation, one job per segment.
#[async_trait]
pub trait ClipJobProducer: Send + Sync {
    async fn submit_clip_job(
        &self,
        segment: &Segment,
        source_image: &AssetRef,
    ) -> Result<RemoteJobId, RemoteFailure>;

    async fn poll_clip_job(&self, job: &RemoteJobId) -> Result<RemoteStatus, RemoteFailure>;
}

/// Renders the final composite from a complete composition request.
#[async_trait]
pub trait RenderCapability: Send + Sync {
    async fn compose(&self, request: &CompositionRequest) -> Result<RenderedArtifact, RemoteFailure>;
}

/// Picks a background track. `Ok(None)` means no track is available.
#[async_trait]
pub trait MusicSource: Send + Sync {
    async fn select_track(
        &self,
        mood: MusicMood,
        seed: &str,
    ) -> Result<Option<AssetRef>, RemoteFailure>;
}

/// Uniform submit/poll surface the job executor runs against.
#[async_trait]
pub trait JobBackend: Send + Sync + 'static {
    /// Per-job input
    type Spec: Send + Sync + 'static;

    /// Short name for logs and metrics.
    fn kind(&self) -> &'static str;

    async fn submit(&self, spec: &Self::Spec) -> Result<RemoteJobId, RemoteFailure>;

    async fn poll(&self, job: &RemoteJobId) -> Result<RemoteStatus, RemoteFailure>;
}

/// Runs image jobs through an [`ImageJobProducer`].
pub struct ImageBackend(pub Arc<dyn ImageJobProducer>);

#[async_trait]
impl JobBackend for ImageBackend {
    type Spec = Segment;

    fn kind(&self) -> &'static str {
        "image"
    }

    async fn submit(&self, spec: &Segment) -> Result<RemoteJobId, RemoteFailure> {
        self.0.submit_image_job(spec).await
    }

    async fn poll(&self, job: &RemoteJobId) -> Result<RemoteStatus, RemoteFailure> {
        self.0.poll_image_job(job).await
    }
}

/// Input for one clip job: the scene and the image it animates.
#[derive(Debug, Clone)]
pub struct ClipInput {
    pub segment: Segment,
    pub source_image: AssetRef,
}

/// Runs clip jobs through a [`ClipJobProducer`].
pub struct ClipBackend(pub Arc<dyn ClipJobProducer>);

#[async_trait]
impl JobBackend for ClipBackend {
    type Spec = ClipInput;

    fn kind(&self) -> &'static str {
        "clip"
    }

    async fn submit(&self, spec: &ClipInput) -> Result<RemoteJobId, RemoteFailure> {
        self.0.submit_clip_job(&spec.segment, &spec.source_image).await
    }

    async fn poll(&self, job: &RemoteJobId) -> Result<RemoteStatus, RemoteFailure> {
        self.0.poll_clip_job(job).await
    }
}

/// The full set of external capabilities handed to the sequencer.
#[derive(Clone)]
pub struct Collaborators {
    pub script: Arc<dyn ScriptGenerator>,
    pub voiceover: Arc<dyn VoiceoverGenerator>,
    pub images: Arc<dyn ImageJobProducer>,
    pub clips: Arc<dyn ClipJobProducer>,
    pub renderer: Arc<dyn RenderCapability>,
    /// Optional; composition proceeds without music when absent
    pub music: Option<Arc<dyn MusicSource>>,
}
