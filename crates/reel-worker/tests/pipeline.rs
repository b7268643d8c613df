//! End-to-end sequencer tests against in-memory collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reel_models::{
    AssetRef, GenerationRequest, MusicMood, ProgressMessage, ProjectId, ProjectStatus, RemoteJobId,
    RenderedArtifact, Script, Segment, Stage, Voiceover,
};
use reel_worker::{
    cancel_pair, CancelSignal, ClipJobProducer, Collaborators, CompositionRequest, ImageJobProducer,
    MusicLibrary, PipelineConfig, ProgressChannel, ProjectStore, RemoteFailure, RemoteStatus,
    RenderCapability, ScriptGenerator, StageSequencer, VoiceoverGenerator, WorkerError,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeScript {
    failure: Mutex<Option<RemoteFailure>>,
    calls: AtomicU32,
}

#[async_trait]
impl ScriptGenerator for FakeScript {
    async fn generate_script(
        &self,
        topic: &str,
        era: &str,
        _word_budget: u32,
    ) -> Result<Script, RemoteFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.failure.lock().unwrap().clone() {
            return Err(failure);
        }
        Ok(Script {
            title: topic.to_string(),
            hook: "What really happened?".into(),
            era: era.to_string(),
            segments: (0..5)
                .map(|i| Segment {
                    index: i,
                    narration_text: format!("Beat {} of the story.", i),
                    visual_prompt: format!("cinematic shot {}", i),
                    planned_duration_secs: 6.0,
                })
                .collect(),
            music_mood: MusicMood::Suspense,
        })
    }
}

struct FakeVoiceover {
    duration_secs: Mutex<f64>,
    calls: AtomicU32,
}

impl FakeVoiceover {
    fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs: Mutex::new(duration_secs),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl VoiceoverGenerator for FakeVoiceover {
    async fn synthesize_voiceover(&self, _script: &Script) -> Result<Voiceover, RemoteFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Voiceover {
            audio: AssetRef::new("voiceover.mp3"),
            duration_secs: *self.duration_secs.lock().unwrap(),
        })
    }
}

/// Job producer whose per-index behavior can be changed between runs.
struct FakeJobs {
    kind: &'static str,
    failing: Mutex<HashSet<u32>>,
    hanging: Mutex<HashSet<u32>>,
    submitted: Mutex<Vec<u32>>,
    sources: Mutex<Vec<String>>,
    jobs: Mutex<HashMap<String, u32>>,
    counter: AtomicU32,
}

impl FakeJobs {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            failing: Mutex::default(),
            hanging: Mutex::default(),
            submitted: Mutex::default(),
            sources: Mutex::default(),
            jobs: Mutex::default(),
            counter: AtomicU32::new(0),
        }
    }

    fn fail(&self, indices: &[u32]) {
        *self.failing.lock().unwrap() = indices.iter().copied().collect();
    }

    fn hang(&self, indices: &[u32]) {
        *self.hanging.lock().unwrap() = indices.iter().copied().collect();
    }

    /// Distinct segment indices submitted so far, sorted.
    fn submitted_indices(&self) -> Vec<u32> {
        let mut indices = self.submitted.lock().unwrap().clone();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    fn clear_submissions(&self) {
        self.submitted.lock().unwrap().clear();
    }

    fn submit(&self, index: u32) -> RemoteJobId {
        self.submitted.lock().unwrap().push(index);
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-{}-{}", self.kind, index, n);
        self.jobs.lock().unwrap().insert(id.clone(), index);
        RemoteJobId::new(id)
    }

    fn poll(&self, job: &RemoteJobId) -> Result<RemoteStatus, RemoteFailure> {
        let index = *self
            .jobs
            .lock()
            .unwrap()
            .get(job.as_str())
            .ok_or_else(|| RemoteFailure::permanent("unknown job"))?;
        if self.hanging.lock().unwrap().contains(&index) {
            return Ok(RemoteStatus::Running);
        }
        if self.failing.lock().unwrap().contains(&index) {
            return Ok(RemoteStatus::Failed(RemoteFailure::transient("generator overloaded")));
        }
        let asset = AssetRef::new(format!("https://cdn.test/{}/{}", self.kind, index));
        Ok(RemoteStatus::Succeeded(if self.kind == "clip" {
            asset.with_duration(5.0)
        } else {
            asset
        }))
    }
}

#[async_trait]
impl ImageJobProducer for FakeJobs {
    async fn submit_image_job(&self, segment: &Segment) -> Result<RemoteJobId, RemoteFailure> {
        Ok(self.submit(segment.index))
    }

    async fn poll_image_job(&self, job: &RemoteJobId) -> Result<RemoteStatus, RemoteFailure> {
        self.poll(job)
    }
}

#[async_trait]
impl ClipJobProducer for FakeJobs {
    async fn submit_clip_job(
        &self,
        segment: &Segment,
        source_image: &AssetRef,
    ) -> Result<RemoteJobId, RemoteFailure> {
        self.sources.lock().unwrap().push(source_image.uri.clone());
        Ok(self.submit(segment.index))
    }

    async fn poll_clip_job(&self, job: &RemoteJobId) -> Result<RemoteStatus, RemoteFailure> {
        self.poll(job)
    }
}

#[derive(Default)]
struct FakeRenderer {
    /// Added to the target to produce the rendered duration
    drift_secs: Mutex<f64>,
    calls: AtomicU32,
    last_request: Mutex<Option<CompositionRequest>>,
}

#[async_trait]
impl RenderCapability for FakeRenderer {
    async fn compose(&self, request: &CompositionRequest) -> Result<RenderedArtifact, RemoteFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        Ok(RenderedArtifact {
            asset: AssetRef::new(format!("final/{}.mp4", request.project_id)),
            duration_secs: f64::from(request.target_duration_secs) + *self.drift_secs.lock().unwrap(),
            width: 1080,
            height: 1920,
            fps: 30,
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    sequencer: Arc<StageSequencer>,
    script: Arc<FakeScript>,
    voiceover: Arc<FakeVoiceover>,
    images: Arc<FakeJobs>,
    clips: Arc<FakeJobs>,
    renderer: Arc<FakeRenderer>,
}

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.executor.retry_backoff = Duration::from_millis(10);
    config.executor.poll_interval = Duration::from_millis(10);
    config.executor.job_timeout = Duration::from_secs(5);
    config.stage_timeout = Duration::from_secs(120);
    config
}

fn harness_with(voiceover_secs: f64, config: PipelineConfig, music: Option<MusicLibrary>) -> Harness {
    let script = Arc::new(FakeScript::default());
    let voiceover = Arc::new(FakeVoiceover::new(voiceover_secs));
    let images = Arc::new(FakeJobs::new("image"));
    let clips = Arc::new(FakeJobs::new("clip"));
    let renderer = Arc::new(FakeRenderer::default());

    let collaborators = Collaborators {
        script: script.clone(),
        voiceover: voiceover.clone(),
        images: images.clone(),
        clips: clips.clone(),
        renderer: renderer.clone(),
        music: music.map(|m| Arc::new(m) as Arc<dyn reel_worker::MusicSource>),
    };
    let sequencer = StageSequencer::new(config, collaborators, ProjectStore::new(), ProgressChannel::default())
        .unwrap();

    Harness {
        sequencer: Arc::new(sequencer),
        script,
        voiceover,
        images,
        clips,
        renderer,
    }
}

fn harness(voiceover_secs: f64) -> Harness {
    harness_with(voiceover_secs, test_config(), None)
}

async fn create(h: &Harness) -> ProjectId {
    h.sequencer
        .create_project(GenerationRequest::new("The siege of Chittorgarh", "medieval"))
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_full_run_reaches_composed() {
    let h = harness(28.0);
    let id = create(&h).await;

    let snapshot = h.sequencer.run(&id, &CancelSignal::never()).await.unwrap();

    assert_eq!(snapshot.status, ProjectStatus::Composed);
    assert_eq!(snapshot.progress, 100);
    assert_eq!(snapshot.scene_count, Some(6));
    assert_eq!(snapshot.target_duration_secs, Some(30));
    assert_eq!(snapshot.images.len(), 6);
    assert_eq!(snapshot.clips.len(), 6);
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.output.unwrap().asset.uri, format!("final/{}.mp4", id));

    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);
    let request = h.renderer.last_request.lock().unwrap().clone().unwrap();
    let clip_uris: Vec<String> = request.clips.iter().map(|c| c.uri.clone()).collect();
    let expected: Vec<String> = (0..6).map(|i| format!("https://cdn.test/clip/{}", i)).collect();
    assert_eq!(clip_uris, expected);
    assert_eq!(request.captions.cues.len(), 6);
    assert!(request.music.is_none());
    assert!(request.reconciliation.is_none());
    assert_eq!(request.mix.music_level, 0.18);

    // Each clip animates the image of its own segment.
    let sources = h.clips.sources.lock().unwrap().clone();
    assert_eq!(sources.len(), 6);
    assert!(sources.iter().all(|s| s.starts_with("https://cdn.test/image/")));
}

#[tokio::test(start_paused = true)]
async fn test_composed_project_runs_are_noops() {
    let h = harness(28.0);
    let id = create(&h).await;
    h.sequencer.run(&id, &CancelSignal::never()).await.unwrap();

    let again = h.sequencer.run(&id, &CancelSignal::never()).await.unwrap();
    assert_eq!(again.status, ProjectStatus::Composed);
    assert_eq!(h.script.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_partial_image_failure_keeps_successful_images() {
    let h = harness(36.4); // 8 scenes
    h.images.fail(&[2, 5]);
    let id = create(&h).await;

    let err = h.sequencer.run(&id, &CancelSignal::never()).await.unwrap_err();
    match &err {
        WorkerError::PartialStage {
            stage,
            failed,
            succeeded,
            ..
        } => {
            assert_eq!(*stage, Stage::Images);
            assert_eq!(failed, &vec![2, 5]);
            assert_eq!(*succeeded, 6);
        }
        other => panic!("expected partial stage failure, got {:?}", other),
    }

    let snapshot = h.sequencer.store().snapshot(&id).await.unwrap();
    assert_eq!(snapshot.status, ProjectStatus::Failed);
    assert_eq!(snapshot.scene_count, Some(8));
    assert_eq!(snapshot.images.len(), 6);
    assert!(!snapshot.images.contains_key(&2));
    assert!(!snapshot.images.contains_key(&5));

    let error = snapshot.error.unwrap();
    assert_eq!(error.stage, Stage::Images);
    assert_eq!(error.failed_segments, vec![2, 5]);
    assert!(error.to_string().contains("images stage failed"));
    assert!(error.to_string().contains("failed segments: 2, 5"));

    // Three attempts each for the failing segments, one for the rest.
    assert_eq!(h.images.submissions(), 6 + 2 * 3);
    assert_eq!(h.clips.submissions(), 0);
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resume_only_regenerates_missing_segments() {
    let h = harness(36.4);
    h.images.fail(&[2, 5]);
    let id = create(&h).await;
    h.sequencer.run(&id, &CancelSignal::never()).await.unwrap_err();

    h.images.fail(&[]);
    h.images.clear_submissions();

    let snapshot = h.sequencer.resume(&id, &CancelSignal::never()).await.unwrap();

    assert_eq!(snapshot.status, ProjectStatus::Composed);
    assert_eq!(snapshot.run, 2);
    assert_eq!(h.images.submitted_indices(), vec![2, 5]);
    assert_eq!(h.images.submissions(), 2);
    assert_eq!(h.clips.submitted_indices(), (0..8).collect::<Vec<u32>>());
    assert_eq!(h.script.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.voiceover.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_status_never_regresses() {
    let h = harness(53.0); // clamped to 10 scenes
    let id = create(&h).await;
    let mut rx = h.sequencer.progress().subscribe();

    h.sequencer.run(&id, &CancelSignal::never()).await.unwrap();

    let mut completed = Vec::new();
    let mut job_events = 0;
    let mut last_seq = 0;
    let mut done = false;
    while let Ok(event) = rx.try_recv() {
        assert!(event.seq > last_seq);
        last_seq = event.seq;
        match event.message {
            ProgressMessage::StageCompleted { status, .. } => completed.push(status),
            ProgressMessage::JobFinished { .. } => job_events += 1,
            ProgressMessage::Done { .. } => done = true,
            _ => {}
        }
    }

    assert_eq!(
        completed,
        vec![
            ProjectStatus::ScriptReady,
            ProjectStatus::VoiceoverReady,
            ProjectStatus::ImagesReady,
            ProjectStatus::ClipsReady,
            ProjectStatus::Composed,
        ]
    );
    let ranks: Vec<u8> = completed.iter().filter_map(|s| s.rank()).collect();
    assert!(ranks.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(job_events, 20);
    assert!(done);
}

#[tokio::test(start_paused = true)]
async fn test_script_failure_is_immediate_and_not_retried() {
    let h = harness(28.0);
    *h.script.failure.lock().unwrap() = Some(RemoteFailure::transient("LLM rate limited"));
    let id = create(&h).await;

    let err = h.sequencer.run(&id, &CancelSignal::never()).await.unwrap_err();
    assert!(matches!(err, WorkerError::TransientRemote(_)));
    assert_eq!(h.script.calls.load(Ordering::SeqCst), 1);

    let snapshot = h.sequencer.store().snapshot(&id).await.unwrap();
    assert_eq!(snapshot.status, ProjectStatus::Failed);
    let error = snapshot.error.unwrap();
    assert_eq!(error.stage, Stage::Script);
    assert!(error.cause.contains("LLM rate limited"));
    assert_eq!(h.voiceover.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_voiceover_duration_fails_voiceover_stage() {
    let h = harness(0.0);
    let id = create(&h).await;

    let err = h.sequencer.run(&id, &CancelSignal::never()).await.unwrap_err();
    assert!(err.is_invalid_input());

    let snapshot = h.sequencer.store().snapshot(&id).await.unwrap();
    assert_eq!(snapshot.error.unwrap().stage, Stage::Voiceover);
    assert!(snapshot.voiceover.is_none());
    assert!(snapshot.scene_count.is_none());
    // The script survives for the next run.
    assert!(snapshot.script_title.is_some());

    *h.voiceover.duration_secs.lock().unwrap() = 28.0;
    let snapshot = h.sequencer.resume(&id, &CancelSignal::never()).await.unwrap();
    assert_eq!(snapshot.status, ProjectStatus::Composed);
    assert_eq!(h.script.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_off_target_render_fails_composition() {
    let h = harness(28.0);
    *h.renderer.drift_secs.lock().unwrap() = 4.5;
    let id = create(&h).await;

    let err = h.sequencer.run(&id, &CancelSignal::never()).await.unwrap_err();
    assert!(err.is_invariant_violation());
    let snapshot = h.sequencer.store().snapshot(&id).await.unwrap();
    assert_eq!(snapshot.error.unwrap().stage, Stage::Composition);
    assert!(snapshot.output.is_none());

    *h.renderer.drift_secs.lock().unwrap() = 0.5;
    let image_submissions = h.images.submissions();
    let snapshot = h.sequencer.resume(&id, &CancelSignal::never()).await.unwrap();
    assert_eq!(snapshot.status, ProjectStatus::Composed);
    assert_eq!(h.images.submissions(), image_submissions);
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_before_start_marks_failed() {
    let h = harness(28.0);
    let id = create(&h).await;
    let (handle, signal) = cancel_pair();
    handle.cancel();

    let err = h.sequencer.run(&id, &signal).await.unwrap_err();
    assert!(matches!(err, WorkerError::Cancelled));

    let snapshot = h.sequencer.store().snapshot(&id).await.unwrap();
    assert_eq!(snapshot.status, ProjectStatus::Failed);
    assert_eq!(snapshot.error.unwrap().stage, Stage::Script);
    assert_eq!(h.script.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_mid_stage_preserves_artifacts() {
    let h = harness(28.0);
    h.images.hang(&[3]);
    let id = create(&h).await;

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
    });

    let err = h.sequencer.run(&id, &signal).await.unwrap_err();
    assert!(matches!(err, WorkerError::Cancelled));

    let snapshot = h.sequencer.store().snapshot(&id).await.unwrap();
    assert_eq!(snapshot.status, ProjectStatus::Failed);
    assert_eq!(snapshot.error.unwrap().stage, Stage::Images);
    assert_eq!(snapshot.images.len(), 5);
    assert!(!snapshot.images.contains_key(&3));
}

#[tokio::test(start_paused = true)]
async fn test_stage_timeout_preserves_artifacts() {
    let mut config = test_config();
    config.stage_timeout = Duration::from_secs(2);
    config.executor.job_timeout = Duration::from_secs(60);
    let h = harness_with(28.0, config, None);
    h.images.hang(&[0]);
    let id = create(&h).await;

    let err = h.sequencer.run(&id, &CancelSignal::never()).await.unwrap_err();
    assert!(matches!(err, WorkerError::StageTimeout { stage: Stage::Images, .. }));

    let snapshot = h.sequencer.store().snapshot(&id).await.unwrap();
    assert_eq!(snapshot.images.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_run_of_same_project_is_rejected() {
    let h = harness(28.0);
    h.images.hang(&[0, 1, 2, 3, 4, 5]);
    let id = create(&h).await;

    let (handle, signal) = cancel_pair();
    let sequencer = Arc::clone(&h.sequencer);
    let run_id = id.clone();
    let first = tokio::spawn(async move { sequencer.run(&run_id, &signal).await });

    while !h.sequencer.store().is_running(&id) {
        tokio::task::yield_now().await;
    }

    let err = h.sequencer.run(&id, &CancelSignal::never()).await.unwrap_err();
    assert!(matches!(err, WorkerError::ProjectBusy(_)));
    let err = h.sequencer.resume(&id, &CancelSignal::never()).await.unwrap_err();
    assert!(matches!(err, WorkerError::ProjectBusy(_)));

    handle.cancel();
    let result = first.await.unwrap();
    assert!(matches!(result, Err(WorkerError::Cancelled)));
    assert!(!h.sequencer.store().is_running(&id));
}

#[tokio::test(start_paused = true)]
async fn test_run_stage_enforces_order() {
    let h = harness(28.0);
    let id = create(&h).await;

    let err = h
        .sequencer
        .run_stage(&id, Stage::Images, &CancelSignal::never())
        .await
        .unwrap_err();
    assert!(err.is_invalid_input());

    let snapshot = h
        .sequencer
        .run_stage(&id, Stage::Script, &CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(snapshot.status, ProjectStatus::ScriptReady);
    assert_eq!(snapshot.progress, 10);
}

#[tokio::test(start_paused = true)]
async fn test_resume_requires_failed_project() {
    let h = harness(28.0);
    let id = create(&h).await;
    let err = h.sequencer.resume(&id, &CancelSignal::never()).await.unwrap_err();
    assert!(err.is_invalid_input());

    let missing = ProjectId::from_string("missing");
    let err = h.sequencer.run(&missing, &CancelSignal::never()).await.unwrap_err();
    assert!(matches!(err, WorkerError::ProjectNotFound(_)));
}

#[tokio::test]
async fn test_empty_topic_is_rejected() {
    let h = harness(28.0);
    let err = h
        .sequencer
        .create_project(GenerationRequest::new("   ", "modern"))
        .await
        .unwrap_err();
    assert!(err.is_invalid_input());
    assert!(h.sequencer.store().list().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_music_follows_script_mood() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("suspense")).unwrap();
    std::fs::write(tmp.path().join("suspense/tension.mp3"), b"").unwrap();
    std::fs::create_dir_all(tmp.path().join("general")).unwrap();
    std::fs::write(tmp.path().join("general/ambient.mp3"), b"").unwrap();

    let h = harness_with(28.0, test_config(), Some(MusicLibrary::new(tmp.path())));
    let id = create(&h).await;
    let snapshot = h.sequencer.run(&id, &CancelSignal::never()).await.unwrap();

    let music = snapshot.music.unwrap();
    assert!(music.uri.ends_with("tension.mp3"));
    let request = h.renderer.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(request.music, Some(music));
}
