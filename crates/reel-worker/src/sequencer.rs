//! Stage sequencer.
//!
//! Drives a project through script, voiceover, images, clips and
//! composition. Each transition reads its input fresh from the store, calls
//! one collaborator (or the job executor for image and clip sets), and writes
//! the result back. Any stage failure moves the project to `Failed` with the
//! stage and cause; artifacts already produced stay on the project so a
//! later `resume` only regenerates what is missing.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use reel_models::{
    AssetRef, ErrorInfo, GenerationRequest, Project, ProjectError, ProjectId, ProjectSnapshot,
    ProjectStatus, Segment, Stage,
};
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use crate::collaborators::{ClipBackend, ClipInput, Collaborators, ImageBackend, JobBackend};
use crate::composition::CompositionContract;
use crate::config::PipelineConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::executor::{cancel_pair, BoundedJobExecutor, CancelSignal, JobSetOutcome};
use crate::logging::ProjectLogger;
use crate::metrics;
use crate::planner;
use crate::progress::ProgressChannel;
use crate::store::ProjectStore;

/// Single writer for project state.
pub struct StageSequencer {
    config: Arc<PipelineConfig>,
    collaborators: Collaborators,
    store: ProjectStore,
    progress: ProgressChannel,
    executor: Arc<BoundedJobExecutor>,
    contract: CompositionContract,
}

impl StageSequencer {
    /// Create a sequencer. Rejects an invalid configuration.
    pub fn new(
        config: PipelineConfig,
        collaborators: Collaborators,
        store: ProjectStore,
        progress: ProgressChannel,
    ) -> WorkerResult<Self> {
        config.validate()?;
        let executor = Arc::new(BoundedJobExecutor::new(config.executor.clone()));
        let contract = CompositionContract::new(config.composition.clone(), config.planner.scene_secs);
        Ok(Self {
            config: Arc::new(config),
            collaborators,
            store,
            progress,
            executor,
            contract,
        })
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    /// Accept a generation request and register a new project.
    pub async fn create_project(&self, request: GenerationRequest) -> WorkerResult<ProjectId> {
        if request.topic.trim().is_empty() {
            return Err(WorkerError::invalid_input("topic must not be empty"));
        }
        if request.target_word_budget == Some(0) {
            return Err(WorkerError::invalid_input("word budget must be positive"));
        }

        let id = self.store.insert(Project::new(request)).await;
        metrics::record_project_created();
        ProjectLogger::new(&id).log_progress("project created");
        Ok(id)
    }

    /// Run a project from its current status until it is composed or fails.
    ///
    /// A composed project is returned as is. A failed project must go
    /// through [`resume`](Self::resume).
    pub async fn run(&self, id: &ProjectId, cancel: &CancelSignal) -> WorkerResult<ProjectSnapshot> {
        let _lease = self.store.acquire_lease(id)?;
        let project = self.store.read(id).await?;
        match project.status() {
            ProjectStatus::Composed => return self.store.snapshot(id).await,
            ProjectStatus::Failed => {
                return Err(WorkerError::invalid_input(format!(
                    "project {} has failed; resume it to run again",
                    id
                )))
            }
            _ => {}
        }

        let logger = ProjectLogger::new(id);
        self.drive(id, cancel)
            .instrument(logger.create_span(project.run()))
            .await
    }

    /// Re-run a failed project from its last checkpoint, keeping every
    /// artifact already produced.
    pub async fn resume(&self, id: &ProjectId, cancel: &CancelSignal) -> WorkerResult<ProjectSnapshot> {
        let _lease = self.store.acquire_lease(id)?;
        let project = self.store.read(id).await?;
        if project.status() != ProjectStatus::Failed {
            return Err(WorkerError::invalid_input(format!(
                "only failed projects can be resumed; project {} is {}",
                id,
                project.status()
            )));
        }

        let run = self
            .store
            .update(id, |p| -> Result<u32, ProjectError> {
                p.resume()?;
                Ok(p.run())
            })
            .await?;

        let logger = ProjectLogger::new(id);
        logger.log_progress(&format!(
            "resuming run {} from {} ({} images, {} clips kept)",
            run,
            project.checkpoint(),
            project.images().len(),
            project.clips().len()
        ));

        self.drive(id, cancel).instrument(logger.create_span(run)).await
    }

    /// Perform exactly one stage transition. `stage` must be the next stage
    /// for the project's current status.
    pub async fn run_stage(
        &self,
        id: &ProjectId,
        stage: Stage,
        cancel: &CancelSignal,
    ) -> WorkerResult<ProjectSnapshot> {
        let _lease = self.store.acquire_lease(id)?;
        let project = self.store.read(id).await?;
        if project.status().next_stage() != Some(stage) {
            return Err(WorkerError::invalid_input(format!(
                "cannot run {} stage from status {}",
                stage,
                project.status()
            )));
        }

        self.execute_stage(id, stage, cancel).await?;
        self.store.snapshot(id).await
    }

    async fn drive(&self, id: &ProjectId, cancel: &CancelSignal) -> WorkerResult<ProjectSnapshot> {
        loop {
            let project = self.store.read(id).await?;
            let Some(stage) = project.status().next_stage() else {
                break;
            };
            self.execute_stage(id, stage, cancel).await?;
        }
        self.store.snapshot(id).await
    }

    /// One stage transition with its failure recorded on the project.
    async fn execute_stage(
        &self,
        id: &ProjectId,
        stage: Stage,
        cancel: &CancelSignal,
    ) -> WorkerResult<ProjectStatus> {
        let logger = ProjectLogger::new(id).for_stage(stage);

        if cancel.is_cancelled() {
            let err = WorkerError::Cancelled;
            self.record_failure(id, stage, &err, &logger).await;
            return Err(err);
        }

        logger.log_start(stage.as_str());
        metrics::record_stage_started(stage);
        self.progress.stage_started(id, stage);
        let started = Instant::now();

        // Job-set stages enforce the stage timeout through their cancel
        // signal so that partial results survive it.
        let result = if stage.is_job_set() {
            self.job_set_stage(id, stage, cancel, &logger).await
        } else {
            self.bounded(stage, cancel, self.single_call_stage(id, stage, &logger))
                .await
        };
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                let status = self
                    .store
                    .update(id, |p| -> Result<ProjectStatus, ProjectError> {
                        p.advance(stage.completes_to())?;
                        Ok(p.status())
                    })
                    .await;
                let status = match status {
                    Ok(status) => status,
                    Err(err) => {
                        self.record_failure(id, stage, &err, &logger).await;
                        metrics::record_stage_finished(stage, Some(err.failure_class()), elapsed);
                        return Err(err);
                    }
                };

                metrics::record_stage_finished(stage, None, elapsed);
                logger.log_completion(&format!("{} in {:.1}s", status, elapsed));
                self.progress.stage_completed(id, stage, status);

                if status == ProjectStatus::Composed {
                    metrics::record_project_composed();
                    let snapshot = self.store.snapshot(id).await?;
                    if let Some(output) = snapshot.output {
                        self.progress.done(id, output.asset.uri);
                    }
                }
                Ok(status)
            }
            Err(err) => {
                metrics::record_stage_finished(stage, Some(err.failure_class()), elapsed);
                self.record_failure(id, stage, &err, &logger).await;
                Err(err)
            }
        }
    }

    /// Bound a single-call stage by the stage timeout and cancellation.
    async fn bounded<F>(&self, stage: Stage, cancel: &CancelSignal, work: F) -> WorkerResult<()>
    where
        F: Future<Output = WorkerResult<()>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            result = tokio::time::timeout(self.config.stage_timeout, work) => {
                result.unwrap_or_else(|_| Err(self.stage_timeout(stage)))
            }
        }
    }

    fn stage_timeout(&self, stage: Stage) -> WorkerError {
        WorkerError::StageTimeout {
            stage,
            secs: self.config.stage_timeout.as_secs(),
        }
    }

    async fn record_failure(&self, id: &ProjectId, stage: Stage, err: &WorkerError, logger: &ProjectLogger) {
        logger.log_error(&format!("{} [{}]", err, err.failure_class()));
        let info = ErrorInfo::new(stage, err.to_string()).with_failed_segments(err.failed_segments().to_vec());
        let message = info.to_string();

        if let Err(e) = self.store.update(id, |p| p.fail(info)).await {
            warn!(project_id = %id, stage = stage.as_str(), "Could not mark project failed: {}", e);
            return;
        }
        self.progress.error(id, Some(stage), message);
    }

    async fn single_call_stage(&self, id: &ProjectId, stage: Stage, logger: &ProjectLogger) -> WorkerResult<()> {
        match stage {
            Stage::Script => self.script_stage(id, logger).await,
            Stage::Voiceover => self.voiceover_stage(id, logger).await,
            Stage::Composition => self.composition_stage(id, logger).await,
            Stage::Images | Stage::Clips => Err(WorkerError::invariant(format!(
                "{} stage runs as a job set",
                stage
            ))),
        }
    }

    async fn job_set_stage(
        &self,
        id: &ProjectId,
        stage: Stage,
        cancel: &CancelSignal,
        logger: &ProjectLogger,
    ) -> WorkerResult<()> {
        match stage {
            Stage::Images => self.images_stage(id, cancel, logger).await,
            Stage::Clips => self.clips_stage(id, cancel, logger).await,
            Stage::Script | Stage::Voiceover | Stage::Composition => Err(WorkerError::invariant(
                format!("{} stage is not a job set", stage),
            )),
        }
    }

    async fn script_stage(&self, id: &ProjectId, logger: &ProjectLogger) -> WorkerResult<()> {
        let project = self.store.read(id).await?;
        if project.script().is_some() {
            logger.log_progress("reusing existing script");
            return Ok(());
        }

        let request = project.request();
        let word_budget = request
            .target_word_budget
            .unwrap_or(self.config.default_word_budget);
        let script = self
            .collaborators
            .script
            .generate_script(&request.topic, &request.era, word_budget)
            .await?;

        if let Err(reason) = script.validate() {
            return Err(WorkerError::permanent(format!(
                "script generator returned an unusable script: {}",
                reason
            )));
        }

        let words = script.full_narration().split_whitespace().count();
        if words > word_budget as usize {
            logger.log_warning(&format!("narration runs {} words over a budget of {}", words, word_budget));
        }
        logger.log_progress(&format!(
            "script \"{}\" with {} segments, {} words",
            script.title,
            script.segments.len(),
            words
        ));
        self.store.update(id, |p| p.set_script(script)).await
    }

    /// Synthesize narration, plan the duration and fit the scenes. The
    /// voiceover, plan and scenes are written together or not at all.
    async fn voiceover_stage(&self, id: &ProjectId, logger: &ProjectLogger) -> WorkerResult<()> {
        let project = self.store.read(id).await?;
        if project.plan().is_some() {
            logger.log_progress("reusing existing duration plan");
            return Ok(());
        }
        let script = project
            .script()
            .cloned()
            .ok_or_else(|| WorkerError::invariant("voiceover stage requires a script"))?;

        let voiceover = match project.voiceover() {
            Some(existing) => existing.clone(),
            None => self.collaborators.voiceover.synthesize_voiceover(&script).await?,
        };

        let plan = planner::plan(&self.config.planner, voiceover.duration_secs)?;
        let scenes = script.fit_to_scenes(plan.scene_count, f64::from(self.config.planner.scene_secs));
        logger.log_progress(&format!(
            "voiceover {:.1}s, {} scenes, target {}s",
            voiceover.duration_secs, plan.scene_count, plan.target_duration_secs
        ));

        self.store
            .update(id, |p| -> Result<(), ProjectError> {
                if p.voiceover().is_none() {
                    p.set_voiceover(voiceover)?;
                }
                p.set_plan(plan, scenes)
            })
            .await
    }

    async fn images_stage(&self, id: &ProjectId, cancel: &CancelSignal, logger: &ProjectLogger) -> WorkerResult<()> {
        let project = self.store.read(id).await?;
        let jobs: Vec<(u32, Segment)> = project
            .missing_images()
            .into_iter()
            .map(|index| scene(&project, index).map(|s| (index, s.clone())))
            .collect::<WorkerResult<_>>()?;

        let backend = Arc::new(ImageBackend(Arc::clone(&self.collaborators.images)));
        self.run_job_set(id, Stage::Images, backend, jobs, &project, cancel, logger)
            .await
    }

    async fn clips_stage(&self, id: &ProjectId, cancel: &CancelSignal, logger: &ProjectLogger) -> WorkerResult<()> {
        let project = self.store.read(id).await?;
        let jobs: Vec<(u32, ClipInput)> = project
            .missing_clips()
            .into_iter()
            .map(|index| -> WorkerResult<(u32, ClipInput)> {
                let segment = scene(&project, index)?.clone();
                let source_image = project.images().get(&index).cloned().ok_or_else(|| {
                    WorkerError::invariant(format!("no image for segment {} to animate", index))
                })?;
                Ok((index, ClipInput { segment, source_image }))
            })
            .collect::<WorkerResult<_>>()?;

        let backend = Arc::new(ClipBackend(Arc::clone(&self.collaborators.clips)));
        self.run_job_set(id, Stage::Clips, backend, jobs, &project, cancel, logger)
            .await
    }

    /// Run the missing jobs of a job-set stage and merge what succeeded.
    #[allow(clippy::too_many_arguments)]
    async fn run_job_set<B: JobBackend>(
        &self,
        id: &ProjectId,
        stage: Stage,
        backend: Arc<B>,
        jobs: Vec<(u32, B::Spec)>,
        project: &Project,
        cancel: &CancelSignal,
        logger: &ProjectLogger,
    ) -> WorkerResult<()> {
        let scene_count = project
            .scene_count()
            .ok_or_else(|| WorkerError::invariant(format!("{} stage requires a duration plan", stage)))?;
        if jobs.is_empty() {
            logger.log_progress("all segments already present");
            return Ok(());
        }
        logger.log_start(&format!("{} of {} segments to generate", jobs.len(), scene_count));

        let (signal, _deadline) = self.stage_signal(cancel);
        let progress = self.progress.clone();
        let outcome = self
            .executor
            .run(backend, jobs, &signal, |report| {
                progress.job_finished(id, stage, report.index, report.result.is_ok(), report.attempts);
            })
            .await;

        let present = self.merge(id, stage, &outcome).await?;
        if outcome.is_complete() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        if outcome.cancelled {
            return Err(self.stage_timeout(stage));
        }
        Err(WorkerError::PartialStage {
            stage,
            failed: outcome.failed_indices(),
            succeeded: present,
            detail: outcome.failure_summary(),
        })
    }

    /// Write every successful artifact to the project in one update.
    /// Returns how many segments now have an artifact for this stage.
    async fn merge(&self, id: &ProjectId, stage: Stage, outcome: &JobSetOutcome) -> WorkerResult<usize> {
        let artifacts: Vec<(u32, AssetRef)> = outcome
            .successes()
            .map(|(index, asset)| (index, asset.clone()))
            .collect();

        self.store
            .update(id, |p| -> Result<usize, ProjectError> {
                for (index, asset) in artifacts {
                    match stage {
                        Stage::Images => p.insert_image(index, asset)?,
                        _ => p.insert_clip(index, asset)?,
                    }
                }
                Ok(match stage {
                    Stage::Images => p.images().len(),
                    _ => p.clips().len(),
                })
            })
            .await
    }

    /// Signal that fires on outer cancellation or when the stage timeout
    /// elapses. The timer stops when the guard drops.
    fn stage_signal(&self, outer: &CancelSignal) -> (CancelSignal, DeadlineGuard) {
        let (handle, signal) = cancel_pair();
        let outer = outer.clone();
        let timeout = self.config.stage_timeout;
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = outer.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {}
            }
            handle.cancel();
        });
        (signal, DeadlineGuard(timer))
    }

    async fn composition_stage(&self, id: &ProjectId, logger: &ProjectLogger) -> WorkerResult<()> {
        let project = self.store.read(id).await?;
        self.contract.check_complete(&project)?;

        let music = match project.music() {
            Some(existing) => Some(existing.clone()),
            None => {
                let selected = self.select_music(&project, logger).await;
                if let Some(track) = &selected {
                    let track = track.clone();
                    self.store.update(id, |p| p.set_music(track)).await?;
                }
                selected
            }
        };

        let request = self.contract.build_request(&project, music)?;
        if let Some(adjustment) = request.reconciliation {
            logger.log_progress(&format!(
                "clip total drifts from {}s target, speed factor {:.3}",
                request.target_duration_secs, adjustment.factor
            ));
        }

        let artifact = self.collaborators.renderer.compose(&request).await?;
        self.contract
            .validate_rendered(&artifact, request.target_duration_secs)?;

        info!(
            project_id = %id,
            output = %artifact.asset.uri,
            duration_secs = artifact.duration_secs,
            "Composite rendered"
        );
        self.store.update(id, |p| p.set_output(artifact)).await
    }

    /// Background track for the project; any failure means no music.
    async fn select_music(&self, project: &Project, logger: &ProjectLogger) -> Option<AssetRef> {
        let source = self.collaborators.music.as_ref()?;
        let mood = project
            .request()
            .mood_hint
            .or_else(|| project.script().map(|s| s.music_mood))
            .unwrap_or_default();

        match source.select_track(mood, project.id().as_str()).await {
            Ok(track) => track,
            Err(e) => {
                logger.log_warning(&format!("music selection failed, composing without music: {}", e));
                None
            }
        }
    }
}

fn scene(project: &Project, index: u32) -> WorkerResult<&Segment> {
    project
        .scenes()
        .get(index as usize)
        .ok_or_else(|| WorkerError::invariant(format!("no scene for segment {}", index)))
}

/// Aborts the stage deadline timer on drop.
struct DeadlineGuard(JoinHandle<()>);

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
