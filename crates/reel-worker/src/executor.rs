//! Bounded job executor.
//!
//! Runs a set of per-segment generation jobs against a [`JobBackend`] with a
//! global cap on jobs in flight, a per-attempt timeout, bounded retries for
//! transient failures and cooperative cancellation. Every job in the set gets
//! a result keyed by its segment index, whatever order they finish in.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use reel_models::{AssetRef, GenerationJob, RemoteJobId};
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::collaborators::{JobBackend, RemoteStatus};
use crate::config::ExecutorConfig;
use crate::error::RemoteFailure;
use crate::metrics;
use crate::retry::RetryPolicy;

/// Sender side of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Receiver side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected cancellation handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            let cancelled = *rx.borrow_and_update();
            if cancelled {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Why a job ended without an artifact.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobFailure {
    /// Permanent failure; never retried
    #[error("rejected on attempt {attempts}: {reason}")]
    Rejected { attempts: u32, reason: String },

    /// Transient failures on every allowed attempt
    #[error("failed after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    /// Stopped by cancellation (`attempts` is 0 if never submitted)
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl JobFailure {
    pub fn attempts(&self) -> u32 {
        match self {
            JobFailure::Rejected { attempts, .. }
            | JobFailure::RetriesExhausted { attempts, .. }
            | JobFailure::Cancelled { attempts } => *attempts,
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            JobFailure::Rejected { .. } => "rejected",
            JobFailure::RetriesExhausted { .. } => "exhausted",
            JobFailure::Cancelled { .. } => "cancelled",
        }
    }
}

/// Final outcome of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub index: u32,
    pub attempts: u32,
    pub result: Result<AssetRef, JobFailure>,
}

impl JobReport {
    fn failed(index: u32, failure: JobFailure) -> Self {
        Self {
            index,
            attempts: failure.attempts(),
            result: Err(failure),
        }
    }
}

/// Results of one job set, keyed by segment index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSetOutcome {
    pub results: BTreeMap<u32, Result<AssetRef, JobFailure>>,
    /// Cancellation was observed before the set finished
    pub cancelled: bool,
}

impl JobSetOutcome {
    /// Artifacts of the jobs that succeeded, in index order.
    pub fn successes(&self) -> impl Iterator<Item = (u32, &AssetRef)> {
        self.results
            .iter()
            .filter_map(|(index, r)| r.as_ref().ok().map(|asset| (*index, asset)))
    }

    pub fn success_count(&self) -> usize {
        self.results.values().filter(|r| r.is_ok()).count()
    }

    pub fn failed_indices(&self) -> Vec<u32> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(index, _)| *index)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.results.values().all(|r| r.is_ok())
    }

    /// Short human-readable account of the first few failures.
    pub fn failure_summary(&self) -> String {
        let failures: Vec<String> = self
            .results
            .iter()
            .filter_map(|(index, r)| r.as_ref().err().map(|f| format!("segment {}: {}", index, f)))
            .collect();
        match failures.len() {
            0 => String::new(),
            n if n <= 3 => failures.join("; "),
            n => format!("{}; and {} more", failures[..3].join("; "), n - 3),
        }
    }
}

/// Executes job sets with a global concurrency bound.
///
/// One executor is shared by every stage and project in a process, so the
/// bound applies to all jobs it runs, not per set.
pub struct BoundedJobExecutor {
    config: ExecutorConfig,
    slots: Arc<Semaphore>,
}

impl BoundedJobExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.concurrency_limit.max(1)));
        Self { config, slots }
    }

    /// Execution slots not currently held by a job.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run every job in `jobs` and collect one result per segment index.
    ///
    /// `on_finished` is called from the calling task as each job reaches its
    /// final outcome. Indices are expected to be unique within a set.
    pub async fn run<B, F>(
        &self,
        backend: Arc<B>,
        jobs: Vec<(u32, B::Spec)>,
        cancel: &CancelSignal,
        mut on_finished: F,
    ) -> JobSetOutcome
    where
        B: JobBackend,
        F: FnMut(&JobReport),
    {
        let kind = backend.kind();
        let policy = RetryPolicy::from_config(&self.config, kind);
        let total = jobs.len();
        info!(
            kind,
            jobs = total,
            concurrency = self.config.concurrency_limit,
            free_slots = self.available_slots(),
            "Starting job set"
        );

        let mut queue: VecDeque<(u32, B::Spec)> = jobs.into();
        let mut running: JoinSet<JobReport> = JoinSet::new();
        let mut dispatched: HashSet<u32> = HashSet::new();
        let mut outcome = JobSetOutcome::default();

        let mut record = |outcome: &mut JobSetOutcome, report: JobReport| {
            let label = match &report.result {
                Ok(_) => "succeeded",
                Err(f) => f.outcome_label(),
            };
            metrics::record_job_finished(kind, label, report.attempts);
            on_finished(&report);
            outcome.results.insert(report.index, report.result);
        };

        loop {
            if queue.is_empty() && running.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !outcome.cancelled => {
                    outcome.cancelled = true;
                    info!(kind, undispatched = queue.len(), in_flight = running.len(), "Job set cancelled");
                    for (index, _) in queue.drain(..) {
                        record(&mut outcome, JobReport::failed(index, JobFailure::Cancelled { attempts: 0 }));
                    }
                }

                Some(joined) = running.join_next(), if !running.is_empty() => {
                    match joined {
                        Ok(report) => {
                            dispatched.remove(&report.index);
                            record(&mut outcome, report);
                        }
                        Err(e) => error!(kind, "Job task ended abnormally: {}", e),
                    }
                }

                permit = self.slots.clone().acquire_owned(), if !queue.is_empty() && !outcome.cancelled => {
                    let Some((index, spec)) = queue.pop_front() else { continue };
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            record(&mut outcome, JobReport::failed(index, JobFailure::Cancelled { attempts: 0 }));
                            continue;
                        }
                    };

                    dispatched.insert(index);
                    let backend = Arc::clone(&backend);
                    let policy = policy.clone();
                    let cancel = cancel.clone();
                    let poll_interval = self.config.poll_interval;
                    let job_timeout = self.config.job_timeout;

                    running.spawn(async move {
                        let _permit = permit;
                        metrics::adjust_jobs_in_flight(kind, 1.0);
                        let report = run_job(backend.as_ref(), index, &spec, &policy, poll_interval, job_timeout, &cancel).await;
                        metrics::adjust_jobs_in_flight(kind, -1.0);
                        report
                    });
                }

                else => break,
            }
        }

        // Tasks that panicked never reported back.
        for index in dispatched.drain() {
            record(
                &mut outcome,
                JobReport::failed(
                    index,
                    JobFailure::Rejected {
                        attempts: 0,
                        reason: "job task ended abnormally".to_string(),
                    },
                ),
            );
        }

        info!(
            kind,
            succeeded = outcome.success_count(),
            failed = total - outcome.success_count(),
            cancelled = outcome.cancelled,
            "Job set finished"
        );
        outcome
    }
}

/// How an attempt ended short of a remote failure.
enum AttemptEnd {
    Succeeded(AssetRef),
    /// Cancellation observed between polls
    Cancelled,
}

/// Drive one job through its attempts.
///
/// Cancellation is only observed before a submission, between polls and
/// during the retry backoff. A submit or poll that has started always runs
/// to completion, so an artifact reported by an in-flight poll is kept.
async fn run_job<B: JobBackend>(
    backend: &B,
    index: u32,
    spec: &B::Spec,
    policy: &RetryPolicy,
    poll_interval: Duration,
    job_timeout: Duration,
    cancel: &CancelSignal,
) -> JobReport {
    let kind = backend.kind();
    let mut job = GenerationJob::new(index);

    loop {
        if cancel.is_cancelled() {
            return JobReport::failed(index, JobFailure::Cancelled { attempts: job.attempt });
        }
        job.begin_attempt();
        let attempt = job.attempt;

        let result = tokio::time::timeout(
            job_timeout,
            drive_attempt(backend, spec, &mut job, poll_interval, cancel),
        )
        .await;

        let failure = match result {
            Ok(Ok(AttemptEnd::Succeeded(asset))) => {
                job.succeed(asset.clone());
                debug!(kind, segment = index, attempt, "Job succeeded");
                return JobReport {
                    index,
                    attempts: attempt,
                    result: Ok(asset),
                };
            }
            Ok(Ok(AttemptEnd::Cancelled)) => {
                if job.state.is_in_flight() {
                    if let Some(remote_id) = job.remote_id() {
                        info!(kind, segment = index, remote_id = %remote_id, "Abandoning remote job");
                    }
                }
                return JobReport::failed(index, JobFailure::Cancelled { attempts: attempt });
            }
            Ok(Err(failure)) => {
                job.fail(failure.to_string(), failure.is_transient());
                failure
            }
            Err(_) => {
                if let Some(remote_id) = job.remote_id() {
                    debug!(kind, segment = index, remote_id = %remote_id, "Attempt timed out");
                }
                job.time_out(job_timeout.as_secs());
                RemoteFailure::transient(format!(
                    "no terminal status within {}s",
                    job_timeout.as_secs_f64()
                ))
            }
        };

        if !policy.should_retry(attempt, failure.is_transient()) {
            warn!(kind, segment = index, attempt, state = %job.state, "Job failed: {}", failure);
            let reason = failure.to_string();
            let failure = if failure.is_transient() {
                JobFailure::RetriesExhausted {
                    attempts: attempt,
                    reason,
                }
            } else {
                JobFailure::Rejected {
                    attempts: attempt,
                    reason,
                }
            };
            return JobReport::failed(index, failure);
        }

        let delay = policy.delay_after_attempt(attempt);
        warn!(
            kind,
            segment = index,
            attempt,
            max_attempts = policy.max_attempts,
            "{} failed, retrying in {:?}: {}",
            policy.operation_name,
            delay,
            failure
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return JobReport::failed(index, JobFailure::Cancelled { attempts: attempt });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One attempt: submit, then poll until a terminal status or cancellation.
///
/// Transient poll errors keep the attempt alive; the remote job may still be
/// running and the per-attempt timeout bounds the wait.
async fn drive_attempt<B: JobBackend>(
    backend: &B,
    spec: &B::Spec,
    job: &mut GenerationJob,
    poll_interval: Duration,
    cancel: &CancelSignal,
) -> Result<AttemptEnd, RemoteFailure> {
    let remote_id: RemoteJobId = backend.submit(spec).await?;
    debug!(kind = backend.kind(), segment = job.segment_index, remote_id = %remote_id, "Job submitted");
    job.mark_submitted(remote_id.clone());

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(AttemptEnd::Cancelled),
            _ = tokio::time::sleep(poll_interval) => {}
        }

        let status = match backend.poll(&remote_id).await {
            Ok(status) => status,
            Err(failure) if failure.is_transient() => {
                debug!(kind = backend.kind(), remote_id = %remote_id, "Poll failed, will poll again: {}", failure);
                continue;
            }
            Err(failure) => return Err(failure),
        };
        job.record_poll();

        match status {
            RemoteStatus::Succeeded(asset) => return Ok(AttemptEnd::Succeeded(asset)),
            RemoteStatus::Failed(failure) => return Err(failure),
            RemoteStatus::Pending | RemoteStatus::Running => {}
        }
    }
}
