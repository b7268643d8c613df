//! Progress events over an in-process broadcast channel.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::Stream;
use reel_models::{ProgressMessage, ProjectId, ProjectStatus, Stage};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 256;

/// Progress event for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub project_id: ProjectId,
    /// Channel-wide sequence number, increasing in publish order
    pub seq: u64,
    pub message: ProgressMessage,
}

/// Channel for publishing/subscribing to progress events.
///
/// Publishing never fails: with no subscribers the event is dropped.
#[derive(Clone)]
pub struct ProgressChannel {
    tx: broadcast::Sender<ProgressEvent>,
    seq: Arc<AtomicU64>,
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish a message for `project_id`.
    pub fn publish(&self, project_id: &ProjectId, message: ProgressMessage) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(project_id = %project_id, seq, kind = message.type_str(), "Publishing progress event");
        let event = ProgressEvent {
            project_id: project_id.clone(),
            seq,
            message,
        };
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn stage_started(&self, project_id: &ProjectId, stage: Stage) {
        self.publish(project_id, ProgressMessage::stage_started(stage));
    }

    /// Publish the stage completion followed by the new overall progress.
    pub fn stage_completed(&self, project_id: &ProjectId, stage: Stage, status: ProjectStatus) {
        self.publish(project_id, ProgressMessage::stage_completed(stage, status));
        self.publish(project_id, ProgressMessage::progress(status.progress()));
    }

    pub fn job_finished(
        &self,
        project_id: &ProjectId,
        stage: Stage,
        segment_index: u32,
        succeeded: bool,
        attempts: u32,
    ) {
        self.publish(
            project_id,
            ProgressMessage::job_finished(stage, segment_index, succeeded, attempts),
        );
    }

    pub fn error(&self, project_id: &ProjectId, stage: Option<Stage>, message: impl Into<String>) {
        self.publish(project_id, ProgressMessage::error(stage, message));
    }

    pub fn done(&self, project_id: &ProjectId, output_uri: impl Into<String>) {
        self.publish(project_id, ProgressMessage::done(output_uri));
    }

    /// Raw receiver for every project's events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Stream of events for one project. Ends when the channel closes; events
    /// missed by a lagging subscriber are skipped.
    pub fn subscribe_project(
        &self,
        project_id: &ProjectId,
    ) -> Pin<Box<dyn Stream<Item = ProgressEvent> + Send>> {
        let rx = self.tx.subscribe();
        let project_id = project_id.clone();

        let stream = futures::stream::unfold((rx, project_id), |(mut rx, project_id)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.project_id == project_id => {
                        return Some((event, (rx, project_id)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(project_id = %project_id, skipped, "Progress subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Box::pin(stream)
    }
}
