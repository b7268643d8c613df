//! In-memory project registry.
//!
//! Readers get snapshots; only the sequencer (crate-internal) mutates, and
//! only while holding the project's run lease.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use reel_models::{Project, ProjectId, ProjectSnapshot};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Shared project registry. Cheap to clone.
#[derive(Clone, Default)]
pub struct ProjectStore {
    projects: Arc<RwLock<HashMap<ProjectId, Project>>>,
    leases: Arc<Mutex<HashSet<ProjectId>>>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new project and return its id.
    pub async fn insert(&self, project: Project) -> ProjectId {
        let id = project.id().clone();
        self.projects.write().await.insert(id.clone(), project);
        id
    }

    /// Current status and artifacts of a project.
    pub async fn snapshot(&self, id: &ProjectId) -> WorkerResult<ProjectSnapshot> {
        self.projects
            .read()
            .await
            .get(id)
            .map(ProjectSnapshot::from_project)
            .ok_or_else(|| WorkerError::ProjectNotFound(id.clone()))
    }

    /// Snapshots of every project, oldest first.
    pub async fn list(&self) -> Vec<ProjectSnapshot> {
        let projects = self.projects.read().await;
        let mut snapshots: Vec<ProjectSnapshot> = projects.values().map(ProjectSnapshot::from_project).collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.project_id.cmp(&b.project_id)));
        snapshots
    }

    /// Whether a run currently holds the project.
    pub fn is_running(&self, id: &ProjectId) -> bool {
        self.lock_leases().contains(id)
    }

    /// Copy of the current project state.
    pub(crate) async fn read(&self, id: &ProjectId) -> WorkerResult<Project> {
        self.projects
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WorkerError::ProjectNotFound(id.clone()))
    }

    /// Apply `f` to the stored project under the write lock.
    pub(crate) async fn update<T, E>(
        &self,
        id: &ProjectId,
        f: impl FnOnce(&mut Project) -> Result<T, E>,
    ) -> WorkerResult<T>
    where
        E: Into<WorkerError>,
    {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| WorkerError::ProjectNotFound(id.clone()))?;
        f(project).map_err(Into::into)
    }

    /// Claim the single-writer lease for a project run.
    pub(crate) fn acquire_lease(&self, id: &ProjectId) -> WorkerResult<RunLease> {
        let mut leases = self.lock_leases();
        if !leases.insert(id.clone()) {
            return Err(WorkerError::ProjectBusy(id.clone()));
        }
        debug!(project_id = %id, "Run lease acquired");
        Ok(RunLease {
            id: id.clone(),
            leases: Arc::clone(&self.leases),
        })
    }

    fn lock_leases(&self) -> std::sync::MutexGuard<'_, HashSet<ProjectId>> {
        // The set stays consistent even if a holder panicked.
        self.leases.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive right to run one project. Released on drop.
#[derive(Debug)]
pub(crate) struct RunLease {
    id: ProjectId,
    leases: Arc<Mutex<HashSet<ProjectId>>>,
}

impl Drop for RunLease {
    fn drop(&mut self) {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.remove(&self.id);
        debug!(project_id = %self.id, "Run lease released");
    }
}
