// crates/ashfox-server/src/store/mod.rs
// The persistent pipeline store: durable workspace/project/job/event state
// with optimistic concurrency under a cooperative distributed lock.

pub mod lock;
pub mod repo;
pub mod state;

use crate::config::EVENT_RETENTION_PER_PROJECT;
use crate::metrics::MetricsRegistry;
use ashfox_types::{
    FolderRecord, JobKind, JobStatus, NativeJob, NativeProjectSnapshot, ProjectEvent,
    ProjectEventKind, ProjectLockInfo, ProjectStats, WorkspaceRecord,
};
use chrono::Utc;
use lock::{LockConfig, LockError};
use repo::{ProjectRepository, RepoError};
use serde_json::json;
use state::{PIPELINE_TENANT, PipelineState, STATE_DOC_ID, StoredDocument, decode_state, encode_state};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer committed between our read and our save.
    #[error("pipeline state conflict; retry the mutation")]
    Conflict,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error("state serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Fired after a committed mutation, once per event appended by it.
pub type StoreNotifier = Box<dyn Fn(&ProjectEvent) + Send + Sync>;

/// Attempts `mutate_workspace_state` makes before surfacing a conflict.
const MAX_MUTATION_ATTEMPTS: usize = 5;

pub struct PipelineStore {
    repo: Arc<dyn ProjectRepository>,
    lock_cfg: LockConfig,
    owner_prefix: String,
    metrics: Arc<MetricsRegistry>,
    /// Last decoded state keyed by document revision.
    cache: Mutex<Option<(String, PipelineState)>>,
    notifier: Mutex<Option<StoreNotifier>>,
}

impl PipelineStore {
    pub fn new(repo: Arc<dyn ProjectRepository>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            repo,
            lock_cfg: LockConfig::default(),
            owner_prefix: format!("{}", std::process::id()),
            metrics,
            cache: Mutex::new(None),
            notifier: Mutex::new(None),
        }
    }

    pub fn with_lock_config(mut self, cfg: LockConfig) -> Self {
        self.lock_cfg = cfg;
        self
    }

    pub fn set_notifier(&self, notifier: StoreNotifier) {
        *self.lock_notifier() = Some(notifier);
    }

    fn lock_notifier(&self) -> std::sync::MutexGuard<'_, Option<StoreNotifier>> {
        self.notifier.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Option<(String, PipelineState)>> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ---------------------------------------------------------------
    // Concurrency core
    // ---------------------------------------------------------------

    /// Run one mutation under the distributed lock: read, seed if absent,
    /// apply, conditional save, notify. A save conflict invalidates the
    /// cache and surfaces as [`StoreError::Conflict`]; this function never
    /// retries on its own.
    pub async fn with_mutation<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PipelineState) -> Result<T, StoreError>,
    {
        let owner = format!("{}-{}", self.owner_prefix, uuid::Uuid::new_v4());
        let (guard, contention) = lock::acquire(self.repo.as_ref(), &owner, &self.lock_cfg).await?;
        if contention > 0 {
            self.metrics.inc_counter("pipeline_lock_contention_total", &[]);
        }
        let result = self.mutate_locked(f).await;
        if let Err(e) = lock::release(self.repo.as_ref(), guard).await {
            tracing::warn!("pipeline lock release failed: {e}");
        }
        result
    }

    async fn mutate_locked<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PipelineState) -> Result<T, StoreError>,
    {
        let existing = self.repo.find(PIPELINE_TENANT, STATE_DOC_ID).await?;
        let (mut pipeline, expected, created_at) = match &existing {
            Some(doc) => (
                decode_state(doc)?,
                Some(doc.revision.clone()),
                doc.created_at.clone(),
            ),
            None => (PipelineState::seed(), None, now()),
        };
        let cursors_before = pipeline.project_event_cursor.clone();

        let out = f(&mut pipeline)?;

        let (state_json, revision) = encode_state(&pipeline)?;
        let doc = StoredDocument {
            tenant_id: PIPELINE_TENANT.to_string(),
            project_id: STATE_DOC_ID.to_string(),
            revision: revision.clone(),
            state_json,
            created_at,
            updated_at: now(),
        };
        match self.repo.save_if_revision(doc, expected.as_deref()).await {
            Ok(()) => {}
            Err(RepoError::Conflict) => {
                *self.lock_cache() = None;
                return Err(StoreError::Conflict);
            }
            Err(other) => return Err(other.into()),
        }

        let new_events = collect_new_events(&pipeline, &cursors_before);
        *self.lock_cache() = Some((revision, pipeline));
        if !new_events.is_empty() {
            let notifier = self.lock_notifier();
            if let Some(notify) = notifier.as_ref() {
                for event in &new_events {
                    notify(event);
                }
            }
        }
        Ok(out)
    }

    /// Optimistic-retry wrapper: re-runs the mutation on conflict, up to 5
    /// attempts, re-reading the winner's state each time. Call sites never
    /// write their own retry loops.
    pub async fn mutate_workspace_state<T, F>(&self, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut PipelineState) -> Result<T, StoreError>,
    {
        for attempt in 1..=MAX_MUTATION_ATTEMPTS {
            match self.with_mutation(&mut f).await {
                Err(StoreError::Conflict) if attempt < MAX_MUTATION_ATTEMPTS => {
                    tracing::debug!(attempt, "pipeline mutation conflict, retrying");
                }
                other => return other,
            }
        }
        Err(StoreError::Conflict)
    }

    /// Current state. Reads go through the revision-keyed cache; a missing
    /// document is seeded under the lock.
    pub async fn read_state(&self) -> Result<PipelineState, StoreError> {
        match self.repo.find(PIPELINE_TENANT, STATE_DOC_ID).await? {
            Some(doc) => {
                if let Some((revision, cached)) = self.lock_cache().as_ref() {
                    if *revision == doc.revision {
                        return Ok(cached.clone());
                    }
                }
                let pipeline = decode_state(&doc)?;
                *self.lock_cache() = Some((doc.revision.clone(), pipeline.clone()));
                Ok(pipeline)
            }
            None => {
                self.with_mutation(|_| Ok(())).await?;
                Ok(PipelineState::seed())
            }
        }
    }

    // ---------------------------------------------------------------
    // Workspaces, folders, projects
    // ---------------------------------------------------------------

    pub async fn create_workspace(&self, name: &str) -> Result<WorkspaceRecord, StoreError> {
        let name = name.to_string();
        self.mutate_workspace_state(move |pipeline| {
            let record = WorkspaceRecord {
                id: new_id("ws"),
                name: name.clone(),
                created_at: now(),
            };
            pipeline.workspaces.insert(record.id.clone(), record.clone());
            Ok(record)
        })
        .await
    }

    pub async fn list_workspaces(&self) -> Result<Vec<WorkspaceRecord>, StoreError> {
        // BTreeMap keys are unique, so workspace ids are deduplicated by
        // construction.
        Ok(self.read_state().await?.workspaces.into_values().collect())
    }

    pub async fn create_folder(
        &self,
        workspace_id: &str,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<FolderRecord, StoreError> {
        let workspace_id = workspace_id.to_string();
        let parent_id = parent_id.map(str::to_string);
        let name = name.to_string();
        self.mutate_workspace_state(move |pipeline| {
            if !pipeline.workspaces.contains_key(&workspace_id) {
                return Err(StoreError::NotFound(format!("workspace {workspace_id}")));
            }
            if let Some(parent) = &parent_id {
                if !pipeline.folders.contains_key(parent) {
                    return Err(StoreError::NotFound(format!("folder {parent}")));
                }
            }
            let record = FolderRecord {
                id: new_id("fld"),
                workspace_id: workspace_id.clone(),
                parent_id: parent_id.clone(),
                name: name.clone(),
            };
            pipeline.folders.insert(record.id.clone(), record.clone());
            Ok(record)
        })
        .await
    }

    pub async fn create_project(
        &self,
        workspace_id: &str,
        name: &str,
        parent_folder_id: Option<&str>,
    ) -> Result<NativeProjectSnapshot, StoreError> {
        let workspace_id = workspace_id.to_string();
        let name = name.to_string();
        let parent_folder_id = parent_folder_id.map(str::to_string);
        self.mutate_workspace_state(move |pipeline| {
            if !pipeline.workspaces.contains_key(&workspace_id) {
                return Err(StoreError::NotFound(format!("workspace {workspace_id}")));
            }
            let project = NativeProjectSnapshot {
                workspace_id: workspace_id.clone(),
                project_id: new_id("proj"),
                parent_folder_id: parent_folder_id.clone(),
                name: name.clone(),
                revision: 1,
                stats: ProjectStats::default(),
                has_geometry: false,
                hierarchy: Vec::new(),
                animations: Vec::new(),
                textures: Vec::new(),
                active_job_status: None,
                lock: None,
            };
            pipeline
                .projects
                .insert(project.project_id.clone(), project.clone());
            append_event(
                pipeline,
                &project.project_id,
                ProjectEventKind::ProjectSnapshot,
                serde_json::to_value(&project)?,
            );
            Ok(project)
        })
        .await
    }

    pub async fn get_project(
        &self,
        project_id: &str,
    ) -> Result<NativeProjectSnapshot, StoreError> {
        let pipeline = self.read_state().await?;
        let mut project = pipeline
            .projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))?;
        strip_expired_lock(&mut project);
        Ok(project)
    }

    pub async fn list_projects(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<NativeProjectSnapshot>, StoreError> {
        let pipeline = self.read_state().await?;
        Ok(pipeline
            .projects
            .values()
            .filter(|p| p.workspace_id == workspace_id)
            .cloned()
            .map(|mut p| {
                strip_expired_lock(&mut p);
                p
            })
            .collect())
    }

    /// Apply a mutator to a project record. Bumps the monotonic revision
    /// and appends a `project.snapshot` event.
    pub async fn update_project<F>(
        &self,
        project_id: &str,
        mutator: F,
    ) -> Result<NativeProjectSnapshot, StoreError>
    where
        F: Fn(&mut NativeProjectSnapshot) + Send,
    {
        let project_id = project_id.to_string();
        self.mutate_workspace_state(move |pipeline| {
            let project = pipeline
                .projects
                .get_mut(&project_id)
                .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))?;
            mutator(project);
            project.revision += 1;
            let snapshot = project.clone();
            append_event(
                pipeline,
                &project_id,
                ProjectEventKind::ProjectSnapshot,
                serde_json::to_value(&snapshot)?,
            );
            Ok(snapshot)
        })
        .await
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<(), StoreError> {
        let project_id = project_id.to_string();
        self.mutate_workspace_state(move |pipeline| {
            if pipeline.projects.remove(&project_id).is_none() {
                return Err(StoreError::NotFound(format!("project {project_id}")));
            }
            pipeline.events.remove(&project_id);
            pipeline.project_event_cursor.remove(&project_id);
            let jobs = &pipeline.jobs;
            pipeline
                .queued_job_ids
                .retain(|id| jobs.get(id).map(|j| j.project_id != project_id).unwrap_or(false));
            pipeline.jobs.retain(|_, job| job.project_id != project_id);
            Ok(())
        })
        .await
    }

    // ---------------------------------------------------------------
    // Jobs
    // ---------------------------------------------------------------

    pub async fn submit_job(
        &self,
        project_id: &str,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Result<NativeJob, StoreError> {
        let project_id = project_id.to_string();
        self.mutate_workspace_state(move |pipeline| {
            let project = pipeline
                .projects
                .get_mut(&project_id)
                .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))?;
            let job = NativeJob {
                id: new_id("job"),
                project_id: project_id.clone(),
                workspace_id: project.workspace_id.clone(),
                kind,
                payload: payload.clone(),
                status: JobStatus::Queued,
                worker_id: None,
                created_at: now(),
                started_at: None,
                completed_at: None,
                result: None,
                error: None,
                attempt_count: 0,
            };
            project.active_job_status = Some(JobStatus::Queued);
            pipeline.jobs.insert(job.id.clone(), job.clone());
            pipeline.queued_job_ids.push_back(job.id.clone());
            pipeline.counters.jobs_submitted += 1;
            append_job_event(pipeline, &job);
            Ok(job)
        })
        .await
    }

    /// Pop the oldest queued job (optionally restricted to a workspace
    /// set), flip it to running, and stamp the claimer. Claims are atomic
    /// under the global lock: no two workers can see the same job.
    pub async fn claim_next_job(
        &self,
        worker_id: &str,
        workspaces: Option<&[String]>,
    ) -> Result<Option<NativeJob>, StoreError> {
        let worker_id = worker_id.to_string();
        let workspaces: Option<Vec<String>> = workspaces.map(|w| w.to_vec());
        self.mutate_workspace_state(move |pipeline| {
            let position = pipeline.queued_job_ids.iter().position(|id| {
                match pipeline.jobs.get(id) {
                    Some(job) if job.status == JobStatus::Queued => workspaces
                        .as_ref()
                        .map(|ws| ws.contains(&job.workspace_id))
                        .unwrap_or(true),
                    _ => false,
                }
            });
            let Some(position) = position else {
                return Ok(None);
            };
            let job_id = pipeline
                .queued_job_ids
                .remove(position)
                .unwrap_or_else(|| unreachable!("position came from the queue"));
            let job = pipeline
                .jobs
                .get_mut(&job_id)
                .unwrap_or_else(|| unreachable!("queued ids reference stored jobs"));
            job.status = JobStatus::Running;
            job.worker_id = Some(worker_id.clone());
            job.started_at = Some(now());
            job.attempt_count += 1;
            let job = job.clone();
            if let Some(project) = pipeline.projects.get_mut(&job.project_id) {
                project.active_job_status = Some(JobStatus::Running);
            }
            append_job_event(pipeline, &job);
            Ok(Some(job))
        })
        .await
    }

    pub async fn complete_job(
        &self,
        job_id: &str,
        result: serde_json::Value,
    ) -> Result<NativeJob, StoreError> {
        self.finish_job(job_id, JobStatus::Completed, Some(result), None)
            .await
    }

    pub async fn fail_job(&self, job_id: &str, error: &str) -> Result<NativeJob, StoreError> {
        self.finish_job(job_id, JobStatus::Failed, None, Some(error.to_string()))
            .await
    }

    async fn finish_job(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<NativeJob, StoreError> {
        let job_id = job_id.to_string();
        let terminal = self
            .mutate_workspace_state(move |pipeline| {
                let job = pipeline
                    .jobs
                    .get_mut(&job_id)
                    .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
                if job.status.is_terminal() {
                    return Err(StoreError::InvalidState(format!(
                        "job {job_id} is already {}",
                        job.status
                    )));
                }
                job.status = status;
                job.completed_at = Some(now());
                job.result = result.clone();
                job.error = error.clone();
                let job = job.clone();
                match status {
                    JobStatus::Completed => pipeline.counters.jobs_completed += 1,
                    JobStatus::Failed => pipeline.counters.jobs_failed += 1,
                    _ => {}
                }
                append_job_event(pipeline, &job);
                if let Some(project) = pipeline.projects.get_mut(&job.project_id) {
                    project.active_job_status = Some(status);
                    project.revision += 1;
                    let snapshot = project.clone();
                    append_event(
                        pipeline,
                        &job.project_id,
                        ProjectEventKind::ProjectSnapshot,
                        serde_json::to_value(&snapshot)?,
                    );
                }
                Ok(job)
            })
            .await?;
        self.metrics.inc_counter(
            "pipeline_jobs_total",
            &[
                ("kind", terminal.kind.as_str()),
                ("status", terminal.status.as_str()),
            ],
        );
        Ok(terminal)
    }

    // ---------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------

    /// Events with `seq > last_seq`, in order. Retention is bounded, so a
    /// resume far in the past only sees what is still retained.
    pub async fn get_project_events_since(
        &self,
        project_id: &str,
        last_seq: u64,
    ) -> Result<Vec<ProjectEvent>, StoreError> {
        let pipeline = self.read_state().await?;
        Ok(pipeline
            .events
            .get(project_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.seq > last_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Append a `project.snapshot` event for the project's current record.
    pub async fn append_project_snapshot_event(
        &self,
        project_id: &str,
    ) -> Result<ProjectEvent, StoreError> {
        let project_id = project_id.to_string();
        self.mutate_workspace_state(move |pipeline| {
            let project = pipeline
                .projects
                .get(&project_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))?;
            Ok(append_event(
                pipeline,
                &project_id,
                ProjectEventKind::ProjectSnapshot,
                serde_json::to_value(&project)?,
            ))
        })
        .await
    }

    // ---------------------------------------------------------------
    // Per-project cooperative locks
    // ---------------------------------------------------------------

    pub async fn acquire_project_lock(
        &self,
        project_id: &str,
        owner: &str,
        ttl_ms: i64,
    ) -> Result<ProjectLockInfo, StoreError> {
        let project_id = project_id.to_string();
        let owner = owner.to_string();
        self.mutate_workspace_state(move |pipeline| {
            let project = pipeline
                .projects
                .get_mut(&project_id)
                .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))?;
            let now_ms = Utc::now().timestamp_millis();
            match &project.lock {
                Some(lock) if lock.owner != owner && lock.expires_at > now_ms => {
                    Err(StoreError::InvalidState(format!(
                        "project {project_id} is locked by {}",
                        lock.owner
                    )))
                }
                _ => {
                    let info = ProjectLockInfo {
                        owner: owner.clone(),
                        expires_at: now_ms + ttl_ms,
                    };
                    project.lock = Some(info.clone());
                    Ok(info)
                }
            }
        })
        .await
    }

    pub async fn release_project_lock(
        &self,
        project_id: &str,
        owner: &str,
    ) -> Result<(), StoreError> {
        let project_id = project_id.to_string();
        let owner = owner.to_string();
        self.mutate_workspace_state(move |pipeline| {
            let project = pipeline
                .projects
                .get_mut(&project_id)
                .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))?;
            if project.lock.as_ref().map(|l| l.owner == owner).unwrap_or(false) {
                project.lock = None;
            }
            Ok(())
        })
        .await
    }
}

/// Assign the next sequence number and append, trimming retention.
fn append_event(
    pipeline: &mut PipelineState,
    project_id: &str,
    kind: ProjectEventKind,
    payload: serde_json::Value,
) -> ProjectEvent {
    let seq = pipeline
        .project_event_cursor
        .get(project_id)
        .copied()
        .unwrap_or(0)
        + 1;
    pipeline
        .project_event_cursor
        .insert(project_id.to_string(), seq);
    let event = ProjectEvent {
        seq,
        project_id: project_id.to_string(),
        kind,
        created_at: now(),
        payload,
    };
    let events = pipeline.events.entry(project_id.to_string()).or_default();
    events.push(event.clone());
    if events.len() > EVENT_RETENTION_PER_PROJECT {
        let excess = events.len() - EVENT_RETENTION_PER_PROJECT;
        events.drain(..excess);
    }
    pipeline.counters.events_appended += 1;
    event
}

fn append_job_event(pipeline: &mut PipelineState, job: &NativeJob) {
    let payload = json!({
        "jobId": job.id,
        "kind": job.kind,
        "status": job.status,
        "workerId": job.worker_id,
        "error": job.error,
    });
    let project_id = job.project_id.clone();
    append_event(pipeline, &project_id, ProjectEventKind::JobStatus, payload);
}

fn collect_new_events(
    pipeline: &PipelineState,
    cursors_before: &BTreeMap<String, u64>,
) -> Vec<ProjectEvent> {
    let mut out = Vec::new();
    for (project_id, events) in &pipeline.events {
        let since = cursors_before.get(project_id).copied().unwrap_or(0);
        for event in events.iter().filter(|e| e.seq > since) {
            out.push(event.clone());
        }
    }
    out
}

fn strip_expired_lock(project: &mut NativeProjectSnapshot) {
    let now_ms = Utc::now().timestamp_millis();
    if project.lock.as_ref().map(|l| l.expires_at <= now_ms).unwrap_or(false) {
        project.lock = None;
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn new_id(prefix: &str) -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &raw[..12])
}
