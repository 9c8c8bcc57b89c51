// crates/ashfox-server/src/store/state.rs
// The pipeline state document: one logical JSON document holding
// workspaces, projects, folders, jobs, and per-project event logs.

use ashfox_types::{FolderRecord, NativeJob, NativeProjectSnapshot, ProjectEvent, WorkspaceRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};

/// Tenant id shared by both pipeline documents.
pub const PIPELINE_TENANT: &str = "native-pipeline";
/// Document id of the state document.
pub const STATE_DOC_ID: &str = "pipeline-state-v2";
/// Document id of the lock document.
pub const LOCK_DOC_ID: &str = "pipeline-lock-v2";

/// Monotonic totals kept alongside the state for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCounters {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub events_appended: u64,
}

/// The in-memory form of the state document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    #[serde(default)]
    pub workspaces: BTreeMap<String, WorkspaceRecord>,
    #[serde(default)]
    pub projects: BTreeMap<String, NativeProjectSnapshot>,
    #[serde(default)]
    pub folders: BTreeMap<String, FolderRecord>,
    #[serde(default)]
    pub jobs: BTreeMap<String, NativeJob>,
    /// FIFO queue of jobs with status=queued.
    #[serde(default)]
    pub queued_job_ids: VecDeque<String>,
    /// projectId → retained events, oldest first.
    #[serde(default)]
    pub events: BTreeMap<String, Vec<ProjectEvent>>,
    /// projectId → last assigned event sequence number.
    #[serde(default)]
    pub project_event_cursor: BTreeMap<String, u64>,
    #[serde(default)]
    pub counters: PipelineCounters,
}

impl PipelineState {
    /// Fresh state for a deployment that has never persisted anything.
    pub fn seed() -> Self {
        Self::default()
    }
}

/// One persisted document. The state and lock documents share this shape;
/// they differ in `project_id` and in what `revision` means (content hash
/// for the state document, lock owner for the lock document).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub tenant_id: String,
    pub project_id: String,
    pub revision: String,
    pub state_json: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Serialize the state and compute its document revision (SHA-256 of the
/// state JSON).
pub fn encode_state(state: &PipelineState) -> Result<(String, String), serde_json::Error> {
    let state_json = serde_json::to_string(state)?;
    let revision = format!("{:x}", Sha256::digest(state_json.as_bytes()));
    Ok((state_json, revision))
}

/// Decode a persisted state document.
pub fn decode_state(doc: &StoredDocument) -> Result<PipelineState, serde_json::Error> {
    serde_json::from_str(&doc.state_json)
}
