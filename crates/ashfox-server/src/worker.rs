// crates/ashfox-server/src/worker.rs
// The job worker: claims queued pipeline jobs, drives the tool backend,
// and writes results back. One job in flight per tick.

use crate::adapter::{BackendPort, ToolCallOutcome};
use crate::store::{PipelineStore, StoreError};
use ashfox_types::{HierarchyNode, JobKind, NativeJob};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Restrict claims to these workspaces; `None` claims from all.
    pub workspaces: Option<Vec<String>>,
    pub tick_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            workspaces: None,
            tick_interval: Duration::from_millis(500),
        }
    }
}

pub struct Worker {
    store: Arc<PipelineStore>,
    backend: Arc<dyn BackendPort>,
    cfg: WorkerConfig,
}

impl Worker {
    pub fn new(store: Arc<PipelineStore>, backend: Arc<dyn BackendPort>, cfg: WorkerConfig) -> Self {
        Self { store, backend, cfg }
    }

    /// Long-running loop. Stops when the shutdown channel flips to true.
    /// Tick failures are logged and the loop keeps going.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cfg.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(worker_id = %self.cfg.worker_id, "worker loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(worker_id = %self.cfg.worker_id, "worker tick failed: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(worker_id = %self.cfg.worker_id, "worker loop stopped");
    }

    /// Claim and process at most one job. Returns whether a job ran.
    pub async fn tick(&self) -> Result<bool, StoreError> {
        let Some(job) = self
            .store
            .claim_next_job(&self.cfg.worker_id, self.cfg.workspaces.as_deref())
            .await?
        else {
            return Ok(false);
        };
        tracing::info!(job_id = %job.id, kind = %job.kind, "claimed job");

        let outcome = match job.kind {
            JobKind::GltfConvert => self.process_gltf_convert(&job).await,
            JobKind::TexturePreflight => self.process_texture_preflight(&job).await,
        };
        match outcome {
            Ok(result) => {
                if let Err(e) = self.store.complete_job(&job.id, result).await {
                    tracing::error!(job_id = %job.id, "complete_job failed: {e}");
                }
            }
            Err(message) => {
                tracing::warn!(job_id = %job.id, "job failed: {message}");
                // A failing failure-report must not kill the loop.
                if let Err(e) = self.store.fail_job(&job.id, &message).await {
                    tracing::error!(job_id = %job.id, "fail_job failed: {e}");
                }
            }
        }
        Ok(true)
    }

    /// Invoke a backend tool, unwrapping the result envelope.
    async fn call(&self, name: &str, arguments: Value) -> Result<Value, String> {
        match self.backend.call_tool(name, arguments).await {
            ToolCallOutcome::Completed(envelope) => {
                if envelope.get("ok").and_then(Value::as_bool).unwrap_or(false) {
                    Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
                } else {
                    let message = envelope
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("tool call failed");
                    Err(format!("{name}: {message}"))
                }
            }
            ToolCallOutcome::UnknownTool => Err(format!("{name}: unknown tool")),
            ToolCallOutcome::Unreachable(message) => Err(format!("{name}: {message}")),
        }
    }

    /// Like [`call`](Self::call), but failures only log. Materialization
    /// steps are best-effort; only the export decides the job.
    async fn call_best_effort(&self, name: &str, arguments: Value) -> Option<Value> {
        match self.call(name, arguments).await {
            Ok(data) => Some(data),
            Err(message) => {
                tracing::debug!("best-effort step skipped: {message}");
                None
            }
        }
    }

    async fn ensure_project(&self, job: &NativeJob) -> Result<Value, String> {
        let mut args = json!({});
        for key in ["name", "format", "formatId"] {
            if let Some(v) = job.payload.get(key) {
                args[key] = v.clone();
            }
        }
        self.call("ensure_project", args).await
    }

    async fn process_gltf_convert(&self, job: &NativeJob) -> Result<Value, String> {
        self.ensure_project(job).await?;

        let project = self
            .store
            .get_project(&job.project_id)
            .await
            .map_err(|e| e.to_string())?;

        if project.has_geometry {
            // Rebuild what the project record knows about. Dimensions are
            // not part of the record, so only the skeleton and metadata
            // can be materialized; each section is best-effort.
            for (name, parent) in flatten_hierarchy(&project.hierarchy) {
                let mut args = json!({ "name": name });
                if let Some(parent) = parent {
                    args["parent"] = json!(parent);
                }
                self.call_best_effort("add_bone", args).await;
            }
            for animation in &project.animations {
                self.call_best_effort(
                    "create_animation",
                    json!({
                        "name": animation.name,
                        "length": animation.length,
                        "loop": animation.r#loop,
                    }),
                )
                .await;
            }
            for texture in &project.textures {
                self.call_best_effort(
                    "import_texture",
                    json!({
                        "name": texture.name,
                        "width": texture.width,
                        "height": texture.height,
                    }),
                )
                .await;
            }
        }

        // The export is the one step that decides success.
        let output = self.call("export_project", json!({})).await?;
        let state = self.call("get_project_state", json!({})).await?;

        Ok(json!({
            "hierarchy": project.hierarchy,
            "animations": project.animations,
            "textureSources": project.textures,
            "textures": state.get("textures").cloned().unwrap_or(Value::Null),
            "output": output,
        }))
    }

    async fn process_texture_preflight(&self, job: &NativeJob) -> Result<Value, String> {
        self.ensure_project(job).await?;

        let mut preflight_args = json!({ "includeUsage": true });
        if let Some(ids) = job.payload.get("textureIds") {
            preflight_args["textures"] = ids.clone();
        }
        let report = self.call("preflight_texture", preflight_args).await?;

        let max_dimension = job
            .payload
            .get("maxDimension")
            .and_then(Value::as_u64)
            .unwrap_or(4096);
        let allow_npot = job
            .payload
            .get("allowNonPowerOfTwo")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let empty = Vec::new();
        let textures = report
            .get("textures")
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        let mut oversized = Vec::new();
        let mut non_power_of_two = Vec::new();
        for texture in textures {
            let name = texture.get("name").and_then(Value::as_str).unwrap_or("");
            let w = texture.get("width").and_then(Value::as_u64).unwrap_or(0);
            let h = texture.get("height").and_then(Value::as_u64).unwrap_or(0);
            if w > max_dimension || h > max_dimension {
                oversized.push(json!(name));
            }
            if !allow_npot && (!w.is_power_of_two() || !h.is_power_of_two()) {
                non_power_of_two.push(json!(name));
            }
        }

        let status = if oversized.is_empty() && non_power_of_two.is_empty() {
            "ok"
        } else {
            "failed"
        };
        Ok(json!({
            "checked": textures.len(),
            "oversized": oversized,
            "nonPowerOfTwo": non_power_of_two,
            "diagnostics": report.get("diagnostics").cloned().unwrap_or(Value::Null),
            "status": status,
        }))
    }
}

/// Depth-first (name, parent) pairs of the persisted hierarchy.
fn flatten_hierarchy(nodes: &[HierarchyNode]) -> Vec<(String, Option<String>)> {
    fn walk(
        nodes: &[HierarchyNode],
        parent: Option<&str>,
        out: &mut Vec<(String, Option<String>)>,
    ) {
        for node in nodes {
            out.push((node.name.clone(), parent.map(str::to_string)));
            walk(&node.children, Some(&node.name), out);
        }
    }
    let mut out = Vec::new();
    walk(nodes, None, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::NullEditorAdapter;
    use crate::metrics::MetricsRegistry;
    use crate::store::repo::MemoryRepository;
    use crate::tools::{ToolService, ToolServiceOptions};
    use ashfox_types::JobStatus;

    fn harness() -> (Arc<PipelineStore>, Worker) {
        let store = Arc::new(PipelineStore::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(MetricsRegistry::new()),
        ));
        let backend: Arc<dyn BackendPort> = Arc::new(ToolService::new(
            Arc::new(NullEditorAdapter),
            ToolServiceOptions {
                auto_attach: true,
                ..Default::default()
            },
        ));
        let worker = Worker::new(store.clone(), backend, WorkerConfig::default());
        (store, worker)
    }

    async fn project(store: &PipelineStore) -> String {
        let ws = store.create_workspace("studio").await.unwrap();
        store
            .create_project(&ws.id, "fox", None)
            .await
            .unwrap()
            .project_id
    }

    #[tokio::test]
    async fn idle_tick_claims_nothing() {
        let (_, worker) = harness();
        assert!(!worker.tick().await.unwrap());
    }

    #[tokio::test]
    async fn gltf_convert_job_completes() {
        let (store, worker) = harness();
        let project_id = project(&store).await;
        let job = store
            .submit_job(
                &project_id,
                JobKind::GltfConvert,
                json!({ "name": "fox", "format": "geckolib" }),
            )
            .await
            .unwrap();

        assert!(worker.tick().await.unwrap());

        let state = store.read_state().await.unwrap();
        let finished = &state.jobs[&job.id];
        assert_eq!(finished.status, JobStatus::Completed);
        let result = finished.result.as_ref().unwrap();
        assert_eq!(result["output"]["fallback"], true);
        assert!(result["output"]["formatId"].is_string());
        assert!(finished.worker_id.is_some());
    }

    #[tokio::test]
    async fn export_failure_fails_the_job() {
        let (store, worker) = harness();
        let project_id = project(&store).await;
        // No format anywhere: export_project cannot resolve one.
        store
            .submit_job(&project_id, JobKind::GltfConvert, json!({ "name": "fox" }))
            .await
            .unwrap();

        assert!(worker.tick().await.unwrap());

        let state = store.read_state().await.unwrap();
        let job = state.jobs.values().next().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_ref().unwrap().contains("export_project"));
    }

    #[tokio::test]
    async fn texture_preflight_evaluates_constraints() {
        let (store, worker) = harness();
        let project_id = project(&store).await;

        // Seed the backend session with a non-power-of-two texture.
        let backend: Arc<dyn BackendPort> = Arc::new(ToolService::new(
            Arc::new(NullEditorAdapter),
            ToolServiceOptions {
                auto_attach: true,
                ..Default::default()
            },
        ));
        backend
            .call_tool("create_project", json!({"name": "fox"}))
            .await;
        backend
            .call_tool(
                "import_texture",
                json!({"name": "skin", "width": 48, "height": 48}),
            )
            .await;
        let worker = Worker {
            store: store.clone(),
            backend,
            cfg: worker.cfg.clone(),
        };

        let job = store
            .submit_job(
                &project_id,
                JobKind::TexturePreflight,
                json!({ "allowNonPowerOfTwo": false, "maxDimension": 32 }),
            )
            .await
            .unwrap();
        assert!(worker.tick().await.unwrap());

        let state = store.read_state().await.unwrap();
        let finished = &state.jobs[&job.id];
        assert_eq!(finished.status, JobStatus::Completed);
        let result = finished.result.as_ref().unwrap();
        assert_eq!(result["status"], "failed");
        assert_eq!(result["oversized"][0], "skin");
        assert_eq!(result["nonPowerOfTwo"][0], "skin");
    }
}
