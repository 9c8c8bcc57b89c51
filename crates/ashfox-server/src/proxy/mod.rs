// crates/ashfox-server/src/proxy/mod.rs
// Compound tools: sequences of tool-service calls under one revision
// boundary, with a per-request cache, optional attach-state/diff, and
// auto-recovery from stale UV layouts.

pub mod cache;
pub mod diff;

use crate::adapter::ToolDescriptor;
use crate::error::{ToolError, ToolOk, UsecaseResult, envelope};
use crate::schema::{FieldKind, FieldRule, ToolSchema};
use crate::tools::{ToolName, ToolService};
use crate::trace::{TraceRecorder, TraceResponse};
use ashfox_types::ProjectSnapshot;
use cache::RequestCache;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Compound tools served by the proxy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ProxyTool {
    ApplyTextureSpec,
    ApplyUvSpec,
    ModelPipeline,
    TexturePipeline,
    EntityPipeline,
    RenderPreview,
    Validate,
}

/// Options every compound tool understands.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyOptions {
    if_revision: Option<String>,
    #[serde(default)]
    attach_state: bool,
    #[serde(default)]
    attach_diff: bool,
    /// Diff baseline; defaults to `ifRevision`.
    diff_since: Option<String>,
    #[serde(default)]
    auto_recover: bool,
}

impl ProxyOptions {
    fn parse(args: &Value) -> Self {
        serde_json::from_value(args.clone()).unwrap_or_default()
    }
}

pub struct ProxyRouter {
    service: Arc<ToolService>,
    trace: Option<Arc<TraceRecorder>>,
}

impl ProxyRouter {
    pub fn new(service: Arc<ToolService>, trace: Option<Arc<TraceRecorder>>) -> Self {
        Self { service, trace }
    }

    pub fn parse(name: &str) -> Option<ProxyTool> {
        ProxyTool::from_str(name).ok()
    }

    /// Listing entries for the compound tools, merged into tools/list.
    pub fn descriptors() -> Vec<ToolDescriptor> {
        ProxyTool::iter().map(descriptor).collect()
    }

    /// Run a compound tool and produce the result envelope. The error
    /// boundary converts panics into `unknown/proxy_exception` so a broken
    /// pipeline can never take the transport down.
    pub async fn call(&self, tool: ProxyTool, args: Value) -> Value {
        let options = ProxyOptions::parse(&args);
        let result = match std::panic::AssertUnwindSafe(self.dispatch(tool, args))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ToolError::unknown(
                "proxy_exception",
                format!("compound tool '{tool}' failed unexpectedly"),
            )
            .with_details(json!({ "reason": "proxy_exception", "tool": tool.to_string() }))),
        };

        let mut wrapped = envelope(&result);
        self.attach_extras(&mut wrapped, &options).await;
        self.trace_pipeline(tool, &result, &wrapped);
        wrapped
    }

    async fn dispatch(&self, tool: ProxyTool, args: Value) -> UsecaseResult<Value> {
        match tool {
            ProxyTool::ApplyTextureSpec => self.apply_texture_spec(args).await,
            ProxyTool::ApplyUvSpec => self.apply_uv_spec(args).await,
            ProxyTool::ModelPipeline => self.run_pipeline(args, MODEL_TOOLS, "model_pipeline").await,
            ProxyTool::TexturePipeline => {
                self.run_pipeline(args, TEXTURE_TOOLS, "texture_pipeline").await
            }
            ProxyTool::EntityPipeline => {
                self.run_pipeline(args, ENTITY_TOOLS, "entity_pipeline").await
            }
            ProxyTool::RenderPreview => Err(ToolError::not_implemented(
                "render previews require an attached editor host",
            )),
            ProxyTool::Validate => self.validate(args).await,
        }
    }

    /// Invoke one tool-service tool, revalidating through its schema and
    /// recording the step in the trace log.
    async fn invoke(&self, name: ToolName, args: Value) -> UsecaseResult<Value> {
        let spec = self
            .service
            .registry()
            .get(&name.to_string())
            .unwrap_or_else(|| unreachable!("registry covers every ToolName"));
        let result = match spec.schema.validate(args.clone()) {
            Ok(validated) => self.service.call_validated(name, validated).await,
            Err(violation) => Err(ToolError::invalid_payload(violation.message)),
        };
        if let Some(trace) = &self.trace {
            let response = match &result {
                Ok(ok) => TraceResponse {
                    ok: true,
                    data: Some(ok.data.clone()),
                    error: None,
                },
                Err(err) => TraceResponse {
                    ok: false,
                    data: None,
                    error: Some(err.to_wire()),
                },
            };
            trace.record_step(&name.to_string(), Some(args), response, None, None, None, None);
        }
        result
    }

    /// The single revision boundary: checked once at pipeline start; the
    /// steps inside run unguarded.
    async fn guard(&self, options: &ProxyOptions) -> Result<(), ToolError> {
        let Some(expected) = options.if_revision.as_deref() else {
            return Ok(());
        };
        let current = crate::tools::project::current_revision(self.service.as_ref()).await?;
        if expected != current {
            return Err(ToolError::revision_mismatch(expected, &current));
        }
        Ok(())
    }

    async fn cached_preflight(&self, cache: &mut RequestCache) -> Result<Value, ToolError> {
        if let Some(report) = cache.preflight() {
            return Ok(report.clone());
        }
        let report = self.invoke(ToolName::PreflightTexture, json!({})).await?.data;
        cache.store_preflight(report.clone());
        Ok(report)
    }

    // ---------------------------------------------------------------
    // Compound tools
    // ---------------------------------------------------------------

    async fn apply_texture_spec(&self, args: Value) -> UsecaseResult<Value> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Request {
            ops: Vec<Value>,
            uv_usage_id: Option<String>,
            #[serde(flatten)]
            options: ProxyOptions,
        }
        let req: Request = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_payload(format!("malformed payload: {e}")))?;
        if req.ops.is_empty() {
            return Err(ToolError::invalid_payload("ops must not be empty"));
        }
        self.guard(&req.options).await?;

        let mut cache = RequestCache::new();
        let token = match &req.uv_usage_id {
            Some(token) => token.clone(),
            None => {
                self.cached_preflight(&mut cache).await?;
                cache
                    .uv_usage_id()
                    .map(str::to_string)
                    .ok_or_else(|| ToolError::unknown("preflight_shape", "preflight returned no uvUsageId"))?
            }
        };

        let paint_args = |token: &str| json!({ "uvUsageId": token, "ops": req.ops });
        match self.invoke(ToolName::PaintFaces, paint_args(&token)).await {
            Ok(ok) => Ok(ToolOk {
                data: json!({ "paint": ok.data, "uvUsageId": token }),
                revision: ok.revision,
            }),
            Err(err) if err.reason() == Some("uv_usage_changed") && req.options.auto_recover => {
                // Recovery path: rebuild the layout, take a fresh token,
                // and retry the paint exactly once.
                self.invoke(ToolName::AutoUvAtlas, json!({ "apply": true })).await?;
                cache.invalidate();
                self.cached_preflight(&mut cache).await?;
                let fresh = cache
                    .uv_usage_id()
                    .map(str::to_string)
                    .ok_or_else(|| ToolError::unknown("preflight_shape", "preflight returned no uvUsageId"))?;
                let ok = self.invoke(ToolName::PaintFaces, paint_args(&fresh)).await?;
                Ok(ToolOk {
                    data: json!({
                        "paint": ok.data,
                        "uvUsageId": fresh,
                        "recovery": {
                            "reason": "uv_usage_changed",
                            "autoUvAtlas": true,
                            "uvUsageId": fresh,
                        },
                    }),
                    revision: ok.revision,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn apply_uv_spec(&self, args: Value) -> UsecaseResult<Value> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Request {
            faces: Vec<Value>,
            #[serde(flatten)]
            options: ProxyOptions,
        }
        let req: Request = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_payload(format!("malformed payload: {e}")))?;
        if req.faces.is_empty() {
            return Err(ToolError::invalid_payload("faces must not be empty"));
        }
        self.guard(&req.options).await?;

        let mut applied = 0usize;
        let mut skipped = 0usize;
        let mut revision = None;
        for (i, face) in req.faces.iter().enumerate() {
            match self.invoke(ToolName::SetFaceUv, face.clone()).await {
                Ok(ok) => {
                    applied += 1;
                    revision = ok.revision.or(revision);
                }
                // An already-correct face is fine inside a spec apply.
                Err(err) if err.code == crate::error::ErrorCode::NoChange => skipped += 1,
                Err(err) => {
                    return Err(step_failure(err, i, "set_face_uv"));
                }
            }
        }
        Ok(ToolOk {
            data: json!({ "applied": applied, "skipped": skipped }),
            revision,
        })
    }

    async fn run_pipeline(
        &self,
        args: Value,
        allowed: &[ToolName],
        pipeline: &str,
    ) -> UsecaseResult<Value> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Step {
            tool: String,
            #[serde(default)]
            args: Value,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Request {
            steps: Vec<Step>,
            #[serde(flatten)]
            options: ProxyOptions,
        }
        let req: Request = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_payload(format!("malformed payload: {e}")))?;
        if req.steps.is_empty() {
            return Err(ToolError::invalid_payload("steps must not be empty"));
        }
        self.guard(&req.options).await?;

        let mut results = Vec::new();
        let mut revision = None;
        for (i, step) in req.steps.iter().enumerate() {
            let name = ToolName::from_str(&step.tool).map_err(|_| {
                ToolError::invalid_payload(format!("unknown tool '{}' in step {i}", step.tool))
            })?;
            if !allowed.contains(&name) {
                return Err(ToolError::invalid_payload(format!(
                    "tool '{}' is not allowed in {pipeline}",
                    step.tool
                )));
            }
            // The pipeline guard already ran; per-step guards are stripped.
            let mut step_args = step.args.clone();
            if let Some(obj) = step_args.as_object_mut() {
                obj.remove("ifRevision");
            }
            if step_args.is_null() {
                step_args = json!({});
            }
            let outcome = match self.invoke(name, step_args.clone()).await {
                Ok(ok) => ok,
                Err(err)
                    if err.reason() == Some("uv_usage_changed") && req.options.auto_recover =>
                {
                    self.invoke(ToolName::AutoUvAtlas, json!({ "apply": true })).await?;
                    let report = self.invoke(ToolName::PreflightTexture, json!({})).await?;
                    let fresh = report.data["uvUsageId"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    if let Some(obj) = step_args.as_object_mut() {
                        obj.insert("uvUsageId".to_string(), json!(fresh));
                    }
                    let retried = self
                        .invoke(name, step_args)
                        .await
                        .map_err(|e| step_failure(e, i, &step.tool))?;
                    results.push(json!({
                        "tool": step.tool,
                        "data": retried.data,
                        "recovery": { "reason": "uv_usage_changed", "autoUvAtlas": true, "uvUsageId": fresh },
                    }));
                    revision = retried.revision.or(revision);
                    continue;
                }
                Err(err) if err.code == crate::error::ErrorCode::NoChange => {
                    results.push(json!({ "tool": step.tool, "skipped": true }));
                    continue;
                }
                Err(err) => return Err(step_failure(err, i, &step.tool)),
            };
            revision = outcome.revision.clone().or(revision);
            results.push(json!({ "tool": step.tool, "data": outcome.data }));
        }
        Ok(ToolOk {
            data: json!({ "steps": results }),
            revision,
        })
    }

    async fn validate(&self, args: Value) -> UsecaseResult<Value> {
        let options = ProxyOptions::parse(&args);
        self.guard(&options).await?;
        let mut cache = RequestCache::new();
        let validation = self
            .invoke(ToolName::ValidateProject, json!({}))
            .await?;
        let preflight = self.cached_preflight(&mut cache).await?;
        Ok(ToolOk {
            data: json!({
                "validation": validation.data,
                "preflight": {
                    "uvUsageId": preflight.get("uvUsageId"),
                    "diagnostics": preflight.get("diagnostics"),
                },
            }),
            revision: validation.revision,
        })
    }

    // ---------------------------------------------------------------
    // State / diff attachment
    // ---------------------------------------------------------------

    async fn attach_extras(&self, wrapped: &mut Value, options: &ProxyOptions) {
        if options.attach_state {
            match self.invoke(ToolName::GetProjectState, json!({})).await {
                Ok(ok) => wrapped["state"] = ok.data,
                Err(err) => wrapped["stateError"] = json!(err.message),
            }
        }
        if options.attach_diff {
            let since = options
                .diff_since
                .as_deref()
                .or(options.if_revision.as_deref());
            match since {
                None => {
                    wrapped["diffError"] = json!("no baseline revision: pass diffSince or ifRevision");
                }
                Some(since) => match self.compute_diff_since(since).await {
                    Ok(diff) => wrapped["diff"] = diff,
                    Err(message) => wrapped["diffError"] = json!(message),
                },
            }
        }
    }

    async fn compute_diff_since(&self, since: &str) -> Result<Value, String> {
        let before = self
            .service
            .revision_snapshot(since)
            .await
            .ok_or_else(|| format!("revision {since} is no longer retained"))?;
        let current = self
            .invoke(ToolName::GetProjectState, json!({}))
            .await
            .map_err(|e| e.message.clone())?;
        let after: ProjectSnapshot =
            serde_json::from_value(current.data).map_err(|e| e.to_string())?;
        Ok(diff::compute_diff(&before, &after))
    }

    fn trace_pipeline(&self, tool: ProxyTool, result: &UsecaseResult<Value>, wrapped: &Value) {
        let Some(trace) = &self.trace else { return };
        let response = match result {
            Ok(ok) => TraceResponse {
                ok: true,
                data: Some(ok.data.clone()),
                error: None,
            },
            Err(err) => TraceResponse {
                ok: false,
                data: None,
                error: Some(err.to_wire()),
            },
        };
        trace.record_step(
            &tool.to_string(),
            None,
            response,
            wrapped.get("state").cloned(),
            wrapped.get("diff").cloned(),
            wrapped.get("stateError").and_then(Value::as_str).map(String::from),
            wrapped.get("diffError").and_then(Value::as_str).map(String::from),
        );
    }
}

fn step_failure(err: ToolError, step: usize, tool: &str) -> ToolError {
    let mut details = err.details.clone().unwrap_or_else(|| json!({}));
    if let Some(obj) = details.as_object_mut() {
        obj.insert("failedStep".to_string(), json!(step));
        obj.insert("failedTool".to_string(), json!(tool));
    }
    ToolError {
        details: Some(details),
        ..err
    }
}

const MODEL_TOOLS: &[ToolName] = &[
    ToolName::AddBone,
    ToolName::UpdateBone,
    ToolName::DeleteBone,
    ToolName::AddCube,
    ToolName::UpdateCube,
    ToolName::DeleteCube,
    ToolName::AddMesh,
    ToolName::UpdateMesh,
    ToolName::DeleteMesh,
    ToolName::GetProjectState,
];

const TEXTURE_TOOLS: &[ToolName] = &[
    ToolName::ImportTexture,
    ToolName::UpdateTexture,
    ToolName::DeleteTexture,
    ToolName::AssignTexture,
    ToolName::PaintFaces,
    ToolName::SetFaceUv,
    ToolName::AutoUvAtlas,
    ToolName::PreflightTexture,
    ToolName::SetTextureResolution,
    ToolName::SetUvPixelsPerBlock,
    ToolName::GetProjectState,
];

const ENTITY_TOOLS: &[ToolName] = &[
    ToolName::AddBone,
    ToolName::UpdateBone,
    ToolName::DeleteBone,
    ToolName::AddCube,
    ToolName::UpdateCube,
    ToolName::DeleteCube,
    ToolName::ImportTexture,
    ToolName::AssignTexture,
    ToolName::SetFaceUv,
    ToolName::AutoUvAtlas,
    ToolName::PreflightTexture,
    ToolName::CreateAnimation,
    ToolName::UpdateAnimation,
    ToolName::SetFramePose,
    ToolName::SetAnimationTriggers,
    ToolName::GetProjectState,
];

fn descriptor(tool: ProxyTool) -> ToolDescriptor {
    use FieldRule as F;
    let shared = || {
        vec![
            F::string("ifRevision").describe("Run only if the project is at this revision"),
            F::boolean("attachState").describe("Attach the current project state to the response"),
            F::boolean("attachDiff").describe("Attach a diff since diffSince/ifRevision"),
            F::string("diffSince"),
            F::boolean("autoRecover").describe("Recover from stale UV layouts automatically"),
        ]
    };
    let (title, description, mut fields): (&str, &str, Vec<FieldRule>) = match tool {
        ProxyTool::ApplyTextureSpec => (
            "Apply texture spec",
            "Preflight, then paint textures under one revision boundary.",
            vec![
                F::array_of("ops", FieldKind::Object).required().non_empty(),
                F::string("uvUsageId"),
            ],
        ),
        ProxyTool::ApplyUvSpec => (
            "Apply UV spec",
            "Set several face UV rects under one revision boundary.",
            vec![F::array_of("faces", FieldKind::Object).required().non_empty()],
        ),
        ProxyTool::ModelPipeline => (
            "Model pipeline",
            "Run a sequence of outliner tools under one revision boundary.",
            vec![F::array_of("steps", FieldKind::Object).required().non_empty()],
        ),
        ProxyTool::TexturePipeline => (
            "Texture pipeline",
            "Run a sequence of texture/UV tools under one revision boundary.",
            vec![F::array_of("steps", FieldKind::Object).required().non_empty()],
        ),
        ProxyTool::EntityPipeline => (
            "Entity pipeline",
            "Run a mixed model/texture/animation sequence under one revision boundary.",
            vec![F::array_of("steps", FieldKind::Object).required().non_empty()],
        ),
        ProxyTool::RenderPreview => (
            "Render preview",
            "Render a preview image via the editor host.",
            vec![],
        ),
        ProxyTool::Validate => (
            "Validate",
            "Run validation plus texture preflight and merge the reports.",
            vec![],
        ),
    };
    fields.extend(shared());
    ToolDescriptor {
        name: tool.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        input_schema: ToolSchema::new(fields).to_json_schema(),
    }
}
