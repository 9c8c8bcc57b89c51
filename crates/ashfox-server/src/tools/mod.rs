// crates/ashfox-server/src/tools/mod.rs
// The tool service: registry, revision/active-project guards, dispatch.
// Every usecase is an async fn from a typed payload to UsecaseResult.

pub mod animation;
pub mod export;
pub mod model;
pub mod project;
pub mod requests;
pub mod texture;
pub mod uv;
pub mod validate;

use crate::adapter::{BackendPort, EditorAdapter, ToolCallOutcome, ToolDescriptor};
use crate::error::{ToolError, ToolOk, UsecaseResult, envelope};
use crate::merge::{MergeOptions, merge_snapshots};
use crate::revision::{RevisionStore, djb2, hash_snapshot};
use crate::schema::{FieldKind, FieldRule, ToolSchema, ValidatedArgs};
use crate::session::ProjectSession;
use ashfox_types::{LiveSnapshot, ProjectSnapshot};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tokio::sync::{Mutex, MutexGuard};

/// Every tool this gateway serves. The wire name is the snake_case form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum ToolName {
    CreateProject,
    CloseProject,
    EnsureProject,
    DeleteProject,
    GetProjectState,
    SetTextureResolution,
    SetUvPixelsPerBlock,
    ImportTexture,
    UpdateTexture,
    DeleteTexture,
    AssignTexture,
    PaintFaces,
    SetFaceUv,
    AutoUvAtlas,
    PreflightTexture,
    AddBone,
    UpdateBone,
    DeleteBone,
    AddCube,
    UpdateCube,
    DeleteCube,
    AddMesh,
    UpdateMesh,
    DeleteMesh,
    CreateAnimation,
    UpdateAnimation,
    DeleteAnimation,
    SetFramePose,
    SetAnimationTriggers,
    ExportProject,
    ValidateProject,
}

/// Registry entry: schema plus listing metadata.
pub struct ToolSpec {
    pub name: ToolName,
    pub title: &'static str,
    pub description: &'static str,
    pub schema: ToolSchema,
}

/// Immutable at startup: name → spec.
pub struct ToolRegistry {
    specs: BTreeMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn build() -> Self {
        let mut specs = BTreeMap::new();
        for name in ToolName::iter() {
            let spec = spec_for(name);
            specs.insert(name.to_string(), spec);
        }
        Self { specs }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.get(name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.specs
            .values()
            .map(|spec| ToolDescriptor {
                name: spec.name.to_string(),
                title: spec.title.to_string(),
                description: spec.description.to_string(),
                input_schema: spec.schema.to_json_schema(),
            })
            .collect()
    }

    /// Stable hash over the sorted tool list, used by contract tests to
    /// catch accidental registry drift.
    pub fn fingerprint(&self) -> String {
        let mut canonical = String::new();
        for (name, spec) in &self.specs {
            canonical.push_str(name);
            canonical.push('=');
            canonical.push_str(&spec.schema.to_json_schema().to_string());
            canonical.push(';');
        }
        format!("{:08x}", djb2(canonical.as_bytes()))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

const FACE_NAMES: &[&str] = &["north", "south", "east", "west", "up", "down"];
const FORMAT_NAMES: &[&str] = &["animated_java", "geckolib", "vanilla"];

fn spec_for(name: ToolName) -> ToolSpec {
    use FieldRule as F;
    let if_revision =
        || F::string("ifRevision").describe("Mutate only if the project is at this revision");
    let (title, description, fields): (&'static str, &'static str, Vec<FieldRule>) = match name {
        ToolName::CreateProject => (
            "Create project",
            "Create a fresh project session with the given name and optional format.",
            vec![
                F::string("name").required().non_empty(),
                F::enumeration("format", FORMAT_NAMES),
                F::string("formatId"),
            ],
        ),
        ToolName::CloseProject => (
            "Close project",
            "Close the active project session, discarding unexported state.",
            vec![],
        ),
        ToolName::EnsureProject => (
            "Ensure project",
            "Attach the live editor project, or create an empty one when none exists.",
            vec![
                F::string("name"),
                F::enumeration("format", FORMAT_NAMES),
                F::string("formatId"),
            ],
        ),
        ToolName::DeleteProject => (
            "Delete project",
            "Delete the active project and close its session.",
            vec![],
        ),
        ToolName::GetProjectState => (
            "Get project state",
            "Return the canonical snapshot and its revision.",
            vec![F::boolean("includePixels")],
        ),
        ToolName::SetTextureResolution => (
            "Set texture resolution",
            "Set the project-default texture resolution.",
            vec![
                F::integer("width").required().min(1.0).max(16384.0),
                F::integer("height").required().min(1.0).max(16384.0),
                if_revision(),
            ],
        ),
        ToolName::SetUvPixelsPerBlock => (
            "Set UV density",
            "Set the UV pixels-per-block density used by UV layout tools.",
            vec![F::number("value").required().min(0.0), if_revision()],
        ),
        ToolName::ImportTexture => (
            "Import texture",
            "Add a texture slot, optionally with pixel data.",
            vec![
                F::string("name").required().non_empty(),
                F::integer("width").required().min(1.0),
                F::integer("height").required().min(1.0),
                F::string("path"),
                F::string("contentHash"),
                F::string("dataUri"),
                if_revision(),
            ],
        ),
        ToolName::UpdateTexture => (
            "Update texture",
            "Update a texture's metadata or pixel data.",
            vec![
                F::string("texture").required().non_empty(),
                F::string("name"),
                F::integer("width").required().min(1.0),
                F::integer("height").required().min(1.0),
                F::string("path"),
                F::string("contentHash"),
                F::string("dataUri"),
                if_revision(),
            ],
        ),
        ToolName::DeleteTexture => (
            "Delete texture",
            "Remove a texture and clear face references to it.",
            vec![F::string("texture").required().non_empty(), if_revision()],
        ),
        ToolName::AssignTexture => (
            "Assign texture",
            "Assign a texture to cube faces, keeping existing UV rects.",
            vec![
                F::string("texture").required().non_empty(),
                F::array_of("cubes", FieldKind::String),
                F::array_of("faces", FieldKind::Enum(FACE_NAMES)),
                if_revision(),
            ],
        ),
        ToolName::PaintFaces => (
            "Paint faces",
            "Apply paint operations to textures. Requires the uvUsageId from a preceding preflight_texture call.",
            vec![
                F::string("uvUsageId").required().non_empty(),
                F::array_of("ops", FieldKind::Object).required().non_empty(),
                if_revision(),
            ],
        ),
        ToolName::SetFaceUv => (
            "Set face UV",
            "Set one cube face's UV rect and optionally its texture.",
            vec![
                F::string("cube").required().non_empty(),
                F::enumeration("face", FACE_NAMES).required(),
                F::array_of("uv", FieldKind::Number).required(),
                F::string("texture"),
                if_revision(),
            ],
        ),
        ToolName::AutoUvAtlas => (
            "Auto UV atlas",
            "Pack all cube faces into a texture atlas; apply=true writes the layout.",
            vec![
                F::boolean("apply"),
                F::integer("padding").min(0.0).max(64.0),
                F::string("texture"),
                if_revision(),
            ],
        ),
        ToolName::PreflightTexture => (
            "Preflight texture",
            "Inspect UV usage, report layout diagnostics, and compute the uvUsageId token paint tools require.",
            vec![
                F::array_of("textures", FieldKind::String),
                F::boolean("includeUsage"),
            ],
        ),
        ToolName::AddBone => (
            "Add bone",
            "Add a bone to the outliner.",
            vec![
                F::string("name").required().non_empty(),
                F::string("parent"),
                F::array_of("pivot", FieldKind::Number),
                F::array_of("rotation", FieldKind::Number),
                F::array_of("scale", FieldKind::Number),
                F::boolean("visibility"),
                if_revision(),
            ],
        ),
        ToolName::UpdateBone => (
            "Update bone",
            "Update bone fields; renames cascade to children, cubes, and animation channels.",
            vec![
                F::string("bone").required().non_empty(),
                F::string("name"),
                F::string("parent"),
                F::array_of("pivot", FieldKind::Number),
                F::array_of("rotation", FieldKind::Number),
                F::array_of("scale", FieldKind::Number),
                F::boolean("visibility"),
                if_revision(),
            ],
        ),
        ToolName::DeleteBone => (
            "Delete bone",
            "Delete a bone that has no children or cubes.",
            vec![F::string("bone").required().non_empty(), if_revision()],
        ),
        ToolName::AddCube => (
            "Add cube",
            "Add a cube to a bone.",
            vec![
                F::string("name").required().non_empty(),
                F::string("bone").required().non_empty(),
                F::array_of("from", FieldKind::Number).required(),
                F::array_of("to", FieldKind::Number).required(),
                F::array_of("origin", FieldKind::Number),
                F::array_of("rotation", FieldKind::Number),
                F::array_of("uvOffset", FieldKind::Number),
                F::boolean("boxUv"),
                F::number("inflate"),
                F::boolean("mirror"),
                if_revision(),
            ],
        ),
        ToolName::UpdateCube => (
            "Update cube",
            "Update cube fields.",
            vec![
                F::string("cube").required().non_empty(),
                F::string("name"),
                F::string("bone"),
                F::array_of("from", FieldKind::Number),
                F::array_of("to", FieldKind::Number),
                F::array_of("origin", FieldKind::Number),
                F::array_of("rotation", FieldKind::Number),
                F::array_of("uvOffset", FieldKind::Number),
                F::boolean("boxUv"),
                F::number("inflate"),
                F::boolean("mirror"),
                if_revision(),
            ],
        ),
        ToolName::DeleteCube => (
            "Delete cube",
            "Delete a cube.",
            vec![F::string("cube").required().non_empty(), if_revision()],
        ),
        ToolName::AddMesh => (
            "Add mesh",
            "Add a free-form mesh (host capability; not all formats support meshes).",
            vec![
                F::string("name").required().non_empty(),
                F::object("mesh"),
                if_revision(),
            ],
        ),
        ToolName::UpdateMesh => (
            "Update mesh",
            "Update a free-form mesh (host capability).",
            vec![
                F::string("name").required().non_empty(),
                F::object("mesh"),
                if_revision(),
            ],
        ),
        ToolName::DeleteMesh => (
            "Delete mesh",
            "Delete a free-form mesh (host capability).",
            vec![F::string("name").required().non_empty(), if_revision()],
        ),
        ToolName::CreateAnimation => (
            "Create animation",
            "Create an animation clip.",
            vec![
                F::string("name").required().non_empty(),
                F::number("length").required().min(0.0),
                F::boolean("loop"),
                F::number("fps").min(0.0),
                if_revision(),
            ],
        ),
        ToolName::UpdateAnimation => (
            "Update animation",
            "Update clip metadata.",
            vec![
                F::string("animation").required().non_empty(),
                F::string("name"),
                F::number("length").min(0.0),
                F::boolean("loop"),
                F::number("fps").min(0.0),
                if_revision(),
            ],
        ),
        ToolName::DeleteAnimation => (
            "Delete animation",
            "Delete an animation clip.",
            vec![F::string("animation").required().non_empty(), if_revision()],
        ),
        ToolName::SetFramePose => (
            "Set frame pose",
            "Write keyframes for several bones at one point in time.",
            vec![
                F::string("animation").required().non_empty(),
                F::number("time").required().min(0.0),
                F::object("poses").required(),
                if_revision(),
            ],
        ),
        ToolName::SetAnimationTriggers => (
            "Set animation triggers",
            "Replace the keys of one trigger channel.",
            vec![
                F::string("animation").required().non_empty(),
                F::string("channel").required().non_empty(),
                F::array_of("keys", FieldKind::Object).required(),
                if_revision(),
            ],
        ),
        ToolName::ExportProject => (
            "Export project",
            "Export the project via the host's native exporter, falling back to the internal serializer.",
            vec![
                F::string("formatId"),
                F::enumeration("format", FORMAT_NAMES),
                F::string("fileName"),
            ],
        ),
        ToolName::ValidateProject => (
            "Validate project",
            "Cross-check the snapshot against limits and usage.",
            vec![
                F::integer("maxCubes").min(1.0),
                F::integer("maxTextureSize").min(1.0),
            ],
        ),
    };
    ToolSpec {
        name,
        title,
        description,
        schema: ToolSchema::new(fields),
    }
}

/// Policy knobs for the service, derived from [`crate::config::GatewayConfig`].
#[derive(Debug, Clone, Default)]
pub struct ToolServiceOptions {
    pub require_revision: bool,
    pub auto_attach: bool,
    pub merge: MergeOptions,
}

struct ServiceState {
    session: Option<ProjectSession>,
    revisions: RevisionStore,
}

/// Validated usecases over the project session. Owns the revision store;
/// the session and store are only reachable through this service.
pub struct ToolService {
    adapter: Arc<dyn EditorAdapter>,
    options: ToolServiceOptions,
    registry: ToolRegistry,
    state: Mutex<ServiceState>,
}

impl ToolService {
    pub fn new(adapter: Arc<dyn EditorAdapter>, options: ToolServiceOptions) -> Self {
        Self {
            adapter,
            options,
            registry: ToolRegistry::build(),
            state: Mutex::new(ServiceState {
                session: None,
                revisions: RevisionStore::new(),
            }),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn EditorAdapter> {
        &self.adapter
    }

    pub(crate) fn options(&self) -> &ToolServiceOptions {
        &self.options
    }

    /// Read the live snapshot, treating adapter failures as "no live view".
    pub(crate) async fn read_live(&self) -> Option<LiveSnapshot> {
        match self.adapter.live_snapshot().await {
            Ok(live) => live,
            Err(err) => {
                tracing::debug!(error = %err, "live snapshot read failed; continuing without");
                None
            }
        }
    }

    /// Snapshot a tracked revision (for proxy diffs).
    pub(crate) async fn revision_snapshot(&self, revision: &str) -> Option<ProjectSnapshot> {
        self.state.lock().await.revisions.get(revision)
    }

    /// Whether a project session is currently active.
    pub async fn has_session(&self) -> bool {
        self.state.lock().await.session.is_some()
    }

    async fn lock_with_session(
        &self,
    ) -> Result<(MutexGuard<'_, ServiceState>, Option<LiveSnapshot>), ToolError> {
        let live = self.read_live().await;
        let mut state = self.state.lock().await;
        if state.session.is_none() {
            match (&live, self.options.auto_attach) {
                (Some(live_snapshot), true) => {
                    tracing::info!(
                        project = %live_snapshot.snapshot.name,
                        "auto-attaching live editor project"
                    );
                    state.session = Some(ProjectSession::new(live_snapshot.snapshot.clone()));
                }
                _ => return Err(ToolError::no_active_project()),
            }
        }
        Ok((state, live))
    }

    fn canonical(&self, session: &ProjectSession, live: Option<&LiveSnapshot>) -> ProjectSnapshot {
        merge_snapshots(session.snapshot(), live, &self.options.merge)
    }

    /// The shared mutation contract: revision guard, active-project guard,
    /// execute, track. Payload validation happened before dispatch.
    ///
    /// The closure receives the session and the canonical pre-mutation
    /// snapshot; it returns the tool's data payload.
    pub(crate) async fn mutate<F>(&self, if_revision: Option<&str>, f: F) -> UsecaseResult<Value>
    where
        F: FnOnce(&mut ProjectSession, &ProjectSnapshot) -> Result<Value, ToolError>,
    {
        let (mut guard, live) = self.lock_with_session().await?;
        let state = &mut *guard;
        let session = state
            .session
            .as_mut()
            .unwrap_or_else(|| unreachable!("lock_with_session guarantees a session"));

        let canonical = merge_snapshots(session.snapshot(), live.as_ref(), &self.options.merge);
        let current = hash_snapshot(&canonical);
        match if_revision {
            Some(expected) if expected != current => {
                return Err(ToolError::revision_mismatch(expected, &current));
            }
            None if self.options.require_revision => {
                return Err(ToolError::revision_required());
            }
            _ => {}
        }
        state.revisions.track(&canonical);

        let session = state
            .session
            .as_mut()
            .unwrap_or_else(|| unreachable!("session still present"));
        let data = f(&mut *session, &canonical)?;

        let next = merge_snapshots(session.snapshot(), live.as_ref(), &self.options.merge);
        let revision = state.revisions.track(&next);
        Ok(ToolOk::with_revision(data, revision))
    }

    /// Read-side counterpart: no guard, but the canonical snapshot is
    /// tracked so the returned revision is usable as a later `ifRevision`.
    pub(crate) async fn read<F>(&self, f: F) -> UsecaseResult<Value>
    where
        F: FnOnce(&ProjectSession, &ProjectSnapshot) -> Result<Value, ToolError>,
    {
        let (mut guard, live) = self.lock_with_session().await?;
        let state = &mut *guard;
        let session = state
            .session
            .as_ref()
            .unwrap_or_else(|| unreachable!("lock_with_session guarantees a session"));
        let canonical = self.canonical(session, live.as_ref());
        let data = f(session, &canonical)?;
        let revision = state.revisions.track(&canonical);
        Ok(ToolOk::with_revision(data, revision))
    }

    /// Service-level state access for project lifecycle tools.
    pub(crate) async fn with_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Option<ProjectSession>, &mut RevisionStore) -> R,
    {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        f(&mut state.session, &mut state.revisions)
    }

    /// Dispatch a validated call. The transport resolved the name and
    /// validated the payload already.
    pub async fn call_validated(&self, name: ToolName, args: ValidatedArgs) -> UsecaseResult<Value> {
        use requests::*;
        let value = args.into_inner();
        match name {
            ToolName::CreateProject => {
                project::create_project(self, parse::<CreateProjectRequest>(value)?).await
            }
            ToolName::CloseProject => project::close_project(self).await,
            ToolName::EnsureProject => {
                project::ensure_project(self, parse::<EnsureProjectRequest>(value)?).await
            }
            ToolName::DeleteProject => project::delete_project(self).await,
            ToolName::GetProjectState => {
                project::get_project_state(self, parse::<GetProjectStateRequest>(value)?).await
            }
            ToolName::SetTextureResolution => {
                project::set_texture_resolution(self, parse::<SetTextureResolutionRequest>(value)?)
                    .await
            }
            ToolName::SetUvPixelsPerBlock => {
                project::set_uv_pixels_per_block(self, parse::<SetUvPixelsPerBlockRequest>(value)?)
                    .await
            }
            ToolName::ImportTexture => {
                texture::import_texture(self, parse::<ImportTextureRequest>(value)?).await
            }
            ToolName::UpdateTexture => {
                texture::update_texture(self, parse::<UpdateTextureRequest>(value)?).await
            }
            ToolName::DeleteTexture => {
                texture::delete_texture(self, parse::<DeleteTextureRequest>(value)?).await
            }
            ToolName::AssignTexture => {
                texture::assign_texture(self, parse::<AssignTextureRequest>(value)?).await
            }
            ToolName::PaintFaces => {
                texture::paint_faces(self, parse::<PaintFacesRequest>(value)?).await
            }
            ToolName::SetFaceUv => uv::set_face_uv(self, parse::<SetFaceUvRequest>(value)?).await,
            ToolName::AutoUvAtlas => {
                uv::auto_uv_atlas(self, parse::<AutoUvAtlasRequest>(value)?).await
            }
            ToolName::PreflightTexture => {
                uv::preflight_texture(self, parse::<PreflightTextureRequest>(value)?).await
            }
            ToolName::AddBone => model::add_bone(self, parse::<AddBoneRequest>(value)?).await,
            ToolName::UpdateBone => {
                model::update_bone(self, parse::<UpdateBoneRequest>(value)?).await
            }
            ToolName::DeleteBone => {
                model::delete_bone(self, parse::<DeleteBoneRequest>(value)?).await
            }
            ToolName::AddCube => model::add_cube(self, parse::<AddCubeRequest>(value)?).await,
            ToolName::UpdateCube => {
                model::update_cube(self, parse::<UpdateCubeRequest>(value)?).await
            }
            ToolName::DeleteCube => {
                model::delete_cube(self, parse::<DeleteCubeRequest>(value)?).await
            }
            ToolName::AddMesh => {
                model::mesh_op(self, "add", parse::<MeshOpRequest>(value)?).await
            }
            ToolName::UpdateMesh => {
                model::mesh_op(self, "update", parse::<MeshOpRequest>(value)?).await
            }
            ToolName::DeleteMesh => {
                model::mesh_op(self, "delete", parse::<MeshOpRequest>(value)?).await
            }
            ToolName::CreateAnimation => {
                animation::create_animation(self, parse::<CreateAnimationRequest>(value)?).await
            }
            ToolName::UpdateAnimation => {
                animation::update_animation(self, parse::<UpdateAnimationRequest>(value)?).await
            }
            ToolName::DeleteAnimation => {
                animation::delete_animation(self, parse::<DeleteAnimationRequest>(value)?).await
            }
            ToolName::SetFramePose => {
                animation::set_frame_pose(self, parse::<SetFramePoseRequest>(value)?).await
            }
            ToolName::SetAnimationTriggers => {
                animation::set_animation_triggers(
                    self,
                    parse::<SetAnimationTriggersRequest>(value)?,
                )
                .await
            }
            ToolName::ExportProject => {
                export::export_project(self, parse::<ExportProjectRequest>(value)?).await
            }
            ToolName::ValidateProject => {
                validate::validate_project(self, parse::<ValidateProjectRequest>(value)?).await
            }
        }
    }
}

fn parse<T: DeserializeOwned>(value: Value) -> Result<T, ToolError> {
    serde_json::from_value(value)
        .map_err(|e| ToolError::invalid_payload(format!("malformed payload: {e}")))
}

#[async_trait]
impl BackendPort for ToolService {
    /// Internal entry used by the worker and by tests. The HTTP router
    /// validates before dispatch itself so it can map violations to
    /// JSON-RPC −32602; this path re-validates because its callers bypass
    /// the transport.
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolCallOutcome {
        let Ok(tool) = ToolName::from_str(name) else {
            return ToolCallOutcome::UnknownTool;
        };
        let spec = self
            .registry
            .get(name)
            .unwrap_or_else(|| unreachable!("registry covers every ToolName"));
        let result = match spec.schema.validate(arguments) {
            Ok(args) => self.call_validated(tool, args).await,
            Err(violation) => Err(ToolError::invalid_payload(violation.message)
                .with_details(serde_json::json!({
                    "reason": "schema_violation",
                    "path": violation.path,
                }))),
        };
        ToolCallOutcome::Completed(envelope(&result))
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String> {
        Ok(self.registry.descriptors())
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::adapter::NullEditorAdapter;

    /// Service over the null adapter with auto-attach off: tests drive the
    /// session explicitly through create_project.
    pub(crate) fn service() -> ToolService {
        ToolService::new(
            Arc::new(NullEditorAdapter),
            ToolServiceOptions {
                require_revision: false,
                auto_attach: true,
                merge: MergeOptions::default(),
            },
        )
    }

    pub(crate) async fn call(service: &ToolService, name: &str, args: Value) -> Value {
        match service.call_tool(name, args).await {
            ToolCallOutcome::Completed(envelope) => envelope,
            other => panic!("expected completed call, got {other:?}"),
        }
    }

    pub(crate) async fn call_ok(service: &ToolService, name: &str, args: Value) -> Value {
        let envelope = call(service, name, args).await;
        assert_eq!(envelope["ok"], true, "tool {name} failed: {envelope}");
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::{call, call_ok, service};
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_covers_every_tool() {
        let registry = ToolRegistry::build();
        assert_eq!(registry.len(), ToolName::iter().count());
        assert!(registry.get("add_bone").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_fingerprint_is_stable() {
        assert_eq!(
            ToolRegistry::build().fingerprint(),
            ToolRegistry::build().fingerprint()
        );
    }

    #[tokio::test]
    async fn unknown_tool_is_distinguished() {
        let svc = service();
        assert_eq!(
            svc.call_tool("definitely_not_a_tool", json!({})).await,
            ToolCallOutcome::UnknownTool
        );
    }

    #[tokio::test]
    async fn schema_violation_becomes_invalid_payload() {
        let svc = service();
        let envelope = call(&svc, "create_project", json!({})).await;
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["code"], "invalid_payload");
        assert_eq!(envelope["error"]["details"]["reason"], "schema_violation");
    }

    #[tokio::test]
    async fn mutation_without_project_needs_active_project() {
        let svc = service();
        let envelope = call(&svc, "add_bone", json!({"name": "root"})).await;
        assert_eq!(envelope["error"]["details"]["reason"], "no_active_project");
    }

    #[tokio::test]
    async fn revision_guard_round_trip() {
        let svc = service();
        call_ok(&svc, "create_project", json!({"name": "fox"})).await;

        let state = call_ok(&svc, "get_project_state", json!({})).await;
        let r0 = state["revision"].as_str().unwrap().to_string();

        let added = call_ok(
            &svc,
            "add_bone",
            json!({"name": "root", "ifRevision": r0}),
        )
        .await;
        let r1 = added["revision"].as_str().unwrap().to_string();
        assert_ne!(r0, r1);

        // Stale revision now fails with guidance.
        let stale = call(&svc, "add_bone", json!({"name": "arm", "ifRevision": r0})).await;
        assert_eq!(stale["ok"], false);
        assert_eq!(stale["error"]["details"]["reason"], "revision_mismatch");
        assert_eq!(stale["error"]["details"]["expected"], r0);
        assert_eq!(stale["error"]["details"]["actual"], r1);
    }

    #[tokio::test]
    async fn require_revision_policy() {
        let svc = ToolService::new(
            Arc::new(crate::adapter::NullEditorAdapter),
            ToolServiceOptions {
                require_revision: true,
                auto_attach: false,
                merge: MergeOptions::default(),
            },
        );
        call_ok(&svc, "create_project", json!({"name": "fox"})).await;
        let envelope = call(&svc, "add_bone", json!({"name": "root"})).await;
        assert_eq!(envelope["error"]["details"]["reason"], "revision_required");
    }

    #[tokio::test]
    async fn identical_add_reports_no_change() {
        let svc = service();
        call_ok(&svc, "create_project", json!({"name": "fox"})).await;
        call_ok(&svc, "add_bone", json!({"name": "root"})).await;
        let repeat = call(&svc, "add_bone", json!({"name": "root"})).await;
        assert_eq!(repeat["error"]["code"], "no_change");
    }
}
