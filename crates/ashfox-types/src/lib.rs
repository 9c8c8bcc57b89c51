// crates/ashfox-types/src/lib.rs

//! Shared data contracts between the Ashfox gateway and its clients.
//!
//! This crate provides the wire-visible domain model for:
//! - **Project snapshots**: bones, cubes, textures, animations
//! - **Native pipeline records**: workspaces, projects, jobs, events
//!
//! These types are plain serde data. All behavior (hashing, merging,
//! validation) lives in the server crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ===================================================
// PROJECT SNAPSHOT
// ===================================================

/// Model format family a project belongs to.
///
/// Serialized as the format's canonical identifier string. Unknown format
/// ids are kept as raw strings on the snapshot and normalized by the
/// gateway's merge layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    AnimatedJava,
    Geckolib,
    Vanilla,
}

impl FormatKind {
    pub const ALL: [FormatKind; 3] = [
        FormatKind::AnimatedJava,
        FormatKind::Geckolib,
        FormatKind::Vanilla,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::AnimatedJava => "animated_java",
            FormatKind::Geckolib => "geckolib",
            FormatKind::Vanilla => "vanilla",
        }
    }
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FormatKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "animated_java" => Ok(FormatKind::AnimatedJava),
            "geckolib" => Ok(FormatKind::Geckolib),
            "vanilla" => Ok(FormatKind::Vanilla),
            _ => Err(()),
        }
    }
}

/// One of the six faces of a cube.
///
/// Ordered (via `BTreeMap` keys) so face iteration is deterministic, which
/// the revision hash depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CubeFace {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::North,
        CubeFace::South,
        CubeFace::East,
        CubeFace::West,
        CubeFace::Up,
        CubeFace::Down,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CubeFace::North => "north",
            CubeFace::South => "south",
            CubeFace::East => "east",
            CubeFace::West => "west",
            CubeFace::Up => "up",
            CubeFace::Down => "down",
        }
    }
}

/// Per-face UV assignment: a rect `[x1, y1, x2, y2]` plus the texture it
/// samples from (by texture id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceUv {
    pub uv: [f64; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture: Option<String>,
}

/// A bone in the outliner. Parent linkage is by bone *name*, never by
/// pointer; the gateway rebuilds a lookup index from the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bone {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub pivot: [f64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<[f64; 3]>,
    #[serde(default = "default_true")]
    pub visibility: bool,
}

/// A cuboid element attached to a bone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cube {
    pub id: String,
    pub name: String,
    pub bone: String,
    pub from: [f64; 3],
    pub to: [f64; 3],
    pub origin: [f64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<[f64; 3]>,
    #[serde(default)]
    pub uv_offset: [f64; 2],
    #[serde(default)]
    pub box_uv: bool,
    #[serde(default)]
    pub inflate: f64,
    #[serde(default)]
    pub mirror: bool,
    #[serde(default)]
    pub faces: BTreeMap<CubeFace, FaceUv>,
}

/// A texture slot. Pixel data travels as a data URI when present; the
/// gateway otherwise tracks it by content hash only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Texture {
    pub id: String,
    pub name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_uri: Option<String>,
}

/// One keyframe on a bone channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
    pub time: f64,
    pub value: [f64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpolation: Option<String>,
}

/// Rotation/position/scale keyframe tracks for a single bone.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoneChannels {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rotation: Vec<Keyframe>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub position: Vec<Keyframe>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scale: Vec<Keyframe>,
}

impl BoneChannels {
    pub fn is_empty(&self) -> bool {
        self.rotation.is_empty() && self.position.is_empty() && self.scale.is_empty()
    }
}

/// A non-transform keyframe (sound/particle/instruction triggers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerKeyframe {
    pub time: f64,
    pub value: String,
}

/// An animation clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Animation {
    pub id: String,
    pub name: String,
    /// Clip length in seconds.
    pub length: f64,
    #[serde(default)]
    pub r#loop: bool,
    pub fps: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub channels: BTreeMap<String, BoneChannels>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub triggers: BTreeMap<String, Vec<TriggerKeyframe>>,
}

/// Full state of one editor project.
///
/// `revision` is the content hash computed by the gateway; it is carried on
/// the wire but never feeds back into hashing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default)]
    pub dirty: bool,
    /// Project-default texture resolution `[width, height]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uv_pixels_per_block: Option<f64>,
    #[serde(default)]
    pub bones: Vec<Bone>,
    #[serde(default)]
    pub cubes: Vec<Cube>,
    #[serde(default)]
    pub textures: Vec<Texture>,
    #[serde(default)]
    pub animations: Vec<Animation>,
}

impl ProjectSnapshot {
    /// A fresh, empty project with the given identity.
    pub fn empty(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            format: None,
            format_id: None,
            revision: None,
            dirty: false,
            resolution: None,
            uv_pixels_per_block: None,
            bones: Vec::new(),
            cubes: Vec::new(),
            textures: Vec::new(),
            animations: Vec::new(),
        }
    }
}

/// Whether a live snapshot's animation data could be read from the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationsStatus {
    #[default]
    Available,
    Unavailable,
}

/// Snapshot read from a live editor host, as opposed to the gateway's own
/// session state. Merge policy decides which parts win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot {
    #[serde(flatten)]
    pub snapshot: ProjectSnapshot,
    #[serde(default)]
    pub animations_status: AnimationsStatus,
}

// ===================================================
// NATIVE PIPELINE RECORDS
// ===================================================

/// Entity counts summarizing a native project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub bones: u32,
    pub cubes: u32,
    pub textures: u32,
    pub animations: u32,
}

/// One node of the outliner hierarchy as persisted with a native project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cubes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HierarchyNode>,
}

/// Summary of an animation clip on a native project record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationSummary {
    pub name: String,
    pub length: f64,
    #[serde(default)]
    pub r#loop: bool,
}

/// Summary of a texture on a native project record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureSummary {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

/// Cooperative per-project lock. `expires_at` is epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectLockInfo {
    pub owner: String,
    pub expires_at: i64,
}

/// A project as recorded by the persistent pipeline store. Distinct from
/// an editor [`ProjectSnapshot`]: `revision` here is a monotonic integer
/// bumped on every mutation, not a content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeProjectSnapshot {
    pub workspace_id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_folder_id: Option<String>,
    pub name: String,
    pub revision: u64,
    pub stats: ProjectStats,
    pub has_geometry: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hierarchy: Vec<HierarchyNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub animations: Vec<AnimationSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub textures: Vec<TextureSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_job_status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<ProjectLockInfo>,
}

/// Kind of work a queued job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "gltf.convert")]
    GltfConvert,
    #[serde(rename = "texture.preflight")]
    TexturePreflight,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::GltfConvert => "gltf.convert",
            JobKind::TexturePreflight => "texture.preflight",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job state machine: queued → running → completed | failed.
/// The store never retries a job; retries are new jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of queued pipeline work. Timestamps are RFC 3339 strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeJob {
    pub id: String,
    pub project_id: String,
    pub workspace_id: String,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempt_count: u32,
}

/// Kind of a per-project event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectEventKind {
    #[serde(rename = "project.snapshot")]
    ProjectSnapshot,
    #[serde(rename = "job.status")]
    JobStatus,
}

impl ProjectEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectEventKind::ProjectSnapshot => "project.snapshot",
            ProjectEventKind::JobStatus => "job.status",
        }
    }
}

/// A monotonically-numbered record scoped to a project. Sequence numbers
/// are strictly increasing and gap-free per project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEvent {
    pub seq: u64,
    pub project_id: String,
    pub kind: ProjectEventKind,
    pub created_at: String,
    pub payload: serde_json::Value,
}

/// A multi-tenant grouping over projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRecord {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

/// A folder inside a workspace's project tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRecord {
    pub id: String,
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_kind_round_trips_through_str() {
        for kind in FormatKind::ALL {
            assert_eq!(kind.as_str().parse::<FormatKind>().ok(), Some(kind));
        }
    }

    #[test]
    fn bone_visibility_defaults_to_true() {
        let bone: Bone =
            serde_json::from_str(r#"{"id":"b1","name":"root","pivot":[0,0,0]}"#).unwrap();
        assert!(bone.visibility);
        assert_eq!(bone.parent, None);
    }

    #[test]
    fn cube_faces_serialize_in_fixed_order() {
        let mut faces = BTreeMap::new();
        faces.insert(
            CubeFace::Up,
            FaceUv {
                uv: [0.0, 0.0, 4.0, 4.0],
                texture: None,
            },
        );
        faces.insert(
            CubeFace::North,
            FaceUv {
                uv: [0.0, 0.0, 2.0, 2.0],
                texture: None,
            },
        );
        let json = serde_json::to_string(&faces).unwrap();
        // BTreeMap iterates in variant order: north before up.
        assert!(json.find("north").unwrap() < json.find("up").unwrap());
    }

    #[test]
    fn job_kind_wire_names_are_dotted() {
        let json = serde_json::to_string(&JobKind::GltfConvert).unwrap();
        assert_eq!(json, "\"gltf.convert\"");
        let kind: JobKind = serde_json::from_str("\"texture.preflight\"").unwrap();
        assert_eq!(kind, JobKind::TexturePreflight);
    }

    #[test]
    fn job_status_terminality() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn project_event_kind_wire_names() {
        let json = serde_json::to_string(&ProjectEventKind::ProjectSnapshot).unwrap();
        assert_eq!(json, "\"project.snapshot\"");
    }

    #[test]
    fn live_snapshot_flattens_project_fields() {
        let json = r#"{"id":"p1","name":"fox","animationsStatus":"unavailable"}"#;
        let live: LiveSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(live.snapshot.id, "p1");
        assert_eq!(live.animations_status, AnimationsStatus::Unavailable);
    }
}
