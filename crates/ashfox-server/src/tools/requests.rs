// crates/ashfox-server/src/tools/requests.rs
// Typed payloads, one struct per tool. The transport validates against the
// declarative schema first; these deserializations enforce the same shape
// at the type level for internal callers.

use ashfox_types::CubeFace;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    pub format: Option<String>,
    pub format_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureProjectRequest {
    pub name: Option<String>,
    pub format: Option<String>,
    pub format_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetProjectStateRequest {
    /// Include texture pixel data URIs in the response.
    #[serde(default)]
    pub include_pixels: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTextureResolutionRequest {
    pub width: u32,
    pub height: u32,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetUvPixelsPerBlockRequest {
    pub value: f64,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportTextureRequest {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub path: Option<String>,
    pub content_hash: Option<String>,
    pub data_uri: Option<String>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTextureRequest {
    /// Texture id or name.
    pub texture: String,
    pub name: Option<String>,
    pub width: u32,
    pub height: u32,
    pub path: Option<String>,
    pub content_hash: Option<String>,
    pub data_uri: Option<String>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTextureRequest {
    pub texture: String,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTextureRequest {
    pub texture: String,
    /// Cube names; all cubes when absent.
    pub cubes: Option<Vec<String>>,
    /// Faces to assign; all six when absent.
    pub faces: Option<Vec<CubeFace>>,
    pub if_revision: Option<String>,
}

/// One paint operation. The gateway has no rasterizer; it records the op
/// and rolls the texture's content hash so downstream consumers notice.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaintOp {
    pub texture: String,
    /// Hex color like "#ff8800".
    pub color: Option<String>,
    /// Pixel rect [x1, y1, x2, y2] within the texture.
    pub rect: Option<[f64; 4]>,
    /// Replacement pixel data.
    pub data_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaintFacesRequest {
    pub uv_usage_id: String,
    pub ops: Vec<PaintOp>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetFaceUvRequest {
    pub cube: String,
    pub face: CubeFace,
    pub uv: [f64; 4],
    pub texture: Option<String>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoUvAtlasRequest {
    #[serde(default)]
    pub apply: bool,
    /// Pixels of padding between packed rects.
    pub padding: Option<u32>,
    pub texture: Option<String>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightTextureRequest {
    /// Texture ids or names; all textures when absent.
    pub textures: Option<Vec<String>>,
    #[serde(default)]
    pub include_usage: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBoneRequest {
    pub name: String,
    pub parent: Option<String>,
    pub pivot: Option<[f64; 3]>,
    pub rotation: Option<[f64; 3]>,
    pub scale: Option<[f64; 3]>,
    pub visibility: Option<bool>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBoneRequest {
    pub bone: String,
    pub name: Option<String>,
    /// Explicit null reparents to the root.
    #[serde(default, deserialize_with = "double_option")]
    pub parent: Option<Option<String>>,
    pub pivot: Option<[f64; 3]>,
    pub rotation: Option<[f64; 3]>,
    pub scale: Option<[f64; 3]>,
    pub visibility: Option<bool>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBoneRequest {
    pub bone: String,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCubeRequest {
    pub name: String,
    pub bone: String,
    pub from: [f64; 3],
    pub to: [f64; 3],
    pub origin: Option<[f64; 3]>,
    pub rotation: Option<[f64; 3]>,
    pub uv_offset: Option<[f64; 2]>,
    #[serde(default)]
    pub box_uv: bool,
    pub inflate: Option<f64>,
    #[serde(default)]
    pub mirror: bool,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCubeRequest {
    pub cube: String,
    pub name: Option<String>,
    pub bone: Option<String>,
    pub from: Option<[f64; 3]>,
    pub to: Option<[f64; 3]>,
    pub origin: Option<[f64; 3]>,
    pub rotation: Option<[f64; 3]>,
    pub uv_offset: Option<[f64; 2]>,
    pub box_uv: Option<bool>,
    pub inflate: Option<f64>,
    pub mirror: Option<bool>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCubeRequest {
    pub cube: String,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshOpRequest {
    pub name: String,
    /// Host-specific mesh payload, passed through verbatim.
    pub mesh: Option<Value>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnimationRequest {
    pub name: String,
    pub length: f64,
    #[serde(default)]
    pub r#loop: bool,
    pub fps: Option<f64>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAnimationRequest {
    pub animation: String,
    pub name: Option<String>,
    pub length: Option<f64>,
    pub r#loop: Option<bool>,
    pub fps: Option<f64>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAnimationRequest {
    pub animation: String,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePose {
    pub rotation: Option<[f64; 3]>,
    pub position: Option<[f64; 3]>,
    pub scale: Option<[f64; 3]>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetFramePoseRequest {
    pub animation: String,
    pub time: f64,
    /// bone name → pose at `time`.
    pub poses: HashMap<String, FramePose>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerKey {
    pub time: f64,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAnimationTriggersRequest {
    pub animation: String,
    pub channel: String,
    pub keys: Vec<TriggerKey>,
    pub if_revision: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProjectRequest {
    pub format_id: Option<String>,
    pub format: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateProjectRequest {
    pub max_cubes: Option<u32>,
    /// Textures above this edge length are flagged oversize.
    pub max_texture_size: Option<u32>,
}

/// Distinguishes "field absent" from "field explicitly null" during
/// deserialization (used for reparenting to root).
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::<String>::deserialize(deserializer)?))
}
