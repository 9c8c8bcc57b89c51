// crates/ashfox-server/src/tools/texture.rs
// Texture usecases: import/update/delete, face assignment, and paint.
// The gateway carries no rasterizer; paint operations are recorded against
// the texture's content hash so clients and exporters see the change.

use super::requests::*;
use super::ToolService;
use crate::error::{ToolError, UsecaseResult};
use crate::revision::djb2;
use crate::session::NewTexture;
use crate::tools::uv::usage_id;
use ashfox_types::CubeFace;
use serde_json::{Value, json};

pub(crate) async fn import_texture(
    svc: &ToolService,
    req: ImportTextureRequest,
) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        let texture = session.add_texture(NewTexture {
            name: req.name,
            width: req.width,
            height: req.height,
            path: req.path,
            content_hash: req.content_hash,
            data_uri: req.data_uri,
        })?;
        serde_json::to_value(texture).map_err(ToolError::from)
    })
    .await
}

pub(crate) async fn update_texture(
    svc: &ToolService,
    req: UpdateTextureRequest,
) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        let changed = session.update_texture(
            &req.texture,
            NewTexture {
                name: req.name.unwrap_or_default(),
                width: req.width,
                height: req.height,
                path: req.path,
                content_hash: req.content_hash,
                data_uri: req.data_uri,
            },
        )?;
        if !changed {
            return Err(ToolError::no_change("texture_unchanged"));
        }
        let texture = session
            .find_texture(&req.texture)
            .or_else(|| session.snapshot().textures.last());
        serde_json::to_value(texture).map_err(ToolError::from)
    })
    .await
}

pub(crate) async fn delete_texture(
    svc: &ToolService,
    req: DeleteTextureRequest,
) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        session.delete_texture(&req.texture)?;
        Ok(json!({ "deleted": req.texture }))
    })
    .await
}

pub(crate) async fn assign_texture(
    svc: &ToolService,
    req: AssignTextureRequest,
) -> UsecaseResult<Value> {
    let faces: Vec<CubeFace> = req.faces.unwrap_or_else(|| CubeFace::ALL.to_vec());
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        let changed = session.assign_texture(&req.texture, req.cubes.as_deref(), &faces)?;
        if changed == 0 {
            return Err(ToolError::no_change("texture_already_assigned"));
        }
        Ok(json!({ "texture": req.texture, "facesChanged": changed }))
    })
    .await
}

pub(crate) async fn paint_faces(
    svc: &ToolService,
    req: PaintFacesRequest,
) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, canonical| {
        // Paint targets the layout observed at preflight time. A stale
        // token means the UV layout moved underneath the client.
        let current = usage_id(canonical);
        if req.uv_usage_id != current {
            return Err(ToolError::uv_usage_changed(&req.uv_usage_id, &current));
        }

        let mut touched = Vec::new();
        for op in &req.ops {
            let idx = session
                .texture_position(&op.texture)
                .ok_or_else(|| {
                    ToolError::invalid_payload(format!("texture '{}' does not exist", op.texture))
                })?;
            if let Some(rect) = op.rect {
                if rect[0] > rect[2] || rect[1] > rect[3] {
                    return Err(ToolError::invalid_payload(
                        "paint rect must be ordered: x1 <= x2 and y1 <= y2",
                    ));
                }
            }
            let snapshot = session.snapshot();
            let texture = &snapshot.textures[idx];
            let op_json = json!({
                "color": op.color,
                "rect": op.rect,
                "hasData": op.data_uri.is_some(),
            });
            let rolled = format!(
                "{}:{}",
                texture.content_hash.as_deref().unwrap_or(""),
                op_json
            );
            let new_hash = format!("{:08x}", djb2(rolled.as_bytes()));
            let (width, height, name) = (texture.width, texture.height, texture.name.clone());
            session.update_texture(
                &name,
                NewTexture {
                    name: String::new(),
                    width,
                    height,
                    path: None,
                    content_hash: Some(new_hash.clone()),
                    data_uri: op.data_uri.clone(),
                },
            )?;
            touched.push(json!({ "texture": name, "contentHash": new_hash }));
        }
        Ok(json!({ "painted": touched.len(), "textures": touched }))
    })
    .await
}
