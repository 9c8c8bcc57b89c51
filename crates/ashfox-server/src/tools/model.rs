// crates/ashfox-server/src/tools/model.rs
// Outliner usecases: bones, cubes, and host-delegated meshes.

use super::requests::*;
use super::ToolService;
use crate::error::{ToolError, ToolOk, UsecaseResult};
use crate::session::{BonePatch, CubePatch, NewBone, NewCube};
use ashfox_types::FormatKind;
use serde_json::{Value, json};

pub(crate) async fn add_bone(svc: &ToolService, req: AddBoneRequest) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        let bone = session.add_bone(NewBone {
            name: req.name,
            parent: req.parent,
            pivot: req.pivot.unwrap_or([0.0, 0.0, 0.0]),
            rotation: req.rotation,
            scale: req.scale,
            visibility: req.visibility,
        })?;
        serde_json::to_value(bone).map_err(ToolError::from)
    })
    .await
}

pub(crate) async fn update_bone(svc: &ToolService, req: UpdateBoneRequest) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        let target = req.name.clone().unwrap_or_else(|| req.bone.clone());
        let changed = session.update_bone(
            &req.bone,
            BonePatch {
                name: req.name,
                parent: req.parent,
                pivot: req.pivot,
                rotation: req.rotation.map(Some),
                scale: req.scale.map(Some),
                visibility: req.visibility,
            },
        )?;
        if !changed {
            return Err(ToolError::no_change("bone_unchanged"));
        }
        Ok(json!({ "bone": target }))
    })
    .await
}

pub(crate) async fn delete_bone(svc: &ToolService, req: DeleteBoneRequest) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        session.delete_bone(&req.bone)?;
        Ok(json!({ "deleted": req.bone }))
    })
    .await
}

pub(crate) async fn add_cube(svc: &ToolService, req: AddCubeRequest) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        let cube = session.add_cube(NewCube {
            name: req.name,
            bone: req.bone,
            from: req.from,
            to: req.to,
            origin: req.origin,
            rotation: req.rotation,
            uv_offset: req.uv_offset,
            box_uv: req.box_uv,
            inflate: req.inflate,
            mirror: req.mirror,
        })?;
        serde_json::to_value(cube).map_err(ToolError::from)
    })
    .await
}

pub(crate) async fn update_cube(svc: &ToolService, req: UpdateCubeRequest) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        let target = req.name.clone().unwrap_or_else(|| req.cube.clone());
        let changed = session.update_cube(
            &req.cube,
            CubePatch {
                name: req.name,
                bone: req.bone,
                from: req.from,
                to: req.to,
                origin: req.origin,
                rotation: req.rotation.map(Some),
                uv_offset: req.uv_offset,
                box_uv: req.box_uv,
                inflate: req.inflate,
                mirror: req.mirror,
            },
        )?;
        if !changed {
            return Err(ToolError::no_change("cube_unchanged"));
        }
        Ok(json!({ "cube": target }))
    })
    .await
}

pub(crate) async fn delete_cube(svc: &ToolService, req: DeleteCubeRequest) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        session.delete_cube(&req.cube)?;
        Ok(json!({ "deleted": req.cube }))
    })
    .await
}

/// Meshes are not part of the snapshot model; they belong to the host.
/// Guards still run first so revision and project checks behave like every
/// other mutation, then the host capability takes over.
pub(crate) async fn mesh_op(
    svc: &ToolService,
    action: &str,
    req: MeshOpRequest,
) -> UsecaseResult<Value> {
    let capabilities = svc.adapter().capabilities();
    let guard = svc
        .mutate(req.if_revision.as_deref(), |_, canonical| {
            if canonical.format == Some(FormatKind::Vanilla) {
                return Err(ToolError::unsupported_format(
                    "the vanilla format cannot host free-form meshes",
                ));
            }
            if !capabilities.meshes {
                return Err(ToolError::not_implemented(
                    "the attached editor host does not support meshes",
                ));
            }
            Ok(Value::Null)
        })
        .await?;

    let payload = json!({ "name": req.name, "mesh": req.mesh });
    let result = svc.adapter().mesh_op(action, &payload).await?;
    Ok(ToolOk {
        data: json!({ "action": action, "name": req.name, "result": result }),
        revision: guard.revision,
    })
}
