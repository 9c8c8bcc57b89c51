// crates/ashfox-server/src/tools/animation.rs
// Animation usecases: clip CRUD, frame poses, trigger keyframes.

use super::requests::*;
use super::ToolService;
use crate::error::{ToolError, UsecaseResult};
use crate::session::{AnimationPatch, BonePose, NewAnimation};
use ashfox_types::TriggerKeyframe;
use serde_json::{Value, json};
use std::collections::HashMap;

/// Clip frame rate used when the client does not specify one.
const DEFAULT_FPS: f64 = 20.0;

pub(crate) async fn create_animation(
    svc: &ToolService,
    req: CreateAnimationRequest,
) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        let animation = session.add_animation(NewAnimation {
            name: req.name,
            length: req.length,
            r#loop: req.r#loop,
            fps: req.fps.unwrap_or(DEFAULT_FPS),
        })?;
        serde_json::to_value(animation).map_err(ToolError::from)
    })
    .await
}

pub(crate) async fn update_animation(
    svc: &ToolService,
    req: UpdateAnimationRequest,
) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        let target = req.name.clone().unwrap_or_else(|| req.animation.clone());
        let changed = session.update_animation(
            &req.animation,
            AnimationPatch {
                name: req.name,
                length: req.length,
                r#loop: req.r#loop,
                fps: req.fps,
            },
        )?;
        if !changed {
            return Err(ToolError::no_change("animation_unchanged"));
        }
        Ok(json!({ "animation": target }))
    })
    .await
}

pub(crate) async fn delete_animation(
    svc: &ToolService,
    req: DeleteAnimationRequest,
) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        session.delete_animation(&req.animation)?;
        Ok(json!({ "deleted": req.animation }))
    })
    .await
}

pub(crate) async fn set_frame_pose(
    svc: &ToolService,
    req: SetFramePoseRequest,
) -> UsecaseResult<Value> {
    if req.poses.is_empty() {
        return Err(ToolError::invalid_payload("poses must not be empty"));
    }
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        let poses: HashMap<String, BonePose> = req
            .poses
            .iter()
            .map(|(bone, pose)| {
                (
                    bone.clone(),
                    BonePose {
                        rotation: pose.rotation,
                        position: pose.position,
                        scale: pose.scale,
                    },
                )
            })
            .collect();
        let changed = session.set_frame_pose(&req.animation, req.time, &poses)?;
        if !changed {
            return Err(ToolError::no_change("pose_unchanged"));
        }
        Ok(json!({
            "animation": req.animation,
            "time": req.time,
            "bones": poses.len(),
        }))
    })
    .await
}

pub(crate) async fn set_animation_triggers(
    svc: &ToolService,
    req: SetAnimationTriggersRequest,
) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        let keys: Vec<TriggerKeyframe> = req
            .keys
            .iter()
            .map(|k| TriggerKeyframe {
                time: k.time,
                value: k.value.clone(),
            })
            .collect();
        let count = keys.len();
        let changed = session.set_triggers(&req.animation, &req.channel, keys)?;
        if !changed {
            return Err(ToolError::no_change("triggers_unchanged"));
        }
        Ok(json!({
            "animation": req.animation,
            "channel": req.channel,
            "keys": count,
        }))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{call, call_ok, service};
    use serde_json::json;

    async fn project() -> crate::tools::ToolService {
        let svc = service();
        call_ok(&svc, "create_project", json!({"name": "fox"})).await;
        call_ok(&svc, "add_bone", json!({"name": "root"})).await;
        call_ok(
            &svc,
            "create_animation",
            json!({"name": "walk", "length": 1.0, "loop": true}),
        )
        .await;
        svc
    }

    #[tokio::test]
    async fn clip_gets_default_fps() {
        let svc = project().await;
        let state = call_ok(&svc, "get_project_state", json!({})).await;
        assert_eq!(state["data"]["animations"][0]["fps"], 20.0);
    }

    #[tokio::test]
    async fn frame_pose_writes_channels() {
        let svc = project().await;
        call_ok(
            &svc,
            "set_frame_pose",
            json!({
                "animation": "walk",
                "time": 0.25,
                "poses": {"root": {"rotation": [0, 45, 0]}},
            }),
        )
        .await;
        let state = call_ok(&svc, "get_project_state", json!({})).await;
        let track = &state["data"]["animations"][0]["channels"]["root"]["rotation"];
        assert_eq!(track[0]["time"], 0.25);
        assert_eq!(track[0]["value"][1], 45.0);

        // Unknown bone is rejected.
        let bad = call(
            &svc,
            "set_frame_pose",
            json!({
                "animation": "walk",
                "time": 0.5,
                "poses": {"ghost": {"rotation": [0, 0, 0]}},
            }),
        )
        .await;
        assert_eq!(bad["error"]["code"], "invalid_payload");
    }

    #[tokio::test]
    async fn triggers_replace_channel() {
        let svc = project().await;
        call_ok(
            &svc,
            "set_animation_triggers",
            json!({
                "animation": "walk",
                "channel": "sound",
                "keys": [{"time": 0.5, "value": "step"}, {"time": 0.1, "value": "creak"}],
            }),
        )
        .await;
        let state = call_ok(&svc, "get_project_state", json!({})).await;
        let keys = state["data"]["animations"][0]["triggers"]["sound"].as_array().unwrap();
        // Keys are stored sorted by time.
        assert_eq!(keys[0]["value"], "creak");
        assert_eq!(keys[1]["value"], "step");

        // Clearing the channel removes it.
        call_ok(
            &svc,
            "set_animation_triggers",
            json!({"animation": "walk", "channel": "sound", "keys": []}),
        )
        .await;
        let state = call_ok(&svc, "get_project_state", json!({})).await;
        assert!(state["data"]["animations"][0]["triggers"].get("sound").is_none());
    }

    #[tokio::test]
    async fn clip_validation_errors() {
        let svc = project().await;
        let bad = call(
            &svc,
            "update_animation",
            json!({"animation": "walk", "fps": 0.0}),
        )
        .await;
        assert_eq!(bad["error"]["code"], "invalid_payload");
        let missing = call(&svc, "delete_animation", json!({"animation": "run"})).await;
        assert_eq!(missing["error"]["code"], "invalid_payload");
    }
}
