// crates/ashfox-server/src/tools/validate.rs
// Cross-check the snapshot against limits and usage. Validation reports;
// it never mutates.

use super::requests::*;
use super::ToolService;
use crate::error::UsecaseResult;
use serde_json::{Value, json};
use std::collections::HashSet;

const DEFAULT_MAX_TEXTURE_SIZE: u32 = 4096;

fn issue(severity: &str, code: &str, subject: &str, message: String) -> Value {
    json!({
        "severity": severity,
        "code": code,
        "subject": subject,
        "message": message,
    })
}

pub(crate) async fn validate_project(
    svc: &ToolService,
    req: ValidateProjectRequest,
) -> UsecaseResult<Value> {
    let max_texture_size = req.max_texture_size.unwrap_or(DEFAULT_MAX_TEXTURE_SIZE);
    svc.read(move |_, snapshot| {
        let mut issues = Vec::new();

        // Name/id uniqueness per kind. The session enforces this on write,
        // but attached live snapshots arrive from outside the guards.
        for (kind, names) in [
            ("bone", snapshot.bones.iter().map(|b| b.name.as_str()).collect::<Vec<_>>()),
            ("cube", snapshot.cubes.iter().map(|c| c.name.as_str()).collect()),
            ("texture", snapshot.textures.iter().map(|t| t.name.as_str()).collect()),
            ("animation", snapshot.animations.iter().map(|a| a.name.as_str()).collect()),
        ] {
            let mut seen = HashSet::new();
            for name in names {
                if !seen.insert(name) {
                    issues.push(issue(
                        "error",
                        "duplicate_name",
                        name,
                        format!("{kind} name '{name}' appears more than once"),
                    ));
                }
            }
        }

        let bone_names: HashSet<&str> = snapshot.bones.iter().map(|b| b.name.as_str()).collect();
        for bone in &snapshot.bones {
            if let Some(parent) = bone.parent.as_deref() {
                if !bone_names.contains(parent) {
                    issues.push(issue(
                        "error",
                        "orphan_reference",
                        &bone.name,
                        format!("bone '{}' references missing parent '{parent}'", bone.name),
                    ));
                }
            }
        }

        if let Some(max_cubes) = req.max_cubes {
            if snapshot.cubes.len() as u32 > max_cubes {
                issues.push(issue(
                    "error",
                    "max_cubes_exceeded",
                    &snapshot.name,
                    format!("{} cubes exceed the limit of {max_cubes}", snapshot.cubes.len()),
                ));
            }
        }
        for cube in &snapshot.cubes {
            if !bone_names.contains(cube.bone.as_str()) {
                issues.push(issue(
                    "error",
                    "orphan_reference",
                    &cube.name,
                    format!("cube '{}' references missing bone '{}'", cube.name, cube.bone),
                ));
            }
            for axis in 0..3 {
                if cube.from[axis] > cube.to[axis] {
                    issues.push(issue(
                        "error",
                        "degenerate_geometry",
                        &cube.name,
                        format!("cube '{}' has from > to on axis {axis}", cube.name),
                    ));
                    break;
                }
            }
            for (face, face_uv) in &cube.faces {
                let rect = face_uv.uv;
                if rect[0] > rect[2] || rect[1] > rect[3] {
                    issues.push(issue(
                        "error",
                        "uv_rect_unordered",
                        &cube.name,
                        format!("{}:{} UV rect is not ordered", cube.name, face.as_str()),
                    ));
                }
                if let Some(texture_id) = face_uv.texture.as_deref() {
                    match snapshot.textures.iter().find(|t| t.id == texture_id) {
                        None => {
                            issues.push(issue(
                                "error",
                                "orphan_reference",
                                &cube.name,
                                format!(
                                    "{}:{} references missing texture '{texture_id}'",
                                    cube.name,
                                    face.as_str()
                                ),
                            ));
                        }
                        Some(texture) => {
                            let (w, h) = (f64::from(texture.width), f64::from(texture.height));
                            if rect[0] < 0.0 || rect[1] < 0.0 || rect[2] > w || rect[3] > h {
                                issues.push(issue(
                                    "error",
                                    "uv_out_of_bounds",
                                    &cube.name,
                                    format!(
                                        "{}:{} UV rect exceeds {}x{}",
                                        cube.name,
                                        face.as_str(),
                                        texture.width,
                                        texture.height
                                    ),
                                ));
                            }
                        }
                    }
                }
            }
        }

        for texture in &snapshot.textures {
            if texture.width == 0 || texture.height == 0 {
                issues.push(issue(
                    "error",
                    "degenerate_texture",
                    &texture.name,
                    format!("texture '{}' has a zero dimension", texture.name),
                ));
            }
            if texture.width > max_texture_size || texture.height > max_texture_size {
                issues.push(issue(
                    "warning",
                    "oversize_texture",
                    &texture.name,
                    format!(
                        "texture '{}' is {}x{}, above the {max_texture_size} limit",
                        texture.name, texture.width, texture.height
                    ),
                ));
            }
        }

        for animation in &snapshot.animations {
            if animation.length < 0.0 {
                issues.push(issue(
                    "error",
                    "invalid_animation",
                    &animation.name,
                    format!("animation '{}' has negative length", animation.name),
                ));
            }
            if animation.fps <= 0.0 {
                issues.push(issue(
                    "error",
                    "invalid_animation",
                    &animation.name,
                    format!("animation '{}' has non-positive fps", animation.name),
                ));
            }
            for bone in animation.channels.keys() {
                if !bone_names.contains(bone.as_str()) {
                    issues.push(issue(
                        "warning",
                        "orphan_reference",
                        &animation.name,
                        format!(
                            "animation '{}' animates missing bone '{bone}'",
                            animation.name
                        ),
                    ));
                }
            }
            for (bone, channels) in &animation.channels {
                let over_length = channels
                    .rotation
                    .iter()
                    .chain(&channels.position)
                    .chain(&channels.scale)
                    .any(|k| k.time > animation.length);
                if over_length {
                    issues.push(issue(
                        "warning",
                        "keyframe_past_end",
                        &animation.name,
                        format!(
                            "animation '{}' has '{bone}' keyframes past its length",
                            animation.name
                        ),
                    ));
                }
            }
        }

        let valid = !issues.iter().any(|i| i["severity"] == "error");
        Ok(json!({ "valid": valid, "issues": issues }))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{call_ok, service};
    use serde_json::json;

    #[tokio::test]
    async fn clean_project_validates() {
        let svc = service();
        call_ok(&svc, "create_project", json!({"name": "fox"})).await;
        call_ok(&svc, "add_bone", json!({"name": "root"})).await;
        call_ok(
            &svc,
            "add_cube",
            json!({"name": "body", "bone": "root", "from": [0,0,0], "to": [4,4,4]}),
        )
        .await;
        let report = call_ok(&svc, "validate_project", json!({})).await;
        assert_eq!(report["data"]["valid"], true);
        assert!(report["data"]["issues"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn max_cubes_limit_is_checked() {
        let svc = service();
        call_ok(&svc, "create_project", json!({"name": "fox"})).await;
        call_ok(&svc, "add_bone", json!({"name": "root"})).await;
        for i in 0..3 {
            call_ok(
                &svc,
                "add_cube",
                json!({"name": format!("cube{i}"), "bone": "root", "from": [0,0,0], "to": [1,1,1]}),
            )
            .await;
        }
        let report = call_ok(&svc, "validate_project", json!({"maxCubes": 2})).await;
        assert_eq!(report["data"]["valid"], false);
        let codes: Vec<&str> = report["data"]["issues"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["code"].as_str().unwrap())
            .collect();
        assert!(codes.contains(&"max_cubes_exceeded"));
    }

    #[tokio::test]
    async fn oversize_texture_is_a_warning_only() {
        let svc = service();
        call_ok(&svc, "create_project", json!({"name": "fox"})).await;
        call_ok(
            &svc,
            "import_texture",
            json!({"name": "huge", "width": 8192, "height": 8192}),
        )
        .await;
        let report = call_ok(&svc, "validate_project", json!({})).await;
        assert_eq!(report["data"]["valid"], true);
        assert_eq!(report["data"]["issues"][0]["code"], "oversize_texture");
        assert_eq!(report["data"]["issues"][0]["severity"], "warning");
    }
}
