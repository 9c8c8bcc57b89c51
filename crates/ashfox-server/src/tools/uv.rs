// crates/ashfox-server/src/tools/uv.rs
// UV layout tools: face rect assignment, preflight diagnostics, and the
// shelf-packing auto atlas. uvUsageId is the stale-layout token paint
// tools must present.

use super::requests::*;
use super::ToolService;
use crate::error::{ToolError, UsecaseResult};
use crate::revision::djb2;
use ashfox_types::{Cube, CubeFace, ProjectSnapshot};
use serde_json::{Value, json};

/// Stable hash over the current UV usage layout: textures × cubes × faces
/// × uv rects. Texture pixel contents do not participate, so painting does
/// not invalidate the token while moving a face does.
pub fn usage_id(snapshot: &ProjectSnapshot) -> String {
    let mut canonical = String::new();
    for t in &snapshot.textures {
        canonical.push_str(&format!("tex:{}:{}x{};", t.id, t.width, t.height));
    }
    for c in &snapshot.cubes {
        for (face, uv) in &c.faces {
            canonical.push_str(&format!(
                "cube:{}:{}:[{},{},{},{}]:{};",
                c.name,
                face.as_str(),
                uv.uv[0],
                uv.uv[1],
                uv.uv[2],
                uv.uv[3],
                uv.texture.as_deref().unwrap_or(""),
            ));
        }
    }
    format!("{:08x}", djb2(canonical.as_bytes()))
}

/// World-space extents of one cube face, in model units.
fn face_world_dims(cube: &Cube, face: CubeFace) -> (f64, f64) {
    let dx = (cube.to[0] - cube.from[0]).abs();
    let dy = (cube.to[1] - cube.from[1]).abs();
    let dz = (cube.to[2] - cube.from[2]).abs();
    match face {
        CubeFace::North | CubeFace::South => (dx, dy),
        CubeFace::East | CubeFace::West => (dz, dy),
        CubeFace::Up | CubeFace::Down => (dx, dz),
    }
}

pub(crate) async fn set_face_uv(svc: &ToolService, req: SetFaceUvRequest) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        let changed = session.set_face_uv(&req.cube, req.face, req.uv, req.texture.clone())?;
        if !changed {
            return Err(ToolError::no_change("face_uv_unchanged"));
        }
        Ok(json!({ "cube": req.cube, "face": req.face, "uv": req.uv }))
    })
    .await
}

pub(crate) async fn preflight_texture(
    svc: &ToolService,
    req: PreflightTextureRequest,
) -> UsecaseResult<Value> {
    svc.read(|_, canonical| {
        let selected: Vec<&ashfox_types::Texture> = match &req.textures {
            None => canonical.textures.iter().collect(),
            Some(filter) => {
                let mut out = Vec::new();
                for key in filter {
                    let texture = canonical
                        .textures
                        .iter()
                        .find(|t| &t.id == key || &t.name == key)
                        .ok_or_else(|| {
                            ToolError::invalid_payload(format!("texture '{key}' does not exist"))
                        })?;
                    out.push(texture);
                }
                out
            }
        };

        let mut usage = Vec::new();
        let mut diagnostics = Vec::new();
        // (texture id, rect, cube, face) for the overlap scan.
        let mut placed: Vec<(String, [f64; 4], String, CubeFace)> = Vec::new();

        for cube in &canonical.cubes {
            for (face, face_uv) in &cube.faces {
                let Some(texture_id) = face_uv.texture.as_deref() else {
                    continue;
                };
                let Some(texture) = selected.iter().find(|t| t.id == texture_id) else {
                    continue;
                };
                let rect = face_uv.uv;
                usage.push(json!({
                    "texture": texture.id,
                    "cube": cube.name,
                    "face": face.as_str(),
                    "uv": rect,
                }));

                let (w, h) = (f64::from(texture.width), f64::from(texture.height));
                if rect[0] < 0.0 || rect[1] < 0.0 || rect[2] > w || rect[3] > h {
                    diagnostics.push(diagnostic(
                        "out_of_bounds",
                        &cube.name,
                        *face,
                        format!("UV rect exceeds {}x{} texture", texture.width, texture.height),
                    ));
                }
                let (rw, rh) = (rect[2] - rect[0], rect[3] - rect[1]);
                if rw * rh < 1.0 {
                    diagnostics.push(diagnostic(
                        "tiny_rect",
                        &cube.name,
                        *face,
                        "UV rect covers less than one pixel".to_string(),
                    ));
                }
                let (fw, fh) = face_world_dims(cube, *face);
                if fw > 0.0 && fh > 0.0 && rw > 0.0 && rh > 0.0 {
                    let world_aspect = fw / fh;
                    let uv_aspect = rw / rh;
                    let ratio = uv_aspect / world_aspect;
                    if !(0.5..=2.0).contains(&ratio) {
                        diagnostics.push(diagnostic(
                            "skewed_rect",
                            &cube.name,
                            *face,
                            format!("UV aspect {uv_aspect:.2} vs face aspect {world_aspect:.2}"),
                        ));
                    }
                    if let Some(ppb) = canonical.uv_pixels_per_block {
                        let density = rw / fw;
                        let scale = density / ppb;
                        if !(0.5..=2.0).contains(&scale) {
                            diagnostics.push(diagnostic(
                                "scale_mismatch",
                                &cube.name,
                                *face,
                                format!("face density {density:.2}px/unit vs project {ppb:.2}"),
                            ));
                        }
                    }
                }
                placed.push((texture_id.to_string(), rect, cube.name.clone(), *face));
            }
        }

        for (i, a) in placed.iter().enumerate() {
            for b in placed.iter().skip(i + 1) {
                if a.0 == b.0 && rects_overlap(a.1, b.1) {
                    diagnostics.push(json!({
                        "code": "overlap",
                        "message": format!(
                            "{}:{} overlaps {}:{} on texture {}",
                            a.2, a.3.as_str(), b.2, b.3.as_str(), a.0
                        ),
                    }));
                }
            }
        }

        let mut data = json!({
            "uvUsageId": usage_id(canonical),
            "checked": selected.len(),
            "textures": selected.iter().map(|t| json!({
                "id": t.id,
                "name": t.name,
                "width": t.width,
                "height": t.height,
            })).collect::<Vec<_>>(),
            "diagnostics": diagnostics,
        });
        if req.include_usage {
            data["usage"] = json!(usage);
        }
        Ok(data)
    })
    .await
}

fn diagnostic(code: &str, cube: &str, face: CubeFace, message: String) -> Value {
    json!({
        "code": code,
        "cube": cube,
        "face": face.as_str(),
        "message": message,
    })
}

fn rects_overlap(a: [f64; 4], b: [f64; 4]) -> bool {
    a[0] < b[2] && b[0] < a[2] && a[1] < b[3] && b[1] < a[3]
}

pub(crate) async fn auto_uv_atlas(
    svc: &ToolService,
    req: AutoUvAtlasRequest,
) -> UsecaseResult<Value> {
    let padding = f64::from(req.padding.unwrap_or(1));
    svc.mutate(req.if_revision.as_deref(), |session, canonical| {
        let target = match &req.texture {
            Some(key) => session
                .find_texture(key)
                .ok_or_else(|| ToolError::invalid_payload(format!("texture '{key}' does not exist")))?
                .clone(),
            None => canonical
                .textures
                .first()
                .cloned()
                .ok_or_else(|| {
                    ToolError::invalid_state(
                        "no_texture",
                        "the project has no texture to pack into",
                    )
                    .with_fix("Import a texture first, then re-run auto_uv_atlas.")
                })?,
        };
        if canonical.cubes.is_empty() {
            return Err(ToolError::invalid_state(
                "no_geometry",
                "the project has no cubes to lay out",
            ));
        }

        let ppb = canonical.uv_pixels_per_block.unwrap_or(1.0);
        let (sheet_w, sheet_h) = (f64::from(target.width), f64::from(target.height));

        // Shelf packing: place faces left to right, starting a new shelf
        // when the row is full.
        let mut placements = Vec::new();
        let (mut x, mut y, mut shelf_h) = (0.0_f64, 0.0_f64, 0.0_f64);
        for cube in &canonical.cubes {
            for face in CubeFace::ALL {
                let (fw, fh) = face_world_dims(cube, face);
                let w = (fw * ppb).ceil().max(1.0);
                let h = (fh * ppb).ceil().max(1.0);
                if x + w > sheet_w {
                    x = 0.0;
                    y += shelf_h + padding;
                    shelf_h = 0.0;
                }
                if w > sheet_w || y + h > sheet_h {
                    return Err(ToolError::invalid_state(
                        "atlas_overflow",
                        format!(
                            "faces do not fit into {}x{} at {ppb} px/unit",
                            target.width, target.height
                        ),
                    )
                    .with_fix("Enlarge the texture or lower uv pixels-per-block."));
                }
                placements.push((cube.name.clone(), face, [x, y, x + w, y + h]));
                x += w + padding;
                shelf_h = shelf_h.max(h);
            }
        }

        if req.apply {
            for (cube, face, uv) in &placements {
                session.set_face_uv(cube, *face, *uv, Some(target.id.clone()))?;
            }
        }

        let layout: Vec<Value> = placements
            .iter()
            .map(|(cube, face, uv)| json!({
                "cube": cube,
                "face": face.as_str(),
                "uv": uv,
            }))
            .collect();
        let token = if req.apply {
            usage_id(session.snapshot())
        } else {
            usage_id(canonical)
        };
        Ok(json!({
            "applied": req.apply,
            "texture": target.id,
            "placements": layout,
            "uvUsageId": token,
        }))
    })
    .await
}
