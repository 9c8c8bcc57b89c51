// crates/ashfox-server/src/tools/project.rs
// Project lifecycle and project-level settings.

use super::requests::*;
use super::ToolService;
use crate::error::{ToolError, ToolOk, UsecaseResult};
use crate::merge::normalize_format;
use crate::revision::hash_snapshot;
use crate::session::ProjectSession;
use ashfox_types::{FormatKind, ProjectSnapshot};
use serde_json::{Value, json};
use std::str::FromStr;

fn parse_format(raw: Option<&str>) -> Result<Option<FormatKind>, ToolError> {
    match raw {
        None => Ok(None),
        Some(s) => FormatKind::from_str(s)
            .map(Some)
            .map_err(|_| ToolError::unsupported_format(format!("unknown format kind '{s}'"))),
    }
}

fn new_snapshot(
    svc: &ToolService,
    name: String,
    format: Option<FormatKind>,
    format_id: Option<String>,
) -> ProjectSnapshot {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    let mut snapshot = ProjectSnapshot::empty(format!("proj_{}", &raw[..8]), name);
    snapshot.format = format;
    snapshot.format_id = format_id;
    normalize_format(&mut snapshot, &svc.options().merge.format_overrides);
    snapshot
}

fn summary(snapshot: &ProjectSnapshot) -> Value {
    json!({
        "projectId": snapshot.id,
        "name": snapshot.name,
        "format": snapshot.format,
        "formatId": snapshot.format_id,
        "dirty": snapshot.dirty,
        "counts": {
            "bones": snapshot.bones.len(),
            "cubes": snapshot.cubes.len(),
            "textures": snapshot.textures.len(),
            "animations": snapshot.animations.len(),
        },
    })
}

pub(crate) async fn create_project(
    svc: &ToolService,
    req: CreateProjectRequest,
) -> UsecaseResult<Value> {
    let format = parse_format(req.format.as_deref())?;
    let snapshot = new_snapshot(svc, req.name, format, req.format_id);
    svc.with_state(move |session, revisions| {
        if session.is_some() {
            return Err(ToolError::invalid_state(
                "project_already_open",
                "a project session is already open",
            )
            .with_fix("Call close_project first, or ensure_project to reuse it."));
        }
        let revision = revisions.track(&snapshot);
        let data = summary(&snapshot);
        *session = Some(ProjectSession::new(snapshot));
        Ok(ToolOk::with_revision(data, revision))
    })
    .await
}

pub(crate) async fn close_project(svc: &ToolService) -> UsecaseResult<Value> {
    svc.with_state(|session, revisions| {
        let closed = session.take().ok_or_else(ToolError::no_active_project)?;
        *revisions = crate::revision::RevisionStore::new();
        Ok(ToolOk::new(json!({
            "closed": true,
            "projectId": closed.snapshot().id,
        })))
    })
    .await
}

pub(crate) async fn ensure_project(
    svc: &ToolService,
    req: EnsureProjectRequest,
) -> UsecaseResult<Value> {
    let format = parse_format(req.format.as_deref())?;
    let live = svc.read_live().await;
    let fallback_name = req.name.clone().unwrap_or_else(|| "untitled".to_string());
    let snapshot = new_snapshot(svc, fallback_name, format, req.format_id.clone());
    svc.with_state(move |session, revisions| {
        if let Some(existing) = session.as_ref() {
            let current = existing.snapshot_cloned();
            let revision = revisions.track(&current);
            let mut data = summary(&current);
            data["status"] = json!("existing");
            return Ok(ToolOk::with_revision(data, revision));
        }
        let (attached, status) = match live {
            Some(live) => (live.snapshot, "attached"),
            None => (snapshot, "created"),
        };
        let revision = revisions.track(&attached);
        let mut data = summary(&attached);
        data["status"] = json!(status);
        *session = Some(ProjectSession::new(attached));
        Ok(ToolOk::with_revision(data, revision))
    })
    .await
}

pub(crate) async fn delete_project(svc: &ToolService) -> UsecaseResult<Value> {
    svc.with_state(|session, revisions| {
        let deleted = session.take().ok_or_else(ToolError::no_active_project)?;
        *revisions = crate::revision::RevisionStore::new();
        Ok(ToolOk::new(json!({
            "deleted": true,
            "projectId": deleted.snapshot().id,
        })))
    })
    .await
}

pub(crate) async fn get_project_state(
    svc: &ToolService,
    req: GetProjectStateRequest,
) -> UsecaseResult<Value> {
    let mut ok = svc
        .read(|_, canonical| {
            let mut snapshot = canonical.clone();
            if !req.include_pixels {
                for texture in &mut snapshot.textures {
                    texture.data_uri = None;
                }
            }
            serde_json::to_value(&snapshot).map_err(ToolError::from)
        })
        .await?;
    if let Some(revision) = &ok.revision {
        ok.data["revision"] = json!(revision);
    }
    Ok(ok)
}

pub(crate) async fn set_texture_resolution(
    svc: &ToolService,
    req: SetTextureResolutionRequest,
) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        if !session.set_resolution(req.width, req.height)? {
            return Err(ToolError::no_change("resolution_unchanged"));
        }
        Ok(json!({ "width": req.width, "height": req.height }))
    })
    .await
}

pub(crate) async fn set_uv_pixels_per_block(
    svc: &ToolService,
    req: SetUvPixelsPerBlockRequest,
) -> UsecaseResult<Value> {
    svc.mutate(req.if_revision.as_deref(), |session, _| {
        if !session.set_uv_pixels_per_block(req.value)? {
            return Err(ToolError::no_change("uv_density_unchanged"));
        }
        Ok(json!({ "value": req.value }))
    })
    .await
}

/// Current revision of the canonical snapshot without tracking it; used by
/// proxy pipelines to re-guard between steps.
pub(crate) async fn current_revision(svc: &ToolService) -> Result<String, ToolError> {
    let ok = svc.read(|_, canonical| Ok(json!(hash_snapshot(canonical)))).await?;
    Ok(ok
        .revision
        .unwrap_or_else(|| ok.data.as_str().unwrap_or_default().to_string()))
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{call, call_ok, service};
    use serde_json::json;

    #[tokio::test]
    async fn create_then_close_round_trip() {
        let svc = service();
        let created = call_ok(&svc, "create_project", json!({"name": "fox", "format": "geckolib"}))
            .await;
        assert_eq!(created["data"]["format"], "geckolib");
        assert!(created["revision"].is_string());

        let again = call(&svc, "create_project", json!({"name": "other"})).await;
        assert_eq!(again["error"]["details"]["reason"], "project_already_open");

        let closed = call_ok(&svc, "close_project", json!({})).await;
        assert_eq!(closed["data"]["closed"], true);

        let closed = call(&svc, "close_project", json!({})).await;
        assert_eq!(closed["error"]["details"]["reason"], "no_active_project");
    }

    #[tokio::test]
    async fn ensure_creates_when_nothing_is_open() {
        let svc = service();
        let ensured = call_ok(&svc, "ensure_project", json!({"name": "fox"})).await;
        assert_eq!(ensured["data"]["status"], "created");
        let ensured = call_ok(&svc, "ensure_project", json!({})).await;
        assert_eq!(ensured["data"]["status"], "existing");
    }

    #[tokio::test]
    async fn format_id_is_normalized_on_create() {
        let svc = service();
        let created = call_ok(
            &svc,
            "create_project",
            json!({"name": "fox", "formatId": "geckolib_animated"}),
        )
        .await;
        assert_eq!(created["data"]["format"], "geckolib");
    }

    #[tokio::test]
    async fn state_hides_pixels_by_default() {
        let svc = service();
        call_ok(&svc, "create_project", json!({"name": "fox"})).await;
        call_ok(
            &svc,
            "import_texture",
            json!({"name": "skin", "width": 16, "height": 16, "dataUri": "data:image/png;base64,AAAA"}),
        )
        .await;
        let state = call_ok(&svc, "get_project_state", json!({})).await;
        assert!(state["data"]["textures"][0].get("dataUri").is_none());
        let state = call_ok(&svc, "get_project_state", json!({"includePixels": true})).await;
        assert_eq!(state["data"]["textures"][0]["dataUri"], "data:image/png;base64,AAAA");
    }

    #[tokio::test]
    async fn resolution_no_change_detection() {
        let svc = service();
        call_ok(&svc, "create_project", json!({"name": "fox"})).await;
        call_ok(&svc, "set_texture_resolution", json!({"width": 64, "height": 64})).await;
        let repeat = call(&svc, "set_texture_resolution", json!({"width": 64, "height": 64})).await;
        assert_eq!(repeat["error"]["code"], "no_change");
    }
}
