// crates/ashfox-server/src/tools/export.rs
// Export: resolve the target format, try the host's native exporter, and
// fall back to the internal serializer when the host cannot help.

use super::requests::*;
use super::ToolService;
use crate::error::{ErrorCode, ToolError, ToolOk, UsecaseResult};
use ashfox_types::{FormatKind, ProjectSnapshot};
use serde_json::{Value, json};
use std::str::FromStr;

/// Format id used when only the kind is known.
fn default_format_id(kind: FormatKind) -> &'static str {
    match kind {
        FormatKind::AnimatedJava => "animated_java:rig",
        FormatKind::Geckolib => "geckolib_model",
        FormatKind::Vanilla => "java_block",
    }
}

pub(crate) async fn export_project(
    svc: &ToolService,
    req: ExportProjectRequest,
) -> UsecaseResult<Value> {
    let ok = svc
        .read(|_, canonical| serde_json::to_value(canonical).map_err(ToolError::from))
        .await?;
    let revision = ok.revision.clone();
    let canonical: ProjectSnapshot = serde_json::from_value(ok.data)
        .map_err(|e| ToolError::unknown("snapshot_roundtrip", e.to_string()))?;

    let requested_kind = match req.format.as_deref() {
        Some(raw) => Some(FormatKind::from_str(raw).map_err(|_| {
            ToolError::unsupported_format(format!("unknown format kind '{raw}'"))
        })?),
        None => None,
    };
    let kind = requested_kind.or(canonical.format);
    let format_id = req
        .format_id
        .clone()
        .or_else(|| canonical.format_id.clone())
        .or_else(|| kind.map(|k| default_format_id(k).to_string()))
        .ok_or_else(|| {
            ToolError::unsupported_format("the project has no format; pass format or formatId")
                .with_fix("Set a format via create_project or pass formatId to export_project.")
        })?;

    if let Some(kind) = kind {
        let capabilities = svc.adapter().capabilities();
        if !capabilities.formats.contains(&kind) {
            return Err(ToolError::unsupported_format(format!(
                "format '{kind}' is not enabled on this host"
            )));
        }
    }

    let file_name = req
        .file_name
        .clone()
        .unwrap_or_else(|| format!("{}.json", canonical.name));

    let (artifact, fallback) = match svc.adapter().export_native(&format_id, &canonical).await {
        Ok(artifact) => (artifact, false),
        // Host missing or broken: serialize the snapshot ourselves so the
        // caller still gets an artifact.
        Err(err) if matches!(err.code, ErrorCode::NotImplemented | ErrorCode::IoError) => {
            tracing::debug!(error = %err, "native exporter unavailable, using internal serializer");
            let payload = serde_json::to_value(&canonical).map_err(ToolError::from)?;
            (
                crate::adapter::ExportArtifact {
                    format_id: format_id.clone(),
                    file_name: file_name.clone(),
                    payload,
                },
                true,
            )
        }
        Err(err) => return Err(err),
    };

    svc.with_state(|session, _| {
        if let Some(session) = session.as_mut() {
            session.mark_clean();
        }
    })
    .await;

    Ok(ToolOk {
        data: json!({
            "formatId": artifact.format_id,
            "fileName": artifact.file_name,
            "fallback": fallback,
            "artifact": artifact.payload,
        }),
        revision,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{call, call_ok, service};
    use serde_json::json;

    #[tokio::test]
    async fn export_falls_back_to_internal_serializer() {
        let svc = service();
        call_ok(
            &svc,
            "create_project",
            json!({"name": "fox", "format": "geckolib"}),
        )
        .await;
        call_ok(&svc, "add_bone", json!({"name": "root"})).await;

        let exported = call_ok(&svc, "export_project", json!({})).await;
        assert_eq!(exported["data"]["fallback"], true);
        assert_eq!(exported["data"]["formatId"], "geckolib_model");
        assert_eq!(exported["data"]["fileName"], "fox.json");
        assert_eq!(exported["data"]["artifact"]["bones"][0]["name"], "root");

        // Export clears the dirty flag.
        let state = call_ok(&svc, "get_project_state", json!({})).await;
        assert_eq!(state["data"]["dirty"], false);
    }

    #[tokio::test]
    async fn export_requires_some_format() {
        let svc = service();
        call_ok(&svc, "create_project", json!({"name": "fox"})).await;
        let failed = call(&svc, "export_project", json!({})).await;
        assert_eq!(failed["error"]["code"], "unsupported_format");
    }

    #[tokio::test]
    async fn explicit_format_id_wins() {
        let svc = service();
        call_ok(
            &svc,
            "create_project",
            json!({"name": "fox", "format": "vanilla"}),
        )
        .await;
        let exported = call_ok(
            &svc,
            "export_project",
            json!({"formatId": "java_block_item", "fileName": "fox.bbmodel"}),
        )
        .await;
        assert_eq!(exported["data"]["formatId"], "java_block_item");
        assert_eq!(exported["data"]["fileName"], "fox.bbmodel");
    }
}
