// crates/ashfox-server/src/adapter.rs
// Ports to the external collaborators: the editor host and the tool
// backend. The gateway depends on these traits, never on a concrete host.

use crate::error::ToolError;
use ashfox_types::{FormatKind, LiveSnapshot, ProjectSnapshot};
use async_trait::async_trait;
use serde_json::{Value, json};

/// What a concrete editor adapter can do.
#[derive(Debug, Clone, Default)]
pub struct AdapterCapabilities {
    /// Format kinds the host can open and export.
    pub formats: Vec<FormatKind>,
    /// Whether the host exposes a native exporter.
    pub native_export: bool,
    /// Whether the host supports free-form meshes.
    pub meshes: bool,
}

/// Artifact produced by an export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub format_id: String,
    pub file_name: String,
    pub payload: Value,
}

/// Binding to a live 3D-editor host. External collaborators implement
/// this; the gateway ships only [`NullEditorAdapter`].
#[async_trait]
pub trait EditorAdapter: Send + Sync {
    /// Snapshot of the project currently open in the host, if any.
    async fn live_snapshot(&self) -> Result<Option<LiveSnapshot>, ToolError>;

    /// Run the host's native exporter for the given format.
    async fn export_native(
        &self,
        format_id: &str,
        snapshot: &ProjectSnapshot,
    ) -> Result<ExportArtifact, ToolError>;

    /// Mesh operations. The snapshot data model has no mesh entity, so
    /// these pass through to the host verbatim.
    async fn mesh_op(&self, action: &str, payload: &Value) -> Result<Value, ToolError>;

    fn capabilities(&self) -> AdapterCapabilities;
}

/// Adapter used when no editor host is attached. Every session works
/// purely against the gateway's own project session.
#[derive(Debug, Default)]
pub struct NullEditorAdapter;

#[async_trait]
impl EditorAdapter for NullEditorAdapter {
    async fn live_snapshot(&self) -> Result<Option<LiveSnapshot>, ToolError> {
        Ok(None)
    }

    async fn export_native(
        &self,
        _format_id: &str,
        _snapshot: &ProjectSnapshot,
    ) -> Result<ExportArtifact, ToolError> {
        Err(ToolError::not_implemented(
            "no editor host attached; native export is unavailable",
        ))
    }

    async fn mesh_op(&self, action: &str, _payload: &Value) -> Result<Value, ToolError> {
        Err(ToolError::not_implemented(format!(
            "no editor host attached; mesh operation '{action}' is unavailable"
        )))
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            formats: FormatKind::ALL.to_vec(),
            native_export: false,
            meshes: false,
        }
    }
}

/// Listing entry for tools/list.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub title: String,
    pub description: String,
    pub input_schema: Value,
}

/// Outcome of invoking a tool through a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallOutcome {
    /// The tool ran; the value is the `{ok: …}` result envelope.
    Completed(Value),
    /// The tool does not exist on this backend.
    UnknownTool,
    /// The backend transport failed (upstream gateway down). The router
    /// reports this as JSON-RPC −32004, not as a tool error.
    Unreachable(String),
}

/// Capability to invoke tools. Implemented by the local tool service and
/// by the upstream forwarder; the router and the worker both borrow it.
#[async_trait]
pub trait BackendPort: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolCallOutcome;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String>;
}

/// Forwards tool calls to another Ashfox gateway over JSON-RPC/HTTP.
/// Selected by `ASHFOX_GATEWAY_URL`.
pub struct UpstreamGateway {
    url: String,
    client: reqwest::Client,
}

impl UpstreamGateway {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, body: Value) -> Result<Value, String> {
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("upstream gateway unreachable: {e}"))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| format!("upstream gateway returned malformed JSON: {e}"))
    }
}

#[async_trait]
impl BackendPort for UpstreamGateway {
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolCallOutcome {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments },
        });
        let reply = match self.post(body).await {
            Ok(reply) => reply,
            Err(message) => return ToolCallOutcome::Unreachable(message),
        };
        if let Some(error) = reply.get("error") {
            // −32602 from upstream means the tool name itself was unknown.
            if error.get("code").and_then(Value::as_i64) == Some(-32602) {
                return ToolCallOutcome::UnknownTool;
            }
            return ToolCallOutcome::Completed(json!({
                "ok": false,
                "error": {
                    "code": "unknown",
                    "message": error.get("message").cloned().unwrap_or_else(|| json!("upstream error")),
                    "details": { "reason": "upstream_jsonrpc_error" },
                },
            }));
        }
        let envelope = reply
            .pointer("/result/structuredContent")
            .cloned()
            .unwrap_or_else(|| json!({
                "ok": false,
                "error": {
                    "code": "unknown",
                    "message": "upstream result had no structuredContent",
                    "details": { "reason": "upstream_shape" },
                },
            }));
        ToolCallOutcome::Completed(envelope)
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, String> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
        let reply = self.post(body).await?;
        let tools = reply
            .pointer("/result/tools")
            .and_then(Value::as_array)
            .ok_or_else(|| "upstream tools/list had no tools array".to_string())?;
        Ok(tools
            .iter()
            .map(|t| ToolDescriptor {
                name: t.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                title: t.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
                description: t
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input_schema: t.get("inputSchema").cloned().unwrap_or_else(|| json!({})),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_adapter_has_no_live_snapshot() {
        let adapter = NullEditorAdapter;
        assert_eq!(adapter.live_snapshot().await.unwrap(), None);
    }

    #[tokio::test]
    async fn null_adapter_reports_missing_capabilities() {
        let adapter = NullEditorAdapter;
        let snapshot = ProjectSnapshot::empty("p", "n");
        let err = adapter.export_native("geckolib", &snapshot).await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::NotImplemented);
        let err = adapter.mesh_op("add", &json!({})).await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::NotImplemented);
        assert!(!adapter.capabilities().meshes);
    }
}
