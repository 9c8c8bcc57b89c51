// crates/ashfox-server/src/error.rs
// Error taxonomy shared by every tool usecase and the transport layer.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Machine-readable, stable error code.
///
/// The first group is returned by tool usecases inside the result envelope;
/// the transport-only group is emitted by the MCP router as JSON-RPC errors
/// or HTTP status bodies and never originates inside a usecase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidPayload,
    InvalidState,
    UnsupportedFormat,
    NoChange,
    IoError,
    NotImplemented,
    Unknown,
    // Transport-only.
    ParseError,
    InvalidRequest,
    MethodNotFound,
    SessionIdRequired,
    SessionUnavailable,
    TooManyRequests,
    PayloadTooLarge,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPayload => "invalid_payload",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::UnsupportedFormat => "unsupported_format",
            ErrorCode::NoChange => "no_change",
            ErrorCode::IoError => "io_error",
            ErrorCode::NotImplemented => "not_implemented",
            ErrorCode::Unknown => "unknown",
            ErrorCode::ParseError => "parse_error",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::MethodNotFound => "method_not_found",
            ErrorCode::SessionIdRequired => "session_id_required",
            ErrorCode::SessionUnavailable => "session_unavailable",
            ErrorCode::TooManyRequests => "too_many_requests",
            ErrorCode::PayloadTooLarge => "payload_too_large",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by tool usecases.
///
/// Carries a stable `code`, a human-readable `message`, an optional `fix`
/// suggesting the next action, and `details` with a machine-readable
/// `reason`. Usecases return this; they never panic and never surface raw
/// adapter errors.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fix: None,
            details: None,
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The `details.reason` tag, when present.
    pub fn reason(&self) -> Option<&str> {
        self.details
            .as_ref()
            .and_then(|d| d.get("reason"))
            .and_then(|r| r.as_str())
    }

    // --- usecase constructors ---

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPayload, message)
    }

    pub fn invalid_state(reason: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message).with_details(json!({ "reason": reason }))
    }

    pub fn revision_mismatch(expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorCode::InvalidState,
            format!("revision mismatch: expected {expected}, current is {actual}"),
        )
        .with_fix("Call get_project_state to observe the current revision, then retry.")
        .with_details(json!({
            "reason": "revision_mismatch",
            "expected": expected,
            "actual": actual,
            "nextActions": ["get_project_state"],
        }))
    }

    pub fn revision_required() -> Self {
        Self::new(
            ErrorCode::InvalidState,
            "this deployment requires ifRevision on mutating tools",
        )
        .with_fix("Pass the revision from the last get_project_state call as ifRevision.")
        .with_details(json!({ "reason": "revision_required" }))
    }

    pub fn no_active_project() -> Self {
        Self::invalid_state(
            "no_active_project",
            "no active project; create or attach one first",
        )
        .with_fix("Call create_project, or ensure_project to attach the live editor project.")
    }

    pub fn uv_usage_changed(expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorCode::InvalidState,
            "UV usage changed since preflight; the paint layout token is stale",
        )
        .with_fix("Re-run preflight_texture and retry with the fresh uvUsageId.")
        .with_details(json!({
            "reason": "uv_usage_changed",
            "expected": expected,
            "actual": actual,
        }))
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedFormat, message)
    }

    pub fn no_change(reason: &str) -> Self {
        Self::new(ErrorCode::NoChange, "operation would not change anything")
            .with_details(json!({ "reason": reason }))
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IoError, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotImplemented, message)
    }

    pub fn unknown(reason: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message).with_details(json!({ "reason": reason }))
    }

    /// Wire form used inside the result envelope: `{code, message, fix?, details?}`.
    pub fn to_wire(&self) -> Value {
        let mut obj = json!({
            "code": self.code.as_str(),
            "message": self.message,
        });
        if let Some(fix) = &self.fix {
            obj["fix"] = json!(fix);
        }
        if let Some(details) = &self.details {
            obj["details"] = details.clone();
        }
        obj
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::invalid_payload(format!("malformed payload: {err}"))
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::io_error(err.to_string())
    }
}

/// Boundary translation for adapter/repository failures that escaped their
/// own typed error paths.
impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        ToolError::unknown("adapter_failure", err.to_string())
    }
}

/// Successful tool output: the payload plus the snapshot revision after the
/// operation (mutating tools always set it).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOk<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl<T> ToolOk<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            revision: None,
        }
    }

    pub fn with_revision(data: T, revision: impl Into<String>) -> Self {
        Self {
            data,
            revision: Some(revision.into()),
        }
    }
}

/// Every tool usecase returns this.
pub type UsecaseResult<T> = Result<ToolOk<T>, ToolError>;

/// Render a usecase result as the wire envelope:
/// `{ok:true, data, revision?}` or `{ok:false, error:{…}}`.
pub fn envelope<T: Serialize>(result: &UsecaseResult<T>) -> Value {
    match result {
        Ok(ok) => {
            let mut obj = json!({ "ok": true, "data": ok.data });
            if let Some(rev) = &ok.revision {
                obj["revision"] = json!(rev);
            }
            obj
        }
        Err(err) => json!({ "ok": false, "error": err.to_wire() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::InvalidPayload).unwrap(),
            "\"invalid_payload\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::TooManyRequests).unwrap(),
            "\"too_many_requests\""
        );
    }

    #[test]
    fn revision_mismatch_carries_guidance() {
        let err = ToolError::revision_mismatch("r1", "r2");
        assert_eq!(err.code, ErrorCode::InvalidState);
        assert_eq!(err.reason(), Some("revision_mismatch"));
        let details = err.details.unwrap();
        assert_eq!(details["expected"], "r1");
        assert_eq!(details["actual"], "r2");
        assert_eq!(details["nextActions"][0], "get_project_state");
    }

    #[test]
    fn envelope_ok_includes_revision() {
        let result: UsecaseResult<Value> = Ok(ToolOk::with_revision(json!({"n": 1}), "rabc"));
        let env = envelope(&result);
        assert_eq!(env["ok"], true);
        assert_eq!(env["revision"], "rabc");
        assert_eq!(env["data"]["n"], 1);
    }

    #[test]
    fn envelope_err_wraps_wire_error() {
        let result: UsecaseResult<Value> = Err(ToolError::no_active_project());
        let env = envelope(&result);
        assert_eq!(env["ok"], false);
        assert_eq!(env["error"]["code"], "invalid_state");
        assert_eq!(env["error"]["details"]["reason"], "no_active_project");
        assert!(env["error"]["fix"].as_str().unwrap().contains("create_project"));
    }

    #[test]
    fn anyhow_failures_become_unknown() {
        let err: ToolError = anyhow::anyhow!("editor host exploded").into();
        assert_eq!(err.code, ErrorCode::Unknown);
        assert_eq!(err.reason(), Some("adapter_failure"));
    }
}
