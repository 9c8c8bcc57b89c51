// crates/ashfox-server/src/trace.rs
// Append-only trace log: newline-delimited JSON, one header record then
// numbered step records. Used by proxy pipelines to leave a replayable
// record of what was called and what came back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub const TRACE_SCHEMA_VERSION: u32 = 2;

/// Response summary embedded in a step record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// One line of the trace log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TraceRecord {
    #[serde(rename_all = "camelCase")]
    Header {
        schema_version: u32,
        created_at: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plugin_version: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        editor_version: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        notes: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Step {
        seq: u64,
        ts: String,
        route: String,
        op: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        response: TraceResponse,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state_error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff_error: Option<String>,
    },
}

/// Encode one record as a log line (no trailing newline).
pub fn encode_line(record: &TraceRecord) -> String {
    serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
}

/// Parse one log line back into a record.
pub fn parse_line(line: &str) -> Result<TraceRecord, serde_json::Error> {
    serde_json::from_str(line)
}

/// Appends records to a file. Write failures are logged and swallowed;
/// tracing must never fail a tool call.
pub struct TraceRecorder {
    file: Mutex<File>,
    seq: AtomicU64,
}

impl TraceRecorder {
    /// Open (append) the log file and write the header record.
    pub fn create(path: &Path, plugin_version: Option<String>) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let header = TraceRecord::Header {
            schema_version: TRACE_SCHEMA_VERSION,
            created_at: Utc::now().to_rfc3339(),
            plugin_version,
            editor_version: None,
            notes: Vec::new(),
        };
        writeln!(file, "{}", encode_line(&header))?;
        Ok(Self {
            file: Mutex::new(file),
            seq: AtomicU64::new(0),
        })
    }

    /// Append a tool step. Returns the step's sequence number.
    #[allow(clippy::too_many_arguments)]
    pub fn record_step(
        &self,
        op: &str,
        payload: Option<Value>,
        response: TraceResponse,
        state: Option<Value>,
        diff: Option<Value>,
        state_error: Option<String>,
        diff_error: Option<String>,
    ) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let record = TraceRecord::Step {
            seq,
            ts: Utc::now().to_rfc3339(),
            route: "tool".to_string(),
            op: op.to_string(),
            payload,
            response,
            state,
            diff,
            state_error,
            diff_error,
        };
        let line = encode_line(&record);
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{line}") {
                    tracing::warn!("trace log write failed: {e}");
                }
            }
            Err(_) => tracing::warn!("trace log mutex poisoned; dropping step {seq}"),
        }
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_round_trips() {
        let record = TraceRecord::Header {
            schema_version: TRACE_SCHEMA_VERSION,
            created_at: "2026-08-01T00:00:00Z".to_string(),
            plugin_version: Some("0.4.0".to_string()),
            editor_version: None,
            notes: vec!["smoke".to_string()],
        };
        let line = encode_line(&record);
        assert!(line.contains("\"kind\":\"header\""));
        assert!(line.contains("\"schemaVersion\":2"));
        assert_eq!(parse_line(&line).unwrap(), record);
    }

    #[test]
    fn step_round_trips() {
        let record = TraceRecord::Step {
            seq: 7,
            ts: "2026-08-01T00:00:01Z".to_string(),
            route: "tool".to_string(),
            op: "add_bone".to_string(),
            payload: Some(json!({"name": "root"})),
            response: TraceResponse {
                ok: true,
                data: Some(json!({"id": "bone_1"})),
                error: None,
            },
            state: None,
            diff: Some(json!({"bones": {"added": ["root"]}})),
            state_error: None,
            diff_error: Some("revision evicted".to_string()),
        };
        let line = encode_line(&record);
        assert_eq!(parse_line(&line).unwrap(), record);
    }

    #[test]
    fn recorder_appends_header_then_steps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trace.ndjson");
        let recorder = TraceRecorder::create(&path, Some("0.4.0".into())).expect("create");
        let s1 = recorder.record_step(
            "preflight_texture",
            None,
            TraceResponse {
                ok: true,
                data: None,
                error: None,
            },
            None,
            None,
            None,
            None,
        );
        let s2 = recorder.record_step(
            "paint_faces",
            Some(json!({"uvUsageId": "x"})),
            TraceResponse {
                ok: false,
                data: None,
                error: Some(json!({"code": "invalid_state"})),
            },
            None,
            None,
            None,
            None,
        );
        assert_eq!((s1, s2), (1, 2));

        let contents = std::fs::read_to_string(&path).expect("read");
        let records: Vec<TraceRecord> = contents
            .lines()
            .map(|l| parse_line(l).expect("parse"))
            .collect();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[0], TraceRecord::Header { .. }));
        match &records[2] {
            TraceRecord::Step { seq, op, response, .. } => {
                assert_eq!(*seq, 2);
                assert_eq!(op, "paint_faces");
                assert!(!response.ok);
            }
            other => panic!("expected step, got {other:?}"),
        }
    }
}
