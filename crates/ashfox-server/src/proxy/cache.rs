// crates/ashfox-server/src/proxy/cache.rs
// Per-request memo cache for proxy pipelines. One instance lives for the
// duration of a single compound call and is dropped with it.

use serde_json::Value;

/// Memoized tool results keyed by the uvUsageId they were computed under.
/// Any step that can move UVs must call [`invalidate`](RequestCache::invalidate).
#[derive(Debug, Default)]
pub struct RequestCache {
    preflight: Option<Value>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached preflight report, if still valid.
    pub fn preflight(&self) -> Option<&Value> {
        self.preflight.as_ref()
    }

    pub fn store_preflight(&mut self, report: Value) {
        self.preflight = Some(report);
    }

    /// The uvUsageId of the cached preflight report.
    pub fn uv_usage_id(&self) -> Option<&str> {
        self.preflight
            .as_ref()
            .and_then(|r| r.get("uvUsageId"))
            .and_then(Value::as_str)
    }

    /// Drop everything derived from the previous UV layout.
    pub fn invalidate(&mut self) {
        self.preflight = None;
    }
}
