// crates/ashfox-server/src/metrics.rs
// In-memory metrics registry: labeled counters, gauges, and histograms,
// rendered as Prometheus text exposition on /metrics.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Histogram buckets for tool call durations, in seconds.
const DURATION_BUCKETS: [f64; 10] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0,
];

/// Help strings for known metrics, keyed by family name.
const HELP: &[(&str, &str)] = &[
    ("tool_calls_total", "Tool invocations by tool and outcome"),
    ("tool_call_duration_seconds", "Tool invocation latency"),
    ("mcp_sessions_active", "Live MCP sessions"),
    ("sse_connections_active", "Open SSE connections"),
    ("pipeline_jobs_total", "Pipeline jobs by kind and terminal status"),
    ("pipeline_lock_contention_total", "Times the pipeline lock was busy"),
];

/// A metric identity: family name plus its sorted label set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct MetricKey {
    name: &'static str,
    labels: Vec<(&'static str, String)>,
}

impl MetricKey {
    fn new(name: &'static str, labels: &[(&'static str, &str)]) -> Self {
        let mut labels: Vec<(&'static str, String)> = labels
            .iter()
            .map(|(k, v)| (*k, (*v).to_string()))
            .collect();
        labels.sort();
        Self { name, labels }
    }

    fn render_labels(&self) -> String {
        if self.labels.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "\\\"")))
            .collect();
        format!("{{{}}}", parts.join(","))
    }
}

#[derive(Debug, Clone)]
struct Histogram {
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            counts: vec![0; DURATION_BUCKETS.len()],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        for (i, bound) in DURATION_BUCKETS.iter().enumerate() {
            if value <= *bound {
                self.counts[i] += 1;
            }
        }
        self.sum += value;
        self.count += 1;
    }
}

#[derive(Debug, Default)]
struct Inner {
    counters: BTreeMap<MetricKey, u64>,
    gauges: BTreeMap<MetricKey, f64>,
    histograms: BTreeMap<MetricKey, Histogram>,
}

/// Process-wide registry, built at startup and passed explicitly.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<Inner>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_counter(&self, name: &'static str, labels: &[(&'static str, &str)]) {
        let key = MetricKey::new(name, labels);
        let mut inner = self.lock();
        *inner.counters.entry(key).or_insert(0) += 1;
    }

    pub fn set_gauge(&self, name: &'static str, labels: &[(&'static str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        let mut inner = self.lock();
        inner.gauges.insert(key, value);
    }

    pub fn observe_duration(
        &self,
        name: &'static str,
        labels: &[(&'static str, &str)],
        seconds: f64,
    ) {
        let key = MetricKey::new(name, labels);
        let mut inner = self.lock();
        inner
            .histograms
            .entry(key)
            .or_insert_with(Histogram::new)
            .observe(seconds);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned metrics mutex would mean a panic mid-increment; the
        // data is still structurally sound, so keep serving.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Prometheus text exposition. Deterministic for a fixed state: keys
    /// iterate in BTreeMap order.
    pub fn render(&self) -> String {
        let inner = self.lock();
        let mut out = String::new();
        let mut announced: Option<&str> = None;
        let mut announce = |out: &mut String, name: &'static str, kind: &str| {
            if announced == Some(name) {
                return;
            }
            announced = Some(name);
            if let Some((_, help)) = HELP.iter().find(|(n, _)| *n == name) {
                out.push_str(&format!("# HELP {name} {help}\n"));
            }
            out.push_str(&format!("# TYPE {name} {kind}\n"));
        };

        for (key, value) in &inner.counters {
            announce(&mut out, key.name, "counter");
            out.push_str(&format!("{}{} {value}\n", key.name, key.render_labels()));
        }
        for (key, value) in &inner.gauges {
            announce(&mut out, key.name, "gauge");
            out.push_str(&format!("{}{} {value}\n", key.name, key.render_labels()));
        }
        for (key, histogram) in &inner.histograms {
            announce(&mut out, key.name, "histogram");
            for (i, bound) in DURATION_BUCKETS.iter().enumerate() {
                let mut labels = key.labels.clone();
                labels.push(("le", bound.to_string()));
                let parts: Vec<String> = labels
                    .iter()
                    .map(|(k, v)| format!("{k}=\"{v}\""))
                    .collect();
                out.push_str(&format!(
                    "{}_bucket{{{}}} {}\n",
                    key.name,
                    parts.join(","),
                    histogram.counts[i]
                ));
            }
            let rendered = key.render_labels();
            let mut inf_labels = key.labels.clone();
            inf_labels.push(("le", "+Inf".to_string()));
            let inf_parts: Vec<String> = inf_labels
                .iter()
                .map(|(k, v)| format!("{k}=\"{v}\""))
                .collect();
            out.push_str(&format!(
                "{}_bucket{{{}}} {}\n",
                key.name,
                inf_parts.join(","),
                histogram.count
            ));
            out.push_str(&format!("{}_sum{rendered} {}\n", key.name, histogram.sum));
            out.push_str(&format!("{}_count{rendered} {}\n", key.name, histogram.count));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label_set() {
        let registry = MetricsRegistry::new();
        registry.inc_counter("tool_calls_total", &[("tool", "add_bone"), ("ok", "true")]);
        registry.inc_counter("tool_calls_total", &[("ok", "true"), ("tool", "add_bone")]);
        registry.inc_counter("tool_calls_total", &[("tool", "add_bone"), ("ok", "false")]);
        let text = registry.render();
        assert!(text.contains("tool_calls_total{ok=\"true\",tool=\"add_bone\"} 2"));
        assert!(text.contains("tool_calls_total{ok=\"false\",tool=\"add_bone\"} 1"));
        assert!(text.contains("# TYPE tool_calls_total counter"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let registry = MetricsRegistry::new();
        registry.observe_duration("tool_call_duration_seconds", &[("tool", "x")], 0.03);
        registry.observe_duration("tool_call_duration_seconds", &[("tool", "x")], 3.0);
        let text = registry.render();
        // 0.03 lands in every bucket from 0.05 up; 3.0 only in 10.0.
        assert!(text.contains("le=\"0.025\"} 0"));
        assert!(text.contains("le=\"0.05\"} 1"));
        assert!(text.contains("le=\"10\"} 2"));
        assert!(text.contains("le=\"+Inf\"} 2"));
        assert!(text.contains("tool_call_duration_seconds_count{tool=\"x\"} 2"));
    }

    #[test]
    fn render_is_deterministic() {
        let registry = MetricsRegistry::new();
        registry.inc_counter("pipeline_jobs_total", &[("kind", "gltf.convert"), ("status", "completed")]);
        registry.set_gauge("mcp_sessions_active", &[], 3.0);
        assert_eq!(registry.render(), registry.render());
    }
}
