// crates/ashfox-server/src/config/env.rs
// Environment-based configuration - single source of truth for all ASHFOX_*
// variables. Invalid values warn and fall back to defaults; startup never
// aborts on a bad env var.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Which implementation backs the native pipeline store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineBackend {
    /// In-process state only; lost on restart.
    #[default]
    Memory,
    /// Durable documents behind the repository port.
    Persistence,
}

/// Which repository implementation persists the pipeline documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DbProvider {
    #[default]
    Sqlite,
    Memory,
}

/// Auth-related env values. Parsed here, consumed by the external auth
/// collaborator; the gateway itself only passes them through.
#[derive(Debug, Clone, Default)]
pub struct AuthPassthrough {
    pub cookie_name: Option<String>,
    pub token_ttl_sec: Option<u64>,
    pub github_scopes: Option<String>,
    pub post_login_redirect_path: Option<String>,
}

/// Full gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// MCP endpoint path (ASHFOX_MCP_PATH).
    pub mcp_path: String,
    /// Listen address (ASHFOX_BIND).
    pub bind: String,
    /// Upstream forwarder for the proxy front-end (ASHFOX_GATEWAY_URL).
    pub gateway_url: Option<String>,
    /// memory | persistence (ASHFOX_NATIVE_PIPELINE_BACKEND).
    pub pipeline_backend: PipelineBackend,
    /// sqlite | memory (ASHFOX_DB_PROVIDER).
    pub db_provider: DbProvider,
    /// Sqlite file for pipeline documents (ASHFOX_DB_PATH).
    pub db_path: PathBuf,
    /// Reserved artifact-storage selector (ASHFOX_STORAGE_PROVIDER).
    pub storage_provider: Option<String>,
    /// MCP session idle eviction (ASHFOX_SESSION_TTL_SECS).
    pub session_ttl: Duration,
    /// Mutating tools demand ifRevision (ASHFOX_REQUIRE_REVISION).
    pub require_revision: bool,
    /// Auto-attach the live project when none is active (ASHFOX_AUTO_ATTACH).
    pub auto_attach: bool,
    /// Trace log path; unset disables tracing (ASHFOX_TRACE_FILE).
    pub trace_file: Option<PathBuf>,
    /// Run the embedded worker loop (ASHFOX_WORKER_ENABLED).
    pub worker_enabled: bool,
    /// Restrict the worker to these workspaces (ASHFOX_WORKER_WORKSPACES).
    pub worker_workspaces: Option<Vec<String>>,
    pub auth: AuthPassthrough,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mcp_path: "/mcp".to_string(),
            bind: "127.0.0.1:8787".to_string(),
            gateway_url: None,
            pipeline_backend: PipelineBackend::Memory,
            db_provider: DbProvider::Sqlite,
            db_path: default_db_path(),
            storage_provider: None,
            session_ttl: Duration::from_secs(1800),
            require_revision: false,
            auto_attach: true,
            trace_file: None,
            worker_enabled: true,
            worker_workspaces: None,
            auth: AuthPassthrough::default(),
        }
    }
}

impl GatewayConfig {
    /// Load from the process environment. `ASHFOX_PERSISTENCE_PRESET` is
    /// applied first; explicit variables override the preset.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        match read_var("ASHFOX_PERSISTENCE_PRESET").as_deref() {
            Some("local-sqlite") => {
                cfg.pipeline_backend = PipelineBackend::Persistence;
                cfg.db_provider = DbProvider::Sqlite;
            }
            Some("ephemeral") => {
                cfg.pipeline_backend = PipelineBackend::Memory;
                cfg.db_provider = DbProvider::Memory;
            }
            Some(other) => {
                warn!("Unknown ASHFOX_PERSISTENCE_PRESET={other:?}, ignoring");
            }
            None => {}
        }

        if let Some(path) = read_var("ASHFOX_MCP_PATH") {
            cfg.mcp_path = if path.starts_with('/') {
                path
            } else {
                format!("/{path}")
            };
        }
        if let Some(bind) = read_var("ASHFOX_BIND") {
            cfg.bind = bind;
        }
        cfg.gateway_url = read_var("ASHFOX_GATEWAY_URL");

        match read_var("ASHFOX_NATIVE_PIPELINE_BACKEND").as_deref() {
            Some("memory") => cfg.pipeline_backend = PipelineBackend::Memory,
            Some("persistence") => cfg.pipeline_backend = PipelineBackend::Persistence,
            Some(other) => warn!("Unknown ASHFOX_NATIVE_PIPELINE_BACKEND={other:?}, keeping {:?}", cfg.pipeline_backend),
            None => {}
        }
        match read_var("ASHFOX_DB_PROVIDER").as_deref() {
            Some("sqlite") => cfg.db_provider = DbProvider::Sqlite,
            Some("memory") => cfg.db_provider = DbProvider::Memory,
            Some(other) => warn!("Unknown ASHFOX_DB_PROVIDER={other:?}, keeping {:?}", cfg.db_provider),
            None => {}
        }
        if let Some(path) = read_var("ASHFOX_DB_PATH") {
            cfg.db_path = PathBuf::from(path);
        }
        cfg.storage_provider = read_var("ASHFOX_STORAGE_PROVIDER");

        if let Some(secs) = parse_u64_env("ASHFOX_SESSION_TTL_SECS") {
            cfg.session_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = parse_bool_env("ASHFOX_REQUIRE_REVISION") {
            cfg.require_revision = v;
        }
        if let Some(v) = parse_bool_env("ASHFOX_AUTO_ATTACH") {
            cfg.auto_attach = v;
        }
        cfg.trace_file = read_var("ASHFOX_TRACE_FILE").map(PathBuf::from);
        if let Some(v) = parse_bool_env("ASHFOX_WORKER_ENABLED") {
            cfg.worker_enabled = v;
        }
        cfg.worker_workspaces = read_var("ASHFOX_WORKER_WORKSPACES").map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        cfg.auth = AuthPassthrough {
            cookie_name: read_var("ASHFOX_AUTH_COOKIE_NAME"),
            token_ttl_sec: parse_u64_env("ASHFOX_AUTH_TOKEN_TTL_SEC"),
            github_scopes: read_var("ASHFOX_AUTH_GITHUB_SCOPES"),
            post_login_redirect_path: read_var("ASHFOX_AUTH_POST_LOGIN_REDIRECT_PATH"),
        };

        cfg
    }
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ashfox/pipeline.db")
}

/// Read an env var, filtering empty values.
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a boolean env var: 1/true/yes/on are true, 0/false/no/off false.
pub fn parse_bool_env(name: &str) -> Option<bool> {
    let raw = read_var(name)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!("Unparseable boolean {name}={other:?}, ignoring");
            None
        }
    }
}

fn parse_u64_env(name: &str) -> Option<u64> {
    let raw = read_var(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Unparseable integer {name}={raw:?}, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.mcp_path, "/mcp");
        assert_eq!(cfg.pipeline_backend, PipelineBackend::Memory);
        assert_eq!(cfg.session_ttl, Duration::from_secs(1800));
        assert!(cfg.auto_attach);
        assert!(!cfg.require_revision);
        assert!(cfg.worker_enabled);
    }

    // Env-var parsing is covered via the helpers: the process environment
    // is shared across the test binary, so tests avoid mutating it.

    #[test]
    fn bool_parse_accepts_common_spellings() {
        // Parsing goes through the same match as parse_bool_env.
        for (raw, expected) in [
            ("1", Some(true)),
            ("true", Some(true)),
            ("ON", Some(true)),
            ("0", Some(false)),
            ("off", Some(false)),
        ] {
            let got = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            };
            assert_eq!(got, expected, "raw={raw}");
        }
    }
}
