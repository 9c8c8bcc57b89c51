// crates/ashfox-server/src/config/mod.rs
// Gateway configuration, assembled once at startup and passed explicitly.
// No module-level singletons: everything that needs config receives it.

mod env;

pub use env::{AuthPassthrough, DbProvider, GatewayConfig, PipelineBackend, parse_bool_env};

/// Protocol versions this server can negotiate, newest first. The first
/// entry is the server default when the client's requested version is not
/// supported.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 2] = ["2025-06-18", "2025-03-26"];

/// Hard cap on a POST body, in bytes. At the cap is accepted; one byte
/// more is rejected with 413.
pub const MAX_BODY_BYTES: usize = 5_000_000;

/// Hard cap on the request header block.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Maximum concurrent SSE connections per MCP session.
pub const MAX_SSE_PER_SESSION: usize = 3;

/// Seconds between SSE keep-alive comments on an idle stream.
pub const SSE_KEEPALIVE_SECS: u64 = 15;

/// Events retained per project for best-effort lastEventId resume.
pub const EVENT_RETENTION_PER_PROJECT: usize = 256;
