// crates/ashfox-server/src/mcp/sessions.rs
// MCP session registry: lifecycle, idle eviction, and the per-session SSE
// connection set the router fans events out through.

use super::sse::{SseConnection, SseEvent};
use crate::config::MAX_SSE_PER_SESSION;
use crate::metrics::MetricsRegistry;
use ashfox_types::ProjectEvent;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One MCP session. `initialized` flips when the client sends
/// notifications/initialized; until then only the handshake may proceed.
#[derive(Debug)]
pub struct McpSession {
    pub id: String,
    pub protocol_version: String,
    pub initialized: bool,
    pub last_touched: Instant,
    pub connections: Vec<SseConnection>,
    next_connection_id: u64,
}

/// Why an SSE attach was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum AttachError {
    SessionNotFound,
    TooManyConnections,
}

/// Process-wide session registry. All access goes through the internal
/// mutex; no await points while it is held.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, McpSession>>,
    ttl: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl SessionStore {
    pub fn new(ttl: Duration, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            metrics,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, McpSession>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn update_gauges(&self, sessions: &HashMap<String, McpSession>) {
        self.metrics
            .set_gauge("mcp_sessions_active", &[], sessions.len() as f64);
        let connections: usize = sessions.values().map(|s| s.connections.len()).sum();
        self.metrics
            .set_gauge("sse_connections_active", &[], connections as f64);
    }

    /// Create a session. `initialized` is false for the normal handshake
    /// and true for implicit-session methods.
    pub fn create(&self, protocol_version: &str, initialized: bool) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut sessions = self.lock();
        sessions.insert(
            id.clone(),
            McpSession {
                id: id.clone(),
                protocol_version: protocol_version.to_string(),
                initialized,
                last_touched: Instant::now(),
                connections: Vec::new(),
                next_connection_id: 0,
            },
        );
        self.update_gauges(&sessions);
        id
    }

    pub fn exists(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn protocol_version(&self, id: &str) -> Option<String> {
        self.lock().get(id).map(|s| s.protocol_version.clone())
    }

    pub fn is_initialized(&self, id: &str) -> Option<bool> {
        self.lock().get(id).map(|s| s.initialized)
    }

    pub fn mark_initialized(&self, id: &str) -> bool {
        let mut sessions = self.lock();
        match sessions.get_mut(id) {
            Some(session) => {
                session.initialized = true;
                session.last_touched = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn touch(&self, id: &str) {
        if let Some(session) = self.lock().get_mut(id) {
            session.last_touched = Instant::now();
        }
    }

    /// Open an SSE connection on a session. At most
    /// [`MAX_SSE_PER_SESSION`] concurrent streams per session.
    pub fn attach_sse(
        &self,
        session_id: &str,
        project_id: Option<String>,
    ) -> Result<(u64, mpsc::UnboundedReceiver<String>), AttachError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or(AttachError::SessionNotFound)?;
        if session.connections.len() >= MAX_SSE_PER_SESSION {
            return Err(AttachError::TooManyConnections);
        }
        session.next_connection_id += 1;
        let connection_id = session.next_connection_id;
        let (connection, rx) = SseConnection::channel(connection_id, project_id);
        session.connections.push(connection);
        session.last_touched = Instant::now();
        self.update_gauges(&sessions);
        Ok((connection_id, rx))
    }

    /// Remove one connection. Safe to call twice; the second call is a
    /// no-op (the transport close hook and send-failure cleanup can race).
    pub fn detach_sse(&self, session_id: &str, connection_id: u64) {
        let mut sessions = self.lock();
        if let Some(session) = sessions.get_mut(session_id) {
            session.connections.retain(|c| c.id != connection_id);
        }
        self.update_gauges(&sessions);
    }

    /// Close a session and end all of its streams (dropping the senders
    /// terminates the response bodies).
    pub fn close(&self, id: &str) -> bool {
        let mut sessions = self.lock();
        let removed = sessions.remove(id).is_some();
        self.update_gauges(&sessions);
        removed
    }

    /// Push a project event to every connection subscribed to its
    /// project, across all sessions. Dead connections are pruned.
    pub fn broadcast_project_event(&self, event: &ProjectEvent) {
        let frame = project_event_frame(event);
        let mut sessions = self.lock();
        for session in sessions.values_mut() {
            session.connections.retain(|connection| {
                if connection.project_id.as_deref() != Some(event.project_id.as_str()) {
                    return true;
                }
                connection.send(&frame)
            });
        }
        self.update_gauges(&sessions);
    }

    /// Send a server notification to every stream of one session.
    pub fn notify_session(&self, session_id: &str, event: &SseEvent) {
        let mut sessions = self.lock();
        if let Some(session) = sessions.get_mut(session_id) {
            session.connections.retain(|c| c.send(event));
        }
        self.update_gauges(&sessions);
    }

    /// Close sessions idle past the TTL. Returns how many were evicted.
    pub fn evict_idle(&self) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        let ttl = self.ttl;
        sessions.retain(|_, session| session.last_touched.elapsed() < ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, "evicted idle MCP sessions");
        }
        self.update_gauges(&sessions);
        evicted
    }

    /// Spawn the background eviction task.
    pub fn spawn_eviction(self: &Arc<Self>, scan_interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scan_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                store.evict_idle();
            }
        })
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }
}

/// SSE framing of a project event: the event's sequence number becomes
/// the SSE id, its kind the SSE event name.
pub fn project_event_frame(event: &ProjectEvent) -> SseEvent {
    SseEvent::new(
        serde_json::to_string(&json!({
            "seq": event.seq,
            "projectId": event.project_id,
            "kind": event.kind,
            "createdAt": event.created_at,
            "payload": event.payload,
        }))
        .unwrap_or_else(|_| "{}".to_string()),
    )
    .with_id(event.seq)
    .with_event(event.kind.as_str())
}
