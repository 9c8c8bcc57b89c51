// crates/ashfox-server/src/mcp/sse.rs
// Server-Sent Events framing and the per-connection handle the session
// store retains.

use tokio::sync::mpsc;

/// Comment frame sent as the first bytes of every stream.
pub const STREAM_OPEN: &str = ": stream open\n\n";
/// Comment frame sent on the keep-alive timer.
pub const KEEP_ALIVE: &str = ": keep-alive\n\n";

/// One SSE event before framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<u64>,
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Wire framing: optional id and event lines, one `data:` line per
    /// input line, blank-line terminator.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(id) = self.id {
            out.push_str(&format!("id: {id}\n"));
        }
        if let Some(event) = &self.event {
            out.push_str(&format!("event: {event}\n"));
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }

    /// Parse one framed event (the inverse of [`encode`](Self::encode)).
    /// Comment-only frames return `None`.
    pub fn parse(frame: &str) -> Option<Self> {
        let mut id = None;
        let mut event = None;
        let mut data_lines = Vec::new();
        for line in frame.lines() {
            if line.is_empty() {
                break;
            }
            if let Some(rest) = line.strip_prefix("id: ") {
                id = rest.parse().ok();
            } else if let Some(rest) = line.strip_prefix("event: ") {
                event = Some(rest.to_string());
            } else if let Some(rest) = line.strip_prefix("data: ") {
                data_lines.push(rest.to_string());
            }
        }
        if data_lines.is_empty() {
            return None;
        }
        Some(Self {
            id,
            event,
            data: data_lines.join("\n"),
        })
    }
}

/// Sender half of one SSE connection, owned by the session store. The
/// receiver half feeds the HTTP response body; when the client goes away
/// the receiver drops and sends start failing, which triggers detach.
#[derive(Debug, Clone)]
pub struct SseConnection {
    pub id: u64,
    /// Project whose events this connection subscribed to, if any.
    pub project_id: Option<String>,
    tx: mpsc::UnboundedSender<String>,
}

impl SseConnection {
    pub fn channel(id: u64, project_id: Option<String>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id,
                project_id,
                tx,
            },
            rx,
        )
    }

    /// Push a framed event. Returns false when the client is gone.
    pub fn send(&self, event: &SseEvent) -> bool {
        self.tx.send(event.encode()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_parse_round_trip() {
        let event = SseEvent::new("{\"seq\":4}")
            .with_id(4)
            .with_event("project.snapshot");
        let frame = event.encode();
        assert_eq!(
            frame,
            "id: 4\nevent: project.snapshot\ndata: {\"seq\":4}\n\n"
        );
        assert_eq!(SseEvent::parse(&frame), Some(event));
    }

    #[test]
    fn multiline_data_round_trips() {
        let event = SseEvent::new("line one\nline two");
        let frame = event.encode();
        assert_eq!(frame, "data: line one\ndata: line two\n\n");
        assert_eq!(SseEvent::parse(&frame).unwrap().data, "line one\nline two");
    }

    #[test]
    fn bare_event_round_trips() {
        let event = SseEvent::new("ping");
        assert_eq!(SseEvent::parse(&event.encode()), Some(event));
    }

    #[test]
    fn comments_parse_to_none() {
        assert_eq!(SseEvent::parse(STREAM_OPEN), None);
        assert_eq!(SseEvent::parse(KEEP_ALIVE), None);
    }

    #[tokio::test]
    async fn connection_send_reports_liveness() {
        let (conn, mut rx) = SseConnection::channel(1, None);
        assert!(conn.send(&SseEvent::new("hello")));
        assert_eq!(rx.recv().await.unwrap(), "data: hello\n\n");
        drop(rx);
        assert!(!conn.send(&SseEvent::new("dead")));
    }
}
