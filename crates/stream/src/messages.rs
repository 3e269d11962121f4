//! Job-stream envelope types and parser.
//!
//! The server pushes JSON text frames over WebSocket, each tagged with
//! a `"type"` field. This module deserializes them into a
//! strongly-typed [`Envelope`] enum. The tag set is closed: a frame
//! with an unknown tag fails to parse, and callers log it and continue
//! rather than crashing the dispatch loop.

use serde::Deserialize;
use shelfsync_core::JobStatus;

/// All known envelope tags, used as subscription keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTag {
    Status,
    Progress,
    Log,
    Batch,
    Error,
    Connected,
    Disconnected,
}

/// A tagged message unit received from the push channel.
///
/// Deserialized via the internally-tagged `"type"` field; all other
/// fields live at the top level of the frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// A job changed status (and possibly progress).
    Status(StatusEvent),

    /// A running job advanced without changing status.
    Progress(ProgressEvent),

    /// One log line emitted by a running job.
    Log(LogEvent),

    /// An ordered group of envelopes, e.g. the snapshot sent on
    /// connect. Dispatched both as a unit and unwrapped per entry.
    Batch(BatchEvent),

    /// Server-side error not tied to a specific job.
    Error(ErrorEvent),

    /// Server acknowledgement that the push channel is established.
    Connected(ConnectedEvent),

    /// Server notice that it is about to close the channel.
    Disconnected(DisconnectedEvent),
}

impl Envelope {
    /// The subscription tag this envelope is routed by.
    pub fn tag(&self) -> EventTag {
        match self {
            Envelope::Status(_) => EventTag::Status,
            Envelope::Progress(_) => EventTag::Progress,
            Envelope::Log(_) => EventTag::Log,
            Envelope::Batch(_) => EventTag::Batch,
            Envelope::Error(_) => EventTag::Error,
            Envelope::Connected(_) => EventTag::Connected,
            Envelope::Disconnected(_) => EventTag::Disconnected,
        }
    }
}

/// Payload of a `status` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusEvent {
    pub job_id: String,
    pub status: JobStatus,
    /// Completion percentage (0-100), if the server included one.
    #[serde(default)]
    pub progress: Option<u8>,
    /// Human-readable status line.
    #[serde(default)]
    pub message: Option<String>,
    /// Error text, present when the status is `failed`.
    #[serde(default)]
    pub error: Option<String>,
}

/// Payload of a `progress` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    /// Completion percentage (0-100).
    pub progress: u8,
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload of a `log` envelope (one line of job output).
#[derive(Debug, Clone, Deserialize)]
pub struct LogEvent {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    pub line: String,
}

/// Payload of a `batch` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchEvent {
    /// Number of inner envelopes the server claims to have sent.
    pub count: usize,
    /// Inner envelopes, in server order.
    pub events: Vec<Envelope>,
}

/// Payload of an `error` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Payload of a `connected` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectedEvent {
    #[serde(default)]
    pub server_version: Option<String>,
}

/// Payload of a `disconnected` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct DisconnectedEvent {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Parse one text frame into a typed [`Envelope`].
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log the frame and continue.
pub fn parse_envelope(text: &str) -> Result<Envelope, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_envelope() {
        let json = r#"{"type":"status","job_id":"j1","status":"running","progress":40}"#;
        let env = parse_envelope(json).unwrap();
        match env {
            Envelope::Status(e) => {
                assert_eq!(e.job_id, "j1");
                assert_eq!(e.status, JobStatus::Running);
                assert_eq!(e.progress, Some(40));
                assert!(e.error.is_none());
            }
            other => panic!("Expected Status, got {other:?}"),
        }
    }

    #[test]
    fn parse_status_without_progress() {
        let json = r#"{"type":"status","job_id":"j2","status":"failed","error":"disk full"}"#;
        let env = parse_envelope(json).unwrap();
        match env {
            Envelope::Status(e) => {
                assert_eq!(e.status, JobStatus::Failed);
                assert!(e.progress.is_none());
                assert_eq!(e.error.as_deref(), Some("disk full"));
            }
            other => panic!("Expected Status, got {other:?}"),
        }
    }

    #[test]
    fn parse_progress_envelope() {
        let json = r#"{"type":"progress","job_id":"j1","progress":55}"#;
        let env = parse_envelope(json).unwrap();
        match env {
            Envelope::Progress(e) => {
                assert_eq!(e.job_id, "j1");
                assert_eq!(e.progress, 55);
            }
            other => panic!("Expected Progress, got {other:?}"),
        }
    }

    #[test]
    fn parse_log_envelope() {
        let json = r#"{"type":"log","job_id":"j1","level":"info","line":"chapter 3 done"}"#;
        let env = parse_envelope(json).unwrap();
        match env {
            Envelope::Log(e) => {
                assert_eq!(e.line, "chapter 3 done");
                assert_eq!(e.level.as_deref(), Some("info"));
            }
            other => panic!("Expected Log, got {other:?}"),
        }
    }

    #[test]
    fn parse_batch_envelope_preserves_order() {
        let json = r#"{"type":"batch","count":2,"events":[
            {"type":"status","job_id":"a","status":"queued"},
            {"type":"status","job_id":"b","status":"running","progress":10}
        ]}"#;
        let env = parse_envelope(json).unwrap();
        match env {
            Envelope::Batch(b) => {
                assert_eq!(b.count, 2);
                assert_eq!(b.events.len(), 2);
                assert!(matches!(&b.events[0], Envelope::Status(e) if e.job_id == "a"));
                assert!(matches!(&b.events[1], Envelope::Status(e) if e.job_id == "b"));
            }
            other => panic!("Expected Batch, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_envelope() {
        let json = r#"{"type":"error","message":"library locked","code":"E_LOCKED"}"#;
        let env = parse_envelope(json).unwrap();
        match env {
            Envelope::Error(e) => {
                assert_eq!(e.message, "library locked");
                assert_eq!(e.code.as_deref(), Some("E_LOCKED"));
            }
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    #[test]
    fn parse_connected_and_disconnected() {
        assert!(matches!(
            parse_envelope(r#"{"type":"connected","server_version":"1.4.0"}"#).unwrap(),
            Envelope::Connected(_)
        ));
        assert!(matches!(
            parse_envelope(r#"{"type":"disconnected","reason":"shutdown"}"#).unwrap(),
            Envelope::Disconnected(_)
        ));
    }

    #[test]
    fn parse_unknown_tag_returns_error() {
        assert!(parse_envelope(r#"{"type":"mystery","job_id":"j1"}"#).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_envelope("not json at all").is_err());
    }

    #[test]
    fn tag_matches_variant() {
        let env = parse_envelope(r#"{"type":"log","line":"x"}"#).unwrap();
        assert_eq!(env.tag(), EventTag::Log);
    }
}
