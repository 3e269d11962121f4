//! Job snapshot model and lifecycle status machine.
//!
//! A [`JobSnapshot`] is the client-side view of one unit of background
//! work tracked by the server (a download, a format conversion, a
//! library sync, or a repair run). Snapshots are owned by the entity
//! cache in `shelfsync-stream`; this module only defines the data
//! shape and the lifecycle predicates.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// The kind of background work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fetch a resource from a remote source into the library.
    Download,
    /// Transcode a library item into another format.
    Convert,
    /// Reconcile the library with its backing storage.
    Sync,
    /// Re-download or re-index a damaged library item.
    Repair,
}

/// Lifecycle status of a job.
///
/// Jobs move `Pending -> Queued -> Running -> {Completed | Failed |
/// Cancelled}`, optionally cycling `Running <-> Paused` before reaching
/// a terminal state. Terminal states are sticky: no event may move a
/// job out of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobKind {
    /// Wire name of the kind, as used in query strings and envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Download => "download",
            JobKind::Convert => "convert",
            JobKind::Sync => "sync",
            JobKind::Repair => "repair",
        }
    }
}

impl JobStatus {
    /// Wire name of the status, as used in query strings and envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the job is still doing (or waiting to do) work.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Queued | JobStatus::Running | JobStatus::Paused
        )
    }

    /// Whether the job has reached a final state.
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// The externally-visible representation of one background job.
///
/// `progress` is meaningful only while the status is active; the merge
/// policy in `shelfsync-stream` clears it on entry into a terminal
/// state (a completed job is reported by its status, not a bar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Opaque server-assigned identifier.
    pub id: JobId,
    /// What kind of work this job performs.
    pub kind: JobKind,
    /// Library resource this job operates on, if any.
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Completion percentage (0-100), present only while active.
    #[serde(default)]
    pub progress: Option<u8>,
    /// Human-readable status line (e.g. "encoding chapter 4/12").
    #[serde(default)]
    pub message: Option<String>,
    /// Error text, set when the job failed.
    #[serde(default)]
    pub error: Option<String>,
    /// Server-side path of the job's log file, if one exists.
    #[serde(default)]
    pub log_path: Option<String>,
    /// When the job was created.
    pub created_at: Timestamp,
    /// When the job started running (null until it does).
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    /// When the job reached a terminal state (null until it does).
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_statuses() {
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Queued.is_active());
        assert!(JobStatus::Running.is_active());
        assert!(JobStatus::Paused.is_active());
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::from_str::<JobStatus>("\"cancelled\"").unwrap(),
            JobStatus::Cancelled
        );
    }

    #[test]
    fn snapshot_deserializes_with_missing_optionals() {
        let json = r#"{
            "id": "j1",
            "kind": "download",
            "status": "queued",
            "created_at": "2026-01-01T00:00:00Z"
        }"#;
        let job: JobSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(job.id, "j1");
        assert_eq!(job.kind, JobKind::Download);
        assert!(job.progress.is_none());
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }
}
