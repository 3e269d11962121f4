//! Merge policy for push events against cached job snapshots.
//!
//! [`merge`] is a pure, total function over `(old snapshot, patch)` so
//! the reconciliation rules can be unit-tested without any timing or
//! socket involved. The cache applies it under its own lock.
//!
//! Rules:
//! - only the fields a push event carries (status, progress, message,
//!   error) are patched; kind, resource id, log path, and existing
//!   timestamps are never touched by the push path;
//! - terminal states are sticky: a patch against a terminal snapshot
//!   changes nothing except filling in a missing `completed_at`;
//! - `started_at` is stamped on the first transition into `running`,
//!   `completed_at` on entry into any terminal state;
//! - progress is meaningful only while active and is cleared on entry
//!   into a terminal state.

use shelfsync_core::{JobId, JobSnapshot, JobStatus, Timestamp};

use crate::messages::{ProgressEvent, StatusEvent};

/// The fields a push event may carry for one job.
///
/// `status: None` means the event does not change the lifecycle state
/// (a bare `progress` envelope).
#[derive(Debug, Clone)]
pub struct StatusPatch {
    pub job_id: JobId,
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl From<&StatusEvent> for StatusPatch {
    fn from(event: &StatusEvent) -> Self {
        Self {
            job_id: event.job_id.clone(),
            status: Some(event.status),
            progress: event.progress,
            message: event.message.clone(),
            error: event.error.clone(),
        }
    }
}

impl From<&ProgressEvent> for StatusPatch {
    fn from(event: &ProgressEvent) -> Self {
        Self {
            job_id: event.job_id.clone(),
            status: None,
            progress: Some(event.progress),
            message: event.message.clone(),
            error: None,
        }
    }
}

/// Merge a push-event patch into an existing snapshot.
///
/// `now` is passed in rather than read from the clock so the function
/// stays pure.
pub fn merge(old: &JobSnapshot, patch: &StatusPatch, now: Timestamp) -> JobSnapshot {
    let mut next = old.clone();

    if old.status.is_terminal() {
        // Sticky: the only thing a late event may do is close the
        // completion timestamp.
        if next.completed_at.is_none() {
            next.completed_at = Some(now);
        }
        return next;
    }

    if let Some(status) = patch.status {
        next.status = status;
        if status == JobStatus::Running && next.started_at.is_none() {
            next.started_at = Some(now);
        }
        if status.is_terminal() && next.completed_at.is_none() {
            next.completed_at = Some(now);
        }
    }

    if next.status.is_terminal() {
        next.progress = None;
    } else if let Some(progress) = patch.progress {
        next.progress = Some(progress.min(100));
    }

    if let Some(ref message) = patch.message {
        next.message = Some(message.clone());
    }
    if let Some(ref error) = patch.error {
        next.error = Some(error.clone());
    }

    next
}
