//! Shared entity cache of job snapshots.
//!
//! [`JobCache`] maps job id to [`JobSnapshot`] and maintains a derived
//! "active jobs" view: an ordered, live-filtered projection holding
//! only jobs whose status is still active (newest first). Three
//! independent writers converge here -- the push path
//! ([`apply_patch`](JobCache::apply_patch)), the pull path
//! ([`replace_all`](JobCache::replace_all) /
//! [`upsert`](JobCache::upsert)), and optimistic mutations
//! ([`checkpoint`](JobCache::checkpoint) /
//! [`restore`](JobCache::restore)). The lock only protects map
//! integrity; cross-writer consistency comes from the merge policy in
//! [`crate::reconcile`], terminal-state stickiness, and periodic pull
//! refreshes.

use std::collections::HashMap;
use std::sync::RwLock;

use shelfsync_core::{JobId, JobSnapshot};

use crate::reconcile::{merge, StatusPatch};

#[derive(Clone, Default)]
struct CacheState {
    jobs: HashMap<JobId, JobSnapshot>,
    /// Active job ids, newest first.
    active: Vec<JobId>,
}

/// Verbatim copy of the cache state, taken before an optimistic write.
///
/// Restoring a checkpoint is a full rollback, not a partial patch; a
/// push event applied between checkpoint and restore is lost and will
/// be corrected by the next pull refresh.
pub struct CacheCheckpoint(CacheState);

/// Process-wide key-value store of job snapshots.
pub struct JobCache {
    state: RwLock<CacheState>,
}

impl JobCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Look up one job by id.
    pub fn job(&self, id: &str) -> Option<JobSnapshot> {
        self.state.read().unwrap().jobs.get(id).cloned()
    }

    /// All cached jobs, newest first.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        let state = self.state.read().unwrap();
        let mut jobs: Vec<JobSnapshot> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    /// The active view, in its maintained order (newest first).
    pub fn active_jobs(&self) -> Vec<JobSnapshot> {
        let state = self.state.read().unwrap();
        state
            .active
            .iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect()
    }

    /// Ids currently in the active view.
    pub fn active_ids(&self) -> Vec<JobId> {
        self.state.read().unwrap().active.clone()
    }

    /// Reconcile one push event into the cache.
    ///
    /// Known ids are merged field-by-field via [`merge`]; if the merged
    /// status is active the id is upserted into the active view
    /// (prepended when newly active), and if terminal it is removed.
    /// An event for an id with no cached entry is skipped -- the next
    /// pull refresh supplies the full snapshot. (Synthesizing a
    /// placeholder here would surface a mis-typed, mis-dated entry.)
    pub fn apply_patch(&self, patch: &StatusPatch) {
        let mut state = self.state.write().unwrap();

        let Some(old) = state.jobs.get(&patch.job_id) else {
            tracing::debug!(
                job_id = %patch.job_id,
                "Push event for uncached job, awaiting pull refresh",
            );
            return;
        };

        let merged = merge(old, patch, chrono::Utc::now());
        let is_active = merged.status.is_active();
        state.jobs.insert(patch.job_id.clone(), merged);

        if is_active {
            if !state.active.contains(&patch.job_id) {
                state.active.insert(0, patch.job_id.clone());
            }
        } else {
            state.active.retain(|id| id != &patch.job_id);
        }
    }

    /// Point-in-time full replacement from an unfiltered pull listing.
    ///
    /// Rebuilds both the snapshot map and the active view. Pull data
    /// wins entirely; it is the source of truth for fields push events
    /// never carry.
    pub fn replace_all(&self, jobs: Vec<JobSnapshot>) {
        let mut state = self.state.write().unwrap();
        state.active = jobs
            .iter()
            .filter(|job| job.status.is_active())
            .map(|job| job.id.clone())
            .collect();
        state.jobs = jobs.into_iter().map(|job| (job.id.clone(), job)).collect();
    }

    /// Replace (or insert) a single snapshot, e.g. from a by-id fetch.
    pub fn upsert(&self, job: JobSnapshot) {
        let mut state = self.state.write().unwrap();
        let id = job.id.clone();
        let is_active = job.status.is_active();
        state.jobs.insert(id.clone(), job);
        if is_active {
            if !state.active.contains(&id) {
                state.active.insert(0, id);
            }
        } else {
            state.active.retain(|existing| existing != &id);
        }
    }

    /// Drop a job from the map and the active view, e.g. a settled
    /// optimistic placeholder.
    pub fn remove(&self, id: &str) {
        let mut state = self.state.write().unwrap();
        state.jobs.remove(id);
        state.active.retain(|existing| existing != id);
    }

    /// Snapshot the full cache state for a later [`restore`](Self::restore).
    pub fn checkpoint(&self) -> CacheCheckpoint {
        CacheCheckpoint(self.state.read().unwrap().clone())
    }

    /// Restore the cache to a previously taken checkpoint, verbatim.
    pub fn restore(&self, checkpoint: CacheCheckpoint) {
        *self.state.write().unwrap() = checkpoint.0;
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfsync_core::{JobKind, JobStatus};

    fn job(id: &str, status: JobStatus) -> JobSnapshot {
        JobSnapshot {
            id: id.into(),
            kind: JobKind::Download,
            resource_id: None,
            status,
            progress: status.is_active().then_some(0),
            message: None,
            error: None,
            log_path: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn patch(id: &str, status: JobStatus, progress: Option<u8>) -> StatusPatch {
        StatusPatch {
            job_id: id.into(),
            status: Some(status),
            progress,
            message: None,
            error: None,
        }
    }

    #[test]
    fn replace_all_rebuilds_active_view() {
        let cache = JobCache::new();
        cache.replace_all(vec![
            job("a", JobStatus::Running),
            job("b", JobStatus::Completed),
            job("c", JobStatus::Queued),
        ]);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.active_ids(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn patch_updates_existing_entry_in_place() {
        let cache = JobCache::new();
        cache.replace_all(vec![job("a", JobStatus::Running)]);

        cache.apply_patch(&patch("a", JobStatus::Running, Some(55)));

        let stored = cache.job("a").unwrap();
        assert_eq!(stored.progress, Some(55));
        assert_eq!(cache.active_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn terminal_patch_removes_from_active_view() {
        let cache = JobCache::new();
        cache.replace_all(vec![job("a", JobStatus::Running), job("b", JobStatus::Running)]);

        cache.apply_patch(&patch("a", JobStatus::Completed, None));

        assert_eq!(cache.active_ids(), vec!["b".to_string()]);
        // The job itself stays cached for history readers.
        assert_eq!(cache.job("a").unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn newly_active_id_is_prepended() {
        let cache = JobCache::new();
        cache.replace_all(vec![job("a", JobStatus::Running), job("b", JobStatus::Running)]);
        cache.apply_patch(&patch("a", JobStatus::Completed, None));
        assert_eq!(cache.active_ids(), vec!["b".to_string()]);

        // Reactivation before terminal would be unusual, but an upsert
        // of a fresh active job must land at the front.
        cache.upsert(job("c", JobStatus::Pending));
        assert_eq!(cache.active_ids(), vec!["c".to_string(), "b".to_string()]);
    }

    #[test]
    fn unknown_id_is_skipped() {
        let cache = JobCache::new();
        cache.apply_patch(&patch("ghost", JobStatus::Running, Some(10)));

        assert!(cache.is_empty());
        assert!(cache.active_ids().is_empty());
    }

    #[test]
    fn checkpoint_restore_is_verbatim() {
        let cache = JobCache::new();
        cache.replace_all(vec![job("a", JobStatus::Running)]);
        let before = cache.active_jobs();

        let checkpoint = cache.checkpoint();
        cache.upsert(job("tmp", JobStatus::Pending));
        cache.apply_patch(&patch("a", JobStatus::Failed, None));
        cache.restore(checkpoint);

        assert_eq!(cache.active_jobs(), before);
        assert!(cache.job("tmp").is_none());
    }
}
