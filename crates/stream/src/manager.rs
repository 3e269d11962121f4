//! Top-level job stream orchestration.
//!
//! [`JobStreamManager`] wires the pieces together: it owns the
//! [`StreamClient`] (push path), the [`Dispatcher`], the [`JobCache`],
//! and the [`JobsApi`] (pull and mutation path), and registers the
//! reconciliation handlers that fold `status` and `progress` envelopes
//! into the cache. Consumers read job state from the cache, subscribe
//! to raw envelopes by tag, and issue mutations through the manager's
//! optimistic operations.
//!
//! Mutations follow the snapshot/rollback discipline: the cache is
//! speculatively updated before the request goes out, settled by a
//! pull refetch on success, and restored verbatim from the snapshot on
//! failure. A push event landing between snapshot and rollback can be
//! lost; the periodic pull refresh self-corrects such divergence.

use std::sync::Arc;

use shelfsync_core::{JobId, JobKind, JobSnapshot, JobStatus};

use crate::api::{CreateAck, JobFilter, JobsApi, JobsApiError, MutationAck};
use crate::cache::JobCache;
use crate::client::{ConnectionState, StreamClient};
use crate::config::StreamConfig;
use crate::dispatcher::{Dispatcher, Handler, SubscriptionToken};
use crate::messages::{Envelope, EventTag};
use crate::reconcile::StatusPatch;

/// Mutation verbs exposed by the server.
enum MutationVerb {
    Cancel,
    Pause,
    Resume,
}

impl MutationVerb {
    /// The optimistic status flip written before the request settles.
    fn optimistic_status(&self) -> JobStatus {
        match self {
            MutationVerb::Cancel => JobStatus::Cancelled,
            MutationVerb::Pause => JobStatus::Paused,
            MutationVerb::Resume => JobStatus::Running,
        }
    }
}

/// Shared handle over the whole job-stream client stack.
///
/// Created once via [`JobStreamManager::start`]; the returned `Arc` can
/// be cheaply cloned into whatever consumes it.
pub struct JobStreamManager {
    client: Arc<StreamClient>,
    dispatcher: Arc<Dispatcher>,
    cache: Arc<JobCache>,
    api: JobsApi,
    /// Reconciliation handler registrations, released on shutdown.
    reconcile_subs: Vec<SubscriptionToken>,
}

impl JobStreamManager {
    /// Build the full stack without opening the connection.
    pub fn new(config: StreamConfig) -> Arc<Self> {
        let dispatcher = Arc::new(Dispatcher::new());
        let cache = Arc::new(JobCache::new());
        let api = JobsApi::new(config.api_url.clone());
        let client = StreamClient::new(&config, Arc::clone(&dispatcher));

        let mut reconcile_subs = Vec::new();

        let status_cache = Arc::clone(&cache);
        reconcile_subs.push(dispatcher.subscribe(
            EventTag::Status,
            Arc::new(move |envelopes: &[Envelope]| {
                for envelope in envelopes {
                    if let Envelope::Status(event) = envelope {
                        status_cache.apply_patch(&StatusPatch::from(event));
                    }
                }
                Ok(())
            }),
        ));

        let progress_cache = Arc::clone(&cache);
        reconcile_subs.push(dispatcher.subscribe(
            EventTag::Progress,
            Arc::new(move |envelopes: &[Envelope]| {
                for envelope in envelopes {
                    if let Envelope::Progress(event) = envelope {
                        progress_cache.apply_patch(&StatusPatch::from(event));
                    }
                }
                Ok(())
            }),
        ));

        Arc::new(Self {
            client,
            dispatcher,
            cache,
            api,
            reconcile_subs,
        })
    }

    /// Build the stack and open the push connection.
    pub fn start(config: StreamConfig) -> Arc<Self> {
        let manager = Self::new(config);
        manager.connect();
        manager
    }

    // ---- connection surface ----

    /// Open (or re-open after `Failed`) the push connection.
    pub fn connect(&self) {
        self.client.connect();
    }

    /// Intentionally close the push connection.
    pub fn disconnect(&self) {
        self.client.disconnect();
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    /// Watch channel for connection-state changes.
    pub fn watch_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.client.watch_state()
    }

    /// Why the push connection last left `Connected`: the most recent
    /// connect failure or abnormal close, if any.
    pub fn last_error(&self) -> Option<String> {
        self.client.last_error()
    }

    /// Close the connection and release the reconciliation handlers.
    pub fn shutdown(&self) {
        self.client.disconnect();
        for token in &self.reconcile_subs {
            self.dispatcher.unsubscribe(*token);
        }
        tracing::info!("Job stream manager shut down");
    }

    // ---- event surface ----

    /// Direct access to the dispatcher, e.g. for feeding recorded
    /// frames in tests or tooling.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Register a handler for one envelope tag.
    pub fn subscribe(&self, tag: EventTag, handler: Handler) -> SubscriptionToken {
        self.dispatcher.subscribe(tag, handler)
    }

    /// Remove a previously registered handler.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.dispatcher.unsubscribe(token)
    }

    // ---- cache reads ----

    /// All cached jobs, newest first.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.cache.jobs()
    }

    /// Jobs whose status is not yet terminal, newest first.
    pub fn active_jobs(&self) -> Vec<JobSnapshot> {
        self.cache.active_jobs()
    }

    /// One cached job by id.
    pub fn job(&self, id: &str) -> Option<JobSnapshot> {
        self.cache.job(id)
    }

    // ---- pull path ----

    /// Replace the cache with a fresh unfiltered listing.
    pub async fn refresh(&self) -> Result<Vec<JobSnapshot>, JobsApiError> {
        let response = self.api.list_jobs(&JobFilter::default()).await?;
        self.cache.replace_all(response.jobs.clone());
        Ok(response.jobs)
    }

    /// Fetch a filtered listing (e.g. for the history drawer).
    ///
    /// Matching snapshots are upserted into the cache; entries outside
    /// the filter are left alone.
    pub async fn fetch_jobs(&self, filter: &JobFilter) -> Result<Vec<JobSnapshot>, JobsApiError> {
        let response = self.api.list_jobs(filter).await?;
        for job in &response.jobs {
            self.cache.upsert(job.clone());
        }
        Ok(response.jobs)
    }

    /// Fetch one job by id and upsert the authoritative snapshot.
    pub async fn refresh_job(&self, job_id: &str) -> Result<JobSnapshot, JobsApiError> {
        let job = self.api.get_job(job_id).await?;
        self.cache.upsert(job.clone());
        Ok(job)
    }

    // ---- optimistic mutations ----

    /// Create jobs of `kind` for one or many library resources.
    ///
    /// Placeholder entries with temporary ids appear in the active view
    /// immediately; on success they are swapped for the server's
    /// snapshots via a refetch, on failure the cache is rolled back
    /// verbatim and the error is returned for the caller to surface.
    pub async fn create_jobs(
        &self,
        kind: JobKind,
        resource_ids: &[String],
    ) -> Result<Vec<CreateAck>, JobsApiError> {
        let checkpoint = self.cache.checkpoint();

        let temp_ids: Vec<JobId> = resource_ids
            .iter()
            .map(|resource_id| {
                let temp_id = format!("pending-{}", uuid::Uuid::new_v4());
                self.cache.upsert(JobSnapshot {
                    id: temp_id.clone(),
                    kind,
                    resource_id: Some(resource_id.clone()),
                    status: JobStatus::Pending,
                    progress: Some(0),
                    message: None,
                    error: None,
                    log_path: None,
                    created_at: chrono::Utc::now(),
                    started_at: None,
                    completed_at: None,
                });
                temp_id
            })
            .collect();

        match self.api.create_jobs(kind, resource_ids).await {
            Ok(response) => {
                for temp_id in &temp_ids {
                    self.cache.remove(temp_id);
                }
                if let Err(e) = self.refresh().await {
                    tracing::warn!(error = %e, "Refetch after job creation failed");
                }
                tracing::info!(
                    ?kind,
                    count = response.jobs.len(),
                    "Jobs created",
                );
                Ok(response.jobs)
            }
            Err(e) => {
                self.cache.restore(checkpoint);
                tracing::warn!(error = %e, "Job creation failed, cache rolled back");
                Err(e)
            }
        }
    }

    /// Cancel a queued or running job.
    pub async fn cancel_job(&self, job_id: &str) -> Result<MutationAck, JobsApiError> {
        self.mutate_status(job_id, MutationVerb::Cancel).await
    }

    /// Pause a running job.
    pub async fn pause_job(&self, job_id: &str) -> Result<MutationAck, JobsApiError> {
        self.mutate_status(job_id, MutationVerb::Pause).await
    }

    /// Resume a paused job.
    pub async fn resume_job(&self, job_id: &str) -> Result<MutationAck, JobsApiError> {
        self.mutate_status(job_id, MutationVerb::Resume).await
    }

    // ---- private helpers ----

    /// Optimistically flip a job's status, then settle or roll back.
    async fn mutate_status(
        &self,
        job_id: &str,
        verb: MutationVerb,
    ) -> Result<MutationAck, JobsApiError> {
        let checkpoint = self.cache.checkpoint();
        self.cache.apply_patch(&StatusPatch {
            job_id: job_id.to_string(),
            status: Some(verb.optimistic_status()),
            progress: None,
            message: None,
            error: None,
        });

        let result = match verb {
            MutationVerb::Cancel => self.api.cancel_job(job_id).await,
            MutationVerb::Pause => self.api.pause_job(job_id).await,
            MutationVerb::Resume => self.api.resume_job(job_id).await,
        };

        match result {
            Ok(ack) => {
                if let Err(e) = self.refresh_job(job_id).await {
                    tracing::warn!(job_id, error = %e, "Refetch after mutation failed");
                }
                Ok(ack)
            }
            Err(e) => {
                self.cache.restore(checkpoint);
                tracing::warn!(job_id, error = %e, "Mutation failed, cache rolled back");
                Err(e)
            }
        }
    }
}
