//! HTTP client for the job pull and mutation endpoints.
//!
//! Wraps the server's request/response API (job listings, single-job
//! lookup, create/cancel/pause/resume) using [`reqwest`]. This is the
//! pull counterpart to the push channel in [`crate::client`]: listings
//! fully replace cache entries and settle optimistic mutations.

use serde::Deserialize;
use shelfsync_core::{JobKind, JobSnapshot, JobStatus};

/// HTTP client for one shelfsync server.
pub struct JobsApi {
    client: reqwest::Client,
    api_url: String,
}

/// Filter for the job listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub limit: Option<usize>,
}

impl JobFilter {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(kind) = self.kind {
            pairs.push(("kind", kind.as_str().to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

/// Response of `GET /api/jobs`.
#[derive(Debug, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSnapshot>,
    /// Total matching jobs on the server, which may exceed `jobs.len()`
    /// when a limit was applied.
    pub total: u64,
}

/// Acknowledgement for one created job.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAck {
    /// Server-assigned id for the new job.
    pub id: String,
    /// Initial lifecycle status (typically `pending`).
    pub status: JobStatus,
}

/// Response of `POST /api/jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJobsResponse {
    pub jobs: Vec<CreateAck>,
}

/// Acknowledgement for cancel/pause/resume.
#[derive(Debug, Deserialize)]
pub struct MutationAck {
    pub status: JobStatus,
    #[serde(default)]
    pub message: Option<String>,
}

/// Errors from the pull/mutation HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum JobsApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server knows no job with this id.
    #[error("Job {0} not found")]
    NotFound(String),

    /// The server returned a non-2xx status code.
    #[error("Server error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl JobsApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8484`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    /// List jobs matching the filter, plus the total match count.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<JobListResponse, JobsApiError> {
        let response = self
            .client
            .get(format!("{}/api/jobs", self.api_url))
            .query(&filter.query())
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch one job by id.
    pub async fn get_job(&self, job_id: &str) -> Result<JobSnapshot, JobsApiError> {
        let response = self
            .client
            .get(format!("{}/api/jobs/{}", self.api_url, job_id))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(JobsApiError::NotFound(job_id.to_string()));
        }
        Self::parse_response(response).await
    }

    /// Create jobs of `kind` for one or many library resources.
    pub async fn create_jobs(
        &self,
        kind: JobKind,
        resource_ids: &[String],
    ) -> Result<CreateJobsResponse, JobsApiError> {
        let body = serde_json::json!({
            "kind": kind,
            "resource_ids": resource_ids,
        });

        let response = self
            .client
            .post(format!("{}/api/jobs", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Ask the server to cancel a queued or running job.
    pub async fn cancel_job(&self, job_id: &str) -> Result<MutationAck, JobsApiError> {
        self.mutate(job_id, "cancel").await
    }

    /// Ask the server to pause a running job.
    pub async fn pause_job(&self, job_id: &str) -> Result<MutationAck, JobsApiError> {
        self.mutate(job_id, "pause").await
    }

    /// Ask the server to resume a paused job.
    pub async fn resume_job(&self, job_id: &str) -> Result<MutationAck, JobsApiError> {
        self.mutate(job_id, "resume").await
    }

    // ---- private helpers ----

    async fn mutate(&self, job_id: &str, verb: &str) -> Result<MutationAck, JobsApiError> {
        let response = self
            .client
            .post(format!("{}/api/jobs/{}/{}", self.api_url, job_id, verb))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(JobsApiError::NotFound(job_id.to_string()));
        }
        Self::parse_response(response).await
    }

    /// Parse a successful JSON response body into the expected type,
    /// or surface the status and body on a non-2xx response.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, JobsApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(JobsApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}
