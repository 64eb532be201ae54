//! REST client for the job control endpoints.
//!
//! Wraps work submission, cancellation and the active-job listing used by
//! reconciliation, using [`reqwest`]. The tracker only sees the
//! [`JobControl`] trait, so tests can substitute an in-memory backend.

use async_trait::async_trait;
use opsdash_core::job_status::JobStatus;
use opsdash_core::types::JobId;
use serde::Deserialize;

/// Cancellation and listing operations the tracker depends on.
#[async_trait]
pub trait JobControl: Send + Sync {
    /// Ask the backend to cancel a job. Success only means the request
    /// was accepted; the outcome arrives on the progress stream.
    async fn cancel_job(&self, job_id: &str) -> Result<(), JobApiError>;

    /// Jobs the backend currently considers active.
    async fn list_active_jobs(&self) -> Result<Vec<JobSummary>, JobApiError>;
}

/// HTTP client for the job endpoints.
pub struct JobsApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned after submitting work.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier of the new job.
    pub job_id: JobId,
}

/// One entry of the active-job listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub progress_current: Option<u64>,
    #[serde(default)]
    pub progress_total: Option<u64>,
    #[serde(default, rename = "mensagem_atual")]
    pub message: Option<String>,
}

/// Errors from the job REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum JobApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Job API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl JobsApi {
    /// Create a client for the API at `api_url`, e.g. `http://host:8000/api`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`]
    /// (shares its connection pool with the progress streams).
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Submit work to a job-producing endpoint.
    ///
    /// `path` is relative to the API base (e.g. `/inventory/import`).
    /// Returns the backend-assigned job id to hand to the tracker.
    pub async fn submit(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<SubmitResponse, JobApiError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_url, path))
            .json(body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`JobApiError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, JobApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(JobApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, JobApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), JobApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl JobControl for JobsApi {
    /// `POST {api}/jobs/{job_id}/cancel`.
    async fn cancel_job(&self, job_id: &str) -> Result<(), JobApiError> {
        let response = self
            .client
            .post(format!("{}/jobs/{}/cancel", self.api_url, job_id))
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// `GET {api}/jobs/active`.
    async fn list_active_jobs(&self) -> Result<Vec<JobSummary>, JobApiError> {
        let response = self
            .client
            .get(format!("{}/jobs/active", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }
}
