use crate::models::{Job, SubmissionRequest};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Job submission rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Job submission endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Job submission response carried no request id")]
    MissingJobId,
}

/// Creates one job per call. Calls are not idempotent.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, request: &SubmissionRequest) -> Result<Job, SubmissionError>;
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(rename = "RequestId")]
    request_id: Option<String>,
}

/// Talks to `POST /submit` of the processing backend
pub struct HttpJobSubmitter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobSubmitter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl JobSubmitter for HttpJobSubmitter {
    async fn submit(&self, request: &SubmissionRequest) -> Result<Job, SubmissionError> {
        let url = format!("{}/submit", self.base_url.trim_end_matches('/'));
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: SubmitResponse = response.json().await?;
        match body.request_id {
            Some(id) if !id.is_empty() => Ok(Job { id }),
            _ => Err(SubmissionError::MissingJobId),
        }
    }
}

/// Hands a finished upload (or a resident object) to the backend
#[derive(Clone)]
pub struct SubmissionDispatcher {
    submitter: Arc<dyn JobSubmitter>,
}

impl SubmissionDispatcher {
    pub fn new(submitter: Arc<dyn JobSubmitter>) -> Self {
        Self { submitter }
    }

    /// Submits `location` exactly as given; callers validate it first
    pub async fn submit(
        &self,
        location: &str,
        caller_id: Option<&str>,
    ) -> Result<Job, SubmissionError> {
        let request = SubmissionRequest {
            location: location.to_string(),
            caller_id: caller_id.map(str::to_string),
        };

        tracing::info!("📨 Submitting job for {}", request.location);
        let job = self.submitter.submit(&request).await?;
        tracing::info!("✅ Job {} accepted", job.id);

        Ok(job)
    }
}
