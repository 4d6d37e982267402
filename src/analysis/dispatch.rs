use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use codesage_common::AnalysisReport;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// What the analyzer needs to start work on a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub analysis_id: Uuid,
    pub repository_url: String,
    pub branch: String,
    pub commit_sha: Option<String>,
}

/// Opaque job id assigned by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DispatchHandle(pub String);

impl DispatchHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending,
    Finished(AnalysisReport),
    /// The analyzer says the job is done but its report cannot be decoded.
    /// Polling again returns the same document.
    Malformed { raw: String, reason: String },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    /// Timeouts, refused connections, 5xx and 429. Worth another attempt.
    #[error("Analyzer unavailable: {0}")]
    Transient(String),

    #[error("Analyzer rejected request: {0}")]
    Rejected(String),

    #[error("Unexpected analyzer response: {0}")]
    InvalidResponse(String),
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Seam between the orchestrator and the external analysis engine.
/// Real implementation: `HttpDispatcher`. Test double: `MockDispatcher`.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn enqueue(&self, spec: &JobSpec) -> Result<DispatchHandle, DispatchError>;

    async fn poll_result(&self, handle: &DispatchHandle) -> Result<PollOutcome, DispatchError>;

    /// Best effort; callers log failures and move on.
    async fn cancel(&self, handle: &DispatchHandle) -> Result<(), DispatchError>;
}

#[derive(Debug, Serialize)]
struct EnqueueRequest<'a> {
    repository_url: &'a str,
    branch: &'a str,
    commit_sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EnqueueResponse {
    analysis_id: String,
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Talks to the analyzer service over its `/api/v1/analyze` endpoints.
pub struct HttpDispatcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDispatcher {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build analyzer HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn analyze_url(&self) -> String {
        format!("{}/api/v1/analyze", self.base_url)
    }

    fn job_url(&self, handle: &DispatchHandle) -> String {
        format!("{}/api/v1/analyze/{}", self.base_url, handle)
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn enqueue(&self, spec: &JobSpec) -> Result<DispatchHandle, DispatchError> {
        let body = EnqueueRequest {
            repository_url: &spec.repository_url,
            branch: &spec.branch,
            commit_sha: spec.commit_sha.as_deref(),
        };
        let resp = self
            .client
            .post(self.analyze_url())
            .json(&body)
            .send()
            .await
            .map_err(classify_send_error)?;
        let resp = check_status(resp).await?;
        let parsed: EnqueueResponse = resp
            .json()
            .await
            .map_err(|e| DispatchError::InvalidResponse(e.to_string()))?;
        if parsed.analysis_id.is_empty() {
            return Err(DispatchError::InvalidResponse(
                "empty analysis_id in enqueue response".into(),
            ));
        }
        tracing::debug!(
            analysis_id = %spec.analysis_id,
            handle = %parsed.analysis_id,
            status = %parsed.status,
            message = parsed.message.as_deref().unwrap_or(""),
            "Analyzer accepted job"
        );
        Ok(DispatchHandle(parsed.analysis_id))
    }

    async fn poll_result(&self, handle: &DispatchHandle) -> Result<PollOutcome, DispatchError> {
        let resp = self
            .client
            .get(self.job_url(handle))
            .send()
            .await
            .map_err(classify_send_error)?;
        let resp = check_status(resp).await?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DispatchError::InvalidResponse(e.to_string()))?;
        parse_poll_body(body)
    }

    async fn cancel(&self, handle: &DispatchHandle) -> Result<(), DispatchError> {
        let resp = self
            .client
            .delete(self.job_url(handle))
            .send()
            .await
            .map_err(classify_send_error)?;
        // Already gone on the analyzer side counts as cancelled.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(resp).await.map(|_| ())
    }
}

/// Map the analyzer's job document onto a poll outcome.
fn parse_poll_body(body: serde_json::Value) -> Result<PollOutcome, DispatchError> {
    let status = body
        .get("status")
        .and_then(|s| s.as_str())
        .ok_or_else(|| DispatchError::InvalidResponse("missing status field".into()))?;
    match status {
        "pending" | "queued" | "processing" => Ok(PollOutcome::Pending),
        "completed" | "failed" => match serde_json::from_value::<AnalysisReport>(body.clone()) {
            Ok(report) => Ok(PollOutcome::Finished(report)),
            Err(e) => Ok(PollOutcome::Malformed {
                raw: body.to_string(),
                reason: e.to_string(),
            }),
        },
        other => Err(DispatchError::InvalidResponse(format!(
            "unknown analysis status '{}'",
            other
        ))),
    }
}

fn classify_send_error(err: reqwest::Error) -> DispatchError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        DispatchError::Transient(err.to_string())
    } else {
        DispatchError::InvalidResponse(err.to_string())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, DispatchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message: String = format!("{} {}", status, body.trim())
        .chars()
        .take(512)
        .collect();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(DispatchError::Transient(message))
    } else {
        Err(DispatchError::Rejected(message))
    }
}
