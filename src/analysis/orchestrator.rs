use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use codesage_common::{AnalysisJob, AnalysisReport, JobStatus};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregator;
use super::db::DbHandle;
use super::dispatch::{DispatchHandle, Dispatcher, JobSpec};
use super::models::{CreateJob, IngestOutcome, IssueFilter, JobDetail, MetricFilter, NewJob, SubmitOutcome, SubmitRequest};
use super::poller;
use super::retry::{RetryPolicy, retry_transient};
use crate::config::ServiceConfig;
use crate::errors::AnalysisError;

const CANCELLED_BY_USER: &str = "cancelled by user";
const MALFORMED_RESULT: &str = "malformed analysis result";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    /// Measured from `dispatched_at` for processing jobs and from
    /// `created_at` for pending ones.
    pub poll_timeout: Duration,
    pub retry: RetryPolicy,
}

impl OrchestratorSettings {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
            retry: config.retry_policy(),
        }
    }
}

/// Drives analysis jobs through their lifecycle.
///
/// Cheap to clone; all clones share the job store, the dispatcher and the
/// registry of per-job poller tasks.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    db: DbHandle,
    dispatcher: Arc<dyn Dispatcher>,
    settings: OrchestratorSettings,
    /// One poller task per job this process is waiting on.
    pollers: tokio::sync::Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(db: DbHandle, dispatcher: Arc<dyn Dispatcher>, settings: OrchestratorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                dispatcher,
                settings,
                pollers: tokio::sync::Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn db(&self) -> &DbHandle {
        &self.inner.db
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    pub(crate) fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.inner.dispatcher
    }

    /// Create a job for the repository and hand it to the analyzer.
    pub async fn submit(
        &self,
        requester: i64,
        request: SubmitRequest,
    ) -> Result<SubmitOutcome, AnalysisError> {
        let repository_id = request.repository_id;
        let repo = self
            .inner
            .db
            .call(move |db| db.get_repository_for_owner(repository_id, requester))
            .await?
            .ok_or(AnalysisError::NotFound)?;

        let branch = request
            .branch
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| repo.default_branch.clone());
        let new_job = NewJob {
            repository_id,
            clone_url: repo.clone_url.clone(),
            branch,
            commit_sha: request.commit_sha.filter(|s| !s.trim().is_empty()),
        };

        let id = Uuid::new_v4();
        let created = self
            .inner
            .db
            .call(move |db| db.create_job_if_idle(id, &new_job, Utc::now()))
            .await?;
        let job = match created {
            CreateJob::Created(job) => job,
            CreateJob::Active(existing_job_id) => {
                info!(repository_id, %existing_job_id, "Analysis already in progress");
                return Err(AnalysisError::Conflict { existing_job_id });
            }
        };
        info!(job_id = %job.id, repository_id, branch = %job.branch, "Analysis created");

        let spec = JobSpec {
            analysis_id: job.id,
            repository_url: job.clone_url.clone(),
            branch: job.branch.clone(),
            commit_sha: job.commit_sha.clone(),
        };
        let enqueued = retry_transient(&self.inner.settings.retry, "enqueue", || {
            self.inner.dispatcher.enqueue(&spec)
        })
        .await;

        let handle = match enqueued {
            Ok(handle) => handle,
            Err(e) => {
                let reason = e.to_string();
                warn!(job_id = %id, error = %e, "Enqueue failed, marking analysis failed");
                let message = reason.clone();
                self.inner
                    .db
                    .call(move |db| db.fail_job(id, JobStatus::Pending, &message, Utc::now()))
                    .await?;
                return Err(AnalysisError::AdapterFailure(reason));
            }
        };

        let handle_str = handle.as_str().to_string();
        let dispatched = self
            .inner
            .db
            .call(move |db| db.mark_dispatched(id, &handle_str, Utc::now()))
            .await?;

        if dispatched {
            let dispatched_at = Utc::now();
            self.spawn_poller(id, handle.clone(), dispatched_at).await;
            info!(job_id = %id, handle = %handle, "Analysis dispatched");
            return Ok(SubmitOutcome {
                analysis_id: id,
                external_handle: Some(handle.0),
                status: JobStatus::Processing,
            });
        }

        // The job left `pending` while we were enqueuing (cancelled or swept).
        let handle_str = handle.as_str().to_string();
        self.inner
            .db
            .call(move |db| db.record_handle(id, &handle_str))
            .await?;
        self.cancel_remote(id, &handle).await;
        let status = self.current_status(id).await?;
        info!(job_id = %id, %status, "Analysis left pending during dispatch");
        Ok(SubmitOutcome {
            analysis_id: id,
            external_handle: Some(handle.0),
            status,
        })
    }

    /// Apply a finished report. Only a `processing` job accepts one; anything
    /// else is dropped and reported as `Ignored`.
    pub async fn ingest(
        &self,
        job_id: Uuid,
        report: AnalysisReport,
    ) -> Result<IngestOutcome, AnalysisError> {
        let status = self.current_status(job_id).await?;
        if status != JobStatus::Processing {
            debug!(job_id = %job_id, %status, "Dropping result for inactive analysis");
            return Ok(IngestOutcome::Ignored { status });
        }

        let validated = match report.validate() {
            Ok(v) => v,
            Err(problem) => {
                warn!(job_id = %job_id, %problem, payload = ?report, "Malformed analysis result");
                let reason = format!("{}: {}", MALFORMED_RESULT, problem);
                let failed = self
                    .inner
                    .db
                    .call(move |db| db.fail_job(job_id, JobStatus::Processing, &reason, Utc::now()))
                    .await?;
                if !failed {
                    let status = self.current_status(job_id).await?;
                    return Ok(IngestOutcome::Ignored { status });
                }
                return Err(AnalysisError::MalformedResult(problem.to_string()));
            }
        };

        let new_status = validated.status;
        let issue_count = validated.issues.len();
        let metric_count = validated.metrics.len();
        let applied = self
            .inner
            .db
            .call(move |db| db.apply_report(job_id, &validated, Utc::now()))
            .await?;
        if applied {
            info!(
                job_id = %job_id,
                status = %new_status,
                issues = issue_count,
                metrics = metric_count,
                "Analysis result ingested"
            );
            Ok(IngestOutcome::Applied { status: new_status })
        } else {
            let status = self.current_status(job_id).await?;
            debug!(job_id = %job_id, %status, "Analysis turned terminal before ingest");
            Ok(IngestOutcome::Ignored { status })
        }
    }

    /// Cancel an active job owned by `requester`.
    pub async fn cancel(&self, job_id: Uuid, requester: i64) -> Result<AnalysisJob, AnalysisError> {
        let job = self
            .inner
            .db
            .call(move |db| db.get_job_for_owner(job_id, requester))
            .await?
            .ok_or(AnalysisError::NotFound)?;
        if !job.status.is_active() {
            return Err(AnalysisError::InvalidState {
                status: job.status,
                operation: "cancel",
            });
        }

        let cancelled = self
            .inner
            .db
            .call(move |db| db.cancel_job(job_id, CANCELLED_BY_USER, Utc::now()))
            .await?;
        let current = self
            .inner
            .db
            .call(move |db| db.get_job(job_id))
            .await?
            .ok_or(AnalysisError::NotFound)?;
        if !cancelled {
            return Err(AnalysisError::InvalidState {
                status: current.status,
                operation: "cancel",
            });
        }

        self.stop_poller(job_id).await;
        // Read after the write so a handle recorded by a concurrent dispatch is seen.
        if let Some(handle) = current.external_handle.clone() {
            self.cancel_remote(job_id, &DispatchHandle(handle)).await;
        }
        info!(job_id = %job_id, previous = %job.status, "Analysis cancelled");
        Ok(current)
    }

    /// The job with all of its findings and their summary.
    pub async fn get_job(&self, job_id: Uuid, requester: i64) -> Result<JobDetail, AnalysisError> {
        let detail = self
            .inner
            .db
            .call(move |db| {
                let Some(job) = db.get_job_for_owner(job_id, requester)? else {
                    return Ok(None);
                };
                let (issues, _) = db.list_issues(job_id, &IssueFilter::default(), None)?;
                let metrics = db.list_metrics(job_id, &MetricFilter::default())?;
                Ok(Some((job, issues, metrics)))
            })
            .await?;
        let (job, issues, metrics) = detail.ok_or(AnalysisError::NotFound)?;
        let summary = aggregator::summarize(&issues, &metrics);
        Ok(JobDetail {
            job,
            issues,
            metrics,
            summary,
        })
    }

    /// Fail every active job whose window has closed. Returns how many this
    /// call moved to `failed`.
    pub async fn sweep_stale(&self) -> Result<usize, AnalysisError> {
        self.sweep_stale_at(Utc::now()).await
    }

    pub async fn sweep_stale_at(&self, now: DateTime<Utc>) -> Result<usize, AnalysisError> {
        let timeout = chrono::Duration::from_std(self.inner.settings.poll_timeout)
            .context("Poll timeout out of range")?;
        let cutoff = now - timeout;
        let stale = self
            .inner
            .db
            .call(move |db| db.list_stale_jobs(cutoff))
            .await?;

        let mut swept = 0;
        for job in stale {
            let reason = self.timeout_reason(job.status);
            let (id, from) = (job.id, job.status);
            let failed = self
                .inner
                .db
                .call(move |db| db.fail_job(id, from, &reason, now))
                .await?;
            if !failed {
                continue;
            }
            swept += 1;
            warn!(job_id = %id, previous = %from, "Stale analysis failed by sweep");
            self.stop_poller(id).await;
            if let Some(handle) = job.external_handle {
                self.cancel_remote(id, &DispatchHandle(handle)).await;
            }
        }
        Ok(swept)
    }

    /// Start pollers for `processing` jobs left by a previous process.
    pub async fn resume_pollers(&self) -> Result<usize, AnalysisError> {
        let jobs = self
            .inner
            .db
            .call(|db| db.list_processing_jobs())
            .await?;
        let mut resumed = 0;
        for job in jobs {
            let (Some(handle), Some(dispatched_at)) = (job.external_handle, job.dispatched_at) else {
                continue;
            };
            self.spawn_poller(job.id, DispatchHandle(handle), dispatched_at)
                .await;
            resumed += 1;
        }
        if resumed > 0 {
            info!(count = resumed, "Resumed analysis pollers");
        }
        Ok(resumed)
    }

    pub async fn active_pollers(&self) -> usize {
        self.inner.pollers.lock().await.len()
    }

    /// Abort every poller and wait for them to stop.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut pollers = self.inner.pollers.lock().await;
            pollers.drain().map(|(_, task)| task).collect()
        };
        for task in &tasks {
            task.abort();
        }
        let count = tasks.len();
        futures_util::future::join_all(tasks).await;
        if count > 0 {
            info!(count, "Stopped analysis pollers");
        }
    }

    // ── Internal helpers ──────────────────────────────────────────────

    pub(crate) async fn current_status(&self, job_id: Uuid) -> Result<JobStatus, AnalysisError> {
        self.inner
            .db
            .call(move |db| db.get_job(job_id))
            .await?
            .map(|job| job.status)
            .ok_or(AnalysisError::NotFound)
    }

    /// Conditionally fail a `processing` job. Used by its own poller, which
    /// must not go through `stop_poller`.
    pub(crate) async fn fail_processing(&self, job_id: Uuid, reason: String) -> Result<bool, AnalysisError> {
        let failed = self
            .inner
            .db
            .call(move |db| db.fail_job(job_id, JobStatus::Processing, &reason, Utc::now()))
            .await?;
        Ok(failed)
    }

    /// Fail a `processing` job whose finished report could not be decoded.
    pub(crate) async fn reject_malformed(&self, job_id: Uuid, raw: &str, reason: &str) -> Result<bool, AnalysisError> {
        warn!(job_id = %job_id, reason, payload = raw, "Malformed analysis result");
        self.fail_processing(job_id, format!("{}: {}", MALFORMED_RESULT, reason))
            .await
    }

    pub(crate) fn timeout_reason(&self, status: JobStatus) -> String {
        let timeout = self.inner.settings.poll_timeout;
        match status {
            JobStatus::Pending => format!("never dispatched within {:?}", timeout),
            _ => format!("timed out after {:?} waiting for analyzer", timeout),
        }
    }

    async fn spawn_poller(&self, job_id: Uuid, handle: DispatchHandle, dispatched_at: DateTime<Utc>) {
        let elapsed = (Utc::now() - dispatched_at).to_std().unwrap_or(Duration::ZERO);
        let remaining = self.inner.settings.poll_timeout.saturating_sub(elapsed);
        let deadline = tokio::time::Instant::now() + remaining;

        // Held across spawn and insert so the task's own removal runs after it
        // is registered.
        let mut pollers = self.inner.pollers.lock().await;
        let orchestrator = self.clone();
        let task = tokio::spawn(async move {
            poller::poll_until_terminal(&orchestrator, job_id, handle, deadline).await;
            orchestrator.inner.pollers.lock().await.remove(&job_id);
        });
        if let Some(previous) = pollers.insert(job_id, task) {
            previous.abort();
        }
    }

    async fn stop_poller(&self, job_id: Uuid) {
        if let Some(task) = self.inner.pollers.lock().await.remove(&job_id) {
            task.abort();
            debug!(job_id = %job_id, "Poller stopped");
        }
    }

    /// Best-effort analyzer cancel, retrying transient failures like enqueue.
    pub(crate) async fn cancel_remote(&self, job_id: Uuid, handle: &DispatchHandle) {
        let cancelled = retry_transient(&self.inner.settings.retry, "cancel", || {
            self.inner.dispatcher.cancel(handle)
        })
        .await;
        if let Err(e) = cancelled {
            warn!(job_id = %job_id, handle = %handle, error = %e, "Analyzer cancel failed");
        }
    }
}
