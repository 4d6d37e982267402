//! Background loops: one poller per dispatched job, plus the stale-job sweeper.

use std::time::Duration;

use codesage_common::JobStatus;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatch::{DispatchError, DispatchHandle, PollOutcome};
use super::orchestrator::Orchestrator;
use crate::errors::AnalysisError;

/// Poll the analyzer until the job turns terminal or `deadline` passes.
///
/// The job's row is re-read every tick, so a cancel or sweep elsewhere ends
/// the loop on its next iteration.
pub(crate) async fn poll_until_terminal(
    orch: &Orchestrator,
    job_id: Uuid,
    handle: DispatchHandle,
    deadline: Instant,
) {
    let period = orch.settings().poll_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => {
                expire(orch, job_id).await;
                return;
            }
            _ = ticker.tick() => {}
        }

        match orch.current_status(job_id).await {
            Ok(JobStatus::Processing) => {}
            Ok(status) => {
                debug!(job_id = %job_id, %status, "Analysis no longer processing, poller exiting");
                return;
            }
            Err(AnalysisError::NotFound) => return,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to read analysis status");
                continue;
            }
        }

        match orch.dispatcher().poll_result(&handle).await {
            Ok(PollOutcome::Pending) => {
                debug!(job_id = %job_id, handle = %handle, "Analysis still running");
            }
            Ok(PollOutcome::Finished(report)) => {
                match orch.ingest(job_id, report).await {
                    Ok(outcome) => debug!(job_id = %job_id, ?outcome, "Poller delivered result"),
                    Err(e) => warn!(job_id = %job_id, error = %e, "Failed to ingest analysis result"),
                }
                return;
            }
            Ok(PollOutcome::Malformed { raw, reason }) => {
                match orch.reject_malformed(job_id, &raw, &reason).await {
                    Ok(true) => {}
                    Ok(false) => debug!(job_id = %job_id, "Analysis turned terminal before malformed result was recorded"),
                    Err(e) => warn!(job_id = %job_id, error = %e, "Failed to mark analysis failed"),
                }
                return;
            }
            Err(e @ DispatchError::Rejected(_)) => {
                let reason = format!("analyzer lost the job: {}", e);
                match orch.fail_processing(job_id, reason).await {
                    Ok(true) => warn!(job_id = %job_id, error = %e, "Analyzer rejected poll, analysis failed"),
                    Ok(false) => {}
                    Err(err) => warn!(job_id = %job_id, error = %err, "Failed to mark analysis failed"),
                }
                return;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Poll failed, will retry next tick");
            }
        }
    }
}

async fn expire(orch: &Orchestrator, job_id: Uuid) {
    let reason = orch.timeout_reason(JobStatus::Processing);
    match orch.fail_processing(job_id, reason).await {
        Ok(true) => {
            warn!(job_id = %job_id, "Analysis timed out waiting for analyzer");
            if let Some(handle) = current_handle(orch, job_id).await {
                orch.cancel_remote(job_id, &handle).await;
            }
        }
        Ok(false) => {}
        Err(e) => warn!(job_id = %job_id, error = %e, "Failed to time out analysis"),
    }
}

async fn current_handle(orch: &Orchestrator, job_id: Uuid) -> Option<DispatchHandle> {
    orch.db()
        .call(move |db| db.get_job(job_id))
        .await
        .ok()
        .flatten()
        .and_then(|job| job.external_handle)
        .map(DispatchHandle)
}

/// Sweep stale jobs every `interval` until the task is aborted.
pub async fn run_sweeper(orch: Orchestrator, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match orch.sweep_stale().await {
            Ok(0) => {}
            Ok(swept) => info!(swept, "Stale analyses failed"),
            Err(e) => warn!(error = %e, "Stale analysis sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;

    use crate::analysis::db::{AnalysisDb, DbHandle};
    use crate::analysis::models::NewJob;
    use crate::analysis::orchestrator::OrchestratorSettings;
    use crate::analysis::retry::RetryPolicy;
    use crate::analysis::testing::{MockDispatcher, wait_for_status};

    fn orchestrator(mock: Arc<MockDispatcher>, timeout_ms: u64) -> (Orchestrator, Uuid) {
        let db = AnalysisDb::new_in_memory().unwrap();
        let user = db.create_user("carol", Utc::now()).unwrap();
        let repo = db
            .create_repository(user.id, "api", "https://git.example.com/api.git", "main", Utc::now())
            .unwrap();
        let id = Uuid::new_v4();
        let job = NewJob {
            repository_id: repo.id,
            clone_url: repo.clone_url.clone(),
            branch: "main".into(),
            commit_sha: None,
        };
        db.create_job_if_idle(id, &job, Utc::now()).unwrap();
        db.mark_dispatched(id, "ext-9", Utc::now()).unwrap();
        let settings = OrchestratorSettings {
            poll_interval: Duration::from_millis(10),
            poll_timeout: Duration::from_millis(timeout_ms),
            retry: RetryPolicy::default(),
        };
        (Orchestrator::new(DbHandle::new(db), mock, settings), id)
    }

    #[tokio::test]
    async fn test_transient_poll_errors_keep_polling() {
        let mock = Arc::new(MockDispatcher::new());
        mock.script_poll_errors(vec![
            DispatchError::Transient("connection refused".into()),
            DispatchError::InvalidResponse("not json".into()),
        ]);
        mock.script_polls(vec![PollOutcome::Finished(
            codesage_common::AnalysisReport::completed(64.0),
        )]);
        let (orch, id) = orchestrator(mock.clone(), 5_000);

        let deadline = Instant::now() + Duration::from_secs(5);
        poll_until_terminal(&orch, id, DispatchHandle("ext-9".into()), deadline).await;

        wait_for_status(orch.db(), id, JobStatus::Completed).await;
        assert_eq!(mock.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_malformed_finished_report_fails_job_without_waiting_for_timeout() {
        let mock = Arc::new(MockDispatcher::new());
        mock.script_polls(vec![PollOutcome::Malformed {
            raw: r#"{"status":"completed","quality_score":"82"}"#.into(),
            reason: "invalid type: string \"82\", expected f64".into(),
        }]);
        let (orch, id) = orchestrator(mock.clone(), 60_000);

        let deadline = Instant::now() + Duration::from_secs(60);
        tokio::time::timeout(
            Duration::from_secs(5),
            poll_until_terminal(&orch, id, DispatchHandle("ext-9".into()), deadline),
        )
        .await
        .expect("poller should stop on a malformed result");

        let job = orch.db().call(move |db| db.get_job(id)).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.unwrap();
        assert!(error.starts_with("malformed analysis result:"), "{error}");
        assert!(error.contains("expected f64"), "{error}");
        assert_eq!(mock.poll_count(), 1);
        assert!(mock.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_expired_job_is_failed_and_cancelled_remotely() {
        let mock = Arc::new(MockDispatcher::new());
        let (orch, id) = orchestrator(mock.clone(), 30);

        let deadline = Instant::now() + Duration::from_millis(30);
        poll_until_terminal(&orch, id, DispatchHandle("ext-9".into()), deadline).await;

        let job = orch.db().call(move |db| db.get_job(id)).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("timed out"));
        assert_eq!(mock.cancelled(), vec![DispatchHandle("ext-9".into())]);
    }

    #[tokio::test]
    async fn test_poller_exits_when_job_was_cancelled() {
        let mock = Arc::new(MockDispatcher::new());
        let (orch, id) = orchestrator(mock.clone(), 5_000);
        orch.db()
            .call(move |db| db.cancel_job(id, "cancelled by user", Utc::now()))
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        poll_until_terminal(&orch, id, DispatchHandle("ext-9".into()), deadline).await;
        assert_eq!(mock.poll_count(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_runs_on_interval() {
        let mock = Arc::new(MockDispatcher::new());
        let (orch, id) = orchestrator(mock, 1);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let sweeper = tokio::spawn(run_sweeper(orch.clone(), Duration::from_millis(10)));
        wait_for_status(orch.db(), id, JobStatus::Failed).await;
        sweeper.abort();
    }
}
