//! Test doubles shared by the analysis unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use codesage_common::JobStatus;
use uuid::Uuid;

use super::db::DbHandle;
use super::dispatch::{DispatchError, DispatchHandle, Dispatcher, JobSpec, PollOutcome};

#[derive(Default)]
struct MockState {
    enqueue_failures: VecDeque<DispatchError>,
    enqueue_delay: Duration,
    enqueue_attempts: usize,
    enqueued: Vec<JobSpec>,
    polls: VecDeque<Result<PollOutcome, DispatchError>>,
    poll_count: usize,
    cancel_failures: VecDeque<DispatchError>,
    cancel_attempts: usize,
    cancelled: Vec<DispatchHandle>,
}

/// Scripted analyzer. Handles are `ext-1`, `ext-2`, ... in enqueue order;
/// polls return `Pending` once the script runs dry.
#[derive(Default)]
pub struct MockDispatcher {
    state: Mutex<MockState>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_enqueues(&self, errors: Vec<DispatchError>) {
        self.state.lock().unwrap().enqueue_failures.extend(errors);
    }

    pub fn set_enqueue_delay(&self, delay: Duration) {
        self.state.lock().unwrap().enqueue_delay = delay;
    }

    pub fn script_polls(&self, outcomes: Vec<PollOutcome>) {
        self.state
            .lock()
            .unwrap()
            .polls
            .extend(outcomes.into_iter().map(Ok));
    }

    pub fn script_poll_errors(&self, errors: Vec<DispatchError>) {
        self.state
            .lock()
            .unwrap()
            .polls
            .extend(errors.into_iter().map(Err));
    }

    pub fn fail_next_cancels(&self, errors: Vec<DispatchError>) {
        self.state.lock().unwrap().cancel_failures.extend(errors);
    }

    pub fn enqueued(&self) -> Vec<JobSpec> {
        self.state.lock().unwrap().enqueued.clone()
    }

    pub fn enqueue_attempts(&self) -> usize {
        self.state.lock().unwrap().enqueue_attempts
    }

    pub fn poll_count(&self) -> usize {
        self.state.lock().unwrap().poll_count
    }

    pub fn cancel_attempts(&self) -> usize {
        self.state.lock().unwrap().cancel_attempts
    }

    /// Handles whose cancel succeeded.
    pub fn cancelled(&self) -> Vec<DispatchHandle> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn enqueue(&self, spec: &JobSpec) -> Result<DispatchHandle, DispatchError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.enqueue_attempts += 1;
            if let Some(err) = state.enqueue_failures.pop_front() {
                return Err(err);
            }
            state.enqueue_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.enqueued.push(spec.clone());
        Ok(DispatchHandle(format!("ext-{}", state.enqueued.len())))
    }

    async fn poll_result(&self, _handle: &DispatchHandle) -> Result<PollOutcome, DispatchError> {
        let mut state = self.state.lock().unwrap();
        state.poll_count += 1;
        state.polls.pop_front().unwrap_or(Ok(PollOutcome::Pending))
    }

    async fn cancel(&self, handle: &DispatchHandle) -> Result<(), DispatchError> {
        let mut state = self.state.lock().unwrap();
        state.cancel_attempts += 1;
        if let Some(err) = state.cancel_failures.pop_front() {
            return Err(err);
        }
        state.cancelled.push(handle.clone());
        Ok(())
    }
}

/// Wait up to five seconds for a job to reach `status`.
pub async fn wait_for_status(db: &DbHandle, id: Uuid, status: JobStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = db.call(move |db| db.get_job(id)).await.unwrap();
        if job.as_ref().map(|j| j.status) == Some(status) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "analysis {id} never reached {status}; last seen {job:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
