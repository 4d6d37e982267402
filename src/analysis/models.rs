use std::collections::BTreeMap;

use codesage_common::{AnalysisJob, Issue, JobStatus, Metric, Severity};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything needed to insert a `pending` job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub repository_id: i64,
    pub clone_url: String,
    pub branch: String,
    pub commit_sha: Option<String>,
}

/// Result of the conditional insert in the job store.
#[derive(Debug, Clone)]
pub enum CreateJob {
    Created(AnalysisJob),
    /// Another job is already pending or processing for the repository.
    Active(Uuid),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub repository_id: i64,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubmitOutcome {
    pub analysis_id: Uuid,
    pub external_handle: Option<String>,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Applied { status: JobStatus },
    /// The job was no longer processing; nothing was written.
    Ignored { status: JobStatus },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Latest jobs across a user's repositories.
#[derive(Debug, Clone, Serialize)]
pub struct RecentJobs {
    pub analyses: Vec<AnalysisJob>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueFilter {
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricFilter {
    #[serde(default)]
    pub metric_type: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FindingsSummary {
    /// Always carries all four severities, critical first.
    pub issues_by_severity: BTreeMap<Severity, u64>,
    pub issues_by_category: BTreeMap<String, u64>,
    pub total_issues: u64,
    pub total_metrics: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: AnalysisJob,
    pub issues: Vec<Issue>,
    pub metrics: Vec<Metric>,
    pub summary: FindingsSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsView {
    pub metrics: Vec<Metric>,
    pub grouped: BTreeMap<String, Vec<Metric>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn bump(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserStats {
    pub total_analyses: u64,
    pub by_status: StatusCounts,
    pub active: u64,
    pub average_quality_score: Option<f64>,
    pub total_issues_found: i64,
    pub issues_by_severity: BTreeMap<Severity, u64>,
    pub quality_trend: Option<f64>,
    pub repositories_analyzed: u64,
}
