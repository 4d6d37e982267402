use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an analysis job.
///
/// `Pending` and `Processing` are active; the other three are terminal and
/// never change again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Processing) => true,
            (Pending, Failed) => true,
            (Pending, Cancelled) => true,
            (Processing, Completed) => true,
            (Processing, Failed) => true,
            (Processing, Cancelled) => true,
            (Pending, Pending | Completed) => false,
            (Processing, Pending | Processing) => false,
            (Completed | Failed | Cancelled, _) => false,
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub repository_id: i64,
    pub clone_url: String,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub status: JobStatus,
    pub quality_score: Option<f64>,
    pub maintainability_index: Option<f64>,
    pub complexity_score: Option<f64>,
    pub security_rating: Option<f64>,
    pub issues_found: Option<i64>,
    pub files_analyzed: Option<i64>,
    pub external_handle: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Repository {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub clone_url: String,
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
}
