//! Shared domain types for CodeSage.
//!
//! - [`job`]: analysis job records and the lifecycle state machine
//! - [`finding`]: issues and metrics attached to a finished job
//! - [`report`]: the result payload an analyzer reports, plus validation

pub mod finding;
pub mod job;
pub mod report;

pub use finding::{Issue, Metric, NewIssue, NewMetric, Severity};
pub use job::{AnalysisJob, JobStatus, Repository, User};
pub use report::{
    AnalysisReport, ReportProblem, ReportStatus, ReportedIssue, ReportedMetric, ValidatedReport,
};
