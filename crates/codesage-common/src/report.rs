//! Result payload reported by the external analyzer.
//!
//! The analyzer is an untrusted peer, so [`AnalysisReport`] keeps severities
//! as raw strings and [`AnalysisReport::validate`] turns it into a
//! [`ValidatedReport`] the store can write without further checks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::finding::{NewIssue, NewMetric, Severity};
use crate::job::JobStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn as_job_status(&self) -> JobStatus {
        match self {
            Self::Completed => JobStatus::Completed,
            Self::Failed => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportedIssue {
    pub file_path: String,
    #[serde(default)]
    pub line_number: Option<i64>,
    pub severity: String,
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportedMetric {
    pub metric_type: String,
    pub value: f64,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub status: ReportStatus,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub maintainability_index: Option<f64>,
    #[serde(default)]
    pub complexity_score: Option<f64>,
    #[serde(default)]
    pub security_rating: Option<f64>,
    #[serde(default)]
    pub issues_found: Option<i64>,
    #[serde(default)]
    pub files_analyzed: Option<i64>,
    #[serde(default)]
    pub issues: Vec<ReportedIssue>,
    #[serde(default)]
    pub metrics: Vec<ReportedMetric>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReportProblem {
    #[error("completed report has no quality_score")]
    MissingQualityScore,

    #[error("{field} is not a finite number")]
    NonFiniteScore { field: &'static str },

    #[error("{field} is negative: {value}")]
    NegativeCounter { field: &'static str, value: i64 },

    #[error("issue #{index} has unknown severity '{severity}'")]
    UnknownSeverity { index: usize, severity: String },

    #[error("metric '{metric_type}' has non-finite value")]
    NonFiniteMetric { metric_type: String },
}

/// A report whose every field has been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedReport {
    pub status: JobStatus,
    pub quality_score: Option<f64>,
    pub maintainability_index: Option<f64>,
    pub complexity_score: Option<f64>,
    pub security_rating: Option<f64>,
    pub issues_found: i64,
    pub files_analyzed: Option<i64>,
    pub issues: Vec<NewIssue>,
    pub metrics: Vec<NewMetric>,
    pub error: Option<String>,
}

impl AnalysisReport {
    /// A completed report with no findings.
    pub fn completed(quality_score: f64) -> Self {
        Self {
            status: ReportStatus::Completed,
            quality_score: Some(quality_score),
            maintainability_index: None,
            complexity_score: None,
            security_rating: None,
            issues_found: None,
            files_analyzed: None,
            issues: Vec::new(),
            metrics: Vec::new(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Failed,
            quality_score: None,
            maintainability_index: None,
            complexity_score: None,
            security_rating: None,
            issues_found: None,
            files_analyzed: None,
            issues: Vec::new(),
            metrics: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn validate(&self) -> Result<ValidatedReport, ReportProblem> {
        if self.status == ReportStatus::Completed && self.quality_score.is_none() {
            return Err(ReportProblem::MissingQualityScore);
        }

        for (field, score) in [
            ("quality_score", self.quality_score),
            ("maintainability_index", self.maintainability_index),
            ("complexity_score", self.complexity_score),
            ("security_rating", self.security_rating),
        ] {
            if let Some(v) = score
                && !v.is_finite()
            {
                return Err(ReportProblem::NonFiniteScore { field });
            }
        }

        for (field, counter) in [
            ("issues_found", self.issues_found),
            ("files_analyzed", self.files_analyzed),
        ] {
            if let Some(value) = counter
                && value < 0
            {
                return Err(ReportProblem::NegativeCounter { field, value });
            }
        }

        let issues = self
            .issues
            .iter()
            .enumerate()
            .map(|(index, issue)| {
                let severity: Severity =
                    issue
                        .severity
                        .parse()
                        .map_err(|_| ReportProblem::UnknownSeverity {
                            index,
                            severity: issue.severity.clone(),
                        })?;
                Ok(NewIssue {
                    severity,
                    category: issue.category.clone(),
                    title: issue.title.clone(),
                    description: issue.description.clone(),
                    suggestion: issue.suggestion.clone(),
                    file_path: issue.file_path.clone(),
                    line_number: issue.line_number,
                })
            })
            .collect::<Result<Vec<_>, ReportProblem>>()?;

        let metrics = self
            .metrics
            .iter()
            .map(|m| {
                if !m.value.is_finite() {
                    return Err(ReportProblem::NonFiniteMetric {
                        metric_type: m.metric_type.clone(),
                    });
                }
                Ok(NewMetric {
                    metric_type: m.metric_type.clone(),
                    value: m.value,
                    file_path: m.file_path.clone(),
                })
            })
            .collect::<Result<Vec<_>, ReportProblem>>()?;

        Ok(ValidatedReport {
            status: self.status.as_job_status(),
            quality_score: self.quality_score,
            maintainability_index: self.maintainability_index,
            complexity_score: self.complexity_score,
            security_rating: self.security_rating,
            issues_found: self.issues_found.unwrap_or(issues.len() as i64),
            files_analyzed: self.files_analyzed,
            issues,
            metrics,
            error: self.error.clone(),
        })
    }
}
