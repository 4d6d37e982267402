//! Derived views over stored findings. Everything here is a pure function of
//! its inputs.

use std::collections::{BTreeMap, HashSet};

use codesage_common::{AnalysisJob, Issue, JobStatus, Metric, Severity};

use super::models::{FindingsSummary, StatusCounts, UserStats};

/// Histogram map with every severity present, zero-filled.
fn severity_table() -> BTreeMap<Severity, u64> {
    Severity::ALL.iter().map(|s| (*s, 0)).collect()
}

pub fn summarize(issues: &[Issue], metrics: &[Metric]) -> FindingsSummary {
    let mut issues_by_severity = severity_table();
    let mut issues_by_category: BTreeMap<String, u64> = BTreeMap::new();
    for issue in issues {
        *issues_by_severity.entry(issue.severity).or_default() += 1;
        *issues_by_category.entry(issue.category.clone()).or_default() += 1;
    }
    FindingsSummary {
        issues_by_severity,
        issues_by_category,
        total_issues: issues.len() as u64,
        total_metrics: metrics.len() as u64,
    }
}

/// Metrics keyed by type, each list ordered by value descending.
pub fn group_metrics(metrics: &[Metric]) -> BTreeMap<String, Vec<Metric>> {
    let mut grouped: BTreeMap<String, Vec<Metric>> = BTreeMap::new();
    for metric in metrics {
        grouped
            .entry(metric.metric_type.clone())
            .or_default()
            .push(metric.clone());
    }
    for list in grouped.values_mut() {
        list.sort_by(|a, b| b.value.total_cmp(&a.value).then(a.id.cmp(&b.id)));
    }
    grouped
}

/// Roll up a user's jobs. `jobs` must be oldest first; `severity_counts`
/// covers issues of completed jobs only.
pub fn user_stats(jobs: &[AnalysisJob], severity_counts: &[(Severity, u64)]) -> UserStats {
    let mut by_status = StatusCounts::default();
    for job in jobs {
        by_status.bump(job.status);
    }

    let mut completed: Vec<&AnalysisJob> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .collect();
    // Stable sort keeps creation order for equal completion times.
    completed.sort_by_key(|j| j.completed_at.unwrap_or(j.created_at));

    let scores: Vec<f64> = completed.iter().filter_map(|j| j.quality_score).collect();
    let average_quality_score = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    };
    let quality_trend = match scores.as_slice() {
        [.., previous, latest] => Some(latest - previous),
        _ => None,
    };

    let mut issues_by_severity = severity_table();
    for (severity, count) in severity_counts {
        *issues_by_severity.entry(*severity).or_default() += count;
    }

    let repositories: HashSet<i64> = completed.iter().map(|j| j.repository_id).collect();

    UserStats {
        total_analyses: jobs.len() as u64,
        active: by_status.pending + by_status.processing,
        by_status,
        average_quality_score,
        total_issues_found: completed.iter().filter_map(|j| j.issues_found).sum(),
        issues_by_severity,
        quality_trend,
        repositories_analyzed: repositories.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn issue(id: i64, severity: Severity, category: &str) -> Issue {
        Issue {
            id,
            analysis_id: Uuid::nil(),
            severity,
            category: category.into(),
            title: "t".into(),
            description: None,
            suggestion: None,
            file_path: "src/main.rs".into(),
            line_number: Some(id),
        }
    }

    fn metric(id: i64, metric_type: &str, value: f64) -> Metric {
        Metric {
            id,
            analysis_id: Uuid::nil(),
            metric_type: metric_type.into(),
            value,
            file_path: None,
        }
    }

    fn job(repository_id: i64, status: JobStatus, score: Option<f64>, minute: i64) -> AnalysisJob {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minute);
        let terminal = !status.is_active();
        AnalysisJob {
            id: Uuid::new_v4(),
            repository_id,
            clone_url: "https://git.example.com/r.git".into(),
            branch: "main".into(),
            commit_sha: None,
            status,
            quality_score: score,
            maintainability_index: None,
            complexity_score: None,
            security_rating: None,
            issues_found: score.map(|_| 4),
            files_analyzed: None,
            external_handle: None,
            error: None,
            created_at: created,
            dispatched_at: None,
            completed_at: terminal.then(|| created + Duration::minutes(5)),
        }
    }

    #[test]
    fn test_summarize_presents_all_severities_in_domain_order() {
        let issues = vec![
            issue(1, Severity::Low, "style"),
            issue(2, Severity::Critical, "security"),
            issue(3, Severity::Critical, "security"),
            issue(4, Severity::Medium, "complexity"),
        ];
        let summary = summarize(&issues, &[metric(1, "complexity", 3.0)]);

        let order: Vec<Severity> = summary.issues_by_severity.keys().copied().collect();
        assert_eq!(order, Severity::ALL.to_vec());
        assert_eq!(summary.issues_by_severity[&Severity::Critical], 2);
        assert_eq!(summary.issues_by_severity[&Severity::High], 0);
        assert_eq!(summary.issues_by_category["security"], 2);
        assert_eq!(summary.total_issues, 4);
        assert_eq!(summary.total_metrics, 1);

        let json = serde_json::to_value(&summary).unwrap();
        let keys: Vec<&String> = json["issues_by_severity"].as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 4);
        assert_eq!(json["issues_by_severity"]["critical"], 2);
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&[], &[]);
        assert_eq!(summary.total_issues, 0);
        assert!(summary.issues_by_category.is_empty());
        assert!(summary.issues_by_severity.values().all(|n| *n == 0));
    }

    #[test]
    fn test_group_metrics_orders_by_value_descending() {
        let metrics = vec![
            metric(1, "complexity", 2.0),
            metric(2, "lines_of_code", 900.0),
            metric(3, "complexity", 11.0),
            metric(4, "complexity", 7.0),
        ];
        let grouped = group_metrics(&metrics);
        let complexity: Vec<f64> = grouped["complexity"].iter().map(|m| m.value).collect();
        assert_eq!(complexity, vec![11.0, 7.0, 2.0]);
        assert_eq!(grouped["lines_of_code"].len(), 1);
    }

    #[test]
    fn test_user_stats_rollup() {
        let jobs = vec![
            job(1, JobStatus::Completed, Some(70.0), 0),
            job(2, JobStatus::Failed, None, 1),
            job(1, JobStatus::Completed, Some(82.0), 2),
            job(3, JobStatus::Processing, None, 3),
        ];
        let stats = user_stats(&jobs, &[(Severity::High, 3), (Severity::Low, 5)]);

        assert_eq!(stats.total_analyses, 4);
        assert_eq!(stats.by_status.completed, 2);
        assert_eq!(stats.by_status.failed, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.average_quality_score, Some(76.0));
        assert_eq!(stats.quality_trend, Some(12.0));
        assert_eq!(stats.total_issues_found, 8);
        assert_eq!(stats.issues_by_severity[&Severity::High], 3);
        assert_eq!(stats.issues_by_severity[&Severity::Critical], 0);
        assert_eq!(stats.repositories_analyzed, 1);
    }

    #[test]
    fn test_user_stats_without_history() {
        let stats = user_stats(&[], &[]);
        assert_eq!(stats.total_analyses, 0);
        assert_eq!(stats.average_quality_score, None);
        assert_eq!(stats.quality_trend, None);

        let one = vec![job(1, JobStatus::Completed, Some(50.0), 0)];
        assert_eq!(user_stats(&one, &[]).quality_trend, None);
    }
}
