//! Owner-checked, paginated read views.
//!
//! Each view confirms ownership and reads in the same `DbHandle::call`, so a
//! caller never sees partial data for a job or repository they do not own.

use codesage_common::{AnalysisJob, Issue};
use uuid::Uuid;

use super::aggregator;
use super::db::DbHandle;
use super::models::{
    IssueFilter, MetricFilter, MetricsView, Page, PageRequest, Pagination, RecentJobs, UserStats,
};
use crate::errors::AnalysisError;

pub const DEFAULT_JOB_LIMIT: u32 = 10;
pub const DEFAULT_ISSUE_LIMIT: u32 = 50;
pub const DEFAULT_RECENT_LIMIT: u32 = 5;
pub const MAX_LIMIT: u32 = 100;

/// Normalize a page request: page 0 becomes 1, limit is clamped to `1..=MAX_LIMIT`.
pub fn resolve_page(request: &PageRequest, default_limit: u32) -> (u32, u32) {
    let page = request.page.unwrap_or(1).max(1);
    let limit = request.limit.unwrap_or(default_limit).clamp(1, MAX_LIMIT);
    (page, limit)
}

fn offset(page: u32, limit: u32) -> u64 {
    u64::from(page - 1) * u64::from(limit)
}

pub fn pagination(page: u32, limit: u32, total: u64) -> Pagination {
    Pagination {
        page,
        limit,
        total,
        total_pages: total.div_ceil(u64::from(limit)),
    }
}

pub async fn list_jobs_for_repository(
    db: &DbHandle,
    repository_id: i64,
    request: PageRequest,
    requester: i64,
) -> Result<Page<AnalysisJob>, AnalysisError> {
    let (page, limit) = resolve_page(&request, DEFAULT_JOB_LIMIT);
    let found = db
        .call(move |db| {
            if db.get_repository_for_owner(repository_id, requester)?.is_none() {
                return Ok(None);
            }
            db.list_jobs_for_repository(repository_id, limit, offset(page, limit))
                .map(Some)
        })
        .await?;
    let (items, total) = found.ok_or(AnalysisError::NotFound)?;
    Ok(Page {
        items,
        pagination: pagination(page, limit, total),
    })
}

/// Every job across the requester's repositories, newest first.
pub async fn list_jobs_for_user(
    db: &DbHandle,
    request: PageRequest,
    requester: i64,
) -> Result<Page<AnalysisJob>, AnalysisError> {
    let (page, limit) = resolve_page(&request, DEFAULT_JOB_LIMIT);
    let found = db
        .call(move |db| {
            if db.get_user(requester)?.is_none() {
                return Ok(None);
            }
            db.list_recent_jobs_for_user(requester, limit, offset(page, limit))
                .map(Some)
        })
        .await?;
    let (items, total) = found.ok_or(AnalysisError::NotFound)?;
    Ok(Page {
        items,
        pagination: pagination(page, limit, total),
    })
}

/// The requester's latest jobs for a dashboard; `limit` defaults to 5.
pub async fn recent_jobs_for_user(
    db: &DbHandle,
    limit: Option<u32>,
    requester: i64,
) -> Result<RecentJobs, AnalysisError> {
    let request = PageRequest {
        page: Some(1),
        limit: Some(limit.unwrap_or(DEFAULT_RECENT_LIMIT)),
    };
    let page = list_jobs_for_user(db, request, requester).await?;
    Ok(RecentJobs {
        analyses: page.items,
    })
}

pub async fn list_issues(
    db: &DbHandle,
    job_id: Uuid,
    filter: IssueFilter,
    request: PageRequest,
    requester: i64,
) -> Result<Page<Issue>, AnalysisError> {
    let (page, limit) = resolve_page(&request, DEFAULT_ISSUE_LIMIT);
    let found = db
        .call(move |db| {
            if db.get_job_for_owner(job_id, requester)?.is_none() {
                return Ok(None);
            }
            db.list_issues(job_id, &filter, Some((limit, offset(page, limit))))
                .map(Some)
        })
        .await?;
    let (items, total) = found.ok_or(AnalysisError::NotFound)?;
    Ok(Page {
        items,
        pagination: pagination(page, limit, total),
    })
}

pub async fn list_metrics(
    db: &DbHandle,
    job_id: Uuid,
    filter: MetricFilter,
    requester: i64,
) -> Result<MetricsView, AnalysisError> {
    let metrics = db
        .call(move |db| {
            if db.get_job_for_owner(job_id, requester)?.is_none() {
                return Ok(None);
            }
            db.list_metrics(job_id, &filter).map(Some)
        })
        .await?
        .ok_or(AnalysisError::NotFound)?;
    let grouped = aggregator::group_metrics(&metrics);
    Ok(MetricsView { metrics, grouped })
}

pub async fn user_stats(db: &DbHandle, user_id: i64) -> Result<UserStats, AnalysisError> {
    let (jobs, counts) = db
        .call(move |db| {
            if db.get_user(user_id)?.is_none() {
                return Ok(None);
            }
            let jobs = db.list_jobs_for_user(user_id)?;
            let counts = db.issue_severity_counts_for_user(user_id)?;
            Ok(Some((jobs, counts)))
        })
        .await?
        .ok_or(AnalysisError::NotFound)?;
    Ok(aggregator::user_stats(&jobs, &counts))
}
