use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State, rejection::{JsonRejection, QueryRejection}},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use codesage_common::Severity;
use serde::Deserialize;
use uuid::Uuid;

use super::db::DbHandle;
use super::models::{IssueFilter, MetricFilter, PageRequest, SubmitRequest};
use super::orchestrator::Orchestrator;
use super::query;
use crate::errors::AnalysisError;

/// Header carrying the authenticated user id, set by the upstream gateway.
pub const USER_HEADER: &str = "x-user-id";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub orchestrator: Orchestrator,
}

pub type SharedState = Arc<AppState>;

// ── Request types ─────────────────────────────────────────────────────

/// Flat on purpose: `serde(flatten)` does not mix with numeric query params.
#[derive(Debug, Deserialize)]
pub struct IssueQuery {
    pub severity: Option<Severity>,
    pub category: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u32>,
}

/// The requesting user, from [`USER_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for Requester {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(Requester)
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing or invalid {} header", USER_HEADER)))
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    Analysis(AnalysisError),
}

impl From<AnalysisError> for ApiError {
    fn from(e: AnalysisError) -> Self {
        ApiError::Analysis(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Analysis(AnalysisError::Conflict { existing_job_id }) => {
                let body = serde_json::json!({
                    "error": AnalysisError::Conflict { existing_job_id }.to_string(),
                    "analysis_id": existing_job_id,
                });
                return (StatusCode::CONFLICT, Json(body)).into_response();
            }
            ApiError::Analysis(e) => {
                let status = match &e {
                    AnalysisError::NotFound => StatusCode::NOT_FOUND,
                    AnalysisError::Conflict { .. } | AnalysisError::InvalidState { .. } => StatusCode::CONFLICT,
                    AnalysisError::AdapterFailure(_) => StatusCode::BAD_GATEWAY,
                    AnalysisError::MalformedResult(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    AnalysisError::Storage(_) => {
                        tracing::error!(error = %e, "Storage failure while serving request");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.to_string())
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

/// Unparseable ids name nothing, so they are reported like absent ones.
fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Analysis(AnalysisError::NotFound))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/analysis", get(list_analyses).post(submit_analysis))
        .route("/api/analysis/recent", get(recent_analyses))
        .route("/api/analysis/stats", get(user_stats))
        .route("/api/analysis/{id}", get(get_analysis))
        .route("/api/analysis/{id}/issues", get(list_issues))
        .route("/api/analysis/{id}/metrics", get(list_metrics))
        .route("/api/analysis/{id}/cancel", post(cancel_analysis))
        .route("/api/repositories/{id}/analyses", get(list_repository_analyses))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn submit_analysis(
    State(state): State<SharedState>,
    Requester(user): Requester,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let outcome = state.orchestrator.submit(user, req).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn list_analyses(
    State(state): State<SharedState>,
    Requester(user): Requester,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(page) = page.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let jobs = query::list_jobs_for_user(&state.db, page, user).await?;
    Ok(Json(jobs))
}

async fn recent_analyses(
    State(state): State<SharedState>,
    Requester(user): Requester,
    params: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let recent = query::recent_jobs_for_user(&state.db, params.limit, user).await?;
    Ok(Json(recent))
}

async fn get_analysis(
    State(state): State<SharedState>,
    Requester(user): Requester,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&id)?;
    let detail = state.orchestrator.get_job(id, user).await?;
    Ok(Json(detail))
}

async fn list_issues(
    State(state): State<SharedState>,
    Requester(user): Requester,
    Path(id): Path<String>,
    params: Result<Query<IssueQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&id)?;
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let filter = IssueFilter {
        severity: params.severity,
        category: params.category,
    };
    let page = PageRequest {
        page: params.page,
        limit: params.limit,
    };
    let issues = query::list_issues(&state.db, id, filter, page, user).await?;
    Ok(Json(issues))
}

async fn list_metrics(
    State(state): State<SharedState>,
    Requester(user): Requester,
    Path(id): Path<String>,
    filter: Result<Query<MetricFilter>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&id)?;
    let Query(filter) = filter.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let view = query::list_metrics(&state.db, id, filter, user).await?;
    Ok(Json(view))
}

async fn cancel_analysis(
    State(state): State<SharedState>,
    Requester(user): Requester,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&id)?;
    let job = state.orchestrator.cancel(id, user).await?;
    Ok(Json(job))
}

async fn list_repository_analyses(
    State(state): State<SharedState>,
    Requester(user): Requester,
    Path(repository_id): Path<i64>,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(page) = page.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let jobs = query::list_jobs_for_repository(&state.db, repository_id, page, user).await?;
    Ok(Json(jobs))
}

async fn user_stats(
    State(state): State<SharedState>,
    Requester(user): Requester,
) -> Result<impl IntoResponse, ApiError> {
    let stats = query::user_stats(&state.db, user).await?;
    Ok(Json(stats))
}

// ── Tests ─────────────────────────────────────────────────────────────
