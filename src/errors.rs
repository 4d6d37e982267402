//! Typed error hierarchy for CodeSage.
//!
//! - `AnalysisError`: what the orchestrator and query layer hand back to callers
//! - `ConfigError`: configuration that cannot be used to start the service
//!
//! Analyzer transport failures live next to the adapter as `DispatchError`.

use std::path::PathBuf;

use codesage_common::JobStatus;
use thiserror::Error;
use uuid::Uuid;

/// Errors from the analysis orchestration core.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Absent, or owned by someone else. Callers cannot tell the two apart.
    #[error("Not found")]
    NotFound,

    #[error("An analysis is already in progress for this repository ({existing_job_id})")]
    Conflict { existing_job_id: Uuid },

    #[error("Cannot {operation} an analysis that is {status}")]
    InvalidState {
        status: JobStatus,
        operation: &'static str,
    },

    #[error("Analyzer dispatch failed: {0}")]
    AdapterFailure(String),

    #[error("Malformed analysis result: {0}")]
    MalformedResult(String),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Errors from loading or validating `ServiceConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file {path} does not exist")]
    Missing { path: PathBuf },

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
