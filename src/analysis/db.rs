use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use codesage_common::{
    AnalysisJob, Issue, JobStatus, Metric, Repository, Severity, User, ValidatedReport,
};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params, params_from_iter};
use uuid::Uuid;

use super::models::{CreateJob, IssueFilter, MetricFilter, NewJob};

/// Async-safe handle to the analysis database.
///
/// SQLite work runs on tokio's blocking pool behind a single mutex-guarded
/// connection, so callers on the async side never block a worker thread.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<AnalysisDb>>,
}

impl DbHandle {
    pub fn new(db: AnalysisDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&AnalysisDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Synchronous access for CLI commands and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, AnalysisDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

const JOB_COLUMNS: &str = "a.id, a.repository_id, a.clone_url, a.branch, a.commit_sha, a.status,
    a.quality_score, a.maintainability_index, a.complexity_score, a.security_rating,
    a.issues_found, a.files_analyzed, a.external_handle, a.error,
    a.created_at, a.dispatched_at, a.completed_at";

const ISSUE_COLUMNS: &str =
    "id, analysis_id, severity, category, title, description, suggestion, file_path, line_number";

pub struct AnalysisDb {
    conn: Connection,
}

impl AnalysisDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS repositories (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    clone_url TEXT NOT NULL,
                    default_branch TEXT NOT NULL DEFAULT 'main',
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS analyses (
                    id TEXT PRIMARY KEY,
                    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
                    clone_url TEXT NOT NULL,
                    branch TEXT NOT NULL,
                    commit_sha TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    quality_score REAL,
                    maintainability_index REAL,
                    complexity_score REAL,
                    security_rating REAL,
                    issues_found INTEGER,
                    files_analyzed INTEGER,
                    external_handle TEXT,
                    error TEXT,
                    created_at TEXT NOT NULL,
                    dispatched_at TEXT,
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS issues (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    analysis_id TEXT NOT NULL REFERENCES analyses(id) ON DELETE CASCADE,
                    severity TEXT NOT NULL,
                    severity_rank INTEGER NOT NULL,
                    category TEXT NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT,
                    suggestion TEXT,
                    file_path TEXT NOT NULL,
                    line_number INTEGER
                );

                CREATE TABLE IF NOT EXISTS metrics (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    analysis_id TEXT NOT NULL REFERENCES analyses(id) ON DELETE CASCADE,
                    metric_type TEXT NOT NULL,
                    value REAL NOT NULL,
                    file_path TEXT
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_analyses_one_active
                    ON analyses(repository_id) WHERE status IN ('pending', 'processing');
                CREATE INDEX IF NOT EXISTS idx_analyses_repository ON analyses(repository_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_analyses_status ON analyses(status);
                CREATE INDEX IF NOT EXISTS idx_repositories_user ON repositories(user_id);
                CREATE INDEX IF NOT EXISTS idx_issues_analysis ON issues(analysis_id, severity_rank, line_number);
                CREATE INDEX IF NOT EXISTS idx_metrics_analysis ON metrics(analysis_id, metric_type);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users and repositories ────────────────────────────────────────

    pub fn create_user(&self, username: &str, now: DateTime<Utc>) -> Result<User> {
        self.conn
            .execute(
                "INSERT INTO users (username, created_at) VALUES (?1, ?2)",
                params![username, ts(now)],
            )
            .with_context(|| format!("Failed to insert user '{}'", username))?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, username, created_at FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query user")?;
        match row {
            Some((id, username, created_at)) => Ok(Some(User {
                id,
                username,
                created_at: parse_ts(&created_at)?,
            })),
            None => Ok(None),
        }
    }

    pub fn create_repository(
        &self,
        user_id: i64,
        name: &str,
        clone_url: &str,
        default_branch: &str,
        now: DateTime<Utc>,
    ) -> Result<Repository> {
        self.conn
            .execute(
                "INSERT INTO repositories (user_id, name, clone_url, default_branch, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user_id, name, clone_url, default_branch, ts(now)],
            )
            .context("Failed to insert repository")?;
        let id = self.conn.last_insert_rowid();
        self.get_repository(id)?
            .context("Repository not found after insert")
    }

    pub fn get_repository(&self, id: i64) -> Result<Option<Repository>> {
        self.query_repositories("WHERE id = ?1", params![id])
            .map(|mut repos| repos.pop())
    }

    /// `None` both when the repository is absent and when another user owns it.
    pub fn get_repository_for_owner(&self, id: i64, user_id: i64) -> Result<Option<Repository>> {
        self.query_repositories("WHERE id = ?1 AND user_id = ?2", params![id, user_id])
            .map(|mut repos| repos.pop())
    }

    pub fn list_repositories(&self, user_id: i64) -> Result<Vec<Repository>> {
        self.query_repositories("WHERE user_id = ?1 ORDER BY id", params![user_id])
    }

    fn query_repositories(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Repository>> {
        let sql = format!(
            "SELECT id, user_id, name, clone_url, default_branch, created_at FROM repositories {}",
            clause
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare repository query")?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .context("Failed to query repositories")?;
        let mut repos = Vec::new();
        for row in rows {
            let (id, user_id, name, clone_url, default_branch, created_at) =
                row.context("Failed to read repository row")?;
            repos.push(Repository {
                id,
                user_id,
                name,
                clone_url,
                default_branch,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(repos)
    }

    // ── Job creation and lookup ───────────────────────────────────────

    /// Insert a `pending` job unless the repository already has an active one.
    ///
    /// The check and the insert share a transaction; the partial unique index
    /// on active jobs backs it up against writers on other connections.
    pub fn create_job_if_idle(&self, id: Uuid, job: &NewJob, now: DateTime<Utc>) -> Result<CreateJob> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        if let Some(existing) = active_job_id(&tx, job.repository_id)? {
            return Ok(CreateJob::Active(existing));
        }

        let inserted = tx.execute(
            "INSERT INTO analyses (id, repository_id, clone_url, branch, commit_sha, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
            params![
                id.to_string(),
                job.repository_id,
                job.clone_url,
                job.branch,
                job.commit_sha,
                ts(now)
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                if let Some(existing) = active_job_id(&tx, job.repository_id)? {
                    return Ok(CreateJob::Active(existing));
                }
                anyhow::bail!(
                    "Constraint violation inserting analysis for repository {}",
                    job.repository_id
                );
            }
            Err(e) => return Err(e).context("Failed to insert analysis"),
        }
        tx.commit().context("Failed to commit analysis insert")?;

        let created = self
            .get_job(id)?
            .context("Analysis not found after insert")?;
        Ok(CreateJob::Created(created))
    }

    pub fn get_job(&self, id: Uuid) -> Result<Option<AnalysisJob>> {
        self.query_jobs("WHERE a.id = ?1", params![id.to_string()])
            .map(|mut jobs| jobs.pop())
    }

    /// `None` both when the job is absent and when another user owns it.
    pub fn get_job_for_owner(&self, id: Uuid, user_id: i64) -> Result<Option<AnalysisJob>> {
        self.query_jobs(
            "JOIN repositories r ON r.id = a.repository_id WHERE a.id = ?1 AND r.user_id = ?2",
            params![id.to_string(), user_id],
        )
        .map(|mut jobs| jobs.pop())
    }

    #[cfg(test)]
    pub fn find_active_job(&self, repository_id: i64) -> Result<Option<AnalysisJob>> {
        match active_job_id(&self.conn, repository_id)? {
            Some(id) => self.get_job(id),
            None => Ok(None),
        }
    }

    // ── Conditional transitions ───────────────────────────────────────
    //
    // Every write below is a compare-and-set on `status`; the returned bool
    // says whether this caller won. The `from` side of each write is checked
    // against `JobStatus::can_transition_to` before it reaches SQL.

    pub fn mark_dispatched(&self, id: Uuid, handle: &str, now: DateTime<Utc>) -> Result<bool> {
        let from = guarded_from(&[JobStatus::Pending], JobStatus::Processing)?;
        let changed = self
            .conn
            .execute(
                &format!(
                    "UPDATE analyses SET status = 'processing', external_handle = ?2, dispatched_at = ?3
                     WHERE id = ?1 AND status IN ({})",
                    from
                ),
                params![id.to_string(), handle, ts(now)],
            )
            .context("Failed to mark analysis dispatched")?;
        Ok(changed == 1)
    }

    /// Keep the adapter handle for audit on a job that left `pending` without us.
    pub fn record_handle(&self, id: Uuid, handle: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE analyses SET external_handle = ?2 WHERE id = ?1 AND external_handle IS NULL",
                params![id.to_string(), handle],
            )
            .context("Failed to record external handle")?;
        Ok(())
    }

    pub fn fail_job(
        &self,
        id: Uuid,
        from: JobStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let from = guarded_from(&[from], JobStatus::Failed)?;
        let changed = self
            .conn
            .execute(
                &format!(
                    "UPDATE analyses SET status = 'failed', error = ?2, completed_at = ?3
                     WHERE id = ?1 AND status IN ({})",
                    from
                ),
                params![id.to_string(), reason, ts(now)],
            )
            .context("Failed to mark analysis failed")?;
        Ok(changed == 1)
    }

    pub fn cancel_job(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        let from = guarded_from(&[JobStatus::Pending, JobStatus::Processing], JobStatus::Cancelled)?;
        let changed = self
            .conn
            .execute(
                &format!(
                    "UPDATE analyses SET status = 'cancelled', error = ?2, completed_at = ?3
                     WHERE id = ?1 AND status IN ({})",
                    from
                ),
                params![id.to_string(), reason, ts(now)],
            )
            .context("Failed to cancel analysis")?;
        Ok(changed == 1)
    }

    /// Write a finished report and its findings in one transaction.
    ///
    /// Returns `false` without writing anything when the job is no longer
    /// `processing`.
    pub fn apply_report(&self, id: Uuid, report: &ValidatedReport, now: DateTime<Utc>) -> Result<bool> {
        let from = guarded_from(&[JobStatus::Processing], report.status)?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let id_str = id.to_string();

        let changed = tx
            .execute(
                &format!(
                    "UPDATE analyses SET status = ?2, quality_score = ?3, maintainability_index = ?4,
                         complexity_score = ?5, security_rating = ?6, issues_found = ?7,
                         files_analyzed = ?8, error = ?9, completed_at = ?10
                     WHERE id = ?1 AND status IN ({})",
                    from
                ),
                params![
                    id_str,
                    report.status.as_str(),
                    report.quality_score,
                    report.maintainability_index,
                    report.complexity_score,
                    report.security_rating,
                    report.issues_found,
                    report.files_analyzed,
                    report.error,
                    ts(now)
                ],
            )
            .context("Failed to update analysis with report")?;
        if changed == 0 {
            return Ok(false);
        }

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO issues (analysis_id, severity, severity_rank, category, title,
                         description, suggestion, file_path, line_number)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .context("Failed to prepare issue insert")?;
            for issue in &report.issues {
                stmt.execute(params![
                    id_str,
                    issue.severity.as_str(),
                    issue.severity.rank(),
                    issue.category,
                    issue.title,
                    issue.description,
                    issue.suggestion,
                    issue.file_path,
                    issue.line_number
                ])
                .context("Failed to insert issue")?;
            }

            let mut stmt = tx
                .prepare(
                    "INSERT INTO metrics (analysis_id, metric_type, value, file_path)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .context("Failed to prepare metric insert")?;
            for metric in &report.metrics {
                stmt.execute(params![id_str, metric.metric_type, metric.value, metric.file_path])
                    .context("Failed to insert metric")?;
            }
        }

        tx.commit().context("Failed to commit report")?;
        Ok(true)
    }

    // ── Listing ───────────────────────────────────────────────────────

    /// Newest first; jobs created in the same millisecond fall back to
    /// insertion order.
    pub fn list_jobs_for_repository(
        &self,
        repository_id: i64,
        limit: u32,
        offset: u64,
    ) -> Result<(Vec<AnalysisJob>, u64)> {
        let total: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM analyses WHERE repository_id = ?1",
                params![repository_id],
                |row| row.get(0),
            )
            .context("Failed to count analyses")?;
        let jobs = self.query_jobs(
            "WHERE a.repository_id = ?1 ORDER BY a.created_at DESC, a.rowid DESC LIMIT ?2 OFFSET ?3",
            params![repository_id, limit, offset as i64],
        )?;
        Ok((jobs, total as u64))
    }

    pub fn list_processing_jobs(&self) -> Result<Vec<AnalysisJob>> {
        self.query_jobs("WHERE a.status = 'processing' ORDER BY a.rowid", params![])
    }

    /// Active jobs whose window closed before `cutoff`: `processing` jobs by
    /// dispatch time, `pending` jobs by creation time.
    pub fn list_stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<AnalysisJob>> {
        self.query_jobs(
            "WHERE (a.status = 'processing' AND COALESCE(a.dispatched_at, a.created_at) < ?1)
                OR (a.status = 'pending' AND a.created_at < ?1)
             ORDER BY a.rowid",
            params![ts(cutoff)],
        )
    }

    /// One page of the user's jobs across all repositories, newest first.
    pub fn list_recent_jobs_for_user(
        &self,
        user_id: i64,
        limit: u32,
        offset: u64,
    ) -> Result<(Vec<AnalysisJob>, u64)> {
        let total: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM analyses a JOIN repositories r ON r.id = a.repository_id
                 WHERE r.user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .context("Failed to count user analyses")?;
        let jobs = self.query_jobs(
            "JOIN repositories r ON r.id = a.repository_id WHERE r.user_id = ?1
             ORDER BY a.created_at DESC, a.rowid DESC LIMIT ?2 OFFSET ?3",
            params![user_id, limit, offset as i64],
        )?;
        Ok((jobs, total as u64))
    }

    /// All jobs across the user's repositories, oldest first.
    pub fn list_jobs_for_user(&self, user_id: i64) -> Result<Vec<AnalysisJob>> {
        self.query_jobs(
            "JOIN repositories r ON r.id = a.repository_id WHERE r.user_id = ?1
             ORDER BY a.created_at, a.rowid",
            params![user_id],
        )
    }

    /// Issue counts per severity across the user's completed jobs.
    pub fn issue_severity_counts_for_user(&self, user_id: i64) -> Result<Vec<(Severity, u64)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT i.severity, COUNT(*) FROM issues i
                 JOIN analyses a ON a.id = i.analysis_id
                 JOIN repositories r ON r.id = a.repository_id
                 WHERE r.user_id = ?1 AND a.status = 'completed'
                 GROUP BY i.severity",
            )
            .context("Failed to prepare severity counts")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("Failed to query severity counts")?;
        let mut counts = Vec::new();
        for row in rows {
            let (severity, count) = row.context("Failed to read severity count")?;
            let severity = Severity::from_str(&severity)
                .map_err(|e| anyhow::anyhow!(e))
                .context("Failed to parse issue severity")?;
            counts.push((severity, count as u64));
        }
        Ok(counts)
    }

    /// Issues ordered critical first, then by line number with unknown lines
    /// last, then by insertion order. `page` is `(limit, offset)`.
    pub fn list_issues(
        &self,
        analysis_id: Uuid,
        filter: &IssueFilter,
        page: Option<(u32, u64)>,
    ) -> Result<(Vec<Issue>, u64)> {
        let mut clause = String::from("WHERE analysis_id = ?1");
        let mut values = vec![Value::Text(analysis_id.to_string())];
        if let Some(severity) = filter.severity {
            values.push(Value::Text(severity.as_str().to_string()));
            clause.push_str(&format!(" AND severity = ?{}", values.len()));
        }
        if let Some(category) = &filter.category {
            values.push(Value::Text(category.clone()));
            clause.push_str(&format!(" AND category = ?{}", values.len()));
        }

        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM issues {}", clause),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
            .context("Failed to count issues")?;

        let mut sql = format!(
            "SELECT {} FROM issues {} ORDER BY severity_rank, line_number IS NULL, line_number, id",
            ISSUE_COLUMNS, clause
        );
        if let Some((limit, offset)) = page {
            values.push(Value::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
            values.push(Value::Integer(offset as i64));
            sql.push_str(&format!(" OFFSET ?{}", values.len()));
        }

        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_issues")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(IssueRow {
                    id: row.get(0)?,
                    analysis_id: row.get(1)?,
                    severity: row.get(2)?,
                    category: row.get(3)?,
                    title: row.get(4)?,
                    description: row.get(5)?,
                    suggestion: row.get(6)?,
                    file_path: row.get(7)?,
                    line_number: row.get(8)?,
                })
            })
            .context("Failed to query issues")?;
        let mut issues = Vec::new();
        for row in rows {
            let r = row.context("Failed to read issue row")?;
            issues.push(r.into_issue()?);
        }
        Ok((issues, total as u64))
    }

    /// Metrics ordered by value, highest first.
    pub fn list_metrics(&self, analysis_id: Uuid, filter: &MetricFilter) -> Result<Vec<Metric>> {
        let mut clause = String::from("WHERE analysis_id = ?1");
        let mut values = vec![Value::Text(analysis_id.to_string())];
        if let Some(metric_type) = &filter.metric_type {
            values.push(Value::Text(metric_type.clone()));
            clause.push_str(&format!(" AND metric_type = ?{}", values.len()));
        }
        if let Some(file_path) = &filter.file_path {
            values.push(Value::Text(file_path.clone()));
            clause.push_str(&format!(" AND file_path = ?{}", values.len()));
        }

        let sql = format!(
            "SELECT id, analysis_id, metric_type, value, file_path FROM metrics {} ORDER BY value DESC, id",
            clause
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_metrics")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .context("Failed to query metrics")?;
        let mut metrics = Vec::new();
        for row in rows {
            let (id, analysis_id, metric_type, value, file_path) =
                row.context("Failed to read metric row")?;
            metrics.push(Metric {
                id,
                analysis_id: parse_uuid(&analysis_id)?,
                metric_type,
                value,
                file_path,
            });
        }
        Ok(metrics)
    }

    fn query_jobs(&self, clause: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<AnalysisJob>> {
        let sql = format!("SELECT {} FROM analyses a {}", JOB_COLUMNS, clause);
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare analysis query")?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(JobRow {
                    id: row.get(0)?,
                    repository_id: row.get(1)?,
                    clone_url: row.get(2)?,
                    branch: row.get(3)?,
                    commit_sha: row.get(4)?,
                    status: row.get(5)?,
                    quality_score: row.get(6)?,
                    maintainability_index: row.get(7)?,
                    complexity_score: row.get(8)?,
                    security_rating: row.get(9)?,
                    issues_found: row.get(10)?,
                    files_analyzed: row.get(11)?,
                    external_handle: row.get(12)?,
                    error: row.get(13)?,
                    created_at: row.get(14)?,
                    dispatched_at: row.get(15)?,
                    completed_at: row.get(16)?,
                })
            })
            .context("Failed to query analyses")?;
        let mut jobs = Vec::new();
        for row in rows {
            let r = row.context("Failed to read analysis row")?;
            jobs.push(r.into_job()?);
        }
        Ok(jobs)
    }
}

fn active_job_id(conn: &Connection, repository_id: i64) -> Result<Option<Uuid>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM analyses WHERE repository_id = ?1 AND status IN ('pending', 'processing')",
            params![repository_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to look up active analysis")?;
    id.map(|s| parse_uuid(&s)).transpose()
}

/// Check every `from -> to` pair against the lifecycle table and render the
/// `from` side as a SQL list for the compare-and-set.
fn guarded_from(from: &[JobStatus], to: JobStatus) -> Result<String> {
    if let Some(bad) = from.iter().find(|status| !status.can_transition_to(to)) {
        anyhow::bail!("Illegal analysis transition {} -> {}", bad, to);
    }
    Ok(from
        .iter()
        .map(|status| format!("'{}'", status.as_str()))
        .collect::<Vec<_>>()
        .join(", "))
}

// ── Internal row helpers ──────────────────────────────────────────────

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp '{}'", s))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Invalid analysis id '{}'", s))
}

/// Intermediate row struct for analyses, before status and timestamps are
/// parsed into typed values.
struct JobRow {
    id: String,
    repository_id: i64,
    clone_url: String,
    branch: String,
    commit_sha: Option<String>,
    status: String,
    quality_score: Option<f64>,
    maintainability_index: Option<f64>,
    complexity_score: Option<f64>,
    security_rating: Option<f64>,
    issues_found: Option<i64>,
    files_analyzed: Option<i64>,
    external_handle: Option<String>,
    error: Option<String>,
    created_at: String,
    dispatched_at: Option<String>,
    completed_at: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<AnalysisJob> {
        let status = JobStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse analysis status")?;
        Ok(AnalysisJob {
            id: parse_uuid(&self.id)?,
            repository_id: self.repository_id,
            clone_url: self.clone_url,
            branch: self.branch,
            commit_sha: self.commit_sha,
            status,
            quality_score: self.quality_score,
            maintainability_index: self.maintainability_index,
            complexity_score: self.complexity_score,
            security_rating: self.security_rating,
            issues_found: self.issues_found,
            files_analyzed: self.files_analyzed,
            external_handle: self.external_handle,
            error: self.error,
            created_at: parse_ts(&self.created_at)?,
            dispatched_at: self.dispatched_at.as_deref().map(parse_ts).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

struct IssueRow {
    id: i64,
    analysis_id: String,
    severity: String,
    category: String,
    title: String,
    description: Option<String>,
    suggestion: Option<String>,
    file_path: String,
    line_number: Option<i64>,
}

impl IssueRow {
    fn into_issue(self) -> Result<Issue> {
        let severity = Severity::from_str(&self.severity)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse issue severity")?;
        Ok(Issue {
            id: self.id,
            analysis_id: parse_uuid(&self.analysis_id)?,
            severity,
            category: self.category,
            title: self.title,
            description: self.description,
            suggestion: self.suggestion,
            file_path: self.file_path,
            line_number: self.line_number,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
