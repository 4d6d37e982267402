//! Analysis job orchestration.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (handlers, AppState, x-user-id)    │
//! └──────────┘          │         │                                        │
//!                       │         │ submit / cancel / get_job              │
//!                       │         v                                        │
//!                       │  orchestrator.rs  (Orchestrator, poller registry)│
//!                       │         │                  │                     │
//!                       │         │ Dispatcher       │ poll_until_terminal │
//!                       │         v                  v                     │
//!                       │  dispatch.rs         poller.rs  (+ sweeper)      │
//!                       │  (HttpDispatcher)                                │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module       | Responsibility                                          |
//! |--------------|---------------------------------------------------------|
//! | `models`     | Request/response and view types                         |
//! | `db`         | SQLite job store via `DbHandle` (thin `Arc<Mutex<_>>`)  |
//! | `retry`      | `RetryPolicy` + backoff for transient analyzer errors   |
//! | `query`      | Owner-checked paginated views                           |
//! | `aggregator` | Severity/category histograms, metric groups, user stats |
//!
//! ## Job Lifecycle
//!
//! 1. `POST /api/analysis` → `Orchestrator::submit()` inserts a `pending` row.
//!    A partial unique index on `analyses(repository_id)` over active
//!    statuses makes a second concurrent submit fail with `Conflict`.
//! 2. The job is enqueued on the analyzer (retrying transient failures), then
//!    moved to `processing` with the analyzer's handle, and a poller is spawned.
//! 3. The poller calls `Dispatcher::poll_result()` each tick. A finished report
//!    goes through `Orchestrator::ingest()`, which validates it and writes the
//!    scores, issues and metrics in one transaction.
//! 4. Every terminal transition is a compare-and-set on the current status, so
//!    ingest, cancel and the stale sweep cannot both win.

pub mod aggregator;
pub mod api;
pub mod db;
pub mod dispatch;
pub mod models;
pub mod orchestrator;
pub mod poller;
pub mod query;
pub mod retry;
pub mod server;

#[cfg(test)]
mod testing;
