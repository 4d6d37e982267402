//! Database and record administration: `init-db`, `user`, `repo`, `sweep`.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use codesage::analysis::db::{AnalysisDb, DbHandle};
use codesage::analysis::dispatch::HttpDispatcher;
use codesage::analysis::orchestrator::{Orchestrator, OrchestratorSettings};
use codesage::config::ServiceConfig;

use super::super::{RepoCommands, UserCommands};

fn open_db(config: &ServiceConfig) -> Result<AnalysisDb> {
    AnalysisDb::new(&config.server.db_path).with_context(|| {
        format!(
            "Failed to open database at {}",
            config.server.db_path.display()
        )
    })
}

pub fn cmd_init_db(config: &ServiceConfig) -> Result<()> {
    open_db(config)?;
    println!(
        "Database initialized at {}",
        config.server.db_path.display()
    );
    Ok(())
}

pub fn cmd_user(config: &ServiceConfig, command: UserCommands) -> Result<()> {
    let db = open_db(config)?;
    match command {
        UserCommands::Add { username } => {
            let user = db.create_user(&username, Utc::now())?;
            println!("Created user {} (id {})", user.username, user.id);
        }
    }
    Ok(())
}

pub fn cmd_repo(config: &ServiceConfig, command: RepoCommands) -> Result<()> {
    let db = open_db(config)?;
    match command {
        RepoCommands::Add {
            owner,
            name,
            clone_url,
            default_branch,
        } => {
            if db.get_user(owner)?.is_none() {
                anyhow::bail!("No user with id {}", owner);
            }
            let repo = db.create_repository(owner, &name, &clone_url, &default_branch, Utc::now())?;
            println!(
                "Created repository {} (id {}) on branch {}",
                repo.name, repo.id, repo.default_branch
            );
        }
        RepoCommands::List { owner } => {
            let repos = db.list_repositories(owner)?;
            if repos.is_empty() {
                println!("No repositories for user {}", owner);
                return Ok(());
            }
            println!("{:<6} {:<24} {:<12} Clone URL", "Id", "Name", "Branch");
            println!("{:<6} {:<24} {:<12} ---------", "--", "----", "------");
            for repo in repos {
                println!(
                    "{:<6} {:<24} {:<12} {}",
                    repo.id, repo.name, repo.default_branch, repo.clone_url
                );
            }
        }
    }
    Ok(())
}

/// One stale sweep, for cron-style use when no server is running.
pub async fn cmd_sweep(config: &ServiceConfig) -> Result<()> {
    config.check()?;
    let db = DbHandle::new(open_db(config)?);
    let dispatcher = HttpDispatcher::new(&config.analyzer.url, config.request_timeout())?;
    let orchestrator = Orchestrator::new(
        db,
        Arc::new(dispatcher),
        OrchestratorSettings::from_config(config),
    );
    let swept = orchestrator.sweep_stale().await?;
    println!("Swept {} stale analyses", swept);
    Ok(())
}
