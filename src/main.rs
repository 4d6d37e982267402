use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use codesage::config::ServiceConfig;
use codesage::telemetry;

mod cmd;

#[derive(Parser)]
#[command(name = "codesage")]
#[command(version, about = "Repository analysis job orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a codesage.toml. Defaults to ./codesage.toml, then the user config dir.
    #[arg(long, global = true, env = "CODESAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database path. Overrides config and CODESAGE_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API, pollers and stale-job sweeper
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Base URL of the analyzer service
        #[arg(long)]
        analyzer_url: Option<String>,

        /// Enable dev mode (permissive CORS)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and apply migrations
    InitDb,
    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Fail stale analyses once and exit
    Sweep,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum UserCommands {
    /// Register a user
    Add { username: String },
}

#[derive(Subcommand, Clone)]
pub enum RepoCommands {
    /// Register a repository for a user
    Add {
        /// Owning user id
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        clone_url: String,
        #[arg(long, default_value = "main")]
        default_branch: String,
    },
    /// List a user's repositories
    List {
        #[arg(long)]
        owner: i64,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration and list every problem
    Validate,
    /// Write a default codesage.toml in the current directory
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let discovered = ServiceConfig::discover(cli.config.as_deref());
    let mut config = match (&cli.command, discovered) {
        // `config init` is how a missing file gets created.
        (
            Commands::Config {
                command: Some(ConfigCommands::Init),
            },
            Err(_),
        ) => ServiceConfig::default(),
        (_, discovered) => discovered?,
    };
    config.apply_env()?;
    if let Some(path) = &cli.db_path {
        config.server.db_path = path.clone();
    }
    let _log_guard = telemetry::init_tracing(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve {
            port,
            analyzer_url,
            dev,
        } => {
            cmd::cmd_serve(config, *port, analyzer_url.clone(), *dev).await?;
        }
        Commands::InitDb => cmd::cmd_init_db(&config)?,
        Commands::User { command } => cmd::cmd_user(&config, command.clone())?,
        Commands::Repo { command } => cmd::cmd_repo(&config, command.clone())?,
        Commands::Sweep => cmd::cmd_sweep(&config).await?,
        Commands::Config { command } => {
            cmd::cmd_config(&config, cli.config.as_deref(), command.clone())?
        }
    }

    Ok(())
}
