//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingSection};

pub const DEFAULT_FILTER: &str = "codesage=info,tower_http=info";
pub const VERBOSE_FILTER: &str = "codesage=debug,tower_http=debug";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Pick the filter directive: `RUST_LOG` wins, then `--verbose`, then the
/// config file, then the built-in default.
pub fn filter_directive(rust_log: Option<String>, configured: Option<&str>, verbose: bool) -> String {
    if let Some(env) = rust_log.filter(|s| !s.trim().is_empty()) {
        return env;
    }
    if verbose {
        return VERBOSE_FILTER.to_string();
    }
    configured.unwrap_or(DEFAULT_FILTER).to_string()
}

/// Install the global subscriber. Keep the returned guard alive for the life
/// of the process or buffered file output is lost.
pub fn init_tracing(logging: &LoggingSection, verbose: bool) -> Result<Option<WorkerGuard>> {
    let directive = filter_directive(
        std::env::var("RUST_LOG").ok(),
        logging.filter.as_deref(),
        verbose,
    );
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid log filter '{}'", directive))?;

    let mut layers: Vec<BoxedLayer> = vec![stdout_layer(logging.format)];
    let mut guard = None;
    if let Some(dir) = &logging.directory {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, "codesage.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(fmt::layer().json().with_ansi(false).with_writer(writer).boxed());
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}

fn stdout_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Plain => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(false).boxed(),
    }
}
