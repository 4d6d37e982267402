//! Service configuration.
//!
//! Values are layered: defaults, then a TOML file, then `CODESAGE_*`
//! environment variables, then CLI flags (applied by the `serve` command).
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 5000
//! db_path = ".codesage/codesage.db"
//!
//! [analyzer]
//! url = "http://localhost:8000"
//! request_timeout_secs = 30
//!
//! [polling]
//! interval_secs = 5
//! timeout_secs = 600
//! sweep_interval_secs = 30
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 200
//! max_delay_ms = 5000
//!
//! [logging]
//! format = "json"
//! directory = "/var/log/codesage"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::retry::RetryPolicy;
use crate::errors::ConfigError;

pub const CONFIG_FILE_NAME: &str = "codesage.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid log format '{}'. Valid values: plain, json", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".codesage").join("codesage.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerSection {
    #[serde(default = "default_analyzer_url")]
    pub url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AnalyzerSection {
    fn default() -> Self {
        Self {
            url: default_analyzer_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_analyzer_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Measured from dispatch; matches the analyzer's own analysis timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_sweep_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// When set, logs also go to a daily-rotated file in this directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Fallback filter when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub analyzer: AnalyzerSection,
    #[serde(default)]
    pub polling: PollingSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("In config file {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse codesage.toml")
    }

    /// Find and load the config file, or fall back to defaults.
    ///
    /// An explicit path must exist. Otherwise `./codesage.toml` wins over
    /// `<config dir>/codesage/config.toml`.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::Missing {
                    path: path.to_path_buf(),
                }
                .into());
            }
            return Self::load(path);
        }
        for candidate in Self::candidate_paths() {
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "Loading config file");
                return Self::load(&candidate);
            }
        }
        Ok(Self::default())
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("codesage").join("config.toml"));
        }
        paths
    }

    /// Apply `CODESAGE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut problems = Vec::new();
        if let Some(url) = lookup("CODESAGE_ANALYZER_URL") {
            self.analyzer.url = url;
        }
        if let Some(path) = lookup("CODESAGE_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(port) = lookup("CODESAGE_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => problems.push(format!("CODESAGE_PORT '{}' is not a valid port", port)),
            }
        }
        if let Some(format) = lookup("CODESAGE_LOG_FORMAT") {
            match format.parse() {
                Ok(f) => self.logging.format = f,
                Err(e) => problems.push(e),
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Return every problem that would make the service misbehave.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.polling.interval_secs == 0 {
            problems.push("polling.interval_secs must be greater than zero".to_string());
        }
        if self.polling.sweep_interval_secs == 0 {
            problems.push("polling.sweep_interval_secs must be greater than zero".to_string());
        }
        if self.polling.timeout_secs <= self.polling.interval_secs {
            problems.push(format!(
                "polling.timeout_secs ({}) must exceed polling.interval_secs ({})",
                self.polling.timeout_secs, self.polling.interval_secs
            ));
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            problems.push("retry.base_delay_ms must not exceed retry.max_delay_ms".to_string());
        }
        if self.analyzer.request_timeout_secs == 0 {
            problems.push("analyzer.request_timeout_secs must be greater than zero".to_string());
        }
        if !(self.analyzer.url.starts_with("http://") || self.analyzer.url.starts_with("https://"))
        {
            problems.push(format!(
                "analyzer.url '{}' must be an http(s) URL",
                self.analyzer.url
            ));
        }
        problems
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        let problems = self.validate();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.polling.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.polling.sweep_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = ServiceConfig::parse("").unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.db_path, PathBuf::from(".codesage/codesage.db"));
        assert_eq!(config.analyzer.url, "http://localhost:8000");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.poll_timeout(), Duration::from_secs(600));
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.logging.format, LogFormat::Plain);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let content = r#"
[server]
port = 8080

[analyzer]
url = "https://analyzer.internal"

[polling]
interval_secs = 2
timeout_secs = 120

[retry]
max_attempts = 5

[logging]
format = "json"
directory = "/tmp/codesage-logs"
"#;
        let config = ServiceConfig::parse(content).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.analyzer.url, "https://analyzer.internal");
        assert_eq!(config.polling.interval_secs, 2);
        assert_eq!(config.polling.sweep_interval_secs, 30);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/tmp/codesage-logs"))
        );
    }

    #[test]
    fn test_parse_rejects_unknown_log_format() {
        assert!(ServiceConfig::parse("[logging]\nformat = \"xml\"").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_intervals() {
        let mut config = ServiceConfig::default();
        config.polling.interval_secs = 0;
        config.polling.sweep_interval_secs = 0;
        config.retry.max_attempts = 0;
        let problems = config.validate();
        assert!(problems.iter().any(|p| p.contains("interval_secs must")));
        assert!(problems.iter().any(|p| p.contains("sweep_interval_secs")));
        assert!(problems.iter().any(|p| p.contains("max_attempts")));
        assert!(matches!(config.check(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_timeout_must_exceed_interval() {
        let mut config = ServiceConfig::default();
        config.polling.interval_secs = 10;
        config.polling.timeout_secs = 10;
        let problems = config.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("timeout_secs"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CODESAGE_ANALYZER_URL", "http://analyzer:9000"),
            ("CODESAGE_DB_PATH", "/data/cs.db"),
            ("CODESAGE_PORT", "6001"),
            ("CODESAGE_LOG_FORMAT", "JSON"),
        ]
        .into_iter()
        .collect();
        let mut config = ServiceConfig::default();
        config
            .apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.analyzer.url, "http://analyzer:9000");
        assert_eq!(config.server.db_path, PathBuf::from("/data/cs.db"));
        assert_eq!(config.server.port, 6001);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_override_with_bad_port() {
        let mut config = ServiceConfig::default();
        let err = config
            .apply_env_with(|k| (k == "CODESAGE_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CODESAGE_PORT"));
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_discover_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServiceConfig::discover(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Missing { .. })
        ));
    }

    #[test]
    fn test_discover_explicit_path_loads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[server]\nport = 7000\n").unwrap();
        let config = ServiceConfig::discover(Some(&path)).unwrap();
        assert_eq!(config.server.port, 7000);
    }
}
