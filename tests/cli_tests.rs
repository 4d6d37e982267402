//! Integration tests for the codesage CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A codesage command isolated from the host's config and environment.
fn codesage(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("codesage");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("xdg"))
        .env_remove("CODESAGE_CONFIG")
        .env_remove("CODESAGE_ANALYZER_URL")
        .env_remove("CODESAGE_DB_PATH")
        .env_remove("CODESAGE_PORT")
        .env_remove("CODESAGE_LOG_FORMAT")
        .env_remove("RUST_LOG");
    cmd
}

fn add_user(dir: &TempDir, name: &str) {
    codesage(dir)
        .args(["user", "add", name])
        .assert()
        .success();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let dir = TempDir::new().unwrap();
        codesage(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("sweep"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        codesage(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = TempDir::new().unwrap();
        codesage(&dir).arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Database administration
// =============================================================================

mod admin {
    use super::*;

    #[test]
    fn test_init_db_creates_default_database() {
        let dir = TempDir::new().unwrap();
        codesage(&dir)
            .arg("init-db")
            .assert()
            .success()
            .stdout(predicate::str::contains("Database initialized"));
        assert!(dir.path().join(".codesage/codesage.db").exists());
    }

    #[test]
    fn test_db_path_flag_overrides_default() {
        let dir = TempDir::new().unwrap();
        codesage(&dir)
            .args(["init-db", "--db-path", "custom/state.db"])
            .assert()
            .success();
        assert!(dir.path().join("custom/state.db").exists());
        assert!(!dir.path().join(".codesage").exists());
    }

    #[test]
    fn test_db_path_env_override() {
        let dir = TempDir::new().unwrap();
        codesage(&dir)
            .env("CODESAGE_DB_PATH", "from-env.db")
            .arg("init-db")
            .assert()
            .success();
        assert!(dir.path().join("from-env.db").exists());
    }

    #[test]
    fn test_user_and_repo_lifecycle() {
        let dir = TempDir::new().unwrap();
        codesage(&dir)
            .args(["user", "add", "ivan"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created user ivan (id 1)"));

        codesage(&dir)
            .args([
                "repo",
                "add",
                "--owner",
                "1",
                "--name",
                "billing",
                "--clone-url",
                "https://git.example.com/billing.git",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created repository billing (id 1) on branch main"));

        codesage(&dir)
            .args(["repo", "list", "--owner", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("billing"))
            .stdout(predicate::str::contains("https://git.example.com/billing.git"));
    }

    #[test]
    fn test_duplicate_username_fails() {
        let dir = TempDir::new().unwrap();
        add_user(&dir, "judy");
        codesage(&dir)
            .args(["user", "add", "judy"])
            .assert()
            .failure();
    }

    #[test]
    fn test_repo_add_requires_existing_owner() {
        let dir = TempDir::new().unwrap();
        codesage(&dir)
            .args([
                "repo",
                "add",
                "--owner",
                "42",
                "--name",
                "ghost",
                "--clone-url",
                "https://git.example.com/ghost.git",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No user with id 42"));
    }

    #[test]
    fn test_repo_list_empty() {
        let dir = TempDir::new().unwrap();
        add_user(&dir, "mallory");
        codesage(&dir)
            .args(["repo", "list", "--owner", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No repositories for user 1"));
    }

    #[test]
    fn test_sweep_on_empty_database() {
        let dir = TempDir::new().unwrap();
        codesage(&dir)
            .arg("sweep")
            .assert()
            .success()
            .stdout(predicate::str::contains("Swept 0 stale analyses"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_init_writes_defaults_once() {
        let dir = TempDir::new().unwrap();
        codesage(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created codesage.toml"));
        let content = fs::read_to_string(dir.path().join("codesage.toml")).unwrap();
        assert!(content.contains("[server]"));
        assert!(content.contains("port = 5000"));

        codesage(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_show_reflects_file_and_env() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("codesage.toml"),
            "[analyzer]\nurl = \"http://analyzer.internal:9000\"\n",
        )
        .unwrap();
        codesage(&dir)
            .env("CODESAGE_PORT", "6200")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("http://analyzer.internal:9000"))
            .stdout(predicate::str::contains("port = 6200"));
    }

    #[test]
    fn test_config_validate_reports_problems() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("codesage.toml"),
            "[polling]\ninterval_secs = 10\ntimeout_secs = 5\n\n[retry]\nmax_attempts = 0\n",
        )
        .unwrap();
        codesage(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("polling.timeout_secs (5) must exceed"))
            .stdout(predicate::str::contains("retry.max_attempts must be at least 1"));
    }

    #[test]
    fn test_config_validate_defaults_are_valid() {
        let dir = TempDir::new().unwrap();
        codesage(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_missing_explicit_config_fails() {
        let dir = TempDir::new().unwrap();
        codesage(&dir)
            .args(["--config", "nope.toml", "init-db"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("does not exist"));
    }

    #[test]
    fn test_invalid_env_port_fails() {
        let dir = TempDir::new().unwrap();
        codesage(&dir)
            .env("CODESAGE_PORT", "eighty")
            .arg("init-db")
            .assert()
            .failure()
            .stderr(predicate::str::contains("CODESAGE_PORT"));
    }

    #[test]
    fn test_serve_refuses_invalid_config() {
        let dir = TempDir::new().unwrap();
        codesage(&dir)
            .env("CODESAGE_ANALYZER_URL", "ftp://analyzer")
            .arg("serve")
            .assert()
            .failure()
            .stderr(predicate::str::contains("must be an http(s) URL"));
    }
}
