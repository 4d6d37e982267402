//! CLI command implementations.
//!
//! | Module    | Commands handled                     |
//! |-----------|--------------------------------------|
//! | `serve`   | `Serve`                              |
//! | `admin`   | `InitDb`, `User`, `Repo`, `Sweep`    |
//! | `config`  | `Config`                             |

pub mod admin;
pub mod config;
pub mod serve;

pub use admin::{cmd_init_db, cmd_repo, cmd_sweep, cmd_user};
pub use config::cmd_config;
pub use serve::cmd_serve;
