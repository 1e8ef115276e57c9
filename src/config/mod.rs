//! Fleet configuration.
//!
//! Two KDL files feed the settings:
//!
//! - Project: `fleetseal.kdl` in the project directory, or the file named by
//!   `--config` / `FLEETSEAL_CONFIG`
//! - System: `~/.config/fleetseal/config.kdl` (`FLEETSEAL_CONFIG_DIR`
//!   replaces the directory)
//!
//! Neither file holds secret values. They name directories, the key table
//! and default seal recipients.
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    AUDIT_LOG_ENV, CONFIG_DIR_ENV, CONFIG_ENV, ConfigFiles, ConfigOverrides, KEYS_DIR_ENV,
    PROJECT_CONFIG_FILE, RUNTIME_DIR_ENV, Resolved, SECRETS_DIR_ENV, Settings, ValueSource,
    expand_path, resolve_settings, system_config_path,
};
pub use schema::{FleetConfig, KeyDecl};
