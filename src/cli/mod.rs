//! CLI argument definitions for Fleetseal.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Version string with the commit and build time baked in by `build.rs`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("FSEAL_GIT_COMMIT"),
    " ",
    env!("FSEAL_BUILD_TIMESTAMP"),
    ")"
);

/// Fleetseal - per-robot secret resolution.
///
/// Resolves each configuration key from the target's encrypted artifact,
/// then the environment, then a `[[key]]` placeholder, and reports where
/// every value came from.
#[derive(Parser, Debug)]
#[command(name = "fseal")]
#[command(author, version = LONG_VERSION, about = "Per-robot secret resolution", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Run as if fseal was started in <path> instead of the current directory
    #[arg(short = 'C', long = "dir", global = true, env = "FLEETSEAL_DIR")]
    pub project_dir: Option<PathBuf>,

    /// Config file to use instead of ./fleetseal.kdl
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding <target>.enc.json artifacts
    #[arg(long, global = true)]
    pub secrets_dir: Option<PathBuf>,

    /// Directory holding <target>.key files
    #[arg(long, global = true)]
    pub keys_dir: Option<PathBuf>,

    /// Append audit entries to this file
    #[arg(long, global = true)]
    pub audit_log: Option<PathBuf>,

    /// Emit diagnostics as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve keys for one target and show where each value came from
    Resolve {
        /// Target identifier (e.g., rx-7)
        target: String,

        /// Keys to resolve (default: every key in the table)
        #[arg(short, long = "key")]
        keys: Vec<String>,

        /// Key file that opens the target's artifact
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// Print secret values instead of redacting them
        #[arg(long)]
        show_values: bool,
    },

    /// Build-time check: fail on corrupted targets, warn on placeholders
    Check {
        /// Targets to check
        targets: Vec<String>,

        /// Check every target with an artifact in the secrets directory
        #[arg(long)]
        all: bool,

        /// Keys to check (default: every key in the table)
        #[arg(short, long = "key")]
        keys: Vec<String>,

        /// Key file that opens the artifacts
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// Treat placeholder fallbacks as failures
        #[arg(long)]
        strict: bool,
    },

    /// Resolve a target and write each value to the runtime directory
    Install {
        /// Target identifier
        target: String,

        /// Keys to install (default: every key in the table)
        #[arg(short, long = "key")]
        keys: Vec<String>,

        /// Key file that opens the target's artifact
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// Directory to write runtime files into
        #[arg(long)]
        runtime_dir: Option<PathBuf>,
    },

    /// Seal a TOML table of values into the target's artifact
    Seal {
        /// Target identifier
        target: String,

        /// TOML file with `key = "value"` lines (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Recipient public key, base64 (repeatable; default: configured recipients)
        #[arg(short, long = "recipient")]
        recipients: Vec<String>,

        /// Replace an existing artifact
        #[arg(long)]
        force: bool,
    },

    /// Re-wrap a target's artifact for a new recipient set
    Rotate {
        /// Target identifier
        target: String,

        /// New recipient public key, base64 (repeatable; default: configured recipients)
        #[arg(short, long = "recipient")]
        recipients: Vec<String>,

        /// Keep the existing recipients alongside the new ones
        #[arg(long)]
        union: bool,

        /// Current key file that opens the artifact
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// One of the new keys, used to prove the result opens
        #[arg(long)]
        verify_key: Option<PathBuf>,
    },

    /// Show an artifact's header without decrypting values
    Inspect {
        /// Target identifier
        target: String,

        /// Key file; when given, key names are listed as well
        #[arg(long)]
        key_file: Option<PathBuf>,
    },

    /// List the key table: environment variables and runtime file names
    Keys,

    /// Show resolved settings and where each came from
    Config,
}
