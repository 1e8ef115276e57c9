//! Fleetseal - per-robot secret resolution.
//!
//! This library provides the core functionality for the `fseal` CLI tool:
//! decrypting a target's sealed artifact, falling back through the
//! environment and placeholders with provenance for every value, and
//! re-wrapping artifacts when the recipient set changes.

pub mod audit;
pub mod cli;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod envelope;
pub mod install;
pub mod keys;
pub mod providers;
pub mod rotation;
pub mod target;

use crate::envelope::{DecryptError, SealError};
use crate::rotation::RotationError;
use std::path::PathBuf;

/// Library-level error type for Fleetseal operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Seal input that is not valid TOML. Carries position and reason only.
    #[error("TOML error: {0}")]
    Toml(String),

    #[error("KDL error: {0}")]
    Kdl(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    #[error(transparent)]
    Seal(#[from] SealError),

    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error("Invalid key name: {0}")]
    InvalidKey(String),

    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("artifact {} is tagged for '{found}', not '{expected}'", path.display())]
    TargetMismatch {
        expected: String,
        found: String,
        path: PathBuf,
    },

    #[error("no provider resolved '{key}' for target '{target}'")]
    InvariantViolation { target: String, key: String },

    #[error("secrets for '{target}' are corrupted ({}): {detail}", keys.join(", "))]
    Corrupted {
        target: String,
        keys: Vec<String>,
        detail: String,
    },

    #[error("secrets for '{target}' fell back to placeholders: {}", keys.join(", "))]
    Degraded { target: String, keys: Vec<String> },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Fleetseal operations.
pub type Result<T> = std::result::Result<T, Error>;
