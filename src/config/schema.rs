//! KDL schema for `fleetseal.kdl` and the system `config.kdl`.
//!
//! ```kdl
//! secrets-dir "secrets"
//! keys-dir "keys"
//! key-file-env "FLEETSEAL_KEY_FILE"
//! env-prefix "ROBOT"
//! runtime-dir "/run/fleetseal"
//! audit-log "~/.local/share/fleetseal/audit.log"
//! recipient "base64-public-key"
//! key "identity" env="ROBOT_IDENTITY" description="Robot identity"
//! key "endpoint"
//! ```

use crate::{Error, Result};
use kdl::{KdlDocument, KdlNode};
use serde::Serialize;
use std::path::Path;

/// One `key` node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyDecl {
    pub name: String,
    /// Explicit environment variable; derived from the prefix when absent
    pub env: Option<String>,
    pub description: Option<String>,
}

/// Settings as written in a single config file. Every field is optional so
/// layers can be merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetConfig {
    pub secrets_dir: Option<String>,
    pub keys_dir: Option<String>,
    pub key_file_env: Option<String>,
    pub env_prefix: Option<String>,
    pub runtime_dir: Option<String>,
    pub audit_log: Option<String>,
    pub recipients: Vec<String>,
    pub keys: Vec<KeyDecl>,
}

fn first_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
}

fn property(node: &KdlNode, name: &str) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(name))
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
}

impl FleetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse config text. Unknown nodes are an error so typos surface early.
    pub fn parse(text: &str) -> Result<Self> {
        let doc: KdlDocument = text
            .parse()
            .map_err(|e: kdl::KdlError| Error::Kdl(e.to_string()))?;
        let config = Self::from_kdl(&doc)?;
        config.validate().map_err(Error::Config)?;
        Ok(config)
    }

    /// Load a config file. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::parse(&text)
            .map(Some)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_kdl(doc: &KdlDocument) -> Result<Self> {
        let mut config = Self::new();

        for node in doc.nodes() {
            let name = node.name().value();
            let value = first_string(node);
            let require = |value: Option<String>| {
                value.ok_or_else(|| Error::Config(format!("'{}' needs a string argument", name)))
            };
            match name {
                "secrets-dir" => config.secrets_dir = Some(require(value)?),
                "keys-dir" => config.keys_dir = Some(require(value)?),
                "key-file-env" => config.key_file_env = Some(require(value)?),
                "env-prefix" => config.env_prefix = Some(require(value)?),
                "runtime-dir" => config.runtime_dir = Some(require(value)?),
                "audit-log" => config.audit_log = Some(require(value)?),
                "recipient" => config.recipients.push(require(value)?),
                "key" => config.keys.push(KeyDecl {
                    name: require(value)?,
                    env: property(node, "env"),
                    description: property(node, "description"),
                }),
                other => {
                    return Err(Error::Config(format!("unknown config node '{}'", other)));
                }
            }
        }

        Ok(config)
    }

    /// Validate the values that have no other owner to check them.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(prefix) = &self.env_prefix {
            let ok = !prefix.is_empty()
                && prefix
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
            if !ok {
                return Err(format!("env-prefix '{}' must be upper snake case", prefix));
            }
        }
        if let Some(var) = &self.key_file_env {
            if var.is_empty() {
                return Err("key-file-env must not be empty".to_string());
            }
        }
        for (field, value) in [
            ("secrets-dir", &self.secrets_dir),
            ("keys-dir", &self.keys_dir),
            ("runtime-dir", &self.runtime_dir),
            ("audit-log", &self.audit_log),
        ] {
            if value.as_deref() == Some("") {
                return Err(format!("{} must not be empty", field));
            }
        }
        Ok(())
    }

    /// Overlay `other` on top of `self`. List nodes replace rather than
    /// append so a project can narrow the system key table.
    pub fn merge(&mut self, other: &FleetConfig) {
        if other.secrets_dir.is_some() {
            self.secrets_dir = other.secrets_dir.clone();
        }
        if other.keys_dir.is_some() {
            self.keys_dir = other.keys_dir.clone();
        }
        if other.key_file_env.is_some() {
            self.key_file_env = other.key_file_env.clone();
        }
        if other.env_prefix.is_some() {
            self.env_prefix = other.env_prefix.clone();
        }
        if other.runtime_dir.is_some() {
            self.runtime_dir = other.runtime_dir.clone();
        }
        if other.audit_log.is_some() {
            self.audit_log = other.audit_log.clone();
        }
        if !other.recipients.is_empty() {
            self.recipients = other.recipients.clone();
        }
        if !other.keys.is_empty() {
            self.keys = other.keys.clone();
        }
    }
}
