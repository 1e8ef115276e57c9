//! Configuration keys and the table that maps them to external names.
//!
//! Every key a fleet resolves is declared up front in a [`KeyTable`]. The
//! table carries the two documented one-to-one mappings:
//!
//! | key             | environment variable   | runtime file    |
//! |-----------------|------------------------|-----------------|
//! | `identity`      | `ROBOT_IDENTITY`       | `identity`      |
//! | `endpoint`      | `ROBOT_ENDPOINT`       | `endpoint`      |
//! | `signaling_url` | `ROBOT_SIGNALING_URL`  | `signaling-url` |
//! | `credential`    | `ROBOT_CREDENTIAL`     | `credential`    |
//!
//! The engine never derives these names itself; it is handed the table.

use crate::{Error, Result};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Prefix used for derived environment variable names.
pub const DEFAULT_ENV_PREFIX: &str = "ROBOT";

/// Keys declared when a config file does not list any.
pub const DEFAULT_KEYS: &[(&str, &str)] = &[
    ("identity", "Robot identity as registered with the fleet"),
    ("endpoint", "Control plane endpoint"),
    ("signaling_url", "WebRTC signaling server URL"),
    ("credential", "Credential presented to the signaling server"),
];

/// Name of one configuration item (`identity`, `endpoint`, ...).
///
/// Always lowercase snake_case: `[a-z][a-z0-9_]*`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigKey(String);

impl ConfigKey {
    /// Validate and wrap a key name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut chars = name.chars();
        let valid_head = matches!(chars.next(), Some(c) if c.is_ascii_lowercase());
        let valid_tail =
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid_head || !valid_tail || name.ends_with('_') || name.contains("__") {
            return Err(Error::InvalidKey(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Environment variable name derived with the given prefix.
    pub fn env_var(&self, prefix: &str) -> String {
        if prefix.is_empty() {
            self.0.to_ascii_uppercase()
        } else {
            format!("{}_{}", prefix, self.0.to_ascii_uppercase())
        }
    }

    /// Runtime file name: the kebab-cased key name.
    pub fn file_name(&self) -> String {
        self.0.replace('_', "-")
    }

    /// Token substituted when nothing else resolves this key.
    pub fn placeholder(&self) -> String {
        format!("[[{}]]", self.0)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConfigKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl Serialize for ConfigKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// External names of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySpec {
    /// Environment variable consulted by the environment provider
    pub env_var: String,
    /// File name used by the runtime installer
    pub file_name: String,
    /// Free-form description shown by `fseal keys`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The enumerated set of keys known to a fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyTable {
    entries: BTreeMap<ConfigKey, KeySpec>,
}

impl KeyTable {
    /// Build a table, rejecting mappings that are not one-to-one.
    pub fn new(entries: impl IntoIterator<Item = (ConfigKey, KeySpec)>) -> Result<Self> {
        let mut table = BTreeMap::new();
        let mut env_vars = BTreeSet::new();
        let mut file_names = BTreeSet::new();

        for (key, spec) in entries {
            if spec.env_var.is_empty()
                || !spec
                    .env_var
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(Error::Config(format!(
                    "key '{}': environment variable '{}' must be upper snake case",
                    key, spec.env_var
                )));
            }
            if !env_vars.insert(spec.env_var.clone()) {
                return Err(Error::Config(format!(
                    "environment variable '{}' is mapped to more than one key",
                    spec.env_var
                )));
            }
            if !file_names.insert(spec.file_name.clone()) {
                return Err(Error::Config(format!(
                    "runtime file '{}' is mapped to more than one key",
                    spec.file_name
                )));
            }
            if table.insert(key.clone(), spec).is_some() {
                return Err(Error::DuplicateKey(key.to_string()));
            }
        }

        if table.is_empty() {
            return Err(Error::Config("key table is empty".to_string()));
        }

        Ok(Self { entries: table })
    }

    /// Table with derived names for each key.
    pub fn derived<'a>(
        keys: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
        prefix: &str,
    ) -> Result<Self> {
        let entries = keys
            .into_iter()
            .map(|(name, description)| {
                let key = ConfigKey::new(name)?;
                let spec = KeySpec {
                    env_var: key.env_var(prefix),
                    file_name: key.file_name(),
                    description: description.map(str::to_string),
                };
                Ok((key, spec))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(entries)
    }

    /// The built-in table.
    pub fn default_table(prefix: &str) -> Result<Self> {
        Self::derived(DEFAULT_KEYS.iter().map(|(k, d)| (*k, Some(*d))), prefix)
    }

    pub fn get(&self, key: &ConfigKey) -> Option<&KeySpec> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &ConfigKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Environment variable for a key, if the key is declared.
    pub fn env_var(&self, key: &ConfigKey) -> Option<&str> {
        self.entries.get(key).map(|s| s.env_var.as_str())
    }

    /// All declared keys in table order.
    pub fn keys(&self) -> impl Iterator<Item = &ConfigKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConfigKey, &KeySpec)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse key names and check each one is declared.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ConfigKey>> {
        names
            .iter()
            .map(|name| {
                let key = ConfigKey::new(name.as_ref())?;
                if self.contains(&key) {
                    Ok(key)
                } else {
                    Err(Error::UnknownKey(key.to_string()))
                }
            })
            .collect()
    }
}
