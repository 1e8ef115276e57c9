//! Value sources consulted by the resolution engine.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. [`EncryptedStoreProvider`] - the target's decrypted artifact
//! 2. [`EnvironmentProvider`] - process environment, via the key table
//! 3. [`PlaceholderProvider`] - `[[key]]` tokens, always resolves
//!
//! Each provider either fully resolves a key or declares it unresolved.

pub mod encrypted_store;
pub mod environment;
pub mod placeholder;

pub use encrypted_store::EncryptedStoreProvider;
pub use environment::{EnvSnapshot, EnvironmentProvider};
pub use placeholder::PlaceholderProvider;

use crate::envelope::DecryptError;
use crate::keys::ConfigKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    EncryptedStore,
    Environment,
    Placeholder,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EncryptedStore => "encrypted-store",
            Self::Environment => "environment",
            Self::Placeholder => "placeholder",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provider's answer for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ProviderResult {
    Resolved { value: String, source: SourceKind },
    Unresolved,
}

impl ProviderResult {
    pub fn resolved(value: impl Into<String>, source: SourceKind) -> Self {
        Self::Resolved {
            value: value.into(),
            source,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    pub fn source(&self) -> Option<SourceKind> {
        match self {
            Self::Resolved { source, .. } => Some(*source),
            Self::Unresolved => None,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Resolved { value, .. } => Some(value),
            Self::Unresolved => None,
        }
    }
}

/// A source of configuration values.
pub trait SourceProvider {
    fn kind(&self) -> SourceKind;

    /// Why this provider sits out the whole run, if it does.
    fn unavailable_reason(&self) -> Option<String> {
        None
    }

    fn try_resolve(&mut self, key: &ConfigKey) -> ProviderResult;

    /// Damage found in the provider's backing data. Halts the fallback chain.
    fn corruption(&self) -> Option<&DecryptError> {
        None
    }

    /// A non-fatal failure that turned every key unresolved.
    fn absorbed_failure(&self) -> Option<&DecryptError> {
        None
    }
}
