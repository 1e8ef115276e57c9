//! Resolution requests.

use crate::envelope::KeyMaterial;
use crate::keys::ConfigKey;
use crate::target::TargetId;
use crate::{Error, Result};
use std::collections::BTreeSet;

/// What to resolve, for whom, and (optionally) with which key.
///
/// Immutable once built; the isolation layer consumes it.
#[derive(Debug)]
pub struct ResolutionRequest {
    target: TargetId,
    keys: Vec<ConfigKey>,
    key_material: Option<KeyMaterial>,
}

impl ResolutionRequest {
    /// Build a request. Keys must be unique and the list non-empty.
    pub fn new(
        target: TargetId,
        keys: impl IntoIterator<Item = ConfigKey>,
        key_material: Option<KeyMaterial>,
    ) -> Result<Self> {
        let keys: Vec<ConfigKey> = keys.into_iter().collect();
        let mut seen = BTreeSet::new();
        for key in &keys {
            if !seen.insert(key) {
                return Err(Error::DuplicateKey(key.to_string()));
            }
        }
        if keys.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no keys requested for target '{}'",
                target
            )));
        }
        Ok(Self {
            target,
            keys,
            key_material,
        })
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn keys(&self) -> &[ConfigKey] {
        &self.keys
    }

    pub fn has_key_material(&self) -> bool {
        self.key_material.is_some()
    }

    pub(crate) fn into_parts(self) -> (TargetId, Vec<ConfigKey>, Option<KeyMaterial>) {
        (self.target, self.keys, self.key_material)
    }
}
