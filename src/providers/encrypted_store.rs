//! Provider backed by the target's encrypted artifact.
//!
//! The artifact is opened lazily on the first lookup and at most once per
//! provider. Key material is handed to the codec by value, so it is gone as
//! soon as that single open returns. The decrypted map lives only as long as
//! the provider.

use super::{ProviderResult, SourceKind, SourceProvider};
use crate::envelope::{
    DecryptError, DecryptReason, EncryptedArtifact, EnvelopeCodec, KeyMaterial, SecretMap,
};
use crate::keys::ConfigKey;
use std::sync::Arc;

enum StoreState {
    Sealed {
        artifact: Option<EncryptedArtifact>,
        key: Option<KeyMaterial>,
    },
    Open(SecretMap),
    Failed(DecryptError),
}

pub struct EncryptedStoreProvider {
    codec: Arc<dyn EnvelopeCodec>,
    state: StoreState,
}

impl EncryptedStoreProvider {
    pub fn new(
        codec: Arc<dyn EnvelopeCodec>,
        artifact: Option<EncryptedArtifact>,
        key: Option<KeyMaterial>,
    ) -> Self {
        // Without an artifact there is nothing to open; release the key now.
        let key = if artifact.is_some() { key } else { None };
        Self {
            codec,
            state: StoreState::Sealed { artifact, key },
        }
    }

    /// A provider whose artifact already failed to load.
    pub fn failed(codec: Arc<dyn EnvelopeCodec>, error: DecryptError) -> Self {
        Self {
            codec,
            state: StoreState::Failed(error),
        }
    }

    /// Whether the artifact has been decrypted in this run.
    pub fn is_open(&self) -> bool {
        matches!(self.state, StoreState::Open(_))
    }

    /// Whether key material is still held, waiting for the single open.
    pub fn holds_key_material(&self) -> bool {
        matches!(self.state, StoreState::Sealed { key: Some(_), .. })
    }

    fn ensure_open(&mut self) {
        let StoreState::Sealed { artifact, key } = &mut self.state else {
            return;
        };
        let (Some(artifact), Some(key)) = (artifact.take(), key.take()) else {
            self.state = StoreState::Failed(DecryptError::new(
                DecryptReason::KeyMismatch,
                "no artifact or key material for this run",
            ));
            return;
        };

        let source = key.describe();
        self.state = match self.codec.open(&artifact, key) {
            Ok(map) => {
                tracing::debug!(keys = map.len(), key_material = %source, "opened encrypted store");
                StoreState::Open(map)
            }
            Err(e) => {
                match e.reason() {
                    DecryptReason::Malformed => {
                        tracing::error!(error = %e, "encrypted store is corrupted")
                    }
                    _ => tracing::warn!(
                        error = %e,
                        key_material = %source,
                        "encrypted store unavailable, falling back"
                    ),
                }
                StoreState::Failed(e)
            }
        };
    }

    fn failure(&self) -> Option<&DecryptError> {
        match &self.state {
            StoreState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl SourceProvider for EncryptedStoreProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::EncryptedStore
    }

    fn unavailable_reason(&self) -> Option<String> {
        match &self.state {
            StoreState::Sealed { artifact: None, .. } => Some("no encrypted artifact".to_string()),
            StoreState::Sealed { key: None, .. } => Some("no key material".to_string()),
            _ => None,
        }
    }

    fn try_resolve(&mut self, key: &ConfigKey) -> ProviderResult {
        self.ensure_open();
        match &self.state {
            StoreState::Open(map) => match map.get(key.as_str()) {
                Some(value) => ProviderResult::resolved(value, SourceKind::EncryptedStore),
                None => {
                    tracing::debug!(key = %key, "key not present in encrypted store");
                    ProviderResult::Unresolved
                }
            },
            _ => ProviderResult::Unresolved,
        }
    }

    fn corruption(&self) -> Option<&DecryptError> {
        self.failure()
            .filter(|e| e.reason() == DecryptReason::Malformed)
    }

    fn absorbed_failure(&self) -> Option<&DecryptError> {
        self.failure()
            .filter(|e| e.reason() != DecryptReason::Malformed)
    }
}

impl std::fmt::Debug for EncryptedStoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            StoreState::Sealed { .. } => "sealed",
            StoreState::Open(_) => "open",
            StoreState::Failed(_) => "failed",
        };
        f.debug_struct("EncryptedStoreProvider")
            .field("state", &state)
            .field("key_material", &self.holds_key_material())
            .finish()
    }
}
