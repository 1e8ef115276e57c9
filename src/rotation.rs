//! Re-wrapping artifacts for a new recipient set.
//!
//! Rotation opens the artifact with the old key, reseals the plaintext for
//! the new recipients and, when a sample key is at hand, reopens the result
//! to prove it is readable before anyone persists it. Plaintext only ever
//! exists in memory.

use crate::envelope::{
    DecryptError, EncryptedArtifact, EnvelopeCodec, KeyMaterial, Recipient, SealError,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// How the new recipient list relates to the existing one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientMode {
    /// Only the new recipients can open the result
    #[default]
    Replace,
    /// Existing recipients keep access alongside the new ones
    Union,
}

/// Whether the resealed artifact was proven readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    Verified,
    /// No sample key was available; the artifact was not reopened
    Unverified,
}

#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("cannot decrypt original artifact: {0}")]
    CannotDecryptOriginal(DecryptError),

    #[error("rotation would leave the artifact with no recipients")]
    NoRecipients,

    #[error("resealed artifact failed verification: {0}")]
    VerificationFailed(String),

    #[error("reseal failed: {0}")]
    Seal(#[from] SealError),
}

/// A resealed artifact ready to be persisted by the caller.
#[derive(Debug)]
pub struct RotationOutcome {
    pub artifact: EncryptedArtifact,
    pub target: String,
    pub recipients: Vec<Recipient>,
    pub previous_recipients: Vec<Recipient>,
    pub verification: Verification,
    /// Number of keys carried over
    pub key_count: usize,
}

impl RotationOutcome {
    pub fn is_verified(&self) -> bool {
        self.verification == Verification::Verified
    }
}

pub struct RotationCoordinator {
    codec: Arc<dyn EnvelopeCodec>,
}

impl RotationCoordinator {
    pub fn new(codec: Arc<dyn EnvelopeCodec>) -> Self {
        Self { codec }
    }

    pub fn rotate(
        &self,
        artifact: &EncryptedArtifact,
        old_key: KeyMaterial,
        new_recipients: &[Recipient],
        mode: RecipientMode,
        verify_with: Option<KeyMaterial>,
    ) -> Result<RotationOutcome, RotationError> {
        let header = self
            .codec
            .header(artifact)
            .map_err(RotationError::CannotDecryptOriginal)?;

        let mut recipients: BTreeSet<Recipient> = new_recipients.iter().copied().collect();
        if mode == RecipientMode::Union {
            recipients.extend(header.recipients.iter().copied());
        }
        if recipients.is_empty() {
            return Err(RotationError::NoRecipients);
        }
        let recipients: Vec<Recipient> = recipients.into_iter().collect();

        let plaintext = self
            .codec
            .open(artifact, old_key)
            .map_err(RotationError::CannotDecryptOriginal)?;
        let resealed = self.codec.seal(&plaintext, &recipients, &header.target)?;

        let verification = match verify_with {
            Some(sample) => {
                let identity = sample
                    .into_identity()
                    .map_err(|e| RotationError::VerificationFailed(e.to_string()))?;
                if !recipients.contains(&identity.recipient()) {
                    return Err(RotationError::VerificationFailed(format!(
                        "verification key {} is not among the new recipients",
                        identity.recipient().fingerprint()
                    )));
                }
                let reopened = self
                    .codec
                    .open(&resealed, identity.into())
                    .map_err(|e| RotationError::VerificationFailed(e.to_string()))?;
                if reopened != plaintext {
                    return Err(RotationError::VerificationFailed(
                        "reopened plaintext differs from the original".to_string(),
                    ));
                }
                Verification::Verified
            }
            None => {
                tracing::warn!(
                    target_id = %header.target,
                    "no verification key supplied, resealed artifact was not reopened"
                );
                Verification::Unverified
            }
        };

        tracing::info!(
            target_id = %header.target,
            recipients = recipients.len(),
            ?mode,
            ?verification,
            "artifact rotated"
        );

        Ok(RotationOutcome {
            artifact: resealed,
            target: header.target,
            recipients,
            previous_recipients: header.recipients,
            verification,
            key_count: plaintext.len(),
        })
    }
}
