//! Envelope codec: the boundary to the encryption primitive.
//!
//! An [`EncryptedArtifact`] is opaque bytes. The codec turns it into a
//! plaintext [`SecretMap`] given key material, or seals a map for a set of
//! [`Recipient`]s. Failures are classified so callers can tell a missing or
//! wrong key ([`DecryptReason::KeyMismatch`]) from damaged data
//! ([`DecryptReason::Malformed`]) and I/O trouble
//! ([`DecryptReason::Unreadable`]).

pub mod identity;
pub mod x25519;

pub use identity::{Identity, KEY_LEN, KeyMaterial, Recipient};
pub use x25519::X25519Codec;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use zeroize::Zeroize;

/// Why an artifact could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecryptReason {
    /// Key material is missing, unusable, or not a recipient
    KeyMismatch,
    /// The artifact is damaged or not an envelope
    Malformed,
    /// The artifact or key file could not be read
    Unreadable,
}

impl DecryptReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyMismatch => "key-mismatch",
            Self::Malformed => "malformed",
            Self::Unreadable => "unreadable",
        }
    }
}

impl fmt::Display for DecryptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to open an artifact. Never carries plaintext.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct DecryptError {
    reason: DecryptReason,
    detail: String,
}

impl DecryptError {
    pub fn new(reason: DecryptReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(DecryptReason::Malformed, detail)
    }

    pub fn reason(&self) -> DecryptReason {
        self.reason
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// Failure to seal a mapping.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("no recipients given")]
    NoRecipients,

    #[error("target tag is empty")]
    EmptyTarget,

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("cipher failure: {0}")]
    Cipher(String),
}

/// Encrypted bytes as stored on disk.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedArtifact {
    bytes: Vec<u8>,
}

impl EncryptedArtifact {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Read an artifact file. A missing file is `Ok(None)`.
    pub fn read(path: &Path) -> Result<Option<Self>, DecryptError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(Self { bytes })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DecryptError::new(
                DecryptReason::Unreadable,
                format!("cannot read {}: {}", path.display(), e),
            )),
        }
    }

    /// Write the artifact, replacing any existing file.
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &self.bytes)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for EncryptedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedArtifact({} bytes)", self.bytes.len())
    }
}

/// Cleartext metadata readable without a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeHeader {
    pub version: u32,
    /// Target the artifact was sealed for
    pub target: String,
    pub recipients: Vec<Recipient>,
}

/// Decrypted key/value pairs. Values are zeroized on drop.
#[derive(Default, PartialEq, Eq)]
pub struct SecretMap {
    entries: BTreeMap<String, String>,
}

impl SecretMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(mut old) = self.entries.insert(key.into(), value.into()) {
            old.zeroize();
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn as_map(&self) -> &BTreeMap<String, String> {
        &self.entries
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SecretMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl fmt::Debug for SecretMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl Drop for SecretMap {
    fn drop(&mut self) {
        for value in self.entries.values_mut() {
            value.zeroize();
        }
    }
}

/// Opens and seals artifacts.
pub trait EnvelopeCodec: Send + Sync {
    /// Decrypt an artifact. The key material is consumed and dropped before
    /// this returns.
    fn open(
        &self,
        artifact: &EncryptedArtifact,
        key: KeyMaterial,
    ) -> Result<SecretMap, DecryptError>;

    /// Encrypt a mapping for every recipient, tagged with `target`.
    fn seal(
        &self,
        plaintext: &SecretMap,
        recipients: &[Recipient],
        target: &str,
    ) -> Result<EncryptedArtifact, SealError>;

    /// Read the cleartext header.
    fn header(&self, artifact: &EncryptedArtifact) -> Result<EnvelopeHeader, DecryptError>;
}
