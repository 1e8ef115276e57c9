//! Private identities, public recipients, and key-material contexts.

use super::{DecryptError, DecryptReason};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand_core::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Length of X25519 keys in bytes.
pub const KEY_LEN: usize = 32;

/// A recipient's public key. Text form is standard base64 of the 32 raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Recipient(PublicKey);

impl Recipient {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(PublicKey::from(bytes))
    }

    pub fn as_public_key(&self) -> &PublicKey {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        self.0.as_bytes()
    }

    /// Short hex fingerprint for display.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.as_bytes());
        digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD.encode(self.as_bytes()))
    }
}

impl fmt::Debug for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Recipient({})", self)
    }
}

impl PartialOrd for Recipient {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Recipient {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl FromStr for Recipient {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|e| crate::Error::InvalidInput(format!("invalid recipient '{}': {}", s, e)))?;
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            crate::Error::InvalidInput(format!("invalid recipient '{}': expected 32 bytes", s))
        })?;
        Ok(Self::from_bytes(bytes))
    }
}

impl Serialize for Recipient {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A private X25519 key. Zeroized on drop.
pub struct Identity {
    secret: StaticSecret,
}

impl Identity {
    /// Generate a fresh identity from the OS random source.
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    /// Parse key file contents: `#` lines are comments, the first other
    /// line is the base64 private key.
    pub fn parse(contents: &str) -> Result<Self, DecryptError> {
        let line = contents
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .ok_or_else(|| {
                DecryptError::new(DecryptReason::KeyMismatch, "key file contains no key")
            })?;

        let decoded = Zeroizing::new(STANDARD.decode(line).map_err(|_| {
            DecryptError::new(DecryptReason::KeyMismatch, "key file is not valid base64")
        })?);
        if decoded.len() != KEY_LEN {
            return Err(DecryptError::new(
                DecryptReason::KeyMismatch,
                format!("key file holds {} bytes, expected {}", decoded.len(), KEY_LEN),
            ));
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(&decoded);
        Ok(Self::from_bytes(*bytes))
    }

    /// Read and parse a key file.
    pub fn read(path: &Path) -> Result<Self, DecryptError> {
        let contents = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            DecryptError::new(
                DecryptReason::Unreadable,
                format!("cannot read key file {}: {}", path.display(), e),
            )
        })?);
        Self::parse(&contents)
    }

    /// Key file contents for this identity.
    pub fn to_file_contents(&self) -> Zeroizing<String> {
        let secret = Zeroizing::new(STANDARD.encode(self.secret.to_bytes()));
        Zeroizing::new(format!(
            "# fleetseal identity\n# public key: {}\n{}\n",
            self.recipient(),
            secret.as_str()
        ))
    }

    /// The public half.
    pub fn recipient(&self) -> Recipient {
        Recipient(PublicKey::from(&self.secret))
    }

    pub(super) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity(public={})", self.recipient())
    }
}

/// The means to decrypt for one run: a key file or an in-memory identity.
///
/// Consumed by [`super::EnvelopeCodec::open`], so it cannot outlive the
/// single open of a resolution run.
#[derive(Debug)]
pub enum KeyMaterial {
    File(PathBuf),
    Identity(Identity),
}

impl KeyMaterial {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Load the identity, reading the key file if needed.
    pub fn into_identity(self) -> Result<Identity, DecryptError> {
        match self {
            Self::File(path) => Identity::read(&path),
            Self::Identity(identity) => Ok(identity),
        }
    }

    /// Where the material came from, for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Identity(identity) => format!("identity {}", identity.recipient().fingerprint()),
        }
    }
}

impl From<Identity> for KeyMaterial {
    fn from(identity: Identity) -> Self {
        Self::Identity(identity)
    }
}
