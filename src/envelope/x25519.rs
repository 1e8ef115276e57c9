//! The bundled envelope format.
//!
//! ```text
//! {
//!   "version": 1,
//!   "target": "rx-7",
//!   "recipients": [
//!     { "recipient": <pk>, "ephemeral": <pk>, "nonce": <12>, "wrapped_key": <48> }
//!   ],
//!   "nonce": <12>,
//!   "payload": <ciphertext>
//! }
//! ```
//!
//! A random 32-byte file key encrypts the JSON payload with
//! ChaCha20-Poly1305, with the target tag as associated data. Each recipient
//! stanza wraps the file key under a key derived with HKDF-SHA256 from an
//! ephemeral X25519 agreement with that recipient.

use super::{
    DecryptError, DecryptReason, EncryptedArtifact, EnvelopeCodec, EnvelopeHeader, KEY_LEN,
    KeyMaterial, Recipient, SealError, SecretMap,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

pub const FORMAT_VERSION: u32 = 1;

const NONCE_LEN: usize = 12;
const WRAP_INFO: &[u8] = b"fleetseal/v1/wrap";
const PAYLOAD_AAD_PREFIX: &str = "fleetseal/v1/payload:";

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireEnvelope {
    version: u32,
    target: String,
    recipients: Vec<WireStanza>,
    nonce: String,
    payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireStanza {
    recipient: String,
    ephemeral: String,
    nonce: String,
    wrapped_key: String,
}

/// Codec for the bundled X25519 + ChaCha20-Poly1305 envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519Codec;

impl X25519Codec {
    pub fn new() -> Self {
        Self
    }

    fn parse(artifact: &EncryptedArtifact) -> Result<WireEnvelope, DecryptError> {
        let envelope: WireEnvelope = serde_json::from_slice(artifact.as_bytes())
            .map_err(|e| DecryptError::malformed(format!("not a fleetseal envelope: {}", e)))?;
        if envelope.version != FORMAT_VERSION {
            return Err(DecryptError::malformed(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }
        if envelope.target.is_empty() {
            return Err(DecryptError::malformed("envelope has no target tag"));
        }
        if envelope.recipients.is_empty() {
            return Err(DecryptError::malformed("envelope has no recipients"));
        }
        Ok(envelope)
    }
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>, DecryptError> {
    STANDARD
        .decode(value)
        .map_err(|_| DecryptError::malformed(format!("field '{}' is not valid base64", field)))
}

fn decode_array<const N: usize>(field: &str, value: &str) -> Result<[u8; N], DecryptError> {
    decode(field, value)?.try_into().map_err(|v: Vec<u8>| {
        DecryptError::malformed(format!(
            "field '{}' has {} bytes, expected {}",
            field,
            v.len(),
            N
        ))
    })
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

fn wrapping_key(
    shared: &[u8; KEY_LEN],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<Zeroizing<[u8; KEY_LEN]>, hkdf::InvalidLength> {
    let mut salt = [0u8; KEY_LEN * 2];
    salt[..KEY_LEN].copy_from_slice(ephemeral.as_bytes());
    salt[KEY_LEN..].copy_from_slice(recipient.as_bytes());

    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    Hkdf::<Sha256>::new(Some(&salt[..]), &shared[..]).expand(WRAP_INFO, &mut okm[..])?;
    Ok(okm)
}

fn payload_aad(target: &str) -> Vec<u8> {
    format!("{}{}", PAYLOAD_AAD_PREFIX, target).into_bytes()
}

impl EnvelopeCodec for X25519Codec {
    fn open(
        &self,
        artifact: &EncryptedArtifact,
        key: KeyMaterial,
    ) -> Result<SecretMap, DecryptError> {
        let envelope = Self::parse(artifact)?;
        let identity = key.into_identity()?;
        let ours = identity.recipient();

        let mut file_key: Option<Zeroizing<[u8; KEY_LEN]>> = None;
        for stanza in &envelope.recipients {
            let recipient: [u8; KEY_LEN] = decode_array("recipient", &stanza.recipient)?;
            if recipient != *ours.as_bytes() {
                continue;
            }

            let ephemeral =
                PublicKey::from(decode_array::<KEY_LEN>("ephemeral", &stanza.ephemeral)?);
            let nonce: [u8; NONCE_LEN] = decode_array("nonce", &stanza.nonce)?;
            let wrapped = decode("wrapped_key", &stanza.wrapped_key)?;

            let shared = identity.secret().diffie_hellman(&ephemeral);
            if !shared.was_contributory() {
                return Err(DecryptError::malformed(
                    "recipient stanza has a degenerate ephemeral key",
                ));
            }
            let wrap_key = wrapping_key(shared.as_bytes(), &ephemeral, ours.as_public_key())
                .map_err(|_| DecryptError::malformed("key derivation failed"))?;
            let unwrapped = Zeroizing::new(
                ChaCha20Poly1305::new(Key::from_slice(&wrap_key[..]))
                    .decrypt(Nonce::from_slice(&nonce), wrapped.as_slice())
                    .map_err(|_| {
                        DecryptError::malformed("recipient stanza failed authentication")
                    })?,
            );
            let mut k = Zeroizing::new([0u8; KEY_LEN]);
            if unwrapped.len() != KEY_LEN {
                return Err(DecryptError::malformed("wrapped file key has the wrong length"));
            }
            k.copy_from_slice(&unwrapped);
            file_key = Some(k);
            break;
        }
        drop(identity);

        let file_key = file_key.ok_or_else(|| {
            DecryptError::new(
                DecryptReason::KeyMismatch,
                format!("key {} is not a recipient of this artifact", ours.fingerprint()),
            )
        })?;

        let nonce: [u8; NONCE_LEN] = decode_array("nonce", &envelope.nonce)?;
        let ciphertext = decode("payload", &envelope.payload)?;
        let aad = payload_aad(&envelope.target);
        let plaintext = Zeroizing::new(
            ChaCha20Poly1305::new(Key::from_slice(&file_key[..]))
                .decrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: &ciphertext[..],
                        aad: &aad,
                    },
                )
                .map_err(|_| DecryptError::malformed("payload failed authentication"))?,
        );

        let entries: BTreeMap<String, String> = serde_json::from_slice(&plaintext[..])
            .map_err(|_| DecryptError::malformed("payload is not a string mapping"))?;
        Ok(entries.into_iter().collect())
    }

    fn seal(
        &self,
        plaintext: &SecretMap,
        recipients: &[Recipient],
        target: &str,
    ) -> Result<EncryptedArtifact, SealError> {
        if recipients.is_empty() {
            return Err(SealError::NoRecipients);
        }
        if target.is_empty() {
            return Err(SealError::EmptyTarget);
        }

        let file_key = Zeroizing::new(random_bytes::<KEY_LEN>());
        let body = Zeroizing::new(serde_json::to_vec(plaintext.as_map())?);
        let nonce = random_bytes::<NONCE_LEN>();
        let aad = payload_aad(target);
        let payload = ChaCha20Poly1305::new(Key::from_slice(&file_key[..]))
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &body[..],
                    aad: &aad,
                },
            )
            .map_err(|e| SealError::Cipher(e.to_string()))?;

        let mut unique: Vec<Recipient> = recipients.to_vec();
        unique.sort();
        unique.dedup();

        let mut stanzas = Vec::with_capacity(unique.len());
        for recipient in &unique {
            let ephemeral = EphemeralSecret::random_from_rng(OsRng);
            let ephemeral_public = PublicKey::from(&ephemeral);
            let shared = ephemeral.diffie_hellman(recipient.as_public_key());
            let wrap_key =
                wrapping_key(shared.as_bytes(), &ephemeral_public, recipient.as_public_key())
                    .map_err(|e| SealError::Cipher(e.to_string()))?;
            let wrap_nonce = random_bytes::<NONCE_LEN>();
            let wrapped = ChaCha20Poly1305::new(Key::from_slice(&wrap_key[..]))
                .encrypt(Nonce::from_slice(&wrap_nonce), &file_key[..])
                .map_err(|e| SealError::Cipher(e.to_string()))?;

            stanzas.push(WireStanza {
                recipient: recipient.to_string(),
                ephemeral: STANDARD.encode(ephemeral_public.as_bytes()),
                nonce: STANDARD.encode(wrap_nonce),
                wrapped_key: STANDARD.encode(wrapped),
            });
        }

        let envelope = WireEnvelope {
            version: FORMAT_VERSION,
            target: target.to_string(),
            recipients: stanzas,
            nonce: STANDARD.encode(nonce),
            payload: STANDARD.encode(payload),
        };
        let mut bytes = serde_json::to_vec_pretty(&envelope)?;
        bytes.push(b'\n');
        Ok(EncryptedArtifact::from_bytes(bytes))
    }

    fn header(&self, artifact: &EncryptedArtifact) -> Result<EnvelopeHeader, DecryptError> {
        let envelope = Self::parse(artifact)?;
        let recipients = envelope
            .recipients
            .iter()
            .map(|s| decode_array::<KEY_LEN>("recipient", &s.recipient).map(Recipient::from_bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EnvelopeHeader {
            version: envelope.version,
            target: envelope.target,
            recipients,
        })
    }
}
