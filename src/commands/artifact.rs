//! Artifact management: `seal`, `rotate` and `inspect`.

use super::{CommandResult, Context};
use crate::diagnostics::{self, ErrorCategory};
use crate::envelope::{EncryptedArtifact, KeyMaterial, Recipient, SealError, SecretMap};
use crate::keys::ConfigKey;
use crate::rotation::{RecipientMode, RotationCoordinator, Verification};
use crate::target::TargetId;
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Where seal input comes from.
pub enum SealInput {
    File(PathBuf),
    /// Already-read text, e.g. from stdin
    Text(Zeroizing<String>),
}

impl SealInput {
    fn read(self) -> Result<Zeroizing<String>> {
        match self {
            SealInput::File(path) => Ok(Zeroizing::new(std::fs::read_to_string(path)?)),
            SealInput::Text(text) => Ok(text),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecipientInfo {
    pub fingerprint: String,
    pub public_key: String,
}

impl From<&Recipient> for RecipientInfo {
    fn from(recipient: &Recipient) -> Self {
        Self {
            fingerprint: recipient.fingerprint(),
            public_key: recipient.to_string(),
        }
    }
}

fn parse_recipients(raw: &[String]) -> Result<Vec<Recipient>> {
    raw.iter().map(|r| r.parse::<Recipient>()).collect()
}

/// CLI recipients, falling back to the configured defaults.
fn recipients_or_default(ctx: &Context, raw: &[String]) -> Result<Vec<Recipient>> {
    if raw.is_empty() {
        Ok(ctx.settings.recipients.value.clone())
    } else {
        parse_recipients(raw)
    }
}

fn read_artifact(ctx: &Context, target: &TargetId) -> Result<(PathBuf, EncryptedArtifact)> {
    let path = ctx.settings.layout().artifact_path(target);
    match EncryptedArtifact::read(&path)? {
        Some(artifact) => Ok((path, artifact)),
        None => Err(Error::InvalidInput(format!(
            "no artifact for '{}' at {}",
            target,
            path.display()
        ))),
    }
}

// === seal ===

#[derive(Debug, Serialize)]
pub struct SealResult {
    pub target: String,
    pub path: PathBuf,
    pub keys: Vec<String>,
    pub recipients: Vec<RecipientInfo>,
}

impl CommandResult for SealResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let fingerprints: Vec<&str> = self.recipients.iter().map(|r| r.fingerprint.as_str()).collect();
        format!(
            "Sealed {} key(s) for {} into {}\n  keys: {}\n  recipients: {}",
            self.keys.len(),
            self.target,
            self.path.display(),
            self.keys.join(", "),
            fingerprints.join(", ")
        )
    }
}

/// Parse a flat TOML table of string values into a secret map, checking
/// every key against the key table.
fn parse_seal_input(ctx: &Context, text: &str) -> Result<SecretMap> {
    let table: toml::Table =
        toml::from_str(text).map_err(|e| Error::Toml(describe_toml_error(text, &e)))?;
    if table.is_empty() {
        return Err(Error::InvalidInput("seal input has no keys".to_string()));
    }

    let mut map = SecretMap::new();
    for (name, value) in table {
        let key = ConfigKey::new(name.as_str())?;
        if !ctx.settings.key_table().contains(&key) {
            return Err(Error::UnknownKey(key.to_string()));
        }
        match value {
            toml::Value::String(s) => map.insert(key.as_str(), Zeroizing::new(s).as_str()),
            other => {
                return Err(Error::InvalidInput(format!(
                    "value for '{}' must be a string, got {}",
                    key,
                    other.type_str()
                )));
            }
        }
    }
    Ok(map)
}

/// Position and reason of a TOML error. The parser's own `Display` quotes
/// the offending line, which would put secret values on stderr.
fn describe_toml_error(text: &str, error: &toml::de::Error) -> String {
    let position = error
        .span()
        .and_then(|span| text.get(..span.start))
        .map(|before| {
            let line = before.matches('\n').count() + 1;
            let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
            format!("line {}, column {}: ", line, column)
        })
        .unwrap_or_default();
    format!("{}{}", position, error.message())
}

/// Seal plaintext for a target and write it to the conventional path.
pub fn seal(
    ctx: &Context,
    target: &str,
    input: SealInput,
    recipients: &[String],
    force: bool,
) -> Result<SealResult> {
    let target = TargetId::new(target)?;
    let recipients = recipients_or_default(ctx, recipients)?;
    if recipients.is_empty() {
        return Err(SealError::NoRecipients.into());
    }

    let path = ctx.settings.layout().artifact_path(&target);
    if path.exists() && !force {
        return Err(Error::InvalidInput(format!(
            "{} already exists; pass --force to replace it or use 'fseal rotate'",
            path.display()
        )));
    }

    let text = input.read()?;
    let plaintext = parse_seal_input(ctx, &text)?;
    let artifact = ctx.codec.seal(&plaintext, &recipients, target.as_str())?;
    artifact.write(&path)?;

    tracing::info!(target_id = %target, keys = plaintext.len(), recipients = recipients.len(), "artifact sealed");

    Ok(SealResult {
        target: target.to_string(),
        path,
        keys: plaintext.keys().map(str::to_string).collect(),
        recipients: recipients.iter().map(RecipientInfo::from).collect(),
    })
}

// === rotate ===

#[derive(Debug, Serialize)]
pub struct RotateResult {
    pub target: String,
    pub path: PathBuf,
    pub mode: RecipientMode,
    pub verification: Verification,
    pub key_count: usize,
    pub previous_recipients: Vec<RecipientInfo>,
    pub recipients: Vec<RecipientInfo>,
}

impl CommandResult for RotateResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let fingerprints: Vec<&str> = self.recipients.iter().map(|r| r.fingerprint.as_str()).collect();
        let verified = match self.verification {
            Verification::Verified => "verified",
            Verification::Unverified => "NOT verified",
        };
        format!(
            "Rotated {} ({} key(s), {})\n  recipients: {} -> {}",
            self.target,
            self.key_count,
            verified,
            self.previous_recipients.len(),
            fingerprints.join(", ")
        )
    }

    fn warnings(&self) -> Vec<String> {
        match self.verification {
            Verification::Verified => Vec::new(),
            Verification::Unverified => vec![diagnostics::format_warning(
                ErrorCategory::Rotate,
                &format!("rotated artifact for '{}' was not verified", self.target),
                Some("Pass --verify-key with one of the new keys to prove it opens."),
            )],
        }
    }
}

/// Re-wrap a target's artifact for a new recipient set. The artifact on
/// disk is replaced only after the reseal (and verification, if asked)
/// succeeds.
pub fn rotate(
    ctx: &Context,
    target: &str,
    recipients: &[String],
    union: bool,
    key_file: Option<&Path>,
    verify_key: Option<&Path>,
) -> Result<RotateResult> {
    let target = TargetId::new(target)?;
    let (path, artifact) = read_artifact(ctx, &target)?;
    if let Ok(header) = ctx.codec.header(&artifact) {
        if header.target != target.as_str() {
            return Err(Error::TargetMismatch {
                expected: target.to_string(),
                found: header.target,
                path,
            });
        }
    }

    let old_key = ctx
        .settings
        .layout()
        .locate_key_file(&target, key_file, &ctx.env)
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "no key material for '{}'; pass --key-file or set {}",
                target, ctx.settings.key_file_env.value
            ))
        })?;
    let mode = if union {
        RecipientMode::Union
    } else {
        RecipientMode::Replace
    };
    let new_recipients = recipients_or_default(ctx, recipients)?;

    let outcome = RotationCoordinator::new(ctx.codec.clone()).rotate(
        &artifact,
        KeyMaterial::File(old_key.value),
        &new_recipients,
        mode,
        verify_key.map(KeyMaterial::file),
    )?;
    outcome.artifact.write(&path)?;

    Ok(RotateResult {
        target: outcome.target,
        path,
        mode,
        verification: outcome.verification,
        key_count: outcome.key_count,
        previous_recipients: outcome.previous_recipients.iter().map(RecipientInfo::from).collect(),
        recipients: outcome.recipients.iter().map(RecipientInfo::from).collect(),
    })
}

// === inspect ===

#[derive(Debug, Serialize)]
pub struct InspectResult {
    pub target: String,
    pub path: PathBuf,
    pub size: usize,
    pub version: u32,
    pub tag: String,
    pub tag_matches: bool,
    pub recipients: Vec<RecipientInfo>,
    /// Key names, when key material was available and opened the artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_error: Option<String>,
}

impl CommandResult for InspectResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("{} ({} bytes)", self.path.display(), self.size),
            format!("  version: {}", self.version),
            format!(
                "  target: {}{}",
                self.tag,
                if self.tag_matches { "" } else { " (MISMATCH)" }
            ),
            format!("  recipients: {}", self.recipients.len()),
        ];
        for recipient in &self.recipients {
            lines.push(format!("    {}  {}", recipient.fingerprint, recipient.public_key));
        }
        if let Some(keys) = &self.keys {
            lines.push(format!("  keys: {}", keys.join(", ")));
        }
        if let Some(error) = &self.open_error {
            lines.push(format!("  cannot open: {}", error));
        }
        lines.join("\n")
    }
}

/// Describe an artifact from its cleartext header. When key material is
/// available the key names (never the values) are listed too.
pub fn inspect(ctx: &Context, target: &str, key_file: Option<&Path>) -> Result<InspectResult> {
    let target = TargetId::new(target)?;
    let (path, artifact) = read_artifact(ctx, &target)?;
    let header = ctx.codec.header(&artifact)?;

    let (keys, open_error) = match ctx
        .settings
        .layout()
        .locate_key_file(&target, key_file, &ctx.env)
    {
        Some(key) => match ctx.codec.open(&artifact, KeyMaterial::File(key.value)) {
            Ok(map) => (Some(map.keys().map(str::to_string).collect()), None),
            Err(e) => (None, Some(e.to_string())),
        },
        None => (None, None),
    };

    Ok(InspectResult {
        target: target.to_string(),
        size: artifact.len(),
        version: header.version,
        tag_matches: header.target == target.as_str(),
        tag: header.target,
        recipients: header.recipients.iter().map(RecipientInfo::from).collect(),
        keys,
        open_error,
        path,
    })
}
