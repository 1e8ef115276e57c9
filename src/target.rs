//! Target isolation.
//!
//! Every resolution is scoped to exactly one target. A [`TargetScope`] is
//! built fresh for each request: it locates the target's artifact and key
//! material, checks the artifact is tagged for that target, and owns a new
//! [`ResolutionEngine`]. Nothing decrypted or any key material is ever shared
//! between scopes, even for the same target.
//!
//! ## Layout
//!
//! - Artifact: `<secrets-dir>/<target>.enc.json`
//! - Key material (first match wins):
//!   1. explicit key file given with the request
//!   2. the file named by the key-file environment variable
//!      (`FLEETSEAL_KEY_FILE` by default)
//!   3. `<keys-dir>/<target>.key`, when a keys directory is configured

use crate::config::{Resolved, ValueSource};
use crate::engine::{ResolutionEngine, ResolutionReport, ResolutionRequest};
use crate::envelope::{EncryptedArtifact, EnvelopeCodec, KeyMaterial};
use crate::keys::{ConfigKey, KeyTable};
use crate::providers::{
    EncryptedStoreProvider, EnvSnapshot, EnvironmentProvider, PlaceholderProvider,
};
use crate::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File suffix of encrypted artifacts.
pub const ARTIFACT_SUFFIX: &str = ".enc.json";

/// File suffix of per-target key files.
pub const KEY_FILE_SUFFIX: &str = ".key";

/// Default environment variable naming the key file.
pub const DEFAULT_KEY_FILE_ENV: &str = "FLEETSEAL_KEY_FILE";

/// Identifier of one device or environment.
///
/// Non-empty, made of `[A-Za-z0-9._-]`, and not starting with `.`, so it is
/// always safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if valid {
            Ok(Self(id))
        } else {
            Err(Error::InvalidTarget(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TargetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Where a fleet keeps its artifacts and keys, and which keys it knows.
#[derive(Debug, Clone)]
pub struct FleetLayout {
    pub secrets_dir: PathBuf,
    pub keys_dir: Option<PathBuf>,
    pub key_file_env: String,
    pub table: KeyTable,
}

impl FleetLayout {
    pub fn new(secrets_dir: impl Into<PathBuf>, table: KeyTable) -> Self {
        Self {
            secrets_dir: secrets_dir.into(),
            keys_dir: None,
            key_file_env: DEFAULT_KEY_FILE_ENV.to_string(),
            table,
        }
    }

    pub fn with_keys_dir(mut self, keys_dir: impl Into<PathBuf>) -> Self {
        self.keys_dir = Some(keys_dir.into());
        self
    }

    pub fn with_key_file_env(mut self, name: impl Into<String>) -> Self {
        self.key_file_env = name.into();
        self
    }

    pub fn artifact_path(&self, target: &TargetId) -> PathBuf {
        self.secrets_dir
            .join(format!("{}{}", target, ARTIFACT_SUFFIX))
    }

    /// Find the key file for a target, recording where it came from.
    pub fn locate_key_file(
        &self,
        target: &TargetId,
        explicit: Option<&Path>,
        env: &EnvSnapshot,
    ) -> Option<Resolved<PathBuf>> {
        if let Some(path) = explicit {
            return Some(Resolved::new(path.to_path_buf(), ValueSource::CliFlag));
        }
        if let Some(path) = env.get_non_empty(&self.key_file_env) {
            return Some(Resolved::new(
                PathBuf::from(path),
                ValueSource::EnvVar(self.key_file_env.clone()),
            ));
        }
        let keys_dir = self.keys_dir.as_ref()?;
        let path = keys_dir.join(format!("{}{}", target, KEY_FILE_SUFFIX));
        path.is_file()
            .then(|| Resolved::new(path, ValueSource::KeysDir))
    }

    /// Targets with an artifact in the secrets directory, sorted.
    pub fn targets(&self) -> Result<Vec<TargetId>> {
        let entries = match std::fs::read_dir(&self.secrets_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut targets = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(ARTIFACT_SUFFIX) else {
                continue;
            };
            match TargetId::new(stem) {
                Ok(target) => targets.push(target),
                Err(_) => {
                    tracing::warn!(file = %name, "skipping artifact with invalid target name")
                }
            }
        }
        targets.sort();
        Ok(targets)
    }
}

/// Resolves requests against one fleet layout.
///
/// Holds no per-target state: every call builds a new [`TargetScope`].
pub struct FleetResolver {
    layout: FleetLayout,
    codec: Arc<dyn EnvelopeCodec>,
    env: EnvSnapshot,
}

impl FleetResolver {
    pub fn new(layout: FleetLayout, codec: Arc<dyn EnvelopeCodec>, env: EnvSnapshot) -> Self {
        Self { layout, codec, env }
    }

    pub fn layout(&self) -> &FleetLayout {
        &self.layout
    }

    pub fn codec(&self) -> &Arc<dyn EnvelopeCodec> {
        &self.codec
    }

    pub fn env(&self) -> &EnvSnapshot {
        &self.env
    }

    /// Build a request for `target`, locating key material when none is given.
    pub fn request(
        &self,
        target: TargetId,
        keys: Vec<ConfigKey>,
        key_file: Option<&Path>,
    ) -> Result<ResolutionRequest> {
        let key_material = self
            .layout
            .locate_key_file(&target, key_file, &self.env)
            .map(|resolved| {
                tracing::debug!(
                    target_id = %target,
                    path = %resolved.value.display(),
                    source = %resolved.source,
                    "using key file"
                );
                KeyMaterial::File(resolved.value)
            });
        ResolutionRequest::new(target, keys, key_material)
    }

    /// Scope a request to its target.
    pub fn scope(&self, request: ResolutionRequest) -> Result<TargetScope> {
        for key in request.keys() {
            if !self.layout.table.contains(key) {
                return Err(Error::UnknownKey(key.to_string()));
            }
        }
        let (target, keys, key_material) = request.into_parts();
        let path = self.layout.artifact_path(&target);

        let store = match EncryptedArtifact::read(&path) {
            Ok(Some(artifact)) => match self.codec.header(&artifact) {
                Ok(header) if header.target != target.as_str() => {
                    return Err(Error::TargetMismatch {
                        expected: target.to_string(),
                        found: header.target,
                        path,
                    });
                }
                Ok(_) => {
                    EncryptedStoreProvider::new(self.codec.clone(), Some(artifact), key_material)
                }
                Err(e) => EncryptedStoreProvider::failed(self.codec.clone(), e),
            },
            Ok(None) => {
                tracing::debug!(target_id = %target, path = %path.display(), "no artifact");
                EncryptedStoreProvider::new(self.codec.clone(), None, None)
            }
            Err(e) => EncryptedStoreProvider::failed(self.codec.clone(), e),
        };

        let engine = ResolutionEngine::new(
            target.clone(),
            vec![
                Box::new(store),
                Box::new(EnvironmentProvider::new(&self.layout.table, &self.env)),
                Box::new(PlaceholderProvider::new()),
            ],
        );

        Ok(TargetScope {
            target,
            keys,
            engine,
        })
    }

    /// Scope and run a request in one step.
    pub fn resolve(&self, request: ResolutionRequest) -> Result<ResolutionReport> {
        self.scope(request)?.resolve()
    }

    /// Resolve each target independently with its own scope.
    pub fn resolve_fleet(
        &self,
        targets: &[TargetId],
        keys: &[ConfigKey],
        key_file: Option<&Path>,
    ) -> Vec<(TargetId, Result<ResolutionReport>)> {
        targets
            .iter()
            .map(|target| {
                let report = self
                    .request(target.clone(), keys.to_vec(), key_file)
                    .and_then(|request| self.resolve(request));
                (target.clone(), report)
            })
            .collect()
    }
}

/// A resolution bound to one target and one key-material context.
#[derive(Debug)]
pub struct TargetScope {
    target: TargetId,
    keys: Vec<ConfigKey>,
    engine: ResolutionEngine,
}

impl TargetScope {
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn keys(&self) -> &[ConfigKey] {
        &self.keys
    }

    /// Run the scoped engine. Consumes the scope so its cache dies with it.
    pub fn resolve(mut self) -> Result<ResolutionReport> {
        self.engine.resolve(&self.keys)
    }
}
