//! The resolution engine.
//!
//! For each requested key the engine walks its providers in order and keeps
//! the first resolved value. Providers that are unavailable for the run are
//! skipped for every key. A corrupted provider halts the chain: nothing
//! ranked below it is consulted, so damaged data never silently turns into
//! placeholders.

pub mod request;

pub use request::ResolutionRequest;

use crate::envelope::{DecryptError, DecryptReason};
use crate::keys::ConfigKey;
use crate::providers::{ProviderResult, SourceKind, SourceProvider};
use crate::target::TargetId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use zeroize::Zeroizing;

/// Overall outcome of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Every key came from the encrypted store or the environment
    Complete,
    /// At least one key fell back to a placeholder
    Degraded,
    /// The encrypted store is damaged
    Corrupted,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Degraded => "degraded",
            Self::Corrupted => "corrupted",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a provider contributed nothing to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderNote {
    pub source: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DecryptReason>,
    pub detail: String,
}

impl ProviderNote {
    fn from_error(source: SourceKind, error: &DecryptError) -> Self {
        Self {
            source,
            reason: Some(error.reason()),
            detail: error.detail().to_string(),
        }
    }
}

/// The result of one resolution run.
///
/// Holds exactly one entry per requested key. Serializes deterministically.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    target: TargetId,
    status: ReportStatus,
    results: BTreeMap<ConfigKey, ProviderResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    notes: Vec<ProviderNote>,
}

impl ResolutionReport {
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn status(&self) -> ReportStatus {
        self.status
    }

    pub fn results(&self) -> &BTreeMap<ConfigKey, ProviderResult> {
        &self.results
    }

    pub fn get(&self, key: &ConfigKey) -> Option<&ProviderResult> {
        self.results.get(key)
    }

    pub fn notes(&self) -> &[ProviderNote] {
        &self.notes
    }

    /// Where each resolved key came from.
    pub fn provenance(&self) -> BTreeMap<&ConfigKey, SourceKind> {
        self.results
            .iter()
            .filter_map(|(k, r)| r.source().map(|s| (k, s)))
            .collect()
    }

    /// Keys no provider resolved (only non-empty when corrupted).
    pub fn unresolved(&self) -> Vec<&ConfigKey> {
        self.results
            .iter()
            .filter(|(_, r)| !r.is_resolved())
            .map(|(k, _)| k)
            .collect()
    }

    /// Keys that fell back to placeholder tokens.
    pub fn placeholder_keys(&self) -> Vec<&ConfigKey> {
        self.keys_from(SourceKind::Placeholder)
    }

    pub fn keys_from(&self, source: SourceKind) -> Vec<&ConfigKey> {
        self.results
            .iter()
            .filter(|(_, r)| r.source() == Some(source))
            .map(|(k, _)| k)
            .collect()
    }

    /// The corruption note, if the report is corrupted.
    pub fn corruption(&self) -> Option<&ProviderNote> {
        self.notes
            .iter()
            .find(|n| n.reason == Some(DecryptReason::Malformed))
    }

    /// Consume the report, yielding resolved values. Each value is wiped
    /// when dropped.
    ///
    /// Fails for corrupted reports so damaged data is never handed out.
    pub fn into_values(self) -> Result<BTreeMap<ConfigKey, Zeroizing<String>>> {
        if self.status == ReportStatus::Corrupted {
            return Err(self.into_corrupted_error());
        }
        let mut values = BTreeMap::new();
        for (key, result) in self.results {
            match result {
                ProviderResult::Resolved { value, .. } => {
                    values.insert(key, Zeroizing::new(value));
                }
                ProviderResult::Unresolved => {
                    return Err(Error::InvariantViolation {
                        target: self.target.to_string(),
                        key: key.to_string(),
                    });
                }
            }
        }
        Ok(values)
    }

    /// The hard error describing a corrupted report.
    pub fn into_corrupted_error(self) -> Error {
        let detail = self
            .corruption()
            .map(|n| n.detail.clone())
            .unwrap_or_default();
        Error::Corrupted {
            target: self.target.to_string(),
            keys: self
                .results
                .iter()
                .filter(|(_, r)| !r.is_resolved())
                .map(|(k, _)| k.to_string())
                .collect(),
            detail,
        }
    }
}

/// Runs providers in precedence order for one target.
///
/// An engine is bound to a single target and owns its providers. It may be
/// reused sequentially; the encrypted store is still opened at most once.
pub struct ResolutionEngine {
    target: TargetId,
    providers: Vec<Box<dyn SourceProvider>>,
}

impl ResolutionEngine {
    /// Build an engine. `providers` is in precedence order, highest first.
    pub fn new(target: TargetId, providers: Vec<Box<dyn SourceProvider>>) -> Self {
        Self { target, providers }
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn resolve(&mut self, keys: &[ConfigKey]) -> Result<ResolutionReport> {
        let mut seen = BTreeSet::new();
        for key in keys {
            if !seen.insert(key) {
                return Err(Error::DuplicateKey(key.to_string()));
            }
        }

        let mut notes = Vec::new();
        let active: Vec<bool> = self
            .providers
            .iter()
            .map(|p| match p.unavailable_reason() {
                Some(reason) => {
                    tracing::debug!(target_id = %self.target, source = %p.kind(), %reason, "provider skipped");
                    notes.push(ProviderNote {
                        source: p.kind(),
                        reason: None,
                        detail: reason,
                    });
                    false
                }
                None => true,
            })
            .collect();

        // Index of a provider whose data turned out to be damaged.
        let mut halted_at: Option<usize> = None;
        let mut results = BTreeMap::new();

        for key in keys {
            let mut outcome = ProviderResult::Unresolved;
            for (index, provider) in self.providers.iter_mut().enumerate() {
                if halted_at.is_some_and(|h| index >= h) {
                    break;
                }
                if !active[index] {
                    continue;
                }
                let result = provider.try_resolve(key);
                if provider.corruption().is_some() {
                    halted_at = Some(index);
                    break;
                }
                if result.is_resolved() {
                    outcome = result;
                    break;
                }
            }

            match outcome.source() {
                Some(SourceKind::Placeholder) => {
                    tracing::debug!(target_id = %self.target, key = %key, "no value configured, using placeholder")
                }
                Some(source) => {
                    tracing::debug!(target_id = %self.target, key = %key, %source, "resolved")
                }
                None if halted_at.is_none() => {
                    return Err(Error::InvariantViolation {
                        target: self.target.to_string(),
                        key: key.to_string(),
                    });
                }
                None => {}
            }
            results.insert(key.clone(), outcome);
        }

        for provider in &self.providers {
            if let Some(e) = provider.corruption().or_else(|| provider.absorbed_failure()) {
                notes.push(ProviderNote::from_error(provider.kind(), e));
            }
        }

        let status = if halted_at.is_some() {
            ReportStatus::Corrupted
        } else if results
            .values()
            .any(|r| r.source() == Some(SourceKind::Placeholder))
        {
            ReportStatus::Degraded
        } else {
            ReportStatus::Complete
        };

        Ok(ResolutionReport {
            target: self.target.clone(),
            status,
            results,
            notes,
        })
    }
}

impl fmt::Debug for ResolutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionEngine")
            .field("target", &self.target)
            .field(
                "providers",
                &self.providers.iter().map(|p| p.kind()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{
        EncryptedArtifact, EnvelopeCodec, Identity, KeyMaterial, SecretMap, X25519Codec,
    };
    use crate::keys::KeyTable;
    use crate::providers::{
        EncryptedStoreProvider, EnvSnapshot, EnvironmentProvider, PlaceholderProvider,
    };
    use std::sync::Arc;

    fn key(name: &str) -> ConfigKey {
        ConfigKey::new(name).unwrap()
    }

    fn target() -> TargetId {
        TargetId::new("rx-7").unwrap()
    }

    fn engine(
        artifact: Option<EncryptedArtifact>,
        key_material: Option<KeyMaterial>,
        env: &[(&str, &str)],
    ) -> ResolutionEngine {
        let table = KeyTable::default_table("ROBOT").unwrap();
        let env: EnvSnapshot = env.iter().copied().collect();
        ResolutionEngine::new(
            target(),
            vec![
                Box::new(EncryptedStoreProvider::new(
                    Arc::new(X25519Codec::new()),
                    artifact,
                    key_material,
                )),
                Box::new(EnvironmentProvider::new(&table, &env)),
                Box::new(PlaceholderProvider::new()),
            ],
        )
    }

    fn sealed(identity: &Identity, pairs: &[(&str, &str)]) -> EncryptedArtifact {
        let map: SecretMap = pairs.iter().copied().collect();
        X25519Codec::new()
            .seal(&map, &[identity.recipient()], "rx-7")
            .unwrap()
    }

    #[test]
    fn test_environment_then_placeholder() {
        let mut engine = engine(None, None, &[("ROBOT_IDENTITY", "rx-7")]);
        let report = engine.resolve(&[key("identity"), key("endpoint")]).unwrap();

        assert_eq!(
            report.get(&key("identity")),
            Some(&ProviderResult::resolved("rx-7", SourceKind::Environment))
        );
        assert_eq!(
            report.get(&key("endpoint")),
            Some(&ProviderResult::resolved("[[endpoint]]", SourceKind::Placeholder))
        );
        assert_eq!(report.status(), ReportStatus::Degraded);
        assert_eq!(report.placeholder_keys(), vec![&key("endpoint")]);
        assert_eq!(report.notes()[0].detail, "no encrypted artifact");
    }

    #[test]
    fn test_all_from_environment_is_complete() {
        let mut engine = engine(
            None,
            None,
            &[("ROBOT_IDENTITY", "rx-7"), ("ROBOT_ENDPOINT", "https://e")],
        );
        let report = engine.resolve(&[key("identity"), key("endpoint")]).unwrap();
        assert_eq!(report.status(), ReportStatus::Complete);
    }

    #[test]
    fn test_encrypted_store_wins_over_environment() {
        let identity = Identity::generate();
        let artifact = sealed(
            &identity,
            &[("identity", "rx-7"), ("endpoint", "https://store")],
        );
        let mut engine = engine(
            Some(artifact),
            Some(identity.into()),
            &[("ROBOT_IDENTITY", "env-id"), ("ROBOT_ENDPOINT", "https://env")],
        );

        let report = engine.resolve(&[key("identity"), key("endpoint")]).unwrap();
        assert_eq!(report.status(), ReportStatus::Complete);
        assert_eq!(
            report.keys_from(SourceKind::EncryptedStore),
            vec![&key("endpoint"), &key("identity")]
        );
        assert_eq!(
            report.get(&key("endpoint")).and_then(|r| r.value()),
            Some("https://store")
        );
        assert!(report.notes().is_empty());
    }

    #[test]
    fn test_partial_store_falls_through_per_key() {
        let identity = Identity::generate();
        let artifact = sealed(&identity, &[("identity", "rx-7")]);
        let mut engine = engine(
            Some(artifact),
            Some(identity.into()),
            &[("ROBOT_ENDPOINT", "https://env")],
        );

        let report = engine
            .resolve(&[key("identity"), key("endpoint"), key("credential")])
            .unwrap();
        assert_eq!(
            report.get(&key("identity")).and_then(|r| r.source()),
            Some(SourceKind::EncryptedStore)
        );
        assert_eq!(
            report.get(&key("endpoint")).and_then(|r| r.source()),
            Some(SourceKind::Environment)
        );
        assert_eq!(
            report.get(&key("credential")).and_then(|r| r.source()),
            Some(SourceKind::Placeholder)
        );
        assert_eq!(report.status(), ReportStatus::Degraded);
    }

    #[test]
    fn test_key_mismatch_is_absorbed() {
        let owner = Identity::generate();
        let artifact = sealed(&owner, &[("identity", "rx-7")]);
        let mut engine = engine(
            Some(artifact),
            Some(Identity::generate().into()),
            &[("ROBOT_IDENTITY", "env-id")],
        );

        let report = engine.resolve(&[key("identity")]).unwrap();
        assert_eq!(report.status(), ReportStatus::Complete);
        assert_eq!(
            report.get(&key("identity")).and_then(|r| r.value()),
            Some("env-id")
        );
        assert_eq!(report.notes().len(), 1);
        assert_eq!(report.notes()[0].reason, Some(DecryptReason::KeyMismatch));
    }

    #[test]
    fn test_malformed_store_is_corrupted_without_placeholders() {
        let mut engine = engine(
            Some(EncryptedArtifact::from_bytes(b"garbage".to_vec())),
            Some(Identity::generate().into()),
            &[("ROBOT_IDENTITY", "env-id")],
        );

        let report = engine.resolve(&[key("identity"), key("endpoint")]).unwrap();
        assert_eq!(report.status(), ReportStatus::Corrupted);
        assert!(report.placeholder_keys().is_empty());
        assert_eq!(report.unresolved(), vec![&key("endpoint"), &key("identity")]);
        assert!(report.corruption().is_some());

        match report.into_values() {
            Err(Error::Corrupted { target, keys, .. }) => {
                assert_eq!(target, "rx-7");
                assert_eq!(keys, vec!["endpoint".to_string(), "identity".to_string()]);
            }
            other => panic!("expected corrupted error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_placeholder_is_invariant_violation() {
        let mut engine = ResolutionEngine::new(
            target(),
            vec![Box::new(EnvironmentProvider::new(
                &KeyTable::default_table("ROBOT").unwrap(),
                &EnvSnapshot::empty(),
            ))],
        );
        let result = engine.resolve(&[key("identity")]);
        assert!(matches!(
            result,
            Err(Error::InvariantViolation { key, .. }) if key == "identity"
        ));
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let env = [("ROBOT_IDENTITY", "rx-7")];
        let forward = engine(None, None, &env)
            .resolve(&[key("identity"), key("endpoint")])
            .unwrap();
        let backward = engine(None, None, &env)
            .resolve(&[key("endpoint"), key("identity")])
            .unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_reused_engine_is_idempotent() {
        let identity = Identity::generate();
        let artifact = sealed(&identity, &[("identity", "rx-7")]);
        let mut engine = engine(Some(artifact), Some(identity.into()), &[]);
        let keys = [key("identity"), key("endpoint")];

        let first = serde_json::to_vec(&engine.resolve(&keys).unwrap()).unwrap();
        let second = serde_json::to_vec(&engine.resolve(&keys).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_report_covers_exactly_requested_keys() {
        let report = engine(None, None, &[])
            .resolve(&[key("credential")])
            .unwrap();
        assert_eq!(
            report.results().keys().collect::<Vec<_>>(),
            vec![&key("credential")]
        );
    }

    #[test]
    fn test_into_values() {
        let values: BTreeMap<ConfigKey, Zeroizing<String>> = engine(None, None, &[("ROBOT_IDENTITY", "rx-7")])
            .resolve(&[key("identity"), key("endpoint")])
            .unwrap()
            .into_values()
            .unwrap();
        assert_eq!(values[&key("identity")].as_str(), "rx-7");
        assert_eq!(values[&key("endpoint")].as_str(), "[[endpoint]]");
    }

    #[test]
    fn test_engine_rejects_duplicate_keys() {
        let result = engine(None, None, &[]).resolve(&[key("identity"), key("identity")]);
        assert!(matches!(result, Err(Error::DuplicateKey(_))));
    }
}
