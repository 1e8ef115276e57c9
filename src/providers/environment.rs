//! Provider backed by environment variables.

use super::{ProviderResult, SourceKind, SourceProvider};
use crate::keys::{ConfigKey, KeyTable};
use std::collections::BTreeMap;

/// A frozen copy of environment variables.
///
/// Resolution reads from a snapshot rather than the live process
/// environment so that one run sees one consistent view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture every UTF-8 variable of the current process.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Like [`get`](Self::get), but blank values count as unset.
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Resolves a key from the variable the key table maps it to.
#[derive(Debug, Clone)]
pub struct EnvironmentProvider {
    values: BTreeMap<ConfigKey, String>,
}

impl EnvironmentProvider {
    /// Take the table's variables out of a snapshot.
    pub fn new(table: &KeyTable, env: &EnvSnapshot) -> Self {
        let values = table
            .iter()
            .filter_map(|(key, spec)| {
                env.get(&spec.env_var)
                    .map(|value| (key.clone(), value.to_string()))
            })
            .collect();
        Self { values }
    }
}

impl SourceProvider for EnvironmentProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Environment
    }

    fn try_resolve(&mut self, key: &ConfigKey) -> ProviderResult {
        match self.values.get(key) {
            Some(value) if !value.is_empty() => {
                ProviderResult::resolved(value.clone(), SourceKind::Environment)
            }
            Some(_) => {
                tracing::debug!(key = %key, "ignoring empty environment override");
                ProviderResult::Unresolved
            }
            None => ProviderResult::Unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn table() -> KeyTable {
        KeyTable::default_table("ROBOT").unwrap()
    }

    fn key(name: &str) -> ConfigKey {
        ConfigKey::new(name).unwrap()
    }

    #[test]
    fn test_resolves_mapped_variable() {
        let env: EnvSnapshot = [("ROBOT_IDENTITY", "rx-7")].into_iter().collect();
        let mut provider = EnvironmentProvider::new(&table(), &env);

        assert_eq!(
            provider.try_resolve(&key("identity")),
            ProviderResult::resolved("rx-7", SourceKind::Environment)
        );
        assert_eq!(
            provider.try_resolve(&key("endpoint")),
            ProviderResult::Unresolved
        );
    }

    #[test]
    fn test_empty_value_is_unresolved() {
        let env: EnvSnapshot = [("ROBOT_ENDPOINT", "")].into_iter().collect();
        let mut provider = EnvironmentProvider::new(&table(), &env);
        assert_eq!(
            provider.try_resolve(&key("endpoint")),
            ProviderResult::Unresolved
        );
    }

    #[test]
    fn test_ignores_unmapped_variables() {
        let env: EnvSnapshot = [("IDENTITY", "nope"), ("robot_identity", "nope")]
            .into_iter()
            .collect();
        let mut provider = EnvironmentProvider::new(&table(), &env);
        assert_eq!(
            provider.try_resolve(&key("identity")),
            ProviderResult::Unresolved
        );
    }

    #[test]
    fn test_snapshot_get_non_empty() {
        let env: EnvSnapshot = [("A", ""), ("B", "x")].into_iter().collect();
        assert_eq!(env.get("A"), Some(""));
        assert_eq!(env.get_non_empty("A"), None);
        assert_eq!(env.get_non_empty("B"), Some("x"));
        assert_eq!(env.get_non_empty("C"), None);
    }

    #[test]
    #[serial]
    fn test_capture_reads_process_environment() {
        // SAFETY: serialized with other tests that touch the environment.
        unsafe {
            std::env::set_var("FLEETSEAL_TEST_CAPTURE", "captured");
        }
        let env = EnvSnapshot::capture();
        unsafe {
            std::env::remove_var("FLEETSEAL_TEST_CAPTURE");
        }

        assert_eq!(env.get("FLEETSEAL_TEST_CAPTURE"), Some("captured"));
        assert_eq!(EnvSnapshot::capture().get("FLEETSEAL_TEST_CAPTURE"), None);
    }
}
