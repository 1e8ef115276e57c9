//! Last-resort provider producing greppable `[[key]]` tokens.

use super::{ProviderResult, SourceKind, SourceProvider};
use crate::keys::ConfigKey;

#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderProvider;

impl PlaceholderProvider {
    pub fn new() -> Self {
        Self
    }
}

impl SourceProvider for PlaceholderProvider {
    fn kind(&self) -> SourceKind {
        SourceKind::Placeholder
    }

    fn try_resolve(&mut self, key: &ConfigKey) -> ProviderResult {
        ProviderResult::resolved(key.placeholder(), SourceKind::Placeholder)
    }
}
