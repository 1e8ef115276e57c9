//! Command implementations for the `fseal` CLI.
//!
//! This module contains the business logic for each CLI command. Commands
//! return result types implementing [`CommandResult`]; printing and exit
//! codes are the binary's job.
//!
//! - `resolve` / `check` / `install` - resolution for one or many targets
//! - `seal` / `rotate` / `inspect` - artifact management ([`artifact`])
//! - `keys` / `config` - settings introspection ([`info`])

pub mod artifact;
pub mod info;

pub use artifact::{InspectResult, RotateResult, SealInput, SealResult, inspect, rotate, seal};
pub use info::{ConfigResult, KeysResult, show_config, show_keys};

use crate::audit::{self, AuditEntry};
use crate::config::{ConfigOverrides, Settings, resolve_settings};
use crate::diagnostics;
use crate::engine::{ProviderNote, ReportStatus, ResolutionReport};
use crate::envelope::{EnvelopeCodec, X25519Codec};
use crate::install::{InstallOutcome, RuntimeInstaller};
use crate::keys::ConfigKey;
use crate::providers::{EnvSnapshot, ProviderResult, SourceKind};
use crate::target::{FleetResolver, TargetId};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait CommandResult {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;

    /// Warnings for stderr, printed after the result.
    fn warnings(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Shown instead of secret values unless `--show-values` is given.
pub const REDACTED: &str = "<redacted>";

/// Everything a command needs: resolved settings, an environment snapshot
/// and the codec.
pub struct Context {
    pub settings: Settings,
    pub env: EnvSnapshot,
    pub codec: Arc<dyn EnvelopeCodec>,
}

impl Context {
    pub fn load(project_dir: &Path, overrides: &ConfigOverrides, env: EnvSnapshot) -> Result<Self> {
        let settings = resolve_settings(project_dir, overrides, &env)?;
        Ok(Self {
            settings,
            env,
            codec: Arc::new(X25519Codec::new()),
        })
    }

    pub fn resolver(&self) -> FleetResolver {
        FleetResolver::new(self.settings.layout(), self.codec.clone(), self.env.clone())
    }

    /// Requested keys, or the whole table when none are named.
    pub fn select_keys(&self, names: &[String]) -> Result<Vec<ConfigKey>> {
        if names.is_empty() {
            Ok(self.settings.key_table().keys().cloned().collect())
        } else {
            self.settings.key_table().select(names)
        }
    }

    fn audit_report(&self, command: &str, report: &ResolutionReport) {
        if let Some(log) = &self.settings.audit_log {
            audit::record(&log.value, &AuditEntry::from_report(command, report, &self.env));
        }
    }

    fn audit_failure(&self, command: &str, target: &str, error: &Error) {
        if let Some(log) = &self.settings.audit_log {
            audit::record(&log.value, &AuditEntry::failure(command, target, error, &self.env));
        }
    }

    /// Resolve one target and audit the outcome, success or not.
    fn resolve_audited(
        &self,
        command: &str,
        target: &str,
        keys: &[String],
        key_file: Option<&Path>,
    ) -> Result<ResolutionReport> {
        let run = || -> Result<ResolutionReport> {
            let target = TargetId::new(target)?;
            let keys = self.select_keys(keys)?;
            let resolver = self.resolver();
            resolver.resolve(resolver.request(target, keys, key_file)?)
        };
        match run() {
            Ok(report) => {
                self.audit_report(command, &report);
                Ok(report)
            }
            Err(e) => {
                self.audit_failure(command, target, &e);
                Err(e)
            }
        }
    }

    fn placeholder_warnings(&self, target: &str, keys: &[&ConfigKey]) -> Vec<String> {
        keys.iter()
            .map(|key| {
                diagnostics::placeholder_warning(
                    target,
                    key.as_str(),
                    self.settings.key_table().env_var(key),
                )
            })
            .collect()
    }
}

// === resolve ===

#[derive(Debug, Serialize)]
pub struct ResolvedValue {
    pub source: SourceKind,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct ResolveResult {
    pub target: String,
    pub status: ReportStatus,
    pub values: BTreeMap<String, ResolvedValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<ProviderNote>,
    #[serde(skip)]
    warnings: Vec<String>,
}

impl CommandResult for ResolveResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("{}: {}", self.target, self.status)];
        let width = self.values.keys().map(String::len).max().unwrap_or(0);
        for (key, resolved) in &self.values {
            lines.push(format!(
                "  {:width$}  {:15}  {}",
                key,
                resolved.source.as_str(),
                resolved.value,
                width = width
            ));
        }
        for note in &self.notes {
            lines.push(format!("  note: {}: {}", note.source, note.detail));
        }
        lines.join("\n")
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.clone()
    }
}

/// Resolve one target. Values from the store and the environment are
/// redacted unless `show_values` is set. A corrupted report is an error.
pub fn resolve(
    ctx: &Context,
    target: &str,
    keys: &[String],
    key_file: Option<&Path>,
    show_values: bool,
) -> Result<ResolveResult> {
    let report = ctx.resolve_audited("resolve", target, keys, key_file)?;
    if report.status() == ReportStatus::Corrupted {
        return Err(report.into_corrupted_error());
    }

    let warnings = ctx.placeholder_warnings(target, &report.placeholder_keys());
    let mut values = BTreeMap::new();
    for (key, result) in report.results() {
        if let ProviderResult::Resolved { value, source } = result {
            let shown = if show_values || *source == SourceKind::Placeholder {
                value.clone()
            } else {
                REDACTED.to_string()
            };
            values.insert(
                key.to_string(),
                ResolvedValue {
                    source: *source,
                    value: shown,
                },
            );
        }
    }

    Ok(ResolveResult {
        target: report.target().to_string(),
        status: report.status(),
        values,
        notes: report.notes().to_vec(),
        warnings,
    })
}

// === check ===

#[derive(Debug, Serialize)]
pub struct TargetCheck {
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReportStatus>,
    pub sources: BTreeMap<String, SourceKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub placeholders: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub strict: bool,
    pub targets: Vec<TargetCheck>,
    #[serde(skip)]
    warnings: Vec<String>,
    #[serde(skip)]
    errors: Vec<Error>,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors that make the check fail, in target order.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }
}

impl CommandResult for CheckResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Complete targets print nothing.
    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        for check in &self.targets {
            match (&check.status, &check.error) {
                (Some(ReportStatus::Complete), None) => {}
                (Some(status), _) => {
                    let mut line = format!("{}: {}", check.target, status);
                    if !check.placeholders.is_empty() {
                        line.push_str(&format!(" (placeholders: {})", check.placeholders.join(", ")));
                    }
                    if !check.unresolved.is_empty() {
                        line.push_str(&format!(" (unresolved: {})", check.unresolved.join(", ")));
                    }
                    lines.push(line);
                }
                (None, Some(error)) => lines.push(format!("{}: error: {}", check.target, error)),
                (None, None) => {}
            }
        }
        lines.join("\n")
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.clone()
    }
}

/// Check one or many targets. Corrupted targets and hard errors fail the
/// check; degraded targets only warn unless `strict` is set.
pub fn check(
    ctx: &Context,
    targets: &[String],
    all: bool,
    keys: &[String],
    key_file: Option<&Path>,
    strict: bool,
) -> Result<CheckResult> {
    let mut names: Vec<String> = targets.to_vec();
    if all {
        for target in ctx.settings.layout().targets()? {
            if !names.iter().any(|n| n == target.as_str()) {
                names.push(target.to_string());
            }
        }
    }
    if names.is_empty() {
        return Err(Error::InvalidInput(
            "no targets to check; name targets or pass --all".to_string(),
        ));
    }

    let mut result = CheckResult {
        strict,
        targets: Vec::with_capacity(names.len()),
        warnings: Vec::new(),
        errors: Vec::new(),
    };

    for name in &names {
        match ctx.resolve_audited("check", name, keys, key_file) {
            Ok(report) => {
                let placeholders = report.placeholder_keys();
                result
                    .warnings
                    .extend(ctx.placeholder_warnings(name, &placeholders));
                let check = TargetCheck {
                    target: name.clone(),
                    status: Some(report.status()),
                    sources: report
                        .provenance()
                        .into_iter()
                        .map(|(k, s)| (k.to_string(), s))
                        .collect(),
                    placeholders: placeholders.iter().map(|k| k.to_string()).collect(),
                    unresolved: report.unresolved().iter().map(|k| k.to_string()).collect(),
                    error: None,
                };
                match report.status() {
                    ReportStatus::Corrupted => result.errors.push(report.into_corrupted_error()),
                    ReportStatus::Degraded if strict => result.errors.push(Error::Degraded {
                        target: name.clone(),
                        keys: check.placeholders.clone(),
                    }),
                    _ => {}
                }
                result.targets.push(check);
            }
            Err(e) => {
                result.targets.push(TargetCheck {
                    target: name.clone(),
                    status: None,
                    sources: BTreeMap::new(),
                    placeholders: Vec::new(),
                    unresolved: Vec::new(),
                    error: Some(e.to_string()),
                });
                result.errors.push(e);
            }
        }
    }

    Ok(result)
}

// === install ===

#[derive(Debug, Serialize)]
pub struct InstallResult {
    #[serde(flatten)]
    pub outcome: InstallOutcome,
    #[serde(skip)]
    warnings: Vec<String>,
}

impl CommandResult for InstallResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Installed {} key(s) for {} into {} ({})",
            self.outcome.files.len(),
            self.outcome.target,
            self.outcome.runtime_dir.display(),
            self.outcome.status
        )];
        for file in &self.outcome.files {
            lines.push(format!("  {} <- {}", file.path.display(), file.source));
        }
        lines.join("\n")
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.clone()
    }
}

/// Resolve a target and write its values to the runtime directory.
pub fn install(
    ctx: &Context,
    target: &str,
    keys: &[String],
    key_file: Option<&Path>,
) -> Result<InstallResult> {
    let report = ctx.resolve_audited("install", target, keys, key_file)?;
    let installer = RuntimeInstaller::new(
        ctx.settings.runtime_dir.value.clone(),
        ctx.settings.key_table().clone(),
    );
    let outcome = installer.install(report)?;
    let warnings = ctx.placeholder_warnings(target, &outcome.placeholder_keys());
    Ok(InstallResult { outcome, warnings })
}
