//! Settings introspection: `keys` and `config`.

use super::{CommandResult, Context};
use crate::config::{Resolved, ValueSource};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
pub struct KeyRow {
    pub key: String,
    pub env_var: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the variable is set (non-empty) in this environment
    pub env_set: bool,
}

#[derive(Debug, Serialize)]
pub struct KeysResult {
    pub source: ValueSource,
    pub env_prefix: String,
    pub keys: Vec<KeyRow>,
}

impl CommandResult for KeysResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let width = self.keys.iter().map(|k| k.key.len()).max().unwrap_or(0);
        let env_width = self.keys.iter().map(|k| k.env_var.len()).max().unwrap_or(0);
        let mut lines = vec![format!("{} key(s) (from {})", self.keys.len(), self.source)];
        for row in &self.keys {
            let mut line = format!(
                "  {:width$}  {:env_width$}  {}",
                row.key,
                row.env_var,
                if row.env_set { "set" } else { "-" },
                width = width,
                env_width = env_width
            );
            if let Some(description) = &row.description {
                line.push_str(&format!("  {}", description));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// Document the key table: each key's environment variable and runtime file.
pub fn show_keys(ctx: &Context) -> KeysResult {
    let keys = ctx
        .settings
        .key_table()
        .iter()
        .map(|(key, spec)| KeyRow {
            key: key.to_string(),
            env_var: spec.env_var.clone(),
            file_name: spec.file_name.clone(),
            description: spec.description.clone(),
            env_set: ctx.env.get_non_empty(&spec.env_var).is_some(),
        })
        .collect();
    KeysResult {
        source: ctx.settings.key_table.source.clone(),
        env_prefix: ctx.settings.env_prefix.value.clone(),
        keys,
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigRow {
    pub setting: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ValueSource>,
}

#[derive(Debug, Serialize)]
pub struct ConfigResult {
    pub project_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_config: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_config: Option<PathBuf>,
    pub settings: Vec<ConfigRow>,
}

impl CommandResult for ConfigResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let path_or_none = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        };
        let mut lines = vec![
            format!("project dir:    {}", self.project_dir.display()),
            format!("project config: {}", path_or_none(&self.project_config)),
            format!("system config:  {}", path_or_none(&self.system_config)),
        ];
        let width = self.settings.iter().map(|r| r.setting.len()).max().unwrap_or(0);
        for row in &self.settings {
            match (&row.value, &row.source) {
                (Some(value), Some(source)) => lines.push(format!(
                    "  {:width$}  {}  [{}]",
                    row.setting,
                    value,
                    source,
                    width = width
                )),
                _ => lines.push(format!("  {:width$}  (unset)", row.setting, width = width)),
            }
        }
        lines.join("\n")
    }
}

fn row<T>(setting: &'static str, resolved: Option<&Resolved<T>>, show: impl Fn(&T) -> String) -> ConfigRow {
    ConfigRow {
        setting,
        value: resolved.map(|r| show(&r.value)),
        source: resolved.map(|r| r.source.clone()),
    }
}

/// Print every resolved setting with its source.
pub fn show_config(ctx: &Context) -> ConfigResult {
    let s = &ctx.settings;
    let path = |p: &PathBuf| p.display().to_string();
    ConfigResult {
        project_dir: s.project_dir.clone(),
        project_config: s.files.project.clone(),
        system_config: s.files.system.clone(),
        settings: vec![
            row("secrets-dir", Some(&s.secrets_dir), path),
            row("keys-dir", s.keys_dir.as_ref(), path),
            row("key-file-env", Some(&s.key_file_env), String::clone),
            row("env-prefix", Some(&s.env_prefix), String::clone),
            row("runtime-dir", Some(&s.runtime_dir), path),
            row("audit-log", s.audit_log.as_ref(), path),
            row("recipients", Some(&s.recipients), |r| {
                r.iter()
                    .map(|r| r.fingerprint())
                    .collect::<Vec<_>>()
                    .join(", ")
            }),
            row("keys", Some(&s.key_table), |t| {
                t.keys().map(|k| k.to_string()).collect::<Vec<_>>().join(", ")
            }),
        ],
    }
}
