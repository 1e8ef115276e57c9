//! Audit trail for resolution commands.
//!
//! Each `resolve`, `check` and `install` appends one JSONL line recording
//! which source answered each key. Values are never written. Audit failures
//! are logged as warnings and never fail the command.

use crate::engine::{ReportStatus, ResolutionReport};
use crate::providers::{EnvSnapshot, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Represents a single audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// ISO 8601 timestamp when the command ran
    pub timestamp: DateTime<Utc>,

    pub target: String,

    /// Command name (e.g., "resolve", "install")
    pub command: String,

    /// Report status; absent when the command failed before a report existed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReportStatus>,

    /// Source that answered each resolved key
    pub sources: BTreeMap<String, SourceKind>,

    /// Keys no provider answered (corrupted reports only)
    pub unresolved: Vec<String>,

    /// Error message if the command failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// User who executed the command
    pub user: String,
}

impl AuditEntry {
    /// Entry describing a finished report.
    pub fn from_report(command: &str, report: &ResolutionReport, env: &EnvSnapshot) -> Self {
        Self {
            timestamp: Utc::now(),
            target: report.target().to_string(),
            command: command.to_string(),
            status: Some(report.status()),
            sources: report
                .provenance()
                .into_iter()
                .map(|(key, source)| (key.to_string(), source))
                .collect(),
            unresolved: report.unresolved().iter().map(|k| k.to_string()).collect(),
            error: None,
            user: current_user(env),
        }
    }

    /// Entry for a command that failed before producing a report.
    pub fn failure(command: &str, target: &str, error: &crate::Error, env: &EnvSnapshot) -> Self {
        Self {
            timestamp: Utc::now(),
            target: target.to_string(),
            command: command.to_string(),
            status: None,
            sources: BTreeMap::new(),
            unresolved: Vec::new(),
            error: Some(error.to_string()),
            user: current_user(env),
        }
    }
}

/// Append an entry to the audit log.
///
/// This function never fails: write errors are reported through `tracing`.
pub fn record(path: &Path, entry: &AuditEntry) {
    if let Err(e) = write_entry(path, entry) {
        tracing::warn!(path = %path.display(), error = %e, "failed to write audit log");
    }
}

fn write_entry(path: &Path, entry: &AuditEntry) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", json)?;

    Ok(())
}

/// Read every entry from an audit log. Unparseable lines are skipped.
pub fn read_entries(path: &Path) -> crate::Result<Vec<AuditEntry>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

fn current_user(env: &EnvSnapshot) -> String {
    env.get_non_empty("USER")
        .or_else(|| env.get_non_empty("USERNAME"))
        .unwrap_or("unknown")
        .to_string()
}
