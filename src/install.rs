//! Writes resolved values to the runtime directory.
//!
//! Each key becomes one file named after its kebab-case runtime name. Files
//! are written to a temp file in the same directory and renamed into place,
//! so a reader never sees a partial value.

use crate::engine::{ReportStatus, ResolutionReport};
use crate::keys::{ConfigKey, KeyTable};
use crate::providers::SourceKind;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Required permissions for the runtime directory (Unix: owner only).
#[cfg(unix)]
pub const RUNTIME_DIR_MODE: u32 = 0o700;

/// Required permissions for runtime files (Unix: owner read/write only).
#[cfg(unix)]
pub const RUNTIME_FILE_MODE: u32 = 0o600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledFile {
    pub key: ConfigKey,
    pub path: PathBuf,
    pub source: SourceKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub target: String,
    pub status: ReportStatus,
    pub runtime_dir: PathBuf,
    pub files: Vec<InstalledFile>,
}

impl InstallOutcome {
    pub fn placeholder_keys(&self) -> Vec<&ConfigKey> {
        self.files
            .iter()
            .filter(|f| f.source == SourceKind::Placeholder)
            .map(|f| &f.key)
            .collect()
    }
}

pub struct RuntimeInstaller {
    dir: PathBuf,
    table: KeyTable,
}

impl RuntimeInstaller {
    pub fn new(dir: impl Into<PathBuf>, table: KeyTable) -> Self {
        Self {
            dir: dir.into(),
            table,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Runtime path for a key.
    pub fn path_for(&self, key: &ConfigKey) -> PathBuf {
        let name = self
            .table
            .get(key)
            .map(|spec| spec.file_name.clone())
            .unwrap_or_else(|| key.file_name());
        self.dir.join(name)
    }

    /// Install every value in the report. A corrupted report is refused
    /// before anything touches the disk.
    pub fn install(&self, report: ResolutionReport) -> Result<InstallOutcome> {
        if report.status() == ReportStatus::Corrupted {
            return Err(report.into_corrupted_error());
        }

        let target = report.target().to_string();
        let status = report.status();
        let sources: Vec<(ConfigKey, SourceKind)> = report
            .provenance()
            .into_iter()
            .map(|(key, source)| (key.clone(), source))
            .collect();
        let values: BTreeMap<ConfigKey, Zeroizing<String>> = report.into_values()?;

        self.prepare_dir()?;

        let mut files = Vec::with_capacity(sources.len());
        for (key, source) in sources {
            let value = values
                .get(&key)
                .ok_or_else(|| Error::Other(format!("no value for '{}'", key)))?;
            let path = self.path_for(&key);
            self.write_file(&path, value.as_bytes())?;
            tracing::debug!(target_id = %target, key = %key, %source, path = %path.display(), "installed");
            files.push(InstalledFile { key, path, source });
        }

        tracing::info!(target_id = %target, files = files.len(), %status, "runtime secrets installed");

        Ok(InstallOutcome {
            target,
            status,
            runtime_dir: self.dir.clone(),
            files,
        })
    }

    fn prepare_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(RUNTIME_DIR_MODE))?;
        }
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(RUNTIME_FILE_MODE))?;
        }
        tmp.write_all(contents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
