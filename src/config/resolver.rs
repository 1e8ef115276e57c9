//! Precedence resolution for fleet settings.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variables (`FLEETSEAL_SECRETS_DIR` and friends)
//! 3. Project config (`fleetseal.kdl`, or `--config` / `FLEETSEAL_CONFIG`)
//! 4. System config (`~/.config/fleetseal/config.kdl`)
//! 5. Built-in defaults
//!
//! Relative paths are taken relative to the project directory.

use super::schema::FleetConfig;
use crate::envelope::Recipient;
use crate::keys::{ConfigKey, DEFAULT_ENV_PREFIX, KeySpec, KeyTable};
use crate::providers::EnvSnapshot;
use crate::target::{DEFAULT_KEY_FILE_ENV, FleetLayout};
use crate::{Error, Result};
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};

/// Project config file name, looked up in the project directory.
pub const PROJECT_CONFIG_FILE: &str = "fleetseal.kdl";
/// Replaces the project config path.
pub const CONFIG_ENV: &str = "FLEETSEAL_CONFIG";
/// Replaces `~/.config/fleetseal` as the system config directory.
pub const CONFIG_DIR_ENV: &str = "FLEETSEAL_CONFIG_DIR";
pub const SECRETS_DIR_ENV: &str = "FLEETSEAL_SECRETS_DIR";
pub const KEYS_DIR_ENV: &str = "FLEETSEAL_KEYS_DIR";
pub const RUNTIME_DIR_ENV: &str = "FLEETSEAL_RUNTIME_DIR";
pub const AUDIT_LOG_ENV: &str = "FLEETSEAL_AUDIT_LOG";

const DEFAULT_SECRETS_DIR: &str = "secrets";
const DEFAULT_RUNTIME_DIR: &str = "run";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Value from the project config file
    Project,
    /// Value from the system config file
    System,
    /// Found by convention in the keys directory
    KeysDir,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::Project => write!(f, "project"),
            ValueSource::System => write!(f, "system"),
            ValueSource::KeysDir => write!(f, "keys-dir"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// CLI overrides for settings resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub secrets_dir: Option<PathBuf>,
    pub keys_dir: Option<PathBuf>,
    pub runtime_dir: Option<PathBuf>,
    pub audit_log: Option<PathBuf>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_secrets_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.secrets_dir = Some(path.into());
        self
    }

    pub fn with_keys_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.keys_dir = Some(path.into());
        self
    }

    pub fn with_runtime_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.runtime_dir = Some(path.into());
        self
    }

    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = Some(path.into());
        self
    }
}

/// Config files that took part in resolution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigFiles {
    pub project: Option<PathBuf>,
    pub system: Option<PathBuf>,
}

/// Fully resolved settings with source tracking.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub project_dir: PathBuf,
    pub files: ConfigFiles,
    pub secrets_dir: Resolved<PathBuf>,
    pub keys_dir: Option<Resolved<PathBuf>>,
    pub key_file_env: Resolved<String>,
    pub env_prefix: Resolved<String>,
    pub runtime_dir: Resolved<PathBuf>,
    pub audit_log: Option<Resolved<PathBuf>>,
    pub recipients: Resolved<Vec<Recipient>>,
    #[serde(skip)]
    pub key_table: Resolved<KeyTable>,
}

impl Settings {
    /// The artifact/key layout these settings describe.
    pub fn layout(&self) -> FleetLayout {
        let mut layout = FleetLayout::new(self.secrets_dir.value.clone(), self.key_table.value.clone())
            .with_key_file_env(self.key_file_env.value.clone());
        if let Some(keys_dir) = &self.keys_dir {
            layout = layout.with_keys_dir(keys_dir.value.clone());
        }
        layout
    }

    pub fn key_table(&self) -> &KeyTable {
        &self.key_table.value
    }
}

/// Expand `~/` and anchor relative paths at `base`.
pub fn expand_path(base: &Path, raw: &Path) -> PathBuf {
    let expanded = match raw.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => raw.to_path_buf(),
        },
        Err(_) => raw.to_path_buf(),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

/// System config path, honoring `FLEETSEAL_CONFIG_DIR`.
pub fn system_config_path(env: &EnvSnapshot) -> Option<PathBuf> {
    let dir = match env.get_non_empty(CONFIG_DIR_ENV) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::config_dir()?.join("fleetseal"),
    };
    Some(dir.join("config.kdl"))
}

/// Pick the first layer that sets a value.
fn pick<T>(
    cli: Option<T>,
    env: Option<(T, &str)>,
    project: Option<T>,
    system: Option<T>,
) -> Option<Resolved<T>> {
    if let Some(value) = cli {
        return Some(Resolved::new(value, ValueSource::CliFlag));
    }
    if let Some((value, name)) = env {
        return Some(Resolved::new(value, ValueSource::EnvVar(name.to_string())));
    }
    if let Some(value) = project {
        return Some(Resolved::new(value, ValueSource::Project));
    }
    system.map(|value| Resolved::new(value, ValueSource::System))
}

fn build_key_table(config: &FleetConfig, prefix: &str) -> Result<KeyTable> {
    let entries = config
        .keys
        .iter()
        .map(|decl| {
            let key = ConfigKey::new(decl.name.as_str())?;
            let spec = KeySpec {
                env_var: decl.env.clone().unwrap_or_else(|| key.env_var(prefix)),
                file_name: key.file_name(),
                description: decl.description.clone(),
            };
            Ok((key, spec))
        })
        .collect::<Result<Vec<_>>>()?;
    KeyTable::new(entries)
}

fn parse_recipients(raw: &[String]) -> Result<Vec<Recipient>> {
    raw.iter()
        .map(|r| {
            r.parse::<Recipient>()
                .map_err(|e| Error::Config(format!("recipient '{}': {}", r, e)))
        })
        .collect()
}

/// Resolve settings with the full precedence chain.
pub fn resolve_settings(
    project_dir: &Path,
    overrides: &ConfigOverrides,
    env: &EnvSnapshot,
) -> Result<Settings> {
    let mut files = ConfigFiles::default();

    let explicit = overrides
        .config_path
        .clone()
        .or_else(|| env.get_non_empty(CONFIG_ENV).map(PathBuf::from));
    let project = match explicit {
        Some(path) => {
            let path = expand_path(project_dir, &path);
            let config = FleetConfig::load(&path)?.ok_or_else(|| {
                Error::Config(format!("config file not found: {}", path.display()))
            })?;
            files.project = Some(path);
            Some(config)
        }
        None => {
            let path = project_dir.join(PROJECT_CONFIG_FILE);
            let config = FleetConfig::load(&path)?;
            if config.is_some() {
                files.project = Some(path);
            }
            config
        }
    };

    let system = match system_config_path(env) {
        Some(path) => {
            let config = FleetConfig::load(&path)?;
            if config.is_some() {
                files.system = Some(path);
            }
            config
        }
        None => None,
    };

    let project = project.unwrap_or_default();
    let system = system.unwrap_or_default();

    let path_setting = |cli: &Option<PathBuf>,
                        env_name: &'static str,
                        project_value: &Option<String>,
                        system_value: &Option<String>|
     -> Option<Resolved<PathBuf>> {
        pick(
            cli.clone(),
            env.get_non_empty(env_name)
                .map(|v| (PathBuf::from(v), env_name)),
            project_value.as_ref().map(PathBuf::from),
            system_value.as_ref().map(PathBuf::from),
        )
        .map(|r| Resolved::new(expand_path(project_dir, &r.value), r.source))
    };

    let secrets_dir = path_setting(
        &overrides.secrets_dir,
        SECRETS_DIR_ENV,
        &project.secrets_dir,
        &system.secrets_dir,
    )
    .unwrap_or_else(|| {
        Resolved::new(project_dir.join(DEFAULT_SECRETS_DIR), ValueSource::Default)
    });
    let keys_dir = path_setting(
        &overrides.keys_dir,
        KEYS_DIR_ENV,
        &project.keys_dir,
        &system.keys_dir,
    );
    let runtime_dir = path_setting(
        &overrides.runtime_dir,
        RUNTIME_DIR_ENV,
        &project.runtime_dir,
        &system.runtime_dir,
    )
    .unwrap_or_else(|| {
        Resolved::new(project_dir.join(DEFAULT_RUNTIME_DIR), ValueSource::Default)
    });
    let audit_log = path_setting(
        &overrides.audit_log,
        AUDIT_LOG_ENV,
        &project.audit_log,
        &system.audit_log,
    );

    let key_file_env = pick(
        None,
        None,
        project.key_file_env.clone(),
        system.key_file_env.clone(),
    )
    .unwrap_or_else(|| Resolved::new(DEFAULT_KEY_FILE_ENV.to_string(), ValueSource::Default));
    let env_prefix = pick(
        None,
        None,
        project.env_prefix.clone(),
        system.env_prefix.clone(),
    )
    .unwrap_or_else(|| Resolved::new(DEFAULT_ENV_PREFIX.to_string(), ValueSource::Default));

    let recipients = if !project.recipients.is_empty() {
        Resolved::new(parse_recipients(&project.recipients)?, ValueSource::Project)
    } else if !system.recipients.is_empty() {
        Resolved::new(parse_recipients(&system.recipients)?, ValueSource::System)
    } else {
        Resolved::new(Vec::new(), ValueSource::Default)
    };

    let key_table = if !project.keys.is_empty() {
        Resolved::new(
            build_key_table(&project, &env_prefix.value)?,
            ValueSource::Project,
        )
    } else if !system.keys.is_empty() {
        Resolved::new(
            build_key_table(&system, &env_prefix.value)?,
            ValueSource::System,
        )
    } else {
        Resolved::new(
            KeyTable::default_table(&env_prefix.value)?,
            ValueSource::Default,
        )
    };

    Ok(Settings {
        project_dir: project_dir.to_path_buf(),
        files,
        secrets_dir,
        keys_dir,
        key_file_env,
        env_prefix,
        runtime_dir,
        audit_log,
        recipients,
        key_table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Identity;
    use tempfile::TempDir;

    /// Project dir plus an isolated system config dir.
    struct Dirs {
        project: TempDir,
        system: TempDir,
    }

    impl Dirs {
        fn new() -> Self {
            Self {
                project: TempDir::new().unwrap(),
                system: TempDir::new().unwrap(),
            }
        }

        fn env(&self) -> EnvSnapshot {
            let mut env = EnvSnapshot::empty();
            env.set(CONFIG_DIR_ENV, self.system.path().to_string_lossy());
            env
        }

        fn write_project(&self, text: &str) {
            std::fs::write(self.project.path().join(PROJECT_CONFIG_FILE), text).unwrap();
        }

        fn write_system(&self, text: &str) {
            std::fs::write(self.system.path().join("config.kdl"), text).unwrap();
        }

        fn resolve(&self, overrides: &ConfigOverrides, env: &EnvSnapshot) -> Result<Settings> {
            resolve_settings(self.project.path(), overrides, env)
        }
    }

    #[test]
    fn test_defaults() {
        let dirs = Dirs::new();
        let settings = dirs.resolve(&ConfigOverrides::default(), &dirs.env()).unwrap();

        assert_eq!(settings.secrets_dir.value, dirs.project.path().join("secrets"));
        assert_eq!(settings.secrets_dir.source, ValueSource::Default);
        assert!(settings.keys_dir.is_none());
        assert!(settings.audit_log.is_none());
        assert_eq!(settings.key_file_env.value, DEFAULT_KEY_FILE_ENV);
        assert_eq!(settings.env_prefix.value, "ROBOT");
        assert_eq!(settings.runtime_dir.value, dirs.project.path().join("run"));
        assert!(settings.recipients.value.is_empty());
        assert_eq!(settings.key_table.source, ValueSource::Default);
        assert_eq!(settings.key_table().len(), 4);
        assert!(settings.files.project.is_none());
        assert!(settings.files.system.is_none());
    }

    #[test]
    fn test_project_overrides_system() {
        let dirs = Dirs::new();
        dirs.write_system("secrets-dir \"/srv/secrets\"\nruntime-dir \"/run/fleetseal\"\n");
        dirs.write_project("secrets-dir \"vault\"\n");

        let settings = dirs.resolve(&ConfigOverrides::default(), &dirs.env()).unwrap();

        assert_eq!(settings.secrets_dir.value, dirs.project.path().join("vault"));
        assert_eq!(settings.secrets_dir.source, ValueSource::Project);
        assert_eq!(settings.runtime_dir.value, PathBuf::from("/run/fleetseal"));
        assert_eq!(settings.runtime_dir.source, ValueSource::System);
        assert!(settings.files.project.is_some());
        assert!(settings.files.system.is_some());
    }

    #[test]
    fn test_env_overrides_project_and_cli_overrides_env() {
        let dirs = Dirs::new();
        dirs.write_project("keys-dir \"keys\"\n");
        let mut env = dirs.env();
        env.set(KEYS_DIR_ENV, "/etc/fleetseal/keys");

        let settings = dirs.resolve(&ConfigOverrides::default(), &env).unwrap();
        let keys_dir = settings.keys_dir.unwrap();
        assert_eq!(keys_dir.value, PathBuf::from("/etc/fleetseal/keys"));
        assert_eq!(keys_dir.source, ValueSource::EnvVar(KEYS_DIR_ENV.to_string()));

        let overrides = ConfigOverrides::new().with_keys_dir("/tmp/keys");
        let settings = dirs.resolve(&overrides, &env).unwrap();
        let keys_dir = settings.keys_dir.unwrap();
        assert_eq!(keys_dir.value, PathBuf::from("/tmp/keys"));
        assert_eq!(keys_dir.source, ValueSource::CliFlag);
    }

    #[test]
    fn test_explicit_config_path() {
        let dirs = Dirs::new();
        dirs.write_project("secrets-dir \"ignored\"\n");
        let other = dirs.project.path().join("other.kdl");
        std::fs::write(&other, "secrets-dir \"chosen\"\n").unwrap();

        let overrides = ConfigOverrides::new().with_config_path("other.kdl");
        let settings = dirs.resolve(&overrides, &dirs.env()).unwrap();
        assert_eq!(settings.secrets_dir.value, dirs.project.path().join("chosen"));
        assert_eq!(settings.files.project, Some(other));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dirs = Dirs::new();
        let mut env = dirs.env();
        env.set(CONFIG_ENV, "/nonexistent/fleetseal.kdl");
        let err = dirs.resolve(&ConfigOverrides::default(), &env).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("not found")));
    }

    #[test]
    fn test_key_table_from_config() {
        let dirs = Dirs::new();
        dirs.write_project(
            "env-prefix \"BOT\"\nkey \"identity\" env=\"BOT_NAME\"\nkey \"signaling_url\" description=\"Signaling\"\n",
        );

        let settings = dirs.resolve(&ConfigOverrides::default(), &dirs.env()).unwrap();
        let table = settings.key_table();
        assert_eq!(settings.key_table.source, ValueSource::Project);
        assert_eq!(table.len(), 2);
        let identity = ConfigKey::new("identity").unwrap();
        let signaling = ConfigKey::new("signaling_url").unwrap();
        assert_eq!(table.env_var(&identity), Some("BOT_NAME"));
        assert_eq!(table.env_var(&signaling), Some("BOT_SIGNALING_URL"));
        assert_eq!(table.get(&signaling).unwrap().file_name, "signaling-url");
    }

    #[test]
    fn test_recipients_from_config() {
        let dirs = Dirs::new();
        let recipient = Identity::generate().recipient();
        dirs.write_system(&format!("recipient \"{}\"\n", recipient));

        let settings = dirs.resolve(&ConfigOverrides::default(), &dirs.env()).unwrap();
        assert_eq!(settings.recipients.value, vec![recipient]);
        assert_eq!(settings.recipients.source, ValueSource::System);

        dirs.write_project("recipient \"not-a-key\"\n");
        let err = dirs.resolve(&ConfigOverrides::default(), &dirs.env()).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("not-a-key")));
    }

    #[test]
    fn test_layout_reflects_settings() {
        let dirs = Dirs::new();
        dirs.write_project("keys-dir \"keys\"\nkey-file-env \"ROBOT_KEY_FILE\"\n");

        let settings = dirs.resolve(&ConfigOverrides::default(), &dirs.env()).unwrap();
        let layout = settings.layout();
        assert_eq!(layout.secrets_dir, dirs.project.path().join("secrets"));
        assert_eq!(layout.keys_dir, Some(dirs.project.path().join("keys")));
        assert_eq!(layout.key_file_env, "ROBOT_KEY_FILE");
    }

    #[test]
    fn test_expand_path() {
        let base = Path::new("/project");
        assert_eq!(expand_path(base, Path::new("rel")), PathBuf::from("/project/rel"));
        assert_eq!(expand_path(base, Path::new("/abs")), PathBuf::from("/abs"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path(base, Path::new("~/x")), home.join("x"));
        }
    }

    #[test]
    fn test_value_source_display() {
        assert_eq!(ValueSource::CliFlag.to_string(), "cli");
        assert_eq!(
            ValueSource::EnvVar("FLEETSEAL_KEY_FILE".into()).to_string(),
            "env:FLEETSEAL_KEY_FILE"
        );
        assert_eq!(ValueSource::KeysDir.to_string(), "keys-dir");
        assert_eq!(
            serde_json::to_string(&ValueSource::Project).unwrap(),
            "\"project\""
        );
    }
}
