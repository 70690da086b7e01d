//! Configuration for orderflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variable ORDERFLOW_HOME (state directory)
//! 2. Config file (.orderflow/config.yaml)
//! 3. Defaults (~/.orderflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .orderflow/config.yaml
//! - Paths in config file are relative to the project root (the parent of
//!   `.orderflow/`)
//!
//! The core never reads configuration itself; the binary resolves it once
//! and hands plain values to the orchestrator and watchers.

pub mod paths;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::{MessageHeader, OrchestratorConfig};
use crate::ingest::ResponseWatchConfig;

pub const CONFIG_DIR: &str = ".orderflow";
pub const CONFIG_FILE: &str = "config.yaml";
pub const HOME_ENV: &str = "ORDERFLOW_HOME";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub watches: Vec<WatchEntry>,
    #[serde(default)]
    pub hl7: Option<Hl7Config>,
    #[serde(default)]
    pub validate_response_ids: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory
    pub home: Option<String>,
    /// SQLite database file
    pub database: Option<String>,
    /// Directory the interface engine reads outbound messages from
    pub outbound: Option<String>,
    /// Root for captured images
    pub images: Option<String>,
    /// JSONL mirror of the audit journal
    pub audit_journal: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchEntry {
    pub modality: String,
    pub directory: String,
    #[serde(default = "default_response_extension")]
    pub extension: String,
}

fn default_response_extension() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hl7Config {
    pub sending_application: Option<String>,
    pub sending_facility: Option<String>,
    pub receiving_application: Option<String>,
    pub receiving_facility: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub home: PathBuf,
    pub database: PathBuf,
    pub outbound_dir: PathBuf,
    pub images_dir: PathBuf,
    pub audit_journal: Option<PathBuf>,
    pub watches: Vec<ResponseWatchConfig>,
    pub header: MessageHeader,
    pub validate_response_ids: bool,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Defaults rooted at `home`
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            database: paths::database_file(&home),
            outbound_dir: paths::outbound_dir(&home),
            images_dir: paths::images_dir(&home),
            audit_journal: None,
            watches: vec![ResponseWatchConfig::new(
                "CT",
                paths::default_response_dir(&home, "ct"),
                &default_response_extension(),
            )],
            header: MessageHeader::default(),
            validate_response_ids: false,
            config_file: None,
            home,
        }
    }

    /// Values the orchestrator is constructed with
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut config =
            OrchestratorConfig::new(self.outbound_dir.clone(), self.images_dir.clone());
        config.validate_response_ids = self.validate_response_ids;
        config.audit_journal = self.audit_journal.clone();
        config.write_lock = Some(paths::write_lock_file(&self.home));
        config
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Apply a parsed config file on top of defaults
fn resolve(
    config: ConfigFile,
    config_path: &Path,
    env_home: Option<PathBuf>,
) -> Result<ResolvedConfig> {
    // Base directory is the parent of .orderflow/
    let base_dir = config_path
        .parent()
        .and_then(|p| p.parent())
        .unwrap_or(Path::new("."));

    let home = match (env_home, &config.paths.home) {
        (Some(home), _) => home,
        (None, Some(home)) => resolve_path(base_dir, home),
        (None, None) => paths::default_home()?,
    };

    let mut resolved = ResolvedConfig::with_home(home);
    resolved.config_file = Some(config_path.to_path_buf());

    let p = &config.paths;
    if let Some(database) = &p.database {
        resolved.database = resolve_path(base_dir, database);
    }
    if let Some(outbound) = &p.outbound {
        resolved.outbound_dir = resolve_path(base_dir, outbound);
    }
    if let Some(images) = &p.images {
        resolved.images_dir = resolve_path(base_dir, images);
    }
    resolved.audit_journal = p.audit_journal.as_deref().map(|j| resolve_path(base_dir, j));

    if !config.watches.is_empty() {
        resolved.watches = config
            .watches
            .iter()
            .map(|w| {
                ResponseWatchConfig::new(
                    w.modality.clone(),
                    resolve_path(base_dir, &w.directory),
                    &w.extension,
                )
            })
            .collect();
    }

    if let Some(hl7) = config.hl7 {
        let header = &mut resolved.header;
        if let Some(v) = hl7.sending_application {
            header.sending_application = v;
        }
        if let Some(v) = hl7.sending_facility {
            header.sending_facility = v;
        }
        if let Some(v) = hl7.receiving_application {
            header.receiving_application = v;
        }
        if let Some(v) = hl7.receiving_facility {
            header.receiving_facility = v;
        }
    }

    resolved.validate_response_ids = config.validate_response_ids;
    Ok(resolved)
}

/// Load configuration from all sources
pub fn load() -> Result<ResolvedConfig> {
    let env_home = std::env::var(HOME_ENV).ok().map(PathBuf::from);

    match find_config_file() {
        Some(config_path) => load_from(&config_path, env_home),
        None => {
            let home = match env_home {
                Some(home) => home,
                None => paths::default_home()?,
            };
            Ok(ResolvedConfig::with_home(home))
        }
    }
}

/// Load configuration from an explicit file
pub fn load_from(config_path: &Path, env_home: Option<PathBuf>) -> Result<ResolvedConfig> {
    let config = load_config_file(config_path)?;
    resolve(config, config_path, env_home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, body: &str) -> PathBuf {
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", body).unwrap();
        path
    }

    #[test]
    fn test_defaults_rooted_at_home() {
        let config = ResolvedConfig::with_home(PathBuf::from("/srv/orderflow"));
        assert_eq!(config.database, PathBuf::from("/srv/orderflow/orderflow.db"));
        assert_eq!(config.outbound_dir, PathBuf::from("/srv/orderflow/interface/outbound"));
        assert_eq!(config.watches.len(), 1);
        assert_eq!(config.watches[0].modality, "CT");
        assert_eq!(config.watches[0].extension, "json");
        assert!(!config.validate_response_ids);
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  home: ./state
  outbound: /mnt/mirth/in
  audit_journal: ./state/audit.jsonl
watches:
  - modality: CT
    directory: /mnt/mirth/ct
  - modality: DX
    directory: ./dx-out
    extension: xml
hl7:
  sending_application: DASHBOARD
validate_response_ids: true
"#,
        );

        let config = load_from(&path, None).unwrap();
        assert_eq!(config.home, temp.path().join("state"));
        assert_eq!(config.database, temp.path().join("state").join("orderflow.db"));
        assert_eq!(config.outbound_dir, PathBuf::from("/mnt/mirth/in"));
        assert_eq!(config.watches.len(), 2);
        assert_eq!(config.watches[0].extension, "json");
        assert_eq!(config.watches[1].directory, temp.path().join("dx-out"));
        assert_eq!(config.watches[1].extension, "xml");
        assert_eq!(config.header.sending_application, "DASHBOARD");
        assert_eq!(config.header.receiving_application, "RIS");
        assert!(config.validate_response_ids);

        let orchestrator = config.orchestrator_config();
        assert!(orchestrator.validate_response_ids);
        assert_eq!(
            orchestrator.audit_journal,
            Some(temp.path().join("state").join("audit.jsonl"))
        );
        assert_eq!(
            orchestrator.write_lock,
            Some(temp.path().join("state").join("write.lock"))
        );
    }

    #[test]
    fn test_env_home_overrides_file() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "version: \"1.0\"\npaths:\n  home: ./state\n");

        let config = load_from(&path, Some(PathBuf::from("/override"))).unwrap();
        assert_eq!(config.home, PathBuf::from("/override"));
        assert_eq!(config.outbound_dir, PathBuf::from("/override/interface/outbound"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
