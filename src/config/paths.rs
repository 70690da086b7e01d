//! Canonical paths and directory provisioning.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! ## Layout under the state home
//!
//! | Location | Owner | Purpose |
//! |----------|-------|---------|
//! | `orderflow.db` | orderflow | Patients, orders, images, audit |
//! | `orderflow.lock` | `serve` | Single watcher process |
//! | `write.lock` | every command | Cross-process write gate |
//! | `interface/outbound/` | orderflow → engine | `<orderId>.hl7` messages |
//! | `interface/<modality>/out/` | engine → orderflow | Response files |
//! | `images/<modality>/` | capture | Image path convention |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::ResolvedConfig;

/// Sub-area for response files an operator has handled
pub const PROCESSED_DIR: &str = "processed";

/// Sub-area for response files an operator has rejected
pub const ERROR_DIR: &str = "error";

/// Default state home (~/.orderflow)
pub fn default_home() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".orderflow"))
}

pub fn database_file(home: &Path) -> PathBuf {
    home.join("orderflow.db")
}

pub fn lock_file(home: &Path) -> PathBuf {
    home.join("orderflow.lock")
}

/// Held by every state-changing command, across processes
pub fn write_lock_file(home: &Path) -> PathBuf {
    home.join("write.lock")
}

pub fn outbound_dir(home: &Path) -> PathBuf {
    home.join("interface").join("outbound")
}

pub fn images_dir(home: &Path) -> PathBuf {
    home.join("images")
}

pub fn default_response_dir(home: &Path, modality: &str) -> PathBuf {
    home.join("interface").join(modality).join("out")
}

/// Create every directory the orchestrator and watchers need.
///
/// Must run before any watcher attaches; a watcher on a missing directory
/// fails at startup.
pub fn provision_directories(config: &ResolvedConfig) -> Result<Vec<PathBuf>> {
    let mut dirs = vec![
        config.home.clone(),
        config.outbound_dir.clone(),
        config.images_dir.clone(),
    ];
    if let Some(parent) = config.database.parent() {
        dirs.push(parent.to_path_buf());
    }
    for watch in &config.watches {
        dirs.push(watch.directory.clone());
        dirs.push(watch.directory.join(PROCESSED_DIR));
        dirs.push(watch.directory.join(ERROR_DIR));
    }

    for dir in &dirs {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        tracing::debug!(dir = %dir.display(), "Directory ready");
    }

    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_home_is_dot_orderflow() {
        let home = default_home().unwrap();
        assert!(home.ends_with(".orderflow"));
    }

    #[test]
    fn test_layout_under_home() {
        let home = PathBuf::from("/srv/of");
        assert_eq!(database_file(&home), PathBuf::from("/srv/of/orderflow.db"));
        assert_eq!(lock_file(&home), PathBuf::from("/srv/of/orderflow.lock"));
        assert_eq!(write_lock_file(&home), PathBuf::from("/srv/of/write.lock"));
        assert_eq!(
            default_response_dir(&home, "ct"),
            PathBuf::from("/srv/of/interface/ct/out")
        );
    }

    #[test]
    fn test_provision_creates_watch_sub_areas() {
        let temp = TempDir::new().unwrap();
        let config = ResolvedConfig::with_home(temp.path().join("home"));

        provision_directories(&config).unwrap();

        let watch = &config.watches[0].directory;
        assert!(watch.is_dir());
        assert!(watch.join(PROCESSED_DIR).is_dir());
        assert!(watch.join(ERROR_DIR).is_dir());
        assert!(config.outbound_dir.is_dir());
        assert!(config.images_dir.is_dir());

        // Idempotent
        provision_directories(&config).unwrap();
    }
}
