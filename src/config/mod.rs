//! Configuration management.
//!
//! Everything lives under `~/.psync/`:
//! - **Database**: `~/.psync/data/live.db` (override with `--db` or `PSYNC_DB`)
//! - **Config**: `~/.psync/config.json` (optional; defaults when absent)
//! - **Blobs**: `~/.psync/blobs/` unless `blob_dir` is configured
//!
//! CLI flags win over the config file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::reconcile::ApplyPolicy;

/// Contents of `config.json`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Batching and retry behaviour of the applier.
    pub policy: ApplyPolicy,
    /// Category titles the orphan pass never flags.
    pub protected_categories: Vec<String>,
    /// Where uploaded media is written.
    pub blob_dir: Option<PathBuf>,
    /// Public URL prefix for uploaded media.
    pub blob_base_url: Option<String>,
    /// Directory for JSON report artifacts; none means no artifact.
    pub report_dir: Option<PathBuf>,
    /// Actor recorded on audit events.
    pub actor: Option<String>,
    /// Timeout for fetching original media.
    pub fetch_timeout_secs: u64,
    /// Directory non-HTTP attachment URLs may be read from. Unset means
    /// only `http(s)` sources are fetched.
    pub local_media_root: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            policy: ApplyPolicy::default(),
            protected_categories: Vec::new(),
            blob_dir: None,
            blob_base_url: None,
            report_dir: None,
            actor: None,
            fetch_timeout_secs: 30,
            local_media_root: None,
        }
    }
}

impl SyncConfig {
    /// Configured blob directory, or `~/.psync/blobs`.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn blob_dir(&self) -> Result<PathBuf> {
        match &self.blob_dir {
            Some(dir) => Ok(dir.clone()),
            None => global_dir()
                .map(|d| d.join("blobs"))
                .ok_or_else(|| Error::Config("Could not determine home directory".into())),
        }
    }

    /// Configured base URL, or a `file://` URL of the blob directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob directory cannot be resolved.
    pub fn blob_base_url(&self) -> Result<String> {
        match &self.blob_base_url {
            Some(url) => Ok(url.clone()),
            None => Ok(format!("file://{}", self.blob_dir()?.display())),
        }
    }
}

/// The global press-sync directory, `~/.psync`.
#[must_use]
pub fn global_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".psync"))
}

/// Path of the config file: `explicit`, or `~/.psync/config.json`.
///
/// # Errors
///
/// Returns an error if no home directory can be determined.
pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    global_dir()
        .map(|d| d.join("config.json"))
        .ok_or_else(|| Error::Config("Could not determine home directory".into()))
}

/// Load the configuration, falling back to defaults when no file exists.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file exists but cannot be read or parsed.
pub fn load_config(explicit: Option<&Path>) -> Result<SyncConfig> {
    let path = config_file(explicit)?;
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let content = fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {e}", path.display())))
}

/// Write the configuration as pretty JSON, creating the directory if needed.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file cannot be written.
pub fn save_config(config: &SyncConfig, explicit: Option<&Path>) -> Result<PathBuf> {
    let path = config_file(explicit)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;
    fs::write(&path, content)
        .map_err(|e| Error::Config(format!("Failed to write config file: {e}")))?;
    Ok(path)
}

/// Resolve the live database path.
///
/// Priority:
/// 1. `explicit_path` (the `--db` flag)
/// 2. `PSYNC_DB` environment variable
/// 3. `~/.psync/data/live.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }
    if let Ok(db_path) = std::env::var("PSYNC_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }
    global_dir().map(|dir| dir.join("data").join("live.db"))
}

/// Actor name recorded on audit events.
///
/// Priority: `PSYNC_ACTOR`, git `user.name`, `USER`, then `psync`.
#[must_use]
pub fn default_actor() -> String {
    if let Ok(actor) = std::env::var("PSYNC_ACTOR") {
        if !actor.is_empty() {
            return actor;
        }
    }

    if let Ok(output) = std::process::Command::new("git")
        .args(["config", "user.name"])
        .output()
    {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    std::env::var("USER").unwrap_or_else(|_| crate::storage::sqlite::DEFAULT_ACTOR.to_string())
}
