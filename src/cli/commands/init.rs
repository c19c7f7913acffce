//! Initialize the live store.
//!
//! Creates the SQLite database (schema is applied on open) and writes a
//! default `config.json` if none exists yet.

use crate::config::{SyncConfig, config_file, resolve_db_path, save_config};
use crate::error::{Error, Result};
use crate::storage::SqliteStore;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<PathBuf>,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns [`Error::AlreadyInitialized`] if the database exists and `force`
/// is not set, or an error if files cannot be created.
pub fn execute(
    force: bool,
    db_path: Option<&PathBuf>,
    config_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let db_path = resolve_db_path(super::as_path(db_path))
        .ok_or_else(|| Error::Config("Could not determine database location".to_string()))?;

    if db_path.exists() {
        if !force {
            return Err(Error::AlreadyInitialized { path: db_path });
        }
        fs::remove_file(&db_path)?;
        for suffix in ["-wal", "-shm"] {
            let sidecar = PathBuf::from(format!("{}{suffix}", db_path.display()));
            if sidecar.exists() {
                fs::remove_file(sidecar)?;
            }
        }
    }

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    SqliteStore::open(&db_path)?;

    let config_target = config_file(super::as_path(config_path))?;
    let written = if config_target.exists() {
        None
    } else {
        Some(save_config(&SyncConfig::default(), Some(&config_target))?)
    };

    if json {
        let output = InitOutput {
            database: db_path,
            config: written,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Initialized live store");
        println!("  Database: {}", db_path.display());
        if let Some(path) = written {
            println!("  Config:   {}", path.display());
        }
        println!();
        println!("Next: psync sync <export.xml> --dry-run");
    }
    Ok(())
}
