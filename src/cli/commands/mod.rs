//! Command implementations.

pub mod category;
pub mod completions;
pub mod init;
pub mod orphans;
pub mod prune;
pub mod status;
pub mod sync;
pub mod version;

use std::path::{Path, PathBuf};

use crate::config::{SyncConfig, default_actor, resolve_db_path};
use crate::error::{Error, Result};
use crate::storage::SqliteStore;

/// Open the live store, failing with `NotInitialized` if it does not exist.
///
/// The actor comes from `--actor`, then the config file, then
/// [`default_actor`].
pub(crate) fn open_store(
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    config: &SyncConfig,
) -> Result<SqliteStore> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or(Error::NotInitialized)?;
    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }
    let actor = actor
        .map(str::to_string)
        .or_else(|| config.actor.clone())
        .unwrap_or_else(default_actor);
    Ok(SqliteStore::open(&db_path)?.with_actor(&actor))
}

/// Config-file protected categories plus any given on the command line.
pub(crate) fn protected_categories(config: &SyncConfig, extra: &[String]) -> Vec<String> {
    config
        .protected_categories
        .iter()
        .chain(extra)
        .cloned()
        .collect()
}

pub(crate) fn as_path(path: Option<&PathBuf>) -> Option<&Path> {
    path.map(PathBuf::as_path)
}
