//! Status command implementation.

use crate::config::{load_config, resolve_db_path};
use crate::error::{Error, Result};
use crate::storage::StoreCounts;
use crate::storage::events::Event;
use serde::Serialize;
use std::path::PathBuf;

/// Output for status command.
#[derive(Serialize)]
struct StatusOutput {
    database: PathBuf,
    counts: StoreCounts,
    recent_events: Vec<Event>,
}

/// Execute status command.
///
/// # Errors
///
/// Returns [`Error::NotInitialized`] if there is no database.
pub fn execute(
    db_path: Option<&PathBuf>,
    config_path: Option<&PathBuf>,
    events: u32,
    json: bool,
) -> Result<()> {
    let config = load_config(super::as_path(config_path))?;
    let store = super::open_store(db_path, None, &config)?;
    let database = resolve_db_path(super::as_path(db_path)).ok_or(Error::NotInitialized)?;
    let counts = store.counts()?;
    let recent_events = store.recent_events(events)?;

    if json {
        let output = StatusOutput {
            database,
            counts,
            recent_events,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("press-sync status");
    println!("=================");
    println!();
    println!("Database: {}", database.display());
    println!();
    println!("  Posts:      {}", counts.posts);
    println!("  Categories: {}", counts.categories);
    println!("  Media:      {}", counts.media);
    println!("  Events:     {}", counts.events);

    if !recent_events.is_empty() {
        println!();
        println!("Recent activity:");
        for event in &recent_events {
            let when = chrono::DateTime::from_timestamp_millis(event.created_at)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!(
                "  {when}  {:<18} {:<8} {} ({})",
                event.event_type.as_str(),
                event.entity_type,
                event.entity_id,
                event.actor
            );
        }
    }
    Ok(())
}
