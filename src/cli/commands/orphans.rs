//! Orphans command: list deletion candidates without touching anything.

use crate::config::load_config;
use crate::error::Result;
use crate::reconcile::{OrphanReason, find_orphans};
use crate::storage::LiveSnapshot;
use colored::Colorize;
use std::path::PathBuf;

/// Execute the orphans command.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read.
pub fn execute(
    protect: &[String],
    db_path: Option<&PathBuf>,
    config_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let config = load_config(super::as_path(config_path))?;
    let store = super::open_store(db_path, None, &config)?;
    let snapshot = LiveSnapshot::fetch(&store)?;
    let scan = find_orphans(&snapshot, &super::protected_categories(&config, protect));

    if json {
        println!("{}", serde_json::to_string(&scan)?);
        return Ok(());
    }

    if scan.candidates.is_empty() {
        println!("No orphan candidates.");
    } else {
        println!(
            "{}",
            format!("Orphan candidates ({})", scan.candidates.len()).bold()
        );
        for candidate in &scan.candidates {
            let reason = match candidate.reason {
                OrphanReason::Duplicate => "duplicate".yellow(),
                OrphanReason::Unreferenced => "unreferenced".normal(),
                OrphanReason::NotInSource => "not in source".dimmed(),
            };
            let kept = candidate
                .kept
                .as_ref()
                .map(|k| format!(" -> keep {k}"))
                .unwrap_or_default();
            println!(
                "  {:<10} {:<22} {} {}{}",
                candidate.collection.as_str().dimmed(),
                candidate.id,
                candidate.label,
                reason,
                kept.dimmed()
            );
        }
        println!();
        println!("Delete with: psync prune --confirm");
    }

    for ambiguity in &scan.ambiguities {
        println!(
            "  {} {}: kept {} over {}",
            "ambiguous".yellow(),
            ambiguity.key,
            ambiguity.kept,
            ambiguity.candidates.join(", ")
        );
    }
    for anomaly in &scan.anomalies {
        println!("  {} {anomaly}", "anomaly".red());
    }
    Ok(())
}
