//! Prune command: delete orphan candidates after explicit confirmation.

use crate::cli::PruneArgs;
use crate::config::load_config;
use crate::error::{Error, Result};
use crate::model::Collection;
use crate::reconcile::report::print_report;
use crate::reconcile::{OrphanCandidate, OrphanReason, find_orphans, prune};
use crate::storage::LiveSnapshot;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct PreviewOutput<'a> {
    dry_run: bool,
    candidates: &'a [OrphanCandidate],
}

fn selected(args: &PruneArgs, candidate: &OrphanCandidate) -> bool {
    if args.selects_all() {
        return true;
    }
    match (candidate.collection, candidate.reason) {
        (Collection::Categories, OrphanReason::Unreferenced) => args.categories,
        (Collection::Media, OrphanReason::Unreferenced) => args.media,
        (_, OrphanReason::Duplicate) => args.duplicates,
        _ => false,
    }
}

/// Execute the prune command.
///
/// # Errors
///
/// Returns [`Error::ConfirmationRequired`] without `--confirm` (unless
/// `--dry-run`), or an error if the store cannot be read.
pub fn execute(
    args: &PruneArgs,
    db_path: Option<&PathBuf>,
    config_path: Option<&PathBuf>,
    actor: Option<&str>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(super::as_path(config_path))?;
    let mut store = super::open_store(db_path, actor, &config)?;
    let snapshot = LiveSnapshot::fetch(&store)?;
    let scan = find_orphans(
        &snapshot,
        &super::protected_categories(&config, &args.protect),
    );
    let candidates: Vec<OrphanCandidate> = scan
        .candidates
        .into_iter()
        .filter(|c| selected(args, c))
        .collect();

    if dry_run || !args.confirm {
        if json {
            let output = PreviewOutput {
                dry_run: true,
                candidates: &candidates,
            };
            println!("{}", serde_json::to_string(&output)?);
        } else {
            println!("Would delete {} entities:", candidates.len());
            for c in &candidates {
                println!("  {} {} ({})", c.collection, c.label, c.id);
            }
        }
        if dry_run {
            return Ok(());
        }
        return Err(Error::ConfirmationRequired);
    }

    let report = prune(&mut store, &candidates, args.confirm)?;
    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_report("Prune report", &report);
    }

    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(Error::PartialFailure {
            errors: report.errors.len(),
        })
    }
}
