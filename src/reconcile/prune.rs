//! Explicit deletion of orphan candidates.
//!
//! Nothing here runs as part of a sync. The caller passes the candidates it
//! wants gone and `confirm = true`; every candidate is checked again against
//! fresh live state before anything is deleted.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{Collection, MediaAsset};
use crate::reconcile::orphans::{Hierarchy, find_orphans, url_in_bodies};
use crate::reconcile::types::{OrphanCandidate, OrphanReason, SyncReport};
use crate::storage::{LiveSnapshot, LiveStore, Patch, PostPatch};

/// Delete the given orphan candidates.
///
/// Candidates that are no longer orphans are skipped. Categories go deepest
/// first. Posts still using a duplicate as hero are moved to the kept asset
/// before the duplicate is deleted. `not_in_source` candidates are never
/// deleted.
///
/// # Errors
///
/// Returns [`Error::ConfirmationRequired`] without `confirm`, or an error if
/// the live state cannot be read. Per-entity failures go into the report.
pub fn prune(
    store: &mut dyn LiveStore,
    candidates: &[OrphanCandidate],
    confirm: bool,
) -> Result<SyncReport> {
    if !confirm {
        return Err(Error::ConfirmationRequired);
    }

    let mut report = SyncReport::started();
    let snapshot = LiveSnapshot::fetch(store)?;
    let fresh = find_orphans(&snapshot, &[]);
    let current: HashMap<(Collection, &str), &OrphanCandidate> = fresh
        .candidates
        .iter()
        .map(|c| ((c.collection, c.id.as_str()), c))
        .collect();

    let mut categories = Vec::new();
    let mut media = Vec::new();
    for candidate in candidates {
        if candidate.reason == OrphanReason::NotInSource {
            debug!(id = %candidate.id, "Skipping advisory not_in_source candidate");
            report.skipped += 1;
            continue;
        }
        let Some(&now) = current.get(&(candidate.collection, candidate.id.as_str())) else {
            info!(id = %candidate.id, label = %candidate.label, "No longer an orphan, keeping");
            report.skipped += 1;
            continue;
        };
        match now.collection {
            Collection::Categories => categories.push(now),
            Collection::Media => media.push(now),
            Collection::Posts => report.skipped += 1,
        }
    }

    let hierarchy = Hierarchy::new(&snapshot.categories);
    categories.sort_by(|a, b| {
        hierarchy
            .depth(&b.id)
            .cmp(&hierarchy.depth(&a.id))
            .then_with(|| a.id.cmp(&b.id))
    });
    for category in categories {
        delete(store, category, &mut report);
    }

    let assets: HashMap<&str, &MediaAsset> =
        snapshot.media.iter().map(|m| (m.id.as_str(), m)).collect();
    for candidate in media {
        if candidate.reason == OrphanReason::Duplicate {
            let url = assets.get(candidate.id.as_str()).map_or("", |m| m.url.as_str());
            if url_in_bodies(url, &snapshot) {
                warn!(id = %candidate.id, "Duplicate still embedded in a post body");
                report.skipped += 1;
                report.record_error(&candidate.label, "still embedded in a post body");
                continue;
            }
            if let Some(kept) = &candidate.kept {
                if !relink_heroes(store, &snapshot, &candidate.id, kept, &mut report) {
                    continue;
                }
            }
        }
        delete(store, candidate, &mut report);
    }

    info!(
        deleted = report.deleted,
        relinked = report.relinked,
        errors = report.errors.len(),
        "Prune complete"
    );
    Ok(report.finish())
}

/// Point every post using `from` as hero at `to`. False if any update failed.
fn relink_heroes(
    store: &mut dyn LiveStore,
    snapshot: &LiveSnapshot,
    from: &str,
    to: &str,
    report: &mut SyncReport,
) -> bool {
    let patch = Patch::Post(PostPatch {
        hero_image: Some(Some(to.to_string())),
        ..PostPatch::default()
    });
    let mut ok = true;
    for post in snapshot
        .posts
        .iter()
        .filter(|p| p.hero_image.as_deref() == Some(from))
    {
        match store.update(Collection::Posts, &post.id, &patch) {
            Ok(_) => {
                debug!(post = %post.slug, from, to, "Hero relinked");
                report.relinked += 1;
            }
            Err(e) => {
                warn!(post = %post.slug, error = %e, "Hero relink failed");
                report.record_error(&post.slug, e.to_string());
                ok = false;
            }
        }
    }
    ok
}

fn delete(store: &mut dyn LiveStore, candidate: &OrphanCandidate, report: &mut SyncReport) {
    match store.delete(candidate.collection, &candidate.id) {
        Ok(()) => {
            info!(collection = %candidate.collection, id = %candidate.id, label = %candidate.label, "Deleted");
            report.deleted += 1;
        }
        Err(e) => {
            warn!(collection = %candidate.collection, id = %candidate.id, error = %e, "Delete failed");
            report.record_error(&candidate.label, e.to_string());
        }
    }
}
