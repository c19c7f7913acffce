//! The reconciliation engine.
//!
//! A run goes export → extract → match → plan → apply → orphan scan, and
//! always ends in a [`SyncReport`]:
//!
//! - [`matcher`] resolves source records against a live snapshot
//! - [`plan`] turns match results into an ordered [`SyncPlan`]
//! - [`apply`] executes the plan in batches with per-operation isolation
//! - [`orphans`] finds unreachable categories and unreferenced media
//! - [`prune`] deletes confirmed orphan candidates (never part of a sync)
//! - [`report`] writes and prints reports
//!
//! Failures before the first mutation are fatal and produce a report with a
//! single `run` error. Everything after that is recorded per operation.

pub mod apply;
pub mod hash;
pub mod matcher;
pub mod orphans;
pub mod plan;
pub mod prune;
pub mod report;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use apply::Applier;
pub use orphans::{OrphanScan, find_orphans};
pub use prune::prune;
pub use types::{
    ApplyPolicy, CancelFlag, MatchOutcome, Operation, OrphanCandidate, OrphanReason, RetryPolicy,
    SyncPlan, SyncReport,
};

use std::collections::HashSet;

use tracing::{error, info, warn};

use crate::blob::{BlobStore, MediaFetcher};
use crate::error::Result;
use crate::extract::{ExtractStats, extract};
use crate::storage::{LiveSnapshot, LiveStore};
use matcher::{LiveIndex, match_records};

/// Per-run settings.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub policy: ApplyPolicy,
    /// Plan and report without mutating anything.
    pub dry_run: bool,
    /// Category titles the orphan pass never flags.
    pub protected_categories: Vec<String>,
}

/// A plan together with the state it was computed from.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub plan: SyncPlan,
    pub snapshot: LiveSnapshot,
    pub stats: ExtractStats,
}

type CompletionHook<'a> = Box<dyn FnMut(&SyncReport) + 'a>;

/// Runs syncs against one live store with injected blob collaborators.
pub struct Reconciler<'a> {
    store: &'a mut dyn LiveStore,
    blobs: &'a mut dyn BlobStore,
    fetcher: &'a dyn MediaFetcher,
    options: SyncOptions,
    cancel: CancelFlag,
    on_complete: Option<CompletionHook<'a>>,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(
        store: &'a mut dyn LiveStore,
        blobs: &'a mut dyn BlobStore,
        fetcher: &'a dyn MediaFetcher,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            blobs,
            fetcher,
            options,
            cancel: CancelFlag::default(),
            on_complete: None,
        }
    }

    /// Share a cancellation flag with the trigger.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Called with the final report of every run.
    #[must_use]
    pub fn on_complete(mut self, hook: impl FnMut(&SyncReport) + 'a) -> Self {
        self.on_complete = Some(Box::new(hook));
        self
    }

    /// Extract, snapshot, match and plan. Touches nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable, the export is malformed
    /// or the plan cannot be built.
    pub fn prepare(&self, raw_export: &[u8]) -> Result<PreparedRun> {
        self.store.ping()?;
        let extraction = extract(raw_export)?;
        info!(
            articles = extraction.stats.articles,
            categories = extraction.stats.categories,
            attachments = extraction.stats.attachments,
            dropped = extraction.stats.dropped(),
            "Export extracted"
        );

        let snapshot = LiveSnapshot::fetch(&*self.store)?;
        let index = LiveIndex::build(&snapshot);
        let matches = match_records(&extraction.records, &index);
        let plan = plan::build_plan(&matches, &snapshot)?;
        info!(
            operations = plan.operations.len(),
            mutations = plan.mutation_count(),
            "Plan ready"
        );

        Ok(PreparedRun {
            plan,
            snapshot,
            stats: extraction.stats,
        })
    }

    /// Run one sync of `raw_export` and return its report.
    pub fn run_sync(&mut self, raw_export: &[u8]) -> SyncReport {
        let mut report = SyncReport::started();
        report.dry_run = self.options.dry_run;

        let report = match self.prepare(raw_export) {
            Ok(prepared) => self.execute(prepared, report),
            Err(e) => {
                error!(error = %e, "Sync aborted before any mutation");
                report.fatal(&e)
            }
        };

        if let Some(hook) = self.on_complete.as_mut() {
            hook(&report);
        }
        report
    }

    fn execute(&mut self, prepared: PreparedRun, mut report: SyncReport) -> SyncReport {
        let PreparedRun {
            plan,
            snapshot,
            stats,
        } = prepared;
        report.extract = Some(stats);

        let after = if self.options.dry_run {
            report.tally(&plan);
            snapshot
        } else {
            Applier::new(
                &mut *self.store,
                &mut *self.blobs,
                self.fetcher,
                self.options.policy,
            )
            .with_cancel(self.cancel.clone())
            .apply(&plan, &mut report);

            match LiveSnapshot::fetch(&*self.store) {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(error = %e, "Could not re-read live state for the orphan scan");
                    report.record_error("orphans", e.to_string());
                    report.orphan_candidates = plan.orphan_candidates;
                    report.ambiguities = plan.ambiguities;
                    return report.finish();
                }
            }
        };

        let scan = find_orphans(&after, &self.options.protected_categories);
        merge_findings(&mut report, plan, scan, &after);
        report.finish()
    }
}

/// Orphan scan results first, then plan findings the scan did not repeat.
fn merge_findings(report: &mut SyncReport, plan: SyncPlan, scan: OrphanScan, live: &LiveSnapshot) {
    let exists: HashSet<&str> = live
        .posts
        .iter()
        .map(|p| p.id.as_str())
        .chain(live.media.iter().map(|m| m.id.as_str()))
        .chain(live.categories.iter().map(|c| c.id.as_str()))
        .collect();

    let mut candidates = scan.candidates;
    let mut seen: HashSet<(crate::model::Collection, String)> = candidates
        .iter()
        .map(|c| (c.collection, c.id.clone()))
        .collect();
    for candidate in plan.orphan_candidates {
        if exists.contains(candidate.id.as_str())
            && seen.insert((candidate.collection, candidate.id.clone()))
        {
            candidates.push(candidate);
        }
    }

    let mut ambiguities = scan.ambiguities;
    for ambiguity in plan.ambiguities {
        if !ambiguities.iter().any(|a| a.key == ambiguity.key) {
            ambiguities.push(ambiguity);
        }
    }

    report.orphan_candidates = candidates;
    report.ambiguities = ambiguities;
    report.anomalies = scan.anomalies;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Collection;
    use crate::storage::{Filter, NewCategory, Payload, SqliteStore};
    use super::testing::{FakeFetcher, MemoryBlobStore, OfflineStore};

    fn export(items: &[String]) -> Vec<u8> {
        format!(
            "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel>\
             <wp:category><wp:cat_name>Har peste Har</wp:cat_name></wp:category>{}</channel></rss>",
            items.concat()
        )
        .into_bytes()
    }

    fn attachment(id: &str, url: &str) -> String {
        format!(
            "<item><wp:post_id>{id}</wp:post_id><wp:post_type>attachment</wp:post_type>\
             <wp:status>inherit</wp:status><wp:attachment_url>{url}</wp:attachment_url></item>"
        )
    }

    fn article(id: &str, slug: &str, title: &str, hero: Option<&str>) -> String {
        let thumb = hero.map_or_else(String::new, |h| {
            format!(
                "<wp:postmeta><wp:meta_key>_thumbnail_id</wp:meta_key>\
                 <wp:meta_value>{h}</wp:meta_value></wp:postmeta>"
            )
        });
        format!(
            "<item><wp:post_id>{id}</wp:post_id><wp:post_type>post</wp:post_type>\
             <wp:status>publish</wp:status><title>{title}</title>\
             <wp:post_name>{slug}</wp:post_name><dc:creator>ana</dc:creator>\
             <wp:post_date>2021-03-04 10:00:00</wp:post_date>\
             <content:encoded><![CDATA[<p>{title}</p>]]></content:encoded>\
             <category domain=\"category\">Har peste Har</category>{thumb}</item>"
        )
    }

    fn run(store: &mut SqliteStore, raw: &[u8], options: SyncOptions) -> SyncReport {
        let mut blobs = MemoryBlobStore::default();
        let fetcher = FakeFetcher::default();
        Reconciler::new(store, &mut blobs, &fetcher, options).run_sync(raw)
    }

    #[test]
    fn test_second_run_is_a_fixed_point() {
        let mut store = SqliteStore::open_memory().unwrap();
        let raw = export(&[
            attachment("77", "https://old.example/uploads/photo.jpg"),
            attachment("78", "https://old.example/uploads/photo-2.jpg"),
            article("1", "first", "First", Some("77")),
            article("2", "second", "Second", Some("78")),
            article("3", "third", "Third", None),
        ]);

        let first = run(&mut store, &raw, SyncOptions::default());
        assert!(first.errors.is_empty(), "{:?}", first.errors);
        // One category, one media (the two attachments share a basename), three posts.
        assert_eq!(first.created, 5);

        let second = run(&mut store, &raw, SyncOptions::default());
        assert!(second.errors.is_empty(), "{:?}", second.errors);
        assert_eq!(second.applied(), 0);
        assert_eq!(second.created + second.updated + second.relinked, 0);
    }

    #[test]
    fn test_encoded_separator_in_attachment_url_converges() {
        let mut store = SqliteStore::open_memory().unwrap();
        let raw = export(&[
            attachment("77", "https://old.example/uploads/a%2Fb-2.jpg"),
            article("1", "first", "First", Some("77")),
        ]);

        let first = run(&mut store, &raw, SyncOptions::default());
        assert!(first.errors.is_empty(), "{:?}", first.errors);
        assert_eq!(first.created, 3);

        for _ in 0..2 {
            let again = run(&mut store, &raw, SyncOptions::default());
            assert!(again.errors.is_empty(), "{:?}", again.errors);
            assert_eq!(again.created + again.updated + again.relinked, 0);
        }
        assert_eq!(store.counts().unwrap().media, 1);
    }

    #[test]
    fn test_existing_category_and_missing_attachment() {
        let mut store = SqliteStore::open_memory().unwrap();
        store
            .create(&Payload::Category(NewCategory {
                title: "Har peste Har".into(),
                slug: "har-peste-har".into(),
                parent: None,
            }))
            .unwrap();
        // Attachment 77 is referenced but not exported.
        let raw = export(&[article("2128", "foo", "Foo", Some("77"))]);

        let report = run(&mut store, &raw, SyncOptions::default());
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.extract.as_ref().unwrap().unresolved_hero_refs, 1);

        let post = store
            .find(Collection::Posts, &Filter::Slug("foo".into()))
            .unwrap()
            .remove(0)
            .into_post()
            .unwrap();
        assert_eq!(post.hero_image, None);
        assert_eq!(post.categories.len(), 1);
    }

    #[test]
    fn test_dry_run_counts_without_writing() {
        let mut store = SqliteStore::open_memory().unwrap();
        let raw = export(&[article("1", "first", "First", None)]);
        let options = SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        };

        let report = run(&mut store, &raw, options);
        assert!(report.dry_run);
        assert_eq!(report.created, 2);
        assert_eq!(store.counts().unwrap().posts, 0);
    }

    #[test]
    fn test_malformed_export_is_fatal() {
        let mut store = SqliteStore::open_memory().unwrap();
        let report = run(&mut store, b"<rss><channel><item>", SyncOptions::default());
        assert_eq!(report.applied(), 0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].identifier, "run");
    }

    #[test]
    fn test_unreachable_store_is_fatal_and_hook_fires() {
        let mut store = OfflineStore;
        let mut blobs = MemoryBlobStore::default();
        let fetcher = FakeFetcher::default();
        let mut seen = Vec::new();
        let report = Reconciler::new(&mut store, &mut blobs, &fetcher, SyncOptions::default())
            .on_complete(|r| seen.push(r.errors.len()))
            .run_sync(&export(&[]));
        assert_eq!(report.errors[0].identifier, "run");
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn test_orphans_reported_after_apply() {
        let mut store = SqliteStore::open_memory().unwrap();
        let stale = store
            .create(&Payload::Category(NewCategory {
                title: "Stale".into(),
                slug: "stale".into(),
                parent: None,
            }))
            .unwrap()
            .id()
            .to_string();
        let raw = export(&[article("1", "first", "First", None)]);

        let report = run(&mut store, &raw, SyncOptions::default());
        let ids: Vec<&str> = report
            .orphan_candidates
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec![stale.as_str()]);
        assert_eq!(report.orphan_candidates[0].reason, OrphanReason::Unreferenced);
    }
}
