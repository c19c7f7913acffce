//! Executes a [`SyncPlan`] against the live store.
//!
//! Operations run in order, in fixed-size batches. A failing operation is
//! recorded and the run moves on; only operations that consume its result are
//! downgraded to skips. Cancellation is checked between batches.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::blob::{BlobStore, MediaFetcher, content_type_for};
use crate::error::{Error, Result};
use crate::model::{Collection, LiveEntity};
use crate::reconcile::types::{
    ApplyPolicy, CancelFlag, Operation, Planned, PlannedMedia, PlannedOp, Ref, RetryPolicy,
    SyncPlan, SyncReport,
};
use crate::storage::{LiveStore, NewCategory, NewMedia, NewPost, Patch, Payload, PostPatch};

/// What became of each operation so far.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    NotRun,
    Skipped,
    Done(String),
    Failed(String),
}

/// Applies plans with the configured batching and retry policy.
pub struct Applier<'a> {
    store: &'a mut dyn LiveStore,
    blobs: &'a mut dyn BlobStore,
    fetcher: &'a dyn MediaFetcher,
    policy: ApplyPolicy,
    cancel: CancelFlag,
}

impl<'a> Applier<'a> {
    #[must_use]
    pub fn new(
        store: &'a mut dyn LiveStore,
        blobs: &'a mut dyn BlobStore,
        fetcher: &'a dyn MediaFetcher,
        policy: ApplyPolicy,
    ) -> Self {
        Self {
            store,
            blobs,
            fetcher,
            policy,
            cancel: CancelFlag::default(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Apply every operation, accumulating counts and errors into `report`.
    pub fn apply(&mut self, plan: &SyncPlan, report: &mut SyncReport) {
        let total = plan.operations.len();
        let batch_size = self.policy.batch_size.max(1);
        let mut slots = vec![Slot::NotRun; total];

        for (batch_no, batch) in plan.operations.chunks(batch_size).enumerate() {
            let offset = batch_no * batch_size;
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.pending = total - offset;
                warn!(pending = report.pending, "Run cancelled between batches");
                break;
            }
            if batch_no > 0 && self.policy.batch_delay_ms > 0 {
                thread::sleep(Duration::from_millis(self.policy.batch_delay_ms));
            }

            for (i, op) in batch.iter().enumerate() {
                let slot = self.apply_one(op, &slots, report);
                slots[offset + i] = slot;
            }
            debug!(
                batch = batch_no + 1,
                size = batch.len(),
                errors = report.errors.len(),
                "Batch applied"
            );
        }

        info!(
            created = report.created,
            updated = report.updated,
            relinked = report.relinked,
            skipped = report.skipped,
            errors = report.errors.len(),
            "Plan applied"
        );
    }

    fn apply_one(&mut self, op: &PlannedOp, slots: &[Slot], report: &mut SyncReport) -> Slot {
        if let Operation::Skip { reason } = &op.op {
            debug!(identifier = %op.identifier, ?reason, "Skip");
            report.skipped += 1;
            return Slot::Skipped;
        }

        if let Some(failed) = op
            .dependencies()
            .into_iter()
            .find_map(|dep| match slots.get(dep) {
                Some(Slot::Done(_)) => None,
                Some(Slot::Failed(identifier)) => Some(identifier.clone()),
                _ => Some(format!("operation {dep} was not applied")),
            })
        {
            warn!(identifier = %op.identifier, dependency = %failed, "Dependency failed, skipping");
            report.skipped += 1;
            report.record_error(&op.identifier, format!("dependency failed: {failed}"));
            return Slot::Failed(op.identifier.clone());
        }

        match self.execute(op, slots) {
            Ok(entity) => {
                match &op.op {
                    Operation::Create(_) => report.created += 1,
                    Operation::Update { .. } => report.updated += 1,
                    Operation::Relink { .. } => report.relinked += 1,
                    Operation::Skip { .. } => {}
                }
                debug!(identifier = %op.identifier, id = %entity.id(), "Applied");
                Slot::Done(entity.id().to_string())
            }
            Err(e) => {
                warn!(identifier = %op.identifier, collection = %op.collection, error = %e, "Operation failed");
                report.record_error(&op.identifier, e.to_string());
                Slot::Failed(op.identifier.clone())
            }
        }
    }

    fn execute(&mut self, op: &PlannedOp, slots: &[Slot]) -> Result<LiveEntity> {
        let store_policy = self.policy.store;
        let payload = match &op.op {
            Operation::Create(Planned::Category { title, slug }) => {
                Payload::Category(NewCategory {
                    title: title.clone(),
                    slug: slug.clone(),
                    parent: None,
                })
            }
            Operation::Create(Planned::Media(media)) => Payload::Media(self.upload(media)?),
            Operation::Create(Planned::Post(post)) => Payload::Post(NewPost {
                slug: post.slug.clone(),
                title: post.title.clone(),
                body_html: post.body_html.clone(),
                published_at: post.published_at,
                authors: post.authors.clone(),
                categories: resolve_all(&post.categories, slots)?,
                hero_image: post.hero.as_ref().map(|r| resolve(r, slots)).transpose()?,
            }),
            Operation::Update { id, fields } => {
                let patch = Patch::Post(PostPatch {
                    title: Some(fields.title.clone()),
                    body_html: Some(fields.body_html.clone()),
                    categories: Some(resolve_all(&fields.categories, slots)?),
                    hero_image: fields
                        .hero
                        .as_ref()
                        .map(|r| resolve(r, slots).map(Some))
                        .transpose()?,
                });
                return with_retry(store_policy, &op.identifier, || {
                    self.store.update(Collection::Posts, id, &patch)
                });
            }
            Operation::Relink { id, hero } => {
                let patch = Patch::Post(PostPatch {
                    hero_image: Some(Some(resolve(hero, slots)?)),
                    ..PostPatch::default()
                });
                return with_retry(store_policy, &op.identifier, || {
                    self.store.update(Collection::Posts, id, &patch)
                });
            }
            Operation::Skip { .. } => {
                return Err(Error::Other("skip operations are not executed".into()));
            }
        };

        with_retry(store_policy, &op.identifier, || self.store.create(&payload))
    }

    /// Fetch and upload the original file; returns the record to create.
    fn upload(&mut self, media: &PlannedMedia) -> Result<NewMedia> {
        let policy = self.policy.upload;
        let fetcher = self.fetcher;
        let fetched = with_retry(policy, &media.source_url, || fetcher.fetch(&media.source_url))?;

        let content_type = fetched
            .content_type
            .clone()
            .unwrap_or_else(|| content_type_for(&media.filename).to_string());
        let uploaded = with_retry(policy, &media.filename, || {
            self.blobs
                .upload(&fetched.bytes, &content_type, &media.filename)
        })?;

        Ok(NewMedia {
            filename: media.filename.clone(),
            url: uploaded.url,
            width: media.width,
            height: media.height,
            file_size_bytes: media
                .file_size_bytes
                .or_else(|| u64::try_from(fetched.bytes.len()).ok()),
        })
    }
}

fn resolve(reference: &Ref, slots: &[Slot]) -> Result<String> {
    match reference {
        Ref::Existing(id) => Ok(id.clone()),
        Ref::Pending(index) => match slots.get(*index) {
            Some(Slot::Done(id)) => Ok(id.clone()),
            _ => Err(Error::Other(format!("operation {index} has no result"))),
        },
    }
}

fn resolve_all(references: &[Ref], slots: &[Slot]) -> Result<Vec<String>> {
    references.iter().map(|r| resolve(r, slots)).collect()
}

/// Run `call` up to `policy.max_attempts` times, retrying transient errors
/// with linear backoff.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted, or the first
/// non-retryable one.
pub fn with_retry<T>(
    policy: RetryPolicy,
    what: &str,
    mut call: impl FnMut() -> Result<T>,
) -> Result<T> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.is_retryable() => {
                let delay_ms = policy.backoff_ms.saturating_mul(u64::from(attempt));
                warn!(what, attempt, delay_ms, error = %e, "Retrying");
                if delay_ms > 0 {
                    thread::sleep(Duration::from_millis(delay_ms));
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::testing::{FakeFetcher, MemoryBlobStore, ScriptedStore};
    use crate::reconcile::types::{PlannedPost, SkipReason};
    use crate::storage::{Filter, SqliteStore};

    fn category_op(name: &str) -> PlannedOp {
        PlannedOp {
            identifier: name.into(),
            collection: Collection::Categories,
            op: Operation::Create(Planned::Category {
                title: name.into(),
                slug: name.to_lowercase(),
            }),
        }
    }

    fn media_op(url: &str) -> PlannedOp {
        let filename = url.rsplit('/').next().unwrap().to_string();
        PlannedOp {
            identifier: filename.clone(),
            collection: Collection::Media,
            op: Operation::Create(Planned::Media(PlannedMedia {
                source_url: url.into(),
                filename,
                width: Some(800),
                height: Some(600),
                file_size_bytes: None,
            })),
        }
    }

    fn post_op(slug: &str, categories: Vec<Ref>, hero: Option<Ref>) -> PlannedOp {
        PlannedOp {
            identifier: slug.into(),
            collection: Collection::Posts,
            op: Operation::Create(Planned::Post(PlannedPost {
                slug: slug.into(),
                title: slug.into(),
                body_html: String::new(),
                published_at: 0,
                authors: vec![],
                categories,
                hero,
            })),
        }
    }

    fn policy(batch_size: usize) -> ApplyPolicy {
        ApplyPolicy {
            batch_size,
            batch_delay_ms: 0,
            store: RetryPolicy::default(),
            upload: RetryPolicy {
                max_attempts: 3,
                backoff_ms: 0,
            },
        }
    }

    fn plan(operations: Vec<PlannedOp>) -> SyncPlan {
        SyncPlan {
            operations,
            ..SyncPlan::default()
        }
    }

    #[test]
    fn test_single_failure_does_not_stop_the_run() {
        let mut store = ScriptedStore::new(SqliteStore::open_memory().unwrap());
        store.fail_on = Some(5);
        let mut blobs = MemoryBlobStore::default();
        let fetcher = FakeFetcher::default();
        let plan = plan((1..=10).map(|i| category_op(&format!("Cat{i}"))).collect());

        let mut report = SyncReport::started();
        Applier::new(&mut store, &mut blobs, &fetcher, policy(4)).apply(&plan, &mut report);

        assert_eq!(report.created, 9);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].identifier, "Cat5");
        assert_eq!(store.creates_attempted, 10);
        let live = store.find(Collection::Categories, &Filter::All).unwrap();
        assert_eq!(live.len(), 9);
    }

    #[test]
    fn test_failed_upload_downgrades_dependent_post() {
        let mut store = SqliteStore::open_memory().unwrap();
        let mut blobs = MemoryBlobStore::default();
        let fetcher = FakeFetcher::default();
        let plan = plan(vec![
            media_op("https://old.example/missing.jpg"),
            post_op("needs-hero", vec![], Some(Ref::Pending(0))),
            post_op("independent", vec![], None),
        ]);

        let mut report = SyncReport::started();
        Applier::new(&mut store, &mut blobs, &fetcher, policy(25)).apply(&plan, &mut report);

        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[1].identifier, "needs-hero");
        assert!(report.errors[1].message.starts_with("dependency failed"));
        assert!(
            store
                .find(Collection::Posts, &Filter::Slug("needs-hero".into()))
                .unwrap()
                .is_empty()
        );
        // Three fetch attempts for the missing file.
        assert_eq!(fetcher.calls.get(), 3);
    }

    #[test]
    fn test_media_then_post_links_created_ids() {
        let mut store = SqliteStore::open_memory().unwrap();
        let mut blobs = MemoryBlobStore::default();
        let fetcher = FakeFetcher::default();
        fetcher.fail_first.set(1);
        let plan = plan(vec![
            category_op("News"),
            media_op("https://old.example/photo.jpg"),
            post_op("hello", vec![Ref::Pending(0)], Some(Ref::Pending(1))),
        ]);

        let mut report = SyncReport::started();
        Applier::new(&mut store, &mut blobs, &fetcher, policy(25)).apply(&plan, &mut report);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.created, 3);
        assert_eq!(blobs.uploads[0].1, "image/jpeg");

        let post = store
            .find(Collection::Posts, &Filter::Slug("hello".into()))
            .unwrap()
            .remove(0)
            .into_post()
            .unwrap();
        let media = store
            .find(Collection::Media, &Filter::All)
            .unwrap()
            .remove(0)
            .into_media()
            .unwrap();
        assert_eq!(post.hero_image.as_deref(), Some(media.id.as_str()));
        assert_eq!(post.categories.len(), 1);
        assert_eq!(media.url, "https://cdn.example/photo.jpg");
        assert_eq!(media.file_size_bytes, Some(4));
    }

    #[test]
    fn test_cancel_between_batches() {
        let cancel = CancelFlag::new();
        let mut store = ScriptedStore::new(SqliteStore::open_memory().unwrap());
        store.cancel_after = Some((1, cancel.clone()));
        let mut blobs = MemoryBlobStore::default();
        let fetcher = FakeFetcher::default();
        let plan = plan((1..=5).map(|i| category_op(&format!("C{i}"))).collect());

        let mut report = SyncReport::started();
        Applier::new(&mut store, &mut blobs, &fetcher, policy(2))
            .with_cancel(cancel)
            .apply(&plan, &mut report);

        // The batch in flight finishes, the rest is left pending.
        assert!(report.cancelled);
        assert_eq!(report.created, 2);
        assert_eq!(report.pending, 3);
    }

    #[test]
    fn test_skips_are_counted() {
        let mut store = SqliteStore::open_memory().unwrap();
        let mut blobs = MemoryBlobStore::default();
        let fetcher = FakeFetcher::default();
        let plan = plan(vec![PlannedOp {
            identifier: "x".into(),
            collection: Collection::Posts,
            op: Operation::Skip {
                reason: SkipReason::Unchanged,
            },
        }]);

        let mut report = SyncReport::started();
        Applier::new(&mut store, &mut blobs, &fetcher, policy(25)).apply(&plan, &mut report);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.applied(), 0);
    }

    #[test]
    fn test_with_retry_stops_on_permanent_errors() {
        let mut calls = 0;
        let result: Result<()> = with_retry(
            RetryPolicy {
                max_attempts: 5,
                backoff_ms: 0,
            },
            "x",
            || {
                calls += 1;
                Err(Error::Constraint("nope".into()))
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
