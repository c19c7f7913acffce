//! Turns match results into an ordered [`SyncPlan`].
//!
//! Categories and media are resolved first so posts can point at them, either
//! by live id or by the index of the operation that will create them. The
//! final list is topologically sorted on those produce/consume edges.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::{MAX_SLUG_LEN, normalize_category_title, normalize_slug};
use crate::model::{Article, Attachment, Collection, SourceRecord};
use crate::reconcile::hash::post_hash;
use crate::reconcile::types::{
    MatchOutcome, MatchResult, Operation, OrphanCandidate, OrphanReason, Planned, PlannedMedia,
    PlannedOp, PlannedPost, PlannedUpdate, Ref, SkipReason, SyncPlan,
};
use crate::storage::LiveSnapshot;

/// Working state while operations are collected in source order.
struct Draft<'s> {
    snapshot: &'s LiveSnapshot,
    ops: Vec<PlannedOp>,
    category_refs: HashMap<String, Ref>,
    media_refs: HashMap<String, Ref>,
    attachment_refs: HashMap<String, Ref>,
    taken_category_slugs: HashSet<String>,
    seen_post_keys: HashSet<String>,
    matched_posts: HashSet<String>,
    matched_media: HashSet<String>,
    plan: SyncPlan,
}

/// Build the plan for one run.
///
/// # Errors
///
/// Returns an error if hashing fails or the dependency graph cannot be
/// ordered.
pub fn build_plan(matches: &[MatchResult<'_>], snapshot: &LiveSnapshot) -> Result<SyncPlan> {
    let mut draft = Draft {
        snapshot,
        ops: Vec::new(),
        category_refs: HashMap::new(),
        media_refs: HashMap::new(),
        attachment_refs: HashMap::new(),
        taken_category_slugs: snapshot.categories.iter().map(|c| c.slug.clone()).collect(),
        seen_post_keys: HashSet::new(),
        matched_posts: HashSet::new(),
        matched_media: HashSet::new(),
        plan: SyncPlan::default(),
    };

    // Producers before consumers, whatever order the export used.
    for m in matches {
        if let SourceRecord::Category(c) = m.record {
            draft.category(m, &c.external_name);
        }
    }
    for m in matches {
        if let SourceRecord::Attachment(a) = m.record {
            draft.attachment(m, a);
        }
    }
    for m in matches {
        if let SourceRecord::Article(a) = m.record {
            draft.article(m, a)?;
        }
    }

    draft.flag_not_in_source();
    let Draft { ops, mut plan, .. } = draft;
    plan.operations = topo_order(ops)?;

    debug!(
        operations = plan.operations.len(),
        mutations = plan.mutation_count(),
        orphans = plan.orphan_candidates.len(),
        "Plan built"
    );
    Ok(plan)
}

impl Draft<'_> {
    fn push(&mut self, identifier: &str, collection: Collection, op: Operation) -> usize {
        self.ops.push(PlannedOp {
            identifier: identifier.to_string(),
            collection,
            op,
        });
        self.ops.len() - 1
    }

    fn skip(&mut self, identifier: &str, collection: Collection, reason: SkipReason) {
        self.push(identifier, collection, Operation::Skip { reason });
    }

    fn category(&mut self, m: &MatchResult<'_>, name: &str) {
        if self.category_refs.contains_key(&m.key) {
            self.skip(name, Collection::Categories, SkipReason::DuplicateInSource);
            return;
        }
        let reference = match &m.outcome {
            MatchOutcome::Exact(id) | MatchOutcome::Fuzzy { id, .. } => {
                self.skip(name, Collection::Categories, SkipReason::Exists);
                Ref::Existing(id.clone())
            }
            MatchOutcome::None => {
                let slug = unique_slug(&normalize_slug(name), &mut self.taken_category_slugs);
                let index = self.push(
                    name,
                    Collection::Categories,
                    Operation::Create(Planned::Category {
                        title: name.trim().to_string(),
                        slug,
                    }),
                );
                Ref::Pending(index)
            }
        };
        self.category_refs.insert(m.key.clone(), reference);
    }

    fn attachment(&mut self, m: &MatchResult<'_>, attachment: &Attachment) {
        let filename = attachment.filename();

        if let Some(existing) = self.media_refs.get(&m.key).cloned() {
            self.attachment_refs
                .insert(attachment.external_id.clone(), existing);
            self.skip(&filename, Collection::Media, SkipReason::DuplicateInSource);
            return;
        }

        let reference = match &m.outcome {
            MatchOutcome::Exact(id) | MatchOutcome::Fuzzy { id, .. } => {
                self.matched_media.insert(id.clone());
                for duplicate in &m.duplicates {
                    if self.matched_media.insert(duplicate.clone()) {
                        self.plan.orphan_candidates.push(OrphanCandidate {
                            collection: Collection::Media,
                            id: duplicate.clone(),
                            label: self.media_label(duplicate),
                            reason: OrphanReason::Duplicate,
                            kept: Some(id.clone()),
                        });
                    }
                }
                if let Some(ambiguity) = &m.ambiguity {
                    self.plan.ambiguities.push(ambiguity.clone());
                }
                self.skip(&filename, Collection::Media, SkipReason::Exists);
                Ref::Existing(id.clone())
            }
            MatchOutcome::None => Ref::Pending(self.push(
                &filename,
                Collection::Media,
                Operation::Create(Planned::Media(PlannedMedia {
                    source_url: attachment.source_url.clone(),
                    filename: filename.clone(),
                    width: attachment.width,
                    height: attachment.height,
                    file_size_bytes: attachment.file_size_bytes,
                })),
            )),
        };

        self.media_refs.insert(m.key.clone(), reference.clone());
        self.attachment_refs
            .insert(attachment.external_id.clone(), reference);
    }

    fn article(&mut self, m: &MatchResult<'_>, article: &Article) -> Result<()> {
        let slug = m.key.clone();
        if !self.seen_post_keys.insert(slug.clone()) {
            self.skip(&slug, Collection::Posts, SkipReason::DuplicateInSource);
            return Ok(());
        }

        let mut keys = dedup_keys(article.category_keys());
        keys.retain(|key| {
            let known = self.category_refs.contains_key(key);
            if !known {
                debug!(slug = %slug, category = %key, "Category not declared in export");
            }
            known
        });
        let categories: Vec<Ref> = keys
            .iter()
            .filter_map(|key| self.category_refs.get(key).cloned())
            .collect();
        let hero = article
            .hero_attachment_ref
            .as_ref()
            .and_then(|ext| self.attachment_refs.get(ext).cloned());

        let Some(live_id) = m.outcome.live_id() else {
            self.push(
                &slug,
                Collection::Posts,
                Operation::Create(Planned::Post(PlannedPost {
                    slug: slug.clone(),
                    title: article.title.clone(),
                    body_html: article.body_html.clone(),
                    published_at: article.published_at.timestamp_millis(),
                    authors: article.author_name.iter().cloned().collect(),
                    categories,
                    hero,
                })),
            );
            return Ok(());
        };

        self.matched_posts.insert(live_id.to_string());
        let snapshot = self.snapshot;
        let Some(live) = snapshot.posts.iter().find(|p| p.id == live_id) else {
            return Err(Error::Other(format!("matched post {live_id} missing from snapshot")));
        };

        let live_keys: Vec<String> = live
            .categories
            .iter()
            .map(|id| self.category_key(id))
            .collect();
        let live_hash = post_hash(&live.title, &live.body_html, &live_keys)?;
        let source_hash = post_hash(&article.title, &article.body_html, &keys)?;

        let op = if live_hash != source_hash {
            Operation::Update {
                id: live.id.clone(),
                fields: PlannedUpdate {
                    title: article.title.clone(),
                    body_html: article.body_html.clone(),
                    categories,
                    hero,
                },
            }
        } else if let Some(hero) = hero.filter(|h| hero_differs(h, live.hero_image.as_deref())) {
            Operation::Relink {
                id: live.id.clone(),
                hero,
            }
        } else {
            Operation::Skip {
                reason: SkipReason::Unchanged,
            }
        };
        self.push(&slug, Collection::Posts, op);
        Ok(())
    }

    /// Live posts and media that no source record maps to.
    fn flag_not_in_source(&mut self) {
        for post in &self.snapshot.posts {
            if !self.matched_posts.contains(&post.id) {
                self.plan.orphan_candidates.push(OrphanCandidate {
                    collection: Collection::Posts,
                    id: post.id.clone(),
                    label: post.slug.clone(),
                    reason: OrphanReason::NotInSource,
                    kept: None,
                });
            }
        }
        for media in &self.snapshot.media {
            if !self.matched_media.contains(&media.id) {
                self.plan.orphan_candidates.push(OrphanCandidate {
                    collection: Collection::Media,
                    id: media.id.clone(),
                    label: media.filename.clone(),
                    reason: OrphanReason::NotInSource,
                    kept: None,
                });
            }
        }
    }

    fn category_key(&self, id: &str) -> String {
        self.snapshot
            .categories
            .iter()
            .find(|c| c.id == id)
            .map_or_else(|| id.to_string(), |c| normalize_category_title(&c.title))
    }

    fn media_label(&self, id: &str) -> String {
        self.snapshot
            .media
            .iter()
            .find(|m| m.id == id)
            .map_or_else(|| id.to_string(), |m| m.filename.clone())
    }
}

/// A resolved hero replaces the live one unless it is the same asset.
fn hero_differs(resolved: &Ref, live: Option<&str>) -> bool {
    match (resolved, live) {
        (Ref::Existing(id), Some(current)) => id != current,
        _ => true,
    }
}

fn dedup_keys(keys: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.into_iter()
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .collect()
}

/// `base`, or `base-2`, `base-3`, … whichever is free. Claims the result.
fn unique_slug(base: &str, taken: &mut HashSet<String>) -> String {
    let base = if base.is_empty() { "category" } else { base };
    if taken.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 2u32;
    loop {
        let suffix = format!("-{n}");
        let mut stem = base.to_string();
        stem.truncate(MAX_SLUG_LEN.saturating_sub(suffix.len()));
        let candidate = format!("{}{suffix}", stem.trim_end_matches('-'));
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

const fn rank(collection: Collection) -> u8 {
    match collection {
        Collection::Categories => 0,
        Collection::Media => 1,
        Collection::Posts => 2,
    }
}

/// Kahn's algorithm; ties go to categories, then media, then posts, then
/// source order. `Ref::Pending` indices are rewritten to final positions.
fn topo_order(ops: Vec<PlannedOp>) -> Result<Vec<PlannedOp>> {
    let n = ops.len();
    let mut indegree = vec![0usize; n];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, op) in ops.iter().enumerate() {
        for dep in op.dependencies() {
            if dep >= n {
                return Err(Error::Other(format!(
                    "operation {i} depends on unknown operation {dep}"
                )));
            }
            indegree[i] += 1;
            consumers[dep].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<(u8, usize)>> = ops
        .iter()
        .enumerate()
        .filter(|(i, _)| indegree[*i] == 0)
        .map(|(i, op)| Reverse((rank(op.collection), i)))
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse((_, i))) = ready.pop() {
        order.push(i);
        for &consumer in &consumers[i] {
            indegree[consumer] -= 1;
            if indegree[consumer] == 0 {
                ready.push(Reverse((rank(ops[consumer].collection), consumer)));
            }
        }
    }
    if order.len() != n {
        return Err(Error::Other("dependency cycle in sync plan".into()));
    }

    let mut position = vec![0usize; n];
    for (new, &old) in order.iter().enumerate() {
        position[old] = new;
    }

    let mut slots: Vec<Option<PlannedOp>> = ops.into_iter().map(Some).collect();
    let mut sorted = Vec::with_capacity(n);
    for old in order {
        if let Some(mut op) = slots[old].take() {
            remap_refs(&mut op, &position);
            sorted.push(op);
        }
    }
    Ok(sorted)
}

fn remap_refs(op: &mut PlannedOp, position: &[usize]) {
    let remap = |r: &mut Ref| {
        if let Ref::Pending(i) = r {
            *i = position[*i];
        }
    };
    match &mut op.op {
        Operation::Create(Planned::Post(post)) => {
            post.categories.iter_mut().for_each(remap);
            post.hero.iter_mut().for_each(remap);
        }
        Operation::Update { fields, .. } => {
            fields.categories.iter_mut().for_each(remap);
            fields.hero.iter_mut().for_each(remap);
        }
        Operation::Relink { hero, .. } => remap(hero),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, CategoryRef, MediaAsset, Post};
    use crate::reconcile::matcher::{LiveIndex, match_records};
    use chrono::{TimeZone, Utc};

    fn article(id: &str, slug: &str, categories: &[&str], hero: Option<&str>) -> SourceRecord {
        SourceRecord::Article(Article {
            external_id: id.into(),
            title: format!("Title {slug}"),
            slug: slug.into(),
            published_at: Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap(),
            author_name: Some("Ana".into()),
            body_html: "<p>Body</p>".into(),
            category_names: categories.iter().map(|c| (*c).to_string()).collect(),
            hero_attachment_ref: hero.map(str::to_string),
        })
    }

    fn category(name: &str) -> SourceRecord {
        SourceRecord::Category(CategoryRef {
            external_name: name.into(),
        })
    }

    fn attachment(id: &str, url: &str) -> SourceRecord {
        SourceRecord::Attachment(Attachment {
            external_id: id.into(),
            source_url: url.into(),
            width: None,
            height: None,
            file_size_bytes: None,
        })
    }

    fn live_category(id: &str, title: &str, slug: &str) -> Category {
        Category {
            id: id.into(),
            title: title.into(),
            slug: slug.into(),
            parent: None,
        }
    }

    fn plan_for(records: &[SourceRecord], snapshot: &LiveSnapshot) -> SyncPlan {
        let index = LiveIndex::build(snapshot);
        let matches = match_records(records, &index);
        build_plan(&matches, snapshot).unwrap()
    }

    #[test]
    fn test_existing_category_new_post_without_hero() {
        let snapshot = LiveSnapshot {
            categories: vec![live_category("cat_har", "Har peste Har", "har-peste-har")],
            ..LiveSnapshot::default()
        };
        // Attachment 77 is not part of the export, so the extractor cleared the ref.
        let records = vec![
            category("Har peste Har"),
            article("2128", "foo", &["Har peste Har"], None),
        ];

        let plan = plan_for(&records, &snapshot);
        assert_eq!(plan.operations.len(), 2);
        assert_eq!(
            plan.operations[0].op,
            Operation::Skip {
                reason: SkipReason::Exists
            }
        );

        let Operation::Create(Planned::Post(post)) = &plan.operations[1].op else {
            panic!("expected post create, got {:?}", plan.operations[1].op);
        };
        assert_eq!(post.slug, "foo");
        assert_eq!(post.categories, vec![Ref::Existing("cat_har".into())]);
        assert_eq!(post.hero, None);
    }

    #[test]
    fn test_producers_ordered_before_consumers() {
        let snapshot = LiveSnapshot::default();
        let records = vec![
            article("1", "first", &["News"], Some("77")),
            attachment("77", "https://old.example/uploads/photo.jpg"),
            category("News"),
        ];

        let plan = plan_for(&records, &snapshot);
        let kinds: Vec<Collection> = plan.operations.iter().map(|o| o.collection).collect();
        assert_eq!(
            kinds,
            vec![Collection::Categories, Collection::Media, Collection::Posts]
        );

        let Operation::Create(Planned::Post(post)) = &plan.operations[2].op else {
            panic!("expected post create");
        };
        assert_eq!(post.categories, vec![Ref::Pending(0)]);
        assert_eq!(post.hero, Some(Ref::Pending(1)));
        assert_eq!(plan.operations[2].dependencies(), vec![0, 1]);
    }

    #[test]
    fn test_unchanged_post_is_skipped_and_hero_change_relinks() {
        let snapshot = LiveSnapshot {
            categories: vec![live_category("cat_news", "News", "news")],
            media: vec![MediaAsset {
                id: "media_photo".into(),
                filename: "photo.webp".into(),
                url: "/blobs/photo.webp".into(),
                width: None,
                height: None,
                file_size_bytes: None,
                created_at: 0,
            }],
            posts: vec![Post {
                id: "post_1".into(),
                slug: "first".into(),
                title: "Title first".into(),
                body_html: "<p>Body</p>".into(),
                published_at: 0,
                categories: vec!["cat_news".into()],
                hero_image: Some("media_photo".into()),
                authors: vec![],
                created_at: 0,
                updated_at: 0,
            }],
        };
        let records = vec![
            category("news"),
            attachment("77", "https://old.example/uploads/photo-2.jpg"),
            article("1", "first", &["News"], Some("77")),
        ];
        let plan = plan_for(&records, &snapshot);
        assert_eq!(plan.mutation_count(), 0);

        let mut moved = snapshot.clone();
        moved.posts[0].hero_image = None;
        let plan = plan_for(&records, &moved);
        assert_eq!(plan.mutation_count(), 1);
        assert!(matches!(
            &plan.operations[2].op,
            Operation::Relink { id, hero: Ref::Existing(h) } if id == "post_1" && h == "media_photo"
        ));

        let mut edited = snapshot;
        edited.posts[0].title = "Old title".into();
        let plan = plan_for(&records, &edited);
        assert!(matches!(&plan.operations[2].op, Operation::Update { .. }));
    }

    #[test]
    fn test_source_duplicates_are_skipped() {
        let snapshot = LiveSnapshot::default();
        let records = vec![
            attachment("1", "https://old.example/a.jpg"),
            attachment("2", "https://old.example/a-2.jpg"),
            article("10", "same", &[], Some("2")),
            article("11", "Same", &[], None),
        ];
        let plan = plan_for(&records, &snapshot);

        let creates = plan
            .operations
            .iter()
            .filter(|o| matches!(o.op, Operation::Create(_)))
            .count();
        assert_eq!(creates, 2);
        let dup_skips = plan
            .operations
            .iter()
            .filter(|o| {
                o.op == Operation::Skip {
                    reason: SkipReason::DuplicateInSource,
                }
            })
            .count();
        assert_eq!(dup_skips, 2);

        // The second attachment shares the first one's create.
        let post = plan
            .operations
            .iter()
            .find_map(|o| match &o.op {
                Operation::Create(Planned::Post(p)) => Some(p),
                _ => None,
            })
            .unwrap();
        assert_eq!(post.hero, Some(Ref::Pending(0)));
    }

    #[test]
    fn test_new_category_slugs_are_unique() {
        let snapshot = LiveSnapshot {
            categories: vec![live_category("cat_1", "Other", "travel")],
            ..LiveSnapshot::default()
        };
        let records = vec![category("Travel"), category("Travel!")];
        let plan = plan_for(&records, &snapshot);

        let slugs: Vec<&str> = plan
            .operations
            .iter()
            .filter_map(|o| match &o.op {
                Operation::Create(Planned::Category { slug, .. }) => Some(slug.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(slugs, vec!["travel-2", "travel-3"]);
    }

    #[test]
    fn test_not_in_source_is_advisory() {
        let snapshot = LiveSnapshot {
            posts: vec![Post {
                id: "post_old".into(),
                slug: "old".into(),
                title: "Old".into(),
                body_html: String::new(),
                published_at: 0,
                categories: vec![],
                hero_image: None,
                authors: vec![],
                created_at: 0,
                updated_at: 0,
            }],
            ..LiveSnapshot::default()
        };
        let plan = plan_for(&[], &snapshot);
        assert!(plan.operations.is_empty());
        assert_eq!(plan.orphan_candidates.len(), 1);
        assert_eq!(plan.orphan_candidates[0].reason, OrphanReason::NotInSource);
    }

    #[test]
    fn test_unique_slug_respects_max_length() {
        let base = "a".repeat(MAX_SLUG_LEN);
        let mut taken = HashSet::from([base.clone()]);
        let slug = unique_slug(&base, &mut taken);
        assert_eq!(slug.len(), MAX_SLUG_LEN);
        assert!(slug.ends_with("-2"));
    }
}
