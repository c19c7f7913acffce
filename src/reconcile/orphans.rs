//! Reachability-based orphan detection over the live store.
//!
//! A category is alive when a post links it directly, or when any of its
//! descendants is alive. Protected categories count as alive, which keeps
//! their ancestors alive too. Media is alive when a post uses it as hero or
//! mentions its URL in the body.
//!
//! Parent links that form a cycle are reported as anomalies. A category on a
//! cycle is alive only when something links it directly, and it never passes
//! liveness on to its parent.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::identity::normalize_category_title;
use crate::model::{Category, Collection};
use crate::reconcile::matcher::scan_duplicates;
use crate::reconcile::types::{Ambiguity, OrphanCandidate, OrphanReason};
use crate::storage::LiveSnapshot;

/// Everything the orphan pass found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrphanScan {
    pub candidates: Vec<OrphanCandidate>,
    pub ambiguities: Vec<Ambiguity>,
    pub anomalies: Vec<String>,
}

/// Scan the snapshot for unreferenced categories and media and for
/// duplicate media.
#[must_use]
pub fn find_orphans(snapshot: &LiveSnapshot, protected: &[String]) -> OrphanScan {
    let protected: HashSet<String> = protected
        .iter()
        .map(|t| normalize_category_title(t))
        .collect();

    let hierarchy = Hierarchy::new(&snapshot.categories);
    let (cyclic, anomalies) = hierarchy.cycles();

    let mut seeds: Vec<&str> = snapshot
        .posts
        .iter()
        .flat_map(|p| p.categories.iter().map(String::as_str))
        .collect();
    seeds.extend(
        snapshot
            .categories
            .iter()
            .filter(|c| protected.contains(&normalize_category_title(&c.title)))
            .map(|c| c.id.as_str()),
    );
    let alive = hierarchy.reachable(&seeds, &cyclic);

    let mut candidates: Vec<OrphanCandidate> = snapshot
        .categories
        .iter()
        .filter(|c| !alive.contains(c.id.as_str()))
        .map(|c| OrphanCandidate {
            collection: Collection::Categories,
            id: c.id.clone(),
            label: c.title.clone(),
            reason: OrphanReason::Unreferenced,
            kept: None,
        })
        .collect();

    let (duplicates, ambiguities) = scan_duplicates(&snapshot.media);
    let heroes: HashSet<&str> = snapshot
        .posts
        .iter()
        .filter_map(|p| p.hero_image.as_deref())
        .collect();
    let referenced: HashSet<&str> = snapshot
        .media
        .iter()
        .filter(|m| heroes.contains(m.id.as_str()) || url_in_bodies(&m.url, snapshot))
        .map(|m| m.id.as_str())
        .collect();
    let duplicate_ids: HashSet<&str> = duplicates.iter().map(|c| c.id.as_str()).collect();
    // A kept asset inherits its duplicates' references; prune moves them over.
    let inherited: HashSet<&str> = duplicates
        .iter()
        .filter(|c| referenced.contains(c.id.as_str()))
        .filter_map(|c| c.kept.as_deref())
        .collect();

    for media in &snapshot.media {
        let id = media.id.as_str();
        if duplicate_ids.contains(id) || referenced.contains(id) || inherited.contains(id) {
            continue;
        }
        candidates.push(OrphanCandidate {
            collection: Collection::Media,
            id: media.id.clone(),
            label: media.filename.clone(),
            reason: OrphanReason::Unreferenced,
            kept: None,
        });
    }
    candidates.extend(duplicates);
    candidates.sort_by(|a, b| (a.collection, &a.id).cmp(&(b.collection, &b.id)));

    debug!(
        candidates = candidates.len(),
        cycles = anomalies.len(),
        "Orphan scan complete"
    );
    OrphanScan {
        candidates,
        ambiguities,
        anomalies,
    }
}

/// True when some post body mentions `url`.
pub(crate) fn url_in_bodies(url: &str, snapshot: &LiveSnapshot) -> bool {
    !url.is_empty() && snapshot.posts.iter().any(|p| p.body_html.contains(url))
}

/// Parent links of the live category tree.
pub(crate) struct Hierarchy<'a> {
    parent: HashMap<&'a str, &'a str>,
    ids: Vec<&'a str>,
}

impl<'a> Hierarchy<'a> {
    pub(crate) fn new(categories: &'a [Category]) -> Self {
        let known: HashSet<&str> = categories.iter().map(|c| c.id.as_str()).collect();
        let parent = categories
            .iter()
            .filter_map(|c| {
                let p = c.parent.as_deref()?;
                known.contains(p).then_some((c.id.as_str(), p))
            })
            .collect();
        let mut ids: Vec<&str> = categories.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        Self { parent, ids }
    }

    /// Nodes that sit on a parent cycle, plus one message per cycle.
    pub(crate) fn cycles(&self) -> (HashSet<&'a str>, Vec<String>) {
        let mut cyclic = HashSet::new();
        let mut settled: HashSet<&str> = HashSet::new();
        let mut anomalies = Vec::new();

        for &start in &self.ids {
            let mut path: Vec<&str> = Vec::new();
            let mut on_path: HashSet<&str> = HashSet::new();
            let mut node = Some(start);
            while let Some(id) = node {
                if settled.contains(id) {
                    break;
                }
                if !on_path.insert(id) {
                    let from = path.iter().position(|p| *p == id).unwrap_or(0);
                    let members: BTreeSet<&str> = path[from..].iter().copied().collect();
                    let message = format!(
                        "category cycle: {}",
                        members.iter().copied().collect::<Vec<_>>().join(" -> ")
                    );
                    warn!(cycle = %message, "Category hierarchy cycle, treating members as unreachable");
                    anomalies.push(message);
                    cyclic.extend(members);
                    break;
                }
                path.push(id);
                node = self.parent.get(id).copied();
            }
            settled.extend(path);
        }
        (cyclic, anomalies)
    }

    /// Seeds and every ancestor reachable through non-cyclic nodes.
    pub(crate) fn reachable(&self, seeds: &[&str], cyclic: &HashSet<&str>) -> HashSet<String> {
        let mut alive: HashSet<String> = HashSet::new();
        for &seed in seeds {
            if !alive.insert(seed.to_string()) || cyclic.contains(seed) {
                continue;
            }
            let mut node = self.parent.get(seed).copied();
            while let Some(id) = node {
                if cyclic.contains(id) || !alive.insert(id.to_string()) {
                    break;
                }
                node = self.parent.get(id).copied();
            }
        }
        alive
    }

    /// Number of ancestors, bounded by the node count on cycles.
    pub(crate) fn depth(&self, id: &str) -> usize {
        let mut depth = 0;
        let mut node = self.parent.get(id).copied();
        while let Some(p) = node {
            depth += 1;
            if depth > self.ids.len() {
                break;
            }
            node = self.parent.get(p).copied();
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MediaAsset, Post};

    fn category(id: &str, parent: Option<&str>) -> Category {
        Category {
            id: id.into(),
            title: id.to_uppercase(),
            slug: id.into(),
            parent: parent.map(str::to_string),
        }
    }

    fn post(id: &str, categories: &[&str], hero: Option<&str>, body: &str) -> Post {
        Post {
            id: id.into(),
            slug: id.into(),
            title: id.into(),
            body_html: body.into(),
            published_at: 0,
            categories: categories.iter().map(|c| (*c).to_string()).collect(),
            hero_image: hero.map(str::to_string),
            authors: vec![],
            created_at: 0,
            updated_at: 0,
        }
    }

    fn media(id: &str, filename: &str) -> MediaAsset {
        MediaAsset {
            id: id.into(),
            filename: filename.into(),
            url: format!("https://cdn.example/{filename}"),
            width: None,
            height: None,
            file_size_bytes: None,
            created_at: 0,
        }
    }

    fn orphan_ids(scan: &OrphanScan, collection: Collection) -> Vec<&str> {
        scan.candidates
            .iter()
            .filter(|c| c.collection == collection)
            .map(|c| c.id.as_str())
            .collect()
    }

    #[test]
    fn test_ancestors_of_linked_leaf_are_alive() {
        let snapshot = LiveSnapshot {
            categories: vec![
                category("a", None),
                category("b", Some("a")),
                category("c", Some("b")),
                category("lonely", None),
            ],
            posts: vec![post("p", &["c"], None, "")],
            ..LiveSnapshot::default()
        };
        let scan = find_orphans(&snapshot, &[]);
        assert_eq!(orphan_ids(&scan, Collection::Categories), vec!["lonely"]);
        assert!(scan.anomalies.is_empty());
    }

    #[test]
    fn test_cycle_is_reported_once_and_does_not_propagate() {
        // x <-> y form a cycle; z hangs below y.
        let snapshot = LiveSnapshot {
            categories: vec![
                category("x", Some("y")),
                category("y", Some("x")),
                category("z", Some("y")),
                category("w", Some("x")),
            ],
            posts: vec![post("p", &["z", "x"], None, "")],
            ..LiveSnapshot::default()
        };
        let scan = find_orphans(&snapshot, &[]);
        assert_eq!(scan.anomalies.len(), 1);
        assert!(scan.anomalies[0].ends_with("x -> y"));
        // x is linked directly; y is only reachable through z and stays an orphan.
        assert_eq!(orphan_ids(&scan, Collection::Categories), vec!["w", "y"]);
    }

    #[test]
    fn test_protected_categories_and_their_ancestors_survive() {
        let snapshot = LiveSnapshot {
            categories: vec![category("root", None), category("keep", Some("root"))],
            ..LiveSnapshot::default()
        };
        let scan = find_orphans(&snapshot, &["  Keep ".to_string()]);
        assert!(orphan_ids(&scan, Collection::Categories).is_empty());

        let scan = find_orphans(&snapshot, &[]);
        assert_eq!(orphan_ids(&scan, Collection::Categories), vec!["keep", "root"]);
    }

    #[test]
    fn test_media_referenced_by_hero_or_body() {
        let snapshot = LiveSnapshot {
            media: vec![
                media("media_hero", "hero.jpg"),
                media("media_inline", "inline.png"),
                media("media_unused", "unused.gif"),
            ],
            posts: vec![post(
                "p",
                &[],
                Some("media_hero"),
                r#"<img src="https://cdn.example/inline.png">"#,
            )],
            ..LiveSnapshot::default()
        };
        let scan = find_orphans(&snapshot, &[]);
        assert_eq!(orphan_ids(&scan, Collection::Media), vec!["media_unused"]);
    }

    #[test]
    fn test_duplicates_are_reported_once() {
        let snapshot = LiveSnapshot {
            media: vec![media("media_a", "sunset.jpg"), media("media_b", "sunset-2.jpg")],
            posts: vec![post("p", &[], Some("media_a"), "")],
            ..LiveSnapshot::default()
        };
        let scan = find_orphans(&snapshot, &[]);
        assert_eq!(scan.candidates.len(), 1);
        assert_eq!(scan.candidates[0].reason, OrphanReason::Duplicate);
        assert_eq!(scan.candidates[0].kept.as_deref(), Some("media_a"));
        // Only the id separated them.
        assert_eq!(scan.ambiguities.len(), 1);
    }

    #[test]
    fn test_depth() {
        let categories = vec![category("a", None), category("b", Some("a")), category("c", Some("b"))];
        let hierarchy = Hierarchy::new(&categories);
        assert_eq!(hierarchy.depth("a"), 0);
        assert_eq!(hierarchy.depth("c"), 2);
    }
}
