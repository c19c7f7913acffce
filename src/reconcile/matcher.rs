//! Identity resolution of source records against a live snapshot.
//!
//! The matcher is read-only. Posts match on normalized slug, categories on
//! case-folded title, media on the normalized basename. Several media assets
//! sharing a basename are ranked by [`rank_by_quality`]; the losers are
//! flagged as duplicates and left alone.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::identity::{normalize_category_title, normalize_media_basename, normalize_slug};
use crate::model::{Category, Collection, MediaAsset, Post, SourceRecord};
use crate::reconcile::types::{
    Ambiguity, MatchOutcome, MatchResult, OrphanCandidate, OrphanReason, TieBreak,
};
use crate::storage::LiveSnapshot;

/// Live entities grouped by identity key.
#[derive(Debug, Default)]
pub struct LiveIndex<'a> {
    pub posts: HashMap<String, Vec<&'a Post>>,
    pub categories: HashMap<String, Vec<&'a Category>>,
    pub media: HashMap<String, Vec<&'a MediaAsset>>,
}

impl<'a> LiveIndex<'a> {
    #[must_use]
    pub fn build(snapshot: &'a LiveSnapshot) -> Self {
        let mut index = Self::default();
        for post in &snapshot.posts {
            index
                .posts
                .entry(normalize_slug(&post.slug))
                .or_default()
                .push(post);
        }
        for category in &snapshot.categories {
            index
                .categories
                .entry(normalize_category_title(&category.title))
                .or_default()
                .push(category);
        }
        for media in &snapshot.media {
            index
                .media
                .entry(normalize_media_basename(&media.filename))
                .or_default()
                .push(media);
        }
        index
    }
}

/// Winner of a quality ranking and how it was decided.
#[derive(Debug, Clone)]
pub struct Ranked<'m> {
    pub winner: &'m MediaAsset,
    /// Remaining candidates, best first.
    pub losers: Vec<&'m MediaAsset>,
    /// `None` when there was only one candidate.
    pub rationale: Option<TieBreak>,
}

impl Ranked<'_> {
    /// Winner and runner-up could only be separated by id.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.rationale == Some(TieBreak::LowestId)
    }
}

/// Known beats unknown, larger beats smaller. `Less` means `a` is better.
fn prefer_larger(a: Option<u64>, b: Option<u64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Total quality order over media assets: pixels, then file size, then id.
#[must_use]
pub fn quality_cmp(a: &MediaAsset, b: &MediaAsset) -> Ordering {
    prefer_larger(a.pixel_count(), b.pixel_count())
        .then_with(|| prefer_larger(a.file_size_bytes, b.file_size_bytes))
        .then_with(|| a.id.cmp(&b.id))
}

/// Rank same-key candidates; the result does not depend on input order.
///
/// Returns `None` for an empty slice.
#[must_use]
pub fn rank_by_quality<'m>(candidates: &[&'m MediaAsset]) -> Option<Ranked<'m>> {
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| quality_cmp(a, b));
    let mut iter = sorted.into_iter();
    let winner = iter.next()?;
    let losers: Vec<&MediaAsset> = iter.collect();

    let rationale = losers.first().map(|runner_up| {
        if prefer_larger(winner.pixel_count(), runner_up.pixel_count()) != Ordering::Equal {
            TieBreak::Pixels
        } else if prefer_larger(winner.file_size_bytes, runner_up.file_size_bytes)
            != Ordering::Equal
        {
            TieBreak::FileSize
        } else {
            TieBreak::LowestId
        }
    });

    Some(Ranked {
        winner,
        losers,
        rationale,
    })
}

/// Lowest id among entities sharing a post or category key.
fn lowest_id<'i>(ids: impl Iterator<Item = &'i str>) -> MatchOutcome {
    ids.min()
        .map_or(MatchOutcome::None, |winner| MatchOutcome::Exact(winner.to_string()))
}

/// Match every source record against the index.
#[must_use]
pub fn match_records<'a>(records: &'a [SourceRecord], index: &LiveIndex<'_>) -> Vec<MatchResult<'a>> {
    records
        .iter()
        .map(|record| match record {
            SourceRecord::Article(article) => {
                let key = article.slug_key();
                let outcome = lowest_id(
                    index.posts.get(&key).into_iter().flatten().map(|p| p.id.as_str()),
                );
                MatchResult {
                    record,
                    key,
                    outcome,
                    duplicates: Vec::new(),
                    ambiguity: None,
                }
            }
            SourceRecord::Category(category) => {
                let key = category.title_key();
                let outcome = lowest_id(
                    index
                        .categories
                        .get(&key)
                        .into_iter()
                        .flatten()
                        .map(|c| c.id.as_str()),
                );
                MatchResult {
                    record,
                    key,
                    outcome,
                    duplicates: Vec::new(),
                    ambiguity: None,
                }
            }
            SourceRecord::Attachment(attachment) => {
                let key = attachment.basename_key();
                let candidates = index.media.get(&key);
                match_media(record, key, candidates)
            }
        })
        .collect()
}

fn match_media<'a>(
    record: &'a SourceRecord,
    key: String,
    candidates: Option<&Vec<&MediaAsset>>,
) -> MatchResult<'a> {
    let Some(ranked) = candidates.and_then(|c| rank_by_quality(c)) else {
        return MatchResult {
            record,
            key,
            outcome: MatchOutcome::None,
            duplicates: Vec::new(),
            ambiguity: None,
        };
    };

    let winner = ranked.winner.id.clone();
    let ambiguity = ranked.is_ambiguous().then(|| Ambiguity {
        key: key.clone(),
        kept: winner.clone(),
        candidates: ranked.losers.iter().map(|m| m.id.clone()).collect(),
    });
    let outcome = match ranked.rationale {
        None => MatchOutcome::Exact(winner),
        Some(rationale) => MatchOutcome::Fuzzy {
            id: winner,
            rationale,
        },
    };

    MatchResult {
        record,
        key,
        outcome,
        duplicates: ranked.losers.iter().map(|m| m.id.clone()).collect(),
        ambiguity,
    }
}

/// Same-basename media across the whole store, independent of any export.
///
/// Every group of two or more assets yields one candidate per loser.
#[must_use]
pub fn scan_duplicates(media: &[MediaAsset]) -> (Vec<OrphanCandidate>, Vec<Ambiguity>) {
    let mut groups: BTreeMap<String, Vec<&MediaAsset>> = BTreeMap::new();
    for asset in media {
        groups
            .entry(normalize_media_basename(&asset.filename))
            .or_default()
            .push(asset);
    }

    let mut candidates = Vec::new();
    let mut ambiguities = Vec::new();
    for (key, group) in groups {
        if group.len() < 2 {
            continue;
        }
        let Some(ranked) = rank_by_quality(&group) else {
            continue;
        };
        if ranked.is_ambiguous() {
            ambiguities.push(Ambiguity {
                key: key.clone(),
                kept: ranked.winner.id.clone(),
                candidates: ranked.losers.iter().map(|m| m.id.clone()).collect(),
            });
        }
        for loser in ranked.losers {
            candidates.push(OrphanCandidate {
                collection: Collection::Media,
                id: loser.id.clone(),
                label: loser.filename.clone(),
                reason: OrphanReason::Duplicate,
                kept: Some(ranked.winner.id.clone()),
            });
        }
    }
    (candidates, ambiguities)
}
