//! Source extraction: export snapshot → typed [`SourceRecord`]s.
//!
//! Extraction is a pure parse. A document that cannot be read at all is
//! fatal ([`Error::MalformedExport`]) and the run stops before touching the
//! store. Individual records that are unusable are dropped and counted in
//! [`ExtractStats`] instead.
//!
//! # Record rules
//!
//! - `post` items become [`Article`]s; `attachment` items become
//!   [`Attachment`]s; pages, menu items, revisions and anything else are
//!   filtered. `trash` and `auto-draft` items are filtered too.
//! - Articles need an id, a title, a slug that survives normalization and a
//!   parseable date.
//! - Category names come from both the channel's `<wp:category>` list and the
//!   items themselves, de-duplicated by title key.
//! - A `_thumbnail_id` pointing at an attachment outside the export leaves the
//!   article without a hero image.

mod meta;
mod wxr;

pub use meta::{AttachmentMeta, parse_attachment_meta};

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identity::{decode_percent, normalize_category_title, normalize_slug};
use crate::model::{Article, Attachment, CategoryRef, SourceRecord};
use wxr::RawItem;

const WXR_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ZERO_DATE: &str = "0000-00-00 00:00:00";
const IGNORED_STATUSES: [&str; 2] = ["trash", "auto-draft"];

/// Result of extracting one export snapshot.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Categories first, then attachments, then articles (export order within each).
    pub records: Vec<SourceRecord>,
    pub stats: ExtractStats,
}

impl Extraction {
    /// Iterate over the extracted articles.
    pub fn articles(&self) -> impl Iterator<Item = &Article> {
        self.records.iter().filter_map(|r| match r {
            SourceRecord::Article(a) => Some(a),
            _ => None,
        })
    }
}

/// Counters for everything the extractor kept, filtered or dropped.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    /// Articles kept.
    pub articles: usize,
    /// Distinct category names kept.
    pub categories: usize,
    /// Attachments kept.
    pub attachments: usize,
    /// Items of an uninteresting type or status.
    pub filtered_by_type: usize,
    /// Articles missing a required field.
    pub dropped_articles: usize,
    /// Attachments without a usable id or URL.
    pub dropped_attachments: usize,
    /// Items repeating an id already seen in this export.
    pub duplicate_external_ids: usize,
    /// Category names that normalize to an empty key.
    pub empty_category_names: usize,
    /// Hero references to attachments missing from the export.
    pub unresolved_hero_refs: usize,
}

impl ExtractStats {
    /// Records rejected at record level (not counting type filtering).
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped_articles
            + self.dropped_attachments
            + self.duplicate_external_ids
            + self.empty_category_names
    }
}

/// Parse an export snapshot into source records.
///
/// # Errors
///
/// Returns [`crate::Error::MalformedExport`] if the container cannot be parsed.
pub fn extract(raw: &[u8]) -> Result<Extraction> {
    let export = wxr::parse(raw)?;
    let mut stats = ExtractStats::default();
    let mut seen_ids: HashSet<String> = HashSet::new();

    let mut post_items: Vec<RawItem> = Vec::new();
    let mut attachments: Vec<Attachment> = Vec::new();

    for item in export.items {
        if IGNORED_STATUSES.contains(&item.status.trim()) {
            debug!(id = %item.post_id, status = %item.status, "Filtered item by status");
            stats.filtered_by_type += 1;
            continue;
        }
        match item.post_type.trim() {
            "post" | "attachment" => {}
            other => {
                debug!(id = %item.post_id, post_type = other, "Filtered item by type");
                stats.filtered_by_type += 1;
                continue;
            }
        }

        let id = item.post_id.trim().to_string();
        if !id.is_empty() && !seen_ids.insert(id.clone()) {
            warn!(id = %id, "Duplicate external id in export, keeping first occurrence");
            stats.duplicate_external_ids += 1;
            continue;
        }

        if item.post_type.trim() == "attachment" {
            match to_attachment(&item) {
                Some(a) => attachments.push(a),
                None => {
                    warn!(id = %id, "Dropped attachment without id or URL");
                    stats.dropped_attachments += 1;
                }
            }
        } else {
            post_items.push(item);
        }
    }

    let attachment_ids: HashSet<&str> = attachments
        .iter()
        .map(|a| a.external_id.as_str())
        .collect();

    let mut articles = Vec::new();
    for item in &post_items {
        match to_article(item) {
            Ok(mut article) => {
                if let Some(hero) = article.hero_attachment_ref.take() {
                    if attachment_ids.contains(hero.as_str()) {
                        article.hero_attachment_ref = Some(hero);
                    } else {
                        debug!(slug = %article.slug, hero = %hero, "Hero attachment not in export");
                        stats.unresolved_hero_refs += 1;
                    }
                }
                articles.push(article);
            }
            Err(reason) => {
                warn!(id = %item.post_id, reason, "Dropped article");
                stats.dropped_articles += 1;
            }
        }
    }

    let categories = collect_categories(&export.channel_categories, &post_items, &mut stats);

    stats.articles = articles.len();
    stats.categories = categories.len();
    stats.attachments = attachments.len();

    let mut records =
        Vec::with_capacity(categories.len() + attachments.len() + articles.len());
    records.extend(categories.into_iter().map(SourceRecord::Category));
    records.extend(attachments.into_iter().map(SourceRecord::Attachment));
    records.extend(articles.into_iter().map(SourceRecord::Article));

    Ok(Extraction { records, stats })
}

fn to_attachment(item: &RawItem) -> Option<Attachment> {
    let external_id = item.post_id.trim();
    let source_url = item.attachment_url.trim();
    if external_id.is_empty() || source_url.is_empty() {
        return None;
    }
    let meta = item
        .meta_value("_wp_attachment_metadata")
        .map(parse_attachment_meta)
        .unwrap_or_default();
    Some(Attachment {
        external_id: external_id.to_string(),
        source_url: source_url.to_string(),
        width: meta.width,
        height: meta.height,
        file_size_bytes: meta.file_size,
    })
}

fn to_article(item: &RawItem) -> std::result::Result<Article, &'static str> {
    let external_id = item.post_id.trim();
    if external_id.is_empty() {
        return Err("missing id");
    }
    let title = item.title.trim();
    if title.is_empty() {
        return Err("missing title");
    }
    let slug = decode_percent(item.post_name.trim());
    if normalize_slug(&slug).is_empty() {
        return Err("missing slug");
    }
    let published_at = parse_wxr_date(&item.post_date_gmt)
        .or_else(|| parse_wxr_date(&item.post_date))
        .ok_or("missing or invalid date")?;

    let mut seen = HashSet::new();
    let category_names = item
        .categories
        .iter()
        .map(|name| name.trim())
        .filter(|name| {
            let key = normalize_category_title(name);
            !key.is_empty() && seen.insert(key)
        })
        .map(str::to_string)
        .collect();

    let hero_attachment_ref = item
        .meta_value("_thumbnail_id")
        .map(str::trim)
        .filter(|id| !id.is_empty() && *id != "0")
        .map(str::to_string);

    let author_name = Some(item.creator.trim())
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    Ok(Article {
        external_id: external_id.to_string(),
        title: title.to_string(),
        slug,
        published_at,
        author_name,
        body_html: item.content.clone(),
        category_names,
        hero_attachment_ref,
    })
}

fn parse_wxr_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == ZERO_DATE {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, WXR_DATE_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

fn collect_categories(
    channel: &[String],
    items: &[RawItem],
    stats: &mut ExtractStats,
) -> Vec<CategoryRef> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let names = channel
        .iter()
        .chain(items.iter().flat_map(|item| item.categories.iter()));

    for name in names {
        let key = normalize_category_title(name);
        if key.is_empty() {
            stats.empty_category_names += 1;
            continue;
        }
        if seen.insert(key) {
            out.push(CategoryRef {
                external_name: name.trim().to_string(),
            });
        }
    }
    out
}
