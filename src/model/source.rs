//! Records parsed from a legacy export snapshot.
//!
//! Source records are rebuilt from scratch on every run and thrown away
//! afterwards. `external_id` is unique within one snapshot only; it is not
//! stable across exports, so identity is always derived from slugs,
//! titles and filenames.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::identity::{
    media_filename, normalize_category_title, normalize_media_basename, normalize_slug,
};

/// Tagged union over everything the extractor keeps from an export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRecord {
    /// A published article.
    Article(Article),
    /// A category name referenced by the export.
    Category(CategoryRef),
    /// An uploaded media file.
    Attachment(Attachment),
}

/// An article from the export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub external_id: String,
    pub title: String,
    /// Slug as exported (percent-decoded, not yet normalized).
    pub slug: String,
    pub published_at: DateTime<Utc>,
    pub author_name: Option<String>,
    pub body_html: String,
    /// Display-form category names, de-duplicated by key, export order kept.
    pub category_names: Vec<String>,
    /// `external_id` of the hero attachment, only when present in the same export.
    pub hero_attachment_ref: Option<String>,
}

impl Article {
    /// Identity key matched against live post slugs.
    #[must_use]
    pub fn slug_key(&self) -> String {
        normalize_slug(&self.slug)
    }

    /// Category keys in the article's own order.
    #[must_use]
    pub fn category_keys(&self) -> Vec<String> {
        self.category_names
            .iter()
            .map(|name| normalize_category_title(name))
            .collect()
    }
}

/// A category known only by its display name.
///
/// Hierarchy is never taken from the export; parents live in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryRef {
    pub external_name: String,
}

impl CategoryRef {
    /// Identity key matched against live category titles.
    #[must_use]
    pub fn title_key(&self) -> String {
        normalize_category_title(&self.external_name)
    }
}

/// A media file referenced by the export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub external_id: String,
    pub source_url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_size_bytes: Option<u64>,
}

impl Attachment {
    /// Identity key matched against live media filenames.
    ///
    /// Derived from [`Self::filename`], the name the live asset is created
    /// with, so both sides of a match go through the same steps.
    #[must_use]
    pub fn basename_key(&self) -> String {
        normalize_media_basename(&self.filename())
    }

    /// Filename to use when the asset is uploaded (last URL segment, decoded).
    #[must_use]
    pub fn filename(&self) -> String {
        media_filename(&self.source_url)
    }
}
