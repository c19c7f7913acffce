//! Entities held by the live content store.
//!
//! Live entities are durable. The engine only ever changes them through the
//! batch applier or the explicit prune pass.

use serde::{Deserialize, Serialize};

/// Collections exposed by the live-store adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Posts,
    Categories,
    Media,
}

impl Collection {
    /// Get the string representation for storage and reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Categories => "categories",
            Self::Media => "media",
        }
    }

    /// Singular entity name used in audit events.
    #[must_use]
    pub const fn entity_type(&self) -> &'static str {
        match self {
            Self::Posts => "post",
            Self::Categories => "category",
            Self::Media => "media",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    /// Unique within the store.
    pub slug: String,
    pub title: String,
    pub body_html: String,
    /// Publication timestamp (Unix milliseconds)
    pub published_at: i64,
    /// Category ids, in display order.
    pub categories: Vec<String>,
    /// Media asset id of the hero image.
    pub hero_image: Option<String>,
    /// Author display names.
    pub authors: Vec<String>,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

/// A category node. `parent` links form a forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub parent: Option<String>,
}

/// An uploaded media file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_size_bytes: Option<u64>,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
}

impl MediaAsset {
    /// Pixel count when both dimensions are known.
    #[must_use]
    pub fn pixel_count(&self) -> Option<u64> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(u64::from(w) * u64::from(h)),
            _ => None,
        }
    }
}

/// Tagged union over everything the live store returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "collection", rename_all = "snake_case")]
pub enum LiveEntity {
    Post(Post),
    Category(Category),
    Media(MediaAsset),
}

impl LiveEntity {
    /// Store-assigned id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Post(p) => &p.id,
            Self::Category(c) => &c.id,
            Self::Media(m) => &m.id,
        }
    }

    /// Collection this entity lives in.
    #[must_use]
    pub const fn collection(&self) -> Collection {
        match self {
            Self::Post(_) => Collection::Posts,
            Self::Category(_) => Collection::Categories,
            Self::Media(_) => Collection::Media,
        }
    }

    #[must_use]
    pub fn into_post(self) -> Option<Post> {
        match self {
            Self::Post(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_category(self) -> Option<Category> {
        match self {
            Self::Category(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_media(self) -> Option<MediaAsset> {
        match self {
            Self::Media(m) => Some(m),
            _ => None,
        }
    }
}
