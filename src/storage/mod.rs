//! Live-store adapter layer.
//!
//! The engine talks to the live content store only through [`LiveStore`].
//! An adapter instance is created per run and passed in explicitly; nothing
//! in the engine holds on to a connection between runs.
//!
//! # Submodules
//!
//! - [`events`] - Audit event storage
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - SQLite implementation of [`LiveStore`]

pub mod events;
pub mod schema;
pub mod sqlite;

pub use sqlite::{SqliteStore, StoreCounts};

use crate::error::Result;
use crate::model::{Category, Collection, LiveEntity, MediaAsset, Post};

/// Selection criteria for [`LiveStore::find`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every entity in the collection.
    All,
    /// A single entity by store id.
    Id(String),
    /// Entities with this exact slug (posts and categories).
    Slug(String),
}

/// Fields for a new post. All references are concrete store ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub slug: String,
    pub title: String,
    pub body_html: String,
    pub published_at: i64,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub hero_image: Option<String>,
}

/// Fields for a new category. New categories start at the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCategory {
    pub title: String,
    pub slug: String,
    pub parent: Option<String>,
}

/// Fields for a new media asset (after the blob has been uploaded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMedia {
    pub filename: String,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_size_bytes: Option<u64>,
}

/// Payload for [`LiveStore::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Post(NewPost),
    Category(NewCategory),
    Media(NewMedia),
}

impl Payload {
    #[must_use]
    pub const fn collection(&self) -> Collection {
        match self {
            Self::Post(_) => Collection::Posts,
            Self::Category(_) => Collection::Categories,
            Self::Media(_) => Collection::Media,
        }
    }
}

/// Partial post update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostPatch {
    pub title: Option<String>,
    pub body_html: Option<String>,
    pub categories: Option<Vec<String>>,
    /// `Some(None)` clears the hero image.
    pub hero_image: Option<Option<String>>,
}

/// Partial category update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryPatch {
    pub title: Option<String>,
    /// `Some(None)` moves the category to the root.
    pub parent: Option<Option<String>>,
}

/// Patch for [`LiveStore::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    Post(PostPatch),
    Category(CategoryPatch),
}

/// The live content store, as seen by the engine.
///
/// Implementations are the single source of truth for current state; the
/// engine never caches what they return across runs.
pub trait LiveStore {
    /// Verify the store is reachable. Called once before a run plans anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    fn ping(&self) -> Result<()>;

    /// Find entities in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<LiveEntity>>;

    /// Create an entity and return it with its store-assigned id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (e.g. a duplicate slug).
    fn create(&mut self, payload: &Payload) -> Result<LiveEntity>;

    /// Apply a partial update and return the updated entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity does not exist or the update is rejected.
    fn update(&mut self, collection: Collection, id: &str, patch: &Patch) -> Result<LiveEntity>;

    /// Delete an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity does not exist or is still referenced.
    fn delete(&mut self, collection: Collection, id: &str) -> Result<()>;
}

/// Read-only copy of the live store taken once at the start of a run.
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    pub posts: Vec<Post>,
    pub categories: Vec<Category>,
    pub media: Vec<MediaAsset>,
}

impl LiveSnapshot {
    /// Fetch every post, category and media asset.
    ///
    /// # Errors
    ///
    /// Returns an error if any collection cannot be read.
    pub fn fetch(store: &dyn LiveStore) -> Result<Self> {
        let posts = store
            .find(Collection::Posts, &Filter::All)?
            .into_iter()
            .filter_map(LiveEntity::into_post)
            .collect();
        let categories = store
            .find(Collection::Categories, &Filter::All)?
            .into_iter()
            .filter_map(LiveEntity::into_category)
            .collect();
        let media = store
            .find(Collection::Media, &Filter::All)?
            .into_iter()
            .filter_map(LiveEntity::into_media)
            .collect();
        Ok(Self {
            posts,
            categories,
            media,
        })
    }
}
