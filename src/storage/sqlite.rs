//! SQLite live store.
//!
//! Stands in for the remote content store: posts, categories and media live
//! in one database file, every mutation runs in an IMMEDIATE transaction and
//! leaves an audit event.

use crate::error::{Error, Result};
use crate::model::{Category, Collection, LiveEntity, MediaAsset, Post};
use crate::storage::events::{Event, EventType, insert_event, recent_events};
use crate::storage::schema::apply_schema;
use crate::storage::{CategoryPatch, Filter, LiveStore, Patch, Payload, PostPatch};
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Actor recorded on audit events when none is configured.
pub const DEFAULT_ACTOR: &str = "psync";

/// SQLite-backed [`LiveStore`].
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    actor: String,
}

/// Context for a mutation operation.
///
/// Passed to mutation closures to collect audit events, which are written
/// just before the transaction commits.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Actor performing the operation.
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    /// Create a new mutation context.
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_type: &str, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(entity_type, entity_id, event_type, &self.actor));
    }

    /// Record an event with old/new values for field tracking.
    pub fn record_change(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor)
                .with_values(old_value, new_value),
        );
    }
}

/// Row counts per table, for `psync status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreCounts {
    pub posts: usize,
    pub categories: usize,
    pub media: usize,
    pub events: usize,
}

impl SqliteStore {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            actor: DEFAULT_ACTOR.to_string(),
        })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            actor: DEFAULT_ACTOR.to_string(),
        })
    }

    /// Set the actor written to audit events.
    #[must_use]
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// Begins an IMMEDIATE transaction, runs the closure, writes the audit
    /// events it recorded and commits. Constraint failures surface as
    /// [`Error::Constraint`] so callers can tell them from transient errors.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let actor = self.actor.clone();
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, &actor);
        let result = f(&tx, &mut ctx).map_err(classify)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;
        tracing::trace!(op, events = ctx.events.len(), "Mutation committed");
        Ok(result)
    }

    /// Fetch one entity by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no entity has this id.
    pub fn get(&self, collection: Collection, id: &str) -> Result<LiveEntity> {
        self.find(collection, &Filter::Id(id.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(collection, id))
    }

    /// Row counts for every content table plus the audit log.
    ///
    /// # Errors
    ///
    /// Returns an error if a count query fails.
    pub fn counts(&self) -> Result<StoreCounts> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or(0))
        };
        Ok(StoreCounts {
            posts: count("posts")?,
            categories: count("categories")?,
            media: count("media")?,
            events: count("events")?,
        })
    }

    /// Most recent audit events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent_events(&self, limit: u32) -> Result<Vec<Event>> {
        Ok(recent_events(&self.conn, limit)?)
    }

    fn find_posts(&self, filter: &Filter) -> Result<Vec<Post>> {
        let (clause, arg) = match filter {
            Filter::All => ("", None),
            Filter::Id(id) => ("WHERE id = ?1", Some(id.as_str())),
            Filter::Slug(slug) => ("WHERE slug = ?1", Some(slug.as_str())),
        };
        let sql = format!(
            "SELECT id, slug, title, body_html, published_at, hero_image_id, authors, created_at, updated_at
             FROM posts {clause} ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match arg {
            Some(value) => stmt.query_map([value], map_post_row)?,
            None => stmt.query_map([], map_post_row)?,
        };

        let mut posts = Vec::new();
        for row in rows {
            let (mut post, authors_json) = row?;
            post.authors = serde_json::from_str(&authors_json)?;
            posts.push(post);
        }

        let mut links = self.post_category_links()?;
        for post in &mut posts {
            post.categories = links.remove(&post.id).unwrap_or_default();
        }
        Ok(posts)
    }

    fn post_category_links(&self) -> Result<HashMap<String, Vec<String>>> {
        let mut stmt = self.conn.prepare(
            "SELECT post_id, category_id FROM post_categories ORDER BY post_id, position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut links: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            let (post_id, category_id) = row?;
            links.entry(post_id).or_default().push(category_id);
        }
        Ok(links)
    }

    fn find_categories(&self, filter: &Filter) -> Result<Vec<Category>> {
        let (clause, arg) = match filter {
            Filter::All => ("", None),
            Filter::Id(id) => ("WHERE id = ?1", Some(id.as_str())),
            Filter::Slug(slug) => ("WHERE slug = ?1", Some(slug.as_str())),
        };
        let sql =
            format!("SELECT id, title, slug, parent_id FROM categories {clause} ORDER BY created_at, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match arg {
            Some(value) => stmt.query_map([value], map_category_row)?,
            None => stmt.query_map([], map_category_row)?,
        };
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn find_media(&self, filter: &Filter) -> Result<Vec<MediaAsset>> {
        let (clause, arg) = match filter {
            Filter::All => ("", None),
            Filter::Id(id) => ("WHERE id = ?1", Some(id.as_str())),
            Filter::Slug(name) => ("WHERE filename = ?1", Some(name.as_str())),
        };
        let sql = format!(
            "SELECT id, filename, url, width, height, file_size, created_at
             FROM media {clause} ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match arg {
            Some(value) => stmt.query_map([value], map_media_row)?,
            None => stmt.query_map([], map_media_row)?,
        };
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl LiveStore for SqliteStore {
    fn ping(&self) -> Result<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<LiveEntity>> {
        Ok(match collection {
            Collection::Posts => self
                .find_posts(filter)?
                .into_iter()
                .map(LiveEntity::Post)
                .collect(),
            Collection::Categories => self
                .find_categories(filter)?
                .into_iter()
                .map(LiveEntity::Category)
                .collect(),
            Collection::Media => self
                .find_media(filter)?
                .into_iter()
                .map(LiveEntity::Media)
                .collect(),
        })
    }

    fn create(&mut self, payload: &Payload) -> Result<LiveEntity> {
        let now = chrono::Utc::now().timestamp_millis();
        let collection = payload.collection();

        let id = self.mutate("create", |tx, ctx| match payload {
            Payload::Post(post) => {
                let id = new_id("post");
                let authors = serde_json::to_string(&post.authors)?;
                tx.execute(
                    "INSERT INTO posts (id, slug, title, body_html, published_at, hero_image_id, authors, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    rusqlite::params![
                        id,
                        post.slug,
                        post.title,
                        post.body_html,
                        post.published_at,
                        post.hero_image,
                        authors,
                        now
                    ],
                )?;
                link_categories(tx, &id, &post.categories)?;
                ctx.record_event("post", &id, EventType::PostCreated);
                Ok(id)
            }
            Payload::Category(category) => {
                let id = new_id("cat");
                if let Some(parent) = &category.parent {
                    require_category(tx, parent)?;
                }
                tx.execute(
                    "INSERT INTO categories (id, title, slug, parent_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    rusqlite::params![id, category.title, category.slug, category.parent, now],
                )?;
                ctx.record_event("category", &id, EventType::CategoryCreated);
                Ok(id)
            }
            Payload::Media(media) => {
                let id = new_id("media");
                let file_size = media.file_size_bytes.and_then(|n| i64::try_from(n).ok());
                tx.execute(
                    "INSERT INTO media (id, filename, url, width, height, file_size, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        id,
                        media.filename,
                        media.url,
                        media.width,
                        media.height,
                        file_size,
                        now
                    ],
                )?;
                ctx.record_event("media", &id, EventType::MediaCreated);
                Ok(id)
            }
        })?;

        self.get(collection, &id)
    }

    fn update(&mut self, collection: Collection, id: &str, patch: &Patch) -> Result<LiveEntity> {
        let now = chrono::Utc::now().timestamp_millis();

        match (collection, patch) {
            (Collection::Posts, Patch::Post(patch)) => {
                let before = self
                    .find_posts(&Filter::Id(id.to_string()))?
                    .into_iter()
                    .next()
                    .ok_or_else(|| not_found(collection, id))?;
                self.mutate("update_post", |tx, ctx| update_post(tx, ctx, &before, patch, now))?;
            }
            (Collection::Categories, Patch::Category(patch)) => {
                self.mutate("update_category", |tx, ctx| {
                    update_category(tx, ctx, id, patch, now)
                })?;
            }
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "patch does not apply to {collection}"
                )));
            }
        }

        self.get(collection, id)
    }

    fn delete(&mut self, collection: Collection, id: &str) -> Result<()> {
        self.mutate("delete", |tx, ctx| {
            match collection {
                Collection::Posts => {}
                Collection::Categories => {
                    let children: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM categories WHERE parent_id = ?1",
                        [id],
                        |row| row.get(0),
                    )?;
                    let posts: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM post_categories WHERE category_id = ?1",
                        [id],
                        |row| row.get(0),
                    )?;
                    if children > 0 || posts > 0 {
                        return Err(Error::Constraint(format!(
                            "category {id} still has {children} child categories and {posts} posts"
                        )));
                    }
                }
                Collection::Media => {
                    let heroes: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM posts WHERE hero_image_id = ?1",
                        [id],
                        |row| row.get(0),
                    )?;
                    if heroes > 0 {
                        return Err(Error::Constraint(format!(
                            "media {id} is the hero image of {heroes} posts"
                        )));
                    }
                }
            }

            let affected = tx.execute(
                &format!("DELETE FROM {} WHERE id = ?1", collection.as_str()),
                [id],
            )?;
            if affected == 0 {
                return Err(not_found(collection, id));
            }

            let event = match collection {
                Collection::Posts => EventType::PostDeleted,
                Collection::Categories => EventType::CategoryDeleted,
                Collection::Media => EventType::MediaDeleted,
            };
            ctx.record_event(collection.entity_type(), id, event);
            Ok(())
        })
    }
}

fn update_post(
    tx: &Transaction,
    ctx: &mut MutationContext,
    before: &Post,
    patch: &PostPatch,
    now: i64,
) -> Result<()> {
    if let Some(title) = &patch.title {
        tx.execute(
            "UPDATE posts SET title = ?1 WHERE id = ?2",
            rusqlite::params![title, before.id],
        )?;
    }
    if let Some(body) = &patch.body_html {
        tx.execute(
            "UPDATE posts SET body_html = ?1 WHERE id = ?2",
            rusqlite::params![body, before.id],
        )?;
    }
    if let Some(categories) = &patch.categories {
        tx.execute("DELETE FROM post_categories WHERE post_id = ?1", [&before.id])?;
        link_categories(tx, &before.id, categories)?;
    }
    if let Some(hero) = &patch.hero_image {
        tx.execute(
            "UPDATE posts SET hero_image_id = ?1 WHERE id = ?2",
            rusqlite::params![hero, before.id],
        )?;
    }
    tx.execute(
        "UPDATE posts SET updated_at = ?1 WHERE id = ?2",
        rusqlite::params![now, before.id],
    )?;

    let content_changed =
        patch.title.is_some() || patch.body_html.is_some() || patch.categories.is_some();
    if content_changed {
        ctx.record_event("post", &before.id, EventType::PostUpdated);
    }
    if let Some(hero) = &patch.hero_image {
        if *hero != before.hero_image {
            ctx.record_change(
                "post",
                &before.id,
                EventType::PostRelinked,
                before.hero_image.clone(),
                hero.clone(),
            );
        }
    }
    Ok(())
}

fn update_category(
    tx: &Transaction,
    ctx: &mut MutationContext,
    id: &str,
    patch: &CategoryPatch,
    now: i64,
) -> Result<()> {
    let old_parent: Option<String> = tx
        .query_row(
            "SELECT parent_id FROM categories WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| not_found(Collection::Categories, id))?;

    if let Some(title) = &patch.title {
        tx.execute(
            "UPDATE categories SET title = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![title, now, id],
        )?;
    }

    if let Some(parent) = &patch.parent {
        if let Some(parent_id) = parent {
            require_category(tx, parent_id)?;
            if parent_id == id || is_ancestor(tx, id, parent_id)? {
                return Err(Error::CycleDetected {
                    child: id.to_string(),
                    parent: parent_id.clone(),
                });
            }
        }
        tx.execute(
            "UPDATE categories SET parent_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![parent, now, id],
        )?;
        ctx.record_change(
            "category",
            id,
            EventType::CategoryUpdated,
            old_parent,
            parent.clone(),
        );
    } else if patch.title.is_some() {
        ctx.record_event("category", id, EventType::CategoryUpdated);
    }
    Ok(())
}

/// True if `ancestor` appears on the parent chain starting at `start`.
fn is_ancestor(tx: &Transaction, ancestor: &str, start: &str) -> Result<bool> {
    let mut seen = HashSet::new();
    let mut current = Some(start.to_string());
    while let Some(node) = current {
        if node == ancestor {
            return Ok(true);
        }
        if !seen.insert(node.clone()) {
            return Ok(false);
        }
        current = tx
            .query_row(
                "SELECT parent_id FROM categories WHERE id = ?1",
                [&node],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
    }
    Ok(false)
}

fn require_category(tx: &Transaction, id: &str) -> Result<()> {
    let exists: Option<String> = tx
        .query_row("SELECT id FROM categories WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()?;
    exists
        .map(|_| ())
        .ok_or_else(|| not_found(Collection::Categories, id))
}

fn link_categories(tx: &Transaction, post_id: &str, categories: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for (position, category_id) in categories.iter().enumerate() {
        if !seen.insert(category_id.as_str()) {
            continue;
        }
        tx.execute(
            "INSERT INTO post_categories (post_id, category_id, position) VALUES (?1, ?2, ?3)",
            rusqlite::params![post_id, category_id, i64::try_from(position).unwrap_or(i64::MAX)],
        )?;
    }
    Ok(())
}

fn map_post_row(row: &rusqlite::Row) -> rusqlite::Result<(Post, String)> {
    Ok((
        Post {
            id: row.get(0)?,
            slug: row.get(1)?,
            title: row.get(2)?,
            body_html: row.get(3)?,
            published_at: row.get(4)?,
            hero_image: row.get(5)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            categories: Vec::new(),
            authors: Vec::new(),
        },
        row.get(6)?,
    ))
}

fn map_category_row(row: &rusqlite::Row) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        parent: row.get(3)?,
    })
}

fn map_media_row(row: &rusqlite::Row) -> rusqlite::Result<MediaAsset> {
    let file_size: Option<i64> = row.get(5)?;
    Ok(MediaAsset {
        id: row.get(0)?,
        filename: row.get(1)?,
        url: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        file_size_bytes: file_size.and_then(|n| u64::try_from(n).ok()),
        created_at: row.get(6)?,
    })
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

fn not_found(collection: Collection, id: &str) -> Error {
    Error::NotFound {
        collection: collection.entity_type().to_string(),
        id: id.to_string(),
    }
}

/// Separate permanent constraint failures from other database errors.
fn classify(err: Error) -> Error {
    match err {
        Error::Database(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Constraint(msg.unwrap_or_else(|| e.to_string()))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewCategory, NewMedia, NewPost};

    fn category(store: &mut SqliteStore, title: &str, slug: &str) -> String {
        store
            .create(&Payload::Category(NewCategory {
                title: title.into(),
                slug: slug.into(),
                parent: None,
            }))
            .unwrap()
            .id()
            .to_string()
    }

    fn media(store: &mut SqliteStore, filename: &str) -> String {
        store
            .create(&Payload::Media(NewMedia {
                filename: filename.into(),
                url: format!("/blobs/{filename}"),
                width: Some(800),
                height: Some(600),
                file_size_bytes: Some(1024),
            }))
            .unwrap()
            .id()
            .to_string()
    }

    fn post(slug: &str, categories: Vec<String>, hero: Option<String>) -> Payload {
        Payload::Post(NewPost {
            slug: slug.into(),
            title: "Title".into(),
            body_html: "<p>Body</p>".into(),
            published_at: 1_700_000_000_000,
            authors: vec!["Ana".into()],
            categories,
            hero_image: hero,
        })
    }

    fn set_parent(store: &mut SqliteStore, id: &str, parent: Option<&str>) -> Result<LiveEntity> {
        store.update(
            Collection::Categories,
            id,
            &Patch::Category(CategoryPatch {
                title: None,
                parent: Some(parent.map(str::to_string)),
            }),
        )
    }

    #[test]
    fn test_open_memory() {
        let store = SqliteStore::open_memory();
        assert!(store.is_ok());
        assert!(store.unwrap().ping().is_ok());
    }

    #[test]
    fn test_post_round_trip_keeps_category_order() {
        let mut store = SqliteStore::open_memory().unwrap();
        let a = category(&mut store, "A", "a");
        let b = category(&mut store, "B", "b");
        let hero = media(&mut store, "hero.jpg");

        let created = store
            .create(&post("foo", vec![b.clone(), a.clone()], Some(hero.clone())))
            .unwrap();
        assert!(created.id().starts_with("post_"));

        let found = store
            .find(Collection::Posts, &Filter::Slug("foo".into()))
            .unwrap();
        assert_eq!(found.len(), 1);
        let found = found.into_iter().next().unwrap().into_post().unwrap();
        assert_eq!(found.categories, vec![b, a]);
        assert_eq!(found.hero_image, Some(hero));
        assert_eq!(found.authors, vec!["Ana".to_string()]);
    }

    #[test]
    fn test_duplicate_slug_is_constraint_violation() {
        let mut store = SqliteStore::open_memory().unwrap();
        store.create(&post("foo", vec![], None)).unwrap();

        let err = store.create(&post("foo", vec![], None)).unwrap_err();
        assert!(matches!(err, Error::Constraint(_)), "got {err:?}");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parent_cycle_is_rejected() {
        let mut store = SqliteStore::open_memory().unwrap();
        let a = category(&mut store, "A", "a");
        let b = category(&mut store, "B", "b");
        let c = category(&mut store, "C", "c");

        set_parent(&mut store, &b, Some(&a)).unwrap();
        set_parent(&mut store, &c, Some(&b)).unwrap();

        let err = set_parent(&mut store, &a, Some(&c)).unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));

        let err = set_parent(&mut store, &a, Some(&a)).unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));

        let moved = set_parent(&mut store, &c, None).unwrap();
        assert_eq!(moved.into_category().unwrap().parent, None);
    }

    #[test]
    fn test_hero_change_records_relink_event() {
        let mut store = SqliteStore::open_memory().unwrap();
        let old = media(&mut store, "a.jpg");
        let new = media(&mut store, "b.jpg");
        let id = store
            .create(&post("foo", vec![], Some(old.clone())))
            .unwrap()
            .id()
            .to_string();

        store
            .update(
                Collection::Posts,
                &id,
                &Patch::Post(PostPatch {
                    hero_image: Some(Some(new.clone())),
                    ..PostPatch::default()
                }),
            )
            .unwrap();

        let events = store.recent_events(1).unwrap();
        assert_eq!(events[0].event_type, EventType::PostRelinked);
        assert_eq!(events[0].old_value, Some(old));
        assert_eq!(events[0].new_value, Some(new));
    }

    #[test]
    fn test_delete_refuses_referenced_entities() {
        let mut store = SqliteStore::open_memory().unwrap();
        let cat = category(&mut store, "A", "a");
        let hero = media(&mut store, "a.jpg");
        let id = store
            .create(&post("foo", vec![cat.clone()], Some(hero.clone())))
            .unwrap()
            .id()
            .to_string();

        assert!(matches!(
            store.delete(Collection::Categories, &cat),
            Err(Error::Constraint(_))
        ));
        assert!(matches!(
            store.delete(Collection::Media, &hero),
            Err(Error::Constraint(_))
        ));

        store.delete(Collection::Posts, &id).unwrap();
        store.delete(Collection::Categories, &cat).unwrap();
        store.delete(Collection::Media, &hero).unwrap();
        assert_eq!(store.counts().unwrap().posts, 0);

        assert!(matches!(
            store.delete(Collection::Posts, &id),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_counts() {
        let mut store = SqliteStore::open_memory().unwrap();
        category(&mut store, "A", "a");
        media(&mut store, "a.jpg");
        let counts = store.counts().unwrap();
        assert_eq!(counts.categories, 1);
        assert_eq!(counts.media, 1);
        assert_eq!(counts.posts, 0);
        assert_eq!(counts.events, 2);
    }
}
