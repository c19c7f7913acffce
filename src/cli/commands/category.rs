//! Category hierarchy commands.
//!
//! The export carries no reliable hierarchy, so parents are set here, in the
//! live store, and the store refuses any change that would form a cycle.

use crate::cli::CategoryCommands;
use crate::config::load_config;
use crate::error::{Error, Result};
use crate::model::{Category, Collection, LiveEntity};
use crate::storage::{CategoryPatch, Filter, LiveStore, Patch};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct ParentOutput<'a> {
    id: &'a str,
    slug: &'a str,
    parent: Option<&'a str>,
    dry_run: bool,
}

/// Execute category commands.
///
/// # Errors
///
/// Returns an error if a category cannot be found or the new parent would
/// create a cycle.
pub fn execute(
    command: &CategoryCommands,
    db_path: Option<&PathBuf>,
    config_path: Option<&PathBuf>,
    actor: Option<&str>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(super::as_path(config_path))?;
    let mut store = super::open_store(db_path, actor, &config)?;
    match command {
        CategoryCommands::Parent { child, parent } => {
            set_parent(&mut store, child, parent.as_deref(), dry_run, json)
        }
        CategoryCommands::List => list(&store, json),
    }
}

/// Find a category by id, falling back to slug.
fn resolve(store: &dyn LiveStore, key: &str) -> Result<Category> {
    let by_id = store.find(Collection::Categories, &Filter::Id(key.to_string()))?;
    let found = if by_id.is_empty() {
        store.find(Collection::Categories, &Filter::Slug(key.to_string()))?
    } else {
        by_id
    };
    found
        .into_iter()
        .find_map(LiveEntity::into_category)
        .ok_or_else(|| Error::NotFound {
            collection: Collection::Categories.to_string(),
            id: key.to_string(),
        })
}

fn set_parent(
    store: &mut dyn LiveStore,
    child: &str,
    parent: Option<&str>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let child = resolve(store, child)?;
    let parent = parent.map(|p| resolve(store, p)).transpose()?;
    let parent_id = parent.as_ref().map(|p| p.id.clone());

    if !dry_run {
        let patch = Patch::Category(CategoryPatch {
            parent: Some(parent_id.clone()),
            ..CategoryPatch::default()
        });
        store.update(Collection::Categories, &child.id, &patch)?;
    }

    if json {
        let output = ParentOutput {
            id: &child.id,
            slug: &child.slug,
            parent: parent_id.as_deref(),
            dry_run,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        let verb = if dry_run { "Would move" } else { "Moved" };
        match &parent {
            Some(p) => println!("{verb} {} under {}", child.title, p.title),
            None => println!("{verb} {} to the root", child.title),
        }
    }
    Ok(())
}

fn list(store: &dyn LiveStore, json: bool) -> Result<()> {
    let mut categories: Vec<Category> = store
        .find(Collection::Categories, &Filter::All)?
        .into_iter()
        .filter_map(LiveEntity::into_category)
        .collect();
    categories.sort_by(|a, b| a.slug.cmp(&b.slug));

    if json {
        println!("{}", serde_json::to_string(&categories)?);
        return Ok(());
    }
    if categories.is_empty() {
        println!("No categories.");
        return Ok(());
    }
    for category in &categories {
        let parent = category
            .parent
            .as_deref()
            .and_then(|id| categories.iter().find(|c| c.id == id))
            .map_or("-", |p| p.slug.as_str());
        println!("  {:<32} {:<24} parent: {parent}", category.title, category.slug);
    }
    Ok(())
}
