//! Data models for press-sync.
//!
//! This module contains both sides of a reconciliation:
//! - [`source`] - records parsed from an export snapshot (transient)
//! - [`live`] - entities held by the live content store (durable)

pub mod live;
pub mod source;

pub use live::{Category, Collection, LiveEntity, MediaAsset, Post};
pub use source::{Article, Attachment, CategoryRef, SourceRecord};
