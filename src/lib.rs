//! press-sync: reconcile a publishing export into a live content store.
//!
//! This crate provides the engine and the `psync` CLI.
//!
//! # Architecture
//!
//! - [`extract`] - WXR export parsing into source records
//! - [`identity`] - Slug and title normalization for matching
//! - [`model`] - Source records and live entities
//! - [`storage`] - The live store trait and its SQLite implementation
//! - [`blob`] - Media fetching and blob upload
//! - [`reconcile`] - Matching, planning, batch apply, orphan detection and pruning
//! - [`config`] - Configuration management
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod blob;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod identity;
pub mod model;
pub mod reconcile;
pub mod storage;

pub use error::{Error, Result};
