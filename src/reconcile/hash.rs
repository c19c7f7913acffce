//! Content hashing for change detection.
//!
//! A post's source-of-truth fields are hashed on both sides (source article
//! and live post) and compared; equal hashes mean there is nothing to write.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// SHA256 hex digest of the JSON serialization of `value`.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Serialize)]
struct PostFingerprint<'a> {
    title: &'a str,
    body: &'a str,
    categories: Vec<&'a str>,
}

/// Hash of title, body and the category key set.
///
/// Category order and repeats do not affect the result.
///
/// # Errors
///
/// Returns an error if hashing fails.
pub fn post_hash(title: &str, body: &str, category_keys: &[String]) -> Result<String> {
    let mut categories: Vec<&str> = category_keys.iter().map(String::as_str).collect();
    categories.sort_unstable();
    categories.dedup();
    content_hash(&PostFingerprint {
        title,
        body,
        categories,
    })
}
