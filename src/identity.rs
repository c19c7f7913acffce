//! Identity keys for matching export records against live entities.
//!
//! Every function here is pure and total: no I/O, no locale, no panics.
//! The same input always yields the same key, which is what makes repeated
//! runs converge.

use std::collections::HashMap;
use std::sync::LazyLock;

use url::Url;

/// Maximum slug length accepted by the live store's slug columns.
pub const MAX_SLUG_LEN: usize = 96;

/// Diacritic → base Latin substitutions applied after lower-casing.
///
/// Covers Romanian (both comma-below and legacy cedilla forms), the common
/// Western European letters and the Central European ones seen in the export.
pub static TRANSLITERATIONS: &[(char, &str)] = &[
    // Romanian
    ('ă', "a"),
    ('â', "a"),
    ('î', "i"),
    ('ș', "s"),
    ('ş', "s"),
    ('ț', "t"),
    ('ţ', "t"),
    // Western European
    ('à', "a"),
    ('á', "a"),
    ('ä', "a"),
    ('ã', "a"),
    ('å', "a"),
    ('æ', "ae"),
    ('ç', "c"),
    ('è', "e"),
    ('é', "e"),
    ('ê', "e"),
    ('ë', "e"),
    ('ì', "i"),
    ('í', "i"),
    ('ï', "i"),
    ('ñ', "n"),
    ('ò', "o"),
    ('ó', "o"),
    ('ô', "o"),
    ('ö', "o"),
    ('õ', "o"),
    ('ø', "o"),
    ('œ', "oe"),
    ('ß', "ss"),
    ('ù', "u"),
    ('ú', "u"),
    ('û', "u"),
    ('ü', "u"),
    ('ý', "y"),
    ('ÿ', "y"),
    // Central European
    ('č', "c"),
    ('ć', "c"),
    ('đ', "d"),
    ('ě', "e"),
    ('ł', "l"),
    ('ń', "n"),
    ('ő', "o"),
    ('ř', "r"),
    ('ś', "s"),
    ('š', "s"),
    ('ű', "u"),
    ('ź', "z"),
    ('ż', "z"),
    ('ž', "z"),
];

static TRANSLITERATION_MAP: LazyLock<HashMap<char, &'static str>> =
    LazyLock::new(|| TRANSLITERATIONS.iter().copied().collect());

/// Image extensions stripped by [`normalize_media_basename`].
pub const KNOWN_MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "svg", "bmp", "tif", "tiff", "heic",
];

/// Look up the base Latin replacement for a lower-case letter.
#[must_use]
pub fn transliterate(c: char) -> Option<&'static str> {
    TRANSLITERATION_MAP.get(&c).copied()
}

/// Normalize a title or raw slug into a URL slug.
///
/// The result always matches `^[a-z0-9-]*$`, never starts or ends with a
/// hyphen, never contains `--`, and is at most [`MAX_SLUG_LEN`] bytes.
#[must_use]
pub fn normalize_slug(input: &str) -> String {
    let lower = input.to_lowercase();

    let mut kept = String::with_capacity(lower.len());
    for c in lower.chars() {
        if let Some(replacement) = transliterate(c) {
            kept.push_str(replacement);
            continue;
        }
        match c {
            'a'..='z' | '0'..='9' | '-' => kept.push(c),
            c if c.is_whitespace() => kept.push(' '),
            _ => {}
        }
    }

    // Whitespace and hyphen runs both become a single separator.
    let mut slug = String::with_capacity(kept.len());
    let mut pending_separator = false;
    for c in kept.chars() {
        if c == ' ' || c == '-' {
            pending_separator = true;
            continue;
        }
        if pending_separator && !slug.is_empty() {
            slug.push('-');
        }
        pending_separator = false;
        slug.push(c);
    }

    // ASCII only at this point, so byte truncation is char-safe.
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
    }
    slug.trim_end_matches('-').to_string()
}

/// Decode `%XX` escapes (WordPress stores non-ASCII slugs percent-encoded).
///
/// Malformed escapes are kept literally; invalid UTF-8 is replaced.
#[must_use]
pub fn decode_percent(input: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(input.as_bytes())).into_owned()
}

/// The decoded filename a URL or path points at.
///
/// `http(s)` and `file` URLs are split by [`Url`]; anything else is treated
/// as a plain path. Separators that only appear after decoding (`%2F`,
/// `%3F`, `%23`, `%5C`) become `-`, so the result is a single segment and
/// feeding it back in yields the same name.
#[must_use]
pub fn media_filename(url_or_path: &str) -> String {
    let segment = Url::parse(url_or_path)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https" | "file"))
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .unwrap_or_else(|| {
            let without_query = url_or_path.split(['?', '#']).next().unwrap_or_default();
            without_query
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or_default()
                .to_string()
        });
    decode_percent(&segment).replace(['/', '\\', '?', '#'], "-")
}

/// Compute the identity key shared by every upload of the same logical image.
///
/// Accepts a bare filename or a URL. `photo.jpg`, `photo-2.jpg`,
/// `photo.webp`, `photo-1024x768.jpg` and `photo-scaled.jpg` all map to
/// `photo`.
#[must_use]
pub fn normalize_media_basename(filename: &str) -> String {
    let name = media_filename(filename).trim().to_lowercase();

    let stem = strip_known_extension(&name);
    let stem = strip_marker(stem, "-scaled");
    let stem = strip_size_suffix(stem);
    let stem = strip_featured_suffix(stem);
    let stem = strip_numeric_suffix(stem);
    stem.to_string()
}

/// Canonical key for a category title: trimmed and case-folded, nothing else.
#[must_use]
pub fn normalize_category_title(title: &str) -> String {
    title.trim().to_lowercase()
}

fn strip_known_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && KNOWN_MEDIA_EXTENSIONS.contains(&ext) => stem,
        _ => name,
    }
}

fn strip_marker<'a>(stem: &'a str, marker: &str) -> &'a str {
    match stem.strip_suffix(marker) {
        Some(rest) if !rest.is_empty() => rest,
        _ => stem,
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// `name-1024x768` → `name`
fn strip_size_suffix(stem: &str) -> &str {
    if let Some((rest, size)) = stem.rsplit_once('-') {
        if let Some((w, h)) = size.split_once('x') {
            if !rest.is_empty() && is_digits(w) && is_digits(h) {
                return rest;
            }
        }
    }
    stem
}

/// `name-featured-3` → `name`
fn strip_featured_suffix(stem: &str) -> &str {
    if let Some((rest, digits)) = stem.rsplit_once('-') {
        if is_digits(digits) {
            if let Some(base) = rest.strip_suffix("-featured") {
                if !base.is_empty() {
                    return base;
                }
            }
        }
    }
    stem
}

/// `name-2` → `name`
fn strip_numeric_suffix(stem: &str) -> &str {
    match stem.rsplit_once('-') {
        Some((rest, digits)) if !rest.is_empty() && is_digits(digits) => rest,
        _ => stem,
    }
}
