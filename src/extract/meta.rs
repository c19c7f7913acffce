//! Attachment metadata embedded in the export.
//!
//! WordPress stores `_wp_attachment_metadata` as a PHP-serialized array:
//!
//! ```text
//! a:5:{s:5:"width";i:800;s:6:"height";i:600;s:4:"file";s:14:"2021/03/a.jpg";
//!      s:8:"filesize";i:48213;s:5:"sizes";a:0:{}}
//! ```
//!
//! Only top-level integer values are of interest. Anything malformed yields
//! empty metadata rather than an error: the fields are optional hints.

use std::collections::HashMap;

/// Dimensions and size declared for an attachment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachmentMeta {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_size: Option<u64>,
}

/// Parse the serialized metadata blob.
#[must_use]
pub fn parse_attachment_meta(blob: &str) -> AttachmentMeta {
    let mut parser = Parser {
        input: blob.trim().as_bytes(),
        pos: 0,
    };
    let Some(Value::Array(entries)) = parser.value() else {
        return AttachmentMeta::default();
    };

    let ints: HashMap<String, i64> = entries
        .into_iter()
        .filter_map(|(key, value)| match (key, value) {
            (Value::Str(k), Value::Int(v)) => Some((k, v)),
            (Value::Str(k), Value::Str(s)) => s.trim().parse().ok().map(|v| (k, v)),
            _ => None,
        })
        .collect();

    AttachmentMeta {
        width: ints.get("width").and_then(|v| u32::try_from(*v).ok()).filter(|v| *v > 0),
        height: ints.get("height").and_then(|v| u32::try_from(*v).ok()).filter(|v| *v > 0),
        file_size: ints.get("filesize").and_then(|v| u64::try_from(*v).ok()),
    }
}

#[derive(Debug)]
enum Value {
    Int(i64),
    Str(String),
    Array(Vec<(Value, Value)>),
    Other,
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn value(&mut self) -> Option<Value> {
        let tag = *self.input.get(self.pos)?;
        match tag {
            b'N' => {
                self.expect(b"N;")?;
                Some(Value::Other)
            }
            b'i' => {
                self.expect(b"i:")?;
                let raw = self.until(b';')?;
                Some(Value::Int(raw.parse().ok()?))
            }
            b'b' | b'd' => {
                self.pos += 2;
                self.until(b';')?;
                Some(Value::Other)
            }
            b's' => {
                self.expect(b"s:")?;
                let len: usize = self.until(b':')?.parse().ok()?;
                self.expect(b"\"")?;
                let end = self.pos.checked_add(len)?;
                let bytes = self.input.get(self.pos..end)?;
                let s = String::from_utf8_lossy(bytes).into_owned();
                self.pos = end;
                self.expect(b"\";")?;
                Some(Value::Str(s))
            }
            b'a' => {
                self.expect(b"a:")?;
                let count: usize = self.until(b':')?.parse().ok()?;
                self.expect(b"{")?;
                let mut entries = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    let key = self.value()?;
                    let value = self.value()?;
                    entries.push((key, value));
                }
                self.expect(b"}")?;
                Some(Value::Array(entries))
            }
            _ => None,
        }
    }

    fn expect(&mut self, token: &[u8]) -> Option<()> {
        if self.input.get(self.pos..self.pos + token.len())? == token {
            self.pos += token.len();
            Some(())
        } else {
            None
        }
    }

    /// Read up to (and consume) `delim`, returning the text before it.
    fn until(&mut self, delim: u8) -> Option<String> {
        let rest = self.input.get(self.pos..)?;
        let offset = rest.iter().position(|b| *b == delim)?;
        let text = String::from_utf8_lossy(&rest[..offset]).into_owned();
        self.pos += offset + 1;
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typical_metadata() {
        let blob = r#"a:5:{s:5:"width";i:800;s:6:"height";i:600;s:4:"file";s:13:"2021/03/a.jpg";s:8:"filesize";i:48213;s:5:"sizes";a:1:{s:5:"thumb";a:2:{s:5:"width";i:150;s:6:"height";i:150;}}}"#;
        let meta = parse_attachment_meta(blob);
        assert_eq!(meta.width, Some(800));
        assert_eq!(meta.height, Some(600));
        assert_eq!(meta.file_size, Some(48213));
    }

    #[test]
    fn test_nested_sizes_do_not_override_top_level() {
        let blob = r#"a:2:{s:5:"sizes";a:1:{s:5:"large";a:1:{s:5:"width";i:1024;}}s:5:"width";i:300;}"#;
        let meta = parse_attachment_meta(blob);
        assert_eq!(meta.width, Some(300));
        assert_eq!(meta.height, None);
    }

    #[test]
    fn test_malformed_blob_yields_empty_meta() {
        assert_eq!(parse_attachment_meta(""), AttachmentMeta::default());
        assert_eq!(parse_attachment_meta("not php"), AttachmentMeta::default());
        assert_eq!(
            parse_attachment_meta(r#"a:2:{s:5:"width";i:800;"#),
            AttachmentMeta::default()
        );
    }

    #[test]
    fn test_string_encoded_numbers_and_zero_dimensions() {
        let blob = r#"a:3:{s:5:"width";s:3:"640";s:6:"height";i:0;s:8:"filesize";b:0;}"#;
        let meta = parse_attachment_meta(blob);
        assert_eq!(meta.width, Some(640));
        assert_eq!(meta.height, None);
        assert_eq!(meta.file_size, None);
    }
}
