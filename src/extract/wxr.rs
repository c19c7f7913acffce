//! Streaming reader for WordPress eXtended RSS (WXR) documents.
//!
//! Produces loosely-typed [`RawItem`]s; validation and typing happen in
//! [`super::extract`]. Only the elements the reconciler cares about are
//! captured, everything else is skipped.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, Result};

/// One `<item>` with the fields we read, as raw strings.
#[derive(Debug, Default, Clone)]
pub(crate) struct RawItem {
    pub post_id: String,
    pub title: String,
    pub post_name: String,
    pub post_date: String,
    pub post_date_gmt: String,
    pub creator: String,
    pub content: String,
    pub post_type: String,
    pub status: String,
    pub attachment_url: String,
    /// `<category domain="category">` display names (tags are ignored).
    pub categories: Vec<String>,
    /// `<wp:postmeta>` key/value pairs.
    pub meta: Vec<(String, String)>,
}

impl RawItem {
    /// First value stored under `key` in the item's postmeta.
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Everything read from the `<channel>`.
#[derive(Debug, Default)]
pub(crate) struct RawExport {
    /// `<wp:category><wp:cat_name>` entries declared at channel level.
    pub channel_categories: Vec<String>,
    pub items: Vec<RawItem>,
}

/// Parse a WXR document.
///
/// # Errors
///
/// Returns [`Error::MalformedExport`] on XML syntax errors, an unexpected
/// root element, a missing `<channel>`, or a truncated document.
pub(crate) fn parse(raw: &[u8]) -> Result<RawExport> {
    let mut reader = Reader::from_reader(raw);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut text = String::new();
    let mut saw_channel = false;

    let mut export = RawExport::default();
    let mut item: Option<RawItem> = None;
    let mut category_domain: Option<String> = None;
    let mut meta_key = String::new();
    let mut meta_value = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                if stack.is_empty() && name != b"rss" {
                    return Err(Error::MalformedExport(format!(
                        "root element is <{}>, expected <rss>",
                        String::from_utf8_lossy(&name)
                    )));
                }
                match name.as_slice() {
                    b"channel" if stack.len() == 1 => saw_channel = true,
                    b"item" if saw_channel => item = Some(RawItem::default()),
                    b"category" if item.is_some() => category_domain = attribute(&e, "domain"),
                    b"wp:postmeta" => {
                        meta_key.clear();
                        meta_value.clear();
                    }
                    _ => {}
                }
                stack.push(name);
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                if stack.is_empty() {
                    return Err(Error::MalformedExport(format!(
                        "root element is <{}/>, expected <rss>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
            }
            Ok(Event::Text(t)) => {
                let s = t
                    .unescape()
                    .map_err(|e| Error::MalformedExport(e.to_string()))?;
                text.push_str(&s);
            }
            Ok(Event::CData(c)) => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(_)) => {
                let Some(name) = stack.pop() else {
                    return Err(Error::MalformedExport("unbalanced closing tag".into()));
                };
                let value = std::mem::take(&mut text);
                let parent = stack.last().map(Vec::as_slice);

                match (name.as_slice(), parent) {
                    (b"item", _) => {
                        if let Some(done) = item.take() {
                            export.items.push(done);
                        }
                    }
                    (b"wp:cat_name", Some(b"wp:category")) if item.is_none() => {
                        export.channel_categories.push(value);
                    }
                    (b"wp:meta_key", Some(b"wp:postmeta")) => meta_key = value,
                    (b"wp:meta_value", Some(b"wp:postmeta")) => meta_value = value,
                    (b"wp:postmeta", _) => {
                        if let Some(current) = item.as_mut() {
                            current.meta.push((
                                std::mem::take(&mut meta_key),
                                std::mem::take(&mut meta_value),
                            ));
                        }
                    }
                    (field, Some(b"item")) => {
                        if let Some(current) = item.as_mut() {
                            assign_field(current, field, value, category_domain.take());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::MalformedExport(format!(
                    "XML error at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(Error::MalformedExport(
            "document ended inside an open element".into(),
        ));
    }
    if !saw_channel {
        return Err(Error::MalformedExport("no <channel> element".into()));
    }

    Ok(export)
}

fn assign_field(item: &mut RawItem, field: &[u8], value: String, domain: Option<String>) {
    match field {
        b"title" => item.title = value,
        b"dc:creator" => item.creator = value,
        b"content:encoded" => item.content = value,
        b"wp:post_id" => item.post_id = value,
        b"wp:post_name" => item.post_name = value,
        b"wp:post_date" => item.post_date = value,
        b"wp:post_date_gmt" => item.post_date_gmt = value,
        b"wp:post_type" => item.post_type = value,
        b"wp:status" => item.status = value,
        b"wp:attachment_url" => item.attachment_url = value,
        b"category" if domain.as_deref() == Some("category") => item.categories.push(value),
        _ => {}
    }
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:wp="http://wordpress.org/export/1.2/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:content="http://purl.org/rss/1.0/modules/content/">
<channel>
  <title>Blog</title>
  <wp:category><wp:term_id>3</wp:term_id><wp:cat_name><![CDATA[Har peste Har]]></wp:cat_name></wp:category>
  <item>
    <title>Hello &amp; welcome</title>
    <dc:creator><![CDATA[ana]]></dc:creator>
    <content:encoded><![CDATA[<p>Body</p>]]></content:encoded>
    <wp:post_id>2128</wp:post_id>
    <wp:post_name><![CDATA[foo]]></wp:post_name>
    <wp:post_type><![CDATA[post]]></wp:post_type>
    <category domain="post_tag" nicename="t"><![CDATA[Tag]]></category>
    <category domain="category" nicename="har"><![CDATA[Har peste Har]]></category>
    <wp:postmeta>
      <wp:meta_key><![CDATA[_thumbnail_id]]></wp:meta_key>
      <wp:meta_value><![CDATA[77]]></wp:meta_value>
    </wp:postmeta>
  </item>
</channel>
</rss>"#;

    #[test]
    fn test_parse_item_fields() {
        let export = parse(DOC.as_bytes()).unwrap();
        assert_eq!(export.channel_categories, vec!["Har peste Har"]);
        assert_eq!(export.items.len(), 1);

        let item = &export.items[0];
        assert_eq!(item.title, "Hello & welcome");
        assert_eq!(item.creator, "ana");
        assert_eq!(item.content, "<p>Body</p>");
        assert_eq!(item.post_id, "2128");
        assert_eq!(item.post_name, "foo");
        assert_eq!(item.post_type, "post");
        assert_eq!(item.categories, vec!["Har peste Har"]);
        assert_eq!(item.meta_value("_thumbnail_id"), Some("77"));
    }

    #[test]
    fn test_rejects_non_rss_root() {
        let err = parse(b"<feed><entry/></feed>").unwrap_err();
        assert!(matches!(err, Error::MalformedExport(_)));
    }

    #[test]
    fn test_rejects_missing_channel() {
        let err = parse(b"<rss version=\"2.0\"></rss>").unwrap_err();
        assert!(matches!(err, Error::MalformedExport(_)));
    }

    #[test]
    fn test_rejects_broken_xml() {
        let err = parse(b"<rss><channel><item><title>x</item></channel></rss>").unwrap_err();
        assert!(matches!(err, Error::MalformedExport(_)));

        let err = parse(b"<rss><channel><item>").unwrap_err();
        assert!(matches!(err, Error::MalformedExport(_)));
    }
}
