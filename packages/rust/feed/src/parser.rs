//! Streaming RSS 2.0 / RSS 1.0 / Atom parser built on `quick_xml::Reader`.
//!
//! Only the handful of fields the pipeline needs are extracted. Unknown
//! elements and namespaces are ignored, so extension-heavy feeds still parse.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, BytesText, Event};
use sieve_shared::{Item, Result, SieveError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Description,
    Content,
    Published,
    Updated,
    Guid,
}

impl Field {
    /// Map a qualified element name to a field. Extension namespaces such as
    /// `itunes:` or `media:` never match, even when their local name does.
    fn from_qualified_name(name: &[u8]) -> Option<Self> {
        match split_prefix(name) {
            (None, b"title") => Some(Self::Title),
            (None, b"link") => Some(Self::Link),
            (None, b"description" | b"summary") => Some(Self::Description),
            (None, b"content") | (Some(b"content"), b"encoded") => Some(Self::Content),
            (None, b"pubDate" | b"published") | (Some(b"dc"), b"date") => Some(Self::Published),
            (None, b"updated") => Some(Self::Updated),
            (None, b"guid" | b"id") => Some(Self::Guid),
            _ => None,
        }
    }
}

/// Split `prefix:local`. An explicit `atom:` prefix counts as unprefixed.
fn split_prefix(name: &[u8]) -> (Option<&[u8]>, &[u8]) {
    match name.iter().position(|&b| b == b':') {
        Some(idx) => match &name[..idx] {
            b"atom" => (None, &name[idx + 1..]),
            prefix => (Some(prefix), &name[idx + 1..]),
        },
        None => (None, name),
    }
}

fn is_link(name: &[u8]) -> bool {
    split_prefix(name) == (None, b"link".as_slice())
}

#[derive(Debug, Default)]
struct RawEntry {
    title: String,
    link: Option<String>,
    description: String,
    content: String,
    published: Option<String>,
    updated: Option<String>,
    guid: Option<String>,
}

impl RawEntry {
    fn push(&mut self, field: Field, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let append = |buf: &mut String| {
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(text);
        };
        match field {
            Field::Title => append(&mut self.title),
            Field::Description => append(&mut self.description),
            Field::Content => append(&mut self.content),
            Field::Link => {
                self.link.get_or_insert_with(|| text.to_owned());
            }
            Field::Published => {
                self.published.get_or_insert_with(|| text.to_owned());
            }
            Field::Updated => {
                self.updated.get_or_insert_with(|| text.to_owned());
            }
            Field::Guid => {
                self.guid.get_or_insert_with(|| text.to_owned());
            }
        }
    }

    fn into_item(self, source: &str, now: DateTime<Utc>) -> Option<Item> {
        let link = self
            .link
            .or_else(|| self.guid.filter(|g| g.starts_with("http://") || g.starts_with("https://")))?;

        let published_at = self
            .published
            .as_deref()
            .and_then(parse_date)
            .or_else(|| self.updated.as_deref().and_then(parse_date))
            .unwrap_or(now);

        Some(
            Item::new(source, self.title, link, published_at)
                .with_description(self.description)
                .with_content(self.content),
        )
    }
}

/// Parse RFC 2822 (RSS) or RFC 3339 (Atom, Dublin Core) timestamps.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// `href` of an Atom `<link>`, skipping non-alternate relations.
fn atom_href(element: &BytesStart<'_>) -> Option<String> {
    let mut href = None;
    let mut rel = None;
    for attr in element.attributes().flatten() {
        let value = attr.unescape_value().ok()?.into_owned();
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(value),
            b"rel" => rel = Some(value),
            _ => {}
        }
    }
    match rel.as_deref() {
        None | Some("alternate") => href,
        _ => None,
    }
}

fn text_of(text: &BytesText<'_>) -> String {
    // HTML entities such as &nbsp; are not valid XML; keep them verbatim.
    text.unescape()
        .map(|t| t.into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(text).into_owned())
}

/// Parse a feed document into items tagged with `source`.
/// Entries without a usable link are dropped.
pub fn parse_feed(xml: &str, source: &str) -> Result<Vec<Item>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let now = Utc::now();
    let mut items = Vec::new();
    let mut saw_root = false;
    let mut depth = 0usize;
    let mut entry: Option<RawEntry> = None;
    let mut entry_depth = 0usize;
    let mut field: Option<(Field, usize)> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            SieveError::parse(format!(
                "invalid feed XML at byte {}: {e}",
                reader.buffer_position()
            ))
        })?;

        match event {
            Event::Start(e) => {
                depth += 1;
                let local = e.local_name();
                let name = local.as_ref();
                if depth == 1 {
                    saw_root = matches!(name, b"rss" | b"feed" | b"RDF");
                }
                if entry.is_none() && matches!(name, b"item" | b"entry") {
                    entry = Some(RawEntry::default());
                    entry_depth = depth;
                } else if let Some(current) = entry.as_mut() {
                    if field.is_none() && depth == entry_depth + 1 {
                        let qualified = e.name();
                        if is_link(qualified.as_ref()) {
                            if let Some(href) = atom_href(&e) {
                                current.link.get_or_insert(href);
                            }
                        }
                        field = Field::from_qualified_name(qualified.as_ref()).map(|f| (f, depth));
                    }
                }
            }
            Event::Empty(e) => {
                if let Some(current) = entry.as_mut() {
                    if depth == entry_depth && is_link(e.name().as_ref()) {
                        if let Some(href) = atom_href(&e) {
                            current.link.get_or_insert(href);
                        }
                    }
                }
            }
            Event::Text(t) => {
                if let (Some(current), Some((f, _))) = (entry.as_mut(), field) {
                    current.push(f, &text_of(&t));
                }
            }
            Event::CData(c) => {
                if let (Some(current), Some((f, _))) = (entry.as_mut(), field) {
                    current.push(f, &String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                if field.is_some_and(|(_, d)| d == depth) {
                    field = None;
                }
                if entry.is_some() && depth == entry_depth {
                    if let Some(raw) = entry.take() {
                        match raw.into_item(source, now) {
                            Some(item) => items.push(item),
                            None => debug!(source, "dropping feed entry without link"),
                        }
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(SieveError::parse("document is not an RSS or Atom feed"));
    }

    Ok(items)
}
