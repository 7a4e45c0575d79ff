//! OPML subscription list import and export.
//!
//! Unlike feed documents, OPML files are parsed with a real XML reader:
//! they are supplied by the user, small, and expected to be well formed.

use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::storage::Feed;
use crate::util::validate_feed_url;

/// Maximum allowed nesting depth for OPML outline elements.
const MAX_OPML_DEPTH: usize = 50;

const EXPORT_TITLE: &str = "feedsync subscriptions";

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for OpmlError {
    fn from(err: quick_xml::Error) -> Self {
        OpmlError::XmlParse(err.to_string())
    }
}

/// A subscription entry of an OPML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlFeed {
    /// `title`, falling back to `text`, then to the URL itself
    pub title: String,
    /// The feed document URL (`xmlUrl`)
    pub url: String,
}

impl From<&Feed> for OpmlFeed {
    fn from(feed: &Feed) -> Self {
        Self {
            title: feed.title.clone(),
            url: feed.url.clone(),
        }
    }
}

/// Reads and parses an OPML file from disk.
pub async fn read_opml_file(path: &Path) -> Result<Vec<OpmlFeed>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml(&content)
}

/// Parses an OPML document into subscriptions.
///
/// Every `<outline>` carrying an `xmlUrl` is a subscription, whatever its
/// nesting; folder outlines are traversed but not returned. URLs failing
/// [`validate_feed_url`] and repeated URLs are skipped with a warning.
///
/// Entity declarations in a DOCTYPE are never expanded: quick-xml only
/// resolves the five predefined entities, and anything else is an error.
pub fn parse_opml(content: &str) -> Result<Vec<OpmlFeed>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    let mut seen = HashSet::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                push_outline(&e, &reader, &mut feeds, &mut seen)?;
            }
            // Self-closing outline doesn't affect depth
            Event::Empty(e) if e.name().as_ref() == b"outline" => {
                push_outline(&e, &reader, &mut feeds, &mut seen)?;
            }
            Event::End(e) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(feeds)
}

fn push_outline(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    feeds: &mut Vec<OpmlFeed>,
    seen: &mut HashSet<String>,
) -> Result<(), OpmlError> {
    let mut url = None;
    let mut title = None;
    let mut text = None;

    for attr in e.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = || attr.decode_and_unescape_value(reader.decoder());
        match attr.key.as_ref() {
            b"xmlUrl" => url = Some(value()?.trim().to_string()),
            b"title" => title = Some(value()?.trim().to_string()),
            b"text" => text = Some(value()?.trim().to_string()),
            _ => {}
        }
    }

    let Some(url) = url else {
        return Ok(());
    };
    if let Err(e) = validate_feed_url(&url) {
        tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
        return Ok(());
    }
    if !seen.insert(url.clone()) {
        tracing::debug!(url = %url, "Skipping duplicate OPML entry");
        return Ok(());
    }

    let title = title
        .filter(|t| !t.is_empty())
        .or(text.filter(|t| !t.is_empty()))
        .unwrap_or_else(|| url.clone());
    feeds.push(OpmlFeed { title, url });
    Ok(())
}

/// Renders subscriptions as an OPML 2.0 document.
pub fn export_opml(feeds: &[OpmlFeed]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .context("Failed to write head element")?;
    write_text_element(&mut writer, "title", EXPORT_TITLE)?;
    write_text_element(
        &mut writer,
        "dateCreated",
        &chrono::Utc::now().to_rfc2822(),
    )?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .context("Failed to write head end")?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;

    for feed in feeds {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("text", feed.title.as_str()));
        outline.push_attribute(("title", feed.title.as_str()));
        outline.push_attribute(("xmlUrl", feed.url.as_str()));
        writer
            .write_event(Event::Empty(outline))
            .context("Failed to write outline element")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .context("Failed to write body end")?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .context("Failed to write opml end")?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).context("Generated OPML contains invalid UTF-8")
}

fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    text: &str,
) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .with_context(|| format!("Failed to write {name} element"))?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .with_context(|| format!("Failed to write {name} text"))?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .with_context(|| format!("Failed to write {name} end"))?;
    Ok(())
}

/// Writes subscriptions to an OPML file atomically.
///
/// The document goes to a temporary sibling first, is synced, then renamed
/// over `path`, so the destination is never left half written.
pub fn export_to_file(feeds: &[OpmlFeed], path: &Path) -> Result<()> {
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    let content = export_opml(feeds)?;

    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let write_temp = || -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()
    };

    if let Err(e) = write_temp() {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e).with_context(|| {
            format!("Failed to write temporary file '{}'", temp_path.display())
        });
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to rename '{}' to '{}'",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
