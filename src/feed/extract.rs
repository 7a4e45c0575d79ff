//! Pattern-based element and attribute lookup over raw feed markup.
//!
//! Feeds come from servers we do not control and routinely contain
//! unescaped ampersands, undeclared namespace prefixes and bogus encoding
//! declarations that a conforming XML parser rejects outright. Lookups here
//! therefore scan text with regular expressions instead of building a tree.
//! This is the parsing policy for untrusted feeds, not a shortcut: a lookup
//! that finds nothing yields an empty string and the caller moves on.
//!
//! All patterns are compiled once. A lookup makes one pass over the fragment
//! for opening tags and at most one for closing tags, then pairs them by
//! binary search, so a fragment full of unclosed elements stays linear.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::normalize::clean;

/// Any opening or self-closing element. Group 1: qualified name as written,
/// group 2: attribute text.
static OPEN_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<((?:[a-z0-9_.\-]+:)?[a-z_][a-z0-9_.\-]*)(\s[^<>]*)?>")
        .expect("OPEN_TAG_RE should compile")
});

/// Any closing tag. Group 1: qualified name.
static CLOSE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</((?:[a-z0-9_.\-]+:)?[a-z_][a-z0-9_.\-]*)\s*>")
        .expect("CLOSE_TAG_RE should compile")
});

/// One quoted attribute. Group 1: name, group 2 or 3: value.
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|\s)([a-z0-9_.:\-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("ATTR_RE should compile")
});

struct OpenTag<'a> {
    qualified: &'a str,
    attrs: &'a str,
    end: usize,
}

impl OpenTag<'_> {
    fn is_self_closing(&self) -> bool {
        self.attrs.trim_end().ends_with('/')
    }
}

/// `tag` matches its own name, or the local part of `alias:tag`.
fn name_matches(qualified: &str, tag: &str) -> bool {
    qualified.eq_ignore_ascii_case(tag)
        || qualified
            .split_once(':')
            .is_some_and(|(_, local)| local.eq_ignore_ascii_case(tag))
}

fn open_tags_named<'a>(fragment: &'a str, tag: &str) -> Vec<OpenTag<'a>> {
    OPEN_TAG_RE
        .captures_iter(fragment)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            name_matches(name.as_str(), tag).then(|| OpenTag {
                qualified: name.as_str(),
                attrs: caps.get(2).map_or("", |m| m.as_str()),
                end: whole.end(),
            })
        })
        .collect()
}

/// Start offsets of every closing `tag`, keyed by lowercased qualified name.
fn close_positions(fragment: &str, tag: &str) -> HashMap<String, Vec<usize>> {
    let mut closes: HashMap<String, Vec<usize>> = HashMap::new();
    for caps in CLOSE_TAG_RE.captures_iter(fragment) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if name_matches(name.as_str(), tag) {
            closes
                .entry(name.as_str().to_ascii_lowercase())
                .or_default()
                .push(whole.start());
        }
    }
    closes
}

/// Returns the inner text of the first `tag` element (optionally
/// namespace-prefixed), cleaned with [`clean`].
///
/// Matching is case-insensitive and stops at the first closing tag with the
/// same qualified name, so nested same-named elements never over-capture.
/// Self-closing elements have no inner text and are skipped. Returns an empty
/// string when nothing matches.
///
/// # Examples
///
/// ```
/// use feedsync::feed::get_tag;
///
/// let item = "<title>Hello</title><dc:creator>Ada</dc:creator>";
/// assert_eq!(get_tag(item, "title"), "Hello");
/// assert_eq!(get_tag(item, "creator"), "Ada");
/// assert_eq!(get_tag(item, "missing"), "");
/// ```
pub fn get_tag(fragment: &str, tag: &str) -> String {
    raw_tag(fragment, tag).map(clean).unwrap_or_default()
}

/// Like [`get_tag`] but returns the inner markup untouched.
pub(crate) fn raw_tag<'a>(fragment: &'a str, tag: &str) -> Option<&'a str> {
    let opens = open_tags_named(fragment, tag);
    if opens.iter().all(OpenTag::is_self_closing) {
        return None;
    }

    let closes = close_positions(fragment, tag);
    if closes.is_empty() {
        return None;
    }

    opens
        .iter()
        .filter(|open| !open.is_self_closing())
        .find_map(|open| {
            let starts = closes.get(&open.qualified.to_ascii_lowercase())?;
            let next = starts.partition_point(|&start| start < open.end);
            starts.get(next).map(|&start| &fragment[open.end..start])
        })
}

/// Returns the attribute text of every opening (or self-closing) `tag`
/// declaration, in document order.
pub fn open_tags<'a>(fragment: &'a str, tag: &str) -> Vec<&'a str> {
    open_tags_named(fragment, tag)
        .into_iter()
        .map(|open| open.attrs)
        .collect()
}

/// Extracts a quoted attribute value from a tag's attribute text.
pub fn attr_value(attrs: &str, attr: &str) -> Option<String> {
    ATTR_RE
        .captures_iter(attrs)
        .filter(|caps| caps.get(1).is_some_and(|name| name.as_str().eq_ignore_ascii_case(attr)))
        .find_map(|caps| caps.get(2).or_else(|| caps.get(3)).map(|m| clean(m.as_str())))
}

/// Returns `attr` from the first `tag` declaration that carries it.
///
/// # Examples
///
/// ```
/// use feedsync::feed::get_attr;
///
/// let entry = r#"<link rel="self" href='https://a.example/self'/>"#;
/// assert_eq!(get_attr(entry, "link", "href"), "https://a.example/self");
/// assert_eq!(get_attr(entry, "link", "type"), "");
/// ```
pub fn get_attr(fragment: &str, tag: &str, attr: &str) -> String {
    open_tags(fragment, tag)
        .into_iter()
        .find_map(|attrs| attr_value(attrs, attr))
        .unwrap_or_default()
}

/// Tries each candidate tag in order and returns the first non-empty value.
///
/// The order encodes content priority: RSS prefers the full
/// `content:encoded` body over the `description` summary, Atom prefers
/// `content` over `summary`.
pub fn get_content(fragment: &str, tags: &[&str]) -> String {
    tags.iter()
        .map(|tag| get_tag(fragment, tag))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_tag_plain() {
        assert_eq!(get_tag("<title>Hello</title>", "title"), "Hello");
    }

    #[test]
    fn test_get_tag_with_attributes() {
        let xml = r#"<title type="html">Hello &amp; bye</title>"#;
        assert_eq!(get_tag(xml, "title"), "Hello & bye");
    }

    #[test]
    fn test_get_tag_namespaced() {
        let xml = "<dc:date>2024-01-01T00:00:00Z</dc:date>";
        assert_eq!(get_tag(xml, "date"), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_get_tag_case_insensitive() {
        let xml = "<PubDate>Mon, 01 Jan 2024 00:00:00 GMT</PUBDATE>";
        assert_eq!(get_tag(xml, "pubDate"), "Mon, 01 Jan 2024 00:00:00 GMT");
    }

    #[test]
    fn test_get_tag_multiline() {
        let xml = "<description>\n  line one\n  line two\n</description>";
        assert_eq!(get_tag(xml, "description"), "line one\n  line two");
    }

    #[test]
    fn test_get_tag_first_match_wins() {
        let xml = "<title>First</title><title>Second</title>";
        assert_eq!(get_tag(xml, "title"), "First");
    }

    #[test]
    fn test_get_tag_non_greedy_on_nested_same_name() {
        let xml = "<div>outer <div>inner</div> tail</div>";
        assert_eq!(get_tag(xml, "div"), "outer <div>inner");
    }

    #[test]
    fn test_get_tag_self_closing_is_empty() {
        assert_eq!(get_tag(r#"<link href="x"/>"#, "link"), "");
        assert_eq!(get_tag("<link/>", "link"), "");
    }

    #[test]
    fn test_get_tag_skips_self_closing_then_finds_full_element() {
        let xml = r#"<atom:link href="https://a.example/feed" rel="self"/><link>https://a.example/post</link>"#;
        assert_eq!(get_tag(xml, "link"), "https://a.example/post");
    }

    #[test]
    fn test_get_tag_does_not_match_longer_name() {
        assert_eq!(get_tag("<titles>No</titles>", "title"), "");
        assert_eq!(get_tag("<pubDate>x</pubDate>", "date"), "");
    }

    #[test]
    fn test_get_tag_missing_closing_tag() {
        assert_eq!(get_tag("<title>Unclosed", "title"), "");
    }

    #[test]
    fn test_get_tag_prefix_must_match_in_closing_tag() {
        let xml = "<content:encoded>body</content:encoded>";
        assert_eq!(get_tag(xml, "encoded"), "body");
    }

    #[test]
    fn test_get_tag_cdata_content() {
        let xml = "<content:encoded><![CDATA[<p>Rich &amp; full</p>]]></content:encoded>";
        assert_eq!(get_tag(xml, "encoded"), "<p>Rich & full</p>");
    }

    #[test]
    fn test_get_tag_escapes_regex_metacharacters() {
        assert_eq!(get_tag("<a>x</a>", "a.*"), "");
    }

    #[test]
    fn test_get_attr_double_and_single_quotes() {
        assert_eq!(
            get_attr(r#"<link href="https://a.example/1"/>"#, "link", "href"),
            "https://a.example/1"
        );
        assert_eq!(
            get_attr("<link href='https://a.example/2'>", "link", "href"),
            "https://a.example/2"
        );
    }

    #[test]
    fn test_get_attr_skips_tags_without_attribute() {
        let xml = r#"<link rel="self"/><link href="https://a.example/x"/>"#;
        assert_eq!(get_attr(xml, "link", "href"), "https://a.example/x");
    }

    #[test]
    fn test_get_attr_does_not_match_attribute_suffix() {
        let xml = r#"<link data-href="wrong" href="right"/>"#;
        assert_eq!(get_attr(xml, "link", "href"), "right");
    }

    #[test]
    fn test_get_attr_decodes_entities() {
        let xml = r#"<link href="https://a.example/?a=1&amp;b=2"/>"#;
        assert_eq!(get_attr(xml, "link", "href"), "https://a.example/?a=1&b=2");
    }

    #[test]
    fn test_get_attr_missing() {
        assert_eq!(get_attr("<entry></entry>", "link", "href"), "");
    }

    #[test]
    fn test_open_tags_lists_every_declaration() {
        let xml = r#"<link rel="alternate" href="a"/><link rel="enclosure" href="b"/>"#;
        let tags = open_tags(xml, "link");
        assert_eq!(tags.len(), 2);
        assert_eq!(attr_value(tags[1], "rel").as_deref(), Some("enclosure"));
    }

    #[test]
    fn test_get_content_fallback_chain() {
        let xml = "<description>Short</description>";
        assert_eq!(get_content(xml, &["encoded", "description"]), "Short");

        let rich = "<description>Short</description><content:encoded>Long</content:encoded>";
        assert_eq!(get_content(rich, &["encoded", "description"]), "Long");
    }

    #[test]
    fn test_get_content_skips_empty_candidates() {
        let xml = "<content></content><summary>Summary</summary>";
        assert_eq!(get_content(xml, &["content", "summary"]), "Summary");
    }

    #[test]
    fn test_get_content_nothing_found() {
        assert_eq!(get_content("<x/>", &["content", "summary"]), "");
    }
    #[test]
    fn test_get_tag_pairs_prefixed_close_with_its_own_open() {
        let xml = "<dc:title>Unclosed <atom:title>Closed</atom:title>";
        assert_eq!(get_tag(xml, "title"), "Closed");
    }

    #[test]
    fn test_get_attr_ignores_lookalike_inside_other_value() {
        let xml = r#"<link title="a href='wrong'" href="right"/>"#;
        assert_eq!(get_attr(xml, "link", "href"), "right");
    }

    #[test]
    fn test_unclosed_elements_scan_in_linear_time() {
        let fragment = format!("<title>{}<link>x</link>", "<title>".repeat(40_000));

        let started = std::time::Instant::now();
        assert_eq!(get_tag(&fragment, "title"), "");
        assert_eq!(get_tag(&fragment, "link"), "x");
        assert!(
            started.elapsed() < std::time::Duration::from_secs(5),
            "lookup took {:?}",
            started.elapsed()
        );
    }
}
