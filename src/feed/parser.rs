use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use super::extract::{attr_value, get_attr, get_content, get_tag, open_tags, raw_tag};
use super::normalize::{clean, snippet, strip_markup};
use super::urls::fix_relative_urls;

/// RSS content priority: full `content:encoded` body, then the summary.
pub const RSS_CONTENT_TAGS: &[&str] = &["encoded", "description"];

/// Atom content priority: `content`, then `summary`.
pub const ATOM_CONTENT_TAGS: &[&str] = &["content", "summary"];

const ATOM_NAMESPACE: &str = "http://www.w3.org/2005/Atom";

static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<entry(?:\s[^>]*)?>(.*?)</entry\s*>").expect("ENTRY_RE should compile")
});

static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<item(?:\s[^>]*)?>(.*?)</item\s*>").expect("ITEM_RE should compile")
});

static CHANNEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<channel(?:\s[^>]*)?>(.*?)</channel\s*>").expect("CHANNEL_RE should compile")
});

static ENTRY_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<entry[\s>]").expect("ENTRY_START_RE should compile"));

static ITEM_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<item[\s>]").expect("ITEM_START_RE should compile"));

/// Prolog constructs that may precede the root element.
static PROLOG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A(?:\s+|<\?.*?\?>|<!--.*?-->|<!DOCTYPE[^>\[]*(?:\[.*?\])?\s*>)")
        .expect("PROLOG_RE should compile")
});

static ROOT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A<((?:[A-Za-z0-9_.\-]+:)?[A-Za-z_][A-Za-z0-9_.\-]*)")
        .expect("ROOT_NAME_RE should compile")
});

static ATOM_FEED_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:[a-z0-9_.\-]+:)?feed\s[^>]*>").expect("ATOM_FEED_TAG_RE should compile")
});

/// The two document vocabularies the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Atom,
    Rss,
}

/// One feed document as parsed at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedData {
    pub title: String,
    pub description: String,
    /// Items in document order.
    pub items: Vec<FeedItem>,
}

/// One entry/article extracted from markup, before it has a stored identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub title: String,
    /// Absolute or relative URL as found; empty when absent
    pub link: String,
    /// Richest available body, root-relative references resolved against `link`
    pub content: String,
    pub content_snippet: String,
    /// Raw date text, format untouched
    pub pub_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl FeedItem {
    fn new(title: String, link: String, content: String, pub_date: String, author: String) -> Self {
        let content_snippet = snippet(&content);
        let content = fix_relative_urls(&content, &link);
        let author = if author.is_empty() { None } else { Some(author) };

        Self {
            title,
            link,
            content,
            content_snippet,
            pub_date,
            author,
        }
    }
}

/// Classifies a document as Atom or RSS without requiring well-formed XML.
///
/// The root element decides: `<feed>` (with or without a namespace prefix)
/// means Atom, `<rss>` or `<rdf:RDF>` means RSS. When the root is anything
/// else or cannot be located (server warnings printed ahead of the document,
/// truncated prolog) the document is Atom only if it has a `<feed>` tag
/// declaring the Atom namespace. Markup embedded in item bodies
/// never reaches the root check, so an Atom entry quoting `<channel>` stays Atom.
pub fn detect_format(markup: &str) -> FeedFormat {
    let mut rest = markup.trim_start_matches('\u{feff}');
    while let Some(m) = PROLOG_RE.find(rest) {
        if m.is_empty() {
            break;
        }
        rest = &rest[m.end()..];
    }

    if let Some(caps) = ROOT_NAME_RE.captures(rest) {
        let name = &caps[1];
        let local = name.rsplit(':').next().unwrap_or(name);
        if local.eq_ignore_ascii_case("feed") {
            return FeedFormat::Atom;
        }
        if local.eq_ignore_ascii_case("rss") || local.eq_ignore_ascii_case("rdf") {
            return FeedFormat::Rss;
        }
    }

    let declares_atom = ATOM_FEED_TAG_RE
        .find_iter(markup)
        .any(|m| m.as_str().contains(ATOM_NAMESPACE));
    if declares_atom {
        FeedFormat::Atom
    } else {
        FeedFormat::Rss
    }
}

/// Parses an RSS 2.0 or Atom document into [`FeedData`].
///
/// Total: any input produces a value. Missing feed-level or item-level
/// fields come back as empty strings, and a document with no recognizable
/// items yields an empty `items` list.
///
/// # Examples
///
/// ```
/// use feedsync::feed::parse_feed_document;
///
/// let rss = r#"<rss version="2.0"><channel><title>Blog</title>
///   <item><title>Hello</title><link>https://example.com/hello</link></item>
/// </channel></rss>"#;
/// let feed = parse_feed_document(rss);
/// assert_eq!(feed.title, "Blog");
/// assert_eq!(feed.items[0].link, "https://example.com/hello");
/// assert!(parse_feed_document("garbage").items.is_empty());
/// ```
pub fn parse_feed_document(markup: &str) -> FeedData {
    match detect_format(markup) {
        FeedFormat::Atom => parse_atom(markup),
        FeedFormat::Rss => parse_rss(markup),
    }
}

/// Text before the first match of `start`, or the whole fragment.
fn header<'a>(fragment: &'a str, start: &Regex) -> &'a str {
    start
        .find(fragment)
        .map_or(fragment, |m| &fragment[..m.start()])
}

fn parse_atom(markup: &str) -> FeedData {
    let head = header(markup, &ENTRY_START_RE);

    let items = ENTRY_RE
        .captures_iter(markup)
        .filter_map(|caps| caps.get(1))
        .map(|m| atom_entry(m.as_str()))
        .collect();

    FeedData {
        title: get_tag(head, "title"),
        description: get_tag(head, "subtitle"),
        items,
    }
}

fn atom_entry(entry: &str) -> FeedItem {
    let link = atom_alternate_link(entry).unwrap_or_else(|| get_tag(entry, "id"));
    let pub_date = get_content(entry, &["published", "updated"]);

    FeedItem::new(
        get_tag(entry, "title"),
        link,
        get_content(entry, ATOM_CONTENT_TAGS),
        pub_date,
        atom_author(entry),
    )
}

/// `href` of the first `<link>` whose relation is `alternate`, stated or
/// implied by a missing `rel`.
fn atom_alternate_link(entry: &str) -> Option<String> {
    open_tags(entry, "link")
        .into_iter()
        .filter(|attrs| {
            attr_value(attrs, "rel").map_or(true, |rel| rel.eq_ignore_ascii_case("alternate"))
        })
        .find_map(|attrs| attr_value(attrs, "href").filter(|href| !href.is_empty()))
}

fn atom_author(entry: &str) -> String {
    let Some(author) = raw_tag(entry, "author") else {
        return String::new();
    };

    let name = get_tag(author, "name");
    if !name.is_empty() {
        return name;
    }
    clean(&strip_markup(&clean(author)))
}

fn parse_rss(markup: &str) -> FeedData {
    let (title, description) = match CHANNEL_RE.captures(markup).and_then(|caps| caps.get(1)) {
        Some(channel) => {
            let head = header(channel.as_str(), &ITEM_START_RE);
            (get_tag(head, "title"), get_tag(head, "description"))
        }
        None => (String::new(), String::new()),
    };

    let items = ITEM_RE
        .captures_iter(markup)
        .filter_map(|caps| caps.get(1))
        .map(|m| rss_item(m.as_str()))
        .collect();

    FeedData {
        title,
        description,
        items,
    }
}

fn rss_item(item: &str) -> FeedItem {
    FeedItem::new(
        get_tag(item, "title"),
        get_tag(item, "link"),
        get_content(item, RSS_CONTENT_TAGS),
        get_content(item, &["pubDate", "date"]),
        get_content(item, &["creator", "author"]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/" xmlns:dc="http://purl.org/dc/elements/1.1/">
<channel>
  <title>Example Blog</title>
  <link>https://blog.example.com</link>
  <description>Posts &amp; notes</description>
  <item>
    <title>First</title>
    <link>https://blog.example.com/posts/first</link>
    <description>Short</description>
    <content:encoded><![CDATA[<p>Long body <img src="/img/a.png"></p>]]></content:encoded>
    <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
    <dc:creator>Ada</dc:creator>
  </item>
  <item>
    <title>Second</title>
    <link>https://blog.example.com/posts/second</link>
    <description>&lt;p&gt;Escaped &lt;a href="/x"&gt;html&lt;/a&gt;&lt;/p&gt;</description>
    <dc:date>2024-01-02T10:00:00Z</dc:date>
    <author>bob@example.com (Bob)</author>
  </item>
</channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Site</title>
  <subtitle>Things</subtitle>
  <link href="https://atom.example.org/" rel="alternate"/>
  <entry>
    <title>Entry One</title>
    <link rel="self" href="https://atom.example.org/api/1"/>
    <link rel="alternate" href="https://atom.example.org/posts/1"/>
    <id>urn:uuid:1</id>
    <summary>Summary one</summary>
    <content type="html">&lt;p&gt;Content one &lt;img src="/pic.png"&gt;&lt;/p&gt;</content>
    <published>2024-02-01T00:00:00Z</published>
    <updated>2024-02-02T00:00:00Z</updated>
    <author><name>Carol</name><email>carol@example.org</email></author>
  </entry>
  <entry>
    <title>Entry Two</title>
    <id>https://atom.example.org/posts/2</id>
    <summary>Only a summary</summary>
    <updated>2024-02-03T00:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn test_rss_feed_level_fields() {
        let feed = parse_feed_document(RSS);
        assert_eq!(feed.title, "Example Blog");
        assert_eq!(feed.description, "Posts & notes");
    }

    #[test]
    fn test_rss_items_in_document_order() {
        let feed = parse_feed_document(RSS);
        let titles: Vec<_> = feed.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);
    }

    #[test]
    fn test_rss_prefers_content_encoded() {
        let feed = parse_feed_document(RSS);
        let first = &feed.items[0];
        assert_eq!(
            first.content,
            r#"<p>Long body <img src="https://blog.example.com/img/a.png"></p>"#
        );
        assert_eq!(first.content_snippet, "Long body ...");
        assert_eq!(first.pub_date, "Mon, 01 Jan 2024 10:00:00 GMT");
        assert_eq!(first.author.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_rss_fallbacks_for_description_date_author() {
        let feed = parse_feed_document(RSS);
        let second = &feed.items[1];
        assert_eq!(
            second.content,
            r#"<p>Escaped <a href="https://blog.example.com/x">html</a></p>"#
        );
        assert_eq!(second.content_snippet, "Escaped html...");
        assert_eq!(second.pub_date, "2024-01-02T10:00:00Z");
        assert_eq!(second.author.as_deref(), Some("bob@example.com (Bob)"));
    }

    #[test]
    fn test_rss_item_with_only_title() {
        let xml = "<rss><channel><item><title>Lonely</title></item></channel></rss>";
        let feed = parse_feed_document(xml);
        assert_eq!(feed.items.len(), 1);
        assert_eq!(
            feed.items[0],
            FeedItem {
                title: "Lonely".to_string(),
                link: String::new(),
                content: String::new(),
                content_snippet: "...".to_string(),
                pub_date: String::new(),
                author: None,
            }
        );
    }

    #[test]
    fn test_rss_channel_title_not_taken_from_item() {
        let xml = "<rss><channel><item><title>Item</title></item></channel></rss>";
        let feed = parse_feed_document(xml);
        assert_eq!(feed.title, "");
    }

    #[test]
    fn test_rss_tolerates_unescaped_ampersands() {
        let xml = "<rss><channel><title>Tom & Jerry</title>\
                   <item><title>Cats & Mice</title><link>https://e.example/?a=1&b=2</link></item>\
                   </channel></rss>";
        let feed = parse_feed_document(xml);
        assert_eq!(feed.title, "Tom & Jerry");
        assert_eq!(feed.items[0].title, "Cats & Mice");
        assert_eq!(feed.items[0].link, "https://e.example/?a=1&b=2");
    }

    #[test]
    fn test_rdf_items_outside_channel() {
        let xml = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <channel rdf:about="https://r.example/"><title>RDF Feed</title><description>d</description></channel>
  <item rdf:about="https://r.example/1"><title>One</title><link>https://r.example/1</link></item>
  <item rdf:about="https://r.example/2"><title>Two</title><link>https://r.example/2</link></item>
</rdf:RDF>"#;
        let feed = parse_feed_document(xml);
        assert_eq!(feed.title, "RDF Feed");
        assert_eq!(feed.items.len(), 2);
    }

    #[test]
    fn test_atom_feed_level_fields() {
        let feed = parse_feed_document(ATOM);
        assert_eq!(feed.title, "Atom Site");
        assert_eq!(feed.description, "Things");
        assert_eq!(feed.items.len(), 2);
    }

    #[test]
    fn test_atom_entry_mapping() {
        let feed = parse_feed_document(ATOM);
        let one = &feed.items[0];
        assert_eq!(one.title, "Entry One");
        assert_eq!(one.link, "https://atom.example.org/posts/1");
        assert_eq!(
            one.content,
            r#"<p>Content one <img src="https://atom.example.org/pic.png"></p>"#
        );
        assert_eq!(one.pub_date, "2024-02-01T00:00:00Z");
        assert_eq!(one.author.as_deref(), Some("Carol"));
    }

    #[test]
    fn test_atom_entry_fallbacks() {
        let feed = parse_feed_document(ATOM);
        let two = &feed.items[1];
        assert_eq!(two.link, "https://atom.example.org/posts/2");
        assert_eq!(two.content, "Only a summary");
        assert_eq!(two.content_snippet, "Only a summary...");
        assert_eq!(two.pub_date, "2024-02-03T00:00:00Z");
        assert_eq!(two.author, None);
    }

    #[test]
    fn test_atom_link_without_rel_is_alternate() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
            <link rel="enclosure" href="https://a.example/audio.mp3"/>
            <link href="https://a.example/post"/>
            <id>tag:a.example,2024:1</id></entry></feed>"#;
        let feed = parse_feed_document(xml);
        assert_eq!(feed.items[0].link, "https://a.example/post");
    }

    #[test]
    fn test_atom_non_alternate_links_fall_back_to_id() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
            <link rel="self" href="https://a.example/api"/>
            <id>tag:a.example,2024:1</id></entry></feed>"#;
        let feed = parse_feed_document(xml);
        assert_eq!(feed.items[0].link, "tag:a.example,2024:1");
    }

    #[test]
    fn test_atom_flattened_author() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
            <title>t</title><author>Dana</author></entry></feed>"#;
        let feed = parse_feed_document(xml);
        assert_eq!(feed.items[0].author.as_deref(), Some("Dana"));
    }

    #[test]
    fn test_detect_atom_root() {
        assert_eq!(detect_format(ATOM), FeedFormat::Atom);
        assert_eq!(
            detect_format(r#"<atom:feed xmlns:atom="http://www.w3.org/2005/Atom"></atom:feed>"#),
            FeedFormat::Atom
        );
    }

    #[test]
    fn test_detect_rss_root() {
        assert_eq!(detect_format(RSS), FeedFormat::Rss);
        assert_eq!(detect_format(""), FeedFormat::Rss);
    }

    #[test]
    fn test_detect_skips_bom_comments_and_doctype() {
        let xml = "\u{feff}<?xml version=\"1.0\"?>\n<!-- generated -->\n<!DOCTYPE feed>\n<feed><entry><title>x</title></entry></feed>";
        assert_eq!(detect_format(xml), FeedFormat::Atom);
    }

    #[test]
    fn test_detect_atom_despite_channel_in_content() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom</title>
  <entry>
    <title>Quoting RSS</title>
    <content type="html"><![CDATA[<pre><channel><title>Not me</title><item>x</item></channel></pre>]]></content>
  </entry>
</feed>"#;
        assert_eq!(detect_format(xml), FeedFormat::Atom);
        let feed = parse_feed_document(xml);
        assert_eq!(feed.title, "Atom");
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].title, "Quoting RSS");
    }

    #[test]
    fn test_detect_rss_despite_feed_in_cdata() {
        let xml = r#"<rss><channel><item><description><![CDATA[<feed xmlns="http://www.w3.org/2005/Atom">]]></description></item></channel></rss>"#;
        assert_eq!(detect_format(xml), FeedFormat::Rss);
    }

    #[test]
    fn test_detect_without_root_uses_namespace() {
        let xml = r#"junk before <feed xmlns="http://www.w3.org/2005/Atom"><entry><title>a</title></entry></feed>"#;
        assert_eq!(detect_format(xml), FeedFormat::Atom);
        assert_eq!(parse_feed_document(xml).items.len(), 1);
    }

    #[test]
    fn test_detect_atom_behind_server_warning() {
        let xml = concat!(
            "<br />\n<b>Warning</b>:  Undefined variable $x in <b>/var/www/feed.php</b> on line <b>12</b><br />\n",
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>Site</title>"#,
            r#"<entry><title>One</title><link href="https://a.example/1"/></entry>"#,
            r#"<entry><title>Two</title><link href="https://a.example/2"/></entry>"#,
            "</feed>"
        );
        assert_eq!(detect_format(xml), FeedFormat::Atom);

        let feed = parse_feed_document(xml);
        assert_eq!(feed.title, "Site");
        let links: Vec<_> = feed.items.iter().map(|i| i.link.as_str()).collect();
        assert_eq!(links, vec!["https://a.example/1", "https://a.example/2"]);
    }

    #[test]
    fn test_detect_unknown_root_without_atom_namespace_is_rss() {
        let xml = "<html><body><item><title>Stray</title></item></body></html>";
        assert_eq!(detect_format(xml), FeedFormat::Rss);
        assert_eq!(parse_feed_document(xml).items[0].title, "Stray");
    }

    #[test]
    fn test_large_feed_parses_quickly() {
        let items: String = (0..2000)
            .map(|i| {
                format!(
                    "<item><title>Post {i}</title><link>https://a.example/{i}</link>\
                     <description>&lt;p&gt;Body {i} &lt;a href=\"/x\"&gt;x&lt;/a&gt;&lt;/p&gt;</description>\
                     <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate><dc:creator>Ada</dc:creator></item>"
                )
            })
            .collect();
        let xml = format!(r#"<rss version="2.0"><channel><title>Big</title>{items}</channel></rss>"#);

        let started = std::time::Instant::now();
        let feed = parse_feed_document(&xml);
        assert!(
            started.elapsed() < std::time::Duration::from_secs(5),
            "parse took {:?}",
            started.elapsed()
        );
        assert_eq!(feed.items.len(), 2000);
        assert_eq!(feed.items[1999].link, "https://a.example/1999");
    }

    #[test]
    fn test_unclosed_titles_in_item_parse_quickly() {
        let xml = format!(
            "<rss><channel><item>{}<link>https://a.example/1</link></item></channel></rss>",
            "<title>".repeat(40_000)
        );

        let started = std::time::Instant::now();
        let feed = parse_feed_document(&xml);
        assert!(
            started.elapsed() < std::time::Duration::from_secs(5),
            "parse took {:?}",
            started.elapsed()
        );
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].title, "");
        assert_eq!(feed.items[0].link, "https://a.example/1");
    }

    proptest! {
        #[test]
        fn prop_items_come_back_in_document_order(
            titles in prop::collection::vec("[A-Za-z0-9 ]{1,20}", 0..40)
        ) {
            let titles: Vec<String> = titles.iter().map(|t| t.trim().to_string()).collect();

            let rss_items: String = titles
                .iter()
                .map(|t| format!("<item><title>{t}</title></item>"))
                .collect();
            let rss = format!("<rss><channel><title>Feed</title>{rss_items}</channel></rss>");
            let parsed: Vec<String> = parse_feed_document(&rss)
                .items
                .into_iter()
                .map(|i| i.title)
                .collect();
            prop_assert_eq!(&parsed, &titles);

            let atom_entries: String = titles
                .iter()
                .map(|t| format!("<entry><title>{t}</title></entry>"))
                .collect();
            let atom = format!(
                r#"<feed xmlns="{ATOM_NAMESPACE}"><title>Feed</title>{atom_entries}</feed>"#
            );
            let parsed: Vec<String> = parse_feed_document(&atom)
                .items
                .into_iter()
                .map(|i| i.title)
                .collect();
            prop_assert_eq!(&parsed, &titles);
        }
    }

    #[test]
    fn test_total_on_garbage() {
        for input in ["", "   ", "not xml at all", "<<<>>>", "<rss><channel>", "<feed>"] {
            let feed = parse_feed_document(input);
            assert!(feed.items.is_empty(), "input {input:?}");
        }
    }

    #[test]
    fn test_relative_item_link_leaves_content_unchanged() {
        let xml = r#"<rss><channel><item><link>/posts/1</link><description>&lt;img src="/a.png"&gt;</description></item></channel></rss>"#;
        let feed = parse_feed_document(xml);
        assert_eq!(feed.items[0].content, r#"<img src="/a.png">"#);
    }

    #[test]
    fn test_parse_is_idempotent() {
        assert_eq!(parse_feed_document(RSS), parse_feed_document(RSS));
        assert_eq!(parse_feed_document(ATOM), parse_feed_document(ATOM));
    }

    #[test]
    fn test_serializes_with_camel_case_keys() {
        let feed = parse_feed_document(RSS);
        let json = serde_json::to_value(&feed.items[0]).unwrap();
        assert!(json.get("contentSnippet").is_some());
        assert!(json.get("pubDate").is_some());
    }
}
