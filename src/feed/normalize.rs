//! Text normalization for values lifted out of raw feed markup.
//!
//! Every string the extractor returns goes through [`clean`], which unwraps
//! CDATA sections and decodes the handful of entities feeds actually use.
//! Snippet helpers live here too since they operate on the cleaned content.

use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Maximum number of characters kept in a content snippet.
pub const SNIPPET_LENGTH: usize = 150;

/// Marker appended to every snippet, whether or not it was truncated.
pub const SNIPPET_ELLIPSIS: &str = "...";

static CDATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("CDATA_RE should compile"));

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(lt|gt|amp|quot|#39);").expect("ENTITY_RE should compile"));

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("TAG_RE should compile"));

/// Strips CDATA wrappers and decodes basic entities.
///
/// Entity decoding is a single left-to-right pass over the input, so the `&`
/// produced by decoding `&amp;` is never read again as the start of another
/// entity: `&amp;lt;` becomes `&lt;`, not `<`. Text without entities passes
/// through unchanged (apart from trimming).
///
/// # Examples
///
/// ```
/// use feedsync::feed::clean;
///
/// assert_eq!(clean("<![CDATA[A &amp; B]]>"), "A & B");
/// assert_eq!(clean("  &lt;p&gt;hi&lt;/p&gt; "), "<p>hi</p>");
/// assert_eq!(clean(""), "");
/// ```
pub fn clean(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let unwrapped = CDATA_RE.replace_all(trimmed, "$1");
    let decoded = ENTITY_RE.replace_all(&unwrapped, |caps: &Captures<'_>| {
        match &caps[1] {
            "lt" => "<",
            "gt" => ">",
            "amp" => "&",
            "quot" => "\"",
            _ => "'",
        }
    });

    decoded.trim().to_string()
}

/// Removes every `<...>` tag, leaving only the text between them.
pub fn strip_markup(html: &str) -> String {
    TAG_RE.replace_all(html, "").into_owned()
}

/// Builds the list-preview snippet for an item's content.
///
/// The snippet is the markup-stripped content cut to [`SNIPPET_LENGTH`]
/// characters with [`SNIPPET_ELLIPSIS`] appended unconditionally. Downstream
/// list views rely on the suffix being present even for short content, so an
/// empty body yields just `"..."`.
pub fn snippet(content: &str) -> String {
    let text = strip_markup(content);
    let mut out: String = text.chars().take(SNIPPET_LENGTH).collect();
    out.push_str(SNIPPET_ELLIPSIS);
    out
}
