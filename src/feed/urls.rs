use regex::{Captures, Regex};
use std::sync::LazyLock;
use url::Url;

/// Root-relative `src`/`href` values: exactly one leading slash.
/// `src="//cdn..."` never matches because the second character may not be `/`.
static ROOT_RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(src|href)="/([^/"][^"]*)?""#).expect("ROOT_RELATIVE_RE should compile")
});

/// Returns the `scheme://host[:port]` origin of `base`, or `None` when the
/// base cannot be parsed or has an opaque origin (`mailto:`, `data:`, ...).
pub fn origin_of(base: &str) -> Option<String> {
    let url = Url::parse(base.trim()).ok()?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(origin.ascii_serialization())
}

/// Rewrites root-relative `src="/..."` and `href="/..."` references in an
/// HTML fragment to absolute URLs on the origin of `base`.
///
/// Protocol-relative (`//host/path`) and absolute references are left alone.
/// If `base` is not a usable URL the fragment is returned unchanged; feeds
/// with garbage links are expected, so this never fails.
///
/// # Examples
///
/// ```
/// use feedsync::feed::fix_relative_urls;
///
/// let html = r#"<img src="/a.png">"#;
/// assert_eq!(
///     fix_relative_urls(html, "https://example.com/x"),
///     r#"<img src="https://example.com/a.png">"#
/// );
/// assert_eq!(fix_relative_urls(html, "not a url"), html);
/// ```
pub fn fix_relative_urls(html: &str, base: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let Some(origin) = origin_of(base) else {
        return html.to_string();
    };

    ROOT_RELATIVE_RE
        .replace_all(html, |caps: &Captures<'_>| {
            let path = caps.get(2).map_or("", |m| m.as_str());
            format!(r#"{}="{}/{}""#, &caps[1], origin, path)
        })
        .into_owned()
}

/// True when the fragment still contains a root-relative reference.
pub(crate) fn has_root_relative(html: &str) -> bool {
    ROOT_RELATIVE_RE.is_match(html)
}
