//! Feed retrieval and normalization.
//!
//! - **Normalizing**: CDATA and entity decoding, markup stripping, snippets
//! - **Extracting**: namespace-tolerant lookup of tag text and attributes
//! - **Parsing**: RSS 2.0 / Atom detection and mapping onto [`FeedData`]
//! - **Fetching**: bounded-time retrieval with fallback mirrors and
//!   concurrent refresh into the database
//! - **OPML**: subscription list import and export
//!
//! # Example
//!
//! ```
//! use feedsync::feed::parse_feed_document;
//!
//! let feed = parse_feed_document(
//!     r#"<rss><channel><title>News</title>
//!        <item><title>Hello &amp; welcome</title><link>https://example.com/1</link></item>
//!        </channel></rss>"#,
//! );
//! assert_eq!(feed.title, "News");
//! assert_eq!(feed.items[0].title, "Hello & welcome");
//! ```

mod extract;
mod fetcher;
mod normalize;
mod opml;
mod parser;
mod urls;

pub use extract::{attr_value, get_attr, get_content, get_tag, open_tags};
pub use fetcher::{
    build_client, fetch_feed, refresh_all, refresh_one, FetchError, FetchOptions, FetchResult,
    RefreshSummary, Strategy, StrategyFailure, MIRROR_PLACEHOLDER,
};
pub use normalize::{clean, snippet, strip_markup, SNIPPET_ELLIPSIS, SNIPPET_LENGTH};
pub use opml::{export_opml, export_to_file, parse_opml, read_opml_file, OpmlError, OpmlFeed};
pub use parser::{
    detect_format, parse_feed_document, FeedData, FeedFormat, FeedItem, ATOM_CONTENT_TAGS,
    RSS_CONTENT_TAGS,
};
pub use urls::{fix_relative_urls, origin_of};
