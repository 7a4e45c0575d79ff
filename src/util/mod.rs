//! Validation of user-supplied feed URLs.
//!
//! Subscriptions come from the command line and from imported OPML files,
//! so every URL is checked before the fetcher is pointed at it.
//!
//! # Examples
//!
//! ```
//! use feedsync::util::validate_feed_url;
//!
//! let url = validate_feed_url(" https://example.com/feed.xml ").unwrap();
//! assert_eq!(url.as_str(), "https://example.com/feed.xml");
//! assert!(validate_feed_url("http://localhost/feed").is_err());
//! ```

mod url_validator;

pub use url_validator::{validate_feed_url, UrlValidationError};
