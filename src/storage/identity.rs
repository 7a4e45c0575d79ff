//! Deterministic article identity.
//!
//! An article's primary key is derived from the feed it belongs to and the
//! item's link, so re-ingesting the same document upserts the same rows
//! instead of adding new ones.

use sha2::{Digest, Sha256};

use crate::feed::FeedItem;

/// Hex digits of the link hash kept in the identifier.
const HASH_LEN: usize = 32;

/// Derives the stored identifier for an item of `feed_id`.
///
/// Format: `<feed_id>-<first 32 hex digits of SHA-256(key)>`, where the key is
/// the trimmed link. Items without a link are keyed on `title|pub_date`
/// instead, so link-less items of one feed do not collapse into a single row.
///
/// # Examples
///
/// ```
/// use feedsync::feed::FeedItem;
/// use feedsync::storage::article_id;
///
/// let item = FeedItem { link: "https://example.com/a".into(), ..Default::default() };
/// let id = article_id(3, &item);
/// assert!(id.starts_with("3-"));
/// assert_eq!(id, article_id(3, &item.clone()));
/// ```
pub fn article_id(feed_id: i64, item: &FeedItem) -> String {
    let link = item.link.trim();
    let key = if link.is_empty() {
        format!("{}|{}", item.title.trim(), item.pub_date.trim())
    } else {
        link.to_string()
    };

    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    format!("{}-{}", feed_id, &digest[..HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(link: &str, title: &str) -> FeedItem {
        FeedItem {
            title: title.to_string(),
            link: link.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_same_link_same_identity() {
        let a = item("https://example.com/p/1", "Old title");
        let b = item("https://example.com/p/1", "New title");
        assert_eq!(article_id(1, &a), article_id(1, &b));
    }

    #[test]
    fn test_feed_identity_is_part_of_key() {
        let a = item("https://example.com/p/1", "T");
        assert_ne!(article_id(1, &a), article_id(2, &a));
    }

    #[test]
    fn test_links_sharing_long_prefix_do_not_collide() {
        let a = item("https://example.com/2024/01/01/some-long-slug-part-one", "T");
        let b = item("https://example.com/2024/01/01/some-long-slug-part-two", "T");
        assert_ne!(article_id(1, &a), article_id(1, &b));
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        let a = item("https://example.com/p/1", "T");
        let b = item("  https://example.com/p/1\n", "T");
        assert_eq!(article_id(1, &a), article_id(1, &b));
    }

    #[test]
    fn test_linkless_items_keyed_on_title_and_date() {
        let a = item("", "First");
        let b = item("", "Second");
        assert_ne!(article_id(1, &a), article_id(1, &b));
        assert_eq!(article_id(1, &a), article_id(1, &item("", "First")));
    }

    #[test]
    fn test_identifier_shape() {
        let id = article_id(42, &item("https://example.com", "T"));
        let (prefix, hash) = id.split_once('-').unwrap();
        assert_eq!(prefix, "42");
        assert_eq!(hash.len(), HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
