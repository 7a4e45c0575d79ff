use chrono::DateTime;
use serde::Serialize;
use thiserror::Error;

use super::identity::article_id;
use crate::feed::FeedItem;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another feedsync process appears to be using the database. Please wait for it to finish and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) surface as these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Write Models
// ============================================================================

/// A subscription to insert, from the CLI or an OPML import
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub title: String,
    pub url: String,
    pub description: String,
}

/// A parsed item ready to be upserted under its derived identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub id: String,
    pub title: String,
    pub link: String,
    pub content: String,
    pub content_snippet: String,
    pub pub_date: String,
    /// Unix timestamp parsed from `pub_date`, used only for ordering
    pub published: Option<i64>,
    pub author: Option<String>,
}

impl NewArticle {
    pub fn from_item(feed_id: i64, item: &FeedItem) -> Self {
        Self {
            id: article_id(feed_id, item),
            title: item.title.clone(),
            link: item.link.clone(),
            content: item.content.clone(),
            content_snippet: item.content_snippet.clone(),
            pub_date: item.pub_date.clone(),
            published: parse_pub_date(&item.pub_date),
            author: item.author.clone(),
        }
    }
}

/// Best-effort conversion of a raw feed date to a unix timestamp.
///
/// RSS uses RFC 2822 and Atom uses RFC 3339; anything else is kept only as
/// raw text and sorts after dated articles.
pub fn parse_pub_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.timestamp())
        .ok()
}

// ============================================================================
// Read Models
// ============================================================================

/// Feed data from database
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub description: String,
    pub last_fetched: Option<i64>,
    pub error: Option<String>,
    pub unread_count: i64,
    pub created_at: i64,
}

/// Stored article snapshot
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub content: String,
    pub content_snippet: String,
    pub pub_date: String,
    pub published: Option<i64>,
    pub author: Option<String>,
    pub read: bool,
    /// Externally produced summary, if one was stored
    pub summary: Option<String>,
    pub created_at: i64,
}

/// Filters for listing stored articles
#[derive(Debug, Clone, Default)]
pub struct ArticleQuery {
    pub feed_id: Option<i64>,
    /// Case-insensitive substring match on title and snippet
    pub search: Option<String>,
    pub unread_only: bool,
    pub limit: Option<i64>,
}
