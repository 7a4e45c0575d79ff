use anyhow::Result;
use sqlx::{QueryBuilder, Sqlite, Transaction};

use super::schema::Database;
use super::types::{Article, ArticleQuery, NewArticle};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Default number of articles returned by a listing
pub const DEFAULT_ARTICLE_LIMIT: i64 = 100;

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

/// 10 columns * 50 rows = 500 bound parameters, well under SQLite's limit
const BATCH_SIZE: usize = 50;

const ARTICLE_COLUMNS: &str = "id, feed_id, title, link, content, content_snippet, pub_date, \
                               published, author, read, summary, created_at";

/// Upsert articles inside an open transaction, returning how many were new.
///
/// Two phases per chunk: `INSERT OR IGNORE` counts new rows via `changes()`,
/// then `INSERT ... ON CONFLICT DO UPDATE` refreshes feed-owned fields of every
/// row. `read`, `summary` and `created_at` are never touched on conflict, so
/// user state and the first-seen timestamp survive re-ingestion.
pub(crate) async fn upsert_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    feed_id: i64,
    articles: &[NewArticle],
    now: i64,
) -> Result<usize, sqlx::Error> {
    let mut total_inserted: usize = 0;

    for chunk in articles.chunks(BATCH_SIZE) {
        let mut insert_builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO articles (id, feed_id, title, link, content, content_snippet, \
             pub_date, published, author, created_at) ",
        );
        push_article_values(&mut insert_builder, feed_id, chunk, now);
        insert_builder.build().execute(&mut **tx).await?;

        let changes: (i64,) = sqlx::query_as("SELECT changes()")
            .fetch_one(&mut **tx)
            .await?;
        total_inserted += changes.0 as usize;

        let mut upsert_builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO articles (id, feed_id, title, link, content, content_snippet, \
             pub_date, published, author, created_at) ",
        );
        push_article_values(&mut upsert_builder, feed_id, chunk, now);
        upsert_builder.push(
            " ON CONFLICT(id) DO UPDATE SET \
             title = excluded.title, link = excluded.link, content = excluded.content, \
             content_snippet = excluded.content_snippet, pub_date = excluded.pub_date, \
             published = excluded.published, author = excluded.author",
        );
        upsert_builder.build().execute(&mut **tx).await?;
    }

    Ok(total_inserted)
}

fn push_article_values<'a>(
    builder: &mut QueryBuilder<'a, Sqlite>,
    feed_id: i64,
    chunk: &'a [NewArticle],
    now: i64,
) {
    builder.push_values(chunk, |mut b, article| {
        b.push_bind(&article.id)
            .push_bind(feed_id)
            .push_bind(&article.title)
            .push_bind(&article.link)
            .push_bind(&article.content)
            .push_bind(&article.content_snippet)
            .push_bind(&article.pub_date)
            .push_bind(article.published)
            .push_bind(&article.author)
            .push_bind(now);
    });
}

/// Escape LIKE wildcards so user text matches literally
fn like_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Upsert articles for a feed, returns the number of new articles inserted
    pub async fn upsert_articles(&self, feed_id: i64, articles: &[NewArticle]) -> Result<usize> {
        if articles.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let inserted = upsert_in_tx(&mut tx, feed_id, articles, now).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// List stored articles, newest first.
    ///
    /// Articles with a parseable publication date come first, ordered by it;
    /// undated ones follow in first-seen order. The limit defaults to
    /// [`DEFAULT_ARTICLE_LIMIT`] and is capped at 2000.
    pub async fn get_articles(&self, query: &ArticleQuery) -> Result<Vec<Article>> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_ARTICLE_LIMIT)
            .clamp(1, MAX_ARTICLES);

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE 1 = 1"));

        if let Some(feed_id) = query.feed_id {
            builder.push(" AND feed_id = ");
            builder.push_bind(feed_id);
        }
        if query.unread_only {
            builder.push(" AND read = 0");
        }
        if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = like_pattern(search.trim());
            builder.push(" AND (title LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" ESCAPE '\\' OR content_snippet LIKE ");
            builder.push_bind(pattern);
            builder.push(" ESCAPE '\\')");
        }

        builder.push(" ORDER BY published IS NULL, published DESC, created_at DESC, id LIMIT ");
        builder.push_bind(limit);

        tracing::debug!(
            feed_id = ?query.feed_id,
            unread_only = query.unread_only,
            limit = limit,
            "get_articles"
        );

        let articles = builder
            .build_query_as::<Article>()
            .fetch_all(&self.pool)
            .await?;
        Ok(articles)
    }

    /// Get a single article by its derived identity
    pub async fn get_article_by_id(&self, article_id: &str) -> Result<Option<Article>> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?");
        let article = sqlx::query_as::<_, Article>(&sql)
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(article)
    }

    /// Number of stored articles, for one feed or overall
    pub async fn count_articles(&self, feed_id: Option<i64>) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM articles WHERE ?1 IS NULL OR feed_id = ?1")
                .bind(feed_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Mark article as read (idempotent), returns whether it was changed
    pub async fn mark_article_read(&self, article_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE articles SET read = 1 WHERE id = ? AND read = 0")
            .bind(article_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark all articles as read, optionally limited to one feed.
    /// Returns the count of articles that changed.
    pub async fn mark_all_read(&self, feed_id: Option<i64>) -> Result<u64> {
        let result =
            sqlx::query("UPDATE articles SET read = 1 WHERE read = 0 AND (?1 IS NULL OR feed_id = ?1)")
                .bind(feed_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Store an externally produced summary for an article.
    /// Returns whether the article exists.
    pub async fn set_article_summary(&self, article_id: &str, summary: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE articles SET summary = ? WHERE id = ?")
            .bind(summary)
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
