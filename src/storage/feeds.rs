use anyhow::Result;
use sqlx::QueryBuilder;

use super::articles::upsert_in_tx;
use super::schema::Database;
use super::types::{DatabaseError, Feed, NewArticle, NewFeed};

const FEED_COLUMNS: &str = r#"
    SELECT
        f.id, f.title, f.url, f.description, f.last_fetched, f.error,
        COUNT(CASE WHEN a.read = 0 THEN 1 END) as unread_count,
        f.created_at
    FROM feeds f
    LEFT JOIN articles a ON f.id = a.feed_id
"#;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe to a feed, returning its id.
    ///
    /// Subscribing to a URL that already exists updates its title and
    /// description and returns the existing id.
    pub async fn insert_feed(&self, feed: &NewFeed) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (title, url, description, created_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET title = excluded.title, description = excluded.description
            RETURNING id
        "#,
        )
        .bind(&feed.title)
        .bind(&feed.url)
        .bind(&feed.description)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Sync feeds from an OPML import.
    ///
    /// Batches INSERTs in chunks of 100. Existing subscriptions keep their
    /// description and only take the imported title.
    pub async fn sync_feeds(&self, feeds: &[NewFeed]) -> Result<()> {
        if feeds.is_empty() {
            return Ok(());
        }

        const BATCH_SIZE: usize = 100;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for chunk in feeds.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT INTO feeds (title, url, description, created_at) ");

            builder.push_values(chunk, |mut b, feed| {
                b.push_bind(&feed.title)
                    .push_bind(&feed.url)
                    .push_bind(&feed.description)
                    .push_bind(now);
            });

            builder.push(" ON CONFLICT(url) DO UPDATE SET title = excluded.title");

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Get all feeds with their unread article counts, ordered by title
    pub async fn get_feeds_with_unread_counts(&self) -> Result<Vec<Feed>> {
        let sql = format!("{FEED_COLUMNS} GROUP BY f.id ORDER BY f.title COLLATE NOCASE");
        let feeds = sqlx::query_as::<_, Feed>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let sql = format!("{FEED_COLUMNS} WHERE f.id = ? GROUP BY f.id");
        let feed = sqlx::query_as::<_, Feed>(&sql)
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Unsubscribe, removing the feed's articles with it. Returns whether a
    /// feed was deleted.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set or clear the error status for a feed
    pub async fn set_feed_error(&self, feed_id: i64, error: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE feeds SET error = ? WHERE id = ?")
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Batch update feed error statuses in a single UPDATE statement.
    ///
    /// # Arguments
    ///
    /// * `updates` - Slice of (feed_id, error_message) tuples. `None` clears the error.
    pub async fn batch_set_feed_errors(&self, updates: &[(i64, Option<String>)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        // UPDATE feeds SET error = CASE id WHEN 1 THEN 'e' WHEN 2 THEN NULL END WHERE id IN (1, 2)
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE feeds SET error = CASE id ");

        for (feed_id, error) in updates {
            builder.push("WHEN ");
            builder.push_bind(*feed_id);
            builder.push(" THEN ");
            builder.push_bind(error.as_deref());
            builder.push(" ");
        }

        builder.push("END WHERE id IN (");
        let mut separated = builder.separated(", ");
        for (feed_id, _) in updates {
            separated.push_bind(*feed_id);
        }
        separated.push_unseparated(")");

        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Complete a feed refresh atomically: clear error, upsert articles, update timestamp.
    ///
    /// Articles are keyed by their derived identity, so calling this twice with
    /// the same items leaves the table unchanged apart from refreshed metadata.
    /// Read state and stored summaries survive re-ingestion.
    ///
    /// # Returns
    ///
    /// The number of newly inserted articles (not updated).
    pub async fn complete_feed_refresh(
        &self,
        feed_id: i64,
        description: &str,
        articles: &[NewArticle],
    ) -> Result<usize, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE feeds SET error = NULL, last_fetched = ?, \
             description = CASE WHEN ? = '' THEN description ELSE ? END WHERE id = ?",
        )
        .bind(now)
        .bind(description)
        .bind(description)
        .bind(feed_id)
        .execute(&mut *tx)
        .await?;

        let inserted = upsert_in_tx(&mut tx, feed_id, articles, now).await?;

        tx.commit().await?;
        Ok(inserted)
    }
}
