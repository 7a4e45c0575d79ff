use crate::feed::parser::{parse_feed_document, FeedData};
use crate::feed::urls::{fix_relative_urls, has_root_relative};
use crate::storage::{Database, Feed, NewArticle};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default hard timeout for a single retrieval attempt
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default response body cap
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024; // 10MB
/// Default number of feeds refreshed at the same time
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_USER_AGENT: &str = concat!("feedsync/", env!("CARGO_PKG_VERSION"));

/// Placeholder replaced by the percent-encoded feed URL in mirror templates
pub const MIRROR_PLACEHOLDER: &str = "{url}";

const ACCEPT_FEEDS: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.9, */*;q=0.8";

/// Retrieval settings passed explicitly to every fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub user_agent: String,
    pub max_bytes: usize,
    pub concurrency: usize,
    /// Fallback URL templates tried in order after the direct request,
    /// e.g. `https://mirror.example/raw?url={url}`
    pub mirrors: Vec<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_bytes: DEFAULT_MAX_BYTES,
            concurrency: DEFAULT_CONCURRENCY,
            mirrors: Vec::new(),
        }
    }
}

/// One way of retrieving a feed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// GET the feed URL itself
    Direct,
    /// GET a mirror template with the feed URL substituted in
    Mirror(String),
}

impl Strategy {
    /// The URL this strategy requests for `feed_url`.
    pub fn request_url(&self, feed_url: &str) -> String {
        match self {
            Strategy::Direct => feed_url.to_string(),
            Strategy::Mirror(template) => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(feed_url.as_bytes()).collect();
                template.replace(MIRROR_PLACEHOLDER, &encoded)
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Direct => write!(f, "direct"),
            Strategy::Mirror(template) => write!(f, "mirror {}", template),
        }
    }
}

/// A strategy that was tried and the reason it failed.
#[derive(Debug)]
pub struct StrategyFailure {
    pub strategy: Strategy,
    pub error: FetchError,
}

/// Errors that can occur during feed fetching operations.
///
/// Malformed markup is not among them: the parser always yields a
/// (possibly empty) document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Database operation failed while storing the snapshot
    #[error("Database error: {0}")]
    Database(String),
    /// The blocking parse task panicked or was cancelled
    #[error("Feed parsing did not complete: {0}")]
    ParseTask(#[from] tokio::task::JoinError),
    /// Every configured strategy failed
    #[error("Feed unreachable: {}", describe_failures(.attempts))]
    Unreachable { attempts: Vec<StrategyFailure> },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err)
        }
    }
}

fn describe_failures(attempts: &[StrategyFailure]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.strategy, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of a successful refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Items present in the fetched document
    pub items: usize,
    /// Articles not previously stored
    pub new_articles: usize,
}

/// Result of a single feed refresh.
///
/// Contains the feed ID for correlation and either the refresh summary or
/// the error that occurred.
#[derive(Debug)]
pub struct FetchResult {
    /// Database ID of the feed that was fetched
    pub feed_id: i64,
    pub result: Result<RefreshSummary, FetchError>,
}

/// Builds the HTTP client used for all retrievals.
///
/// The client carries the hard per-request timeout, so an attempt can never
/// outlive `opts.timeout`.
pub fn build_client(opts: &FetchOptions) -> reqwest::Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static(ACCEPT_FEEDS),
    );

    reqwest::Client::builder()
        .user_agent(opts.user_agent.clone())
        .timeout(opts.timeout)
        .default_headers(headers)
        .build()
}

/// Fetches and parses a feed without storing anything.
///
/// Strategies are tried in order (direct, then each mirror) and the first
/// success wins. There are no retries beyond the configured strategies.
/// With a single strategy its error is returned as is; otherwise the
/// failures are aggregated into [`FetchError::Unreachable`].
///
/// Item content that still carries root-relative references after parsing
/// (because the item link was missing or relative) is resolved against the
/// feed URL's origin. That fallback lives here only: the parser knows
/// nothing about where a document came from, so
/// [`parse_feed_document`] leaves such references untouched.
///
/// Parsing runs on the blocking pool so a large body does not stall the
/// runtime's worker threads.
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    opts: &FetchOptions,
) -> Result<FeedData, FetchError> {
    let body = fetch_document(client, url, opts).await?;
    let mut data = tokio::task::spawn_blocking(move || parse_feed_document(&body)).await?;

    for item in &mut data.items {
        if has_root_relative(&item.content) {
            item.content = fix_relative_urls(&item.content, url);
        }
    }

    tracing::debug!(feed = %url, items = data.items.len(), "Feed parsed");
    Ok(data)
}

async fn fetch_document(
    client: &reqwest::Client,
    url: &str,
    opts: &FetchOptions,
) -> Result<String, FetchError> {
    let strategies = std::iter::once(Strategy::Direct)
        .chain(opts.mirrors.iter().cloned().map(Strategy::Mirror))
        .collect::<Vec<_>>();
    let mut attempts = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        let request_url = strategy.request_url(url);
        match fetch_once(client, &request_url, opts).await {
            Ok(bytes) => {
                if !attempts.is_empty() {
                    tracing::info!(feed = %url, strategy = %strategy, "Fetched via fallback strategy");
                }
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            Err(error) => {
                tracing::debug!(feed = %url, strategy = %strategy, error = %error, "Fetch strategy failed");
                attempts.push(StrategyFailure { strategy, error });
            }
        }
    }

    tracing::warn!(feed = %url, attempts = attempts.len(), "All fetch strategies failed");
    if attempts.len() == 1 {
        if let Some(only) = attempts.pop() {
            return Err(only.error);
        }
    }
    Err(FetchError::Unreachable { attempts })
}

async fn fetch_once(
    client: &reqwest::Client,
    url: &str,
    opts: &FetchOptions,
) -> Result<Vec<u8>, FetchError> {
    tokio::time::timeout(opts.timeout, request(client, url, opts.max_bytes))
        .await
        .map_err(|_| FetchError::Timeout)?
}

async fn request(
    client: &reqwest::Client,
    url: &str,
    max_bytes: usize,
) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }
    read_limited_bytes(response, max_bytes).await
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

/// Refreshes a single feed and stores its items.
///
/// Fetch, persist through [`Database::complete_feed_refresh`], then record the
/// feed's error status. Storing the same document twice reports zero new
/// articles the second time.
pub async fn refresh_one(
    db: &Database,
    client: &reqwest::Client,
    feed: &Feed,
    opts: &FetchOptions,
) -> FetchResult {
    let result = fetch_and_store(db, client, feed, opts).await;

    if let Err(e) = &result {
        tracing::warn!(feed = %feed.url, error = %e, "Feed refresh failed");
        if let Err(db_err) = db.set_feed_error(feed.id, Some(&e.to_string())).await {
            tracing::warn!(feed_id = feed.id, error = %db_err, "Failed to record feed error");
        }
    }

    FetchResult {
        feed_id: feed.id,
        result,
    }
}

/// Refreshes many feeds concurrently with progress reporting.
///
/// At most `opts.concurrency` feeds are in flight. A failing feed never
/// affects its siblings; each outcome is reported in its own
/// [`FetchResult`], in completion order. Error statuses are written in one
/// batch after all fetches complete.
///
/// `progress_tx` receives `(completed, total)` after each feed.
pub async fn refresh_all(
    db: &Database,
    client: &reqwest::Client,
    feeds: Vec<Feed>,
    opts: &FetchOptions,
    progress_tx: Option<mpsc::Sender<(usize, usize)>>,
) -> Vec<FetchResult> {
    if feeds.is_empty() {
        return Vec::new();
    }

    let total = feeds.len();
    let completed = Arc::new(AtomicUsize::new(0));

    let results: Vec<FetchResult> = stream::iter(feeds)
        .map(|feed| {
            let progress_tx = progress_tx.clone();
            let completed = completed.clone();

            async move {
                let result = fetch_and_store(db, client, &feed, opts).await;
                if let Err(e) = &result {
                    tracing::warn!(feed = %feed.url, error = %e, "Feed refresh failed");
                }

                let done = completed.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                if let Some(tx) = progress_tx {
                    if let Err(e) = tx.send((done, total)).await {
                        tracing::warn!(error = %e, done = done, total = total, "Progress channel send failed (receiver dropped)");
                    }
                }

                FetchResult {
                    feed_id: feed.id,
                    result,
                }
            }
        })
        .buffer_unordered(opts.concurrency.max(1))
        .collect()
        .await;

    // Successes already cleared their error inside complete_feed_refresh
    let updates: Vec<(i64, Option<String>)> = results
        .iter()
        .filter_map(|r| match &r.result {
            Ok(_) => None,
            Err(e) => Some((r.feed_id, Some(e.to_string()))),
        })
        .collect();

    if let Err(e) = db.batch_set_feed_errors(&updates).await {
        tracing::warn!(error = %e, "Failed to batch update feed error statuses");
    }

    results
}

async fn fetch_and_store(
    db: &Database,
    client: &reqwest::Client,
    feed: &Feed,
    opts: &FetchOptions,
) -> Result<RefreshSummary, FetchError> {
    let data = fetch_feed(client, &feed.url, opts).await?;

    let articles: Vec<NewArticle> = data
        .items
        .iter()
        .map(|item| NewArticle::from_item(feed.id, item))
        .collect();

    // Clear error, upsert articles and update timestamp in one transaction
    let new_articles = db
        .complete_feed_refresh(feed.id, &data.description, &articles)
        .await
        .map_err(|e| FetchError::Database(e.to_string()))?;

    tracing::debug!(
        feed = %feed.url,
        items = articles.len(),
        new = new_articles,
        "Feed refreshed"
    );

    Ok(RefreshSummary {
        items: articles.len(),
        new_articles,
    })
}
