use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use feedsync::config::Config;
use feedsync::feed::{self, FetchOptions, OpmlFeed};
use feedsync::storage::{ArticleQuery, Database, DatabaseError, NewArticle, NewFeed};
use feedsync::util::validate_feed_url;

/// Get the config directory path (~/.config/feedsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedsync"))
}

/// Create the config directory with user-only access if it does not exist yet.
fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to set directory permissions to 0700");
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "feedsync", version, about = "RSS/Atom feed reader for the command line")]
struct Args {
    /// Config file (default: ~/.config/feedsync/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (overrides database_path from the config)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed and store its current items
    Add { url: String },
    /// Unsubscribe from a feed, deleting its articles
    Remove { feed_id: i64 },
    /// List subscriptions with unread counts
    Feeds,
    /// Fetch all feeds (or one) and store new items
    Refresh {
        #[arg(long, value_name = "ID")]
        feed: Option<i64>,
    },
    /// List stored articles, newest first
    Articles {
        #[arg(long, value_name = "ID")]
        feed: Option<i64>,
        /// Match against title and snippet
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_name = "N")]
        limit: Option<i64>,
        /// Only unread articles
        #[arg(long)]
        unread: bool,
    },
    /// Print an article and mark it read
    Show { article_id: String },
    /// Mark all articles (or one feed's) as read
    MarkRead {
        #[arg(long, value_name = "ID")]
        feed: Option<i64>,
    },
    /// Store an externally produced summary for an article
    SetSummary { article_id: String, summary: String },
    /// Parse a local feed document and print it as JSON
    Parse { file: PathBuf },
    /// Fetch and parse a feed without storing it, printing JSON
    Fetch { url: String },
    /// Subscribe to every feed of an OPML file
    Import { file: PathBuf },
    /// Write subscriptions to an OPML file
    Export { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let opts = config.fetch_options();

    // Commands that never touch the database
    match &args.command {
        Command::Parse { file } => return cmd_parse(file).await,
        Command::Fetch { url } => return cmd_fetch(url, &opts).await,
        _ => {}
    }

    let db = open_database(&args, &config).await?;

    match args.command {
        Command::Add { url } => cmd_add(&db, &url, &opts).await,
        Command::Remove { feed_id } => {
            if db.delete_feed(feed_id).await? {
                println!("Removed feed {}", feed_id);
                Ok(())
            } else {
                anyhow::bail!("No feed with id {}", feed_id)
            }
        }
        Command::Feeds => cmd_feeds(&db).await,
        Command::Refresh { feed } => cmd_refresh(&db, feed, &opts).await,
        Command::Articles {
            feed,
            search,
            limit,
            unread,
        } => {
            let query = ArticleQuery {
                feed_id: feed,
                search,
                unread_only: unread,
                limit: Some(limit.unwrap_or(config.article_limit)),
            };
            cmd_articles(&db, &query).await
        }
        Command::Show { article_id } => cmd_show(&db, &article_id).await,
        Command::MarkRead { feed } => {
            let changed = db
                .mark_all_read(feed)
                .await
                .context("Failed to mark articles read")?;
            println!("Marked {} article(s) read", changed);
            Ok(())
        }
        Command::SetSummary {
            article_id,
            summary,
        } => {
            if db.set_article_summary(&article_id, &summary).await? {
                println!("Summary stored for {}", article_id);
                Ok(())
            } else {
                anyhow::bail!("No article with id {}", article_id)
            }
        }
        Command::Import { file } => cmd_import(&db, &file).await,
        Command::Export { file } => {
            let feeds = db
                .get_feeds_with_unread_counts()
                .await
                .context("Failed to load feeds")?;
            let entries: Vec<OpmlFeed> = feeds.iter().map(OpmlFeed::from).collect();
            feed::export_to_file(&entries, &file)?;
            println!("Exported {} feed(s) to {}", entries.len(), file.display());
            Ok(())
        }
        Command::Parse { .. } | Command::Fetch { .. } => Ok(()),
    }
}

async fn open_database(args: &Args, config: &Config) -> Result<Database> {
    let db_path = match (&args.db, &config.database_path) {
        (Some(path), _) | (None, Some(path)) => path.clone(),
        (None, None) => {
            let dir = get_config_dir()?;
            ensure_private_dir(&dir)?;
            dir.join("feedsync.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    match Database::open(db_path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

fn client(opts: &FetchOptions) -> Result<reqwest::Client> {
    feed::build_client(opts).context("Failed to build HTTP client")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

async fn cmd_parse(file: &Path) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let data = feed::parse_feed_document(&String::from_utf8_lossy(&bytes));
    print_json(&data)
}

async fn cmd_fetch(url: &str, opts: &FetchOptions) -> Result<()> {
    let url = validate_feed_url(url).context("Refusing to fetch URL")?;
    let data = feed::fetch_feed(&client(opts)?, url.as_str(), opts)
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;
    print_json(&data)
}

async fn cmd_add(db: &Database, url: &str, opts: &FetchOptions) -> Result<()> {
    let url = validate_feed_url(url).context("Refusing to subscribe")?;
    let url = url.as_str();

    let data = feed::fetch_feed(&client(opts)?, url, opts)
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    let title = if data.title.is_empty() {
        url.to_string()
    } else {
        data.title.clone()
    };
    let feed_id = db
        .insert_feed(&NewFeed {
            title: title.clone(),
            url: url.to_string(),
            description: data.description.clone(),
        })
        .await
        .context("Failed to store feed")?;

    let articles: Vec<NewArticle> = data
        .items
        .iter()
        .map(|item| NewArticle::from_item(feed_id, item))
        .collect();
    let new = db
        .complete_feed_refresh(feed_id, &data.description, &articles)
        .await
        .context("Failed to store articles")?;

    println!(
        "Subscribed to \"{}\" (feed {}): {} item(s), {} new",
        title,
        feed_id,
        articles.len(),
        new
    );
    Ok(())
}

async fn cmd_feeds(db: &Database) -> Result<()> {
    let feeds = db
        .get_feeds_with_unread_counts()
        .await
        .context("Failed to load feeds")?;
    if feeds.is_empty() {
        println!("No feeds. Add one with: feedsync add <URL>");
        return Ok(());
    }

    for f in feeds {
        let fetched = f
            .last_fetched
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:>4}  {:>4} unread  {}  {}  ({})",
            f.id, f.unread_count, fetched, f.title, f.url
        );
        if let Some(error) = f.error {
            println!("      error: {}", error);
        }
    }
    Ok(())
}

async fn cmd_refresh(db: &Database, feed_id: Option<i64>, opts: &FetchOptions) -> Result<()> {
    let feeds = match feed_id {
        Some(id) => vec![db
            .get_feed(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No feed with id {}", id))?],
        None => db
            .get_feeds_with_unread_counts()
            .await
            .context("Failed to load feeds")?,
    };
    if feeds.is_empty() {
        println!("No feeds to refresh");
        return Ok(());
    }

    let titles: std::collections::HashMap<i64, String> =
        feeds.iter().map(|f| (f.id, f.title.clone())).collect();

    let (progress_tx, mut progress_rx) = mpsc::channel::<(usize, usize)>(32);
    let progress = tokio::spawn(async move {
        let mut stderr = std::io::stderr();
        while let Some((done, total)) = progress_rx.recv().await {
            let _ = write!(stderr, "\rRefreshing {}/{}", done, total);
            let _ = stderr.flush();
        }
        let _ = writeln!(stderr);
    });

    let results = feed::refresh_all(db, &client(opts)?, feeds, opts, Some(progress_tx)).await;
    let _ = progress.await;

    let mut failed = 0;
    for r in &results {
        let title = titles.get(&r.feed_id).map(String::as_str).unwrap_or("?");
        match &r.result {
            Ok(summary) => println!(
                "ok    {}: {} item(s), {} new",
                title, summary.items, summary.new_articles
            ),
            Err(e) => {
                failed += 1;
                println!("error {}: {}", title, e);
            }
        }
    }

    // Partial failure is a normal outcome; only a total failure is an error
    if failed == results.len() {
        anyhow::bail!("All {} feed(s) failed to refresh", failed);
    }
    Ok(())
}

async fn cmd_articles(db: &Database, query: &ArticleQuery) -> Result<()> {
    let articles = db
        .get_articles(query)
        .await
        .context("Failed to load articles")?;
    if articles.is_empty() {
        println!("No articles");
        return Ok(());
    }

    for a in articles {
        let marker = if a.read { ' ' } else { '*' };
        let date = a
            .published
            .map(format_timestamp)
            .unwrap_or_else(|| "undated".to_string());
        println!("{} {}  {:<16}  {}", marker, a.id, date, a.title);
    }
    Ok(())
}

async fn cmd_show(db: &Database, article_id: &str) -> Result<()> {
    let article = db
        .get_article_by_id(article_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("No article with id {}", article_id))?;

    println!("{}", article.title);
    if !article.link.is_empty() {
        println!("{}", article.link);
    }
    if let Some(author) = &article.author {
        println!("by {}", author);
    }
    if !article.pub_date.is_empty() {
        println!("{}", article.pub_date);
    }
    if let Some(summary) = &article.summary {
        println!("\nSummary: {}", summary);
    }
    println!("\n{}", feed::strip_markup(&article.content));

    db.mark_article_read(article_id)
        .await
        .context("Failed to mark article read")?;
    Ok(())
}

async fn cmd_import(db: &Database, file: &Path) -> Result<()> {
    // Resolve symlinks and refuse anything but a regular file
    let canonical = file
        .canonicalize()
        .with_context(|| format!("Failed to resolve import file: {}", file.display()))?;
    if !std::fs::metadata(&canonical)?.is_file() {
        anyhow::bail!("Import path must be a regular file");
    }

    let entries = feed::read_opml_file(&canonical)
        .await
        .with_context(|| format!("Failed to parse OPML file {}", canonical.display()))?;
    if entries.is_empty() {
        println!("No valid feeds found in {}", canonical.display());
        return Ok(());
    }

    let feeds: Vec<NewFeed> = entries
        .into_iter()
        .map(|e| NewFeed {
            title: e.title,
            url: e.url,
            description: String::new(),
        })
        .collect();
    db.sync_feeds(&feeds).await.context("Failed to sync feeds")?;

    println!(
        "Imported {} feed(s). Run `feedsync refresh` to fetch them.",
        feeds.len()
    );
    Ok(())
}
