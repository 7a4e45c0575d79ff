//! feedsync: an RSS/Atom reader that turns untrusted feed markup into
//! canonical, deduplicated article snapshots.
//!
//! [`feed`] holds the normalization engine and the fetcher, [`storage`] the
//! SQLite snapshot store, [`config`] the optional TOML configuration.

pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
