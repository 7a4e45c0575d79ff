mod articles;
mod feeds;
mod identity;
mod schema;
mod types;

pub use articles::DEFAULT_ARTICLE_LIMIT;
pub use identity::article_id;
pub use schema::Database;
pub use types::{
    parse_pub_date, Article, ArticleQuery, DatabaseError, Feed, NewArticle, NewFeed,
};
