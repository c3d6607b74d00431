//! Storage seams: tweets, the follow graph, materialized feeds, comments
//! and likes
//!
//! Each store is a trait with an in-memory implementation (single process and
//! tests) and a Postgres implementation.

pub mod comment_repo;
pub mod feed_store;
pub mod follow_graph;
pub mod like_repo;
pub mod tweet_repo;

pub use comment_repo::{CommentStore, MemoryCommentStore, PgCommentStore};
pub use feed_store::{FeedStore, MemoryFeedStore, PgFeedStore};
pub use follow_graph::{FollowGraph, MemoryFollowGraph, PgFollowGraph};
pub use like_repo::{LikeStore, MemoryLikeStore, PgLikeStore};
pub use tweet_repo::{MemoryTweetStore, PgTweetStore, TweetStore};

use sqlx::PgPool;

/// Apply the tweet, friendship, newsfeed, comment and like schema. Versions owned by other
/// services in the shared migrations table are ignored.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator.run(pool).await
}
