use crate::error::Result;
use crate::models::Tweet;
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait TweetStore: Send + Sync {
    async fn insert(&self, tweet: &Tweet) -> Result<()>;

    async fn get(&self, tweet_id: Uuid) -> Result<Option<Tweet>>;

    /// Missing ids are skipped; order is unspecified
    async fn get_many(&self, tweet_ids: &[Uuid]) -> Result<Vec<Tweet>>;

    /// Newest first
    async fn list_by_author(&self, author_id: Uuid, limit: usize) -> Result<Vec<Tweet>>;

    /// Returns whether a tweet was removed
    async fn delete(&self, tweet_id: Uuid) -> Result<bool>;
}

#[derive(Default)]
pub struct MemoryTweetStore {
    tweets: DashMap<Uuid, Tweet>,
}

impl MemoryTweetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TweetStore for MemoryTweetStore {
    async fn insert(&self, tweet: &Tweet) -> Result<()> {
        self.tweets.insert(tweet.id, tweet.clone());
        Ok(())
    }

    async fn get(&self, tweet_id: Uuid) -> Result<Option<Tweet>> {
        Ok(self.tweets.get(&tweet_id).map(|t| t.clone()))
    }

    async fn get_many(&self, tweet_ids: &[Uuid]) -> Result<Vec<Tweet>> {
        Ok(tweet_ids
            .iter()
            .filter_map(|id| self.tweets.get(id).map(|t| t.clone()))
            .collect())
    }

    async fn list_by_author(&self, author_id: Uuid, limit: usize) -> Result<Vec<Tweet>> {
        let mut tweets: Vec<Tweet> = self
            .tweets
            .iter()
            .filter(|t| t.author_id == author_id)
            .map(|t| t.clone())
            .collect();
        tweets.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        tweets.truncate(limit);
        Ok(tweets)
    }

    async fn delete(&self, tweet_id: Uuid) -> Result<bool> {
        Ok(self.tweets.remove(&tweet_id).is_some())
    }
}

/// Repository for the `tweets` table
#[derive(Clone)]
pub struct PgTweetStore {
    pool: PgPool,
}

impl PgTweetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TweetStore for PgTweetStore {
    async fn insert(&self, tweet: &Tweet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tweets (id, user_id, content, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(tweet.id)
        .bind(tweet.author_id)
        .bind(&tweet.content)
        .bind(tweet.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, tweet_id: Uuid) -> Result<Option<Tweet>> {
        let tweet = sqlx::query_as::<_, Tweet>(
            r#"
            SELECT id, user_id AS author_id, content, created_at
            FROM tweets
            WHERE id = $1
            "#,
        )
        .bind(tweet_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tweet)
    }

    async fn get_many(&self, tweet_ids: &[Uuid]) -> Result<Vec<Tweet>> {
        if tweet_ids.is_empty() {
            return Ok(Vec::new());
        }

        let tweets = sqlx::query_as::<_, Tweet>(
            r#"
            SELECT id, user_id AS author_id, content, created_at
            FROM tweets
            WHERE id = ANY($1)
            "#,
        )
        .bind(tweet_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(tweets)
    }

    async fn list_by_author(&self, author_id: Uuid, limit: usize) -> Result<Vec<Tweet>> {
        let tweets = sqlx::query_as::<_, Tweet>(
            r#"
            SELECT id, user_id AS author_id, content, created_at
            FROM tweets
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(author_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(tweets)
    }

    async fn delete(&self, tweet_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM tweets
            WHERE id = $1
            "#,
        )
        .bind(tweet_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
