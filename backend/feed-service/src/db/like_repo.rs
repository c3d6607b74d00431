use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

/// At most one like per (user, tweet)
#[async_trait]
pub trait LikeStore: Send + Sync {
    /// Idempotent; returns whether a new like was recorded
    async fn like(&self, user_id: Uuid, tweet_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Idempotent; returns whether a like was removed
    async fn unlike(&self, user_id: Uuid, tweet_id: Uuid) -> Result<bool>;

    async fn count(&self, tweet_id: Uuid) -> Result<u64>;

    async fn has_liked(&self, user_id: Uuid, tweet_id: Uuid) -> Result<bool>;
}

/// In-process store, partitioned by tweet
#[derive(Default)]
pub struct MemoryLikeStore {
    likes: DashMap<Uuid, HashMap<Uuid, DateTime<Utc>>>,
}

impl MemoryLikeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LikeStore for MemoryLikeStore {
    async fn like(&self, user_id: Uuid, tweet_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut likers = self.likes.entry(tweet_id).or_default();
        if likers.contains_key(&user_id) {
            return Ok(false);
        }
        likers.insert(user_id, at);
        Ok(true)
    }

    async fn unlike(&self, user_id: Uuid, tweet_id: Uuid) -> Result<bool> {
        Ok(self
            .likes
            .get_mut(&tweet_id)
            .map(|mut likers| likers.remove(&user_id).is_some())
            .unwrap_or(false))
    }

    async fn count(&self, tweet_id: Uuid) -> Result<u64> {
        Ok(self
            .likes
            .get(&tweet_id)
            .map(|likers| likers.len() as u64)
            .unwrap_or(0))
    }

    async fn has_liked(&self, user_id: Uuid, tweet_id: Uuid) -> Result<bool> {
        Ok(self
            .likes
            .get(&tweet_id)
            .map(|likers| likers.contains_key(&user_id))
            .unwrap_or(false))
    }
}

/// Repository for the `likes` table
#[derive(Clone)]
pub struct PgLikeStore {
    pool: PgPool,
}

impl PgLikeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LikeStore for PgLikeStore {
    async fn like(&self, user_id: Uuid, tweet_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO likes (user_id, tweet_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, tweet_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(tweet_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn unlike(&self, user_id: Uuid, tweet_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM likes
            WHERE user_id = $1 AND tweet_id = $2
            "#,
        )
        .bind(user_id)
        .bind(tweet_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, tweet_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM likes WHERE tweet_id = $1
            "#,
        )
        .bind(tweet_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn has_liked(&self, user_id: Uuid, tweet_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM likes
                WHERE user_id = $1 AND tweet_id = $2
            )
            "#,
        )
        .bind(user_id)
        .bind(tweet_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}
