use crate::error::FollowGraphError;
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

type Result<T> = std::result::Result<T, FollowGraphError>;

/// Directed follower → followee edges, each stamped with when it was made
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FollowGraph: Send + Sync {
    /// Idempotent; returns whether a new edge was created
    async fn follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool>;

    /// Idempotent; returns whether an edge was removed
    async fn unfollow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool>;

    async fn is_following(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool>;

    /// One page of `followee_id`'s followers in ascending id order, starting
    /// strictly after `after`. Only edges created at or before `as_of` count.
    async fn follower_page(
        &self,
        followee_id: Uuid,
        as_of: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Uuid>>;
}

/// Follow timestamps use the same microsecond precision as tweets
fn follow_time() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// In-process graph, partitioned by followee
#[derive(Default)]
pub struct MemoryFollowGraph {
    followers: DashMap<Uuid, BTreeMap<Uuid, DateTime<Utc>>>,
}

impl MemoryFollowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an edge with an explicit creation time
    pub fn follow_at(
        &self,
        follower_id: Uuid,
        followee_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        if follower_id == followee_id {
            return Err(FollowGraphError::SelfFollow);
        }
        let mut followers = self.followers.entry(followee_id).or_default();
        if followers.contains_key(&follower_id) {
            return Ok(false);
        }
        followers.insert(follower_id, at);
        Ok(true)
    }
}

#[async_trait]
impl FollowGraph for MemoryFollowGraph {
    async fn follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        self.follow_at(follower_id, followee_id, follow_time())
    }

    async fn unfollow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        Ok(self
            .followers
            .get_mut(&followee_id)
            .map(|mut followers| followers.remove(&follower_id).is_some())
            .unwrap_or(false))
    }

    async fn is_following(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        Ok(self
            .followers
            .get(&followee_id)
            .map(|followers| followers.contains_key(&follower_id))
            .unwrap_or(false))
    }

    async fn follower_page(
        &self,
        followee_id: Uuid,
        as_of: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Uuid>> {
        let Some(followers) = self.followers.get(&followee_id) else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(cursor) => std::ops::Bound::Excluded(cursor),
            None => std::ops::Bound::Unbounded,
        };
        Ok(followers
            .range((lower, std::ops::Bound::Unbounded))
            .filter(|(_, followed_at)| **followed_at <= as_of)
            .take(limit)
            .map(|(follower, _)| *follower)
            .collect())
    }
}

/// Repository for the `friendships` table
#[derive(Clone)]
pub struct PgFollowGraph {
    pool: PgPool,
}

impl PgFollowGraph {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FollowGraph for PgFollowGraph {
    async fn follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        if follower_id == followee_id {
            return Err(FollowGraphError::SelfFollow);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO friendships (follower_id, followee_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (follower_id, followee_id) DO NOTHING
            "#,
        )
        .bind(follower_id)
        .bind(followee_id)
        .bind(follow_time())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn unfollow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM friendships
            WHERE follower_id = $1 AND followee_id = $2
            "#,
        )
        .bind(follower_id)
        .bind(followee_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_following(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM friendships
                WHERE follower_id = $1 AND followee_id = $2
            )
            "#,
        )
        .bind(follower_id)
        .bind(followee_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn follower_page(
        &self,
        followee_id: Uuid,
        as_of: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Uuid>> {
        let followers: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT follower_id
            FROM friendships
            WHERE followee_id = $1
              AND created_at <= $2
              AND ($3::uuid IS NULL OR follower_id > $3)
            ORDER BY follower_id
            LIMIT $4
            "#,
        )
        .bind(followee_id)
        .bind(as_of)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(followers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_follow_is_idempotent() {
        let graph = MemoryFollowGraph::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(graph.follow(b, a).await.unwrap());
        assert!(!graph.follow(b, a).await.unwrap());
        assert!(graph.is_following(b, a).await.unwrap());
        assert!(!graph.is_following(a, b).await.unwrap());

        assert!(graph.unfollow(b, a).await.unwrap());
        assert!(!graph.unfollow(b, a).await.unwrap());
    }

    #[tokio::test]
    async fn test_self_follow_is_rejected() {
        let graph = MemoryFollowGraph::new();
        let a = Uuid::new_v4();
        assert!(matches!(
            graph.follow(a, a).await,
            Err(FollowGraphError::SelfFollow)
        ));
    }

    #[tokio::test]
    async fn test_follower_pages_cover_every_follower_once() {
        let graph = MemoryFollowGraph::new();
        let author = Uuid::new_v4();
        let mut expected: Vec<Uuid> = (0..7).map(|_| Uuid::new_v4()).collect();
        for follower in &expected {
            graph.follow(*follower, author).await.unwrap();
        }
        expected.sort();

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = graph
                .follower_page(author, Utc::now(), cursor, 3)
                .await
                .unwrap();
            if page.is_empty() {
                break;
            }
            cursor = page.last().copied();
            seen.extend(page);
        }
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_follower_page_excludes_follows_made_after_cutoff() {
        let graph = MemoryFollowGraph::new();
        let author = Uuid::new_v4();
        let (early, late) = (Uuid::new_v4(), Uuid::new_v4());
        let cutoff = Utc::now();

        graph
            .follow_at(early, author, cutoff - chrono::Duration::seconds(1))
            .unwrap();
        graph
            .follow_at(late, author, cutoff + chrono::Duration::seconds(1))
            .unwrap();

        let page = graph.follower_page(author, cutoff, None, 10).await.unwrap();
        assert_eq!(page, vec![early]);

        // Refollowing does not move the original timestamp
        assert!(!graph.follow(early, author).await.unwrap());
        let page = graph.follower_page(author, cutoff, None, 10).await.unwrap();
        assert_eq!(page, vec![early]);
    }
}
