use crate::error::FeedStoreError;
use crate::models::{FeedEntry, FeedPosition};
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

type Result<T> = std::result::Result<T, FeedStoreError>;

/// Materialized per-user feeds
///
/// Every insert is "insert if absent" on (owner, tweet), so repeated and
/// concurrent delivery of the same entry leaves exactly one row.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Returns whether the entry was new
    async fn insert_entry(&self, entry: &FeedEntry) -> Result<bool>;

    /// Insert many entries in one call; returns how many were new. On error
    /// the caller cannot tell which entries landed and should fall back to
    /// `insert_entry`.
    async fn insert_batch(&self, entries: &[FeedEntry]) -> Result<usize>;

    /// Newest first, strictly below `before` when given
    async fn list_feed(
        &self,
        owner_id: Uuid,
        before: Option<FeedPosition>,
        limit: usize,
    ) -> Result<Vec<FeedEntry>>;
}

#[derive(Default)]
struct OwnerFeed {
    entries: BTreeMap<FeedPosition, FeedEntry>,
    /// Tweet ids already present, so the uniqueness check does not scan
    tweets: HashSet<Uuid>,
}

/// In-process store; each owner's feed is its own ordered map
#[derive(Default)]
pub struct MemoryFeedStore {
    feeds: DashMap<Uuid, OwnerFeed>,
}

impl MemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries for `tweet_id` across every owner
    pub fn owners_of(&self, tweet_id: Uuid) -> Vec<Uuid> {
        self.feeds
            .iter()
            .filter(|feed| feed.tweets.contains(&tweet_id))
            .map(|feed| *feed.key())
            .collect()
    }

    pub fn total_entries(&self) -> usize {
        self.feeds.iter().map(|feed| feed.entries.len()).sum()
    }
}

#[async_trait]
impl FeedStore for MemoryFeedStore {
    async fn insert_entry(&self, entry: &FeedEntry) -> Result<bool> {
        let mut feed = self.feeds.entry(entry.owner_id).or_default();
        // Keyed by tweet id, not position: a second entry for the same tweet
        // with a different ordering key is still a duplicate.
        if !feed.tweets.insert(entry.tweet_id) {
            return Ok(false);
        }
        feed.entries.insert(entry.position(), entry.clone());
        Ok(true)
    }

    async fn insert_batch(&self, entries: &[FeedEntry]) -> Result<usize> {
        let mut inserted = 0;
        for entry in entries {
            if self.insert_entry(entry).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn list_feed(
        &self,
        owner_id: Uuid,
        before: Option<FeedPosition>,
        limit: usize,
    ) -> Result<Vec<FeedEntry>> {
        let Some(feed) = self.feeds.get(&owner_id) else {
            return Ok(Vec::new());
        };
        let entries = match before {
            Some(position) => feed
                .entries
                .range(..position)
                .rev()
                .take(limit)
                .map(|(_, e)| e.clone())
                .collect(),
            None => feed.entries.values().rev().take(limit).cloned().collect(),
        };
        Ok(entries)
    }
}

/// Repository for the `newsfeeds` table
#[derive(Clone)]
pub struct PgFeedStore {
    pool: PgPool,
}

impl PgFeedStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedStore for PgFeedStore {
    async fn insert_entry(&self, entry: &FeedEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO newsfeeds (owner_id, tweet_id, ordering_key, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (owner_id, tweet_id) DO NOTHING
            "#,
        )
        .bind(entry.owner_id)
        .bind(entry.tweet_id)
        .bind(entry.ordering_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_batch(&self, entries: &[FeedEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO newsfeeds (owner_id, tweet_id, ordering_key) ");
        builder.push_values(entries, |mut row, entry| {
            row.push_bind(entry.owner_id)
                .push_bind(entry.tweet_id)
                .push_bind(entry.ordering_key);
        });
        builder.push(" ON CONFLICT (owner_id, tweet_id) DO NOTHING");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn list_feed(
        &self,
        owner_id: Uuid,
        before: Option<FeedPosition>,
        limit: usize,
    ) -> Result<Vec<FeedEntry>> {
        let (before_key, before_tweet) = match before {
            Some(p) => (Some(p.ordering_key), Some(p.tweet_id)),
            None => (None, None),
        };

        let entries = sqlx::query_as::<_, FeedEntry>(
            r#"
            SELECT owner_id, tweet_id, ordering_key
            FROM newsfeeds
            WHERE owner_id = $1
              AND ($2::bigint IS NULL OR (ordering_key, tweet_id) < ($2, $3))
            ORDER BY ordering_key DESC, tweet_id DESC
            LIMIT $4
            "#,
        )
        .bind(owner_id)
        .bind(before_key)
        .bind(before_tweet)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
