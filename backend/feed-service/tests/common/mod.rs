//! Shared in-memory wiring for feed-service integration tests
#![allow(dead_code)]

use account_service::{MemoryUserDirectory, UserCache, UserDirectory};
use async_trait::async_trait;
use dashmap::DashMap;
use feed_service::config::FanoutConfig;
use feed_service::db::{
    FeedStore, FollowGraph, MemoryCommentStore, MemoryFeedStore, MemoryFollowGraph,
    MemoryLikeStore, MemoryTweetStore,
};
use feed_service::error::FeedStoreError;
use feed_service::models::{FeedEntry, FeedPosition};
use feed_service::{
    CommentService, DispatcherWorker, FanoutDispatcher, FriendshipService, JobRegistry,
    LikeService, NewsFeedService, TweetService,
};
use std::sync::Arc;
use uuid::Uuid;

pub fn fast_config() -> FanoutConfig {
    FanoutConfig {
        batch_size: 2,
        write_retries: 0,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        job_retry_delay_ms: 5,
        max_job_attempts: 3,
        ..FanoutConfig::default()
    }
}

/// Feed store that refuses writes for chosen owners a set number of times
#[derive(Default)]
pub struct FlakyFeedStore {
    inner: MemoryFeedStore,
    failures: DashMap<Uuid, u32>,
}

impl FlakyFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` single-entry writes for `owner` fail, and so does any
    /// batch containing `owner` while it is still failing.
    pub fn fail_owner(&self, owner: Uuid, times: u32) {
        self.failures.insert(owner, times);
    }

    pub fn inner(&self) -> &MemoryFeedStore {
        &self.inner
    }

    fn is_failing(&self, owner: Uuid) -> bool {
        self.failures.get(&owner).map(|n| *n > 0).unwrap_or(false)
    }
}

#[async_trait]
impl FeedStore for FlakyFeedStore {
    async fn insert_entry(&self, entry: &FeedEntry) -> Result<bool, FeedStoreError> {
        if let Some(mut remaining) = self.failures.get_mut(&entry.owner_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FeedStoreError::Storage("disk full".into()));
            }
        }
        self.inner.insert_entry(entry).await
    }

    async fn insert_batch(&self, entries: &[FeedEntry]) -> Result<usize, FeedStoreError> {
        if entries.iter().any(|e| self.is_failing(e.owner_id)) {
            return Err(FeedStoreError::Storage("batch rejected".into()));
        }
        self.inner.insert_batch(entries).await
    }

    async fn list_feed(
        &self,
        owner_id: Uuid,
        before: Option<FeedPosition>,
        limit: usize,
    ) -> Result<Vec<FeedEntry>, FeedStoreError> {
        self.inner.list_feed(owner_id, before, limit).await
    }
}

pub struct Harness {
    pub directory: Arc<MemoryUserDirectory>,
    pub users: Arc<UserCache>,
    pub graph: Arc<MemoryFollowGraph>,
    pub tweets: Arc<MemoryTweetStore>,
    pub newsfeed: Arc<NewsFeedService>,
    pub registry: JobRegistry,
    pub dispatcher: FanoutDispatcher,
    pub tweet_service: Arc<TweetService>,
    pub friendships: Arc<FriendshipService>,
    pub comment_service: Arc<CommentService>,
    pub like_service: Arc<LikeService>,
    worker: DispatcherWorker,
}

impl Harness {
    pub fn new(feeds: Arc<dyn FeedStore>, config: FanoutConfig) -> Self {
        let directory = Arc::new(MemoryUserDirectory::new());
        let users = Arc::new(UserCache::in_memory(directory.clone()));
        let graph = Arc::new(MemoryFollowGraph::new());
        let tweets = Arc::new(MemoryTweetStore::new());

        let registry = JobRegistry::with_retention(config.job_retention());
        let newsfeed = Arc::new(NewsFeedService::new(
            graph.clone(),
            feeds,
            tweets.clone(),
            users.clone(),
            config,
        ));
        let (dispatcher, worker) = FanoutDispatcher::start(newsfeed.clone(), registry.clone());

        Self {
            tweet_service: Arc::new(TweetService::new(
                tweets.clone(),
                users.clone(),
                dispatcher.clone(),
            )),
            friendships: Arc::new(FriendshipService::new(graph.clone(), users.clone())),
            comment_service: Arc::new(CommentService::new(
                Arc::new(MemoryCommentStore::new()),
                tweets.clone(),
                users.clone(),
            )),
            like_service: Arc::new(LikeService::new(
                Arc::new(MemoryLikeStore::new()),
                tweets.clone(),
            )),
            directory,
            users,
            graph,
            tweets,
            newsfeed,
            registry,
            dispatcher,
            worker,
        }
    }

    pub async fn user(&self, name: &str) -> Uuid {
        self.directory
            .insert_user(name, &format!("{}@example.com", name))
            .await
            .expect("insert user")
            .id
    }

    pub async fn follow(&self, follower: Uuid, followee: Uuid) {
        self.graph
            .follow(follower, followee)
            .await
            .expect("follow");
    }

    pub async fn shutdown(self) {
        self.worker.shutdown().await;
    }
}
