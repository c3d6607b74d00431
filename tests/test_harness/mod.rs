//! In-process Chirp environment
//!
//! Wires account-service and feed-service the way a single-node deployment
//! does: the account writer publishes invalidations on a local bus, the user
//! cache listens through the cache registry, and fan-out runs on the
//! background dispatcher.

use account_service::{
    AccountService, CacheRegistry, InvalidationListener, MemoryUserDirectory, User, UserCache,
    USER_CACHE,
};
use cache_invalidation::LocalInvalidationBus;
use feed_service::config::FanoutConfig;
use feed_service::db::{MemoryCommentStore, MemoryFeedStore, MemoryFollowGraph, MemoryTweetStore};
use feed_service::models::{FeedPage, Tweet};
use feed_service::{
    CommentService, DispatcherWorker, FanoutDispatcher, FriendshipService, JobRegistry,
    NewsFeedService, TweetService,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct TestEnvironment {
    pub accounts: AccountService,
    pub users: Arc<UserCache>,
    pub feeds: Arc<MemoryFeedStore>,
    pub tweets: TweetService,
    pub friendships: FriendshipService,
    pub comments: CommentService,
    pub newsfeed: Arc<NewsFeedService>,
    pub dispatcher: FanoutDispatcher,
    pub jobs: JobRegistry,
    worker: DispatcherWorker,
    listener: InvalidationListener,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(FanoutConfig {
            batch_size: 3,
            job_retry_delay_ms: 5,
            ..FanoutConfig::default()
        })
    }

    pub fn with_config(config: FanoutConfig) -> Self {
        let directory = Arc::new(MemoryUserDirectory::new());
        let bus = LocalInvalidationBus::new("account-service");

        let users = Arc::new(UserCache::in_memory(directory.clone()));
        let caches = CacheRegistry::new();
        caches.register(USER_CACHE, users.clone());
        let listener = InvalidationListener::attach_local(&bus, caches, USER_CACHE);

        let graph = Arc::new(MemoryFollowGraph::new());
        let feeds = Arc::new(MemoryFeedStore::new());
        let tweet_store = Arc::new(MemoryTweetStore::new());
        let newsfeed = Arc::new(NewsFeedService::new(
            graph.clone(),
            feeds.clone(),
            tweet_store.clone(),
            users.clone(),
            config,
        ));
        let jobs = JobRegistry::new();
        let (dispatcher, worker) = FanoutDispatcher::start(newsfeed.clone(), jobs.clone());

        Self {
            accounts: AccountService::new(directory, Arc::new(bus)),
            comments: CommentService::new(
                Arc::new(MemoryCommentStore::new()),
                tweet_store.clone(),
                users.clone(),
            ),
            tweets: TweetService::new(tweet_store, users.clone(), dispatcher.clone()),
            friendships: FriendshipService::new(graph, users.clone()),
            users,
            feeds,
            newsfeed,
            dispatcher,
            jobs,
            worker,
            listener,
        }
    }

    pub async fn user(&self, name: &str) -> User {
        self.accounts
            .create_user(name, &format!("{}@chirp.test", name))
            .await
            .expect("create user")
    }

    pub async fn follow(&self, follower: &User, followee: &User) {
        self.friendships
            .follow(Some(follower.id), followee.id)
            .await
            .expect("follow");
    }

    /// Post and wait until fan-out has settled
    pub async fn post(&self, author: &User, content: &str) -> Tweet {
        let tweet = self
            .tweets
            .create_tweet(Some(author.id), content)
            .await
            .expect("create tweet");
        self.dispatcher.wait_idle().await;
        tweet
    }

    pub async fn feed(&self, reader: &User) -> FeedPage {
        self.newsfeed
            .list_feed(reader.id, None, None)
            .await
            .expect("list feed")
    }

    pub async fn feed_ids(&self, reader: &User) -> Vec<Uuid> {
        self.feed(reader)
            .await
            .items
            .iter()
            .map(|item| item.tweet.id)
            .collect()
    }

    /// Give the invalidation listener time to apply published events
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    pub async fn cleanup(self) {
        self.worker.shutdown().await;
        self.listener.shutdown().await;
    }
}
