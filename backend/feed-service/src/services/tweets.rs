use crate::db::TweetStore;
use crate::error::{AppError, Result};
use crate::jobs::FanoutDispatcher;
use crate::models::Tweet;
use crate::services::policy::{Action, TWEETS};
use account_service::UserCache;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub const MIN_CONTENT_CHARS: usize = 6;
pub const MAX_CONTENT_CHARS: usize = 140;
pub const MAX_LIST_SIZE: usize = 200;

pub struct TweetService {
    tweets: Arc<dyn TweetStore>,
    users: Arc<UserCache>,
    dispatcher: FanoutDispatcher,
}

impl TweetService {
    pub fn new(
        tweets: Arc<dyn TweetStore>,
        users: Arc<UserCache>,
        dispatcher: FanoutDispatcher,
    ) -> Self {
        Self {
            tweets,
            users,
            dispatcher,
        }
    }

    /// Persist a tweet by `requester` and hand it to the fan-out dispatcher.
    ///
    /// Returns as soon as the tweet is stored; fan-out trouble never fails
    /// the call.
    pub async fn create_tweet(&self, requester: Option<Uuid>, content: &str) -> Result<Tweet> {
        TWEETS.check(Action::Create, requester, None)?;
        let author_id = requester.ok_or_else(|| AppError::Unauthorized("missing requester".into()))?;

        let content = validate_content(content)?;
        self.users.get_user(author_id).await?;

        let tweet = Tweet::new(author_id, content);
        self.tweets.insert(&tweet).await?;

        if let Err(e) = self.dispatcher.dispatch(tweet.clone()) {
            error!(tweet_id = %tweet.id, error = %e, "Failed to enqueue fan-out");
        }

        info!(tweet_id = %tweet.id, author_id = %author_id, "Tweet created");
        Ok(tweet)
    }

    pub async fn get_tweet(&self, requester: Option<Uuid>, tweet_id: Uuid) -> Result<Tweet> {
        let tweet = self
            .tweets
            .get(tweet_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tweet {}", tweet_id)))?;
        TWEETS.check(Action::Retrieve, requester, Some(tweet.author_id))?;
        Ok(tweet)
    }

    /// Newest first; listing is always scoped to one author
    pub async fn list_user_tweets(
        &self,
        requester: Option<Uuid>,
        user_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<Tweet>> {
        TWEETS.check(Action::List, requester, None)?;
        let limit = limit.unwrap_or(MAX_LIST_SIZE).clamp(1, MAX_LIST_SIZE);
        self.tweets.list_by_author(user_id, limit).await
    }

    /// Feed entries pointing at the tweet stay behind and are skipped on read
    pub async fn delete_tweet(&self, requester: Option<Uuid>, tweet_id: Uuid) -> Result<()> {
        let tweet = self.get_tweet(requester, tweet_id).await?;
        TWEETS.check(Action::Destroy, requester, Some(tweet.author_id))?;

        self.tweets.delete(tweet_id).await?;
        info!(tweet_id = %tweet_id, "Tweet deleted");
        Ok(())
    }
}

fn validate_content(content: &str) -> Result<&str> {
    let trimmed = content.trim();
    let chars = trimmed.chars().count();
    if chars < MIN_CONTENT_CHARS || chars > MAX_CONTENT_CHARS {
        return Err(AppError::Validation(format!(
            "content must be between {} and {} characters",
            MIN_CONTENT_CHARS, MAX_CONTENT_CHARS
        )));
    }
    Ok(trimmed)
}
