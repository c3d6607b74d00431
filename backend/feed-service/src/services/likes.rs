use crate::db::{LikeStore, TweetStore};
use crate::error::{AppError, Result};
use crate::models::LikeSummary;
use crate::services::policy::{Action, LIKES};
use chrono::{SubsecRound, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Tweet likes; liking twice counts once
pub struct LikeService {
    likes: Arc<dyn LikeStore>,
    tweets: Arc<dyn TweetStore>,
}

impl LikeService {
    pub fn new(likes: Arc<dyn LikeStore>, tweets: Arc<dyn TweetStore>) -> Self {
        Self { likes, tweets }
    }

    /// Returns the summary after the like, and whether it was new
    pub async fn like_tweet(
        &self,
        requester: Option<Uuid>,
        tweet_id: Uuid,
    ) -> Result<(LikeSummary, bool)> {
        LIKES.check(Action::Create, requester, None)?;
        let user_id = requester.ok_or_else(|| AppError::Unauthorized("missing requester".into()))?;
        self.ensure_tweet(tweet_id).await?;

        let created = self
            .likes
            .like(user_id, tweet_id, Utc::now().trunc_subsecs(6))
            .await?;
        info!(user_id = %user_id, tweet_id = %tweet_id, created, "Like");
        Ok((self.summary(Some(user_id), tweet_id).await?, created))
    }

    pub async fn unlike_tweet(&self, requester: Option<Uuid>, tweet_id: Uuid) -> Result<LikeSummary> {
        LIKES.check(Action::Destroy, requester, None)?;
        let user_id = requester.ok_or_else(|| AppError::Unauthorized("missing requester".into()))?;

        let removed = self.likes.unlike(user_id, tweet_id).await?;
        info!(user_id = %user_id, tweet_id = %tweet_id, removed, "Unlike");
        self.summary(Some(user_id), tweet_id).await
    }

    pub async fn like_summary(&self, requester: Option<Uuid>, tweet_id: Uuid) -> Result<LikeSummary> {
        LIKES.check(Action::Retrieve, requester, None)?;
        self.ensure_tweet(tweet_id).await?;
        self.summary(requester, tweet_id).await
    }

    async fn ensure_tweet(&self, tweet_id: Uuid) -> Result<()> {
        match self.tweets.get(tweet_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("tweet {}", tweet_id))),
        }
    }

    async fn summary(&self, requester: Option<Uuid>, tweet_id: Uuid) -> Result<LikeSummary> {
        let likes_count = self.likes.count(tweet_id).await?;
        let liked = match requester {
            Some(user_id) => self.likes.has_liked(user_id, tweet_id).await?,
            None => false,
        };
        Ok(LikeSummary {
            tweet_id,
            likes_count,
            liked,
        })
    }
}
