//! Comments under tweets
//!
//! Anyone may read a tweet's comments; posting needs an identity and only
//! the author of a comment may edit or remove it. Lists are oldest first and
//! each distinct author is looked up once per list through the user cache.

use crate::db::{CommentStore, TweetStore};
use crate::error::{AppError, Result};
use crate::models::{AuthorSummary, Comment, CommentItem};
use crate::services::policy::{Action, COMMENTS};
use account_service::{AccountError, UserCache};
use chrono::{SubsecRound, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const MAX_COMMENT_CHARS: usize = 140;

pub struct CommentService {
    comments: Arc<dyn CommentStore>,
    tweets: Arc<dyn TweetStore>,
    users: Arc<UserCache>,
}

impl CommentService {
    pub fn new(
        comments: Arc<dyn CommentStore>,
        tweets: Arc<dyn TweetStore>,
        users: Arc<UserCache>,
    ) -> Self {
        Self {
            comments,
            tweets,
            users,
        }
    }

    /// Comments by unknown authors are left out
    pub async fn list_comments(
        &self,
        requester: Option<Uuid>,
        tweet_id: Uuid,
    ) -> Result<Vec<CommentItem>> {
        COMMENTS.check(Action::List, requester, None)?;
        let comments = self.comments.list_by_tweet(tweet_id).await?;

        let mut authors: HashMap<Uuid, Option<AuthorSummary>> = HashMap::new();
        for comment in &comments {
            if !authors.contains_key(&comment.author_id) {
                let author = self.author(comment.author_id).await?;
                authors.insert(comment.author_id, author);
            }
        }

        Ok(comments
            .into_iter()
            .filter_map(|comment| {
                let author = authors.get(&comment.author_id).cloned().flatten()?;
                Some(CommentItem { comment, author })
            })
            .collect())
    }

    pub async fn create_comment(
        &self,
        requester: Option<Uuid>,
        tweet_id: Uuid,
        content: &str,
    ) -> Result<CommentItem> {
        COMMENTS.check(Action::Create, requester, None)?;
        let author_id = requester.ok_or_else(|| AppError::Unauthorized("missing requester".into()))?;

        let content = validate_comment(content)?;
        if self.tweets.get(tweet_id).await?.is_none() {
            return Err(AppError::Validation(format!("tweet {} does not exist", tweet_id)));
        }
        let author = self
            .author(author_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", author_id)))?;

        let comment = Comment::new(tweet_id, author_id, content);
        self.comments.insert(&comment).await?;

        info!(comment_id = %comment.id, tweet_id = %tweet_id, author_id = %author_id, "Comment created");
        Ok(CommentItem { comment, author })
    }

    /// Only the content changes
    pub async fn update_comment(
        &self,
        requester: Option<Uuid>,
        comment_id: Uuid,
        content: &str,
    ) -> Result<CommentItem> {
        COMMENTS.check(Action::Update, requester, None)?;
        let comment = self.owned_comment(Action::Update, requester, comment_id).await?;

        let content = validate_comment(content)?;
        let updated = self
            .comments
            .update_content(comment.id, content, Utc::now().trunc_subsecs(6))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("comment {}", comment_id)))?;
        let author = self
            .author(updated.author_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", updated.author_id)))?;

        info!(comment_id = %comment_id, "Comment updated");
        Ok(CommentItem {
            comment: updated,
            author,
        })
    }

    pub async fn delete_comment(&self, requester: Option<Uuid>, comment_id: Uuid) -> Result<()> {
        COMMENTS.check(Action::Destroy, requester, None)?;
        let comment = self.owned_comment(Action::Destroy, requester, comment_id).await?;

        self.comments.delete(comment.id).await?;
        info!(comment_id = %comment_id, "Comment deleted");
        Ok(())
    }

    /// 404 before 403, as for tweets
    async fn owned_comment(
        &self,
        action: Action,
        requester: Option<Uuid>,
        comment_id: Uuid,
    ) -> Result<Comment> {
        let comment = self
            .comments
            .get(comment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("comment {}", comment_id)))?;
        COMMENTS.check(action, requester, Some(comment.author_id))?;
        Ok(comment)
    }

    async fn author(&self, user_id: Uuid) -> Result<Option<AuthorSummary>> {
        match self.users.get_user(user_id).await {
            Ok(user) => Ok(Some(AuthorSummary {
                id: user.id,
                username: user.username,
            })),
            Err(AccountError::NotFound(_)) => {
                debug!(user_id = %user_id, "Comment author not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_comment(content: &str) -> Result<&str> {
    let trimmed = content.trim();
    let chars = trimmed.chars().count();
    if chars == 0 || chars > MAX_COMMENT_CHARS {
        return Err(AppError::Validation(format!(
            "comment must be between 1 and {} characters",
            MAX_COMMENT_CHARS
        )));
    }
    Ok(trimmed)
}
