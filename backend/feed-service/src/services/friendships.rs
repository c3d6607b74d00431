use crate::db::FollowGraph;
use crate::error::{AppError, Result};
use crate::services::policy::{Action, FRIENDSHIPS};
use account_service::UserCache;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct FriendshipService {
    graph: Arc<dyn FollowGraph>,
    users: Arc<UserCache>,
}

impl FriendshipService {
    pub fn new(graph: Arc<dyn FollowGraph>, users: Arc<UserCache>) -> Self {
        Self { graph, users }
    }

    /// Idempotent; returns whether a new edge was created. Tweets posted
    /// before the follow never appear in the follower's feed.
    pub async fn follow(&self, requester: Option<Uuid>, followee_id: Uuid) -> Result<bool> {
        FRIENDSHIPS.check(Action::Create, requester, None)?;
        let follower_id = requester.ok_or_else(|| AppError::Unauthorized("missing requester".into()))?;

        self.users.get_user(followee_id).await?;
        let created = self.graph.follow(follower_id, followee_id).await?;

        info!(follower_id = %follower_id, followee_id = %followee_id, created, "Follow");
        Ok(created)
    }

    /// Idempotent; returns whether an edge was removed
    pub async fn unfollow(&self, requester: Option<Uuid>, followee_id: Uuid) -> Result<bool> {
        FRIENDSHIPS.check(Action::Destroy, requester, None)?;
        let follower_id = requester.ok_or_else(|| AppError::Unauthorized("missing requester".into()))?;

        if follower_id == followee_id {
            return Err(AppError::Validation("cannot unfollow yourself".into()));
        }
        let removed = self.graph.unfollow(follower_id, followee_id).await?;

        info!(follower_id = %follower_id, followee_id = %followee_id, removed, "Unfollow");
        Ok(removed)
    }
}
