//! HTTP surface
//!
//! The requester is taken from the `X-User-Id` header, which the edge
//! gateway sets after authenticating the caller. A missing header means an
//! anonymous request; a malformed one is rejected.

pub mod comments;
pub mod fanout;
pub mod friendships;
pub mod likes;
pub mod newsfeeds;
pub mod tweets;

use crate::error::{AppError, Result};
use crate::jobs::JobRegistry;
use crate::services::{
    CommentService, FriendshipService, LikeService, NewsFeedService, TweetService,
};
use actix_web::{web, HttpRequest};
use std::sync::Arc;
use uuid::Uuid;

pub const REQUESTER_HEADER: &str = "X-User-Id";

/// Shared handler state
pub struct AppState {
    pub tweets: Arc<TweetService>,
    pub newsfeeds: Arc<NewsFeedService>,
    pub friendships: Arc<FriendshipService>,
    pub comments: Arc<CommentService>,
    pub likes: Arc<LikeService>,
    pub jobs: JobRegistry,
}

pub fn requester(req: &HttpRequest) -> Result<Option<Uuid>> {
    let Some(value) = req.headers().get(REQUESTER_HEADER) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| AppError::BadRequest(format!("{} is not valid ASCII", REQUESTER_HEADER)))?;
    Uuid::parse_str(raw.trim())
        .map(Some)
        .map_err(|_| AppError::BadRequest(format!("{} must be a UUID", REQUESTER_HEADER)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(tweets::create_tweet)
        .service(tweets::list_tweets)
        .service(tweets::get_tweet)
        .service(tweets::delete_tweet)
        .service(newsfeeds::list_newsfeed)
        .service(friendships::follow)
        .service(friendships::unfollow)
        .service(comments::list_comments)
        .service(comments::create_comment)
        .service(comments::update_comment)
        .service(comments::delete_comment)
        .service(likes::like_tweet)
        .service(likes::unlike_tweet)
        .service(likes::get_likes)
        .service(fanout::get_fanout_status);
}
