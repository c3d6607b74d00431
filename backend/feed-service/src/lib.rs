pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
pub use jobs::{DispatcherWorker, FanoutDispatcher, JobRegistry};
pub use services::{
    CommentService, FriendshipService, LikeService, NewsFeedService, TweetService,
};
