//! Service layer for feed-service

pub mod comments;
pub mod friendships;
pub mod likes;
pub mod newsfeed;
pub mod policy;
pub mod tweets;

pub use comments::CommentService;
pub use friendships::FriendshipService;
pub use likes::LikeService;
pub use newsfeed::NewsFeedService;
pub use tweets::TweetService;
