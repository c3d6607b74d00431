use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tweets are immutable once stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tweet {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Tweet {
    pub fn new(author_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_id,
            content: content.into(),
            // Postgres keeps microseconds; truncate so stored and in-memory
            // copies compare equal.
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    /// Feed ordering key: creation time in microseconds since the epoch
    pub fn ordering_key(&self) -> i64 {
        self.created_at.timestamp_micros()
    }
}

/// A reply under a tweet; only its content can change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub tweet_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(tweet_id: Uuid, author_id: Uuid, content: impl Into<String>) -> Self {
        let now = Utc::now().trunc_subsecs(6);
        Self {
            id: Uuid::new_v4(),
            tweet_id,
            author_id,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A comment with its author, as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentItem {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: AuthorSummary,
}

/// Like count of a tweet, plus whether the requester is among the likers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeSummary {
    pub tweet_id: Uuid,
    pub likes_count: u64,
    pub liked: bool,
}

/// One tweet in one user's materialized feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct FeedEntry {
    pub owner_id: Uuid,
    pub tweet_id: Uuid,
    pub ordering_key: i64,
}

impl FeedEntry {
    pub fn for_tweet(owner_id: Uuid, tweet: &Tweet) -> Self {
        Self {
            owner_id,
            tweet_id: tweet.id,
            ordering_key: tweet.ordering_key(),
        }
    }

    pub fn position(&self) -> FeedPosition {
        FeedPosition {
            ordering_key: self.ordering_key,
            tweet_id: self.tweet_id,
        }
    }
}

/// Sort position inside a feed; feeds read from the greatest position down.
/// Equal keys are broken by tweet id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeedPosition {
    pub ordering_key: i64,
    pub tweet_id: Uuid,
}

impl fmt::Display for FeedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ordering_key, self.tweet_id)
    }
}

impl FromStr for FeedPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, id) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid cursor {}", s))?;
        Ok(Self {
            ordering_key: key
                .parse()
                .map_err(|_| format!("invalid cursor key {}", key))?,
            tweet_id: Uuid::parse_str(id).map_err(|_| format!("invalid cursor tweet id {}", id))?,
        })
    }
}

/// Author fields shown next to a tweet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSummary {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub tweet: Tweet,
    pub author: AuthorSummary,
    pub cursor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FanoutStatus {
    Pending,
    InProgress,
    Completed,
    /// Some owners were not written; retrying converges to `Completed`
    PartiallyFailed,
    /// The follower snapshot could not be read; retried in full
    Failed,
}

impl FanoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanoutStatus::Pending => "pending",
            FanoutStatus::InProgress => "in_progress",
            FanoutStatus::Completed => "completed",
            FanoutStatus::PartiallyFailed => "partially_failed",
            FanoutStatus::Failed => "failed",
        }
    }
}

/// Bookkeeping for one tweet's fan-out across all attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutJob {
    pub tweet_id: Uuid,
    pub author_id: Uuid,
    pub status: FanoutStatus,
    pub attempts: u32,
    /// Entries newly written, summed over attempts
    pub written: u64,
    /// Entries found already present (repeat delivery)
    pub already_present: u64,
    /// Owners still missing the entry after the latest attempt
    pub failed_owners: Vec<Uuid>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FanoutJob {
    pub fn new(tweet: &Tweet) -> Self {
        let now = Utc::now();
        Self {
            tweet_id: tweet.id,
            author_id: tweet.author_id,
            status: FanoutStatus::Pending,
            attempts: 0,
            written: 0,
            already_present: 0,
            failed_owners: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of one fan-out attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub tweet_id: Uuid,
    /// Owners the attempt tried to reach, author included
    pub targeted: usize,
    pub written: usize,
    pub already_present: usize,
    pub failed_owners: Vec<Uuid>,
}

impl FanoutReport {
    pub fn status(&self) -> FanoutStatus {
        if self.failed_owners.is_empty() {
            FanoutStatus::Completed
        } else {
            FanoutStatus::PartiallyFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ordering_key_is_microseconds() {
        let mut tweet = Tweet::new(Uuid::new_v4(), "hello world");
        tweet.created_at = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(tweet.ordering_key(), 1_700_000_000_123_456);
    }

    #[test]
    fn test_cursor_parses_back() {
        let position = FeedPosition {
            ordering_key: 42,
            tweet_id: Uuid::new_v4(),
        };
        assert_eq!(position.to_string().parse::<FeedPosition>().unwrap(), position);
        assert!("garbage".parse::<FeedPosition>().is_err());
        assert!("12:not-a-uuid".parse::<FeedPosition>().is_err());
    }

    #[test]
    fn test_positions_order_by_key_then_tweet() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        let a = FeedPosition { ordering_key: 10, tweet_id: high };
        let b = FeedPosition { ordering_key: 11, tweet_id: low };
        let c = FeedPosition { ordering_key: 11, tweet_id: high };
        assert!(a < b && b < c);
    }

    #[test]
    fn test_report_status() {
        let mut report = FanoutReport::default();
        assert_eq!(report.status(), FanoutStatus::Completed);
        report.failed_owners.push(Uuid::new_v4());
        assert_eq!(report.status(), FanoutStatus::PartiallyFailed);
    }
}
