//! News feed materialization
//!
//! `fanout_to_followers` copies a tweet into the feed of every follower of its
//! author (and the author's own feed) at write time. Reads then only touch the
//! reader's own partition of the feed store.
//!
//! Delivery rules:
//! - followers are read page by page from the follow graph; only follows made
//!   at or before the tweet's creation time count, however late the job runs
//! - each page is written as one batch insert; if the batch fails, the page
//!   is retried entry by entry so one bad owner cannot sink its neighbours
//! - every write is bounded by a timeout and retried with backoff
//! - inserts are idempotent, so whole-job and per-owner retries are safe

use crate::config::FanoutConfig;
use crate::db::{FeedStore, FollowGraph, TweetStore};
use crate::error::{AppError, FanoutError, FeedStoreError, Result};
use crate::metrics;
use crate::models::{AuthorSummary, FanoutReport, FeedEntry, FeedItem, FeedPage, FeedPosition, Tweet};
use account_service::{AccountError, UserCache};
use futures::stream::{self, StreamExt};
use resilience::{with_retry_if, with_timeout_result, RetryConfig, TimeoutError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Default)]
struct WriteOutcome {
    written: usize,
    already_present: usize,
    failed_owners: Vec<Uuid>,
}

impl WriteOutcome {
    fn into_report(self, tweet_id: Uuid, targeted: usize) -> FanoutReport {
        FanoutReport {
            tweet_id,
            targeted,
            written: self.written,
            already_present: self.already_present,
            failed_owners: self.failed_owners,
        }
    }
}

pub struct NewsFeedService {
    graph: Arc<dyn FollowGraph>,
    feeds: Arc<dyn FeedStore>,
    tweets: Arc<dyn TweetStore>,
    users: Arc<UserCache>,
    config: FanoutConfig,
    write_retry: RetryConfig,
    write_timeout: Duration,
}

impl NewsFeedService {
    pub fn new(
        graph: Arc<dyn FollowGraph>,
        feeds: Arc<dyn FeedStore>,
        tweets: Arc<dyn TweetStore>,
        users: Arc<UserCache>,
        config: FanoutConfig,
    ) -> Self {
        let write_retry = config.write_retry();
        let write_timeout = config.write_timeout();
        Self {
            graph,
            feeds,
            tweets,
            users,
            config,
            write_retry,
            write_timeout,
        }
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    /// Deliver `tweet` to its author and every user who followed the author
    /// when the tweet was created.
    ///
    /// Per-owner write failures are reported in the returned
    /// [`FanoutReport`], never raised. Errors mean the job did not get going:
    /// the tweet is gone, or the follower list could not be read (in which
    /// case the whole job is retriable).
    pub async fn fanout_to_followers(&self, tweet: &Tweet) -> std::result::Result<FanoutReport, FanoutError> {
        self.ensure_persisted(tweet).await?;

        let mut outcome = WriteOutcome::default();
        let author_entry = FeedEntry::for_tweet(tweet.author_id, tweet);
        self.write_batch(vec![author_entry], &mut outcome).await;
        let mut targeted = 1;

        let mut cursor = None;
        loop {
            let page = self
                .graph
                .follower_page(
                    tweet.author_id,
                    tweet.created_at,
                    cursor,
                    self.config.batch_size,
                )
                .await?;
            let Some(last) = page.last().copied() else {
                break;
            };
            cursor = Some(last);
            let full_page = page.len() == self.config.batch_size;

            let entries: Vec<FeedEntry> = page
                .into_iter()
                .filter(|owner| *owner != tweet.author_id)
                .map(|owner| FeedEntry::for_tweet(owner, tweet))
                .collect();
            targeted += entries.len();
            self.write_batch(entries, &mut outcome).await;

            if !full_page {
                break;
            }
        }

        self.prime_author(tweet.author_id).await;

        let report = outcome.into_report(tweet.id, targeted);
        info!(
            tweet_id = %tweet.id,
            author_id = %tweet.author_id,
            targeted = report.targeted,
            written = report.written,
            already_present = report.already_present,
            failed = report.failed_owners.len(),
            "Fan-out finished"
        );
        Ok(report)
    }

    /// Retry delivery of `tweet` to specific owners, typically the failed
    /// owners of an earlier attempt.
    pub async fn redeliver(
        &self,
        tweet: &Tweet,
        owners: &[Uuid],
    ) -> std::result::Result<FanoutReport, FanoutError> {
        self.ensure_persisted(tweet).await?;

        let mut outcome = WriteOutcome::default();
        for chunk in owners.chunks(self.config.batch_size.max(1)) {
            let entries = chunk
                .iter()
                .map(|owner| FeedEntry::for_tweet(*owner, tweet))
                .collect();
            self.write_batch(entries, &mut outcome).await;
        }

        let report = outcome.into_report(tweet.id, owners.len());
        info!(
            tweet_id = %tweet.id,
            targeted = report.targeted,
            written = report.written,
            failed = report.failed_owners.len(),
            "Redelivery finished"
        );
        Ok(report)
    }

    /// Reverse-chronological page of `user_id`'s feed, hydrated with tweets
    /// and authors. Entries whose tweet has since been deleted are skipped.
    pub async fn list_feed(
        &self,
        user_id: Uuid,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<FeedPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let before = cursor
            .filter(|c| !c.is_empty())
            .map(|c| c.parse::<FeedPosition>())
            .transpose()
            .map_err(AppError::BadRequest)?;

        let mut entries = self.feeds.list_feed(user_id, before, limit + 1).await?;
        let has_more = entries.len() > limit;
        entries.truncate(limit);

        let ids: Vec<Uuid> = entries.iter().map(|e| e.tweet_id).collect();
        let tweets: HashMap<Uuid, Tweet> = self
            .tweets
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        let mut items = Vec::with_capacity(entries.len());
        for entry in &entries {
            let Some(tweet) = tweets.get(&entry.tweet_id) else {
                debug!(tweet_id = %entry.tweet_id, "Skipping feed entry for deleted tweet");
                continue;
            };
            let author = match self.users.get_user(tweet.author_id).await {
                Ok(user) => AuthorSummary {
                    id: user.id,
                    username: user.username,
                },
                Err(AccountError::NotFound(_)) => {
                    debug!(author_id = %tweet.author_id, "Skipping tweet by unknown author");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            items.push(FeedItem {
                tweet: tweet.clone(),
                author,
                cursor: entry.position().to_string(),
            });
        }

        let next_cursor = if has_more {
            entries.last().map(|e| e.position().to_string())
        } else {
            None
        };

        Ok(FeedPage {
            items,
            next_cursor,
            has_more,
        })
    }

    async fn ensure_persisted(&self, tweet: &Tweet) -> std::result::Result<(), FanoutError> {
        match self.tweets.get(tweet.id).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(FanoutError::TweetNotPersisted(tweet.id)),
            Err(e) => Err(FanoutError::TweetStore(e.to_string())),
        }
    }

    /// Warm the author's cache entry; readers of the new entries will need it.
    async fn prime_author(&self, author_id: Uuid) {
        if let Err(e) = self.users.get_user(author_id).await {
            debug!(author_id = %author_id, error = %e, "Could not prime author cache entry");
        }
    }

    async fn write_batch(&self, entries: Vec<FeedEntry>, outcome: &mut WriteOutcome) {
        if entries.is_empty() {
            return;
        }

        let attempt = with_retry_if(&self.write_retry, is_retryable, || {
            with_timeout_result(self.write_timeout, self.feeds.insert_batch(&entries))
        })
        .await;

        match attempt {
            Ok(inserted) => {
                outcome.written += inserted;
                outcome.already_present += entries.len().saturating_sub(inserted);
                metrics::record_entries_written(inserted);
            }
            Err(e) => {
                warn!(
                    batch = entries.len(),
                    error = %e,
                    "Batch feed write failed, falling back to per-entry writes"
                );
                self.write_each(entries, outcome).await;
            }
        }
    }

    async fn write_each(&self, entries: Vec<FeedEntry>, outcome: &mut WriteOutcome) {
        let results: Vec<(Uuid, std::result::Result<bool, String>)> = stream::iter(entries)
            .map(|entry| async move {
                let result = with_retry_if(&self.write_retry, is_retryable, || {
                    with_timeout_result(self.write_timeout, self.feeds.insert_entry(&entry))
                })
                .await
                .map_err(|e| e.to_string());
                (entry.owner_id, result)
            })
            .buffer_unordered(self.config.write_concurrency.max(1))
            .collect()
            .await;

        let mut written = 0;
        for (owner_id, result) in results {
            match result {
                Ok(true) => written += 1,
                Ok(false) => outcome.already_present += 1,
                Err(error) => {
                    warn!(owner_id = %owner_id, error = %error, "Feed entry write failed");
                    outcome.failed_owners.push(owner_id);
                    metrics::record_write_failures(1);
                }
            }
        }
        outcome.written += written;
        metrics::record_entries_written(written);
    }
}

fn is_retryable(err: &TimeoutError<FeedStoreError>) -> bool {
    match err {
        TimeoutError::Elapsed(_) => true,
        TimeoutError::Inner(e) => e.is_transient(),
    }
}
