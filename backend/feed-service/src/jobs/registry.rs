//! Fan-out job registry
//!
//! Tracks every fan-out job by tweet id and enforces at most one active
//! attempt per tweet. An attempt is held through a [`JobLease`]; dropping a
//! lease without settling it marks the job failed so it can be retried.
//!
//! Completed jobs are forgotten once they are older than the retention
//! window; failed and partially failed jobs are kept for operators.

use crate::error::FanoutError;
use crate::models::{FanoutJob, FanoutReport, FanoutStatus, Tweet};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3_600);

#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<DashMap<Uuid, FanoutJob>>,
    retention: Duration,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            retention,
        }
    }

    /// Drop `Completed` jobs last updated before the retention window.
    /// Returns how many were removed.
    pub fn prune(&self) -> usize {
        let retention =
            chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::weeks(52));
        let cutoff = Utc::now() - retention;
        let mut removed = 0;
        self.jobs.retain(|_, job| {
            let expired = job.status == FanoutStatus::Completed && job.updated_at <= cutoff;
            if expired {
                removed += 1;
            }
            !expired
        });
        removed
    }

    /// Record a new job as `Pending`. A job that already exists keeps its
    /// state and history.
    pub fn register(&self, tweet: &Tweet) {
        self.jobs
            .entry(tweet.id)
            .or_insert_with(|| FanoutJob::new(tweet));
    }

    /// Move the job to `InProgress` and count the attempt.
    ///
    /// Fails with [`FanoutError::AlreadyRunning`] while another attempt for
    /// the same tweet is active.
    pub fn try_begin(&self, tweet: &Tweet) -> Result<JobLease, FanoutError> {
        let attempt = match self.jobs.entry(tweet.id) {
            Entry::Occupied(mut occupied) => {
                let job = occupied.get_mut();
                if job.status == FanoutStatus::InProgress {
                    return Err(FanoutError::AlreadyRunning(tweet.id));
                }
                job.status = FanoutStatus::InProgress;
                job.attempts += 1;
                job.updated_at = Utc::now();
                job.attempts
            }
            Entry::Vacant(vacant) => {
                let mut job = FanoutJob::new(tweet);
                job.status = FanoutStatus::InProgress;
                job.attempts = 1;
                vacant.insert(job);
                1
            }
        };

        Ok(JobLease {
            registry: self.clone(),
            tweet_id: tweet.id,
            attempt,
            settled: false,
        })
    }

    /// Mark a job that never got to run (e.g. the queue refused it)
    pub fn reject(&self, tweet_id: Uuid, error: &FanoutError) {
        if let Some(mut job) = self.jobs.get_mut(&tweet_id) {
            if job.status == FanoutStatus::Pending {
                job.status = FanoutStatus::Failed;
                job.last_error = Some(error.to_string());
                job.updated_at = Utc::now();
            }
        }
    }

    pub fn status(&self, tweet_id: Uuid) -> Option<FanoutJob> {
        self.jobs.get(&tweet_id).map(|job| job.clone())
    }

    /// Jobs with an attempt running right now
    pub fn active_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.status == FanoutStatus::InProgress)
            .count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn settle(&self, tweet_id: Uuid, update: impl FnOnce(&mut FanoutJob)) -> FanoutStatus {
        match self.jobs.get_mut(&tweet_id) {
            Some(mut job) => {
                update(job.value_mut());
                job.updated_at = Utc::now();
                job.status
            }
            None => FanoutStatus::Failed,
        }
    }
}

/// Exclusive right to run one attempt of one job
pub struct JobLease {
    registry: JobRegistry,
    tweet_id: Uuid,
    attempt: u32,
    settled: bool,
}

impl JobLease {
    pub fn tweet_id(&self) -> Uuid {
        self.tweet_id
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record the attempt's report; `Completed` if every owner was reached,
    /// `PartiallyFailed` otherwise.
    pub fn complete(mut self, report: &FanoutReport) -> FanoutStatus {
        self.settled = true;
        self.registry.settle(self.tweet_id, |job| {
            job.status = report.status();
            job.written += report.written as u64;
            job.already_present += report.already_present as u64;
            job.failed_owners = report.failed_owners.clone();
            job.last_error = if report.failed_owners.is_empty() {
                None
            } else {
                Some(format!("{} feed writes failed", report.failed_owners.len()))
            };
        })
    }

    /// The attempt did not run to the end. Failed owners from an earlier
    /// attempt are kept; the next attempt re-runs the whole job anyway.
    pub fn fail(mut self, error: &FanoutError) -> FanoutStatus {
        self.settled = true;
        let message = error.to_string();
        self.registry.settle(self.tweet_id, |job| {
            job.status = FanoutStatus::Failed;
            job.last_error = Some(message);
        })
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.settle(self.tweet_id, |job| {
                job.status = FanoutStatus::Failed;
                job.last_error = Some("attempt abandoned".to_string());
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tweet() -> Tweet {
        Tweet::new(Uuid::new_v4(), "registry test")
    }

    #[test]
    fn test_register_is_pending() {
        let registry = JobRegistry::new();
        let t = tweet();
        registry.register(&t);

        let job = registry.status(t.id).unwrap();
        assert_eq!(job.status, FanoutStatus::Pending);
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn test_second_begin_is_rejected_while_running() {
        let registry = JobRegistry::new();
        let t = tweet();

        let lease = registry.try_begin(&t).unwrap();
        assert!(matches!(
            registry.try_begin(&t),
            Err(FanoutError::AlreadyRunning(id)) if id == t.id
        ));
        assert_eq!(registry.active_count(), 1);

        lease.complete(&FanoutReport {
            tweet_id: t.id,
            targeted: 3,
            written: 3,
            ..Default::default()
        });
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.try_begin(&t).unwrap().attempt(), 2);
    }

    #[test]
    fn test_partial_then_complete_converges() {
        let registry = JobRegistry::new();
        let t = tweet();
        let failed = Uuid::new_v4();

        let status = registry.try_begin(&t).unwrap().complete(&FanoutReport {
            tweet_id: t.id,
            targeted: 4,
            written: 3,
            failed_owners: vec![failed],
            ..Default::default()
        });
        assert_eq!(status, FanoutStatus::PartiallyFailed);
        assert_eq!(registry.status(t.id).unwrap().failed_owners, vec![failed]);

        let status = registry.try_begin(&t).unwrap().complete(&FanoutReport {
            tweet_id: t.id,
            targeted: 1,
            written: 1,
            ..Default::default()
        });
        assert_eq!(status, FanoutStatus::Completed);

        let job = registry.status(t.id).unwrap();
        assert_eq!(job.written, 4);
        assert_eq!(job.attempts, 2);
        assert!(job.failed_owners.is_empty());
        assert!(job.last_error.is_none());
    }

    #[test]
    fn test_dropped_lease_marks_failed() {
        let registry = JobRegistry::new();
        let t = tweet();
        drop(registry.try_begin(&t).unwrap());

        let job = registry.status(t.id).unwrap();
        assert_eq!(job.status, FanoutStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("attempt abandoned"));
    }

    #[test]
    fn test_prune_forgets_only_settled_completed_jobs() {
        let registry = JobRegistry::with_retention(Duration::ZERO);
        let (done, failed, running, pending) = (tweet(), tweet(), tweet(), tweet());

        registry.try_begin(&done).unwrap().complete(&FanoutReport {
            tweet_id: done.id,
            targeted: 1,
            written: 1,
            ..Default::default()
        });
        registry
            .try_begin(&failed)
            .unwrap()
            .fail(&FanoutError::TweetStore("down".into()));
        let _lease = registry.try_begin(&running).unwrap();
        registry.register(&pending);

        assert_eq!(registry.prune(), 1);
        assert!(registry.status(done.id).is_none());
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.status(failed.id).unwrap().status,
            FanoutStatus::Failed
        );
    }

    #[test]
    fn test_prune_keeps_completed_jobs_inside_window() {
        let registry = JobRegistry::new();
        let t = tweet();
        registry.try_begin(&t).unwrap().complete(&FanoutReport {
            tweet_id: t.id,
            targeted: 1,
            written: 1,
            ..Default::default()
        });

        assert_eq!(registry.prune(), 0);
        assert!(registry.status(t.id).is_some());
    }
}
