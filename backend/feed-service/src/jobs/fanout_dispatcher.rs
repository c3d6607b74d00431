//! Fan-out Dispatcher Background Job
//!
//! Tweet creation enqueues a fan-out job and returns immediately. The worker
//! drains the bounded queue, runs up to `max_concurrent_jobs` jobs at once and
//! retries jobs that did not converge:
//!
//! - `PARTIALLY_FAILED` → redeliver to the failed owners only
//! - `FAILED` (follower snapshot unavailable) → rerun the whole job
//!
//! Attempts are spaced by the job retry backoff and capped at
//! `max_job_attempts`. Shutdown stops intake, finishes queued and running
//! jobs, then returns. The worker also prunes old completed jobs from the
//! registry once a minute.

use crate::error::FanoutError;
use crate::jobs::registry::JobRegistry;
use crate::metrics;
use crate::models::{FanoutStatus, Tweet};
use crate::services::NewsFeedService;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Tracker {
    /// Jobs accepted and not yet finished, retries included
    in_flight: AtomicUsize,
    queued: AtomicUsize,
    idle: Notify,
}

impl Tracker {
    fn enter(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

struct InFlightGuard(Arc<Tracker>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.leave();
    }
}

struct JobContext {
    newsfeed: Arc<NewsFeedService>,
    registry: JobRegistry,
    permits: Arc<Semaphore>,
    tracker: Arc<Tracker>,
}

/// Cheap, cloneable handle used to enqueue fan-out jobs
#[derive(Clone)]
pub struct FanoutDispatcher {
    sender: mpsc::Sender<Tweet>,
    registry: JobRegistry,
    tracker: Arc<Tracker>,
}

/// Owns the worker task. Dropping it stops the worker after the queue drains.
#[must_use = "dropping the worker shuts the dispatcher down"]
pub struct DispatcherWorker {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl DispatcherWorker {
    /// Stop accepting jobs and wait for queued and running jobs to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            error!(error = %e, "Fan-out dispatcher worker panicked");
        }
    }
}

impl FanoutDispatcher {
    pub fn start(newsfeed: Arc<NewsFeedService>, registry: JobRegistry) -> (Self, DispatcherWorker) {
        let config = newsfeed.config().clone();
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let tracker = Arc::new(Tracker::default());

        let ctx = Arc::new(JobContext {
            newsfeed,
            registry: registry.clone(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            tracker: Arc::clone(&tracker),
        });

        info!(
            queue_capacity = config.queue_capacity,
            max_concurrent_jobs = config.max_concurrent_jobs,
            batch_size = config.batch_size,
            "Starting fan-out dispatcher"
        );
        let handle = tokio::spawn(run(receiver, shutdown_rx, ctx));

        (
            Self {
                sender,
                registry,
                tracker,
            },
            DispatcherWorker {
                handle,
                shutdown: shutdown_tx,
            },
        )
    }

    /// Enqueue a fan-out job for a persisted tweet. Never waits: when the
    /// queue is full the job is parked on a task that waits for room, so an
    /// accepted job is always run eventually.
    ///
    /// Fails only once the dispatcher has shut down.
    pub fn dispatch(&self, tweet: Tweet) -> Result<(), FanoutError> {
        let tweet_id = tweet.id;
        self.registry.register(&tweet);
        self.tracker.enter();
        let depth = self.tracker.queued.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_queue_depth(depth);

        match self.sender.try_send(tweet) {
            Ok(()) => {
                debug!(tweet_id = %tweet_id, depth, "Fan-out job queued");
                Ok(())
            }
            Err(TrySendError::Full(tweet)) => {
                metrics::record_queue_overflow();
                warn!(tweet_id = %tweet_id, depth, "Fan-out queue full, waiting for room");
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    if dispatcher.sender.send(tweet).await.is_err() {
                        dispatcher.refuse(tweet_id, &FanoutError::QueueClosed);
                    }
                });
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                let err = FanoutError::QueueClosed;
                self.refuse(tweet_id, &err);
                Err(err)
            }
        }
    }

    /// Undo the bookkeeping of a job the worker will never see
    fn refuse(&self, tweet_id: Uuid, err: &FanoutError) {
        let depth = self.tracker.queued.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_queue_depth(depth);
        self.registry.reject(tweet_id, err);
        metrics::record_job(FanoutStatus::Failed.as_str());
        warn!(tweet_id = %tweet_id, error = %err, "Fan-out job refused");
        self.tracker.leave();
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Jobs accepted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once no job is queued, running or waiting to retry
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.tracker.idle.notified();
            if self.tracker.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn run(
    mut receiver: mpsc::Receiver<Tweet>,
    mut shutdown: oneshot::Receiver<()>,
    ctx: Arc<JobContext>,
) {
    let mut tasks = JoinSet::new();
    let mut draining = false;
    let mut prune = tokio::time::interval(PRUNE_INTERVAL);
    prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = prune.tick() => {
                let removed = ctx.registry.prune();
                if removed > 0 {
                    debug!(removed, remaining = ctx.registry.len(), "Pruned completed fan-out jobs");
                }
            }
            _ = &mut shutdown, if !draining => {
                info!("Fan-out dispatcher draining queue");
                draining = true;
                receiver.close();
            }
            next = receiver.recv() => {
                let Some(tweet) = next else { break };
                let depth = ctx.tracker.queued.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
                metrics::set_queue_depth(depth);

                let permit = match Arc::clone(&ctx.permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                tasks.spawn(run_job(Arc::clone(&ctx), tweet, permit));
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Fan-out task panicked");
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Fan-out task panicked");
        }
    }
    info!("Fan-out dispatcher stopped");
}

async fn run_job(ctx: Arc<JobContext>, tweet: Tweet, first_permit: OwnedSemaphorePermit) {
    let _in_flight = InFlightGuard(Arc::clone(&ctx.tracker));
    let config = ctx.newsfeed.config();
    let backoff = config.job_retry();
    let max_attempts = config.max_job_attempts.max(1);

    let mut permit = Some(first_permit);
    let mut pending_owners: Option<Vec<Uuid>> = None;

    for attempt in 1..=max_attempts {
        let held = match permit.take() {
            Some(permit) => permit,
            None => match Arc::clone(&ctx.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let lease = match ctx.registry.try_begin(&tweet) {
            Ok(lease) => lease,
            Err(e) => {
                debug!(tweet_id = %tweet.id, error = %e, "Skipping fan-out attempt");
                return;
            }
        };

        let started = Instant::now();
        let result = match pending_owners.as_deref() {
            None => ctx.newsfeed.fanout_to_followers(&tweet).await,
            Some(owners) => ctx.newsfeed.redeliver(&tweet, owners).await,
        };
        metrics::observe_job_duration(started.elapsed());

        pending_owners = match result {
            Ok(report) => {
                let status = lease.complete(&report);
                metrics::record_job(status.as_str());
                if status == FanoutStatus::Completed {
                    return;
                }
                warn!(
                    tweet_id = %tweet.id,
                    attempt,
                    failed = report.failed_owners.len(),
                    "Fan-out partially failed"
                );
                Some(report.failed_owners)
            }
            Err(e) => {
                let status = lease.fail(&e);
                metrics::record_job(status.as_str());
                if !e.is_retriable() {
                    warn!(tweet_id = %tweet.id, error = %e, "Fan-out abandoned");
                    return;
                }
                warn!(tweet_id = %tweet.id, attempt, error = %e, "Fan-out attempt failed");
                None
            }
        };

        if attempt < max_attempts {
            drop(held);
            tokio::time::sleep(backoff.backoff_for(attempt)).await;
        }
    }

    error!(
        tweet_id = %tweet.id,
        attempts = max_attempts,
        "Fan-out gave up; job left for manual retry"
    );
}
