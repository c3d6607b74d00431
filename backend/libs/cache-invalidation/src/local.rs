//! In-process invalidation bus
//!
//! Same contract as the Redis transport for deployments where the writer and
//! the caches share a process, and for tests that need an isolated bus.

use crate::{
    dispatch, AccountEvent, InvalidationError, InvalidationMessage, InvalidationSink,
    InvalidationStats, Result, StatsCollector,
};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct LocalInvalidationBus {
    sender: broadcast::Sender<InvalidationMessage>,
    service_name: String,
    stats: StatsCollector,
}

impl LocalInvalidationBus {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self::with_capacity(service_name, DEFAULT_CAPACITY)
    }

    /// `capacity` is the number of messages a slow subscriber may fall behind
    /// before it is told to resync.
    pub fn with_capacity(service_name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            service_name: service_name.into(),
            stats: StatsCollector::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> InvalidationStats {
        self.stats.snapshot()
    }

    /// Subscribe and run `callback` for every message on a background task.
    ///
    /// The receiver is registered before this returns, so messages published
    /// afterwards are never missed. A subscriber that lags past the channel
    /// capacity receives a synthetic [`AccountEvent::Resync`] message instead
    /// of the dropped ones.
    pub fn subscribe<F, Fut>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(InvalidationMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();
        let callback = Arc::new(callback);
        let stats = self.stats.clone();
        let service_name = self.service_name.clone();

        info!(service = %service_name, "Subscribed to local invalidation bus");

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(msg) => dispatch(&stats, callback.as_ref(), msg).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Invalidation subscriber lagged, forcing resync");
                        let resync = AccountEvent::Resync.into_message(service_name.clone());
                        dispatch(&stats, callback.as_ref(), resync).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Local invalidation subscription ended");
        })
    }
}

#[async_trait]
impl InvalidationSink for LocalInvalidationBus {
    fn source(&self) -> &str {
        &self.service_name
    }

    async fn publish(&self, msg: InvalidationMessage) -> Result<usize> {
        debug!(
            message_id = %msg.message_id,
            entity_type = %msg.entity_type,
            action = ?msg.action,
            "Publishing local invalidation message"
        );
        match self.sender.send(msg) {
            Ok(receivers) => {
                self.stats.record_publish();
                Ok(receivers)
            }
            // Nobody is subscribed, so nobody holds a stale copy.
            Err(_) if self.sender.receiver_count() == 0 => {
                self.stats.record_publish();
                Ok(0)
            }
            Err(e) => {
                self.stats.record_failure();
                Err(InvalidationError::Closed(e.to_string()))
            }
        }
    }
}
