//! Delivery statistics for a publisher or subscriber

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Lag samples kept for percentile estimation
const MAX_LAG_SAMPLES: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvalidationStats {
    pub published: u64,
    pub received: u64,
    pub failures: u64,
    /// Subscriptions re-established after dropping
    pub reconnects: u64,
    /// Publish-to-receive lag
    pub lag_p50_ms: f64,
    pub lag_p99_ms: f64,
}

/// Cheap to clone; clones share counters
#[derive(Clone, Default)]
pub struct StatsCollector {
    published: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    lags: Arc<Mutex<VecDeque<f64>>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lag(&self, lag_ms: f64) {
        if let Ok(mut lags) = self.lags.lock() {
            if lags.len() == MAX_LAG_SAMPLES {
                lags.pop_front();
            }
            lags.push_back(lag_ms);
        }
    }

    pub fn snapshot(&self) -> InvalidationStats {
        let (lag_p50_ms, lag_p99_ms) = match self.lags.lock() {
            Ok(lags) if !lags.is_empty() => {
                let mut sorted: Vec<f64> = lags.iter().copied().collect();
                sorted.sort_by(|a, b| a.total_cmp(b));
                (percentile(&sorted, 0.50), percentile(&sorted, 0.99))
            }
            _ => (0.0, 0.0),
        };

        InvalidationStats {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            lag_p50_ms,
            lag_p99_ms,
        }
    }
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    let idx = ((sorted.len() as f64) * q) as usize;
    sorted
        .get(idx.min(sorted.len().saturating_sub(1)))
        .copied()
        .unwrap_or(0.0)
}
