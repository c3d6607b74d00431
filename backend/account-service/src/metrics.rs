//! User cache metrics

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

static CACHE_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "user_cache_requests_total",
        "User cache lookups by entity (user/profile) and result (hit/miss/error)",
        &["entity", "result"]
    )
    .expect("Failed to register user cache requests metric")
});

static CACHE_INVALIDATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "user_cache_invalidations_total",
        "User cache evictions by entity (user/profile/all)",
        &["entity"]
    )
    .expect("Failed to register user cache invalidations metric")
});

pub fn record_lookup(entity: &str, result: &str) {
    CACHE_REQUESTS_TOTAL
        .with_label_values(&[entity, result])
        .inc();
}

pub fn record_invalidation(entity: &str) {
    CACHE_INVALIDATIONS_TOTAL.with_label_values(&[entity]).inc();
}
