//! Account change notifications for cache coherence
//!
//! Carries "user record changed" / "profile record changed" notifications from
//! the service that mutates an account to every process holding a cached copy.
//!
//! # Architecture
//!
//! ```text
//! account-service (write path):
//!   1. UPDATE users SET ... WHERE id = $1
//!   2. sink.user_changed(id)
//!      PUBLISH cache:invalidate {"entity_type": "User", "entity_id": "<uuid>", ...}
//!      ↓
//! Redis Pub/Sub  (cluster)      or      LocalInvalidationBus  (single process / tests)
//!      ↓
//! every subscriber:
//!   3. decode message into AccountEvent::UserChanged { user_id }
//!   4. UserCache::invalidate_user(user_id)
//! ```
//!
//! Delivery is at-least-once and every consumer must be idempotent: evicting
//! an absent cache entry is a no-op.
//!
//! # Example: Publisher
//!
//! ```no_run
//! use cache_invalidation::{InvalidationPublisher, InvalidationSink};
//! use uuid::Uuid;
//!
//! # async fn run() -> Result<(), cache_invalidation::InvalidationError> {
//! let publisher =
//!     InvalidationPublisher::new("redis://localhost:6379", "account-service".to_string()).await?;
//! publisher.user_changed(Uuid::new_v4()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example: Subscriber
//!
//! ```no_run
//! use cache_invalidation::{AccountEvent, InvalidationSubscriber};
//!
//! # async fn run() -> Result<(), cache_invalidation::InvalidationError> {
//! let subscriber = InvalidationSubscriber::new("redis://localhost:6379").await?;
//! let handle = subscriber
//!     .subscribe(|msg| async move {
//!         for event in AccountEvent::from_message(&msg)? {
//!             tracing::info!(?event, "evicting");
//!         }
//!         Ok(())
//!     })
//!     .await?;
//! # handle.abort();
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

mod error;
pub mod helpers;
mod local;
mod stats;

pub use error::InvalidationError;
pub use helpers::build_cache_key;
pub use local::LocalInvalidationBus;
pub use stats::{InvalidationStats, StatsCollector};

pub type Result<T> = std::result::Result<T, InvalidationError>;

/// Cached entity kinds that can be invalidated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntityType {
    User,
    Profile,
    Tweet,
    Feed,
    Custom(String),
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::User => write!(f, "user"),
            EntityType::Profile => write!(f, "profile"),
            EntityType::Tweet => write!(f, "tweet"),
            EntityType::Feed => write!(f, "feed"),
            EntityType::Custom(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        match s {
            "user" => EntityType::User,
            "profile" => EntityType::Profile,
            "tweet" => EntityType::Tweet,
            "feed" => EntityType::Feed,
            custom => EntityType::Custom(custom.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum InvalidationAction {
    /// Entity mutated in place
    Update,
    /// Glob over cache keys; `*` evicts everything
    Pattern,
}

/// Wire format shared by every transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub message_id: String,
    pub entity_type: EntityType,
    pub entity_id: Option<String>,
    pub pattern: Option<String>,
    pub action: InvalidationAction,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub source_service: String,
}

impl InvalidationMessage {
    fn base(entity_type: EntityType, action: InvalidationAction, source_service: String) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            entity_type,
            entity_id: None,
            pattern: None,
            action,
            timestamp: chrono::Utc::now(),
            source_service,
        }
    }

    pub fn update(entity_type: EntityType, entity_id: String, source_service: String) -> Self {
        Self {
            entity_id: Some(entity_id),
            ..Self::base(entity_type, InvalidationAction::Update, source_service)
        }
    }

    pub fn pattern(pattern: String, source_service: String) -> Self {
        Self {
            pattern: Some(pattern),
            ..Self::base(
                EntityType::Custom("pattern".to_string()),
                InvalidationAction::Pattern,
                source_service,
            )
        }
    }

    /// Milliseconds between publication and now (0 if clocks disagree)
    pub fn lag_ms(&self) -> f64 {
        let lag = chrono::Utc::now() - self.timestamp;
        lag.num_microseconds()
            .map(|us| (us.max(0) as f64) / 1000.0)
            .unwrap_or(0.0)
    }
}

/// Account-level notification decoded from an [`InvalidationMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountEvent {
    UserChanged { user_id: Uuid },
    ProfileChanged { user_id: Uuid },
    /// The subscriber may have missed messages; every cached account is suspect
    Resync,
}

impl AccountEvent {
    pub fn into_message(self, source_service: String) -> InvalidationMessage {
        match self {
            AccountEvent::UserChanged { user_id } => {
                InvalidationMessage::update(EntityType::User, user_id.to_string(), source_service)
            }
            AccountEvent::ProfileChanged { user_id } => InvalidationMessage::update(
                EntityType::Profile,
                user_id.to_string(),
                source_service,
            ),
            AccountEvent::Resync => InvalidationMessage::pattern("*".to_string(), source_service),
        }
    }

    /// Decode the account events carried by a message.
    ///
    /// Messages about other entity kinds decode to an empty list. A malformed
    /// account id is an error so the subscriber can log it.
    pub fn from_message(msg: &InvalidationMessage) -> Result<Vec<AccountEvent>> {
        match msg.action {
            InvalidationAction::Update => {
                let Some(entity_id) = msg.entity_id.as_deref() else {
                    return Err(InvalidationError::InvalidMessage(format!(
                        "message {} has no entity_id",
                        msg.message_id
                    )));
                };
                Ok(Self::from_parts(&msg.entity_type, entity_id)?
                    .into_iter()
                    .collect())
            }
            InvalidationAction::Pattern => match msg.pattern.as_deref() {
                Some("*") | Some("user:*") | Some("profile:*") => Ok(vec![AccountEvent::Resync]),
                _ => Ok(Vec::new()),
            },
        }
    }

    fn from_parts(entity_type: &EntityType, entity_id: &str) -> Result<Option<AccountEvent>> {
        let parse = |id: &str| {
            Uuid::parse_str(id).map_err(|e| {
                InvalidationError::InvalidMessage(format!("invalid account id {}: {}", id, e))
            })
        };
        match entity_type {
            EntityType::User => Ok(Some(AccountEvent::UserChanged {
                user_id: parse(entity_id)?,
            })),
            EntityType::Profile => Ok(Some(AccountEvent::ProfileChanged {
                user_id: parse(entity_id)?,
            })),
            _ => Ok(None),
        }
    }
}

/// Anything that can broadcast invalidation messages
#[async_trait]
pub trait InvalidationSink: Send + Sync {
    /// Name stamped into `source_service`
    fn source(&self) -> &str;

    /// Returns the number of subscribers that received the message
    async fn publish(&self, msg: InvalidationMessage) -> Result<usize>;

    async fn user_changed(&self, user_id: Uuid) -> Result<usize> {
        let msg = AccountEvent::UserChanged { user_id }.into_message(self.source().to_string());
        self.publish(msg).await
    }

    async fn profile_changed(&self, user_id: Uuid) -> Result<usize> {
        let msg = AccountEvent::ProfileChanged { user_id }.into_message(self.source().to_string());
        self.publish(msg).await
    }
}

/// Redis pub/sub publisher
#[derive(Clone)]
pub struct InvalidationPublisher {
    client: ConnectionManager,
    channel: String,
    service_name: String,
    stats: StatsCollector,
}

impl InvalidationPublisher {
    pub const DEFAULT_CHANNEL: &'static str = "cache:invalidate";

    pub async fn new(redis_url: &str, service_name: String) -> Result<Self> {
        Self::with_channel(redis_url, service_name, Self::DEFAULT_CHANNEL.to_string()).await
    }

    pub async fn with_channel(
        redis_url: &str,
        service_name: String,
        channel: String,
    ) -> Result<Self> {
        if channel.is_empty() {
            return Err(InvalidationError::Configuration(
                "invalidation channel must not be empty".to_string(),
            ));
        }
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            client: connection,
            channel,
            service_name,
            stats: StatsCollector::new(),
        })
    }

    pub fn stats(&self) -> InvalidationStats {
        self.stats.snapshot()
    }
}

#[async_trait]
impl InvalidationSink for InvalidationPublisher {
    fn source(&self) -> &str {
        &self.service_name
    }

    async fn publish(&self, msg: InvalidationMessage) -> Result<usize> {
        let payload = serde_json::to_string(&msg)?;

        debug!(
            message_id = %msg.message_id,
            entity_type = %msg.entity_type,
            action = ?msg.action,
            channel = %self.channel,
            "Publishing invalidation message"
        );

        let mut conn = self.client.clone();
        let subscriber_count: usize = match conn.publish(&self.channel, payload).await {
            Ok(count) => count,
            Err(e) => {
                self.stats.record_failure();
                return Err(e.into());
            }
        };
        self.stats.record_publish();

        info!(
            message_id = %msg.message_id,
            subscribers = subscriber_count,
            "Invalidation message published"
        );

        Ok(subscriber_count)
    }
}

/// Raw payloads of one live subscription
pub(crate) type PayloadStream = BoxStream<'static, Result<String>>;

/// Redis pub/sub subscriber
///
/// A dropped subscription is re-established with backoff for as long as the
/// subscriber runs. Messages published while disconnected are lost, so every
/// reconnect is followed by a synthetic [`AccountEvent::Resync`].
pub struct InvalidationSubscriber {
    client: Client,
    channel: String,
    reconnect: RetryConfig,
    stats: StatsCollector,
}

impl InvalidationSubscriber {
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_channel(redis_url, InvalidationPublisher::DEFAULT_CHANNEL.to_string()).await
    }

    pub async fn with_channel(redis_url: &str, channel: String) -> Result<Self> {
        let client = Client::open(redis_url)?;

        Ok(Self {
            client,
            channel,
            reconnect: Self::default_reconnect(),
            stats: StatsCollector::new(),
        })
    }

    fn default_reconnect() -> RetryConfig {
        RetryConfig {
            max_retries: u32::MAX,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            ..RetryConfig::default()
        }
    }

    /// Backoff schedule between resubscribe attempts
    pub fn with_reconnect(mut self, reconnect: RetryConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn stats(&self) -> InvalidationStats {
        self.stats.snapshot()
    }

    /// Subscribe and run `callback` for every message on a background task.
    ///
    /// Fails if the first subscription cannot be made. After that the task
    /// keeps itself subscribed. Callback failures are logged and counted.
    pub async fn subscribe<F, Fut>(&self, callback: F) -> Result<JoinHandle<()>>
    where
        F: Fn(InvalidationMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let stream = open_stream(self.client.clone(), self.channel.clone()).await?;
        info!(channel = %self.channel, "Subscribed to invalidation events");

        let (client, channel) = (self.client.clone(), self.channel.clone());
        let connect = move || open_stream(client.clone(), channel.clone());

        Ok(tokio::spawn(run_subscription(
            stream,
            connect,
            self.reconnect.clone(),
            self.stats.clone(),
            Arc::new(callback),
        )))
    }
}

async fn open_stream(client: Client, channel: String) -> Result<PayloadStream> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(&channel).await?;
    Ok(pubsub
        .into_on_message()
        .map(|msg| msg.get_payload::<String>().map_err(InvalidationError::from))
        .boxed())
}

/// Consume `stream` until it ends, then resubscribe through `connect` and
/// carry on. Only returns if the task is aborted.
pub(crate) async fn run_subscription<C, CFut, F, Fut>(
    mut stream: PayloadStream,
    mut connect: C,
    reconnect: RetryConfig,
    stats: StatsCollector,
    callback: Arc<F>,
) where
    C: FnMut() -> CFut,
    CFut: Future<Output = Result<PayloadStream>>,
    F: Fn(InvalidationMessage) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        while let Some(next) = stream.next().await {
            let payload = match next {
                Ok(p) => p,
                Err(e) => {
                    stats.record_failure();
                    error!(error = %e, "Failed to get message payload");
                    continue;
                }
            };

            let invalidation_msg: InvalidationMessage = match serde_json::from_str(&payload) {
                Ok(m) => m,
                Err(e) => {
                    stats.record_failure();
                    error!(error = ?e, payload = %payload, "Failed to deserialize message");
                    continue;
                }
            };

            dispatch(&stats, callback.as_ref(), invalidation_msg).await;
        }

        warn!("Invalidation subscription ended, reconnecting");
        let mut attempt: u32 = 0;
        stream = loop {
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(reconnect.backoff_for(attempt)).await;
            match connect().await {
                Ok(stream) => break stream,
                Err(e) => {
                    stats.record_failure();
                    warn!(attempt, error = %e, "Invalidation resubscribe failed");
                }
            }
        };
        stats.record_reconnect();
        info!(attempt, "Invalidation subscription restored, resyncing");

        let resync = AccountEvent::Resync.into_message("invalidation-subscriber".to_string());
        dispatch(&stats, callback.as_ref(), resync).await;
    }
}

/// Run one callback invocation with bookkeeping shared by both transports
pub(crate) async fn dispatch<F, Fut>(stats: &StatsCollector, callback: &F, msg: InvalidationMessage)
where
    F: Fn(InvalidationMessage) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    stats.record_receive();
    stats.record_lag(msg.lag_ms());

    debug!(
        message_id = %msg.message_id,
        entity_type = %msg.entity_type,
        action = ?msg.action,
        "Received invalidation message"
    );

    let message_id = msg.message_id.clone();
    if let Err(e) = callback(msg).await {
        stats.record_failure();
        error!(
            error = %e,
            message_id = %message_id,
            "Invalidation callback failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_display_round_trips_through_from() {
        for entity in [EntityType::User, EntityType::Profile, EntityType::Tweet] {
            assert_eq!(EntityType::from(entity.to_string().as_str()), entity);
        }
        assert_eq!(
            EntityType::from("comment"),
            EntityType::Custom("comment".into())
        );
    }

    #[test]
    fn test_user_changed_decodes_back() {
        let user_id = Uuid::new_v4();
        let msg = AccountEvent::UserChanged { user_id }.into_message("account-service".into());

        assert_eq!(msg.entity_type, EntityType::User);
        assert_eq!(msg.action, InvalidationAction::Update);
        assert_eq!(
            AccountEvent::from_message(&msg).unwrap(),
            vec![AccountEvent::UserChanged { user_id }]
        );
    }

    #[test]
    fn test_profile_changed_survives_json() {
        let user_id = Uuid::new_v4();
        let msg = AccountEvent::ProfileChanged { user_id }.into_message("account-service".into());

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: InvalidationMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.message_id, msg.message_id);
        assert_eq!(
            AccountEvent::from_message(&decoded).unwrap(),
            vec![AccountEvent::ProfileChanged { user_id }]
        );
    }

    #[test]
    fn test_wildcard_pattern_means_resync() {
        let msg = InvalidationMessage::pattern("*".into(), "test".into());
        assert_eq!(
            AccountEvent::from_message(&msg).unwrap(),
            vec![AccountEvent::Resync]
        );

        let msg = InvalidationMessage::pattern("feed:*".into(), "test".into());
        assert!(AccountEvent::from_message(&msg).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_account_id_is_rejected() {
        let msg = InvalidationMessage::update(EntityType::User, "not-a-uuid".into(), "t".into());
        assert!(matches!(
            AccountEvent::from_message(&msg),
            Err(InvalidationError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_update_without_id_is_rejected() {
        let mut msg = InvalidationMessage::update(EntityType::User, "x".into(), "t".into());
        msg.entity_id = None;
        assert!(AccountEvent::from_message(&msg).is_err());
    }

    fn payloads(events: &[AccountEvent]) -> Vec<Result<String>> {
        events
            .iter()
            .map(|e| serde_json::to_string(&e.into_message("test".into())).map_err(Into::into))
            .collect()
    }

    #[tokio::test]
    async fn test_dropped_subscription_reconnects_and_resyncs() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let first = futures_util::stream::iter(payloads(&[AccountEvent::UserChanged { user_id: a }]))
            .boxed();

        // One failed resubscribe, then a stream that stays open
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let connect = {
            let attempts = Arc::clone(&attempts);
            move || {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if n == 0 {
                        return Err(InvalidationError::Closed("redis restarting".into()));
                    }
                    let events = payloads(&[AccountEvent::ProfileChanged { user_id: b }]);
                    Ok(futures_util::stream::iter(events)
                        .chain(futures_util::stream::pending())
                        .boxed())
                }
            }
        };

        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let callback = move |msg: InvalidationMessage| {
            let sink = Arc::clone(&sink);
            async move {
                let events = AccountEvent::from_message(&msg)?;
                if let Ok(mut seen) = sink.lock() {
                    seen.extend(events);
                }
                Ok::<(), InvalidationError>(())
            }
        };

        let stats = StatsCollector::new();
        let reconnect = RetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            jitter: false,
            ..RetryConfig::default()
        };
        let handle = tokio::spawn(run_subscription(
            first,
            connect,
            reconnect,
            stats.clone(),
            Arc::new(callback),
        ));

        for _ in 0..200 {
            if received.lock().unwrap().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();

        assert_eq!(
            *received.lock().unwrap(),
            vec![
                AccountEvent::UserChanged { user_id: a },
                AccountEvent::Resync,
                AccountEvent::ProfileChanged { user_id: b },
            ]
        );
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.reconnects, 1);
        assert_eq!(snapshot.failures, 1);
    }
}
