//! Account service: user directory, read-through user cache and the
//! listeners that keep that cache coherent with account mutations.

pub mod cache;
pub mod directory;
pub mod error;
pub mod listeners;
pub mod metrics;
pub mod models;
pub mod service;

pub use cache::{CacheStore, MemoryCacheStore, RedisCacheStore, UserCache};
pub use directory::{run_migrations, MemoryUserDirectory, PgUserDirectory, UserDirectory};
pub use error::{AccountError, Result};
pub use listeners::{CacheRegistry, InvalidationListener, USER_CACHE};
pub use models::{CachedProfile, CachedUser, ProfileChanges, User, UserChanges, UserProfile};
pub use service::AccountService;
