use anyhow::{bail, Context};
use resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub cache: CacheConfig,
    pub fanout: FanoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub invalidation_channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Per-process DashMap
    Memory,
    /// Shared Redis keyspace
    Redis,
}

impl FromStr for CacheBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "redis" => Ok(CacheBackend::Redis),
            other => bail!("unknown cache backend {:?} (expected memory or redis)", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub namespace: String,
}

/// Fan-out tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Followers read per snapshot page and written per batch insert
    pub batch_size: usize,
    /// Concurrent single-entry writes when a batch falls back
    pub write_concurrency: usize,
    pub max_concurrent_jobs: usize,
    pub write_timeout_ms: u64,
    /// Retries per write after the first attempt
    pub write_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Attempts per job, first run included
    pub max_job_attempts: u32,
    pub job_retry_delay_ms: u64,
    pub queue_capacity: usize,
    /// How long a completed job stays visible in the job registry
    pub job_retention_secs: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            write_concurrency: 16,
            max_concurrent_jobs: 8,
            write_timeout_ms: 2_000,
            write_retries: 2,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            max_job_attempts: 5,
            job_retry_delay_ms: 1_000,
            queue_capacity: 10_000,
            job_retention_secs: 3_600,
        }
    }
}

impl FanoutConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Retry policy for a single feed write
    pub fn write_retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.write_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..RetryConfig::default()
        }
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    /// Delay schedule between job attempts
    pub fn job_retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_job_attempts.saturating_sub(1),
            initial_backoff: Duration::from_millis(self.job_retry_delay_ms),
            max_backoff: Duration::from_millis(self.job_retry_delay_ms.saturating_mul(30)),
            jitter: false,
            ..RetryConfig::default()
        }
    }

    fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            batch_size: env_or("FANOUT_BATCH_SIZE", defaults.batch_size)?,
            write_concurrency: env_or("FANOUT_WRITE_CONCURRENCY", defaults.write_concurrency)?,
            max_concurrent_jobs: env_or("FANOUT_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?,
            write_timeout_ms: env_or("FANOUT_WRITE_TIMEOUT_MS", defaults.write_timeout_ms)?,
            write_retries: env_or("FANOUT_WRITE_RETRIES", defaults.write_retries)?,
            initial_backoff_ms: env_or("FANOUT_INITIAL_BACKOFF_MS", defaults.initial_backoff_ms)?,
            max_backoff_ms: env_or("FANOUT_MAX_BACKOFF_MS", defaults.max_backoff_ms)?,
            max_job_attempts: env_or("FANOUT_MAX_JOB_ATTEMPTS", defaults.max_job_attempts)?,
            job_retry_delay_ms: env_or("FANOUT_JOB_RETRY_DELAY_MS", defaults.job_retry_delay_ms)?,
            queue_capacity: env_or("FANOUT_QUEUE_CAPACITY", defaults.queue_capacity)?,
            job_retention_secs: env_or("FANOUT_JOB_RETENTION_SECS", defaults.job_retention_secs)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            bail!("FANOUT_BATCH_SIZE must be at least 1");
        }
        if self.write_concurrency == 0 {
            bail!("FANOUT_WRITE_CONCURRENCY must be at least 1");
        }
        if self.max_concurrent_jobs == 0 {
            bail!("FANOUT_MAX_CONCURRENT_JOBS must be at least 1");
        }
        if self.max_job_attempts == 0 {
            bail!("FANOUT_MAX_JOB_ATTEMPTS must be at least 1");
        }
        if self.queue_capacity == 0 {
            bail!("FANOUT_QUEUE_CAPACITY must be at least 1");
        }
        Ok(())
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("APP_PORT", 8000)?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 20)?,
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", 2)?,
                run_migrations: env_or("DATABASE_RUN_MIGRATIONS", true)?,
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
                invalidation_channel: std::env::var("INVALIDATION_CHANNEL")
                    .unwrap_or_else(|_| "cache:invalidate".to_string()),
            },
            cache: CacheConfig {
                backend: env_or("USER_CACHE_BACKEND", CacheBackend::Memory)?,
                namespace: std::env::var("USER_CACHE_NAMESPACE")
                    .unwrap_or_else(|_| "accounts".to_string()),
            },
            fanout: FanoutConfig::from_env()?,
        })
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const FANOUT_VARS: &[&str] = &[
        "FANOUT_BATCH_SIZE",
        "FANOUT_WRITE_RETRIES",
        "FANOUT_MAX_JOB_ATTEMPTS",
    ];

    fn clear_env() {
        for name in FANOUT_VARS {
            std::env::remove_var(name);
        }
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("USER_CACHE_BACKEND");
    }

    #[test]
    #[serial]
    fn test_fanout_defaults() {
        clear_env();
        let config = FanoutConfig::from_env().unwrap();
        assert_eq!(config, FanoutConfig::default());
    }

    #[test]
    #[serial]
    fn test_fanout_overrides() {
        clear_env();
        std::env::set_var("FANOUT_BATCH_SIZE", "50");
        std::env::set_var("FANOUT_WRITE_RETRIES", "0");
        let config = FanoutConfig::from_env().unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.write_retry().max_retries, 0);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_zero_batch_size_is_rejected() {
        clear_env();
        std::env::set_var("FANOUT_BATCH_SIZE", "0");
        assert!(FanoutConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_database_url_is_required() {
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    #[serial]
    fn test_cache_backend_parses() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/chirp");
        std::env::set_var("USER_CACHE_BACKEND", "Redis");
        let config = Config::from_env().unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        clear_env();
    }

    #[test]
    fn test_job_retry_schedule() {
        let config = FanoutConfig {
            max_job_attempts: 3,
            job_retry_delay_ms: 100,
            ..Default::default()
        };
        let retry = config.job_retry();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.backoff_for(1), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(200));
    }
}
