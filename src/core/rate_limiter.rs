//! Rate limiting implementation for the admission control service.
//!
//! Each credential is limited across three independently configured fixed
//! windows (minute, hour, day). A window's counter carries a TTL equal to the
//! window length and resets when the TTL lapses. Counters live behind the
//! [`CounterStore`] trait: an in-memory map for single-node deployments, or a
//! Redis INCR/EXPIRE backend for scaled-out ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::utils::{format_window_key, secs_until};

/// Errors that can occur talking to a counter backend
#[derive(Error, Debug)]
pub enum CounterError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
}

/// Errors that can occur during rate limiting
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("rate limit exceeded for the {window} window")]
    Exceeded {
        window: WindowKind,
        retry_after: u64,
        quota: RateQuota,
    },
    #[error("counter store error: {0}")]
    Store(#[from] CounterError),
}

/// The fixed windows a credential is limited over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Minute,
    Hour,
    Day,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Minute => "minute",
            WindowKind::Hour => "hour",
            WindowKind::Day => "day",
        }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One window in the check order
#[derive(Debug, Clone, Copy)]
pub struct WindowSpec {
    pub kind: WindowKind,
    pub length: Duration,
}

/// Per-credential points budget for each window
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitTier {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl RateLimitTier {
    pub fn limit_for(&self, kind: WindowKind) -> u32 {
        match kind {
            WindowKind::Minute => self.per_minute,
            WindowKind::Hour => self.per_hour,
            WindowKind::Day => self.per_day,
        }
    }
}

impl Default for RateLimitTier {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1_000,
            per_day: 10_000,
        }
    }
}

/// Counter value paired with its reset time
#[derive(Debug, Clone, Copy)]
pub struct WindowCount {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Quota snapshot for one window, surfaced in response headers
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateQuota {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateQuota {
    /// Reset time as Unix seconds, for the `X-RateLimit-Reset` header.
    pub fn reset_epoch(&self) -> i64 {
        self.reset_at.timestamp()
    }
}

/// Storage for fixed-window counters
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add one point to the window counter, creating it with the given TTL if
    /// absent or lapsed. Returns the post-increment count and reset time.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<WindowCount, CounterError>;

    /// Read a counter without consuming a point. Returns `None` when the
    /// counter is absent or its TTL has lapsed.
    async fn peek(&self, key: &str) -> Result<Option<WindowCount>, CounterError>;
}

/// In-process counter store for single-node deployments
#[derive(Default)]
pub struct InMemoryCounterStore {
    counters: RwLock<HashMap<String, WindowCount>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<WindowCount, CounterError> {
        let mut counters = self.counters.write().await;
        let now = Utc::now();
        let entry = counters.entry(key.to_string()).or_insert(WindowCount {
            count: 0,
            reset_at: now + chrono::Duration::seconds(ttl.as_secs() as i64),
        });
        if entry.reset_at <= now {
            entry.count = 0;
            entry.reset_at = now + chrono::Duration::seconds(ttl.as_secs() as i64);
        }
        entry.count += 1;
        Ok(*entry)
    }

    async fn peek(&self, key: &str) -> Result<Option<WindowCount>, CounterError> {
        let counters = self.counters.read().await;
        Ok(counters
            .get(key)
            .filter(|entry| entry.reset_at > Utc::now())
            .copied())
    }
}

/// Redis-backed counter store for scaled-out deployments
pub struct RedisCounterStore {
    redis: redis::Client,
}

impl RedisCounterStore {
    pub fn new(redis: redis::Client) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<WindowCount, CounterError> {
        let mut conn = self.redis.get_async_connection().await?;
        let count: u32 = conn.incr(key, 1).await?;
        let reset_at = if count == 1 {
            let _: () = conn.expire(key, ttl.as_secs() as usize).await?;
            Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64)
        } else {
            let remaining: i64 = conn.ttl(key).await?;
            Utc::now() + chrono::Duration::seconds(remaining.max(0))
        };
        Ok(WindowCount { count, reset_at })
    }

    async fn peek(&self, key: &str) -> Result<Option<WindowCount>, CounterError> {
        let mut conn = self.redis.get_async_connection().await?;
        let count: Option<u32> = conn.get(key).await?;
        match count {
            Some(count) => {
                let remaining: i64 = conn.ttl(key).await?;
                Ok(Some(WindowCount {
                    count,
                    reset_at: Utc::now() + chrono::Duration::seconds(remaining.max(0)),
                }))
            }
            None => Ok(None),
        }
    }
}

/// Multi-window rate limiter
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    windows: Vec<WindowSpec>,
}

impl RateLimiter {
    /// Create a limiter over the standard minute/hour/day windows.
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self::with_windows(
            counters,
            vec![
                WindowSpec { kind: WindowKind::Minute, length: Duration::from_secs(60) },
                WindowSpec { kind: WindowKind::Hour, length: Duration::from_secs(3_600) },
                WindowSpec { kind: WindowKind::Day, length: Duration::from_secs(86_400) },
            ],
        )
    }

    /// Create a limiter with custom window lengths. Window order is check
    /// order; keep narrower windows first so the narrowest violated window is
    /// the one reported.
    pub fn with_windows(counters: Arc<dyn CounterStore>, windows: Vec<WindowSpec>) -> Self {
        Self { counters, windows }
    }

    /// Check every window for `subject`, then consume one point from each.
    ///
    /// The first window found over budget short-circuits and is reported with
    /// a `retry_after` derived from its own reset time. On success the
    /// returned quota describes the last-checked window.
    ///
    /// Check-and-consume is not one atomic operation: concurrent requests for
    /// the same subject can both pass the check phase before either consumes,
    /// briefly over-admitting. The limiter is approximate, not exact.
    pub async fn check_and_consume(
        &self,
        subject: &str,
        tier: &RateLimitTier,
    ) -> Result<RateQuota, RateLimitError> {
        for spec in &self.windows {
            let limit = tier.limit_for(spec.kind);
            let key = format_window_key(subject, spec.kind.as_str());
            if let Some(current) = self.counters.peek(&key).await? {
                if current.count >= limit {
                    return Err(RateLimitError::Exceeded {
                        window: spec.kind,
                        retry_after: secs_until(current.reset_at).max(1),
                        quota: RateQuota {
                            limit,
                            remaining: 0,
                            reset_at: current.reset_at,
                        },
                    });
                }
            }
        }

        let mut quota = RateQuota {
            limit: 0,
            remaining: 0,
            reset_at: Utc::now(),
        };
        for spec in &self.windows {
            let limit = tier.limit_for(spec.kind);
            let key = format_window_key(subject, spec.kind.as_str());
            let counted = self.counters.increment(&key, spec.length).await?;
            quota = RateQuota {
                limit,
                remaining: limit.saturating_sub(counted.count),
                reset_at: counted.reset_at,
            };
        }
        Ok(quota)
    }
}
