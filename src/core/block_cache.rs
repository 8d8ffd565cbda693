//! Ephemeral IP block list for the admission control service.
//!
//! The block cache is a shared deny-list of source IPs with per-entry expiry.
//! Reads lazily evict expired entries; writes unconditionally overwrite any
//! prior entry for the same IP. The in-memory backend is the single-node
//! default and does not survive a restart; the Redis backend is the injectable
//! option for horizontally scaled deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors that can occur during block-cache operations
#[derive(Error, Debug)]
pub enum BlockStoreError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// A deny-list entry for one source IP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEntry {
    /// Why the IP was blocked
    pub reason: String,
    /// When the entry stops applying
    pub expires_at: DateTime<Utc>,
    /// Alert that produced the entry, if any
    pub alert_id: Option<Uuid>,
}

impl BlockEntry {
    pub fn new(reason: impl Into<String>, ttl: std::time::Duration, alert_id: Option<Uuid>) -> Self {
        Self {
            reason: reason.into(),
            expires_at: Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64),
            alert_id,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Shared deny-list keyed by source IP
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Return the live entry for an IP. Expired entries are evicted on read
    /// and reported as absent.
    async fn get(&self, ip: &str) -> Result<Option<BlockEntry>, BlockStoreError>;

    /// Insert or overwrite the entry for an IP (last-writer-wins).
    async fn set(&self, ip: &str, entry: BlockEntry) -> Result<(), BlockStoreError>;

    /// Drop the entry for an IP, if present.
    async fn remove(&self, ip: &str) -> Result<(), BlockStoreError>;
}

/// In-process block cache for single-node deployments
#[derive(Default)]
pub struct InMemoryBlockStore {
    entries: RwLock<HashMap<String, BlockEntry>>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockStore for InMemoryBlockStore {
    async fn get(&self, ip: &str) -> Result<Option<BlockEntry>, BlockStoreError> {
        {
            let entries = self.entries.read().await;
            match entries.get(ip) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Lazy eviction of the expired entry seen above.
        let mut entries = self.entries.write().await;
        if entries.get(ip).map(|e| e.is_expired()).unwrap_or(false) {
            entries.remove(ip);
        }
        Ok(None)
    }

    async fn set(&self, ip: &str, entry: BlockEntry) -> Result<(), BlockStoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(ip.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, ip: &str) -> Result<(), BlockStoreError> {
        let mut entries = self.entries.write().await;
        entries.remove(ip);
        Ok(())
    }
}

/// Redis-backed block cache for scaled-out deployments
pub struct RedisBlockStore {
    redis: redis::Client,
}

impl RedisBlockStore {
    pub fn new(redis: redis::Client) -> Self {
        Self { redis }
    }

    fn key(ip: &str) -> String {
        format!("block:{}", ip)
    }
}

#[async_trait]
impl BlockStore for RedisBlockStore {
    async fn get(&self, ip: &str) -> Result<Option<BlockEntry>, BlockStoreError> {
        let mut conn = self.redis.get_async_connection().await?;
        let raw: Option<String> = conn.get(Self::key(ip)).await?;
        let entry: BlockEntry = match raw {
            Some(json) => serde_json::from_str(&json)?,
            None => return Ok(None),
        };
        if entry.is_expired() {
            // Key TTL normally handles this; guard against clock skew.
            let _: () = conn.del(Self::key(ip)).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, ip: &str, entry: BlockEntry) -> Result<(), BlockStoreError> {
        let mut conn = self.redis.get_async_connection().await?;
        let ttl = (entry.expires_at - Utc::now()).num_seconds().max(1) as usize;
        let json = serde_json::to_string(&entry)?;
        let _: () = conn.set_ex(Self::key(ip), json, ttl).await?;
        Ok(())
    }

    async fn remove(&self, ip: &str) -> Result<(), BlockStoreError> {
        let mut conn = self.redis.get_async_connection().await?;
        let _: () = conn.del(Self::key(ip)).await?;
        Ok(())
    }
}
