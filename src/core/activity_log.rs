//! Request outcome logging for the admission control service.
//!
//! Every gated request produces one append-only [`RequestOutcome`] record.
//! Appends are best-effort and must never propagate back into the request
//! path; callers go through [`spawn_append`], which detaches the write and
//! swallows failures. The read side feeds the anomaly detector. Durable
//! storage, indexing, and retention belong to an external collaborator; the
//! in-memory ring provided here covers single-node deployments and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors surfaced by activity log implementations
#[derive(Error, Debug)]
pub enum ActivityLogError {
    #[error("activity log unavailable: {0}")]
    Unavailable(String),
}

/// One gated request's outcome. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub timestamp: DateTime<Utc>,
    pub credential_id: Option<Uuid>,
    pub source_ip: String,
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    pub latency_ms: u64,
    pub blocked: bool,
    pub block_reason: Option<String>,
}

/// Append-only sink of request outcomes
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Record an outcome. Best-effort; callers must not fail a response on an
    /// append error.
    async fn append(&self, outcome: RequestOutcome) -> Result<(), ActivityLogError>;

    /// Outcomes whose timestamp falls within the trailing window.
    async fn recent(&self, window: Duration) -> Result<Vec<RequestOutcome>, ActivityLogError>;
}

/// Detach an append from the request path, swallowing any error.
pub fn spawn_append(log: Arc<dyn ActivityLog>, outcome: RequestOutcome) {
    tokio::spawn(async move {
        if let Err(e) = log.append(outcome).await {
            debug!("request outcome append failed (ignored): {}", e);
        }
    });
}

/// Bounded in-memory outcome ring
pub struct InMemoryActivityLog {
    entries: RwLock<VecDeque<RequestOutcome>>,
    retention: Duration,
    capacity: usize,
}

impl InMemoryActivityLog {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            retention,
            capacity,
        }
    }
}

impl Default for InMemoryActivityLog {
    fn default() -> Self {
        // Enough history for the detector's 5-minute window with headroom.
        Self::new(Duration::from_secs(900), 100_000)
    }
}

#[async_trait]
impl ActivityLog for InMemoryActivityLog {
    async fn append(&self, outcome: RequestOutcome) -> Result<(), ActivityLogError> {
        let mut entries = self.entries.write().await;
        entries.push_back(outcome);

        let cutoff = Utc::now() - chrono::Duration::seconds(self.retention.as_secs() as i64);
        while let Some(front) = entries.front() {
            if front.timestamp < cutoff || entries.len() > self.capacity {
                entries.pop_front();
            } else {
                break;
            }
        }
        Ok(())
    }

    async fn recent(&self, window: Duration) -> Result<Vec<RequestOutcome>, ActivityLogError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(window.as_secs() as i64);
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|outcome| outcome.timestamp >= cutoff)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
pub(crate) fn outcome(source_ip: &str, endpoint: &str, status: u16) -> RequestOutcome {
    RequestOutcome {
        timestamp: Utc::now(),
        credential_id: None,
        source_ip: source_ip.to_string(),
        endpoint: endpoint.to_string(),
        method: "GET".to_string(),
        status,
        latency_ms: 5,
        blocked: false,
        block_reason: None,
    }
}
