//! Credential model and store interface for the admission control service.
//!
//! A credential is an issued API key record carrying permissions, a rate-limit
//! tier, and IP/domain scoping rules. The store that holds issued credentials
//! is an external collaborator consumed through the [`CredentialStore`] trait;
//! an in-memory implementation is provided for single-node deployments and
//! tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::rate_limiter::RateLimitTier;

/// Fixed prefix carried by every issued key.
pub const KEY_PREFIX: &str = "ak_";
/// Number of hex characters following the prefix.
pub const KEY_HEX_LEN: usize = 48;

/// Errors surfaced by credential store implementations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("credential not found")]
    NotFound,
}

/// Lifecycle status of an issued credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Inactive,
    Revoked,
}

/// Operation categories a credential can be granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Delete,
    Admin,
}

/// An issued API credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Credential ID
    pub id: Uuid,
    /// Secret-derived lookup key (`ak_` + 48 hex chars)
    pub key: String,
    /// Owning account
    pub owner_id: Uuid,
    /// Lifecycle status
    pub status: CredentialStatus,
    /// Granted permissions
    pub permissions: Vec<Permission>,
    /// Per-window rate-limit tier
    pub limits: RateLimitTier,
    /// Source-IP allow-list (exact or single-wildcard-segment patterns; empty = allow-all)
    pub allowed_ips: Vec<String>,
    /// Referer-domain allow-list (exact or `*.base` suffix; empty = allow-all)
    pub allowed_domains: Vec<String>,
    /// Expiry timestamp (None = never expires)
    pub expires_at: Option<DateTime<Utc>>,
    /// Total requests admitted with this credential
    pub usage_total: u64,
    /// Requests admitted in the current calendar month
    pub usage_month: u64,
    /// Last admission timestamp
    pub last_used_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Create an active credential with the given key and permissions.
    pub fn new(key: String, owner_id: Uuid, permissions: Vec<Permission>, limits: RateLimitTier) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            owner_id,
            status: CredentialStatus::Active,
            permissions,
            limits,
            allowed_ips: Vec::new(),
            allowed_domains: Vec::new(),
            expires_at: None,
            usage_total: 0,
            usage_month: 0,
            last_used_at: None,
            created_at: Utc::now(),
        }
    }

    /// Effective validity: active status and not past expiry.
    pub fn is_effective(&self) -> bool {
        if self.status != CredentialStatus::Active {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > Utc::now(),
            None => true,
        }
    }

    /// Check a source IP against the allow-list.
    ///
    /// An empty list or a `*` entry allows any source. Wildcard segments in a
    /// pattern (`10.0.*.*`) match any numeric segment in the same position.
    pub fn allows_ip(&self, ip: &str) -> bool {
        if self.allowed_ips.is_empty() {
            return true;
        }
        self.allowed_ips
            .iter()
            .any(|pattern| pattern == "*" || ip_pattern_matches(pattern, ip))
    }

    /// Check a Referer domain against the allow-list.
    ///
    /// An empty list or a `*` entry allows any domain; absence of a Referer is
    /// only acceptable when the list is open. A `*.base` entry matches any
    /// subdomain of `base`.
    pub fn allows_domain(&self, domain: Option<&str>) -> bool {
        if self.allowed_domains.is_empty() || self.allowed_domains.iter().any(|d| d == "*") {
            return true;
        }
        let domain = match domain {
            Some(d) => d,
            None => return false,
        };
        self.allowed_domains.iter().any(|pattern| {
            if let Some(base) = pattern.strip_prefix("*.") {
                domain.len() > base.len() && domain.ends_with(base)
                    && domain.as_bytes()[domain.len() - base.len() - 1] == b'.'
            } else {
                pattern.eq_ignore_ascii_case(domain)
            }
        })
    }

    /// Permission check: every required permission must be granted, unless the
    /// credential carries `admin`.
    pub fn grants(&self, required: &[Permission]) -> bool {
        if self.permissions.contains(&Permission::Admin) {
            return true;
        }
        required.iter().all(|p| self.permissions.contains(p))
    }
}

/// Validate the wire format of a presented key without touching the store.
pub fn is_valid_key_format(key: &str) -> bool {
    match key.strip_prefix(KEY_PREFIX) {
        Some(rest) => {
            rest.len() == KEY_HEX_LEN && rest.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        }
        None => false,
    }
}

/// Match a dotted IPv4 pattern where `*` stands for any numeric segment.
fn ip_pattern_matches(pattern: &str, ip: &str) -> bool {
    let pattern_segs: Vec<&str> = pattern.split('.').collect();
    let ip_segs: Vec<&str> = ip.split('.').collect();
    if pattern_segs.len() != ip_segs.len() {
        return false;
    }
    pattern_segs.iter().zip(ip_segs.iter()).all(|(p, s)| {
        if *p == "*" {
            s.parse::<u8>().is_ok()
        } else {
            p == s
        }
    })
}

/// Store of issued credentials, consumed by the request gate
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a credential by its presented key. Returns `None` when no
    /// record exists; lifecycle and scoping checks are the caller's concern.
    async fn find_active(&self, key: &str) -> Result<Option<Credential>, StoreError>;

    /// Bump usage counters and the last-used timestamp for an admitted
    /// request. Called off the request path; failures are logged only.
    async fn record_usage(&self, id: Uuid) -> Result<(), StoreError>;
}

/// In-memory credential store for single-node deployments and tests
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: RwLock<HashMap<String, Credential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a credential, keyed by its lookup key.
    pub async fn insert(&self, credential: Credential) {
        let mut credentials = self.credentials.write().await;
        credentials.insert(credential.key.clone(), credential);
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_active(&self, key: &str) -> Result<Option<Credential>, StoreError> {
        let credentials = self.credentials.read().await;
        Ok(credentials.get(key).cloned())
    }

    async fn record_usage(&self, id: Uuid) -> Result<(), StoreError> {
        let mut credentials = self.credentials.write().await;
        let credential = credentials
            .values_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::NotFound)?;
        credential.usage_total += 1;
        credential.usage_month += 1;
        credential.last_used_at = Some(Utc::now());
        Ok(())
    }
}
