//! Admission decisions for the admission control service.
//!
//! The request gate is the single entry point on the request path. Given the
//! metadata of an inbound request it authenticates the presented credential,
//! consults the IP block cache, and enforces the multi-window rate limiter,
//! producing either an admission (with credential context and quota headers)
//! or a typed rejection.
//!
//! Every authentication failure is surfaced to the caller as the same opaque
//! `INVALID_API_KEY` code; the specific cause is recorded in the internal log
//! only. Store failures are fail-closed: admitting under unknown credential
//! state would defeat the gate.

use log::{error, warn};
use metrics::counter;
use std::sync::Arc;
use thiserror::Error;
use tokio::spawn;
use uuid::Uuid;

use crate::core::block_cache::BlockStore;
use crate::core::credentials::{self, Credential, CredentialStore, Permission};
use crate::core::rate_limiter::{RateLimitError, RateLimiter, RateQuota, WindowKind};
use crate::utils::secs_until;

/// Metadata the middleware extracts from an inbound request
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub source_ip: String,
    pub endpoint: String,
    pub method: String,
    /// Presented key, already resolved by header/query precedence
    pub api_key: Option<String>,
    /// Host parsed from the Referer header, if any
    pub referer_domain: Option<String>,
}

/// Per-mount gate configuration
#[derive(Debug, Clone, Default)]
pub struct GateOptions {
    pub required: bool,
    pub required_permissions: Vec<Permission>,
}

impl GateOptions {
    /// Require a credential carrying the given permissions.
    pub fn required(required_permissions: Vec<Permission>) -> Self {
        Self {
            required: true,
            required_permissions,
        }
    }

    /// Admit anonymous requests; enforce scoping only when a key is presented.
    pub fn optional() -> Self {
        Self::default()
    }
}

/// Credential context attached to admitted requests
#[derive(Debug, Clone)]
pub struct CredentialContext {
    pub credential_id: Uuid,
    pub owner_id: Uuid,
    pub permissions: Vec<Permission>,
}

/// A positive gate decision
#[derive(Debug, Clone)]
pub struct Admission {
    pub credential: Option<CredentialContext>,
    /// Quota of the last-checked window, for response headers
    pub quota: Option<RateQuota>,
}

impl Admission {
    fn anonymous() -> Self {
        Self {
            credential: None,
            quota: None,
        }
    }
}

/// Internal denial causes, logged but never surfaced to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyCause {
    NotFound,
    Inactive,
    Expired,
    IpNotAllowed,
    DomainNotAllowed,
    PermissionDenied,
    StoreUnavailable,
}

/// Gate rejections, mapped one-to-one onto the external error contract
#[derive(Error, Debug)]
pub enum GateError {
    #[error("API key is required")]
    MissingKey,
    #[error("invalid API key")]
    MalformedKey,
    #[error("invalid API key")]
    Denied(DenyCause),
    #[error("source IP is temporarily blocked")]
    IpBlocked { reason: String, retry_after: u64 },
    #[error("rate limit exceeded for the {window} window")]
    RateLimited {
        window: WindowKind,
        retry_after: u64,
        quota: RateQuota,
    },
}

impl GateError {
    /// Stable machine-readable code for the response body.
    pub fn external_code(&self) -> &'static str {
        match self {
            GateError::MissingKey => "MISSING_API_KEY",
            GateError::MalformedKey | GateError::Denied(_) => "INVALID_API_KEY",
            GateError::IpBlocked { .. } => "IP_BLOCKED",
            GateError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            GateError::MissingKey | GateError::MalformedKey | GateError::Denied(_) => 401,
            GateError::IpBlocked { .. } | GateError::RateLimited { .. } => 429,
        }
    }

    /// Caller-facing message. Uniform across all credential failures; the
    /// specific cause never leaves the internal log.
    pub fn client_message(&self) -> &'static str {
        match self {
            GateError::MissingKey => "API key is required",
            GateError::MalformedKey | GateError::Denied(_) => "Invalid API key",
            GateError::IpBlocked { .. } => "Source IP is temporarily blocked",
            GateError::RateLimited { .. } => "Rate limit exceeded",
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GateError::IpBlocked { retry_after, .. }
            | GateError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// The request-path admission gate
pub struct RequestGate {
    credentials: Arc<dyn CredentialStore>,
    blocks: Arc<dyn BlockStore>,
    limiter: RateLimiter,
}

impl RequestGate {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        blocks: Arc<dyn BlockStore>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            credentials,
            blocks,
            limiter,
        }
    }

    /// Decide admission for one request.
    ///
    /// Check order is contractual: credential authentication, then the block
    /// cache, then the rate limiter. No step blocks on background work; usage
    /// accounting is detached after admission.
    pub async fn authorize(
        &self,
        meta: &RequestMeta,
        opts: &GateOptions,
    ) -> Result<Admission, GateError> {
        counter!("gate_requests_total", 1);

        let key = match &meta.api_key {
            Some(key) => key,
            None => {
                if opts.required {
                    return Err(self.rejected(GateError::MissingKey));
                }
                return Ok(Admission::anonymous());
            }
        };

        // Malformed keys are rejected before any store access.
        if !credentials::is_valid_key_format(key) {
            warn!(
                "malformed API key presented from {} for {}",
                meta.source_ip, meta.endpoint
            );
            return Err(self.rejected(GateError::MalformedKey));
        }

        let credential = match self.credentials.find_active(key).await {
            Ok(Some(credential)) => credential,
            Ok(None) => return Err(self.denied(DenyCause::NotFound, meta)),
            Err(e) => {
                // Fail closed: unknown credential state is a denial.
                error!("credential lookup failed ({}); denying request", e);
                return Err(self.denied(DenyCause::StoreUnavailable, meta));
            }
        };

        if let Some(cause) = Self::scope_check(&credential, meta, opts) {
            return Err(self.denied(cause, meta));
        }

        match self.blocks.get(&meta.source_ip).await {
            Ok(Some(entry)) => {
                return Err(self.rejected(GateError::IpBlocked {
                    reason: entry.reason,
                    retry_after: secs_until(entry.expires_at).max(1),
                }));
            }
            Ok(None) => {}
            Err(e) => {
                error!("block cache read failed ({}); denying request", e);
                return Err(self.denied(DenyCause::StoreUnavailable, meta));
            }
        }

        let subject = credential.id.to_string();
        let quota = match self.limiter.check_and_consume(&subject, &credential.limits).await {
            Ok(quota) => quota,
            Err(RateLimitError::Exceeded {
                window,
                retry_after,
                quota,
            }) => {
                return Err(self.rejected(GateError::RateLimited {
                    window,
                    retry_after,
                    quota,
                }));
            }
            Err(RateLimitError::Store(e)) => {
                error!("rate counter store failed ({}); denying request", e);
                return Err(self.denied(DenyCause::StoreUnavailable, meta));
            }
        };

        // Usage accounting happens off the request path.
        let store = Arc::clone(&self.credentials);
        let credential_id = credential.id;
        spawn(async move {
            if let Err(e) = store.record_usage(credential_id).await {
                warn!("usage counter update failed for {}: {}", credential_id, e);
            }
        });

        counter!("gate_admitted_total", 1);
        Ok(Admission {
            credential: Some(CredentialContext {
                credential_id: credential.id,
                owner_id: credential.owner_id,
                permissions: credential.permissions.clone(),
            }),
            quota: Some(quota),
        })
    }

    /// Lifecycle and scoping checks, in a fixed order so the logged cause is
    /// the first failure encountered.
    fn scope_check(
        credential: &Credential,
        meta: &RequestMeta,
        opts: &GateOptions,
    ) -> Option<DenyCause> {
        if !credential.is_effective() {
            let cause = match credential.expires_at {
                Some(expires_at) if expires_at <= chrono::Utc::now() => DenyCause::Expired,
                _ => DenyCause::Inactive,
            };
            return Some(cause);
        }
        if !credential.allows_ip(&meta.source_ip) {
            return Some(DenyCause::IpNotAllowed);
        }
        if !credential.allows_domain(meta.referer_domain.as_deref()) {
            return Some(DenyCause::DomainNotAllowed);
        }
        if !credential.grants(&opts.required_permissions) {
            return Some(DenyCause::PermissionDenied);
        }
        None
    }

    fn denied(&self, cause: DenyCause, meta: &RequestMeta) -> GateError {
        warn!(
            "credential denied ({:?}) for {} {} from {}",
            cause, meta.method, meta.endpoint, meta.source_ip
        );
        self.rejected(GateError::Denied(cause))
    }

    fn rejected(&self, error: GateError) -> GateError {
        counter!("gate_rejected_total", 1, "code" => error.external_code());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block_cache::{BlockEntry, InMemoryBlockStore};
    use crate::core::credentials::{
        Credential, CredentialStatus, InMemoryCredentialStore, MockCredentialStore, KEY_HEX_LEN,
        KEY_PREFIX,
    };
    use crate::core::rate_limiter::{InMemoryCounterStore, RateLimitTier};
    use std::time::Duration;

    fn key(fill: char) -> String {
        format!("{}{}", KEY_PREFIX, fill.to_string().repeat(KEY_HEX_LEN))
    }

    fn meta(api_key: Option<String>) -> RequestMeta {
        RequestMeta {
            source_ip: "203.0.113.10".to_string(),
            endpoint: "/api/v1/leads".to_string(),
            method: "GET".to_string(),
            api_key,
            referer_domain: None,
        }
    }

    fn gate_with(
        store: Arc<dyn CredentialStore>,
        blocks: Arc<dyn BlockStore>,
    ) -> RequestGate {
        RequestGate::new(
            store,
            blocks,
            RateLimiter::new(Arc::new(InMemoryCounterStore::new())),
        )
    }

    async fn seeded_gate(credential: Credential) -> RequestGate {
        let store = InMemoryCredentialStore::new();
        store.insert(credential).await;
        gate_with(Arc::new(store), Arc::new(InMemoryBlockStore::new()))
    }

    fn credential(permissions: Vec<Permission>) -> Credential {
        Credential::new(key('a'), Uuid::new_v4(), permissions, RateLimitTier::default())
    }

    #[tokio::test]
    async fn missing_key_is_rejected_when_required() {
        let gate = seeded_gate(credential(vec![Permission::Read])).await;
        let err = gate
            .authorize(&meta(None), &GateOptions::required(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.external_code(), "MISSING_API_KEY");
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn missing_key_admits_anonymously_when_optional() {
        let gate = seeded_gate(credential(vec![Permission::Read])).await;
        let admission = gate
            .authorize(&meta(None), &GateOptions::optional())
            .await
            .unwrap();
        assert!(admission.credential.is_none());
        assert!(admission.quota.is_none());
    }

    #[tokio::test]
    async fn malformed_key_never_touches_the_store() {
        let mut store = MockCredentialStore::new();
        store.expect_find_active().times(0);
        store.expect_record_usage().times(0);
        let gate = gate_with(Arc::new(store), Arc::new(InMemoryBlockStore::new()));

        let err = gate
            .authorize(
                &meta(Some("definitely-not-a-key".to_string())),
                &GateOptions::required(vec![]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.external_code(), "INVALID_API_KEY");
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let mut store = MockCredentialStore::new();
        store
            .expect_find_active()
            .returning(|_| Err(credentials::StoreError::Unavailable("down".to_string())));
        let gate = gate_with(Arc::new(store), Arc::new(InMemoryBlockStore::new()));

        let err = gate
            .authorize(&meta(Some(key('a'))), &GateOptions::required(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Denied(DenyCause::StoreUnavailable)));
        assert_eq!(err.external_code(), "INVALID_API_KEY");
    }

    #[tokio::test]
    async fn unknown_inactive_and_expired_keys_share_one_external_code() {
        let mut revoked = credential(vec![Permission::Read]);
        revoked.status = CredentialStatus::Revoked;
        let gate = seeded_gate(revoked).await;

        let unknown = gate
            .authorize(&meta(Some(key('b'))), &GateOptions::required(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(unknown, GateError::Denied(DenyCause::NotFound)));

        let inactive = gate
            .authorize(&meta(Some(key('a'))), &GateOptions::required(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(inactive, GateError::Denied(DenyCause::Inactive)));
        assert_eq!(unknown.external_code(), inactive.external_code());

        let mut expired = credential(vec![Permission::Read]);
        expired.expires_at = Some(chrono::Utc::now() - chrono::Duration::minutes(1));
        let gate = seeded_gate(expired).await;
        let err = gate
            .authorize(&meta(Some(key('a'))), &GateOptions::required(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Denied(DenyCause::Expired)));
    }

    #[tokio::test]
    async fn ip_and_domain_scoping_are_enforced() {
        let mut scoped = credential(vec![Permission::Read]);
        scoped.allowed_ips = vec!["10.0.*.*".to_string()];
        let gate = seeded_gate(scoped).await;
        let err = gate
            .authorize(&meta(Some(key('a'))), &GateOptions::required(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Denied(DenyCause::IpNotAllowed)));

        let mut scoped = credential(vec![Permission::Read]);
        scoped.allowed_domains = vec!["*.example.com".to_string()];
        let gate = seeded_gate(scoped).await;
        let mut request = meta(Some(key('a')));
        request.referer_domain = Some("evil.test".to_string());
        let err = gate
            .authorize(&request, &GateOptions::required(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Denied(DenyCause::DomainNotAllowed)));

        request.referer_domain = Some("app.example.com".to_string());
        assert!(gate.authorize(&request, &GateOptions::required(vec![])).await.is_ok());
    }

    #[tokio::test]
    async fn admission_matches_permission_subset_rule() {
        let pool = [Permission::Read, Permission::Write, Permission::Delete];
        let required = vec![Permission::Write];

        // every subset of {read, write, delete}, plus the same with admin
        for mask in 0u8..8 {
            for with_admin in [false, true] {
                let mut granted: Vec<Permission> = pool
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, p)| *p)
                    .collect();
                if with_admin {
                    granted.push(Permission::Admin);
                }
                let expect_admit = with_admin || granted.contains(&Permission::Write);

                let gate = seeded_gate(credential(granted.clone())).await;
                let outcome = gate
                    .authorize(&meta(Some(key('a'))), &GateOptions::required(required.clone()))
                    .await;
                assert_eq!(
                    outcome.is_ok(),
                    expect_admit,
                    "granted={:?} admin={}",
                    granted,
                    with_admin
                );
                if let Err(err) = outcome {
                    assert!(matches!(err, GateError::Denied(DenyCause::PermissionDenied)));
                }
            }
        }
    }

    #[tokio::test]
    async fn live_block_entry_rejects_with_retry_after() {
        let store = InMemoryCredentialStore::new();
        store.insert(credential(vec![Permission::Read])).await;
        let blocks = Arc::new(InMemoryBlockStore::new());
        blocks
            .set(
                "203.0.113.10",
                BlockEntry::new("suspicious_activity", Duration::from_secs(600), None),
            )
            .await
            .unwrap();
        let gate = gate_with(Arc::new(store), blocks);

        let err = gate
            .authorize(&meta(Some(key('a'))), &GateOptions::required(vec![]))
            .await
            .unwrap_err();
        match err {
            GateError::IpBlocked { reason, retry_after } => {
                assert_eq!(reason, "suspicious_activity");
                assert!(retry_after > 0 && retry_after <= 600);
            }
            other => panic!("expected IpBlocked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn expired_block_entry_is_ignored() {
        let store = InMemoryCredentialStore::new();
        store.insert(credential(vec![Permission::Read])).await;
        let blocks = Arc::new(InMemoryBlockStore::new());
        blocks
            .set(
                "203.0.113.10",
                BlockEntry {
                    reason: "stale".to_string(),
                    expires_at: chrono::Utc::now() - chrono::Duration::seconds(1),
                    alert_id: None,
                },
            )
            .await
            .unwrap();
        let gate = gate_with(Arc::new(store), blocks);

        assert!(gate
            .authorize(&meta(Some(key('a'))), &GateOptions::required(vec![]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn over_limit_credential_is_rejected_with_quota() {
        let mut tight = credential(vec![Permission::Read]);
        tight.limits = RateLimitTier {
            per_minute: 2,
            per_hour: 1_000,
            per_day: 10_000,
        };
        let gate = seeded_gate(tight).await;
        let request = meta(Some(key('a')));
        let opts = GateOptions::required(vec![]);

        let first = gate.authorize(&request, &opts).await.unwrap();
        let quota = first.quota.unwrap();
        assert_eq!(quota.limit, 10_000); // last-checked window is the day
        gate.authorize(&request, &opts).await.unwrap();

        let err = gate.authorize(&request, &opts).await.unwrap_err();
        match err {
            GateError::RateLimited { window, retry_after, quota } => {
                assert_eq!(window, WindowKind::Minute);
                assert!(retry_after > 0);
                assert_eq!(quota.limit, 2);
                assert_eq!(quota.remaining, 0);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn admission_records_usage_asynchronously() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let c = credential(vec![Permission::Read]);
        let c_key = c.key.clone();
        store.insert(c).await;
        let gate = gate_with(store.clone(), Arc::new(InMemoryBlockStore::new()));

        gate.authorize(&meta(Some(key('a'))), &GateOptions::required(vec![]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stored = store.find_active(&c_key).await.unwrap().unwrap();
        assert_eq!(stored.usage_total, 1);
        assert!(stored.last_used_at.is_some());
    }
}
