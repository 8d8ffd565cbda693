//! Core functionality for the admission control service.
//!
//! This module contains the core components of the service: the request
//! gate, credential handling, rate limiting, the IP block cache, request
//! outcome logging, abuse detection, and the security alert engine.

pub mod accounts;
pub mod activity_log;
pub mod alert_engine;
pub mod anomaly_detector;
pub mod block_cache;
pub mod credentials;
pub mod notifications;
pub mod rate_limiter;
pub mod request_gate;

pub use accounts::{AdminContact, InMemoryUserStore, UserAccount, UserStore};
pub use activity_log::{ActivityLog, InMemoryActivityLog, RequestOutcome};
pub use alert_engine::{
    AlertConfig, AlertEngine, AlertStatus, AlertType, AutomatedAction, NewAlert, ResolutionType,
    SecurityAlert, Severity,
};
pub use anomaly_detector::{AnomalyDetector, DetectionConfig};
pub use block_cache::{BlockEntry, BlockStore, InMemoryBlockStore, RedisBlockStore};
pub use credentials::{Credential, CredentialStore, InMemoryCredentialStore, Permission};
pub use notifications::{LogNotificationSink, NotificationSink, WebhookNotificationSink};
pub use rate_limiter::{
    CounterStore, InMemoryCounterStore, RateLimitTier, RateLimiter, RedisCounterStore,
};
pub use request_gate::{Admission, CredentialContext, GateError, GateOptions, RequestGate, RequestMeta};
