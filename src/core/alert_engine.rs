//! Security alert engine for the admission control service.
//!
//! Alerts move through `active → investigating → {resolved, false_positive,
//! dismissed}`. Creating an alert is the sole trigger of the automatic action
//! pipeline: a deterministic policy table maps severity and type to a closed
//! set of containment actions, executed sequentially and independently, each
//! leaving an audit record on the alert. Investigators can append notes, run
//! further actions, escalate, and resolve; nothing automatic fires after an
//! alert reaches a terminal state.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::accounts::UserStore;
use crate::core::block_cache::{BlockEntry, BlockStore};
use crate::core::notifications::NotificationSink;

/// Errors that can occur during alert operations
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("alert not found")]
    NotFound,
    #[error("alert is in terminal state {0}")]
    Terminal(AlertStatus),
    #[error("invalid transition from {0}")]
    InvalidTransition(AlertStatus),
    #[error("alert store error: {0}")]
    Store(String),
}

/// Closed set of incident categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    BruteForceAttempt,
    DdosAttack,
    AccountTakeover,
    UnauthorizedAccess,
    SuspiciousActivity,
    RateLimitAbuse,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertType::BruteForceAttempt => "brute_force_attempt",
            AlertType::DdosAttack => "ddos_attack",
            AlertType::AccountTakeover => "account_takeover",
            AlertType::UnauthorizedAccess => "unauthorized_access",
            AlertType::SuspiciousActivity => "suspicious_activity",
            AlertType::RateLimitAbuse => "rate_limit_abuse",
        };
        f.write_str(s)
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Alert lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Investigating,
    Resolved,
    FalsePositive,
    Dismissed,
}

impl AlertStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AlertStatus::Resolved | AlertStatus::FalsePositive | AlertStatus::Dismissed
        )
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertStatus::Active => "active",
            AlertStatus::Investigating => "investigating",
            AlertStatus::Resolved => "resolved",
            AlertStatus::FalsePositive => "false_positive",
            AlertStatus::Dismissed => "dismissed",
        };
        f.write_str(s)
    }
}

/// How a resolved alert was closed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    Mitigated,
    FalsePositive,
    Acknowledged,
    Escalated,
}

/// Closed set of containment actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomatedAction {
    BlockIp,
    QuarantineUser,
    NotifyAdmin,
    RateLimit,
    LogOnly,
}

impl std::fmt::Display for AutomatedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AutomatedAction::BlockIp => "block_ip",
            AutomatedAction::QuarantineUser => "quarantine_user",
            AutomatedAction::NotifyAdmin => "notify_admin",
            AutomatedAction::RateLimit => "rate_limit",
            AutomatedAction::LogOnly => "log_only",
        };
        f.write_str(s)
    }
}

/// Who performed an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Performer {
    System,
    Admin { admin_id: Uuid },
}

/// Outcome of one executed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResult {
    Success,
    Failed,
    Pending,
}

/// Audit record for one executed action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: AutomatedAction,
    pub timestamp: DateTime<Utc>,
    pub performer: Performer,
    pub result: ActionResult,
    pub details: String,
}

/// Free-form investigator note
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationNote {
    pub author: Uuid,
    pub timestamp: DateTime<Utc>,
    pub body: String,
}

/// Resolution record stamped when an alert is closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub resolution_type: ResolutionType,
    pub resolved_by: Uuid,
    pub resolved_at: DateTime<Utc>,
    pub summary: Option<String>,
}

/// A recorded security incident with its audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub status: AlertStatus,
    pub source_ip: Option<String>,
    pub endpoint: Option<String>,
    /// Detection confidence, 0-100
    pub confidence: u8,
    pub user_id: Option<Uuid>,
    pub credential_id: Option<Uuid>,
    pub description: String,
    pub actions: Vec<ActionRecord>,
    pub notes: Vec<InvestigationNote>,
    pub resolution: Option<Resolution>,
    pub escalated: bool,
    pub escalated_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating an alert
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub source_ip: Option<String>,
    pub endpoint: Option<String>,
    pub confidence: u8,
    pub user_id: Option<Uuid>,
    pub credential_id: Option<Uuid>,
    pub description: String,
}

impl NewAlert {
    pub fn new(alert_type: AlertType, severity: Severity) -> Self {
        Self {
            alert_type,
            severity,
            source_ip: None,
            endpoint: None,
            confidence: 50,
            user_id: None,
            credential_id: None,
            description: String::new(),
        }
    }
}

/// Alert engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// TTL applied by the `block_ip` action, in seconds
    pub block_ttl_seconds: u64,
    /// Admin notification webhook endpoint
    pub webhook_url: Option<String>,
    /// Bearer token for the webhook endpoint
    pub webhook_token: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            block_ttl_seconds: 3_600,
            webhook_url: None,
            webhook_token: None,
        }
    }
}

/// Action plan for a newly created alert, by severity then type.
pub fn automatic_actions(severity: Severity, alert_type: AlertType) -> Vec<AutomatedAction> {
    match severity {
        Severity::Critical => {
            let mut plan = vec![AutomatedAction::NotifyAdmin];
            if matches!(alert_type, AlertType::BruteForceAttempt | AlertType::DdosAttack) {
                plan.push(AutomatedAction::BlockIp);
            }
            if matches!(alert_type, AlertType::AccountTakeover | AlertType::UnauthorizedAccess) {
                plan.push(AutomatedAction::QuarantineUser);
            }
            plan
        }
        Severity::High => vec![AutomatedAction::NotifyAdmin, AutomatedAction::RateLimit],
        Severity::Medium | Severity::Low => vec![AutomatedAction::LogOnly],
    }
}

/// Security alert engine
pub struct AlertEngine {
    alerts: RwLock<HashMap<Uuid, SecurityAlert>>,
    blocks: Arc<dyn BlockStore>,
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn NotificationSink>,
    config: AlertConfig,
}

impl AlertEngine {
    pub fn new(
        blocks: Arc<dyn BlockStore>,
        users: Arc<dyn UserStore>,
        notifier: Arc<dyn NotificationSink>,
        config: AlertConfig,
    ) -> Self {
        Self {
            alerts: RwLock::new(HashMap::new()),
            blocks,
            users,
            notifier,
            config,
        }
    }

    /// Record a new alert and run its automatic action plan.
    ///
    /// The alert is persisted before any action executes; action failures are
    /// captured in the audit trail and never propagate to the caller.
    pub async fn create(&self, new: NewAlert) -> Result<SecurityAlert, AlertError> {
        let now = Utc::now();
        let mut alert = SecurityAlert {
            id: Uuid::new_v4(),
            alert_type: new.alert_type,
            severity: new.severity,
            status: AlertStatus::Active,
            source_ip: new.source_ip,
            endpoint: new.endpoint,
            confidence: new.confidence.min(100),
            user_id: new.user_id,
            credential_id: new.credential_id,
            description: new.description,
            actions: Vec::new(),
            notes: Vec::new(),
            resolution: None,
            escalated: false,
            escalated_to: None,
            created_at: now,
            updated_at: now,
        };

        let mut alerts = self.alerts.write().await;
        alerts.insert(alert.id, alert.clone());

        info!(
            "security alert {} created: {} / {} (confidence {})",
            alert.id, alert.alert_type, alert.severity, alert.confidence
        );

        for action in automatic_actions(alert.severity, alert.alert_type) {
            let record = self.execute_action(&alert, action, Performer::System).await;
            alert.actions.push(record);
        }
        alert.updated_at = Utc::now();
        alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    /// Run one containment action and produce its audit record.
    async fn execute_action(
        &self,
        alert: &SecurityAlert,
        action: AutomatedAction,
        performer: Performer,
    ) -> ActionRecord {
        let (result, details) = match action {
            AutomatedAction::BlockIp => match &alert.source_ip {
                Some(ip) => {
                    let entry = BlockEntry::new(
                        format!("alert:{}", alert.alert_type),
                        Duration::from_secs(self.config.block_ttl_seconds),
                        Some(alert.id),
                    );
                    match self.blocks.set(ip, entry).await {
                        Ok(()) => (
                            ActionResult::Success,
                            format!("blocked {} for {}s", ip, self.config.block_ttl_seconds),
                        ),
                        Err(e) => (ActionResult::Failed, format!("block cache write failed: {}", e)),
                    }
                }
                None => (ActionResult::Failed, "alert has no source ip to block".to_string()),
            },
            AutomatedAction::QuarantineUser => match alert.user_id {
                Some(user_id) => {
                    let reason = format!("security alert {} ({})", alert.id, alert.alert_type);
                    match self.users.suspend(user_id, &reason).await {
                        Ok(()) => (ActionResult::Success, format!("user {} quarantined", user_id)),
                        Err(e) => (ActionResult::Failed, format!("quarantine failed: {}", e)),
                    }
                }
                None => (
                    ActionResult::Failed,
                    "alert has no associated user to quarantine".to_string(),
                ),
            },
            AutomatedAction::NotifyAdmin => {
                // Dispatch is detached; the action is recorded as successful
                // regardless of delivery confirmation.
                let admins = match self.users.admins().await {
                    Ok(admins) => admins,
                    Err(e) => {
                        warn!("admin lookup for notification failed: {}", e);
                        Vec::new()
                    }
                };
                let count = admins.len();
                let notifier = Arc::clone(&self.notifier);
                let alert_copy = alert.clone();
                tokio::spawn(async move {
                    if let Err(e) = notifier.notify_admins(&admins, &alert_copy).await {
                        warn!("admin notification dispatch failed: {}", e);
                    }
                });
                (
                    ActionResult::Success,
                    format!("notification dispatched to {} admins", count),
                )
            }
            AutomatedAction::RateLimit => (
                ActionResult::Success,
                "rate-limit tightening recorded; limiter state unchanged".to_string(),
            ),
            AutomatedAction::LogOnly => {
                info!(
                    "security alert {} [{} / {}] recorded, no containment taken",
                    alert.id, alert.alert_type, alert.severity
                );
                (ActionResult::Success, "alert recorded".to_string())
            }
        };

        ActionRecord {
            action,
            timestamp: Utc::now(),
            performer,
            result,
            details,
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<SecurityAlert> {
        let alerts = self.alerts.read().await;
        alerts.get(&id).cloned()
    }

    /// All alerts, newest first.
    pub async fn list(&self) -> Vec<SecurityAlert> {
        let alerts = self.alerts.read().await;
        let mut all: Vec<SecurityAlert> = alerts.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Append an investigator note.
    pub async fn add_note(&self, id: Uuid, author: Uuid, body: String) -> Result<SecurityAlert, AlertError> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts.get_mut(&id).ok_or(AlertError::NotFound)?;
        alert.notes.push(InvestigationNote {
            author,
            timestamp: Utc::now(),
            body,
        });
        alert.updated_at = Utc::now();
        Ok(alert.clone())
    }

    /// Move an active alert into investigation.
    pub async fn begin_investigation(&self, id: Uuid) -> Result<SecurityAlert, AlertError> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts.get_mut(&id).ok_or(AlertError::NotFound)?;
        if alert.status != AlertStatus::Active {
            return Err(AlertError::InvalidTransition(alert.status));
        }
        alert.status = AlertStatus::Investigating;
        alert.updated_at = Utc::now();
        Ok(alert.clone())
    }

    /// Execute a further containment action on behalf of an investigator.
    pub async fn execute_manual(
        &self,
        id: Uuid,
        action: AutomatedAction,
        admin_id: Uuid,
    ) -> Result<SecurityAlert, AlertError> {
        let mut alerts = self.alerts.write().await;
        let mut alert = alerts.get(&id).cloned().ok_or(AlertError::NotFound)?;
        if alert.status.is_terminal() {
            return Err(AlertError::Terminal(alert.status));
        }
        let record = self
            .execute_action(&alert, action, Performer::Admin { admin_id })
            .await;
        alert.actions.push(record);
        alert.updated_at = Utc::now();
        alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    /// Flag a non-terminal alert for higher-tier review.
    pub async fn escalate(&self, id: Uuid, target: String) -> Result<SecurityAlert, AlertError> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts.get_mut(&id).ok_or(AlertError::NotFound)?;
        if alert.status.is_terminal() {
            return Err(AlertError::Terminal(alert.status));
        }
        alert.escalated = true;
        alert.escalated_to = Some(target);
        alert.updated_at = Utc::now();
        Ok(alert.clone())
    }

    /// Close an alert with a resolution record. No automatic actions fire
    /// after this point.
    pub async fn resolve(
        &self,
        id: Uuid,
        resolution_type: ResolutionType,
        resolved_by: Uuid,
        summary: Option<String>,
        escalated_to: Option<String>,
    ) -> Result<SecurityAlert, AlertError> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts.get_mut(&id).ok_or(AlertError::NotFound)?;
        if alert.status.is_terminal() {
            return Err(AlertError::Terminal(alert.status));
        }
        alert.status = AlertStatus::Resolved;
        alert.resolution = Some(Resolution {
            resolution_type,
            resolved_by,
            resolved_at: Utc::now(),
            summary,
        });
        if resolution_type == ResolutionType::Escalated {
            alert.escalated = true;
            if escalated_to.is_some() {
                alert.escalated_to = escalated_to;
            }
        }
        alert.updated_at = Utc::now();
        Ok(alert.clone())
    }

    /// Dismiss a non-terminal alert without a resolution record.
    pub async fn dismiss(&self, id: Uuid) -> Result<SecurityAlert, AlertError> {
        self.close_as(id, AlertStatus::Dismissed).await
    }

    /// Mark a non-terminal alert as a false positive.
    pub async fn mark_false_positive(&self, id: Uuid) -> Result<SecurityAlert, AlertError> {
        self.close_as(id, AlertStatus::FalsePositive).await
    }

    async fn close_as(&self, id: Uuid, status: AlertStatus) -> Result<SecurityAlert, AlertError> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts.get_mut(&id).ok_or(AlertError::NotFound)?;
        if alert.status.is_terminal() {
            return Err(AlertError::Terminal(alert.status));
        }
        alert.status = status;
        alert.updated_at = Utc::now();
        Ok(alert.clone())
    }

    /// Drop terminal alerts untouched for longer than `horizon`. Called by
    /// the external retention job.
    pub async fn purge_resolved(&self, horizon: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(horizon.as_secs() as i64);
        let mut alerts = self.alerts.write().await;
        let before = alerts.len();
        alerts.retain(|_, alert| !(alert.status.is_terminal() && alert.updated_at < cutoff));
        before - alerts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::accounts::{InMemoryUserStore, UserAccount};
    use crate::core::block_cache::InMemoryBlockStore;
    use crate::core::notifications::test_support::RecordingSink;

    struct Harness {
        engine: AlertEngine,
        blocks: Arc<InMemoryBlockStore>,
        users: Arc<InMemoryUserStore>,
        sink: Arc<RecordingSink>,
    }

    fn harness() -> Harness {
        let blocks = Arc::new(InMemoryBlockStore::new());
        let users = Arc::new(InMemoryUserStore::new());
        let sink = Arc::new(RecordingSink::default());
        let engine = AlertEngine::new(
            blocks.clone(),
            users.clone(),
            sink.clone(),
            AlertConfig::default(),
        );
        Harness { engine, blocks, users, sink }
    }

    fn records_of(alert: &SecurityAlert, action: AutomatedAction) -> Vec<&ActionRecord> {
        alert.actions.iter().filter(|r| r.action == action).collect()
    }

    #[test]
    fn policy_table_is_deterministic() {
        assert_eq!(
            automatic_actions(Severity::Critical, AlertType::BruteForceAttempt),
            vec![AutomatedAction::NotifyAdmin, AutomatedAction::BlockIp]
        );
        assert_eq!(
            automatic_actions(Severity::Critical, AlertType::AccountTakeover),
            vec![AutomatedAction::NotifyAdmin, AutomatedAction::QuarantineUser]
        );
        assert_eq!(
            automatic_actions(Severity::Critical, AlertType::SuspiciousActivity),
            vec![AutomatedAction::NotifyAdmin]
        );
        assert_eq!(
            automatic_actions(Severity::High, AlertType::DdosAttack),
            vec![AutomatedAction::NotifyAdmin, AutomatedAction::RateLimit]
        );
        assert_eq!(
            automatic_actions(Severity::Medium, AlertType::DdosAttack),
            vec![AutomatedAction::LogOnly]
        );
        assert_eq!(
            automatic_actions(Severity::Low, AlertType::RateLimitAbuse),
            vec![AutomatedAction::LogOnly]
        );
    }

    #[tokio::test]
    async fn critical_brute_force_blocks_source_ip() {
        let h = harness();
        let mut new = NewAlert::new(AlertType::BruteForceAttempt, Severity::Critical);
        new.source_ip = Some("203.0.113.50".to_string());
        let alert = h.engine.create(new).await.unwrap();

        let blocks = records_of(&alert, AutomatedAction::BlockIp);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].result, ActionResult::Success);
        assert_eq!(blocks[0].performer, Performer::System);

        let entry = h.blocks.get("203.0.113.50").await.unwrap().unwrap();
        assert_eq!(entry.alert_id, Some(alert.id));
        assert!(entry.reason.contains("brute_force_attempt"));
    }

    #[tokio::test]
    async fn block_ip_without_source_ip_fails_but_other_actions_run() {
        let h = harness();
        let alert = h
            .engine
            .create(NewAlert::new(AlertType::DdosAttack, Severity::Critical))
            .await
            .unwrap();

        let blocks = records_of(&alert, AutomatedAction::BlockIp);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].result, ActionResult::Failed);
        // notify_admin still executed and succeeded
        let notifies = records_of(&alert, AutomatedAction::NotifyAdmin);
        assert_eq!(notifies.len(), 1);
        assert_eq!(notifies[0].result, ActionResult::Success);
    }

    #[tokio::test]
    async fn critical_account_takeover_quarantines_user() {
        let h = harness();
        let user = UserAccount::new("victim@example.com", false);
        let user_id = user.id;
        h.users.insert(user).await;

        let mut new = NewAlert::new(AlertType::AccountTakeover, Severity::Critical);
        new.user_id = Some(user_id);
        let alert = h.engine.create(new).await.unwrap();

        let quarantines = records_of(&alert, AutomatedAction::QuarantineUser);
        assert_eq!(quarantines.len(), 1);
        assert_eq!(quarantines[0].result, ActionResult::Success);

        let user = h.users.get(user_id).await.unwrap();
        assert!(user.suspended);
        assert!(user.suspended_reason.unwrap().contains(&alert.id.to_string()));
    }

    #[tokio::test]
    async fn notify_admin_dispatches_to_all_admins() {
        let h = harness();
        h.users.insert(UserAccount::new("a@example.com", true)).await;
        h.users.insert(UserAccount::new("b@example.com", true)).await;

        let alert = h
            .engine
            .create(NewAlert::new(AlertType::UnauthorizedAccess, Severity::High))
            .await
            .unwrap();

        // high severity: notify_admin + audit-only rate_limit
        assert_eq!(alert.actions.len(), 2);
        assert_eq!(alert.actions[0].action, AutomatedAction::NotifyAdmin);
        assert_eq!(alert.actions[1].action, AutomatedAction::RateLimit);
        assert_eq!(alert.actions[1].result, ActionResult::Success);

        // wait for the detached dispatch
        tokio::time::sleep(Duration::from_millis(50)).await;
        let dispatched = h.sink.dispatched.lock().await;
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].0, 2);
    }

    #[tokio::test]
    async fn medium_severity_only_logs() {
        let h = harness();
        let alert = h
            .engine
            .create(NewAlert::new(AlertType::SuspiciousActivity, Severity::Medium))
            .await
            .unwrap();
        assert_eq!(alert.actions.len(), 1);
        assert_eq!(alert.actions[0].action, AutomatedAction::LogOnly);
        assert_eq!(alert.actions[0].result, ActionResult::Success);
    }

    #[tokio::test]
    async fn resolve_stamps_resolution_and_blocks_further_actions() {
        let h = harness();
        let alert = h
            .engine
            .create(NewAlert::new(AlertType::SuspiciousActivity, Severity::Medium))
            .await
            .unwrap();
        let resolver = Uuid::new_v4();

        let resolved = h
            .engine
            .resolve(alert.id, ResolutionType::FalsePositive, resolver, None, None)
            .await
            .unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        let resolution = resolved.resolution.unwrap();
        assert_eq!(resolution.resolution_type, ResolutionType::FalsePositive);
        assert_eq!(resolution.resolved_by, resolver);

        // no further actions, manual or otherwise
        assert!(matches!(
            h.engine
                .execute_manual(alert.id, AutomatedAction::BlockIp, Uuid::new_v4())
                .await,
            Err(AlertError::Terminal(AlertStatus::Resolved))
        ));
        let unchanged = h.engine.get(alert.id).await.unwrap();
        assert_eq!(unchanged.actions.len(), resolved.actions.len());
    }

    #[tokio::test]
    async fn resolve_as_escalated_flags_the_alert() {
        let h = harness();
        let alert = h
            .engine
            .create(NewAlert::new(AlertType::DdosAttack, Severity::Low))
            .await
            .unwrap();
        let resolved = h
            .engine
            .resolve(
                alert.id,
                ResolutionType::Escalated,
                Uuid::new_v4(),
                Some("needs infra review".to_string()),
                Some("tier-2".to_string()),
            )
            .await
            .unwrap();
        assert!(resolved.escalated);
        assert_eq!(resolved.escalated_to.as_deref(), Some("tier-2"));
    }

    #[tokio::test]
    async fn manual_action_carries_admin_performer() {
        let h = harness();
        let mut new = NewAlert::new(AlertType::RateLimitAbuse, Severity::Medium);
        new.source_ip = Some("198.51.100.80".to_string());
        let alert = h.engine.create(new).await.unwrap();
        let admin_id = Uuid::new_v4();

        let updated = h
            .engine
            .execute_manual(alert.id, AutomatedAction::BlockIp, admin_id)
            .await
            .unwrap();
        let record = updated.actions.last().unwrap();
        assert_eq!(record.performer, Performer::Admin { admin_id });
        assert_eq!(record.result, ActionResult::Success);
        assert!(h.blocks.get("198.51.100.80").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn investigation_and_notes_flow() {
        let h = harness();
        let alert = h
            .engine
            .create(NewAlert::new(AlertType::SuspiciousActivity, Severity::Medium))
            .await
            .unwrap();

        let alert = h.engine.begin_investigation(alert.id).await.unwrap();
        assert_eq!(alert.status, AlertStatus::Investigating);
        assert!(matches!(
            h.engine.begin_investigation(alert.id).await,
            Err(AlertError::InvalidTransition(AlertStatus::Investigating))
        ));

        let author = Uuid::new_v4();
        let alert = h
            .engine
            .add_note(alert.id, author, "traffic came from one ASN".to_string())
            .await
            .unwrap();
        assert_eq!(alert.notes.len(), 1);
        assert_eq!(alert.notes[0].author, author);
    }

    #[tokio::test]
    async fn purge_drops_only_stale_terminal_alerts() {
        let h = harness();
        let open = h
            .engine
            .create(NewAlert::new(AlertType::SuspiciousActivity, Severity::Medium))
            .await
            .unwrap();
        let closed = h
            .engine
            .create(NewAlert::new(AlertType::SuspiciousActivity, Severity::Medium))
            .await
            .unwrap();
        h.engine
            .resolve(closed.id, ResolutionType::Mitigated, Uuid::new_v4(), None, None)
            .await
            .unwrap();

        // nothing old enough yet
        assert_eq!(h.engine.purge_resolved(Duration::from_secs(3_600)).await, 0);
        // zero horizon: the resolved alert is eligible, the active one is not
        assert_eq!(h.engine.purge_resolved(Duration::from_secs(0)).await, 1);
        assert!(h.engine.get(open.id).await.is_some());
        assert!(h.engine.get(closed.id).await.is_none());
    }
}
