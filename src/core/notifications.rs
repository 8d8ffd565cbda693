//! Admin notification delivery for the admission control service.
//!
//! Alert containment dispatches admin notifications through the
//! [`NotificationSink`] trait. The webhook sink posts a JSON payload to a
//! configured endpoint; the log sink is the default when no webhook is
//! configured. Delivery is fire-and-forget from the pipeline's point of view.

use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::core::accounts::AdminContact;
use crate::core::alert_engine::SecurityAlert;

/// Errors that can occur during notification dispatch
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("webhook rejected notification: HTTP {0}")]
    Rejected(u16),
}

/// Delivery collaborator for admin-facing alert notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_admins(
        &self,
        admins: &[AdminContact],
        alert: &SecurityAlert,
    ) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    alert_id: String,
    alert_type: String,
    severity: String,
    source_ip: Option<&'a str>,
    confidence: u8,
    description: &'a str,
    recipients: Vec<&'a str>,
}

/// Webhook notification sink
pub struct WebhookNotificationSink {
    client: Client,
    url: String,
    token: Option<String>,
}

impl WebhookNotificationSink {
    pub fn new(url: String, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url,
            token,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify_admins(
        &self,
        admins: &[AdminContact],
        alert: &SecurityAlert,
    ) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            alert_id: alert.id.to_string(),
            alert_type: alert.alert_type.to_string(),
            severity: alert.severity.to_string(),
            source_ip: alert.source_ip.as_deref(),
            confidence: alert.confidence,
            description: &alert.description,
            recipients: admins.iter().map(|a| a.email.as_str()).collect(),
        };

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Log-only sink used when no webhook is configured
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify_admins(
        &self,
        admins: &[AdminContact],
        alert: &SecurityAlert,
    ) -> Result<(), NotifyError> {
        info!(
            "security alert {} ({}/{}) would notify {} admins",
            alert.id,
            alert.alert_type,
            alert.severity,
            admins.len()
        );
        Ok(())
    }
}
