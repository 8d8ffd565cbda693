//! User account collaborator interface for the admission control service.
//!
//! The containment pipeline needs two things from the account system: putting
//! a user into quarantine, and enumerating admin accounts for notification.
//! Account storage itself is an external collaborator; the in-memory
//! implementation covers single-node deployments and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors surfaced by user store implementations
#[derive(Error, Debug)]
pub enum AccountError {
    #[error("user not found")]
    NotFound,
    #[error("user store unavailable: {0}")]
    Unavailable(String),
}

/// Admin account reference handed to the notification sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminContact {
    pub user_id: Uuid,
    pub email: String,
}

/// A user account as seen by the containment pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub admin: bool,
    pub suspended: bool,
    pub suspended_reason: Option<String>,
    pub suspended_at: Option<DateTime<Utc>>,
}

impl UserAccount {
    pub fn new(email: impl Into<String>, admin: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            admin,
            suspended: false,
            suspended_reason: None,
            suspended_at: None,
        }
    }
}

/// Account-state collaborator consumed by the alert action pipeline
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Put a user into quarantine with a reason and timestamp.
    async fn suspend(&self, user_id: Uuid, reason: &str) -> Result<(), AccountError>;

    /// All admin accounts, for alert notification fan-out.
    async fn admins(&self) -> Result<Vec<AdminContact>, AccountError>;
}

/// In-memory user store for single-node deployments and tests
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<Uuid, UserAccount>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: UserAccount) {
        let mut users = self.users.write().await;
        users.insert(user.id, user);
    }

    pub async fn get(&self, id: Uuid) -> Option<UserAccount> {
        let users = self.users.read().await;
        users.get(&id).cloned()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn suspend(&self, user_id: Uuid, reason: &str) -> Result<(), AccountError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&user_id).ok_or(AccountError::NotFound)?;
        user.suspended = true;
        user.suspended_reason = Some(reason.to_string());
        user.suspended_at = Some(Utc::now());
        Ok(())
    }

    async fn admins(&self) -> Result<Vec<AdminContact>, AccountError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .filter(|user| user.admin)
            .map(|user| AdminContact {
                user_id: user.id,
                email: user.email.clone(),
            })
            .collect())
    }
}
