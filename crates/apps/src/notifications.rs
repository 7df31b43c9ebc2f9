//! In-app notifications

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use ethernity_core::storage::id_key;
use ethernity_core::utils::validation::{validate_non_empty, validate_string_length};
use ethernity_core::{Clock, Collection, Pagination, Record, Storage};
use ethernity_identity::{IdentityError, UserManager};

use crate::AppResult;

/// Notification kinds raised by the backend jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TokenBurnWarning,
    ProposalCreated,
    RetirementReady,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::TokenBurnWarning => "token_burn_warning",
            NotificationType::ProposalCreated => "proposal_created",
            NotificationType::RetirementReady => "retirement_ready",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification shown to a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub user_id: u64,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<u64>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Record for Notification {
    const COLLECTION: &'static str = "notifications";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

/// New notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationCreate {
    pub user_id: u64,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub related_entity_type: Option<String>,
    #[serde(default)]
    pub related_entity_id: Option<u64>,
}

impl NotificationCreate {
    /// Notification of a known kind
    pub fn new(user_id: u64, kind: NotificationType, title: &str, message: &str) -> Self {
        Self {
            user_id,
            notification_type: kind.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            related_entity_type: None,
            related_entity_id: None,
        }
    }

    /// Point the notification at an entity
    pub fn about(mut self, entity_type: &str, entity_id: u64) -> Self {
        self.related_entity_type = Some(entity_type.to_string());
        self.related_entity_id = Some(entity_id);
        self
    }

    fn validate(&self) -> AppResult<()> {
        validate_string_length(&self.notification_type, 1, 64, "notification_type")?;
        validate_string_length(&self.title, 1, 200, "title")?;
        validate_non_empty(&self.message, "message")?;
        Ok(())
    }
}

/// Manages user notifications
pub struct NotificationManager {
    notifications: Collection<Notification>,
    users: Arc<UserManager>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl NotificationManager {
    /// Create a new notification manager
    pub fn new(storage: Arc<dyn Storage>, users: Arc<UserManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            notifications: Collection::new(storage),
            users,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a notification for an existing user
    pub async fn create(&self, data: NotificationCreate) -> AppResult<Notification> {
        data.validate()?;
        if self.users.get(data.user_id).await?.is_none() {
            return Err(IdentityError::UserNotFound.into());
        }

        let _guard = self.write_lock.lock().await;
        let notification = Notification {
            id: self.notifications.next_id().await?,
            user_id: data.user_id,
            notification_type: data.notification_type,
            title: data.title,
            message: data.message,
            related_entity_type: data.related_entity_type,
            related_entity_id: data.related_entity_id,
            read: false,
            read_at: None,
            created_at: self.clock.now(),
        };
        self.notifications.put(&notification).await?;

        info!("Notification created for user {}", notification.user_id);
        Ok(notification)
    }

    /// Send the same notification to several users, returning how many were created
    pub async fn notify_many(
        &self,
        user_ids: &[u64],
        kind: NotificationType,
        title: &str,
        message: &str,
        related: Option<(&str, u64)>,
    ) -> AppResult<usize> {
        let mut created = 0;
        for &user_id in user_ids {
            let mut data = NotificationCreate::new(user_id, kind, title, message);
            if let Some((entity_type, entity_id)) = related {
                data = data.about(entity_type, entity_id);
            }
            self.create(data).await?;
            created += 1;
        }
        Ok(created)
    }

    /// Notifications of a wallet, newest first; unknown wallets have none
    pub async fn for_wallet(&self, wallet: &str, pagination: Pagination, unread_only: bool) -> AppResult<Vec<Notification>> {
        let Some(user) = self.users.get_by_wallet(wallet).await? else {
            return Ok(Vec::new());
        };
        let mut notifications = self
            .notifications
            .filter(|n| n.user_id == user.id && (!unread_only || !n.read))
            .await?;
        notifications.reverse();
        Ok(pagination.apply(notifications))
    }

    /// Unread notifications of a wallet
    pub async fn unread_count(&self, wallet: &str) -> AppResult<usize> {
        let Some(user) = self.users.get_by_wallet(wallet).await? else {
            return Ok(0);
        };
        Ok(self.notifications.count(|n| n.user_id == user.id && !n.read).await?)
    }

    /// Get a notification by id
    pub async fn get(&self, id: u64) -> AppResult<Option<Notification>> {
        Ok(self.notifications.get(id).await?)
    }

    /// Set the read flag; `read_at` follows it
    pub async fn mark_read(&self, id: u64, read: bool) -> AppResult<Option<Notification>> {
        let _guard = self.write_lock.lock().await;
        let Some(mut notification) = self.notifications.get(id).await? else {
            return Ok(None);
        };
        notification.read = read;
        notification.read_at = if read { Some(self.clock.now()) } else { None };
        self.notifications.put(&notification).await?;
        Ok(Some(notification))
    }

    /// Mark every unread notification of a wallet as read
    pub async fn mark_all_read(&self, wallet: &str) -> AppResult<usize> {
        let Some(user) = self.users.get_by_wallet(wallet).await? else {
            return Ok(0);
        };

        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();
        let unread = self.notifications.filter(|n| n.user_id == user.id && !n.read).await?;
        for mut notification in unread.iter().cloned() {
            notification.read = true;
            notification.read_at = Some(now);
            self.notifications.put(&notification).await?;
        }

        info!("Marked {} notifications as read for {}", unread.len(), user.wallet_address);
        Ok(unread.len())
    }

    /// Delete a notification
    pub async fn delete(&self, id: u64) -> AppResult<bool> {
        let _guard = self.write_lock.lock().await;
        let deleted = self.notifications.delete(id).await?;
        if deleted {
            debug!("Notification {} deleted", id);
        }
        Ok(deleted)
    }
}
