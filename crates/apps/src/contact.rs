//! Contact form
//!
//! Messages are stored for the admin inbox. Submitting one mails a
//! confirmation to the sender and a copy to the admin; mail failures are
//! logged and never fail the submission.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};

use ethernity_core::storage::id_key;
use ethernity_core::utils::normalize_email;
use ethernity_core::utils::validation::{validate_min_length, validate_string_length};
use ethernity_core::{Clock, Collection, Pagination, Record, Storage};

use crate::mailer::Mailer;
use crate::{AppError, AppResult, ClientInfo};

/// A message sent through the contact form
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactMessage {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl Record for ContactMessage {
    const COLLECTION: &'static str = "contacts";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

/// Contact form submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactMessageCreate {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

impl ContactMessageCreate {
    /// Trimmed and validated copy of the submission
    fn normalized(self) -> AppResult<Self> {
        let name = self.name.trim().to_string();
        let subject = self.subject.trim().to_string();
        let message = self.message.trim().to_string();
        validate_string_length(&name, 2, 255, "name")?;
        validate_string_length(&subject, 5, 500, "subject")?;
        validate_min_length(&message, 10, "message")?;
        Ok(Self {
            name,
            email: normalize_email(&self.email)?,
            subject,
            message,
        })
    }
}

/// Outcome of an admin reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactReply {
    pub message: String,
    pub contact_id: u64,
    pub recipient: String,
}

/// Inbox figures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactStats {
    pub total: usize,
    pub unread: usize,
    pub read: usize,
    pub last_7_days: usize,
}

/// Manages contact messages
pub struct ContactManager {
    messages: Collection<ContactMessage>,
    mailer: Arc<dyn Mailer>,
    admin_address: Option<String>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl ContactManager {
    /// Create a new contact manager
    pub fn new(
        storage: Arc<dyn Storage>,
        mailer: Arc<dyn Mailer>,
        admin_address: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            messages: Collection::new(storage),
            mailer,
            admin_address,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    fn not_found() -> AppError {
        AppError::NotFound("Contact message not found".to_string())
    }

    /// Store a submission and send the confirmation mails
    pub async fn create(&self, data: ContactMessageCreate, client: ClientInfo) -> AppResult<ContactMessage> {
        let data = data.normalized()?;

        let contact = {
            let _guard = self.write_lock.lock().await;
            let contact = ContactMessage {
                id: self.messages.next_id().await?,
                name: data.name,
                email: data.email,
                subject: data.subject,
                message: data.message,
                ip_address: client.ip_address,
                user_agent: client.user_agent,
                is_read: false,
                read_at: None,
                timestamp: self.clock.now(),
            };
            self.messages.put(&contact).await?;
            contact
        };
        info!("Contact message created: {} - {}", contact.email, contact.subject);

        self.send_confirmation_mails(&contact).await;
        Ok(contact)
    }

    async fn send_confirmation_mails(&self, contact: &ContactMessage) {
        let html = format!(
            "<p>Hi {},</p><p>Thanks for reaching out. We received your message \"{}\" and will answer soon.</p>",
            contact.name, contact.subject
        );
        if let Err(e) = self.mailer.send(&contact.email, "We received your message", &html).await {
            error!("Could not send contact confirmation to {}: {}", contact.email, e);
        }

        let Some(admin) = &self.admin_address else {
            return;
        };
        let subject: String = contact.subject.chars().take(50).collect();
        let html = format!(
            "<p><strong>{}</strong> &lt;{}&gt; wrote:</p><p>{}</p>",
            contact.name, contact.email, contact.message
        );
        if let Err(e) = self.mailer.send(admin, &format!("New contact: {}", subject), &html).await {
            error!("Could not notify admin about contact {}: {}", contact.id, e);
        }
    }

    /// Messages newest first
    pub async fn list(&self, pagination: Pagination, unread_only: bool) -> AppResult<Vec<ContactMessage>> {
        let mut messages = self.messages.filter(|m| !unread_only || !m.is_read).await?;
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(pagination.apply(messages))
    }

    /// Get a message by id
    pub async fn get(&self, id: u64) -> AppResult<Option<ContactMessage>> {
        Ok(self.messages.get(id).await?)
    }

    /// Set the read flag
    pub async fn mark_read(&self, id: u64, is_read: bool) -> AppResult<Option<ContactMessage>> {
        let _guard = self.write_lock.lock().await;
        let Some(mut contact) = self.messages.get(id).await? else {
            return Ok(None);
        };
        contact.is_read = is_read;
        contact.read_at = if is_read { Some(self.clock.now()) } else { None };
        self.messages.put(&contact).await?;
        info!("Contact {} marked as {}", id, if is_read { "read" } else { "unread" });
        Ok(Some(contact))
    }

    /// Delete a message
    pub async fn delete(&self, id: u64) -> AppResult<bool> {
        let _guard = self.write_lock.lock().await;
        let deleted = self.messages.delete(id).await?;
        if deleted {
            info!("Contact {} deleted", id);
        }
        Ok(deleted)
    }

    /// Mail a reply to the sender and mark the message read
    pub async fn reply(&self, id: u64, content: &str, admin_name: &str) -> AppResult<ContactReply> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::InvalidInput("reply_content cannot be empty".to_string()));
        }
        let contact = self.get(id).await?.ok_or_else(Self::not_found)?;

        let html = format!(
            "<p>Hi {},</p><p>{}</p><p>{}<br/>Ethernity DAO</p><hr/><blockquote>{}</blockquote>",
            contact.name, content, admin_name, contact.message
        );
        self.mailer.send(&contact.email, &format!("Re: {}", contact.subject), &html).await?;
        self.mark_read(id, true).await?;

        Ok(ContactReply {
            message: "Reply sent successfully".to_string(),
            contact_id: id,
            recipient: contact.email,
        })
    }

    /// Inbox figures
    pub async fn stats(&self) -> AppResult<ContactStats> {
        let messages = self.messages.all().await?;
        let since = self.clock.now() - Duration::days(7);
        let unread = messages.iter().filter(|m| !m.is_read).count();
        Ok(ContactStats {
            total: messages.len(),
            unread,
            read: messages.len() - unread,
            last_7_days: messages.iter().filter(|m| m.timestamp >= since).count(),
        })
    }

    /// Unread messages
    pub async fn unread_count(&self) -> AppResult<usize> {
        Ok(self.messages.count(|m| !m.is_read).await?)
    }

    /// Messages received within the last `days` days, newest first
    pub async fn recent(&self, days: i64) -> AppResult<Vec<ContactMessage>> {
        let since = self.clock.now() - Duration::days(days);
        let mut messages = self.messages.filter(|m| m.timestamp >= since).await?;
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::LogMailer;
    use chrono::TimeZone;
    use ethernity_core::config::MailConfig;
    use ethernity_core::{ManualClock, MemoryStorage};

    fn submission() -> ContactMessageCreate {
        ContactMessageCreate {
            name: "  Ana Torres ".to_string(),
            email: "Ana@Example.com".to_string(),
            subject: "Question about the retirement fund and its timelock".to_string(),
            message: "How long does the timelock last for a new fund?".to_string(),
        }
    }

    fn setup() -> (ContactManager, Arc<LogMailer>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 4, 10, 10, 0, 0).unwrap()));
        let mailer = Arc::new(LogMailer::new(&MailConfig::default(), clock.clone()));
        let manager = ContactManager::new(
            Arc::new(MemoryStorage::new()),
            mailer.clone(),
            Some("admin@ethernity.dao".to_string()),
            clock.clone(),
        );
        (manager, mailer, clock)
    }

    #[tokio::test]
    async fn test_create_validates_and_mails() {
        let (manager, mailer, _) = setup();

        let mut short = submission();
        short.message = "  too short  ".to_string();
        assert!(manager.create(short, ClientInfo::default()).await.is_err());

        let client = ClientInfo { ip_address: Some("10.0.0.1".to_string()), user_agent: None };
        let contact = manager.create(submission(), client).await.unwrap();
        assert_eq!(contact.name, "Ana Torres");
        assert_eq!(contact.email, "ana@example.com");
        assert_eq!(contact.ip_address.as_deref(), Some("10.0.0.1"));

        let outbox = mailer.outbox().await;
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox[0].to, "ana@example.com");
        assert_eq!(outbox[1].subject, "New contact: Question about the retirement fund and its timeloc");
    }

    #[tokio::test]
    async fn test_reply_and_stats() {
        let (manager, mailer, clock) = setup();
        let old = manager.create(submission(), ClientInfo::default()).await.unwrap();
        clock.advance(Duration::days(10));
        let recent = manager.create(submission(), ClientInfo::default()).await.unwrap();

        let reply = manager.reply(old.id, "Fifteen years by default.", "Marta").await.unwrap();
        assert_eq!(reply.recipient, "ana@example.com");
        assert_eq!(mailer.outbox().await.last().unwrap().subject, format!("Re: {}", old.subject));
        assert!(matches!(manager.reply(42, "Hello", "Marta").await, Err(AppError::NotFound(_))));

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats, ContactStats { total: 2, unread: 1, read: 1, last_7_days: 1 });
        assert_eq!(manager.unread_count().await.unwrap(), 1);
        assert_eq!(manager.recent(7).await.unwrap()[0].id, recent.id);

        let unread = manager.list(Pagination::default(), true).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert!(manager.delete(old.id).await.unwrap());
        assert!(manager.get(old.id).await.unwrap().is_none());
    }
}
