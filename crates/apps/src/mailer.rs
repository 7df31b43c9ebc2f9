//! Outgoing mail
//!
//! Only a logging transport exists; it records every message in an in-memory
//! outbox so callers and tests can see what would have been sent.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use ethernity_core::config::MailConfig;
use ethernity_core::Clock;

use crate::AppResult;

/// A message handed to a [`Mailer`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub sent_at: DateTime<Utc>,
}

/// Mail transport
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send an HTML message
    async fn send(&self, to: &str, subject: &str, html: &str) -> AppResult<()>;
}

/// Mailer that logs messages instead of delivering them
pub struct LogMailer {
    from: String,
    enabled: bool,
    outbox: RwLock<Vec<OutgoingMail>>,
    clock: Arc<dyn Clock>,
}

impl LogMailer {
    /// Create a mailer from the mail settings
    pub fn new(config: &MailConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            from: config.from_address.clone(),
            enabled: config.enabled,
            outbox: RwLock::new(Vec::new()),
            clock,
        }
    }

    /// Messages sent so far, oldest first
    pub async fn outbox(&self) -> Vec<OutgoingMail> {
        self.outbox.read().await.clone()
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> AppResult<()> {
        if !self.enabled {
            debug!("Mail disabled, dropping \"{}\" to {}", subject, to);
            return Ok(());
        }

        info!("Mail to {}: {}", to, subject);
        self.outbox.write().await.push(OutgoingMail {
            from: self.from.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
            sent_at: self.clock.now(),
        });
        Ok(())
    }
}
