//! Wallet-based user profiles

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use ethernity_core::storage::id_key;
use ethernity_core::utils::{normalize_email, normalize_wallet};
use ethernity_core::{Clock, Collection, Pagination, Record, Storage};

use crate::{IdentityError, IdentityResult};

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "en".to_string()
}

/// A registered user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: u64,
    /// Lowercase wallet address, unique
    pub wallet_address: String,
    /// Lowercase email, unique when present
    pub email: Option<String>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub email_verified: bool,
    pub accepts_marketing: bool,
    pub accepts_notifications: bool,
    pub preferred_language: String,
    pub registration_date: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub last_email_sent: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_banned: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for User {
    const COLLECTION: &'static str = "users";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreate {
    pub wallet_address: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub accepts_marketing: bool,
    #[serde(default = "default_true")]
    pub accepts_notifications: bool,
    #[serde(default = "default_language")]
    pub preferred_language: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl UserCreate {
    /// Minimal registration for a wallet
    pub fn for_wallet(wallet_address: impl Into<String>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            email: None,
            username: None,
            full_name: None,
            accepts_marketing: false,
            accepts_notifications: true,
            preferred_language: default_language(),
            ip_address: None,
            user_agent: None,
        }
    }
}

/// Partial profile update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub accepts_marketing: Option<bool>,
    pub accepts_notifications: Option<bool>,
    pub preferred_language: Option<String>,
}

/// Email association request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAssociation {
    /// Wallet address
    pub address: String,
    pub email: String,
    #[serde(default)]
    pub accepts_marketing: bool,
    #[serde(default = "default_true")]
    pub accepts_notifications: bool,
}

/// Aggregate user counts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStats {
    pub total_users: usize,
    pub active_users: usize,
    pub users_with_email: usize,
    pub marketing_subscribers: usize,
    pub banned_users: usize,
}

/// Manages user profiles
pub struct UserManager {
    users: Collection<User>,
    clock: Arc<dyn Clock>,
    /// Serializes uniqueness checks with the writes that follow them
    write_lock: Mutex<()>,
}

impl UserManager {
    /// Create a new user manager
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            users: Collection::new(storage),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Get a user by id
    pub async fn get(&self, id: u64) -> IdentityResult<Option<User>> {
        Ok(self.users.get(id).await?)
    }

    /// Get a user by id, failing when absent
    pub async fn require(&self, id: u64) -> IdentityResult<User> {
        self.get(id).await?.ok_or(IdentityError::UserNotFound)
    }

    /// Get a user by wallet address (case-insensitive)
    pub async fn get_by_wallet(&self, wallet: &str) -> IdentityResult<Option<User>> {
        let wallet = wallet.trim().to_lowercase();
        Ok(self.users.find(|u| u.wallet_address == wallet).await?)
    }

    /// Get a user by wallet address, failing when absent
    pub async fn require_by_wallet(&self, wallet: &str) -> IdentityResult<User> {
        self.get_by_wallet(wallet).await?.ok_or(IdentityError::UserNotFound)
    }

    /// Get a user by email (case-insensitive)
    pub async fn get_by_email(&self, email: &str) -> IdentityResult<Option<User>> {
        let email = email.trim().to_lowercase();
        Ok(self.users.find(|u| u.email.as_deref() == Some(email.as_str())).await?)
    }

    fn new_user(&self, id: u64, wallet_address: String) -> User {
        let now = self.clock.now();
        User {
            id,
            wallet_address,
            email: None,
            username: None,
            full_name: None,
            email_verified: false,
            accepts_marketing: false,
            accepts_notifications: true,
            preferred_language: default_language(),
            registration_date: now,
            last_login: Some(now),
            last_email_sent: None,
            is_active: true,
            is_banned: false,
            ip_address: None,
            user_agent: None,
            created_at: now,
            updated_at: None,
        }
    }

    /// Register a new wallet
    pub async fn register(&self, data: UserCreate) -> IdentityResult<User> {
        let wallet = normalize_wallet(&data.wallet_address)?;
        let email = data.email.as_deref().map(normalize_email).transpose()?;

        let _guard = self.write_lock.lock().await;
        if self.get_by_wallet(&wallet).await?.is_some() {
            return Err(IdentityError::WalletAlreadyRegistered(wallet));
        }
        if let Some(email) = &email {
            if self.get_by_email(email).await?.is_some() {
                return Err(IdentityError::EmailAlreadyRegistered(email.clone()));
            }
        }

        let id = self.users.next_id().await?;
        let mut user = self.new_user(id, wallet);
        user.email = email;
        user.username = data.username;
        user.full_name = data.full_name;
        user.accepts_marketing = data.accepts_marketing;
        user.accepts_notifications = data.accepts_notifications;
        user.preferred_language = data.preferred_language;
        user.ip_address = data.ip_address;
        user.user_agent = data.user_agent;
        self.users.put(&user).await?;

        info!("User registered: {}", user.wallet_address);
        Ok(user)
    }

    /// Attach an email to a wallet, creating the user if needed
    pub async fn associate_email(&self, association: EmailAssociation) -> IdentityResult<User> {
        let wallet = normalize_wallet(&association.address)?;
        let email = normalize_email(&association.email)?;

        let _guard = self.write_lock.lock().await;
        if let Some(owner) = self.get_by_email(&email).await? {
            if owner.wallet_address != wallet {
                return Err(IdentityError::EmailInUse(email));
            }
        }

        let user = match self.get_by_wallet(&wallet).await? {
            Some(mut user) => {
                user.email = Some(email);
                user.accepts_marketing = association.accepts_marketing;
                user.accepts_notifications = association.accepts_notifications;
                user.updated_at = Some(self.clock.now());
                info!("Email updated for wallet {}", wallet);
                user
            }
            None => {
                let id = self.users.next_id().await?;
                let mut user = self.new_user(id, wallet);
                user.email = Some(email);
                user.accepts_marketing = association.accepts_marketing;
                user.accepts_notifications = association.accepts_notifications;
                info!("User created from email association: {}", user.wallet_address);
                user
            }
        };
        self.users.put(&user).await?;
        Ok(user)
    }

    /// Apply a partial update; returns `None` for an unknown id
    pub async fn update(&self, id: u64, update: UserUpdate) -> IdentityResult<Option<User>> {
        let _guard = self.write_lock.lock().await;
        let mut user = match self.users.get(id).await? {
            Some(user) => user,
            None => return Ok(None),
        };

        if let Some(email) = update.email {
            let email = normalize_email(&email)?;
            if let Some(owner) = self.get_by_email(&email).await? {
                if owner.id != id {
                    return Err(IdentityError::EmailAlreadyRegistered(email));
                }
            }
            user.email = Some(email);
        }
        if let Some(username) = update.username {
            user.username = Some(username);
        }
        if let Some(full_name) = update.full_name {
            user.full_name = Some(full_name);
        }
        if let Some(accepts_marketing) = update.accepts_marketing {
            user.accepts_marketing = accepts_marketing;
        }
        if let Some(accepts_notifications) = update.accepts_notifications {
            user.accepts_notifications = accepts_notifications;
        }
        if let Some(language) = update.preferred_language {
            user.preferred_language = language;
        }
        user.updated_at = Some(self.clock.now());
        self.users.put(&user).await?;

        debug!("User {} updated", id);
        Ok(Some(user))
    }

    /// Record a login for the wallet; returns `None` for an unknown wallet
    pub async fn update_last_login(&self, wallet: &str) -> IdentityResult<Option<User>> {
        let _guard = self.write_lock.lock().await;
        let mut user = match self.get_by_wallet(wallet).await? {
            Some(user) => user,
            None => return Ok(None),
        };
        user.last_login = Some(self.clock.now());
        self.users.put(&user).await?;
        Ok(Some(user))
    }

    /// All users in registration order
    pub async fn list(&self, pagination: Pagination) -> IdentityResult<Vec<User>> {
        Ok(pagination.apply(self.users.all().await?))
    }

    /// Users reachable by email: active, not banned, optionally filtered further
    pub async fn mailing_list(&self, accepts_marketing: bool, email_verified: bool) -> IdentityResult<Vec<User>> {
        Ok(self
            .users
            .filter(|u| {
                u.email.is_some()
                    && u.is_active
                    && !u.is_banned
                    && (!accepts_marketing || u.accepts_marketing)
                    && (!email_verified || u.email_verified)
            })
            .await?)
    }

    /// Case-insensitive substring search over wallet, email and username
    pub async fn search(&self, term: &str, pagination: Pagination) -> IdentityResult<Vec<User>> {
        let term = term.trim().to_lowercase();
        let contains = |value: Option<&str>| value.map_or(false, |v| v.to_lowercase().contains(&term));
        let matches = self
            .users
            .filter(|u| {
                u.wallet_address.contains(&term)
                    || contains(u.email.as_deref())
                    || contains(u.username.as_deref())
            })
            .await?;
        Ok(pagination.apply(matches))
    }

    /// Stamp the time of the last email sent to a user
    pub async fn mark_email_sent(&self, id: u64) -> IdentityResult<Option<User>> {
        let _guard = self.write_lock.lock().await;
        let mut user = match self.users.get(id).await? {
            Some(user) => user,
            None => return Ok(None),
        };
        user.last_email_sent = Some(self.clock.now());
        self.users.put(&user).await?;
        Ok(Some(user))
    }

    /// Number of users
    pub async fn count(&self) -> IdentityResult<usize> {
        Ok(self.users.len().await?)
    }

    /// Aggregate counts
    pub async fn stats(&self) -> IdentityResult<UserStats> {
        let users = self.users.all().await?;
        Ok(UserStats {
            total_users: users.len(),
            active_users: users.iter().filter(|u| u.is_active).count(),
            users_with_email: users.iter().filter(|u| u.email.is_some()).count(),
            marketing_subscribers: users.iter().filter(|u| u.accepts_marketing).count(),
            banned_users: users.iter().filter(|u| u.is_banned).count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use ethernity_core::{ManualClock, MemoryStorage};

    const WALLET: &str = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    const OTHER: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn setup() -> (UserManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()));
        let manager = UserManager::new(Arc::new(MemoryStorage::new()), clock.clone());
        (manager, clock)
    }

    #[tokio::test]
    async fn test_register_normalizes_and_rejects_duplicates() {
        let (users, _) = setup();
        let mut create = UserCreate::for_wallet(WALLET);
        create.email = Some("Ana@Example.com".to_string());
        let user = users.register(create).await.unwrap();

        assert_eq!(user.id, 1);
        assert_eq!(user.wallet_address, WALLET.to_lowercase());
        assert_eq!(user.email.as_deref(), Some("ana@example.com"));
        assert!(user.last_login.is_some());

        let err = users.register(UserCreate::for_wallet(WALLET.to_lowercase())).await.unwrap_err();
        assert!(matches!(err, IdentityError::WalletAlreadyRegistered(_)));

        let mut dup_email = UserCreate::for_wallet(OTHER);
        dup_email.email = Some("ANA@example.com".to_string());
        let err = users.register(dup_email).await.unwrap_err();
        assert!(matches!(err, IdentityError::EmailAlreadyRegistered(_)));

        assert!(users.register(UserCreate::for_wallet("0x1234")).await.is_err());
    }

    #[tokio::test]
    async fn test_associate_email() {
        let (users, _) = setup();
        let created = users
            .associate_email(EmailAssociation {
                address: WALLET.to_string(),
                email: "ana@example.com".to_string(),
                accepts_marketing: true,
                accepts_notifications: true,
            })
            .await
            .unwrap();
        assert!(created.accepts_marketing);

        // Same wallet can re-associate
        let updated = users
            .associate_email(EmailAssociation {
                address: WALLET.to_string(),
                email: "ana@example.com".to_string(),
                accepts_marketing: false,
                accepts_notifications: false,
            })
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert!(!updated.accepts_notifications);

        let err = users
            .associate_email(EmailAssociation {
                address: OTHER.to_string(),
                email: "ana@example.com".to_string(),
                accepts_marketing: false,
                accepts_notifications: true,
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email ana@example.com is already associated with another wallet");
    }

    #[tokio::test]
    async fn test_update_login_and_search() {
        let (users, clock) = setup();
        let user = users.register(UserCreate::for_wallet(WALLET)).await.unwrap();
        users.register(UserCreate::for_wallet(OTHER)).await.unwrap();

        let updated = users
            .update(user.id, UserUpdate { username: Some("RetireEarly".into()), ..Default::default() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.username.as_deref(), Some("RetireEarly"));
        assert!(users.update(99, UserUpdate::default()).await.unwrap().is_none());

        clock.advance(Duration::hours(3));
        let logged_in = users.update_last_login(WALLET).await.unwrap().unwrap();
        assert_eq!(logged_in.last_login, Some(clock.now()));

        let found = users.search("retire", Pagination::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(users.search("0x", Pagination::new(1, 10)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mailing_list_and_stats() {
        let (users, _) = setup();
        let mut a = UserCreate::for_wallet(WALLET);
        a.email = Some("a@example.com".into());
        a.accepts_marketing = true;
        users.register(a).await.unwrap();
        let mut b = UserCreate::for_wallet(OTHER);
        b.email = Some("b@example.com".into());
        users.register(b).await.unwrap();

        assert_eq!(users.mailing_list(false, false).await.unwrap().len(), 2);
        assert_eq!(users.mailing_list(true, false).await.unwrap().len(), 1);
        assert!(users.mailing_list(false, true).await.unwrap().is_empty());

        let stats = users.stats().await.unwrap();
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.users_with_email, 2);
        assert_eq!(stats.marketing_subscribers, 1);
        assert_eq!(stats.banned_users, 0);

        let marked = users.mark_email_sent(1).await.unwrap().unwrap();
        assert!(marked.last_email_sent.is_some());
    }
}
