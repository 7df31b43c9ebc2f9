//! Shared application state
//!
//! [`AppState`] wires every manager over one storage backend and one clock.
//! It is cloned into each request handler and background job.

use std::sync::Arc;

use ethernity_core::{Clock, MemoryStorage, Settings, Storage};
use ethernity_economic::{FundManager, PreferenceManager, ProtocolManager, TokenManager, TreasuryManager};
use ethernity_governance::GovernanceManager;
use ethernity_identity::{AdminAuth, JwtManager, UserManager};
use ethernity_ledger::{ChainSource, ContractRegistry, EventListener, EventStore};

use crate::analytics::AnalyticsService;
use crate::api::rate_limit::RateLimiter;
use crate::contact::ContactManager;
use crate::mailer::{LogMailer, Mailer};
use crate::notifications::NotificationManager;
use crate::survey::SurveyManager;

/// Every manager the API and the jobs need
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub clock: Arc<dyn Clock>,
    pub storage: Arc<dyn Storage>,
    pub users: Arc<UserManager>,
    pub jwt: Arc<JwtManager>,
    pub admin: Arc<AdminAuth>,
    pub funds: Arc<FundManager>,
    pub tokens: Arc<TokenManager>,
    pub protocols: Arc<ProtocolManager>,
    pub preferences: Arc<PreferenceManager>,
    pub treasury: Arc<TreasuryManager>,
    pub governance: Arc<GovernanceManager>,
    pub events: Arc<EventStore>,
    /// Present only when a chain source is configured
    pub listener: Option<Arc<EventListener>>,
    pub notifications: Arc<NotificationManager>,
    pub contacts: Arc<ContactManager>,
    pub surveys: Arc<SurveyManager>,
    pub analytics: Arc<AnalyticsService>,
    pub mailer: Arc<dyn Mailer>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Build the state over `storage`
    pub fn new(
        settings: Settings,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        mailer: Arc<dyn Mailer>,
        chain: Option<Arc<dyn ChainSource>>,
    ) -> Self {
        let users = Arc::new(UserManager::new(storage.clone(), clock.clone()));
        let jwt = Arc::new(JwtManager::new(&settings.security, clock.clone()));
        let admin = Arc::new(AdminAuth::new(&settings.security, settings.is_development()));

        let funds = Arc::new(FundManager::new(
            storage.clone(),
            users.clone(),
            settings.fund.clone(),
            clock.clone(),
        ));
        let tokens = Arc::new(TokenManager::new(storage.clone(), settings.token.clone(), clock.clone()));
        let protocols = Arc::new(ProtocolManager::new(storage.clone(), clock.clone()));
        let preferences = Arc::new(PreferenceManager::new(
            storage.clone(),
            users.clone(),
            protocols.clone(),
            clock.clone(),
        ));
        let treasury = Arc::new(TreasuryManager::new(
            storage.clone(),
            users.clone(),
            funds.clone(),
            clock.clone(),
        ));
        let governance = Arc::new(GovernanceManager::new(
            storage.clone(),
            users.clone(),
            tokens.clone(),
            settings.governance.clone(),
            clock.clone(),
        ));

        let events = Arc::new(EventStore::new(storage.clone(), clock.clone()));
        let listener = chain.map(|chain| {
            Arc::new(EventListener::new(
                chain,
                events.clone(),
                ContractRegistry::from_config(&settings.blockchain),
                settings.blockchain.batch_size,
            ))
        });

        let notifications = Arc::new(NotificationManager::new(storage.clone(), users.clone(), clock.clone()));
        let contacts = Arc::new(ContactManager::new(
            storage.clone(),
            mailer.clone(),
            settings.mail.admin_address.clone(),
            clock.clone(),
        ));
        let surveys = Arc::new(SurveyManager::new(storage.clone(), clock.clone()));
        let analytics = Arc::new(AnalyticsService::new(
            storage.clone(),
            users.clone(),
            funds.clone(),
            tokens.clone(),
            governance.clone(),
            events.clone(),
            contacts.clone(),
            surveys.clone(),
            clock.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(&settings.rate_limit, clock.clone()));

        Self {
            settings: Arc::new(settings),
            clock,
            storage,
            users,
            jwt,
            admin,
            funds,
            tokens,
            protocols,
            preferences,
            treasury,
            governance,
            events,
            listener,
            notifications,
            contacts,
            surveys,
            analytics,
            mailer,
            rate_limiter,
        }
    }

    /// State over [`MemoryStorage`] with a logging mailer and no chain source
    pub fn in_memory(settings: Settings, clock: Arc<dyn Clock>) -> Self {
        let mailer = Arc::new(LogMailer::new(&settings.mail, clock.clone()));
        Self::new(settings, Arc::new(MemoryStorage::new()), clock, mailer, None)
    }

    /// Page size bounds from the settings
    pub fn page_bounds(&self) -> (usize, usize) {
        (
            self.settings.pagination.default_page_size,
            self.settings.pagination.max_page_size,
        )
    }
}
