//! GERAS governance token
//!
//! Every fund owner holds one GERAS token. A holder must record activity each
//! month: on the burn day, tokens of holders without activity are burned, and
//! on the renew day, burned holders that became active again get a new token.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use ethernity_core::config::TokenConfig;
use ethernity_core::storage::id_key;
use ethernity_core::utils::{
    days_until_burn, days_until_renew, is_transaction_hash, next_burn_date, next_renew_date, normalize_wallet,
    validation::validate_string_length,
};
use ethernity_core::{Clock, Collection, Pagination, Record, Storage};

use crate::{EconomicError, EconomicResult};

/// Kinds of token activity recorded by the backend itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenActivityType {
    Minted,
    Burned,
    Renewed,
    ProposalCreated,
    VoteCast,
    EarlyRetirementRequested,
    EarlyRetirementApproved,
    FundDeposit,
    FundWithdrawal,
}

impl TokenActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenActivityType::Minted => "minted",
            TokenActivityType::Burned => "burned",
            TokenActivityType::Renewed => "renewed",
            TokenActivityType::ProposalCreated => "proposal_created",
            TokenActivityType::VoteCast => "vote_cast",
            TokenActivityType::EarlyRetirementRequested => "early_retirement_requested",
            TokenActivityType::EarlyRetirementApproved => "early_retirement_approved",
            TokenActivityType::FundDeposit => "fund_deposit",
            TokenActivityType::FundWithdrawal => "fund_withdrawal",
        }
    }
}

impl fmt::Display for TokenActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A GERAS token holder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenHolder {
    pub id: u64,
    pub user_id: u64,
    /// Lowercase wallet address, unique
    pub wallet_address: String,
    pub balance: Decimal,
    pub is_active: bool,
    pub has_activity_this_month: bool,
    pub last_activity_timestamp: Option<DateTime<Utc>>,
    pub last_activity_type: Option<String>,
    pub burned_this_month: bool,
    pub renewed_this_month: bool,
    pub total_burns: u32,
    pub total_renews: u32,
    pub holder_since: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for TokenHolder {
    const COLLECTION: &'static str = "token_holders";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

/// A recorded token activity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenActivity {
    pub id: u64,
    pub user_id: u64,
    pub wallet_address: String,
    pub activity_type: String,
    pub description: Option<String>,
    pub transaction_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for TokenActivity {
    const COLLECTION: &'static str = "token_activities";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

/// Activity submitted for a holder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenActivityCreate {
    pub activity_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

impl TokenActivityCreate {
    /// Activity of a known type with a description
    pub fn new(activity_type: TokenActivityType, description: impl Into<String>) -> Self {
        Self {
            activity_type: activity_type.to_string(),
            description: Some(description.into()),
            transaction_hash: None,
        }
    }

    /// Attach a transaction hash
    pub fn with_transaction(mut self, hash: impl Into<String>) -> Self {
        self.transaction_hash = Some(hash.into());
        self
    }

    fn validate(&self) -> EconomicResult<()> {
        validate_string_length(&self.activity_type, 1, 64, "activity_type")?;
        if let Some(hash) = &self.transaction_hash {
            if !is_transaction_hash(hash) {
                return Err(EconomicError::InvalidInput(
                    "transaction_hash must be 0x followed by 64 hex characters".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Burn and renew counts for one calendar month
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenMonthlyStats {
    pub year: i32,
    pub month: u32,
    pub total_burned: Decimal,
    pub holders_burned: u32,
    pub burn_executed_at: Option<DateTime<Utc>>,
    pub total_renewed: Decimal,
    pub holders_renewed: u32,
    pub renew_executed_at: Option<DateTime<Utc>>,
}

impl TokenMonthlyStats {
    fn empty(year: i32, month: u32) -> Self {
        Self {
            year,
            month,
            total_burned: Decimal::ZERO,
            holders_burned: 0,
            burn_executed_at: None,
            total_renewed: Decimal::ZERO,
            holders_renewed: 0,
            renew_executed_at: None,
        }
    }

    fn month_key(year: i32, month: u32) -> String {
        format!("{:04}-{:02}", year, month)
    }
}

impl Record for TokenMonthlyStats {
    const COLLECTION: &'static str = "token_monthly_stats";

    fn key(&self) -> String {
        Self::month_key(self.year, self.month)
    }
}

/// Token-wide figures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenStats {
    pub total_holders: usize,
    pub active_holders: usize,
    /// One token per active holder
    pub total_supply: Decimal,
    pub current_month_burns: u32,
    pub current_month_renews: u32,
}

/// Upcoming burn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BurnInfo {
    pub days_until_burn: i64,
    pub burn_day: u32,
    pub holders_at_risk: usize,
    pub next_burn_date: NaiveDate,
}

/// Upcoming renewal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenewInfo {
    pub days_until_renew: i64,
    pub renew_day: u32,
    pub eligible_holders: usize,
    pub next_renew_date: NaiveDate,
}

/// Manages GERAS holders and their activity
pub struct TokenManager {
    holders: Collection<TokenHolder>,
    activities: Collection<TokenActivity>,
    monthly: Collection<TokenMonthlyStats>,
    config: TokenConfig,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl TokenManager {
    /// Create a new token manager
    pub fn new(storage: Arc<dyn Storage>, config: TokenConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            holders: Collection::new(storage.clone()),
            activities: Collection::new(storage.clone()),
            monthly: Collection::new(storage),
            config,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Token calendar settings
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Holder for a wallet, if any
    pub async fn holder(&self, wallet: &str) -> EconomicResult<Option<TokenHolder>> {
        let wallet = wallet.trim().to_lowercase();
        Ok(self.holders.find(|h| h.wallet_address == wallet).await?)
    }

    /// Holder for a wallet only when it currently holds an active token
    pub async fn active_holder(&self, wallet: &str) -> EconomicResult<Option<TokenHolder>> {
        Ok(self.holder(wallet).await?.filter(|h| h.is_active))
    }

    /// Number of holders with an active token
    pub async fn active_holder_count(&self) -> EconomicResult<usize> {
        Ok(self.holders.count(|h| h.is_active).await?)
    }

    /// Mint the token for a user's wallet
    pub async fn mint(&self, user_id: u64, wallet: &str) -> EconomicResult<TokenHolder> {
        let wallet = normalize_wallet(wallet)?;
        {
            let _guard = self.write_lock.lock().await;
            if self.holder(&wallet).await?.is_some() {
                return Err(EconomicError::AlreadyExists("Token already minted for this address".to_string()));
            }

            let now = self.clock.now();
            let holder = TokenHolder {
                id: self.holders.next_id().await?,
                user_id,
                wallet_address: wallet.clone(),
                balance: Decimal::ONE,
                is_active: true,
                has_activity_this_month: true,
                last_activity_timestamp: None,
                last_activity_type: None,
                burned_this_month: false,
                renewed_this_month: false,
                total_burns: 0,
                total_renews: 0,
                holder_since: now,
                updated_at: None,
            };
            self.holders.put(&holder).await?;
        }

        self.record_activity(&wallet, TokenActivityCreate::new(TokenActivityType::Minted, "GERAS token minted"))
            .await?;
        info!("Token minted for {}", wallet);
        self.require_holder(&wallet).await
    }

    async fn require_holder(&self, wallet: &str) -> EconomicResult<TokenHolder> {
        self.holder(wallet)
            .await?
            .ok_or_else(|| EconomicError::NotFound("Token holder not found".to_string()))
    }

    /// Record an activity, marking the holder active for this month
    pub async fn record_activity(&self, wallet: &str, activity: TokenActivityCreate) -> EconomicResult<TokenActivity> {
        activity.validate()?;

        let _guard = self.write_lock.lock().await;
        let mut holder = self.require_holder(wallet).await?;
        let now = self.clock.now();

        holder.has_activity_this_month = true;
        holder.last_activity_timestamp = Some(now);
        holder.last_activity_type = Some(activity.activity_type.clone());
        holder.updated_at = Some(now);
        self.holders.put(&holder).await?;

        let record = TokenActivity {
            id: self.activities.next_id().await?,
            user_id: holder.user_id,
            wallet_address: holder.wallet_address.clone(),
            activity_type: activity.activity_type,
            description: activity.description,
            transaction_hash: activity.transaction_hash,
            created_at: now,
        };
        self.activities.put(&record).await?;

        debug!("Activity recorded: {} for {}", record.activity_type, record.wallet_address);
        Ok(record)
    }

    /// Activities of a holder, newest first
    pub async fn holder_activities(&self, wallet: &str, pagination: Pagination) -> EconomicResult<Vec<TokenActivity>> {
        let wallet = wallet.trim().to_lowercase();
        let mut activities = self.activities.filter(|a| a.wallet_address == wallet).await?;
        activities.reverse();
        Ok(pagination.apply(activities))
    }

    /// All holders in mint order
    pub async fn holders(&self, pagination: Pagination, active_only: bool) -> EconomicResult<Vec<TokenHolder>> {
        let holders = self.holders.filter(|h| !active_only || h.is_active).await?;
        Ok(pagination.apply(holders))
    }

    /// Active holders that have not recorded activity this month
    pub async fn inactive_holders(&self) -> EconomicResult<Vec<TokenHolder>> {
        Ok(self.holders.filter(|h| h.is_active && !h.has_activity_this_month).await?)
    }

    /// Stats record for a month, if any burn or renew ran in it
    pub async fn monthly_stats(&self, year: i32, month: u32) -> EconomicResult<Option<TokenMonthlyStats>> {
        Ok(self.monthly.get_by_key(&TokenMonthlyStats::month_key(year, month)).await?)
    }

    async fn current_month_stats(&self) -> EconomicResult<TokenMonthlyStats> {
        let today = self.clock.today();
        Ok(self
            .monthly_stats(today.year(), today.month())
            .await?
            .unwrap_or_else(|| TokenMonthlyStats::empty(today.year(), today.month())))
    }

    /// Token-wide figures
    pub async fn stats(&self) -> EconomicResult<TokenStats> {
        let holders = self.holders.all().await?;
        let active = holders.iter().filter(|h| h.is_active).count();
        let month = self.current_month_stats().await?;
        Ok(TokenStats {
            total_holders: holders.len(),
            active_holders: active,
            total_supply: Decimal::from(active as u64),
            current_month_burns: month.holders_burned,
            current_month_renews: month.holders_renewed,
        })
    }

    /// Upcoming burn and the holders at risk
    pub async fn burn_info(&self) -> EconomicResult<BurnInfo> {
        let now = self.clock.now();
        Ok(BurnInfo {
            days_until_burn: days_until_burn(now, self.config.burn_day),
            burn_day: self.config.burn_day,
            holders_at_risk: self.inactive_holders().await?.len(),
            next_burn_date: next_burn_date(now, self.config.burn_day),
        })
    }

    /// Upcoming renewal and the holders eligible for it
    pub async fn renew_info(&self) -> EconomicResult<RenewInfo> {
        let now = self.clock.now();
        Ok(RenewInfo {
            days_until_renew: days_until_renew(now, self.config.renew_day),
            renew_day: self.config.renew_day,
            eligible_holders: self
                .holders
                .count(|h| h.is_active && h.has_activity_this_month)
                .await?,
            next_renew_date: next_renew_date(now, self.config.renew_day),
        })
    }

    /// Burn the token of every active holder without activity this month
    pub async fn execute_burn(&self) -> EconomicResult<usize> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();
        let targets = self.holders.filter(|h| h.is_active && !h.has_activity_this_month).await?;

        let mut burned = Decimal::ZERO;
        for mut holder in targets.iter().cloned() {
            burned += holder.balance;
            holder.is_active = false;
            holder.balance = Decimal::ZERO;
            holder.burned_this_month = true;
            holder.total_burns += 1;
            holder.updated_at = Some(now);
            self.holders.put(&holder).await?;
            self.push_activity(&holder, TokenActivityType::Burned, "Token burned for monthly inactivity", now)
                .await?;
        }

        let mut month = self.current_month_stats().await?;
        month.holders_burned += targets.len() as u32;
        month.total_burned += burned;
        month.burn_executed_at = Some(now);
        self.monthly.put(&month).await?;

        info!("Monthly burn executed: {} holders burned", targets.len());
        Ok(targets.len())
    }

    /// Renew burned holders that have recorded activity since, then reset monthly flags
    pub async fn execute_renew(&self) -> EconomicResult<usize> {
        let renewed = {
            let _guard = self.write_lock.lock().await;
            let now = self.clock.now();
            let targets = self.holders.filter(|h| !h.is_active && h.has_activity_this_month).await?;

            for mut holder in targets.iter().cloned() {
                holder.is_active = true;
                holder.balance = Decimal::ONE;
                holder.renewed_this_month = true;
                holder.total_renews += 1;
                holder.updated_at = Some(now);
                self.holders.put(&holder).await?;
                self.push_activity(&holder, TokenActivityType::Renewed, "Token renewed after new activity", now)
                    .await?;
            }

            let mut month = self.current_month_stats().await?;
            month.holders_renewed += targets.len() as u32;
            month.total_renewed += Decimal::from(targets.len() as u64);
            month.renew_executed_at = Some(now);
            self.monthly.put(&month).await?;
            targets.len()
        };

        self.reset_monthly_activity().await?;
        info!("Monthly renew executed: {} holders renewed", renewed);
        Ok(renewed)
    }

    /// Clear the monthly activity, burn and renew flags of every holder
    pub async fn reset_monthly_activity(&self) -> EconomicResult<()> {
        let _guard = self.write_lock.lock().await;
        for mut holder in self.holders.all().await? {
            holder.has_activity_this_month = false;
            holder.burned_this_month = false;
            holder.renewed_this_month = false;
            self.holders.put(&holder).await?;
        }
        info!("Monthly activity flags reset");
        Ok(())
    }

    /// Append an activity without touching the holder's monthly flag
    async fn push_activity(
        &self,
        holder: &TokenHolder,
        activity_type: TokenActivityType,
        description: &str,
        at: DateTime<Utc>,
    ) -> EconomicResult<()> {
        let record = TokenActivity {
            id: self.activities.next_id().await?,
            user_id: holder.user_id,
            wallet_address: holder.wallet_address.clone(),
            activity_type: activity_type.to_string(),
            description: Some(description.to_string()),
            transaction_hash: None,
            created_at: at,
        };
        self.activities.put(&record).await?;
        Ok(())
    }

    /// Activities created on the given date
    pub async fn activities_on(&self, date: NaiveDate) -> EconomicResult<Vec<TokenActivity>> {
        Ok(self.activities.filter(|a| a.created_at.date_naive() == date).await?)
    }
}
