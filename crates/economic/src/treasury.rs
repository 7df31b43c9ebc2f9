//! Fee treasury and early retirement requests
//!
//! Deposit fees accumulate in the treasury and can only leave it through an
//! executed treasury proposal. Fund owners in hardship may ask the treasury to
//! approve an early retirement, which lifts the fund's timelock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use ethernity_core::storage::id_key;
use ethernity_core::utils::{is_transaction_hash, normalize_wallet, validation::validate_string_length};
use ethernity_core::{Clock, Collection, Pagination, Record, Storage};
use ethernity_identity::UserManager;

use crate::funds::FundManager;
use crate::{EconomicError, EconomicResult};

const STATS_KEY: &str = "current";

/// Owner request to retire before the timelock ends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EarlyRetirementRequest {
    pub id: u64,
    pub fund_id: u64,
    pub fund_address: String,
    pub requester_id: u64,
    pub requester_address: String,
    pub proposal_id: Option<u64>,
    pub reason: String,
    pub approved: bool,
    pub rejected: bool,
    pub processed: bool,
    pub votes_for: Decimal,
    pub votes_against: Decimal,
    pub request_timestamp: DateTime<Utc>,
    pub processed_timestamp: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub transaction_hash: Option<String>,
}

impl Record for EarlyRetirementRequest {
    const COLLECTION: &'static str = "early_retirement_requests";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

/// Fees paid by one fund
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundFeeRecord {
    pub id: u64,
    pub fund_id: u64,
    pub fund_address: String,
    pub total_fees_paid: Decimal,
    pub fee_count: u32,
    pub last_fee_timestamp: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Record for FundFeeRecord {
    const COLLECTION: &'static str = "fund_fees";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

/// Money leaving the treasury through governance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreasuryWithdrawal {
    pub id: u64,
    pub proposal_id: u64,
    pub recipient_address: String,
    pub amount: Decimal,
    pub purpose: String,
    pub approved_by_governance: bool,
    pub executed: bool,
    pub requested_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl Record for TreasuryWithdrawal {
    const COLLECTION: &'static str = "treasury_withdrawals";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

/// Running treasury totals (singleton)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreasuryStats {
    /// Fees currently held
    pub total_fees_collected_usdc: Decimal,
    pub total_fees_collected_all_time: Decimal,
    pub total_fees_withdrawn: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for TreasuryStats {
    fn default() -> Self {
        Self {
            total_fees_collected_usdc: Decimal::ZERO,
            total_fees_collected_all_time: Decimal::ZERO,
            total_fees_withdrawn: Decimal::ZERO,
            updated_at: None,
        }
    }
}

impl Record for TreasuryStats {
    const COLLECTION: &'static str = "treasury_stats";

    fn key(&self) -> String {
        STATS_KEY.to_string()
    }
}

/// Treasury totals plus request and fund counts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreasuryStatsReport {
    pub total_fees_collected_usdc: Decimal,
    pub total_fees_collected_all_time: Decimal,
    pub total_fees_withdrawn: Decimal,
    pub total_funds_registered: usize,
    pub active_funds_count: usize,
    pub total_early_retirement_requests: usize,
    pub approved_early_retirements: usize,
    pub rejected_early_retirements: usize,
    pub pending_requests_count: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Manages fees, early retirement requests and treasury withdrawals
pub struct TreasuryManager {
    requests: Collection<EarlyRetirementRequest>,
    fees: Collection<FundFeeRecord>,
    withdrawals: Collection<TreasuryWithdrawal>,
    stats: Collection<TreasuryStats>,
    users: Arc<UserManager>,
    funds: Arc<FundManager>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl TreasuryManager {
    /// Create a new treasury manager
    pub fn new(
        storage: Arc<dyn Storage>,
        users: Arc<UserManager>,
        funds: Arc<FundManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            requests: Collection::new(storage.clone()),
            fees: Collection::new(storage.clone()),
            withdrawals: Collection::new(storage.clone()),
            stats: Collection::new(storage),
            users,
            funds,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    fn request_not_found() -> EconomicError {
        EconomicError::NotFound("Request not found".to_string())
    }

    /// Ask for early retirement of a fund owned by `wallet`
    pub async fn create_request(&self, wallet: &str, fund_address: &str, reason: &str) -> EconomicResult<EarlyRetirementRequest> {
        let fund_address = normalize_wallet(fund_address)?;
        let reason = reason.trim();
        validate_string_length(reason, 10, 512, "reason")?;

        let user = self.users.get_by_wallet(wallet).await?.ok_or(EconomicError::UserNotFound)?;
        let fund = self
            .funds
            .get_by_address(&fund_address)
            .await?
            .filter(|f| f.owner_id == user.id)
            .ok_or_else(|| EconomicError::NotFound("Fund not found or not owned by user".to_string()))?;
        if fund.retirement_started {
            return Err(EconomicError::InvalidState("Fund already in retirement".to_string()));
        }

        let _guard = self.write_lock.lock().await;
        if self.requests.find(|r| r.fund_id == fund.id && !r.processed).await?.is_some() {
            return Err(EconomicError::AlreadyExists(
                "Pending early retirement request already exists".to_string(),
            ));
        }

        let request = EarlyRetirementRequest {
            id: self.requests.next_id().await?,
            fund_id: fund.id,
            fund_address,
            requester_id: user.id,
            requester_address: user.wallet_address,
            proposal_id: None,
            reason: reason.to_string(),
            approved: false,
            rejected: false,
            processed: false,
            votes_for: Decimal::ZERO,
            votes_against: Decimal::ZERO,
            request_timestamp: self.clock.now(),
            processed_timestamp: None,
            rejection_reason: None,
            transaction_hash: None,
        };
        self.requests.put(&request).await?;

        info!("Early retirement requested for fund {}", request.fund_address);
        Ok(request)
    }

    /// Get a request by id
    pub async fn get_request(&self, id: u64) -> EconomicResult<Option<EarlyRetirementRequest>> {
        Ok(self.requests.get(id).await?)
    }

    /// Most recent request for a fund
    pub async fn request_by_fund(&self, fund_address: &str) -> EconomicResult<Option<EarlyRetirementRequest>> {
        let fund_address = fund_address.trim().to_lowercase();
        let requests = self.requests.filter(|r| r.fund_address == fund_address).await?;
        Ok(requests.into_iter().last())
    }

    /// Requests newest first
    pub async fn list_requests(&self, pagination: Pagination, pending_only: bool) -> EconomicResult<Vec<EarlyRetirementRequest>> {
        let mut requests = self.requests.filter(|r| !pending_only || !r.processed).await?;
        requests.reverse();
        Ok(pagination.apply(requests))
    }

    /// Approve a request and lift the fund's timelock
    pub async fn approve(&self, id: u64, tx_hash: &str) -> EconomicResult<EarlyRetirementRequest> {
        if !is_transaction_hash(tx_hash) {
            return Err(EconomicError::InvalidInput(
                "transaction_hash must be 0x followed by 64 hex characters".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        let mut request = self.requests.get(id).await?.ok_or_else(Self::request_not_found)?;
        if request.processed {
            return Err(EconomicError::InvalidState("Request already processed".to_string()));
        }

        self.funds.approve_early_retirement(request.fund_id).await?;
        request.approved = true;
        request.processed = true;
        request.processed_timestamp = Some(self.clock.now());
        request.transaction_hash = Some(tx_hash.to_string());
        self.requests.put(&request).await?;

        info!("Early retirement approved for fund {}", request.fund_address);
        Ok(request)
    }

    /// Reject a request
    pub async fn reject(&self, id: u64, reason: &str) -> EconomicResult<EarlyRetirementRequest> {
        let _guard = self.write_lock.lock().await;
        let mut request = self.requests.get(id).await?.ok_or_else(Self::request_not_found)?;
        if request.processed {
            return Err(EconomicError::InvalidState("Request already processed".to_string()));
        }

        request.rejected = true;
        request.processed = true;
        request.processed_timestamp = Some(self.clock.now());
        request.rejection_reason = Some(reason.trim().to_string());
        self.requests.put(&request).await?;

        info!("Early retirement rejected for fund {}", request.fund_address);
        Ok(request)
    }

    async fn load_stats(&self) -> EconomicResult<TreasuryStats> {
        Ok(self.stats.get_by_key(STATS_KEY).await?.unwrap_or_default())
    }

    /// Treasury totals plus request and fund counts
    pub async fn stats(&self) -> EconomicResult<TreasuryStatsReport> {
        let totals = self.load_stats().await?;
        let requests = self.requests.all().await?;
        let funds = self.funds.all().await?;
        Ok(TreasuryStatsReport {
            total_fees_collected_usdc: totals.total_fees_collected_usdc,
            total_fees_collected_all_time: totals.total_fees_collected_all_time,
            total_fees_withdrawn: totals.total_fees_withdrawn,
            total_funds_registered: funds.len(),
            active_funds_count: funds.iter().filter(|f| f.initialized && !f.retirement_started).count(),
            total_early_retirement_requests: requests.len(),
            approved_early_retirements: requests.iter().filter(|r| r.approved).count(),
            rejected_early_retirements: requests.iter().filter(|r| r.rejected).count(),
            pending_requests_count: requests.iter().filter(|r| !r.processed).count(),
            updated_at: totals.updated_at,
        })
    }

    /// Record a fee paid by a fund
    pub async fn record_fee(&self, fund_address: &str, amount: Decimal, tx_hash: &str) -> EconomicResult<FundFeeRecord> {
        let fund_address = normalize_wallet(fund_address)?;
        if amount <= Decimal::ZERO {
            return Err(EconomicError::InvalidInput("amount must be greater than zero".to_string()));
        }

        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();
        let mut record = match self.fees.find(|f| f.fund_address == fund_address).await? {
            Some(record) => record,
            None => {
                let fund = self
                    .funds
                    .get_by_address(&fund_address)
                    .await?
                    .ok_or_else(|| EconomicError::NotFound("Fund not found".to_string()))?;
                FundFeeRecord {
                    id: self.fees.next_id().await?,
                    fund_id: fund.id,
                    fund_address: fund_address.clone(),
                    total_fees_paid: Decimal::ZERO,
                    fee_count: 0,
                    last_fee_timestamp: None,
                    is_active: true,
                }
            }
        };
        record.total_fees_paid += amount;
        record.fee_count += 1;
        record.last_fee_timestamp = Some(now);
        self.fees.put(&record).await?;

        let mut totals = self.load_stats().await?;
        totals.total_fees_collected_usdc += amount;
        totals.total_fees_collected_all_time += amount;
        totals.updated_at = Some(now);
        self.stats.put(&totals).await?;

        info!("Fee recorded: {} from {} ({})", amount, fund_address, tx_hash);
        Ok(record)
    }

    /// Fee record of a fund
    pub async fn fund_fees(&self, fund_address: &str) -> EconomicResult<Option<FundFeeRecord>> {
        let fund_address = fund_address.trim().to_lowercase();
        Ok(self.fees.find(|f| f.fund_address == fund_address).await?)
    }

    /// Fee records, largest payers first
    pub async fn all_fees(&self, pagination: Pagination) -> EconomicResult<Vec<FundFeeRecord>> {
        let mut records = self.fees.all().await?;
        records.sort_by(|a, b| b.total_fees_paid.cmp(&a.total_fees_paid));
        Ok(pagination.apply(records))
    }

    /// Pay out fees approved by an executed treasury proposal
    pub async fn withdraw_fees(
        &self,
        proposal_id: u64,
        recipient: &str,
        amount: Decimal,
        purpose: &str,
    ) -> EconomicResult<TreasuryWithdrawal> {
        let recipient = normalize_wallet(recipient)?;
        if amount <= Decimal::ZERO {
            return Err(EconomicError::InvalidInput("amount must be greater than zero".to_string()));
        }

        let _guard = self.write_lock.lock().await;
        if self.withdrawals.find(|w| w.proposal_id == proposal_id).await?.is_some() {
            return Err(EconomicError::AlreadyExists(format!(
                "Proposal {} already paid out",
                proposal_id
            )));
        }
        let mut totals = self.load_stats().await?;
        if amount > totals.total_fees_collected_usdc {
            return Err(EconomicError::InvalidState("Insufficient treasury balance".to_string()));
        }

        let now = self.clock.now();
        totals.total_fees_collected_usdc -= amount;
        totals.total_fees_withdrawn += amount;
        totals.updated_at = Some(now);
        self.stats.put(&totals).await?;

        let withdrawal = TreasuryWithdrawal {
            id: self.withdrawals.next_id().await?,
            proposal_id,
            recipient_address: recipient,
            amount,
            purpose: purpose.to_string(),
            approved_by_governance: true,
            executed: true,
            requested_at: now,
            executed_at: Some(now),
        };
        self.withdrawals.put(&withdrawal).await?;

        info!("Treasury paid {} to {} for proposal {}", amount, withdrawal.recipient_address, proposal_id);
        Ok(withdrawal)
    }

    /// Treasury withdrawals in execution order
    pub async fn withdrawals(&self) -> EconomicResult<Vec<TreasuryWithdrawal>> {
        Ok(self.withdrawals.all().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funds::PersonalFundCreate;
    use chrono::TimeZone;
    use ethernity_core::config::FundConfig;
    use ethernity_core::{ManualClock, MemoryStorage};
    use ethernity_identity::UserCreate;

    const OWNER: &str = "0x8888888888888888888888888888888888888888";
    const STRANGER: &str = "0x9999999999999999999999999999999999999999";
    const FUND_ADDRESS: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn tx(n: u8) -> String {
        format!("0x{}", format!("{:02x}", n).repeat(32))
    }

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    async fn setup() -> (TreasuryManager, Arc<FundManager>) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()));
        let users = Arc::new(UserManager::new(storage.clone(), clock.clone()));
        users.register(UserCreate::for_wallet(OWNER)).await.unwrap();
        users.register(UserCreate::for_wallet(STRANGER)).await.unwrap();

        let funds = Arc::new(FundManager::new(storage.clone(), users.clone(), FundConfig::default(), clock.clone()));
        let fund = funds
            .create(
                OWNER,
                PersonalFundCreate {
                    principal: dec("500"),
                    monthly_deposit: dec("100"),
                    current_age: 40,
                    retirement_age: 67,
                    desired_monthly: dec("1500"),
                    years_payments: 25,
                    interest_rate: 400,
                    timelock_years: None,
                },
            )
            .await
            .unwrap();
        funds.complete_creation(fund.id, FUND_ADDRESS, &tx(1)).await.unwrap();

        (TreasuryManager::new(storage, users, funds.clone(), clock), funds)
    }

    #[tokio::test]
    async fn test_request_rules() {
        let (treasury, _) = setup().await;
        let reason = "Medical emergency in the family";

        let err = treasury.create_request(STRANGER, FUND_ADDRESS, reason).await.unwrap_err();
        assert_eq!(err.to_string(), "Fund not found or not owned by user");
        assert!(treasury.create_request(OWNER, FUND_ADDRESS, "short").await.is_err());

        let request = treasury.create_request(OWNER, FUND_ADDRESS, reason).await.unwrap();
        assert!(!request.processed);

        let err = treasury.create_request(OWNER, FUND_ADDRESS, reason).await.unwrap_err();
        assert_eq!(err.to_string(), "Pending early retirement request already exists");
        assert_eq!(treasury.list_requests(Pagination::default(), true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_approve_lifts_timelock() {
        let (treasury, funds) = setup().await;
        let request = treasury
            .create_request(OWNER, FUND_ADDRESS, "Medical emergency in the family")
            .await
            .unwrap();

        let approved = treasury.approve(request.id, &tx(2)).await.unwrap();
        assert!(approved.approved && approved.processed);
        assert!(funds.get(request.fund_id).await.unwrap().unwrap().early_retirement_approved);

        let err = treasury.approve(request.id, &tx(3)).await.unwrap_err();
        assert_eq!(err.to_string(), "Request already processed");
        assert!(treasury.reject(request.id, "late").await.is_err());

        let stats = treasury.stats().await.unwrap();
        assert_eq!(stats.approved_early_retirements, 1);
        assert_eq!(stats.pending_requests_count, 0);
        assert_eq!(stats.total_funds_registered, 1);
    }

    #[tokio::test]
    async fn test_reject_allows_new_request() {
        let (treasury, _) = setup().await;
        let reason = "Medical emergency in the family";
        let first = treasury.create_request(OWNER, FUND_ADDRESS, reason).await.unwrap();
        let rejected = treasury.reject(first.id, "Insufficient documentation").await.unwrap();
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Insufficient documentation"));

        let second = treasury.create_request(OWNER, FUND_ADDRESS, reason).await.unwrap();
        assert_eq!(treasury.request_by_fund(FUND_ADDRESS).await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_fees_and_withdrawals() {
        let (treasury, _) = setup().await;
        assert!(treasury.record_fee(STRANGER, dec("1"), &tx(4)).await.is_err());

        treasury.record_fee(FUND_ADDRESS, dec("18"), &tx(5)).await.unwrap();
        let record = treasury.record_fee(FUND_ADDRESS, dec("3"), &tx(6)).await.unwrap();
        assert_eq!(record.total_fees_paid, dec("21"));
        assert_eq!(record.fee_count, 2);
        assert_eq!(treasury.all_fees(Pagination::default()).await.unwrap().len(), 1);

        let err = treasury.withdraw_fees(1, STRANGER, dec("50"), "Audit").await.unwrap_err();
        assert_eq!(err.to_string(), "Insufficient treasury balance");

        treasury.withdraw_fees(1, STRANGER, dec("20"), "Audit").await.unwrap();
        assert!(treasury.withdraw_fees(1, STRANGER, dec("1"), "Audit").await.is_err());

        let stats = treasury.stats().await.unwrap();
        assert_eq!(stats.total_fees_collected_usdc, dec("1"));
        assert_eq!(stats.total_fees_collected_all_time, dec("21"));
        assert_eq!(stats.total_fees_withdrawn, dec("20"));
        assert_eq!(treasury.withdrawals().await.unwrap().len(), 1);
    }
}
