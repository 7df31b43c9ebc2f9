//! Personal retirement funds
//!
//! A fund is created off-chain first, then completed once the factory has
//! deployed its contract. Deposits pay the treasury fee; withdrawals are only
//! possible once retirement has started, which in turn requires the timelock
//! to have passed or an approved early retirement.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ethernity_core::config::FundConfig;
use ethernity_core::storage::id_key;
use ethernity_core::utils::{calculate_net_amount, is_transaction_hash, normalize_wallet, validation::validate_range};
use ethernity_core::{Clock, Collection, Pagination, Record, Storage};
use ethernity_identity::UserManager;

use crate::{EconomicError, EconomicResult};

const SECONDS_PER_DAY: i64 = 86_400;
const DAYS_PER_YEAR: i64 = 365;

/// Lifecycle stage of a fund
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundStatus {
    /// Timelock still running
    Accumulating,
    /// Timelock passed, retirement not started
    Ready,
    /// Early retirement approved by the treasury
    EarlyApproved,
    /// Retirement started
    Retired,
}

impl FundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundStatus::Accumulating => "accumulating",
            FundStatus::Ready => "ready",
            FundStatus::EarlyApproved => "early_approved",
            FundStatus::Retired => "retired",
        }
    }
}

impl fmt::Display for FundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FundStatus {
    type Err = EconomicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accumulating" => Ok(FundStatus::Accumulating),
            "ready" => Ok(FundStatus::Ready),
            "early_approved" => Ok(FundStatus::EarlyApproved),
            "retired" => Ok(FundStatus::Retired),
            other => Err(EconomicError::InvalidInput(format!("Unknown retirement status: {}", other))),
        }
    }
}

/// Kind of fund transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundTransactionType {
    InitialDeposit,
    MonthlyDeposit,
    ExtraDeposit,
    Invest,
    Divest,
    Withdrawal,
    AutoWithdrawal,
    EmergencyWithdrawal,
    FeePayment,
}

impl FundTransactionType {
    /// Whether the transaction brings money into the fund
    pub fn is_deposit(&self) -> bool {
        matches!(
            self,
            FundTransactionType::InitialDeposit | FundTransactionType::MonthlyDeposit | FundTransactionType::ExtraDeposit
        )
    }

    /// Whether the transaction takes money out of the fund
    pub fn is_withdrawal(&self) -> bool {
        matches!(
            self,
            FundTransactionType::Withdrawal
                | FundTransactionType::AutoWithdrawal
                | FundTransactionType::EmergencyWithdrawal
        )
    }
}

/// Kind of deposit after the initial one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositKind {
    #[default]
    Monthly,
    Extra,
}

/// A personal retirement fund
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonalFund {
    pub id: u64,
    pub owner_id: u64,
    pub owner_address: String,
    /// Contract address; empty until deployment completes
    pub fund_address: String,

    pub principal: Decimal,
    pub monthly_deposit: Decimal,
    pub current_age: u32,
    pub retirement_age: u32,
    pub desired_monthly: Decimal,
    pub years_payments: u32,
    /// Expected yield in basis points
    pub interest_rate: u32,

    /// Timelock length in seconds
    pub timelock_period: i64,
    pub timelock_end: DateTime<Utc>,

    pub total_gross_deposited: Decimal,
    pub total_fees_paid: Decimal,
    pub total_net_to_fund: Decimal,
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub total_invested: Decimal,
    pub total_withdrawn: Decimal,

    pub monthly_deposit_count: u32,
    pub extra_deposit_count: u32,
    pub withdrawal_count: u32,

    pub retirement_started: bool,
    pub retirement_start_time: Option<DateTime<Utc>>,
    pub early_retirement_approved: bool,

    pub auto_withdrawal_enabled: bool,
    pub auto_withdrawal_amount: Decimal,
    /// Interval in seconds
    pub auto_withdrawal_interval: i64,
    pub next_auto_withdrawal_time: Option<DateTime<Utc>>,
    pub last_auto_withdrawal_time: Option<DateTime<Utc>>,
    pub auto_withdrawal_execution_count: u32,

    pub initialized: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for PersonalFund {
    const COLLECTION: &'static str = "funds";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

impl PersonalFund {
    /// Lifecycle stage at `now`
    pub fn status(&self, now: DateTime<Utc>) -> FundStatus {
        if self.retirement_started {
            FundStatus::Retired
        } else if self.early_retirement_approved {
            FundStatus::EarlyApproved
        } else if now >= self.timelock_end {
            FundStatus::Ready
        } else {
            FundStatus::Accumulating
        }
    }

    /// Whether retirement may start at `now`
    pub fn is_ready_for_retirement(&self, now: DateTime<Utc>) -> bool {
        !self.retirement_started
            && self.initialized
            && (self.early_retirement_approved || now >= self.timelock_end)
    }
}

/// Movement of money in or out of a fund
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundTransaction {
    pub id: u64,
    pub fund_id: u64,
    pub fund_address: String,
    pub transaction_type: FundTransactionType,
    pub gross_amount: Decimal,
    pub fee_amount: Decimal,
    pub net_amount: Decimal,
    pub balance_after: Decimal,
    pub transaction_hash: String,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Record for FundTransaction {
    const COLLECTION: &'static str = "fund_transactions";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

/// Retirement plan submitted when creating a fund
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalFundCreate {
    pub principal: Decimal,
    pub monthly_deposit: Decimal,
    pub current_age: u32,
    pub retirement_age: u32,
    pub desired_monthly: Decimal,
    pub years_payments: u32,
    pub interest_rate: u32,
    #[serde(default)]
    pub timelock_years: Option<u32>,
}

impl PersonalFundCreate {
    fn validate(&self, config: &FundConfig) -> EconomicResult<u32> {
        if self.principal < Decimal::ZERO {
            return Err(EconomicError::InvalidInput("principal must be zero or greater".to_string()));
        }
        if self.monthly_deposit <= Decimal::ZERO {
            return Err(EconomicError::InvalidInput("monthly_deposit must be greater than zero".to_string()));
        }
        if self.desired_monthly <= Decimal::ZERO {
            return Err(EconomicError::InvalidInput("desired_monthly must be greater than zero".to_string()));
        }
        validate_range(self.current_age, 18, 80, "current_age")?;
        validate_range(self.retirement_age, 55, 100, "retirement_age")?;
        if self.retirement_age <= self.current_age {
            return Err(EconomicError::InvalidInput(
                "Retirement age must be greater than current age".to_string(),
            ));
        }
        validate_range(self.years_payments, 1, 50, "years_payments")?;
        validate_range(self.interest_rate, 0, 10_000, "interest_rate")?;

        let years = self.timelock_years.unwrap_or(config.default_timelock_years);
        validate_range(years, config.min_timelock_years, config.max_timelock_years, "timelock_years")?;
        Ok(years)
    }
}

/// Balance snapshot of a fund
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundBalances {
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub total_invested: Decimal,
    pub total_gross_deposited: Decimal,
    pub total_fees_paid: Decimal,
    pub total_withdrawn: Decimal,
}

/// Deposit and withdrawal figures of a fund
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundStats {
    pub total_deposits: u32,
    pub total_withdrawals: u32,
    pub average_deposit: Decimal,
    pub total_fees_paid: Decimal,
    pub investment_count: usize,
}

/// Answer to "may this fund start retirement now?"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetirementCheck {
    pub can_retire: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
}

/// Auto-withdrawal settings submitted by the owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoWithdrawalConfig {
    pub enabled: bool,
    pub amount: Decimal,
    pub interval_days: u32,
}

/// Current auto-withdrawal schedule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoWithdrawalInfo {
    pub enabled: bool,
    pub amount: Decimal,
    /// Interval in seconds
    pub interval: i64,
    pub next_execution_time: Option<DateTime<Utc>>,
    pub execution_count: u32,
    pub last_execution_time: Option<DateTime<Utc>>,
}

/// Manages personal funds and their transactions
pub struct FundManager {
    funds: Collection<PersonalFund>,
    transactions: Collection<FundTransaction>,
    users: Arc<UserManager>,
    config: FundConfig,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl FundManager {
    /// Create a new fund manager
    pub fn new(storage: Arc<dyn Storage>, users: Arc<UserManager>, config: FundConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            funds: Collection::new(storage.clone()),
            transactions: Collection::new(storage),
            users,
            config,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    fn not_found() -> EconomicError {
        EconomicError::NotFound("Fund not found".to_string())
    }

    fn check_hash(hash: &str) -> EconomicResult<()> {
        if !is_transaction_hash(hash) {
            return Err(EconomicError::InvalidInput(
                "transaction_hash must be 0x followed by 64 hex characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Get a fund by id
    pub async fn get(&self, id: u64) -> EconomicResult<Option<PersonalFund>> {
        Ok(self.funds.get(id).await?)
    }

    async fn require(&self, id: u64) -> EconomicResult<PersonalFund> {
        self.get(id).await?.ok_or_else(Self::not_found)
    }

    /// Fund owned by a wallet
    pub async fn get_by_wallet(&self, wallet: &str) -> EconomicResult<Option<PersonalFund>> {
        let wallet = wallet.trim().to_lowercase();
        Ok(self.funds.find(|f| f.owner_address == wallet).await?)
    }

    /// Fund deployed at a contract address
    pub async fn get_by_address(&self, address: &str) -> EconomicResult<Option<PersonalFund>> {
        let address = address.trim().to_lowercase();
        if address.is_empty() {
            return Ok(None);
        }
        Ok(self.funds.find(|f| f.fund_address == address).await?)
    }

    /// Create the off-chain record of a fund before deployment
    pub async fn create(&self, wallet: &str, data: PersonalFundCreate) -> EconomicResult<PersonalFund> {
        let years = data.validate(&self.config)?;
        let wallet = normalize_wallet(wallet)?;
        let user = self.users.get_by_wallet(&wallet).await?.ok_or(EconomicError::UserNotFound)?;

        let _guard = self.write_lock.lock().await;
        if self.get_by_wallet(&wallet).await?.is_some() {
            return Err(EconomicError::AlreadyExists("User already has a personal fund".to_string()));
        }

        let now = self.clock.now();
        let timelock_period = years as i64 * DAYS_PER_YEAR * SECONDS_PER_DAY;
        let fund = PersonalFund {
            id: self.funds.next_id().await?,
            owner_id: user.id,
            owner_address: wallet.clone(),
            fund_address: String::new(),
            principal: data.principal,
            monthly_deposit: data.monthly_deposit,
            current_age: data.current_age,
            retirement_age: data.retirement_age,
            desired_monthly: data.desired_monthly,
            years_payments: data.years_payments,
            interest_rate: data.interest_rate,
            timelock_period,
            timelock_end: now + Duration::seconds(timelock_period),
            total_gross_deposited: Decimal::ZERO,
            total_fees_paid: Decimal::ZERO,
            total_net_to_fund: Decimal::ZERO,
            total_balance: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            total_invested: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            monthly_deposit_count: 0,
            extra_deposit_count: 0,
            withdrawal_count: 0,
            retirement_started: false,
            retirement_start_time: None,
            early_retirement_approved: false,
            auto_withdrawal_enabled: false,
            auto_withdrawal_amount: Decimal::ZERO,
            auto_withdrawal_interval: 0,
            next_auto_withdrawal_time: None,
            last_auto_withdrawal_time: None,
            auto_withdrawal_execution_count: 0,
            initialized: false,
            created_at: now,
            updated_at: None,
        };
        self.funds.put(&fund).await?;

        info!("Fund {} created for {}", fund.id, wallet);
        Ok(fund)
    }

    /// Pending (not yet deployed) fund of a wallet
    pub async fn pending_for_owner(&self, wallet: &str) -> EconomicResult<Option<PersonalFund>> {
        Ok(self.get_by_wallet(wallet).await?.filter(|f| !f.initialized))
    }

    /// Record the deployment and the initial deposit
    pub async fn complete_creation(&self, fund_id: u64, fund_address: &str, tx_hash: &str) -> EconomicResult<PersonalFund> {
        let fund_address = normalize_wallet(fund_address)?;
        Self::check_hash(tx_hash)?;

        let _guard = self.write_lock.lock().await;
        let mut fund = self.require(fund_id).await?;
        if fund.initialized {
            return Err(EconomicError::InvalidState("Fund already initialized".to_string()));
        }
        if let Some(other) = self.get_by_address(&fund_address).await? {
            if other.id != fund_id {
                return Err(EconomicError::AlreadyExists("Fund address already registered".to_string()));
            }
        }

        let now = self.clock.now();
        let gross = fund.principal + fund.monthly_deposit;
        let (fee, net) = calculate_net_amount(gross, self.config.fee_bps);

        fund.fund_address = fund_address;
        fund.initialized = true;
        fund.total_gross_deposited = gross;
        fund.total_fees_paid = fee;
        fund.total_net_to_fund = net;
        fund.total_balance = net;
        fund.available_balance = net;
        fund.monthly_deposit_count = 1;
        fund.updated_at = Some(now);

        self.push_transaction(&fund, FundTransactionType::InitialDeposit, gross, fee, net, tx_hash, now)
            .await?;
        self.funds.put(&fund).await?;

        info!("Fund {} deployed at {}", fund.id, fund.fund_address);
        Ok(fund)
    }

    #[allow(clippy::too_many_arguments)]
    async fn push_transaction(
        &self,
        fund: &PersonalFund,
        transaction_type: FundTransactionType,
        gross: Decimal,
        fee: Decimal,
        net: Decimal,
        tx_hash: &str,
        at: DateTime<Utc>,
    ) -> EconomicResult<FundTransaction> {
        let transaction = FundTransaction {
            id: self.transactions.next_id().await?,
            fund_id: fund.id,
            fund_address: fund.fund_address.clone(),
            transaction_type,
            gross_amount: gross,
            fee_amount: fee,
            net_amount: net,
            balance_after: fund.total_balance,
            transaction_hash: tx_hash.to_string(),
            block_number: 0,
            block_timestamp: at,
            created_at: at,
        };
        self.transactions.put(&transaction).await?;
        Ok(transaction)
    }

    /// Balance snapshot
    pub async fn balances(&self, id: u64) -> EconomicResult<Option<FundBalances>> {
        Ok(self.get(id).await?.map(|f| FundBalances {
            total_balance: f.total_balance,
            available_balance: f.available_balance,
            total_invested: f.total_invested,
            total_gross_deposited: f.total_gross_deposited,
            total_fees_paid: f.total_fees_paid,
            total_withdrawn: f.total_withdrawn,
        }))
    }

    /// Deposit and withdrawal figures
    pub async fn stats(&self, id: u64) -> EconomicResult<Option<FundStats>> {
        let fund = match self.get(id).await? {
            Some(fund) => fund,
            None => return Ok(None),
        };
        let total_deposits = fund.monthly_deposit_count + fund.extra_deposit_count;
        let average_deposit = if total_deposits > 0 {
            fund.total_gross_deposited / Decimal::from(total_deposits)
        } else {
            Decimal::ZERO
        };

        let transactions = self.transactions(id).await?;
        let invested = transactions
            .iter()
            .filter(|t| t.transaction_type == FundTransactionType::Invest)
            .count();
        let divested = transactions
            .iter()
            .filter(|t| t.transaction_type == FundTransactionType::Divest)
            .count();

        Ok(Some(FundStats {
            total_deposits,
            total_withdrawals: fund.withdrawal_count,
            average_deposit,
            total_fees_paid: fund.total_fees_paid,
            investment_count: invested.saturating_sub(divested),
        }))
    }

    /// Record a deposit; without an amount the call only acknowledges the transaction
    pub async fn record_deposit(
        &self,
        id: u64,
        tx_hash: &str,
        amount: Option<Decimal>,
        kind: DepositKind,
    ) -> EconomicResult<Option<FundTransaction>> {
        Self::check_hash(tx_hash)?;

        let _guard = self.write_lock.lock().await;
        let mut fund = self.require(id).await?;
        let gross = match amount {
            Some(amount) if amount <= Decimal::ZERO => {
                return Err(EconomicError::InvalidInput("amount must be greater than zero".to_string()));
            }
            Some(amount) => amount,
            None => {
                debug!("Deposit {} acknowledged for fund {}", tx_hash, id);
                return Ok(None);
            }
        };

        let now = self.clock.now();
        let (fee, net) = calculate_net_amount(gross, self.config.fee_bps);
        fund.total_gross_deposited += gross;
        fund.total_fees_paid += fee;
        fund.total_net_to_fund += net;
        fund.total_balance += net;
        fund.available_balance += net;
        let transaction_type = match kind {
            DepositKind::Monthly => {
                fund.monthly_deposit_count += 1;
                FundTransactionType::MonthlyDeposit
            }
            DepositKind::Extra => {
                fund.extra_deposit_count += 1;
                FundTransactionType::ExtraDeposit
            }
        };
        fund.updated_at = Some(now);

        let transaction = self.push_transaction(&fund, transaction_type, gross, fee, net, tx_hash, now).await?;
        self.funds.put(&fund).await?;

        info!("Deposit of {} recorded for fund {}", gross, id);
        Ok(Some(transaction))
    }

    /// Record a withdrawal; only possible once retirement has started
    pub async fn record_withdrawal(
        &self,
        id: u64,
        tx_hash: &str,
        amount: Option<Decimal>,
    ) -> EconomicResult<Option<FundTransaction>> {
        Self::check_hash(tx_hash)?;

        let _guard = self.write_lock.lock().await;
        let mut fund = self.require(id).await?;
        if !fund.retirement_started {
            return Err(EconomicError::InvalidState("Cannot withdraw before retirement started".to_string()));
        }
        let amount = match amount {
            Some(amount) => amount,
            None => return Ok(None),
        };
        if amount <= Decimal::ZERO {
            return Err(EconomicError::InvalidInput("amount must be greater than zero".to_string()));
        }
        if amount > fund.available_balance {
            return Err(EconomicError::InvalidState("Insufficient available balance".to_string()));
        }

        let now = self.clock.now();
        Self::apply_withdrawal(&mut fund, amount, now);
        let transaction = self
            .push_transaction(&fund, FundTransactionType::Withdrawal, amount, Decimal::ZERO, amount, tx_hash, now)
            .await?;
        self.funds.put(&fund).await?;

        info!("Withdrawal of {} recorded for fund {}", amount, id);
        Ok(Some(transaction))
    }

    fn apply_withdrawal(fund: &mut PersonalFund, amount: Decimal, now: DateTime<Utc>) {
        fund.total_balance -= amount;
        fund.available_balance -= amount;
        fund.total_withdrawn += amount;
        fund.withdrawal_count += 1;
        fund.updated_at = Some(now);
    }

    /// Start the retirement phase
    pub async fn start_retirement(&self, id: u64, tx_hash: &str) -> EconomicResult<PersonalFund> {
        Self::check_hash(tx_hash)?;

        let _guard = self.write_lock.lock().await;
        let mut fund = self.require(id).await?;
        if fund.retirement_started {
            return Err(EconomicError::InvalidState("Retirement already started".to_string()));
        }
        let now = self.clock.now();
        if !fund.early_retirement_approved && now < fund.timelock_end {
            return Err(EconomicError::InvalidState("Timelock period not finished".to_string()));
        }

        fund.retirement_started = true;
        fund.retirement_start_time = Some(now);
        if fund.auto_withdrawal_enabled && fund.auto_withdrawal_interval > 0 {
            fund.next_auto_withdrawal_time = Some(now + Duration::seconds(fund.auto_withdrawal_interval));
        }
        fund.updated_at = Some(now);
        self.funds.put(&fund).await?;

        info!("Retirement started for fund {}", id);
        Ok(fund)
    }

    /// Whether the fund may start retirement now
    pub async fn can_retire(&self, id: u64) -> EconomicResult<Option<RetirementCheck>> {
        let fund = match self.get(id).await? {
            Some(fund) => fund,
            None => return Ok(None),
        };
        let now = self.clock.now();
        let check = |can_retire: bool, reason: &str| RetirementCheck {
            can_retire,
            reason: reason.to_string(),
            days_remaining: None,
        };

        Ok(Some(if fund.retirement_started {
            check(false, "Already retired")
        } else if fund.early_retirement_approved {
            check(true, "Early retirement approved")
        } else if now >= fund.timelock_end {
            check(true, "Timelock period completed")
        } else {
            RetirementCheck {
                days_remaining: Some((fund.timelock_end - now).num_days()),
                ..check(false, "Timelock period not finished")
            }
        }))
    }

    /// Configure the auto-withdrawal schedule
    pub async fn configure_auto_withdrawal(&self, id: u64, config: AutoWithdrawalConfig) -> EconomicResult<AutoWithdrawalInfo> {
        if config.amount < Decimal::ZERO {
            return Err(EconomicError::InvalidInput("amount must be zero or greater".to_string()));
        }
        if config.interval_days < self.config.min_auto_withdrawal_interval_days {
            return Err(EconomicError::InvalidInput(format!(
                "interval_days must be at least {}",
                self.config.min_auto_withdrawal_interval_days
            )));
        }

        let _guard = self.write_lock.lock().await;
        let mut fund = self.require(id).await?;
        let now = self.clock.now();
        fund.auto_withdrawal_enabled = config.enabled;
        fund.auto_withdrawal_amount = config.amount;
        fund.auto_withdrawal_interval = config.interval_days as i64 * SECONDS_PER_DAY;
        if config.enabled && fund.retirement_started {
            fund.next_auto_withdrawal_time = Some(now + Duration::seconds(fund.auto_withdrawal_interval));
        }
        fund.updated_at = Some(now);
        self.funds.put(&fund).await?;

        info!("Auto-withdrawal configured for fund {}", id);
        Ok(Self::auto_withdrawal_of(&fund))
    }

    fn auto_withdrawal_of(fund: &PersonalFund) -> AutoWithdrawalInfo {
        AutoWithdrawalInfo {
            enabled: fund.auto_withdrawal_enabled,
            amount: fund.auto_withdrawal_amount,
            interval: fund.auto_withdrawal_interval,
            next_execution_time: fund.next_auto_withdrawal_time,
            execution_count: fund.auto_withdrawal_execution_count,
            last_execution_time: fund.last_auto_withdrawal_time,
        }
    }

    /// Current auto-withdrawal schedule
    pub async fn auto_withdrawal_info(&self, id: u64) -> EconomicResult<Option<AutoWithdrawalInfo>> {
        Ok(self.get(id).await?.map(|f| Self::auto_withdrawal_of(&f)))
    }

    /// Run every auto-withdrawal that is due
    pub async fn execute_due_auto_withdrawals(&self) -> EconomicResult<Vec<FundTransaction>> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();
        let due = self
            .funds
            .filter(|f| {
                f.retirement_started
                    && f.auto_withdrawal_enabled
                    && f.next_auto_withdrawal_time.map_or(false, |next| next <= now)
            })
            .await?;

        let mut executed = Vec::new();
        for mut fund in due {
            let amount = fund.auto_withdrawal_amount.min(fund.available_balance);
            if amount > Decimal::ZERO {
                Self::apply_withdrawal(&mut fund, amount, now);
                let tx_hash = format!("auto-withdrawal-{}-{}", fund.id, fund.auto_withdrawal_execution_count + 1);
                let transaction = self
                    .push_transaction(&fund, FundTransactionType::AutoWithdrawal, amount, Decimal::ZERO, amount, &tx_hash, now)
                    .await?;
                executed.push(transaction);
            } else {
                warn!("Auto-withdrawal skipped for fund {}: no available balance", fund.id);
            }
            fund.auto_withdrawal_execution_count += 1;
            fund.last_auto_withdrawal_time = Some(now);
            fund.next_auto_withdrawal_time = Some(now + Duration::seconds(fund.auto_withdrawal_interval));
            fund.updated_at = Some(now);
            self.funds.put(&fund).await?;
        }

        if !executed.is_empty() {
            info!("Executed {} auto-withdrawals", executed.len());
        }
        Ok(executed)
    }

    /// Mark a fund as approved for early retirement
    pub async fn approve_early_retirement(&self, fund_id: u64) -> EconomicResult<PersonalFund> {
        let _guard = self.write_lock.lock().await;
        let mut fund = self.require(fund_id).await?;
        fund.early_retirement_approved = true;
        fund.updated_at = Some(self.clock.now());
        self.funds.put(&fund).await?;
        info!("Early retirement approved for fund {}", fund_id);
        Ok(fund)
    }

    /// Funds newest first, optionally filtered by status
    pub async fn list(&self, pagination: Pagination, status: Option<FundStatus>) -> EconomicResult<Vec<PersonalFund>> {
        let now = self.clock.now();
        let mut funds = self
            .funds
            .filter(|f| match status {
                None => true,
                Some(FundStatus::Retired) => f.retirement_started,
                Some(FundStatus::Ready) => !f.retirement_started && f.timelock_end <= now,
                Some(FundStatus::Accumulating) => !f.retirement_started && f.timelock_end > now,
                Some(FundStatus::EarlyApproved) => !f.retirement_started && f.early_retirement_approved,
            })
            .await?;
        funds.reverse();
        Ok(pagination.apply(funds))
    }

    /// Every fund in creation order
    pub async fn all(&self) -> EconomicResult<Vec<PersonalFund>> {
        Ok(self.funds.all().await?)
    }

    /// Initialized funds that may start retirement now
    pub async fn ready_for_retirement(&self) -> EconomicResult<Vec<PersonalFund>> {
        let now = self.clock.now();
        Ok(self.funds.filter(|f| f.is_ready_for_retirement(now)).await?)
    }

    /// Funds whose retirement has started
    pub async fn in_retirement(&self) -> EconomicResult<Vec<PersonalFund>> {
        Ok(self.funds.filter(|f| f.retirement_started).await?)
    }

    /// Transactions of a fund in chronological order
    pub async fn transactions(&self, fund_id: u64) -> EconomicResult<Vec<FundTransaction>> {
        Ok(self.transactions.filter(|t| t.fund_id == fund_id).await?)
    }

    /// Transactions of every fund recorded on a date
    pub async fn transactions_on(&self, date: NaiveDate) -> EconomicResult<Vec<FundTransaction>> {
        Ok(self.transactions.filter(|t| t.created_at.date_naive() == date).await?)
    }

    /// Lifecycle stage of a fund right now
    pub fn fund_status(&self, fund: &PersonalFund) -> FundStatus {
        fund.status(self.clock.now())
    }
}
