//! Dashboards, daily snapshots and health reporting
//!
//! Nothing here owns domain data except the daily snapshots; every figure is
//! read from the domain managers at request time.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use ethernity_core::{Clock, Collection, Record, Storage};
use ethernity_economic::{FundManager, FundStatus, PersonalFund, TokenManager};
use ethernity_governance::GovernanceManager;
use ethernity_identity::{UserManager, UserStats};
use ethernity_ledger::EventStore;

use crate::contact::{ContactManager, ContactStats};
use crate::survey::SurveyManager;
use crate::AppResult;

/// Backlog size above which the chain is considered out of sync
const MAX_PENDING_EVENTS: usize = 100;

/// Everything a wallet owner sees on their dashboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserDashboard {
    pub wallet_address: String,
    pub has_fund: bool,
    pub fund_address: Option<String>,
    pub fund_balance: Option<Decimal>,
    pub retirement_status: Option<FundStatus>,
    pub is_token_holder: bool,
    pub token_balance: Option<Decimal>,
    pub has_activity_this_month: bool,
    pub total_votes_cast: u32,
    pub proposals_created: u32,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Return figures of a fund
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundPerformance {
    pub fund_address: String,
    pub owner_address: String,
    pub initial_deposit: Decimal,
    pub total_deposited: Decimal,
    pub current_balance: Decimal,
    pub total_return: Decimal,
    pub return_percentage: f64,
    pub days_active: i64,
    pub monthly_deposits_made: u32,
}

/// System figures captured once a day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailySnapshot {
    pub snapshot_date: NaiveDate,
    pub total_token_holders: usize,
    pub active_token_holders: usize,
    pub total_funds: usize,
    pub active_funds: usize,
    pub funds_in_retirement: usize,
    pub total_deposits_today: Decimal,
    pub total_withdrawals_today: Decimal,
    pub total_fees_today: Decimal,
    pub total_tvl: Decimal,
    pub active_proposals: usize,
    pub votes_cast_today: usize,
    pub created_at: DateTime<Utc>,
}

impl Record for DailySnapshot {
    const COLLECTION: &'static str = "daily_snapshots";

    fn key(&self) -> String {
        self.snapshot_date.to_string()
    }
}

/// Liveness of storage and chain ingestion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemHealthCheck {
    pub database_healthy: bool,
    pub blockchain_synced: bool,
    pub last_block_processed: u64,
    pub pending_events: usize,
    pub active_funds: usize,
    pub total_tvl: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundMetrics {
    pub total: usize,
    pub active: usize,
    pub in_retirement: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenMetrics {
    pub total_holders: usize,
    pub active_holders: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GovernanceMetrics {
    pub total_proposals: usize,
    pub active_proposals: usize,
    pub total_votes: usize,
}

/// Current system-wide counts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsOverview {
    pub funds: FundMetrics,
    pub tokens: TokenMetrics,
    pub governance: GovernanceMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurveyCounts {
    pub total_responses: usize,
    pub follow_ups: usize,
    pub interested_emails: usize,
}

/// Admin overview of users and inbound forms
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminStats {
    pub users: UserStats,
    pub contacts: ContactStats,
    pub surveys: SurveyCounts,
}

fn total_tvl(funds: &[PersonalFund]) -> Decimal {
    funds.iter().map(|f| f.total_balance).sum()
}

/// Read-side analytics over all domains
pub struct AnalyticsService {
    snapshots: Collection<DailySnapshot>,
    storage: Arc<dyn Storage>,
    users: Arc<UserManager>,
    funds: Arc<FundManager>,
    tokens: Arc<TokenManager>,
    governance: Arc<GovernanceManager>,
    events: Arc<EventStore>,
    contacts: Arc<ContactManager>,
    surveys: Arc<SurveyManager>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl AnalyticsService {
    /// Create the analytics service
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn Storage>,
        users: Arc<UserManager>,
        funds: Arc<FundManager>,
        tokens: Arc<TokenManager>,
        governance: Arc<GovernanceManager>,
        events: Arc<EventStore>,
        contacts: Arc<ContactManager>,
        surveys: Arc<SurveyManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            snapshots: Collection::new(storage.clone()),
            storage,
            users,
            funds,
            tokens,
            governance,
            events,
            contacts,
            surveys,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Dashboard of a wallet; `None` for unknown wallets
    pub async fn user_dashboard(&self, wallet: &str) -> AppResult<Option<UserDashboard>> {
        let Some(user) = self.users.get_by_wallet(wallet).await? else {
            return Ok(None);
        };
        let holder = self.tokens.holder(&user.wallet_address).await?;
        let fund = self.funds.get_by_wallet(&user.wallet_address).await?;
        let participation = self.governance.voter_stats(&user.wallet_address).await?;

        Ok(Some(UserDashboard {
            has_fund: fund.is_some(),
            fund_address: fund.as_ref().map(|f| f.fund_address.clone()),
            fund_balance: fund.as_ref().map(|f| f.total_balance),
            retirement_status: fund.as_ref().map(|f| self.funds.fund_status(f)),
            is_token_holder: holder.is_some(),
            token_balance: holder.as_ref().map(|h| h.balance),
            has_activity_this_month: holder.as_ref().map_or(false, |h| h.has_activity_this_month),
            total_votes_cast: participation.total_votes_cast,
            proposals_created: participation.proposals_created,
            last_activity: match &holder {
                Some(holder) => holder.last_activity_timestamp,
                None => user.last_login,
            },
            wallet_address: user.wallet_address,
        }))
    }

    fn performance_of(&self, fund: &PersonalFund) -> FundPerformance {
        let total_return = fund.total_balance - fund.total_gross_deposited + fund.total_withdrawn;
        let return_percentage = if fund.total_gross_deposited > Decimal::ZERO {
            (total_return / fund.total_gross_deposited * Decimal::from(100))
                .to_f64()
                .unwrap_or_default()
        } else {
            0.0
        };

        FundPerformance {
            fund_address: fund.fund_address.clone(),
            owner_address: fund.owner_address.clone(),
            initial_deposit: fund.principal + fund.monthly_deposit,
            total_deposited: fund.total_gross_deposited,
            current_balance: fund.total_balance,
            total_return,
            return_percentage,
            days_active: (self.clock.now() - fund.created_at).num_days(),
            monthly_deposits_made: fund.monthly_deposit_count,
        }
    }

    /// Return figures of a fund
    pub async fn fund_performance(&self, fund_id: u64) -> AppResult<Option<FundPerformance>> {
        let fund = self.funds.get(fund_id).await?;
        Ok(fund.map(|f| self.performance_of(&f)))
    }

    /// Snapshots within an optional date range, latest first
    pub async fn snapshots(
        &self,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
        limit: usize,
    ) -> AppResult<Vec<DailySnapshot>> {
        let mut snapshots = self
            .snapshots
            .filter(|s| {
                from_date.map_or(true, |from| s.snapshot_date >= from)
                    && to_date.map_or(true, |to| s.snapshot_date <= to)
            })
            .await?;
        snapshots.reverse();
        snapshots.truncate(limit);
        Ok(snapshots)
    }

    /// Capture today's snapshot; returns the existing one when already taken
    pub async fn create_snapshot(&self) -> AppResult<DailySnapshot> {
        let today = self.clock.today();

        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.snapshots.get_by_key(&today.to_string()).await? {
            warn!("Snapshot already exists for {}", today);
            return Ok(existing);
        }

        let token_stats = self.tokens.stats().await?;
        let funds = self.funds.all().await?;
        let transactions = self.funds.transactions_on(today).await?;
        let deposits = transactions.iter().filter(|t| t.transaction_type.is_deposit());
        let withdrawals = transactions.iter().filter(|t| t.transaction_type.is_withdrawal());

        let snapshot = DailySnapshot {
            snapshot_date: today,
            total_token_holders: token_stats.total_holders,
            active_token_holders: token_stats.active_holders,
            total_funds: funds.len(),
            active_funds: funds.iter().filter(|f| f.initialized).count(),
            funds_in_retirement: funds.iter().filter(|f| f.retirement_started).count(),
            total_deposits_today: deposits.clone().map(|t| t.gross_amount).sum(),
            total_withdrawals_today: withdrawals.map(|t| t.gross_amount).sum(),
            total_fees_today: deposits.map(|t| t.fee_amount).sum(),
            total_tvl: total_tvl(&funds),
            active_proposals: self.governance.active().await?.len(),
            votes_cast_today: self.governance.votes_on(today).await?.len(),
            created_at: self.clock.now(),
        };
        self.snapshots.put(&snapshot).await?;

        info!("Daily snapshot created for {}", today);
        Ok(snapshot)
    }

    /// Storage and ingestion health
    pub async fn health(&self) -> AppResult<SystemHealthCheck> {
        let database_healthy = self.storage.exists("_health").await.is_ok();
        let sync = self.events.sync_status().await?;
        let funds = self.funds.all().await?;

        Ok(SystemHealthCheck {
            database_healthy,
            blockchain_synced: sync.unprocessed_events < MAX_PENDING_EVENTS,
            last_block_processed: sync.last_synced_block,
            pending_events: sync.unprocessed_events,
            active_funds: funds.iter().filter(|f| f.initialized).count(),
            total_tvl: total_tvl(&funds),
            timestamp: self.clock.now(),
        })
    }

    /// System-wide counts
    pub async fn metrics_overview(&self) -> AppResult<MetricsOverview> {
        let funds = self.funds.all().await?;
        let token_stats = self.tokens.stats().await?;
        let governance = self.governance.stats().await?;

        Ok(MetricsOverview {
            funds: FundMetrics {
                total: funds.len(),
                active: funds.iter().filter(|f| f.initialized).count(),
                in_retirement: funds.iter().filter(|f| f.retirement_started).count(),
            },
            tokens: TokenMetrics {
                total_holders: token_stats.total_holders,
                active_holders: token_stats.active_holders,
            },
            governance: GovernanceMetrics {
                total_proposals: governance.total_proposals,
                active_proposals: self.governance.open_count().await?,
                total_votes: governance.total_votes,
            },
        })
    }

    /// Funds with the largest balances
    pub async fn top_funds(&self, limit: usize) -> AppResult<Vec<FundPerformance>> {
        let mut funds = self.funds.all().await?;
        funds.sort_by(|a, b| b.total_balance.cmp(&a.total_balance));
        Ok(funds.iter().take(limit).map(|f| self.performance_of(f)).collect())
    }

    /// Users, contact inbox and survey counts
    pub async fn admin_stats(&self) -> AppResult<AdminStats> {
        Ok(AdminStats {
            users: self.users.stats().await?,
            contacts: self.contacts.stats().await?,
            surveys: SurveyCounts {
                total_responses: self.surveys.count().await?,
                follow_ups: self.surveys.follow_up_count().await?,
                interested_emails: self.surveys.interested_emails().await?.len(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::Map;

    use ethernity_core::{ManualClock, Settings};
    use ethernity_economic::PersonalFundCreate;
    use ethernity_identity::UserCreate;
    use ethernity_ledger::BlockchainEventCreate;

    use crate::state::AppState;

    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x2222222222222222222222222222222222222222";
    const CAROL: &str = "0x3333333333333333333333333333333333333333";

    fn tx(n: u32) -> String {
        format!("0x{:064x}", n)
    }

    fn fund_address(n: u32) -> String {
        format!("0x{:040x}", 0xf000 + n)
    }

    fn plan(principal: i64) -> PersonalFundCreate {
        PersonalFundCreate {
            principal: Decimal::from(principal),
            monthly_deposit: Decimal::from(100),
            current_age: 30,
            retirement_age: 65,
            desired_monthly: Decimal::from(2000),
            years_payments: 20,
            interest_rate: 500,
            timelock_years: Some(10),
        }
    }

    fn setup() -> (AppState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()));
        (AppState::in_memory(Settings::default(), clock.clone()), clock)
    }

    /// Register `wallet` and open a fund; deployed funds get an address and the initial deposit
    async fn open_fund(state: &AppState, wallet: &str, principal: i64, deployed: Option<u32>) -> PersonalFund {
        state.users.register(UserCreate::for_wallet(wallet)).await.unwrap();
        let fund = state.funds.create(wallet, plan(principal)).await.unwrap();
        match deployed {
            Some(n) => state.funds.complete_creation(fund.id, &fund_address(n), &tx(n)).await.unwrap(),
            None => fund,
        }
    }

    async fn record_events(state: &AppState, from: u32, count: u32) {
        for n in from..from + count {
            state
                .events
                .record(BlockchainEventCreate {
                    event_type: "Transfer".to_string(),
                    contract_address: fund_address(0),
                    event_data: Map::new(),
                    transaction_hash: tx(n),
                    block_number: n as u64,
                    block_timestamp: Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap(),
                    log_index: 0,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_snapshot_taken_once_per_day() {
        let (state, clock) = setup();
        let fund = open_fund(&state, ALICE, 1000, Some(1)).await;

        let first = state.analytics.create_snapshot().await.unwrap();
        assert_eq!(first.snapshot_date, clock.today());
        assert_eq!((first.total_funds, first.active_funds), (1, 1));
        assert_eq!(first.total_deposits_today, Decimal::from(1100));
        assert_eq!(first.total_fees_today, Decimal::from(33));
        assert_eq!(first.total_tvl, fund.total_balance);

        // Later the same day the stored snapshot is returned as is
        open_fund(&state, BOB, 500, None).await;
        clock.advance(Duration::hours(6));
        let again = state.analytics.create_snapshot().await.unwrap();
        assert_eq!(again, first);
        assert_eq!(state.analytics.snapshots(None, None, 10).await.unwrap().len(), 1);

        clock.advance(Duration::days(1));
        let next = state.analytics.create_snapshot().await.unwrap();
        assert_eq!((next.total_funds, next.active_funds), (2, 1));
        assert_eq!(next.total_deposits_today, Decimal::ZERO);

        let listed = state.analytics.snapshots(None, None, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].snapshot_date, next.snapshot_date);
        let only_first = state
            .analytics
            .snapshots(None, Some(first.snapshot_date), 10)
            .await
            .unwrap();
        assert_eq!(only_first, vec![first]);
    }

    #[tokio::test]
    async fn test_fund_performance() {
        let (state, clock) = setup();
        let pending = open_fund(&state, ALICE, 1000, None).await;

        let perf = state.analytics.fund_performance(pending.id).await.unwrap().unwrap();
        assert_eq!(perf.total_deposited, Decimal::ZERO);
        assert_eq!(perf.total_return, Decimal::ZERO);
        assert_eq!(perf.return_percentage, 0.0);
        assert_eq!(perf.initial_deposit, Decimal::from(1100));

        let deployed = open_fund(&state, BOB, 1000, Some(2)).await;
        clock.advance(Duration::days(30));
        let perf = state.analytics.fund_performance(deployed.id).await.unwrap().unwrap();
        assert_eq!(perf.total_return, Decimal::from(-33));
        assert_eq!(perf.return_percentage, -3.0);
        assert_eq!(perf.days_active, 30);
        assert_eq!(perf.monthly_deposits_made, 1);

        assert!(state.analytics.fund_performance(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health_tracks_event_backlog() {
        let (state, _) = setup();
        let fund = open_fund(&state, ALICE, 1000, Some(1)).await;

        record_events(&state, 1, 99).await;
        let health = state.analytics.health().await.unwrap();
        assert!(health.database_healthy);
        assert!(health.blockchain_synced);
        assert_eq!(health.pending_events, 99);
        assert_eq!(health.active_funds, 1);
        assert_eq!(health.total_tvl, fund.total_balance);

        record_events(&state, 100, 1).await;
        let health = state.analytics.health().await.unwrap();
        assert!(!health.blockchain_synced);
        assert_eq!(health.pending_events, MAX_PENDING_EVENTS);

        state.events.mark_processed(1).await.unwrap();
        assert!(state.analytics.health().await.unwrap().blockchain_synced);
    }

    #[tokio::test]
    async fn test_top_funds_by_balance() {
        let (state, _) = setup();
        open_fund(&state, ALICE, 1000, Some(1)).await;
        open_fund(&state, BOB, 5000, Some(2)).await;
        open_fund(&state, CAROL, 3000, Some(3)).await;

        let top = state.analytics.top_funds(2).await.unwrap();
        let owners: Vec<&str> = top.iter().map(|p| p.owner_address.as_str()).collect();
        assert_eq!(owners, vec![BOB, CAROL]);
        assert!(top[0].current_balance > top[1].current_balance);

        assert_eq!(state.analytics.top_funds(10).await.unwrap().len(), 3);
        assert!(state.analytics.top_funds(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_overview_counts() {
        let (state, _) = setup();
        let alice = open_fund(&state, ALICE, 1000, Some(1)).await;
        let bob = open_fund(&state, BOB, 1000, None).await;
        state.tokens.mint(alice.owner_id, ALICE).await.unwrap();
        state.tokens.mint(bob.owner_id, BOB).await.unwrap();
        state.tokens.reset_monthly_activity().await.unwrap();
        state.tokens.execute_burn().await.unwrap();
        let carol = state.users.register(UserCreate::for_wallet(CAROL)).await.unwrap();
        state.tokens.mint(carol.id, CAROL).await.unwrap();

        let overview = state.analytics.metrics_overview().await.unwrap();
        assert_eq!(
            overview.funds,
            FundMetrics {
                total: 2,
                active: 1,
                in_retirement: 0
            }
        );
        assert_eq!(
            overview.tokens,
            TokenMetrics {
                total_holders: 3,
                active_holders: 1
            }
        );
        assert_eq!(overview.governance.total_proposals, 0);
        assert_eq!(overview.governance.total_votes, 0);
    }
}
