//! Background jobs
//!
//! The [`Scheduler`] owns one tokio task per [`Job`]. Daily jobs sleep until
//! their UTC wall-clock time; the others tick on a fixed interval. Every task
//! exits once the shutdown channel flips to `true`.
//!
//! Each job is also a plain async method so it can be run once from the CLI
//! or from tests.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use ethernity_core::utils::{days_until_burn, format_wallet_address, is_day_of_month, ZERO_ADDRESS};
use ethernity_core::{Collection, Pagination, Record};
use ethernity_governance::Proposal;
use ethernity_ledger::{BlockchainEvent, PollOutcome};

use crate::analytics::DailySnapshot;
use crate::notifications::NotificationType;
use crate::state::AppState;
use crate::AppResult;

/// Events handled per processing round
pub const EVENT_BATCH: usize = 50;

const BURN_WARNING_TITLE: &str = "Token Burn Warning";
const RETIREMENT_READY_TITLE: &str = "Fund Ready for Retirement";
const NEW_PROPOSAL_TITLE: &str = "New Governance Proposal";
const NEW_PROPOSAL_MESSAGE: &str = "A new proposal has been created. Review and vote on it!";

const BURN_RUN: &str = "token_burn";
const RENEW_RUN: &str = "token_renew";

/// Scheduled jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    BurnWarnings,
    RetirementReady,
    MonthlyCycle,
    AutoWithdrawals,
    DailySnapshot,
    BlockchainSync,
    EventProcessing,
}

/// When a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every day at the given UTC time
    DailyAt { hour: u32, minute: u32 },
    /// Fixed period
    Every(StdDuration),
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::BurnWarnings => "burn_warnings",
            Job::RetirementReady => "retirement_ready",
            Job::MonthlyCycle => "monthly_cycle",
            Job::AutoWithdrawals => "auto_withdrawals",
            Job::DailySnapshot => "daily_snapshot",
            Job::BlockchainSync => "blockchain_sync",
            Job::EventProcessing => "event_processing",
        }
    }

    /// Schedule of the job under `state`'s settings
    pub fn schedule(&self, state: &AppState) -> Schedule {
        let chain = &state.settings.blockchain;
        match self {
            Job::BurnWarnings => Schedule::DailyAt { hour: 9, minute: 0 },
            Job::RetirementReady => Schedule::DailyAt { hour: 10, minute: 0 },
            Job::MonthlyCycle => Schedule::DailyAt { hour: 0, minute: 1 },
            Job::DailySnapshot => Schedule::DailyAt { hour: 0, minute: 5 },
            Job::AutoWithdrawals => Schedule::Every(StdDuration::from_secs(3600)),
            Job::BlockchainSync => Schedule::Every(StdDuration::from_secs(chain.sync_interval_secs.max(1))),
            Job::EventProcessing => {
                Schedule::Every(StdDuration::from_secs(chain.event_processing_interval_secs.max(1)))
            }
        }
    }
}

/// Time left until the next `hour:minute` UTC after `now`
pub fn until_next(now: DateTime<Utc>, hour: u32, minute: u32) -> StdDuration {
    let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    let mut next = Utc.from_utc_datetime(&now.date_naive().and_time(time));
    if next <= now {
        next += Duration::days(1);
    }
    (next - now).to_std().unwrap_or_default()
}

/// Last period a monthly job ran in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRun {
    pub job: String,
    /// `YYYY-MM`
    pub period: String,
    pub ran_at: DateTime<Utc>,
}

impl Record for JobRun {
    const COLLECTION: &'static str = "job_runs";

    fn key(&self) -> String {
        self.job.clone()
    }
}

/// What the monthly check did
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonthlyCycle {
    /// Holders burned, when the burn ran
    pub burned: Option<usize>,
    /// Holders renewed, when the renew ran
    pub renewed: Option<usize>,
}

/// Runs the background jobs over an [`AppState`]
#[derive(Clone)]
pub struct Scheduler {
    state: AppState,
    runs: Arc<Collection<JobRun>>,
}

/// Running scheduler tasks
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Number of running job tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task to stop
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Job task failed: {}", e);
            }
        }
    }
}

impl Scheduler {
    pub fn new(state: AppState) -> Self {
        let runs = Arc::new(Collection::new(state.storage.clone()));
        Self { state, runs }
    }

    /// Jobs enabled by the feature flags
    pub fn enabled_jobs(&self) -> Vec<Job> {
        let features = &self.state.settings.features;
        let mut jobs = vec![Job::MonthlyCycle, Job::DailySnapshot, Job::EventProcessing];
        if features.notifications {
            jobs.push(Job::BurnWarnings);
            jobs.push(Job::RetirementReady);
        }
        if features.auto_withdrawal {
            jobs.push(Job::AutoWithdrawals);
        }
        if self.state.listener.is_some() {
            jobs.push(Job::BlockchainSync);
        }
        jobs
    }

    /// Spawn one task per enabled job
    pub fn start(self, shutdown: watch::Receiver<bool>) -> SchedulerHandle {
        let tasks = self
            .enabled_jobs()
            .into_iter()
            .map(|job| {
                let scheduler = self.clone();
                let shutdown = shutdown.clone();
                info!("Scheduling job {} ({:?})", job.name(), job.schedule(&self.state));
                tokio::spawn(async move { scheduler.run_loop(job, shutdown).await })
            })
            .collect();
        SchedulerHandle { tasks }
    }

    async fn run_loop(self, job: Job, mut shutdown: watch::Receiver<bool>) {
        match job.schedule(&self.state) {
            Schedule::DailyAt { hour, minute } => loop {
                let wait = self.until_due(hour, minute);
                debug!("Job {} sleeps for {:?}", job.name(), wait);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => self.run(job).await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            },
            Schedule::Every(period) => {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => self.run(job).await,
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!("Job {} stopped", job.name());
    }

    /// Time left until `hour:minute` UTC on the state's clock
    pub fn until_due(&self, hour: u32, minute: u32) -> StdDuration {
        until_next(self.state.clock.now(), hour, minute)
    }

    /// Run a job once, logging its outcome
    pub async fn run(&self, job: Job) {
        let result = match job {
            Job::BurnWarnings => self.send_burn_warnings().await.map(|n| format!("{} warnings sent", n)),
            Job::RetirementReady => self
                .notify_retirement_ready()
                .await
                .map(|n| format!("{} retirement notifications sent", n)),
            Job::MonthlyCycle => self.run_monthly_cycle().await.map(|c| format!("{:?}", c)),
            Job::AutoWithdrawals => self
                .run_auto_withdrawals()
                .await
                .map(|n| format!("{} auto-withdrawals executed", n)),
            Job::DailySnapshot => self
                .create_daily_snapshot()
                .await
                .map(|s| format!("snapshot for {}", s.snapshot_date)),
            Job::BlockchainSync => self.sync_blockchain().await.map(|o| format!("{:?}", o)),
            Job::EventProcessing => self.process_events().await.map(|n| format!("{} events processed", n)),
        };
        match result {
            Ok(summary) => debug!("Job {}: {}", job.name(), summary),
            Err(e) => error!("Job {} failed: {}", job.name(), e),
        }
    }

    /// Warn inactive holders a week before the burn
    pub async fn send_burn_warnings(&self) -> AppResult<usize> {
        let config = self.state.tokens.config();
        let days_left = days_until_burn(self.state.clock.now(), config.burn_day);
        if days_left != config.burn_warning_days {
            debug!("Skipping burn warnings, {} days until burn", days_left);
            return Ok(0);
        }

        let message = format!(
            "Your GERAS token will be burned in {} days if you don't perform any activity. \
             Make a deposit, vote on a proposal, or interact with your fund to keep your token active.",
            days_left
        );
        let inactive = self.state.tokens.inactive_holders().await?;
        let mut sent = 0;
        for holder in &inactive {
            sent += self
                .state
                .notifications
                .notify_many(
                    &[holder.user_id],
                    NotificationType::TokenBurnWarning,
                    BURN_WARNING_TITLE,
                    &message,
                    Some(("token", holder.id)),
                )
                .await?;
        }
        info!("Sent {} burn warnings", sent);
        Ok(sent)
    }

    /// Tell owners their fund reached maturity
    pub async fn notify_retirement_ready(&self) -> AppResult<usize> {
        let ready = self.state.funds.ready_for_retirement().await?;
        let mut sent = 0;
        for fund in &ready {
            let message = format!(
                "Your retirement fund {} has reached maturity! \
                 You can now start the retirement phase and begin withdrawals.",
                format_wallet_address(&fund.fund_address)
            );
            sent += self
                .state
                .notifications
                .notify_many(
                    &[fund.owner_id],
                    NotificationType::RetirementReady,
                    RETIREMENT_READY_TITLE,
                    &message,
                    Some(("fund", fund.id)),
                )
                .await?;
        }
        info!("Sent {} retirement ready notifications", sent);
        Ok(sent)
    }

    /// Tell every active holder about a new proposal
    pub async fn notify_new_proposal(&self, proposal: &Proposal) -> AppResult<usize> {
        let holders = self.state.tokens.holders(Pagination::all(), true).await?;
        let user_ids: Vec<u64> = holders.iter().map(|h| h.user_id).collect();
        let sent = self
            .state
            .notifications
            .notify_many(
                &user_ids,
                NotificationType::ProposalCreated,
                NEW_PROPOSAL_TITLE,
                NEW_PROPOSAL_MESSAGE,
                Some(("proposal", proposal.proposal_id)),
            )
            .await?;
        info!("Sent proposal {} notifications to {} holders", proposal.proposal_id, sent);
        Ok(sent)
    }

    async fn ran_this_period(&self, job: &str, period: &str) -> AppResult<bool> {
        Ok(self
            .runs
            .get_by_key(job)
            .await?
            .map(|run| run.period == period)
            .unwrap_or(false))
    }

    async fn mark_ran(&self, job: &str, period: &str) -> AppResult<()> {
        let run = JobRun {
            job: job.to_string(),
            period: period.to_string(),
            ran_at: self.state.clock.now(),
        };
        self.runs.put(&run).await?;
        Ok(())
    }

    /// Burn on the burn day and renew on the renew day, once per month each
    pub async fn run_monthly_cycle(&self) -> AppResult<MonthlyCycle> {
        let today = self.state.clock.today();
        let period = today.format("%Y-%m").to_string();
        let (burn_day, renew_day) = {
            let config = self.state.tokens.config();
            (config.burn_day, config.renew_day)
        };
        let mut cycle = MonthlyCycle::default();

        if is_day_of_month(today, burn_day) && !self.ran_this_period(BURN_RUN, &period).await? {
            let burned = self.state.tokens.execute_burn().await?;
            self.mark_ran(BURN_RUN, &period).await?;
            info!("Monthly burn for {}: {} holders burned", period, burned);
            cycle.burned = Some(burned);
        }
        if is_day_of_month(today, renew_day) && !self.ran_this_period(RENEW_RUN, &period).await? {
            let renewed = self.state.tokens.execute_renew().await?;
            self.mark_ran(RENEW_RUN, &period).await?;
            info!("Monthly renew for {}: {} holders renewed", period, renewed);
            cycle.renewed = Some(renewed);
        }
        Ok(cycle)
    }

    /// Execute every due auto-withdrawal
    pub async fn run_auto_withdrawals(&self) -> AppResult<usize> {
        let executed = self.state.funds.execute_due_auto_withdrawals().await?;
        if !executed.is_empty() {
            info!("Executed {} auto-withdrawals", executed.len());
        }
        Ok(executed.len())
    }

    /// Today's analytics snapshot
    pub async fn create_daily_snapshot(&self) -> AppResult<DailySnapshot> {
        self.state.analytics.create_snapshot().await
    }

    /// One listener poll; `None` without a chain source
    pub async fn sync_blockchain(&self) -> AppResult<Option<PollOutcome>> {
        let Some(listener) = &self.state.listener else {
            return Ok(None);
        };
        let outcome = listener.poll().await?;
        if let PollOutcome::Synced { from_block, to_block, recorded } = &outcome {
            info!("Synced blocks {} to {} ({} events)", from_block, to_block, recorded);
        }
        Ok(Some(outcome))
    }

    /// Apply a batch of unprocessed events; failing events stay unprocessed
    pub async fn process_events(&self) -> AppResult<usize> {
        let pending = self.state.events.unprocessed(EVENT_BATCH).await?;
        let mut processed = 0;
        for event in pending {
            if let Err(e) = self.apply_event(&event).await {
                error!("Error processing event {}: {}", event.id, e);
                continue;
            }
            self.state.events.mark_processed(event.id).await?;
            processed += 1;
        }
        if processed > 0 {
            info!("Processed {} events", processed);
        }
        Ok(processed)
    }

    async fn apply_event(&self, event: &BlockchainEvent) -> AppResult<()> {
        match event.event_type.as_str() {
            "FundCreated" => self.apply_fund_created(event).await,
            "Transfer" => self.apply_transfer(event).await,
            "ProposalCreated" => {
                info!("Proposal created on chain: #{}", event.arg("proposalId").unwrap_or("?"));
                Ok(())
            }
            "VoteCast" => {
                info!("Vote cast on chain for proposal #{}", event.arg("proposalId").unwrap_or("?"));
                Ok(())
            }
            other => {
                debug!("No handler for {} event {}", other, event.id);
                Ok(())
            }
        }
    }

    async fn apply_fund_created(&self, event: &BlockchainEvent) -> AppResult<()> {
        let (Some(owner), Some(fund_address)) = (event.arg("owner"), event.arg("fundAddress")) else {
            warn!("FundCreated event {} is missing arguments", event.id);
            return Ok(());
        };
        match self.state.funds.pending_for_owner(owner).await? {
            Some(fund) => {
                self.state
                    .funds
                    .complete_creation(fund.id, fund_address, &event.transaction_hash)
                    .await?;
                info!("Fund {} deployed at {}", fund.id, fund_address);
            }
            None => debug!("No pending fund for {}", owner),
        }
        Ok(())
    }

    async fn apply_transfer(&self, event: &BlockchainEvent) -> AppResult<()> {
        let (Some(sender), Some(receiver)) = (event.arg("sender"), event.arg("receiver")) else {
            warn!("Transfer event {} is missing arguments", event.id);
            return Ok(());
        };
        if !sender.eq_ignore_ascii_case(ZERO_ADDRESS) {
            return Ok(());
        }
        let Some(user) = self.state.users.get_by_wallet(receiver).await? else {
            debug!("Token minted to unregistered wallet {}", receiver);
            return Ok(());
        };
        if self.state.tokens.holder(&user.wallet_address).await?.is_some() {
            return Ok(());
        }
        self.state.tokens.mint(user.id, &user.wallet_address).await?;
        info!("Token minted to {}", user.wallet_address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use serde_json::json;

    use ethernity_core::{ManualClock, Settings};
    use ethernity_economic::{PersonalFundCreate, TokenActivityCreate, TokenActivityType};
    use ethernity_identity::UserCreate;
    use ethernity_ledger::BlockchainEventCreate;

    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x2222222222222222222222222222222222222222";
    const FUND_ADDRESS: &str = "0x4444444444444444444444444444444444444444";
    const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

    fn tx(n: u8) -> String {
        format!("0x{}", format!("{:02x}", n).repeat(32))
    }

    fn setup_with(settings: Settings, y: i32, m: u32, d: u32) -> (Scheduler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(y, m, d, 0, 1, 0).unwrap()));
        let state = AppState::in_memory(settings, clock.clone());
        (Scheduler::new(state), clock)
    }

    fn setup(y: i32, m: u32, d: u32) -> (Scheduler, Arc<ManualClock>) {
        setup_with(Settings::default(), y, m, d)
    }

    /// Alice and Bob hold tokens; only Alice has activity this month
    async fn holders(scheduler: &Scheduler) {
        let state = &scheduler.state;
        for wallet in [ALICE, BOB] {
            let user = state.users.register(UserCreate::for_wallet(wallet)).await.unwrap();
            state.tokens.mint(user.id, wallet).await.unwrap();
        }
        state.tokens.reset_monthly_activity().await.unwrap();
        state
            .tokens
            .record_activity(ALICE, TokenActivityCreate::new(TokenActivityType::FundDeposit, "deposit"))
            .await
            .unwrap();
    }

    fn plan() -> PersonalFundCreate {
        PersonalFundCreate {
            principal: Decimal::from(1000),
            monthly_deposit: Decimal::from(100),
            current_age: 30,
            retirement_age: 65,
            desired_monthly: Decimal::from(2000),
            years_payments: 20,
            interest_rate: 500,
            timelock_years: Some(10),
        }
    }

    fn event(kind: &str, data: serde_json::Value, n: u8) -> BlockchainEventCreate {
        BlockchainEventCreate {
            event_type: kind.to_string(),
            contract_address: CONTRACT.to_string(),
            event_data: data.as_object().cloned().unwrap(),
            transaction_hash: tx(n),
            block_number: n as u64,
            block_timestamp: Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
            log_index: 0,
        }
    }

    #[test]
    fn test_until_next_rolls_over_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 9, 30, 0).unwrap();
        assert_eq!(until_next(now, 10, 0), StdDuration::from_secs(30 * 60));
        assert_eq!(until_next(now, 9, 0), StdDuration::from_secs(23 * 3600 + 30 * 60));
        assert_eq!(until_next(now, 9, 30), StdDuration::from_secs(24 * 3600));
    }

    #[tokio::test]
    async fn test_until_due_follows_state_clock() {
        let (scheduler, clock) = setup(2026, 5, 10);
        assert_eq!(scheduler.until_due(9, 0), StdDuration::from_secs(8 * 3600 + 59 * 60));

        clock.advance(Duration::hours(9));
        assert_eq!(scheduler.until_due(9, 0), StdDuration::from_secs(23 * 3600 + 59 * 60));
    }

    #[test_log::test(tokio::test)]
    async fn test_monthly_cycle_runs_once_per_period() {
        let (scheduler, clock) = setup(2026, 3, 28);
        holders(&scheduler).await;

        let cycle = scheduler.run_monthly_cycle().await.unwrap();
        assert_eq!(cycle, MonthlyCycle { burned: Some(1), renewed: None });
        assert!(!scheduler.state.tokens.holder(BOB).await.unwrap().unwrap().is_active);

        // A second tick on burn day is a no-op
        clock.advance(Duration::hours(6));
        assert_eq!(scheduler.run_monthly_cycle().await.unwrap(), MonthlyCycle::default());

        // Bob comes back before the renew day
        clock.set(Utc.with_ymd_and_hms(2026, 3, 30, 12, 0, 0).unwrap());
        assert_eq!(scheduler.run_monthly_cycle().await.unwrap(), MonthlyCycle::default());
        scheduler
            .state
            .tokens
            .record_activity(BOB, TokenActivityCreate::new(TokenActivityType::VoteCast, "vote"))
            .await
            .unwrap();

        clock.set(Utc.with_ymd_and_hms(2026, 4, 1, 0, 1, 0).unwrap());
        let cycle = scheduler.run_monthly_cycle().await.unwrap();
        assert_eq!(cycle, MonthlyCycle { burned: None, renewed: Some(1) });
        let bob = scheduler.state.tokens.holder(BOB).await.unwrap().unwrap();
        assert!(bob.is_active);
        assert_eq!(bob.total_renews, 1);
        assert_eq!(scheduler.run_monthly_cycle().await.unwrap(), MonthlyCycle::default());

        let runs = scheduler.runs.all().await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().any(|r| r.job == BURN_RUN && r.period == "2026-03"));
        assert!(runs.iter().any(|r| r.job == RENEW_RUN && r.period == "2026-04"));
    }

    #[tokio::test]
    async fn test_monthly_burn_on_last_day_of_short_month() {
        let mut settings = Settings::default();
        settings.token.burn_day = 31;
        let (scheduler, clock) = setup_with(settings, 2026, 2, 27);
        holders(&scheduler).await;

        assert_eq!(scheduler.run_monthly_cycle().await.unwrap().burned, None);
        clock.advance(Duration::days(1));
        assert_eq!(scheduler.run_monthly_cycle().await.unwrap().burned, Some(1));
    }

    #[tokio::test]
    async fn test_burn_warnings_only_at_warning_distance() {
        let (scheduler, clock) = setup(2026, 3, 20);
        holders(&scheduler).await;

        // Eight days out
        assert_eq!(scheduler.send_burn_warnings().await.unwrap(), 0);

        clock.advance(Duration::days(1));
        assert_eq!(scheduler.send_burn_warnings().await.unwrap(), 1);
        let notes = scheduler
            .state
            .notifications
            .for_wallet(BOB, Pagination::all(), false)
            .await
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].notification_type, "token_burn_warning");
        assert!(notes[0].message.contains("burned in 7 days"));
        assert!(scheduler
            .state
            .notifications
            .for_wallet(ALICE, Pagination::all(), false)
            .await
            .unwrap()
            .is_empty());

        clock.advance(Duration::days(1));
        assert_eq!(scheduler.send_burn_warnings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_notify_retirement_ready() {
        let (scheduler, _) = setup(2026, 3, 10);
        let state = &scheduler.state;
        for wallet in [ALICE, BOB] {
            state.users.register(UserCreate::for_wallet(wallet)).await.unwrap();
            state.funds.create(wallet, plan()).await.unwrap();
        }
        assert_eq!(scheduler.notify_retirement_ready().await.unwrap(), 0);

        let fund = state.funds.get_by_wallet(ALICE).await.unwrap().unwrap();
        state.funds.complete_creation(fund.id, FUND_ADDRESS, &tx(1)).await.unwrap();
        state.funds.approve_early_retirement(fund.id).await.unwrap();
        // Bob's fund is approved but never deployed
        let pending = state.funds.get_by_wallet(BOB).await.unwrap().unwrap();
        state.funds.approve_early_retirement(pending.id).await.unwrap();

        assert_eq!(scheduler.notify_retirement_ready().await.unwrap(), 1);
        let notes = state.notifications.for_wallet(ALICE, Pagination::all(), false).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].notification_type, "retirement_ready");
        assert_eq!(notes[0].related_entity_id, Some(fund.id));
        assert!(notes[0].message.contains("0x4444...4444"));
    }

    #[test_log::test(tokio::test)]
    async fn test_process_events_applies_and_keeps_failures() {
        let (scheduler, _) = setup(2026, 3, 10);
        let state = &scheduler.state;
        state.users.register(UserCreate::for_wallet(ALICE)).await.unwrap();
        state.users.register(UserCreate::for_wallet(BOB)).await.unwrap();
        state.funds.create(ALICE, plan()).await.unwrap();

        let broken = state
            .events
            .record(event("FundCreated", json!({ "owner": ALICE, "fundAddress": "0xnot-an-address" }), 1))
            .await
            .unwrap();
        state
            .events
            .record(event("Transfer", json!({ "sender": ZERO_ADDRESS, "receiver": BOB, "value": "1" }), 2))
            .await
            .unwrap();
        state
            .events
            .record(event("Transfer", json!({ "sender": BOB, "receiver": ALICE, "value": "1" }), 3))
            .await
            .unwrap();
        state
            .events
            .record(event("FundCreated", json!({ "owner": ALICE, "fundAddress": FUND_ADDRESS }), 4))
            .await
            .unwrap();

        assert_eq!(scheduler.process_events().await.unwrap(), 3);

        let left = state.events.unprocessed(EVENT_BATCH).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, broken.id);

        let fund = state.funds.get_by_wallet(ALICE).await.unwrap().unwrap();
        assert!(fund.initialized);
        assert_eq!(fund.fund_address, FUND_ADDRESS);
        assert_eq!(fund.total_gross_deposited, Decimal::from(1100));

        assert!(state.tokens.holder(BOB).await.unwrap().unwrap().is_active);
        assert!(state.tokens.holder(ALICE).await.unwrap().is_none());

        // The pending fund is gone, so the retried event now goes through
        assert_eq!(scheduler.process_events().await.unwrap(), 1);
        assert_eq!(state.events.unprocessed_count().await.unwrap(), 0);
    }
}
