//! Governance manager
//!
//! Owns the proposal, vote and voter statistics collections. Voting power and
//! eligibility come from the GERAS token holders kept by [`TokenManager`].

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use ethernity_core::config::GovernanceConfig;
use ethernity_core::utils::{is_transaction_hash, normalize_wallet};
use ethernity_core::{Clock, Collection, Pagination, Storage};
use ethernity_economic::{TokenActivityCreate, TokenActivityType, TokenManager};
use ethernity_identity::UserManager;

use crate::proposals::{Proposal, ProposalCreate, ProposalStatus, ProposalType};
use crate::voting::{quorum_reached, Vote, VoteEligibility, VoterStats, VoterStatsReport};
use crate::{GovernanceError, GovernanceResult};

/// Aggregate governance figures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalStats {
    pub total_proposals: usize,
    pub active_proposals: usize,
    pub executed_proposals: usize,
    pub total_votes: usize,
}

/// Proposal and voting service
pub struct GovernanceManager {
    proposals: Collection<Proposal>,
    votes: Collection<Vote>,
    voter_stats: Collection<VoterStats>,
    users: Arc<UserManager>,
    tokens: Arc<TokenManager>,
    config: GovernanceConfig,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl GovernanceManager {
    /// Create a new governance manager
    pub fn new(
        storage: Arc<dyn Storage>,
        users: Arc<UserManager>,
        tokens: Arc<TokenManager>,
        config: GovernanceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            proposals: Collection::new(storage.clone()),
            votes: Collection::new(storage.clone()),
            voter_stats: Collection::new(storage),
            users,
            tokens,
            config,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    async fn require(&self, proposal_id: u64) -> GovernanceResult<Proposal> {
        self.proposals.get(proposal_id).await?.ok_or(GovernanceError::ProposalNotFound)
    }

    async fn load_voter_stats(&self, user_id: u64, wallet: &str) -> GovernanceResult<VoterStats> {
        Ok(self
            .voter_stats
            .get(user_id)
            .await?
            .unwrap_or_else(|| VoterStats::new(user_id, wallet, self.clock.now())))
    }

    /// Create a proposal; the proposer must hold an active token
    pub async fn create_proposal(&self, wallet: &str, data: ProposalCreate) -> GovernanceResult<Proposal> {
        data.validate()?;
        let wallet = normalize_wallet(wallet)?;
        if self.tokens.active_holder(&wallet).await?.is_none() {
            return Err(GovernanceError::PermissionDenied(
                "Must be an active token holder to create proposals".to_string(),
            ));
        }
        let user = self.users.get_by_wallet(&wallet).await?;

        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();
        let start_time = now + Duration::seconds(self.config.voting_delay_secs);
        let end_time = start_time + Duration::seconds(self.config.voting_period_secs);
        let id = self.proposals.next_id().await?;

        // A failed activity write must leave nothing saved
        self.tokens
            .record_activity(
                &wallet,
                TokenActivityCreate::new(TokenActivityType::ProposalCreated, format!("Created proposal #{}", id)),
            )
            .await?;

        let proposal = Proposal {
            id,
            proposal_id: id,
            proposer_id: user.as_ref().map(|u| u.id),
            proposer_address: wallet.clone(),
            title: data.title.trim().to_string(),
            description: data.description.trim().to_string(),
            proposal_type: data.proposal_type,
            target_address: data.target_address.map(|a| a.to_lowercase()),
            target_value: data.target_value,
            votes_for: Decimal::ZERO,
            votes_against: Decimal::ZERO,
            quorum_reached: false,
            start_time,
            end_time,
            execution_time: end_time + Duration::seconds(self.config.execution_delay_secs),
            executed: false,
            executed_at: None,
            cancelled: false,
            cancelled_at: None,
            cancel_reason: None,
            transaction_hash: None,
            created_at: now,
        };
        self.proposals.put(&proposal).await?;

        if let Some(user) = &user {
            let mut stats = self.load_voter_stats(user.id, &wallet).await?;
            stats.proposals_created += 1;
            stats.last_proposal_at = Some(now);
            stats.updated_at = now;
            self.voter_stats.put(&stats).await?;
        }

        info!("Proposal #{} created by {}", proposal.proposal_id, wallet);
        Ok(proposal)
    }

    /// Proposals newest first, filtered by computed status and type
    pub async fn list(
        &self,
        pagination: Pagination,
        status: Option<ProposalStatus>,
        proposal_type: Option<ProposalType>,
    ) -> GovernanceResult<Vec<Proposal>> {
        let now = self.clock.now();
        let mut proposals = self
            .proposals
            .filter(|p| {
                status.map_or(true, |s| p.status(now) == s)
                    && proposal_type.map_or(true, |t| p.proposal_type == t)
            })
            .await?;
        proposals.reverse();
        Ok(pagination.apply(proposals))
    }

    /// Get a proposal by its number
    pub async fn get(&self, proposal_id: u64) -> GovernanceResult<Option<Proposal>> {
        Ok(self.proposals.get(proposal_id).await?)
    }

    /// Proposals currently open for voting
    pub async fn active(&self) -> GovernanceResult<Vec<Proposal>> {
        let now = self.clock.now();
        Ok(self.proposals.filter(|p| p.is_voting_open(now)).await?)
    }

    /// Passed proposals whose execution timelock has expired
    pub async fn pending_execution(&self) -> GovernanceResult<Vec<Proposal>> {
        let now = self.clock.now();
        Ok(self
            .proposals
            .filter(|p| p.status(now) == ProposalStatus::Succeeded)
            .await?)
    }

    /// Cast a vote weighted by the holder's balance
    pub async fn cast_vote(&self, proposal_id: u64, wallet: &str, support: bool) -> GovernanceResult<Vote> {
        let wallet = normalize_wallet(wallet)?;

        let _guard = self.write_lock.lock().await;
        let mut proposal = self.require(proposal_id).await?;
        let now = self.clock.now();
        if now < proposal.start_time {
            return Err(GovernanceError::InvalidState("Voting has not started".to_string()));
        }
        if now > proposal.end_time {
            return Err(GovernanceError::InvalidState("Voting has ended".to_string()));
        }
        if proposal.cancelled {
            return Err(GovernanceError::InvalidState("Proposal is cancelled".to_string()));
        }
        if proposal.executed {
            return Err(GovernanceError::InvalidState("Proposal already executed".to_string()));
        }

        let holder = self.tokens.active_holder(&wallet).await?.ok_or_else(|| {
            GovernanceError::PermissionDenied("Must hold active GERAS token to vote".to_string())
        })?;
        if self
            .votes
            .find(|v| v.proposal_id == proposal_id && v.voter_address == wallet)
            .await?
            .is_some()
        {
            return Err(GovernanceError::AlreadyVoted("Already voted on this proposal".to_string()));
        }

        self.tokens
            .record_activity(
                &wallet,
                TokenActivityCreate::new(
                    TokenActivityType::VoteCast,
                    format!("Voted {} proposal #{}", if support { "for" } else { "against" }, proposal_id),
                ),
            )
            .await?;

        let user = self.users.get_by_wallet(&wallet).await?;
        let vote = Vote {
            id: self.votes.next_id().await?,
            proposal_id,
            voter_id: user.as_ref().map(|u| u.id),
            voter_address: wallet.clone(),
            support,
            voting_power: holder.balance,
            block_timestamp: now,
        };
        self.votes.put(&vote).await?;

        if support {
            proposal.votes_for += vote.voting_power;
        } else {
            proposal.votes_against += vote.voting_power;
        }
        let active_holders = self.tokens.active_holder_count().await?;
        if quorum_reached(proposal.votes_for + proposal.votes_against, active_holders, self.config.quorum_bps) {
            proposal.quorum_reached = true;
        }
        self.proposals.put(&proposal).await?;

        if let Some(user) = &user {
            let mut stats = self.load_voter_stats(user.id, &wallet).await?;
            stats.total_votes_cast += 1;
            if support {
                stats.votes_for_count += 1;
            } else {
                stats.votes_against_count += 1;
            }
            stats.last_vote_timestamp = Some(now);
            stats.updated_at = now;
            self.voter_stats.put(&stats).await?;
        }

        info!(
            "Vote cast on proposal #{}: {}",
            proposal_id,
            if support { "FOR" } else { "AGAINST" }
        );
        Ok(vote)
    }

    /// Whether `wallet` can vote on a proposal right now
    pub async fn can_vote(&self, proposal_id: u64, wallet: &str) -> GovernanceResult<VoteEligibility> {
        let Some(proposal) = self.proposals.get(proposal_id).await? else {
            return Ok(VoteEligibility::denied("Proposal not found"));
        };
        let now = self.clock.now();
        if now < proposal.start_time {
            return Ok(VoteEligibility::denied("Voting not started"));
        }
        if now > proposal.end_time {
            return Ok(VoteEligibility::denied("Voting ended"));
        }
        if proposal.cancelled {
            return Ok(VoteEligibility::denied("Proposal cancelled"));
        }
        if proposal.executed {
            return Ok(VoteEligibility::denied("Proposal executed"));
        }

        let wallet = wallet.trim().to_lowercase();
        let Some(holder) = self.tokens.active_holder(&wallet).await? else {
            return Ok(VoteEligibility::denied("Not a token holder"));
        };
        if self
            .votes
            .find(|v| v.proposal_id == proposal_id && v.voter_address == wallet)
            .await?
            .is_some()
        {
            return Ok(VoteEligibility::denied("Already voted"));
        }
        Ok(VoteEligibility::allowed(holder.balance))
    }

    /// Votes on a proposal, newest first
    pub async fn votes(&self, proposal_id: u64, pagination: Pagination) -> GovernanceResult<Vec<Vote>> {
        let mut votes = self.votes.filter(|v| v.proposal_id == proposal_id).await?;
        votes.reverse();
        Ok(pagination.apply(votes))
    }

    /// Votes cast on a given day
    pub async fn votes_on(&self, date: NaiveDate) -> GovernanceResult<Vec<Vote>> {
        Ok(self.votes.filter(|v| v.block_timestamp.date_naive() == date).await?)
    }

    /// Execute a passed proposal after its timelock
    pub async fn execute(&self, proposal_id: u64, tx_hash: &str) -> GovernanceResult<Proposal> {
        if !is_transaction_hash(tx_hash) {
            return Err(GovernanceError::InvalidInput(
                "transaction_hash must be 0x followed by 64 hex characters".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        let mut proposal = self.require(proposal_id).await?;
        if proposal.executed {
            return Err(GovernanceError::InvalidState("Proposal already executed".to_string()));
        }
        if proposal.cancelled {
            return Err(GovernanceError::InvalidState("Proposal is cancelled".to_string()));
        }
        let now = self.clock.now();
        if now <= proposal.end_time {
            return Err(GovernanceError::InvalidState("Voting not finished".to_string()));
        }
        if now < proposal.execution_time {
            return Err(GovernanceError::InvalidState("Execution timelock not expired".to_string()));
        }
        if proposal.votes_for <= proposal.votes_against {
            return Err(GovernanceError::InvalidState("Proposal not approved".to_string()));
        }
        if !proposal.quorum_reached {
            return Err(GovernanceError::InvalidState("Quorum not reached".to_string()));
        }

        proposal.executed = true;
        proposal.executed_at = Some(now);
        proposal.transaction_hash = Some(tx_hash.to_string());
        self.proposals.put(&proposal).await?;

        info!("Proposal #{} executed", proposal_id);
        Ok(proposal)
    }

    /// Cancel a proposal
    ///
    /// The proposer may cancel only before voting starts; anyone else needs
    /// admin rights, which allow cancelling at any time.
    pub async fn cancel(&self, proposal_id: u64, wallet: &str, reason: &str, is_admin: bool) -> GovernanceResult<Proposal> {
        let wallet = wallet.trim().to_lowercase();

        let _guard = self.write_lock.lock().await;
        let mut proposal = self.require(proposal_id).await?;
        if proposal.cancelled {
            return Err(GovernanceError::InvalidState("Already cancelled".to_string()));
        }
        if proposal.executed {
            return Err(GovernanceError::InvalidState("Already executed".to_string()));
        }

        let now = self.clock.now();
        if !is_admin {
            if wallet != proposal.proposer_address {
                return Err(GovernanceError::PermissionDenied(
                    "Only the proposer or an admin can cancel this proposal".to_string(),
                ));
            }
            if now >= proposal.start_time {
                return Err(GovernanceError::InvalidState(
                    "Proposer can only cancel before voting starts".to_string(),
                ));
            }
        }

        proposal.cancelled = true;
        proposal.cancelled_at = Some(now);
        proposal.cancel_reason = Some(reason.trim().to_string());
        self.proposals.put(&proposal).await?;

        info!("Proposal #{} cancelled: {}", proposal_id, reason);
        Ok(proposal)
    }

    /// Aggregate figures
    pub async fn stats(&self) -> GovernanceResult<ProposalStats> {
        let now = self.clock.now();
        let proposals = self.proposals.all().await?;
        Ok(ProposalStats {
            total_proposals: proposals.len(),
            active_proposals: proposals.iter().filter(|p| p.is_voting_open(now)).count(),
            executed_proposals: proposals.iter().filter(|p| p.executed).count(),
            total_votes: self.votes.len().await?,
        })
    }

    /// Proposals neither executed nor cancelled
    pub async fn open_count(&self) -> GovernanceResult<usize> {
        Ok(self.proposals.count(|p| !p.executed && !p.cancelled).await?)
    }

    /// Participation of a user; zeros when they never took part
    pub async fn voter_stats(&self, wallet: &str) -> GovernanceResult<VoterStatsReport> {
        let user = self.users.get_by_wallet(wallet).await?.ok_or(GovernanceError::UserNotFound)?;
        let stats = self.voter_stats.get(user.id).await?;
        debug!("Voter stats requested for {}", user.wallet_address);
        Ok(stats.map(VoterStatsReport::from).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ethernity_core::config::TokenConfig;
    use ethernity_core::{ManualClock, MemoryStorage, StorageError, StorageResult};
    use ethernity_identity::UserCreate;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x2222222222222222222222222222222222222222";
    const CAROL: &str = "0x3333333333333333333333333333333333333333";

    fn tx(n: u8) -> String {
        format!("0x{}", format!("{:02x}", n).repeat(32))
    }

    fn general(title: &str) -> ProposalCreate {
        ProposalCreate {
            title: title.to_string(),
            description: "A proposal to change something".to_string(),
            proposal_type: ProposalType::General,
            target_address: None,
            target_value: Decimal::ZERO,
        }
    }

    /// Memory storage whose writes under `prefix` can be switched to fail
    struct FailingStorage {
        inner: MemoryStorage,
        prefix: &'static str,
        failing: AtomicBool,
    }

    impl FailingStorage {
        fn new(prefix: &'static str) -> Self {
            Self { inner: MemoryStorage::new(), prefix, failing: AtomicBool::new(false) }
        }
    }

    #[async_trait::async_trait]
    impl Storage for FailingStorage {
        async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
            if self.failing.load(Ordering::SeqCst) && key.contains(self.prefix) {
                return Err(StorageError::Backend("write rejected".to_string()));
            }
            self.inner.put(key, data).await
        }

        async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.inner.delete(key).await
        }

        async fn exists(&self, key: &str) -> StorageResult<bool> {
            self.inner.exists(key).await
        }

        async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
            self.inner.list(prefix).await
        }

        fn base_path(&self) -> Option<PathBuf> {
            None
        }
    }

    async fn setup() -> (GovernanceManager, Arc<ManualClock>) {
        setup_on(Arc::new(MemoryStorage::new())).await
    }

    async fn setup_on(storage: Arc<dyn Storage>) -> (GovernanceManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()));
        let users = Arc::new(UserManager::new(storage.clone(), clock.clone()));
        let tokens = Arc::new(TokenManager::new(storage.clone(), TokenConfig::default(), clock.clone()));
        for wallet in [ALICE, BOB] {
            let user = users.register(UserCreate::for_wallet(wallet)).await.unwrap();
            tokens.mint(user.id, wallet).await.unwrap();
        }
        users.register(UserCreate::for_wallet(CAROL)).await.unwrap();

        let manager = GovernanceManager::new(storage, users, tokens, GovernanceConfig::default(), clock.clone());
        (manager, clock)
    }

    #[tokio::test]
    async fn test_only_holders_propose() {
        let (gov, _) = setup().await;
        let err = gov.create_proposal(CAROL, general("Carol's idea")).await.unwrap_err();
        assert_eq!(err.to_string(), "Must be an active token holder to create proposals");

        let first = gov.create_proposal(ALICE, general("First proposal")).await.unwrap();
        let second = gov.create_proposal(ALICE, general("Second proposal")).await.unwrap();
        assert_eq!((first.proposal_id, second.proposal_id), (1, 2));
        assert_eq!(first.end_time - first.start_time, Duration::days(3));
        assert_eq!(first.execution_time - first.end_time, Duration::days(2));

        let listed = gov.list(Pagination::default(), None, None).await.unwrap();
        assert_eq!(listed[0].proposal_id, 2);
        assert_eq!(gov.voter_stats(ALICE).await.unwrap().proposals_created, 2);
        assert_eq!(gov.voter_stats(CAROL).await.unwrap(), VoterStatsReport::default());
    }

    #[tokio::test]
    async fn test_vote_rules_and_quorum() {
        let (gov, clock) = setup().await;
        let proposal = gov.create_proposal(ALICE, general("Quorum check")).await.unwrap();

        let err = gov.cast_vote(proposal.proposal_id, BOB, true).await.unwrap_err();
        assert_eq!(err.to_string(), "Voting has not started");

        clock.advance(Duration::days(1));
        let eligibility = gov.can_vote(proposal.proposal_id, BOB).await.unwrap();
        assert!(eligibility.can_vote);
        assert_eq!(eligibility.voting_power, Some(Decimal::ONE));

        gov.cast_vote(proposal.proposal_id, BOB, true).await.unwrap();
        let err = gov.cast_vote(proposal.proposal_id, BOB, false).await.unwrap_err();
        assert_eq!(err.to_string(), "Already voted on this proposal");
        assert!(matches!(
            gov.cast_vote(proposal.proposal_id, CAROL, true).await,
            Err(GovernanceError::PermissionDenied(_))
        ));

        let tallied = gov.get(proposal.proposal_id).await.unwrap().unwrap();
        assert_eq!(tallied.votes_for, Decimal::ONE);
        assert!(tallied.quorum_reached);
        assert_eq!(gov.active().await.unwrap().len(), 1);
        assert_eq!(gov.voter_stats(BOB).await.unwrap().total_votes_cast, 1);

        clock.advance(Duration::days(4));
        let err = gov.cast_vote(proposal.proposal_id, ALICE, true).await.unwrap_err();
        assert_eq!(err.to_string(), "Voting has ended");
    }

    #[tokio::test]
    async fn test_failed_activity_write_saves_nothing() {
        let storage = Arc::new(FailingStorage::new("token_activities"));
        let (gov, clock) = setup_on(storage.clone()).await;
        let proposal = gov.create_proposal(ALICE, general("Activity first")).await.unwrap();
        clock.advance(Duration::days(1));

        storage.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            gov.cast_vote(proposal.proposal_id, BOB, true).await,
            Err(GovernanceError::Economic(_))
        ));
        assert!(gov.votes(proposal.proposal_id, Pagination::default()).await.unwrap().is_empty());
        assert_eq!(gov.get(proposal.proposal_id).await.unwrap().unwrap().votes_for, Decimal::ZERO);
        assert_eq!(gov.voter_stats(BOB).await.unwrap().total_votes_cast, 0);

        assert!(gov.create_proposal(ALICE, general("Never saved")).await.is_err());
        assert_eq!(gov.list(Pagination::default(), None, None).await.unwrap().len(), 1);
        assert_eq!(gov.voter_stats(ALICE).await.unwrap().proposals_created, 1);

        // Once writes succeed again the vote goes through
        storage.failing.store(false, Ordering::SeqCst);
        gov.cast_vote(proposal.proposal_id, BOB, true).await.unwrap();
        assert_eq!(gov.get(proposal.proposal_id).await.unwrap().unwrap().votes_for, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_execute_after_timelock() {
        let (gov, clock) = setup().await;
        let proposal = gov.create_proposal(ALICE, general("Execute me")).await.unwrap();
        clock.advance(Duration::days(1));
        gov.cast_vote(proposal.proposal_id, ALICE, true).await.unwrap();

        let err = gov.execute(proposal.proposal_id, &tx(1)).await.unwrap_err();
        assert_eq!(err.to_string(), "Voting not finished");

        clock.advance(Duration::days(4));
        let err = gov.execute(proposal.proposal_id, &tx(1)).await.unwrap_err();
        assert_eq!(err.to_string(), "Execution timelock not expired");
        let queued = gov.list(Pagination::default(), Some(ProposalStatus::Queued), None).await.unwrap();
        assert_eq!(queued.len(), 1);

        clock.advance(Duration::days(1));
        assert_eq!(gov.pending_execution().await.unwrap().len(), 1);
        let executed = gov.execute(proposal.proposal_id, &tx(1)).await.unwrap();
        assert!(executed.executed);

        let err = gov.execute(proposal.proposal_id, &tx(1)).await.unwrap_err();
        assert_eq!(err.to_string(), "Proposal already executed");
        assert_eq!(gov.stats().await.unwrap().executed_proposals, 1);
    }

    #[tokio::test]
    async fn test_rejected_proposal_cannot_execute() {
        let (gov, clock) = setup().await;
        let proposal = gov.create_proposal(ALICE, general("Unpopular idea")).await.unwrap();
        clock.advance(Duration::days(1));
        gov.cast_vote(proposal.proposal_id, ALICE, true).await.unwrap();
        gov.cast_vote(proposal.proposal_id, BOB, false).await.unwrap();

        clock.advance(Duration::days(6));
        let err = gov.execute(proposal.proposal_id, &tx(2)).await.unwrap_err();
        assert_eq!(err.to_string(), "Proposal not approved");
        let status = gov.get(proposal.proposal_id).await.unwrap().unwrap().status(clock.now());
        assert_eq!(status, ProposalStatus::Defeated);
    }

    #[tokio::test]
    async fn test_cancel_permissions() {
        let (gov, clock) = setup().await;
        let proposal = gov.create_proposal(ALICE, general("Cancel me")).await.unwrap();

        let err = gov.cancel(proposal.proposal_id, BOB, "no", false).await.unwrap_err();
        assert!(matches!(err, GovernanceError::PermissionDenied(_)));

        clock.advance(Duration::days(1));
        let err = gov.cancel(proposal.proposal_id, ALICE, "changed my mind", false).await.unwrap_err();
        assert_eq!(err.to_string(), "Proposer can only cancel before voting starts");

        let cancelled = gov.cancel(proposal.proposal_id, BOB, "spam", true).await.unwrap();
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("spam"));
        let err = gov.cancel(proposal.proposal_id, BOB, "spam", true).await.unwrap_err();
        assert_eq!(err.to_string(), "Already cancelled");

        let eligibility = gov.can_vote(proposal.proposal_id, BOB).await.unwrap();
        assert_eq!(eligibility.reason.as_deref(), Some("Proposal cancelled"));
    }
}
