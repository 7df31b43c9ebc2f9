//! Votes, voter statistics and the quorum rule

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ethernity_core::storage::id_key;
use ethernity_core::Record;

const BASIS_POINTS: u32 = 10_000;

/// A vote on a proposal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub id: u64,
    pub proposal_id: u64,
    pub voter_id: Option<u64>,
    pub voter_address: String,
    /// true = for, false = against
    pub support: bool,
    /// Holder balance at the time of voting
    pub voting_power: Decimal,
    pub block_timestamp: DateTime<Utc>,
}

impl Record for Vote {
    const COLLECTION: &'static str = "votes";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

/// Participation of a user, keyed by user id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoterStats {
    pub user_id: u64,
    pub voter_address: String,
    pub total_votes_cast: u32,
    pub proposals_created: u32,
    pub votes_for_count: u32,
    pub votes_against_count: u32,
    pub last_vote_timestamp: Option<DateTime<Utc>>,
    pub last_proposal_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Record for VoterStats {
    const COLLECTION: &'static str = "voter_stats";

    fn key(&self) -> String {
        id_key(self.user_id)
    }
}

impl VoterStats {
    pub(crate) fn new(user_id: u64, voter_address: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            voter_address: voter_address.to_string(),
            total_votes_cast: 0,
            proposals_created: 0,
            votes_for_count: 0,
            votes_against_count: 0,
            last_vote_timestamp: None,
            last_proposal_at: None,
            updated_at: now,
        }
    }
}

/// Public view of a voter's participation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VoterStatsReport {
    pub total_votes_cast: u32,
    pub proposals_created: u32,
    pub last_vote_timestamp: Option<DateTime<Utc>>,
}

impl From<VoterStats> for VoterStatsReport {
    fn from(stats: VoterStats) -> Self {
        Self {
            total_votes_cast: stats.total_votes_cast,
            proposals_created: stats.proposals_created,
            last_vote_timestamp: stats.last_vote_timestamp,
        }
    }
}

/// Whether a wallet may vote on a proposal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteEligibility {
    pub can_vote: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voting_power: Option<Decimal>,
}

impl VoteEligibility {
    pub(crate) fn denied(reason: &str) -> Self {
        Self { can_vote: false, reason: Some(reason.to_string()), voting_power: None }
    }

    pub(crate) fn allowed(voting_power: Decimal) -> Self {
        Self { can_vote: true, reason: None, voting_power: Some(voting_power) }
    }
}

/// Votes needed for quorum given the number of active holders
pub fn required_votes(active_holders: usize, quorum_bps: u32) -> Decimal {
    Decimal::from(active_holders as u64) * Decimal::from(quorum_bps) / Decimal::from(BASIS_POINTS)
}

/// Whether `total_votes` reaches quorum; never true without active holders
pub fn quorum_reached(total_votes: Decimal, active_holders: usize, quorum_bps: u32) -> bool {
    active_holders > 0 && total_votes >= required_votes(active_holders, quorum_bps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum() {
        assert_eq!(required_votes(10, 2_000), Decimal::from(2));
        assert!(quorum_reached(Decimal::from(2), 10, 2_000));
        assert!(!quorum_reached(Decimal::ONE, 10, 2_000));
        assert!(quorum_reached(Decimal::ONE, 3, 2_000));
        assert!(!quorum_reached(Decimal::from(5), 0, 2_000));
    }
}
