//! Proposals and their lifecycle

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ethernity_core::storage::id_key;
use ethernity_core::utils::{is_wallet_address, validation::validate_string_length};
use ethernity_core::Record;

use crate::{GovernanceError, GovernanceResult};

/// Types of proposals, carried as their numeric code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProposalType {
    /// Generic proposal
    General,
    /// Early retirement of a fund
    EarlyRetirement,
    /// Payout from the treasury
    Treasury,
    /// Change of a protocol parameter
    Parameter,
}

impl TryFrom<u8> for ProposalType {
    type Error = GovernanceError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ProposalType::General),
            1 => Ok(ProposalType::EarlyRetirement),
            2 => Ok(ProposalType::Treasury),
            3 => Ok(ProposalType::Parameter),
            other => Err(GovernanceError::InvalidInput(format!(
                "proposal_type must be between 0 and 3, got {}",
                other
            ))),
        }
    }
}

impl From<ProposalType> for u8 {
    fn from(kind: ProposalType) -> Self {
        match kind {
            ProposalType::General => 0,
            ProposalType::EarlyRetirement => 1,
            ProposalType::Treasury => 2,
            ProposalType::Parameter => 3,
        }
    }
}

/// Status of a proposal, derived from its timestamps, flags and tally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Voting has not started
    Pending,
    /// Open for voting
    Active,
    /// Passed, waiting for the execution timelock
    Queued,
    /// Passed and ready to execute
    Succeeded,
    /// Did not pass or missed quorum
    Defeated,
    /// Proposal has been executed
    Executed,
    /// Proposal has been cancelled
    Cancelled,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Active => "active",
            ProposalStatus::Queued => "queued",
            ProposalStatus::Succeeded => "succeeded",
            ProposalStatus::Defeated => "defeated",
            ProposalStatus::Executed => "executed",
            ProposalStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ProposalStatus::Pending),
            "active" => Ok(ProposalStatus::Active),
            "queued" => Ok(ProposalStatus::Queued),
            "succeeded" => Ok(ProposalStatus::Succeeded),
            "defeated" => Ok(ProposalStatus::Defeated),
            "executed" => Ok(ProposalStatus::Executed),
            "cancelled" => Ok(ProposalStatus::Cancelled),
            other => Err(GovernanceError::InvalidInput(format!("Unknown proposal status: {}", other))),
        }
    }
}

/// A governance proposal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub id: u64,
    /// Public sequential number, starting at 1
    pub proposal_id: u64,
    pub proposer_id: Option<u64>,
    pub proposer_address: String,
    pub title: String,
    pub description: String,
    pub proposal_type: ProposalType,
    pub target_address: Option<String>,
    pub target_value: Decimal,
    pub votes_for: Decimal,
    pub votes_against: Decimal,
    pub quorum_reached: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub execution_time: DateTime<Utc>,
    pub executed: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub transaction_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for Proposal {
    const COLLECTION: &'static str = "proposals";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

impl Proposal {
    /// More votes for than against, with quorum
    pub fn has_passed(&self) -> bool {
        self.votes_for > self.votes_against && self.quorum_reached
    }

    /// Whether voting is open at `now`
    pub fn is_voting_open(&self, now: DateTime<Utc>) -> bool {
        !self.cancelled && !self.executed && self.start_time <= now && now <= self.end_time
    }

    /// Status at `now`
    pub fn status(&self, now: DateTime<Utc>) -> ProposalStatus {
        if self.cancelled {
            return ProposalStatus::Cancelled;
        }
        if self.executed {
            return ProposalStatus::Executed;
        }

        if now < self.start_time {
            ProposalStatus::Pending
        } else if now <= self.end_time {
            ProposalStatus::Active
        } else if now < self.execution_time {
            if self.has_passed() {
                ProposalStatus::Queued
            } else {
                ProposalStatus::Defeated
            }
        } else if self.has_passed() {
            ProposalStatus::Succeeded
        } else {
            ProposalStatus::Defeated
        }
    }
}

/// Data for a new proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalCreate {
    pub title: String,
    pub description: String,
    pub proposal_type: ProposalType,
    #[serde(default)]
    pub target_address: Option<String>,
    #[serde(default)]
    pub target_value: Decimal,
}

impl ProposalCreate {
    pub(crate) fn validate(&self) -> GovernanceResult<()> {
        validate_string_length(self.title.trim(), 5, 128, "title")?;
        validate_string_length(self.description.trim(), 10, 512, "description")?;
        if let Some(target) = &self.target_address {
            if !is_wallet_address(target) {
                return Err(GovernanceError::InvalidInput(
                    "target_address must be 0x followed by 40 hex characters".to_string(),
                ));
            }
        }
        if self.target_value < Decimal::ZERO {
            return Err(GovernanceError::InvalidInput("target_value must be zero or greater".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn proposal(start: DateTime<Utc>) -> Proposal {
        Proposal {
            id: 1,
            proposal_id: 1,
            proposer_id: Some(1),
            proposer_address: "0x1111111111111111111111111111111111111111".to_string(),
            title: "Raise the quorum".to_string(),
            description: "Raise the quorum to thirty percent".to_string(),
            proposal_type: ProposalType::Parameter,
            target_address: None,
            target_value: Decimal::ZERO,
            votes_for: Decimal::ZERO,
            votes_against: Decimal::ZERO,
            quorum_reached: false,
            start_time: start,
            end_time: start + Duration::days(3),
            execution_time: start + Duration::days(5),
            executed: false,
            executed_at: None,
            cancelled: false,
            cancelled_at: None,
            cancel_reason: None,
            transaction_hash: None,
            created_at: start - Duration::days(1),
        }
    }

    #[test]
    fn test_status_timeline() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let mut p = proposal(start);

        assert_eq!(p.status(start - Duration::hours(1)), ProposalStatus::Pending);
        assert_eq!(p.status(start), ProposalStatus::Active);
        assert_eq!(p.status(p.end_time), ProposalStatus::Active);
        assert_eq!(p.status(start + Duration::days(4)), ProposalStatus::Defeated);

        p.votes_for = Decimal::from(3);
        p.votes_against = Decimal::ONE;
        p.quorum_reached = true;
        assert_eq!(p.status(start + Duration::days(4)), ProposalStatus::Queued);
        assert_eq!(p.status(p.execution_time), ProposalStatus::Succeeded);

        p.quorum_reached = false;
        assert_eq!(p.status(p.execution_time), ProposalStatus::Defeated);

        p.executed = true;
        assert_eq!(p.status(start), ProposalStatus::Executed);
        p.cancelled = true;
        assert_eq!(p.status(start), ProposalStatus::Cancelled);
    }

    #[test]
    fn test_proposal_type_codes() {
        let kind: ProposalType = serde_json::from_str("2").unwrap();
        assert_eq!(kind, ProposalType::Treasury);
        assert_eq!(serde_json::to_string(&ProposalType::EarlyRetirement).unwrap(), "1");
        assert!(serde_json::from_str::<ProposalType>("4").is_err());
        assert_eq!("Queued".parse::<ProposalStatus>().unwrap(), ProposalStatus::Queued);
    }

    #[test]
    fn test_create_validation() {
        let mut data = ProposalCreate {
            title: "Fund audit".to_string(),
            description: "Pay for an external audit".to_string(),
            proposal_type: ProposalType::Treasury,
            target_address: Some("0xabc".to_string()),
            target_value: Decimal::from(500),
        };
        assert!(data.validate().is_err());

        data.target_address = Some("0x2222222222222222222222222222222222222222".to_string());
        assert!(data.validate().is_ok());

        data.title = "Tiny".to_string();
        assert!(data.validate().is_err());
    }
}
