//! Market research survey
//!
//! Anonymous responses are keyed by UUID. A separate follow-up lets the
//! respondent leave an email to hear more.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use ethernity_core::utils::normalize_email;
use ethernity_core::utils::validation::validate_range;
use ethernity_core::{Clock, Collection, Pagination, Record, Storage};

use crate::{AppError, AppResult, ClientInfo};

/// Accepted age brackets
pub const AGE_RANGES: [&str; 6] = ["18-24", "25-34", "35-44", "45-54", "55-64", "65+"];

/// A survey response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Survey {
    pub id: String,
    pub age: String,
    pub trust_traditional: i8,
    pub blockchain_familiarity: i8,
    pub retirement_concern: i8,
    pub has_retirement_plan: i8,
    pub values_in_retirement: i8,
    pub interested_in_blockchain: i8,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for Survey {
    const COLLECTION: &'static str = "surveys";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Survey {
    fn answers(&self) -> [(&'static str, i8); 6] {
        [
            ("trust_traditional", self.trust_traditional),
            ("blockchain_familiarity", self.blockchain_familiarity),
            ("retirement_concern", self.retirement_concern),
            ("has_retirement_plan", self.has_retirement_plan),
            ("values_in_retirement", self.values_in_retirement),
            ("interested_in_blockchain", self.interested_in_blockchain),
        ]
    }
}

/// Submitted answers; each score is between -2 and 2
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyCreate {
    pub age: String,
    pub trust_traditional: i8,
    pub blockchain_familiarity: i8,
    pub retirement_concern: i8,
    pub has_retirement_plan: i8,
    pub values_in_retirement: i8,
    pub interested_in_blockchain: i8,
}

impl SurveyCreate {
    fn validate(&self) -> AppResult<()> {
        if !AGE_RANGES.contains(&self.age.as_str()) {
            return Err(AppError::InvalidInput(format!(
                "age must be one of {}",
                AGE_RANGES.join(", ")
            )));
        }
        for (field, value) in [
            ("trust_traditional", self.trust_traditional),
            ("blockchain_familiarity", self.blockchain_familiarity),
            ("retirement_concern", self.retirement_concern),
            ("has_retirement_plan", self.has_retirement_plan),
            ("values_in_retirement", self.values_in_retirement),
            ("interested_in_blockchain", self.interested_in_blockchain),
        ] {
            validate_range(value, -2, 2, field)?;
        }
        Ok(())
    }
}

/// Follow-up left after the survey
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurveyFollowUp {
    pub id: String,
    pub wants_more_info: bool,
    pub email: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for SurveyFollowUp {
    const COLLECTION: &'static str = "survey_follow_ups";

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Follow-up submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyFollowUpCreate {
    pub wants_more_info: bool,
    #[serde(default)]
    pub email: Option<String>,
}

/// Email of someone who asked for more information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterestedEmail {
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Buckets of `interested_in_blockchain`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterestLevel {
    pub high_interest: usize,
    pub moderate_interest: usize,
    pub low_interest: usize,
}

/// Aggregated survey answers
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SurveyStats {
    pub total_responses: usize,
    pub averages: BTreeMap<String, f64>,
    pub age_distribution: BTreeMap<String, usize>,
    pub interest_level: InterestLevel,
}

/// Manages survey responses
pub struct SurveyManager {
    surveys: Collection<Survey>,
    follow_ups: Collection<SurveyFollowUp>,
    clock: Arc<dyn Clock>,
}

fn newest_first<T, F>(mut items: Vec<T>, created_at: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    items.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
    items
}

impl SurveyManager {
    /// Create a new survey manager
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            surveys: Collection::new(storage.clone()),
            follow_ups: Collection::new(storage),
            clock,
        }
    }

    /// Store a response
    pub async fn create(&self, data: SurveyCreate, client: ClientInfo) -> AppResult<Survey> {
        data.validate()?;
        let survey = Survey {
            id: Uuid::new_v4().to_string(),
            age: data.age,
            trust_traditional: data.trust_traditional,
            blockchain_familiarity: data.blockchain_familiarity,
            retirement_concern: data.retirement_concern,
            has_retirement_plan: data.has_retirement_plan,
            values_in_retirement: data.values_in_retirement,
            interested_in_blockchain: data.interested_in_blockchain,
            ip_address: client.ip_address,
            user_agent: client.user_agent,
            created_at: self.clock.now(),
        };
        self.surveys.put(&survey).await?;
        info!("Survey created: {}", survey.id);
        Ok(survey)
    }

    /// Store a follow-up
    pub async fn create_follow_up(&self, data: SurveyFollowUpCreate, client: ClientInfo) -> AppResult<SurveyFollowUp> {
        let email = match data.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => Some(normalize_email(email)?),
            _ => None,
        };
        let follow_up = SurveyFollowUp {
            id: Uuid::new_v4().to_string(),
            wants_more_info: data.wants_more_info,
            email,
            ip_address: client.ip_address,
            user_agent: client.user_agent,
            created_at: self.clock.now(),
        };
        self.follow_ups.put(&follow_up).await?;

        if let (true, Some(email)) = (follow_up.wants_more_info, &follow_up.email) {
            info!("New email for mailing list: {}", email);
        }
        Ok(follow_up)
    }

    /// Responses newest first
    pub async fn list(&self, pagination: Pagination) -> AppResult<Vec<Survey>> {
        let surveys = newest_first(self.surveys.all().await?, |s| s.created_at);
        Ok(pagination.apply(surveys))
    }

    /// Follow-ups newest first
    pub async fn follow_ups(&self, pagination: Pagination) -> AppResult<Vec<SurveyFollowUp>> {
        let follow_ups = newest_first(self.follow_ups.all().await?, |f| f.created_at);
        Ok(pagination.apply(follow_ups))
    }

    /// Get a response by id
    pub async fn get(&self, id: &str) -> AppResult<Option<Survey>> {
        Ok(self.surveys.get_by_key(id).await?)
    }

    /// Delete a response
    pub async fn delete(&self, id: &str) -> AppResult<bool> {
        let deleted = self.surveys.delete_by_key(id).await?;
        if deleted {
            info!("Survey deleted: {}", id);
        }
        Ok(deleted)
    }

    /// Delete a follow-up
    pub async fn delete_follow_up(&self, id: &str) -> AppResult<bool> {
        let deleted = self.follow_ups.delete_by_key(id).await?;
        if deleted {
            info!("Follow-up deleted: {}", id);
        }
        Ok(deleted)
    }

    /// Emails of people who want more information, newest first
    pub async fn interested_emails(&self) -> AppResult<Vec<InterestedEmail>> {
        let follow_ups = self.follow_ups.filter(|f| f.wants_more_info && f.email.is_some()).await?;
        Ok(newest_first(follow_ups, |f| f.created_at)
            .into_iter()
            .filter_map(|f| f.email.map(|email| InterestedEmail { email, created_at: f.created_at }))
            .collect())
    }

    /// Aggregated answers
    pub async fn stats(&self) -> AppResult<SurveyStats> {
        let surveys = self.surveys.all().await?;
        if surveys.is_empty() {
            return Ok(SurveyStats::default());
        }

        let mut sums: BTreeMap<String, i64> = BTreeMap::new();
        let mut age_distribution: BTreeMap<String, usize> = BTreeMap::new();
        let mut interest_level = InterestLevel::default();
        for survey in &surveys {
            for (field, value) in survey.answers() {
                *sums.entry(field.to_string()).or_default() += i64::from(value);
            }
            *age_distribution.entry(survey.age.clone()).or_default() += 1;
            match survey.interested_in_blockchain {
                v if v >= 1 => interest_level.high_interest += 1,
                0 => interest_level.moderate_interest += 1,
                _ => interest_level.low_interest += 1,
            }
        }

        let total = surveys.len();
        let averages = sums
            .into_iter()
            .map(|(field, sum)| (field, (sum as f64 / total as f64 * 100.0).round() / 100.0))
            .collect();

        Ok(SurveyStats {
            total_responses: total,
            averages,
            age_distribution,
            interest_level,
        })
    }

    /// Number of stored responses
    pub async fn count(&self) -> AppResult<usize> {
        Ok(self.surveys.len().await?)
    }

    /// Number of stored follow-ups
    pub async fn follow_up_count(&self) -> AppResult<usize> {
        Ok(self.follow_ups.len().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use ethernity_core::{ManualClock, MemoryStorage};

    fn answers(age: &str, interest: i8) -> SurveyCreate {
        SurveyCreate {
            age: age.to_string(),
            trust_traditional: 1,
            blockchain_familiarity: 2,
            retirement_concern: -1,
            has_retirement_plan: 0,
            values_in_retirement: 2,
            interested_in_blockchain: interest,
        }
    }

    fn setup() -> (SurveyManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).unwrap()));
        (SurveyManager::new(Arc::new(MemoryStorage::new()), clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_validation() {
        let (manager, _) = setup();
        assert!(manager.create(answers("17-20", 0), ClientInfo::default()).await.is_err());
        assert!(manager.create(answers("25-34", 3), ClientInfo::default()).await.is_err());

        let survey = manager.create(answers("25-34", 1), ClientInfo::default()).await.unwrap();
        assert!(Uuid::parse_str(&survey.id).is_ok());
        assert_eq!(manager.get(&survey.id).await.unwrap().unwrap(), survey);

        let bad_email = SurveyFollowUpCreate { wants_more_info: true, email: Some("nope".to_string()) };
        assert!(manager.create_follow_up(bad_email, ClientInfo::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_stats() {
        let (manager, _) = setup();
        let empty = manager.stats().await.unwrap();
        assert_eq!(empty.total_responses, 0);
        assert!(empty.averages.is_empty());
        assert_eq!(empty.interest_level, InterestLevel::default());

        manager.create(answers("25-34", 2), ClientInfo::default()).await.unwrap();
        manager.create(answers("25-34", 0), ClientInfo::default()).await.unwrap();
        manager.create(answers("65+", -2), ClientInfo::default()).await.unwrap();

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.total_responses, 3);
        assert_eq!(stats.averages["blockchain_familiarity"], 2.0);
        assert_eq!(stats.averages["interested_in_blockchain"], 0.0);
        assert_eq!(stats.age_distribution["25-34"], 2);
        assert_eq!(
            stats.interest_level,
            InterestLevel { high_interest: 1, moderate_interest: 1, low_interest: 1 }
        );
    }

    #[tokio::test]
    async fn test_interested_emails() {
        let (manager, clock) = setup();
        let first = SurveyFollowUpCreate { wants_more_info: true, email: Some("First@Example.com".to_string()) };
        manager.create_follow_up(first, ClientInfo::default()).await.unwrap();
        clock.advance(Duration::hours(1));
        let silent = SurveyFollowUpCreate { wants_more_info: false, email: Some("quiet@example.com".to_string()) };
        manager.create_follow_up(silent, ClientInfo::default()).await.unwrap();
        clock.advance(Duration::hours(1));
        let second = SurveyFollowUpCreate { wants_more_info: true, email: Some("second@example.com".to_string()) };
        let latest = manager.create_follow_up(second, ClientInfo::default()).await.unwrap();

        let emails = manager.interested_emails().await.unwrap();
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[0].email, "second@example.com");
        assert_eq!(emails[1].email, "first@example.com");

        assert!(manager.delete_follow_up(&latest.id).await.unwrap());
        assert_eq!(manager.follow_ups(Pagination::default()).await.unwrap().len(), 2);
    }
}
