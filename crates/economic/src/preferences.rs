//! Yield routing preferences
//!
//! A user's preferences decide which protocol their fund's capital should be
//! routed to. [`PreferenceManager::recommendation`] applies the chosen
//! strategy over the active protocols within the user's risk tolerance.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use ethernity_core::storage::id_key;
use ethernity_core::utils::validation::validate_range;
use ethernity_core::{Clock, Collection, Record, Storage};
use ethernity_identity::UserManager;

use crate::protocols::{DeFiProtocol, ProtocolManager};
use crate::{EconomicError, EconomicResult};

/// How capital is routed between protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    Manual = 0,
    BestApy = 1,
    RiskAdjusted = 2,
    Diversified = 3,
}

impl RoutingStrategy {
    /// Strategy from its numeric code
    pub fn from_code(code: u8) -> EconomicResult<Self> {
        match code {
            0 => Ok(RoutingStrategy::Manual),
            1 => Ok(RoutingStrategy::BestApy),
            2 => Ok(RoutingStrategy::RiskAdjusted),
            3 => Ok(RoutingStrategy::Diversified),
            other => Err(EconomicError::InvalidInput(format!(
                "strategy_type must be between 0 and 3, got {}",
                other
            ))),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_risk_tolerance() -> u8 {
    2
}

/// Stored preferences of a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPreference {
    pub id: u64,
    pub user_id: u64,
    pub wallet_address: String,
    pub selected_protocol_id: Option<u64>,
    pub auto_compound: bool,
    pub risk_tolerance: u8,
    /// [`RoutingStrategy`] code
    pub strategy_type: u8,
    pub diversification_percent: u8,
    pub rebalance_threshold: u32,
    pub total_deposited: Decimal,
    pub total_withdrawn: Decimal,
    pub last_update: DateTime<Utc>,
}

impl Record for UserPreference {
    const COLLECTION: &'static str = "user_preferences";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

/// Initial preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferenceCreate {
    #[serde(default)]
    pub selected_protocol_id: Option<u64>,
    #[serde(default = "default_true")]
    pub auto_compound: bool,
    #[serde(default = "default_risk_tolerance")]
    pub risk_tolerance: u8,
    #[serde(default)]
    pub strategy_type: u8,
    #[serde(default)]
    pub diversification_percent: u8,
    #[serde(default)]
    pub rebalance_threshold: u32,
}

impl Default for UserPreferenceCreate {
    fn default() -> Self {
        Self {
            selected_protocol_id: None,
            auto_compound: true,
            risk_tolerance: default_risk_tolerance(),
            strategy_type: 0,
            diversification_percent: 0,
            rebalance_threshold: 0,
        }
    }
}

/// Partial preference update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreferenceUpdate {
    pub selected_protocol_id: Option<u64>,
    pub auto_compound: Option<bool>,
    pub risk_tolerance: Option<u8>,
    pub strategy_type: Option<u8>,
    pub diversification_percent: Option<u8>,
    pub rebalance_threshold: Option<u32>,
}

fn validate_fields(
    risk_tolerance: Option<u8>,
    strategy_type: Option<u8>,
    diversification_percent: Option<u8>,
    rebalance_threshold: Option<u32>,
) -> EconomicResult<()> {
    if let Some(risk) = risk_tolerance {
        validate_range(risk, 1, 3, "risk_tolerance")?;
    }
    if let Some(strategy) = strategy_type {
        RoutingStrategy::from_code(strategy)?;
    }
    if let Some(percent) = diversification_percent {
        validate_range(percent, 0, 100, "diversification_percent")?;
    }
    if let Some(threshold) = rebalance_threshold {
        validate_range(threshold, 0, 1_000, "rebalance_threshold")?;
    }
    Ok(())
}

/// Protocol suggested for a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyRecommendation {
    pub recommended_protocol_id: u64,
    pub protocol_name: String,
    pub protocol_address: String,
    pub apy: u32,
    pub risk_level: u8,
    pub reason: String,
}

impl StrategyRecommendation {
    fn new(protocol: DeFiProtocol, reason: &str) -> Self {
        Self {
            recommended_protocol_id: protocol.id,
            protocol_name: protocol.name,
            protocol_address: protocol.protocol_address,
            apy: protocol.apy,
            risk_level: protocol.risk_level,
            reason: reason.to_string(),
        }
    }
}

/// Manages routing preferences
pub struct PreferenceManager {
    preferences: Collection<UserPreference>,
    users: Arc<UserManager>,
    protocols: Arc<ProtocolManager>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl PreferenceManager {
    /// Create a new preference manager
    pub fn new(
        storage: Arc<dyn Storage>,
        users: Arc<UserManager>,
        protocols: Arc<ProtocolManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            preferences: Collection::new(storage),
            users,
            protocols,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Preferences of a wallet
    pub async fn get(&self, wallet: &str) -> EconomicResult<Option<UserPreference>> {
        let user = match self.users.get_by_wallet(wallet).await? {
            Some(user) => user,
            None => return Ok(None),
        };
        Ok(self.preferences.find(|p| p.user_id == user.id).await?)
    }

    /// Store preferences for a registered wallet
    pub async fn create(&self, wallet: &str, data: UserPreferenceCreate) -> EconomicResult<UserPreference> {
        validate_fields(
            Some(data.risk_tolerance),
            Some(data.strategy_type),
            Some(data.diversification_percent),
            Some(data.rebalance_threshold),
        )?;
        let user = self.users.get_by_wallet(wallet).await?.ok_or(EconomicError::UserNotFound)?;

        let _guard = self.write_lock.lock().await;
        if self.preferences.find(|p| p.user_id == user.id).await?.is_some() {
            return Err(EconomicError::AlreadyExists("Preferences already exist".to_string()));
        }

        let preference = UserPreference {
            id: self.preferences.next_id().await?,
            user_id: user.id,
            wallet_address: user.wallet_address.clone(),
            selected_protocol_id: data.selected_protocol_id,
            auto_compound: data.auto_compound,
            risk_tolerance: data.risk_tolerance,
            strategy_type: data.strategy_type,
            diversification_percent: data.diversification_percent,
            rebalance_threshold: data.rebalance_threshold,
            total_deposited: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            last_update: self.clock.now(),
        };
        self.preferences.put(&preference).await?;

        info!("Preferences created for {}", user.wallet_address);
        Ok(preference)
    }

    /// Apply a partial update; `None` when the wallet has no preferences
    pub async fn update(&self, wallet: &str, update: UserPreferenceUpdate) -> EconomicResult<Option<UserPreference>> {
        validate_fields(
            update.risk_tolerance,
            update.strategy_type,
            update.diversification_percent,
            update.rebalance_threshold,
        )?;

        let _guard = self.write_lock.lock().await;
        let mut preference = match self.get(wallet).await? {
            Some(preference) => preference,
            None => return Ok(None),
        };
        if let Some(protocol_id) = update.selected_protocol_id {
            preference.selected_protocol_id = Some(protocol_id);
        }
        if let Some(auto_compound) = update.auto_compound {
            preference.auto_compound = auto_compound;
        }
        if let Some(risk) = update.risk_tolerance {
            preference.risk_tolerance = risk;
        }
        if let Some(strategy) = update.strategy_type {
            preference.strategy_type = strategy;
        }
        if let Some(percent) = update.diversification_percent {
            preference.diversification_percent = percent;
        }
        if let Some(threshold) = update.rebalance_threshold {
            preference.rebalance_threshold = threshold;
        }
        preference.last_update = self.clock.now();
        self.preferences.put(&preference).await?;

        info!("Preferences updated for {}", preference.wallet_address);
        Ok(Some(preference))
    }

    /// Protocol suggested by the user's strategy, if any qualifies
    pub async fn recommendation(&self, wallet: &str) -> EconomicResult<Option<StrategyRecommendation>> {
        let preference = match self.get(wallet).await? {
            Some(preference) => preference,
            None => return Ok(None),
        };
        let candidates = self.protocols.active_within_risk(preference.risk_tolerance).await?;

        let recommendation = match RoutingStrategy::from_code(preference.strategy_type)? {
            RoutingStrategy::Manual => match preference.selected_protocol_id {
                Some(id) => self
                    .protocols
                    .get(id)
                    .await?
                    .map(|p| StrategyRecommendation::new(p, "Manually selected protocol")),
                None => None,
            },
            RoutingStrategy::BestApy => best_by_apy(candidates)
                .map(|p| StrategyRecommendation::new(p, "Highest APY within risk tolerance")),
            RoutingStrategy::RiskAdjusted => best_risk_adjusted(candidates)
                .map(|p| StrategyRecommendation::new(p, "Best risk-adjusted return")),
            RoutingStrategy::Diversified => {
                let mut per_tier: BTreeMap<u8, DeFiProtocol> = BTreeMap::new();
                for protocol in candidates {
                    match per_tier.get(&protocol.risk_level) {
                        Some(best) if best.apy >= protocol.apy => {}
                        _ => {
                            per_tier.insert(protocol.risk_level, protocol);
                        }
                    }
                }
                best_by_apy(per_tier.into_values().collect())
                    .map(|p| StrategyRecommendation::new(p, "Diversified across risk tiers"))
            }
        };
        Ok(recommendation)
    }
}

/// Highest APY; the earliest registered wins ties
fn best_by_apy(protocols: Vec<DeFiProtocol>) -> Option<DeFiProtocol> {
    protocols.into_iter().fold(None, |best, p| match best {
        Some(b) if b.apy >= p.apy => Some(b),
        _ => Some(p),
    })
}

/// Highest APY per unit of risk; zero APY never qualifies
fn best_risk_adjusted(protocols: Vec<DeFiProtocol>) -> Option<DeFiProtocol> {
    let score = |p: &DeFiProtocol| p.apy as f64 / p.risk_level.max(1) as f64;
    protocols
        .into_iter()
        .filter(|p| p.apy > 0)
        .fold(None, |best, p| match best {
            Some(b) if score(&b) >= score(&p) => Some(b),
            _ => Some(p),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::DeFiProtocolCreate;
    use chrono::TimeZone;
    use ethernity_core::{ManualClock, MemoryStorage};
    use ethernity_identity::UserCreate;

    const WALLET: &str = "0x6666666666666666666666666666666666666666";

    async fn setup() -> PreferenceManager {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()));
        let users = Arc::new(UserManager::new(storage.clone(), clock.clone()));
        users.register(UserCreate::for_wallet(WALLET)).await.unwrap();

        let protocols = Arc::new(ProtocolManager::new(storage.clone(), clock.clone()));
        for (n, apy, risk_level) in [(1u8, 400u32, 1u8), (2, 700, 2), (3, 1200, 3), (4, 500, 1)] {
            protocols
                .add(DeFiProtocolCreate {
                    protocol_address: format!("0x{}", format!("{:02x}", n).repeat(20)),
                    name: format!("P{}", n),
                    apy,
                    risk_level,
                })
                .await
                .unwrap();
        }
        PreferenceManager::new(storage, users, protocols, clock)
    }

    async fn recommend(manager: &PreferenceManager, strategy_type: u8, risk_tolerance: u8) -> Option<StrategyRecommendation> {
        manager
            .update(
                WALLET,
                UserPreferenceUpdate {
                    strategy_type: Some(strategy_type),
                    risk_tolerance: Some(risk_tolerance),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        manager.recommendation(WALLET).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_requires_user_and_is_unique() {
        let manager = setup().await;
        let err = manager
            .create("0x7777777777777777777777777777777777777777", UserPreferenceCreate::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "User not found");

        let created = manager.create(WALLET, UserPreferenceCreate::default()).await.unwrap();
        assert_eq!(created.risk_tolerance, 2);
        assert!(created.auto_compound);

        let err = manager.create(WALLET, UserPreferenceCreate::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "Preferences already exist");

        let bad = UserPreferenceUpdate { risk_tolerance: Some(5), ..Default::default() };
        assert!(manager.update(WALLET, bad).await.is_err());
    }

    #[tokio::test]
    async fn test_recommendation_strategies() {
        let manager = setup().await;
        manager
            .create(WALLET, UserPreferenceCreate { selected_protocol_id: Some(3), ..Default::default() })
            .await
            .unwrap();

        let manual = recommend(&manager, 0, 1).await.unwrap();
        assert_eq!(manual.recommended_protocol_id, 3);
        assert_eq!(manual.reason, "Manually selected protocol");

        let best = recommend(&manager, 1, 2).await.unwrap();
        assert_eq!(best.recommended_protocol_id, 2);
        assert_eq!(best.reason, "Highest APY within risk tolerance");

        // 500/1 beats 700/2 and 1200/3
        let adjusted = recommend(&manager, 2, 3).await.unwrap();
        assert_eq!(adjusted.recommended_protocol_id, 4);

        let diversified = recommend(&manager, 3, 3).await.unwrap();
        assert_eq!(diversified.recommended_protocol_id, 3);
        assert_eq!(diversified.reason, "Diversified across risk tiers");
    }

    #[tokio::test]
    async fn test_no_preferences_means_no_recommendation() {
        let manager = setup().await;
        assert!(manager.recommendation(WALLET).await.unwrap().is_none());
        assert!(manager.get(WALLET).await.unwrap().is_none());
    }
}
