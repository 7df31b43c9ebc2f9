//! DeFi protocol registry
//!
//! Funds route their capital to whitelisted protocols. Each protocol carries
//! an APY in basis points and a risk level from 1 (low) to 3 (high).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use ethernity_core::storage::id_key;
use ethernity_core::utils::{
    basis_points_to_percentage, normalize_wallet,
    validation::{validate_range, validate_string_length},
};
use ethernity_core::{Clock, Collection, Pagination, Record, Storage};

use crate::{EconomicError, EconomicResult};

/// A whitelisted yield protocol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeFiProtocol {
    pub id: u64,
    pub protocol_address: String,
    pub name: String,
    /// Basis points, 100 = 1%
    pub apy: u32,
    /// 1 = low, 2 = medium, 3 = high
    pub risk_level: u8,
    pub is_active: bool,
    pub verified: bool,
    pub total_deposited: Decimal,
    pub added_timestamp: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Record for DeFiProtocol {
    const COLLECTION: &'static str = "protocols";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

/// One APY change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApyHistory {
    pub id: u64,
    pub protocol_id: u64,
    pub old_apy: u32,
    pub new_apy: u32,
    pub recorded_at: DateTime<Utc>,
}

impl Record for ApyHistory {
    const COLLECTION: &'static str = "protocol_apy_history";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

fn validate_apy(apy: u32) -> EconomicResult<()> {
    Ok(validate_range(apy, 0, 10_000, "apy")?)
}

fn validate_risk(risk_level: u8) -> EconomicResult<()> {
    Ok(validate_range(risk_level, 1, 3, "risk_level")?)
}

/// New protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeFiProtocolCreate {
    pub protocol_address: String,
    pub name: String,
    pub apy: u32,
    pub risk_level: u8,
}

/// Partial protocol update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeFiProtocolUpdate {
    pub name: Option<String>,
    pub apy: Option<u32>,
    pub is_active: Option<bool>,
    pub verified: Option<bool>,
}

/// Protocol summary with APY as a percentage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolWithApy {
    pub id: u64,
    pub protocol_address: String,
    pub name: String,
    pub apy: u32,
    pub risk_level: u8,
    pub apy_percentage: f64,
}

/// Result of an APY change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApyUpdate {
    pub success: bool,
    pub old_apy: u32,
    pub new_apy: u32,
}

/// Registry-wide figures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolStats {
    pub total_protocols: usize,
    pub active_protocols: usize,
    pub verified_protocols: usize,
    /// Integer mean APY of active protocols
    pub average_apy: u32,
    pub total_tvl: Decimal,
}

/// Manages the protocol registry
pub struct ProtocolManager {
    protocols: Collection<DeFiProtocol>,
    history: Collection<ApyHistory>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl ProtocolManager {
    /// Create a new protocol manager
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            protocols: Collection::new(storage.clone()),
            history: Collection::new(storage),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    fn not_found() -> EconomicError {
        EconomicError::NotFound("Protocol not found".to_string())
    }

    /// Get a protocol by id
    pub async fn get(&self, id: u64) -> EconomicResult<Option<DeFiProtocol>> {
        Ok(self.protocols.get(id).await?)
    }

    /// Get a protocol by contract address
    pub async fn get_by_address(&self, address: &str) -> EconomicResult<Option<DeFiProtocol>> {
        let address = address.trim().to_lowercase();
        Ok(self.protocols.find(|p| p.protocol_address == address).await?)
    }

    /// Register a protocol; new protocols are active and unverified
    pub async fn add(&self, data: DeFiProtocolCreate) -> EconomicResult<DeFiProtocol> {
        let address = normalize_wallet(&data.protocol_address)?;
        validate_string_length(data.name.trim(), 1, 64, "name")?;
        validate_apy(data.apy)?;
        validate_risk(data.risk_level)?;

        let _guard = self.write_lock.lock().await;
        if self.get_by_address(&address).await?.is_some() {
            return Err(EconomicError::AlreadyExists("Protocol already exists".to_string()));
        }

        let protocol = DeFiProtocol {
            id: self.protocols.next_id().await?,
            protocol_address: address,
            name: data.name.trim().to_string(),
            apy: data.apy,
            risk_level: data.risk_level,
            is_active: true,
            verified: false,
            total_deposited: Decimal::ZERO,
            added_timestamp: self.clock.now(),
            verified_at: None,
            last_updated: None,
        };
        self.protocols.put(&protocol).await?;

        info!("Protocol added: {}", protocol.name);
        Ok(protocol)
    }

    /// Apply a partial update
    pub async fn update(&self, id: u64, update: DeFiProtocolUpdate) -> EconomicResult<Option<DeFiProtocol>> {
        if let Some(name) = &update.name {
            validate_string_length(name.trim(), 1, 64, "name")?;
        }
        if let Some(apy) = update.apy {
            validate_apy(apy)?;
        }

        let _guard = self.write_lock.lock().await;
        let mut protocol = match self.protocols.get(id).await? {
            Some(protocol) => protocol,
            None => return Ok(None),
        };
        let now = self.clock.now();
        if let Some(name) = update.name {
            protocol.name = name.trim().to_string();
        }
        if let Some(apy) = update.apy {
            protocol.apy = apy;
        }
        if let Some(is_active) = update.is_active {
            protocol.is_active = is_active;
        }
        if let Some(verified) = update.verified {
            if verified && !protocol.verified {
                protocol.verified_at = Some(now);
            }
            protocol.verified = verified;
        }
        protocol.last_updated = Some(now);
        self.protocols.put(&protocol).await?;

        info!("Protocol updated: {}", protocol.name);
        Ok(Some(protocol))
    }

    /// Mark a protocol as verified
    pub async fn verify(&self, id: u64) -> EconomicResult<Option<DeFiProtocol>> {
        let _guard = self.write_lock.lock().await;
        let mut protocol = match self.protocols.get(id).await? {
            Some(protocol) => protocol,
            None => return Ok(None),
        };
        let now = self.clock.now();
        protocol.verified = true;
        protocol.verified_at = Some(now);
        protocol.last_updated = Some(now);
        self.protocols.put(&protocol).await?;

        info!("Protocol verified: {}", protocol.name);
        Ok(Some(protocol))
    }

    /// Flip the active flag
    pub async fn toggle_status(&self, id: u64) -> EconomicResult<Option<DeFiProtocol>> {
        let _guard = self.write_lock.lock().await;
        let mut protocol = match self.protocols.get(id).await? {
            Some(protocol) => protocol,
            None => return Ok(None),
        };
        protocol.is_active = !protocol.is_active;
        protocol.last_updated = Some(self.clock.now());
        self.protocols.put(&protocol).await?;

        info!(
            "Protocol {}: {}",
            if protocol.is_active { "activated" } else { "deactivated" },
            protocol.name
        );
        Ok(Some(protocol))
    }

    fn by_apy_desc(mut protocols: Vec<DeFiProtocol>) -> Vec<DeFiProtocol> {
        // Stable sort keeps id order among equal APYs
        protocols.sort_by(|a, b| b.apy.cmp(&a.apy));
        protocols
    }

    /// Protocols ordered by APY, highest first
    pub async fn list(
        &self,
        pagination: Pagination,
        active_only: bool,
        verified_only: bool,
        risk_level: Option<u8>,
    ) -> EconomicResult<Vec<DeFiProtocol>> {
        let protocols = self
            .protocols
            .filter(|p| {
                (!active_only || p.is_active)
                    && (!verified_only || p.verified)
                    && risk_level.map_or(true, |level| p.risk_level == level)
            })
            .await?;
        Ok(pagination.apply(Self::by_apy_desc(protocols)))
    }

    /// Active protocols with the highest APY
    pub async fn best_apy(&self, risk_level: Option<u8>, limit: usize) -> EconomicResult<Vec<ProtocolWithApy>> {
        let protocols = self
            .protocols
            .filter(|p| p.is_active && risk_level.map_or(true, |level| p.risk_level == level))
            .await?;
        Ok(Self::by_apy_desc(protocols)
            .into_iter()
            .take(limit)
            .map(|p| ProtocolWithApy {
                id: p.id,
                apy_percentage: basis_points_to_percentage(p.apy),
                protocol_address: p.protocol_address,
                name: p.name,
                apy: p.apy,
                risk_level: p.risk_level,
            })
            .collect())
    }

    /// Active protocols at a risk level
    pub async fn by_risk_level(&self, risk_level: u8) -> EconomicResult<Vec<DeFiProtocol>> {
        validate_risk(risk_level)?;
        Ok(self.protocols.filter(|p| p.is_active && p.risk_level == risk_level).await?)
    }

    /// Active protocols at or below a risk level
    pub async fn active_within_risk(&self, max_risk: u8) -> EconomicResult<Vec<DeFiProtocol>> {
        Ok(self.protocols.filter(|p| p.is_active && p.risk_level <= max_risk).await?)
    }

    /// Change the APY and keep a history entry
    pub async fn update_apy(&self, id: u64, new_apy: u32) -> EconomicResult<ApyUpdate> {
        validate_apy(new_apy)?;

        let _guard = self.write_lock.lock().await;
        let mut protocol = self.protocols.get(id).await?.ok_or_else(Self::not_found)?;
        let now = self.clock.now();
        let old_apy = protocol.apy;
        protocol.apy = new_apy;
        protocol.last_updated = Some(now);
        self.protocols.put(&protocol).await?;

        let entry = ApyHistory {
            id: self.history.next_id().await?,
            protocol_id: id,
            old_apy,
            new_apy,
            recorded_at: now,
        };
        self.history.put(&entry).await?;

        info!("APY updated for {}: {} -> {}", protocol.name, old_apy, new_apy);
        Ok(ApyUpdate {
            success: true,
            old_apy,
            new_apy,
        })
    }

    /// APY changes of a protocol, newest first
    pub async fn apy_history(&self, id: u64, limit: usize) -> EconomicResult<Vec<ApyHistory>> {
        let mut entries = self.history.filter(|h| h.protocol_id == id).await?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    /// Registry-wide figures
    pub async fn stats(&self) -> EconomicResult<ProtocolStats> {
        let protocols = self.protocols.all().await?;
        let active: Vec<&DeFiProtocol> = protocols.iter().filter(|p| p.is_active).collect();
        let average_apy = if active.is_empty() {
            0
        } else {
            (active.iter().map(|p| p.apy as u64).sum::<u64>() / active.len() as u64) as u32
        };
        Ok(ProtocolStats {
            total_protocols: protocols.len(),
            active_protocols: active.len(),
            verified_protocols: protocols.iter().filter(|p| p.verified).count(),
            average_apy,
            total_tvl: protocols.iter().map(|p| p.total_deposited).sum(),
        })
    }
}
