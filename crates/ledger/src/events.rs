//! Persistent log of contract events

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ethernity_core::storage::id_key;
use ethernity_core::utils::{is_transaction_hash, is_wallet_address, validation::validate_string_length};
use ethernity_core::{Clock, Collection, Pagination, Record, Storage};

use crate::{LedgerError, LedgerResult};

const SYNC_STATE_KEY: &str = "listener";

/// A contract log recorded by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockchainEvent {
    pub id: u64,
    pub event_type: String,
    pub contract_address: String,
    /// Decoded arguments plus the raw topics and data
    pub event_data: serde_json::Map<String, serde_json::Value>,
    pub transaction_hash: String,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub log_index: u64,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Record for BlockchainEvent {
    const COLLECTION: &'static str = "blockchain_events";

    fn key(&self) -> String {
        id_key(self.id)
    }
}

impl BlockchainEvent {
    /// String argument of the decoded event
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.event_data.get(name).and_then(|v| v.as_str())
    }
}

/// Event submitted for recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainEventCreate {
    pub event_type: String,
    pub contract_address: String,
    #[serde(default)]
    pub event_data: serde_json::Map<String, serde_json::Value>,
    pub transaction_hash: String,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub log_index: u64,
}

impl BlockchainEventCreate {
    fn validate(&self) -> LedgerResult<()> {
        validate_string_length(&self.event_type, 1, 64, "event_type")?;
        if !is_wallet_address(&self.contract_address) {
            return Err(LedgerError::InvalidInput(
                "contract_address must be 0x followed by 40 hex characters".to_string(),
            ));
        }
        if !is_transaction_hash(&self.transaction_hash) {
            return Err(LedgerError::InvalidInput(
                "transaction_hash must be 0x followed by 64 hex characters".to_string(),
            ));
        }
        Ok(())
    }
}

/// Optional filters for [`EventStore::list`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub contract_address: Option<String>,
    pub processed: Option<bool>,
}

impl EventFilter {
    fn matches(&self, event: &BlockchainEvent) -> bool {
        self.event_type.as_ref().map_or(true, |t| &event.event_type == t)
            && self
                .contract_address
                .as_ref()
                .map_or(true, |a| event.contract_address == a.to_lowercase())
            && self.processed.map_or(true, |p| event.processed == p)
    }
}

/// Where the listener stopped, kept even for blocks without events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
    pub last_synced_block: u64,
    pub updated_at: DateTime<Utc>,
}

impl Record for SyncState {
    const COLLECTION: &'static str = "sync_state";

    fn key(&self) -> String {
        SYNC_STATE_KEY.to_string()
    }
}

/// Progress of blockchain ingestion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStatus {
    pub last_synced_block: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub unprocessed_events: usize,
}

/// Storage of blockchain events
pub struct EventStore {
    events: Collection<BlockchainEvent>,
    sync_state: Collection<SyncState>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl EventStore {
    /// Create a new event store
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Collection::new(storage.clone()),
            sync_state: Collection::new(storage),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Record an event; a repeated `(transaction_hash, log_index)` returns the stored one
    pub async fn record(&self, data: BlockchainEventCreate) -> LedgerResult<BlockchainEvent> {
        data.validate()?;
        let transaction_hash = data.transaction_hash.to_lowercase();

        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self
            .events
            .find(|e| e.transaction_hash == transaction_hash && e.log_index == data.log_index)
            .await?
        {
            warn!("Duplicate event: {}:{}", transaction_hash, data.log_index);
            return Ok(existing);
        }

        let event = BlockchainEvent {
            id: self.events.next_id().await?,
            event_type: data.event_type,
            contract_address: data.contract_address.to_lowercase(),
            event_data: data.event_data,
            transaction_hash,
            block_number: data.block_number,
            block_timestamp: data.block_timestamp,
            log_index: data.log_index,
            processed: false,
            processed_at: None,
            created_at: self.clock.now(),
        };
        self.events.put(&event).await?;

        info!("Event recorded: {} at block {}", event.event_type, event.block_number);
        Ok(event)
    }

    /// Events by block, latest first
    pub async fn list(&self, pagination: Pagination, filter: &EventFilter) -> LedgerResult<Vec<BlockchainEvent>> {
        let mut events = self.events.filter(|e| filter.matches(e)).await?;
        events.sort_by(|a, b| (b.block_number, b.log_index).cmp(&(a.block_number, a.log_index)));
        Ok(pagination.apply(events))
    }

    /// Get an event by id
    pub async fn get(&self, id: u64) -> LedgerResult<Option<BlockchainEvent>> {
        Ok(self.events.get(id).await?)
    }

    /// Events of one transaction in log order
    pub async fn by_transaction(&self, hash: &str) -> LedgerResult<Vec<BlockchainEvent>> {
        let hash = hash.trim().to_lowercase();
        let mut events = self.events.filter(|e| e.transaction_hash == hash).await?;
        events.sort_by_key(|e| e.log_index);
        Ok(events)
    }

    /// Mark an event as consumed
    pub async fn mark_processed(&self, id: u64) -> LedgerResult<Option<BlockchainEvent>> {
        let _guard = self.write_lock.lock().await;
        let Some(mut event) = self.events.get(id).await? else {
            return Ok(None);
        };
        event.processed = true;
        event.processed_at = Some(self.clock.now());
        self.events.put(&event).await?;
        debug!("Event {} processed", id);
        Ok(Some(event))
    }

    /// Oldest unprocessed events first
    pub async fn unprocessed(&self, limit: usize) -> LedgerResult<Vec<BlockchainEvent>> {
        let mut events = self.events.filter(|e| !e.processed).await?;
        events.sort_by_key(|e| (e.block_number, e.log_index));
        events.truncate(limit);
        Ok(events)
    }

    /// Number of events still waiting for processing
    pub async fn unprocessed_count(&self) -> LedgerResult<usize> {
        Ok(self.events.count(|e| !e.processed).await?)
    }

    /// Remember the last block scanned by the listener
    pub async fn set_last_synced_block(&self, block: u64) -> LedgerResult<()> {
        let state = SyncState { last_synced_block: block, updated_at: self.clock.now() };
        self.sync_state.put(&state).await?;
        Ok(())
    }

    /// Last synced block, when it was reached and the processing backlog
    pub async fn sync_status(&self) -> LedgerResult<SyncStatus> {
        let latest_event = self.events.all().await?.into_iter().max_by_key(|e| e.block_number);
        let state = self.sync_state.get_by_key(SYNC_STATE_KEY).await?;

        let (last_synced_block, last_synced_at) = match (state, latest_event) {
            (Some(state), Some(event)) if event.block_number > state.last_synced_block => {
                (event.block_number, Some(event.created_at))
            }
            (Some(state), _) => (state.last_synced_block, Some(state.updated_at)),
            (None, Some(event)) => (event.block_number, Some(event.created_at)),
            (None, None) => (0, None),
        };

        Ok(SyncStatus {
            last_synced_block,
            last_synced_at,
            unprocessed_events: self.unprocessed_count().await?,
        })
    }
}
