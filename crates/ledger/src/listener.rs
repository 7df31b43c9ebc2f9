//! Contract event listener
//!
//! Each poll scans the next batch of blocks after the last synced one for
//! logs emitted by the configured contracts, decodes the ones with a known
//! topic and stores them as [`BlockchainEvent`](crate::BlockchainEvent)s.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha3::{Digest, Keccak256};
use tracing::{debug, info, warn};

use ethernity_core::config::BlockchainConfig;
use ethernity_core::utils::is_wallet_address;

use crate::events::{BlockchainEventCreate, EventStore};
use crate::rpc::{ChainSource, RpcLog};
use crate::LedgerResult;

const WORD_HEX_LEN: usize = 64;

/// Role of a configured contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Token,
    Factory,
    Governance,
    Treasury,
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContractKind::Token => "token",
            ContractKind::Factory => "factory",
            ContractKind::Governance => "governance",
            ContractKind::Treasury => "treasury",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Address,
    Uint,
    Bool,
    String,
}

#[derive(Debug, Clone, Copy)]
struct Param {
    name: &'static str,
    kind: ParamKind,
    indexed: bool,
}

const fn param(name: &'static str, kind: ParamKind, indexed: bool) -> Param {
    Param { name, kind, indexed }
}

/// Known contract events and their parameters
const KNOWN_EVENTS: &[(&str, &str, &[Param])] = &[
    (
        "Transfer",
        "Transfer(address,address,uint256)",
        &[
            param("sender", ParamKind::Address, true),
            param("receiver", ParamKind::Address, true),
            param("value", ParamKind::Uint, false),
        ],
    ),
    (
        "TokensBurned",
        "TokensBurned(address,uint256,uint256,uint256)",
        &[
            param("account", ParamKind::Address, true),
            param("amount", ParamKind::Uint, false),
            param("totalBurns", ParamKind::Uint, false),
            param("timestamp", ParamKind::Uint, false),
        ],
    ),
    (
        "TokensRenewed",
        "TokensRenewed(address,uint256,uint256,uint256)",
        &[
            param("account", ParamKind::Address, true),
            param("amount", ParamKind::Uint, false),
            param("totalRenews", ParamKind::Uint, false),
            param("timestamp", ParamKind::Uint, false),
        ],
    ),
    (
        "FundCreated",
        "FundCreated(address,address,uint256,uint256)",
        &[
            param("fundAddress", ParamKind::Address, true),
            param("owner", ParamKind::Address, true),
            param("initialDeposit", ParamKind::Uint, false),
            param("timestamp", ParamKind::Uint, false),
        ],
    ),
    (
        "ProposalCreated",
        "ProposalCreated(uint256,address,string,uint8)",
        &[
            param("proposalId", ParamKind::Uint, true),
            param("proposer", ParamKind::Address, true),
            param("title", ParamKind::String, false),
            param("proposalType", ParamKind::Uint, false),
        ],
    ),
    (
        "VoteCast",
        "VoteCast(uint256,address,bool,uint256)",
        &[
            param("proposalId", ParamKind::Uint, true),
            param("voter", ParamKind::Address, true),
            param("support", ParamKind::Bool, false),
            param("votingPower", ParamKind::Uint, false),
        ],
    ),
];

/// keccak256 of an event signature, as a `0x` hex topic
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(Keccak256::digest(signature.as_bytes())))
}

/// A decodable contract event
#[derive(Debug, Clone)]
pub struct EventSignature {
    pub name: &'static str,
    pub signature: &'static str,
    pub topic: String,
    params: &'static [Param],
}

impl EventSignature {
    /// Decode the arguments of a log; raw topics and data are kept alongside
    fn decode(&self, log: &RpcLog) -> Map<String, Value> {
        let mut out = Map::new();
        let data = log.data.trim_start_matches("0x");
        let mut topics = log.topics.iter().skip(1);
        let mut word_index = 0;

        for p in self.params {
            let value = if p.indexed {
                topics.next().map(|t| decode_word(t.trim_start_matches("0x"), p.kind, data))
            } else {
                let value = word_at(data, word_index).map(|w| decode_word(w, p.kind, data));
                word_index += 1;
                value
            };
            if let Some(value) = value {
                out.insert(p.name.to_string(), value);
            }
        }

        out.insert("topics".to_string(), Value::from(log.topics.clone()));
        out.insert("data".to_string(), Value::from(log.data.clone()));
        out
    }
}

fn word_at(data: &str, index: usize) -> Option<&str> {
    data.get(index * WORD_HEX_LEN..(index + 1) * WORD_HEX_LEN)
}

fn decode_uint(word: &str) -> Value {
    let (high, low) = word.split_at(word.len().saturating_sub(32));
    if high.chars().all(|c| c == '0') {
        if let Ok(n) = u128::from_str_radix(low, 16) {
            return Value::from(n.to_string());
        }
    }
    Value::from(format!("0x{}", word))
}

/// Byte offsets and lengths come from the node; anything out of range yields `None`
fn decode_string(offset_word: &str, data: &str) -> Option<Value> {
    let offset = usize::from_str_radix(offset_word.get(48..)?, 16).ok()?.checked_mul(2)?;
    let len_word = data.get(offset..offset.checked_add(WORD_HEX_LEN)?)?;
    let len = usize::from_str_radix(len_word.get(48..)?, 16).ok()?.checked_mul(2)?;
    let start = offset.checked_add(WORD_HEX_LEN)?;
    let bytes = hex::decode(data.get(start..start.checked_add(len)?)?).ok()?;
    String::from_utf8(bytes).ok().map(Value::from)
}

fn decode_word(word: &str, kind: ParamKind, data: &str) -> Value {
    if !word.is_ascii() {
        return Value::Null;
    }
    match kind {
        ParamKind::Address => {
            let tail = &word[word.len().saturating_sub(40)..];
            Value::from(format!("0x{}", tail.to_lowercase()))
        }
        ParamKind::Uint => decode_uint(word),
        ParamKind::Bool => Value::from(word.chars().any(|c| c != '0')),
        ParamKind::String => decode_string(word, data).unwrap_or(Value::Null),
    }
}

/// Configured contracts and the events the backend understands
#[derive(Debug, Clone)]
pub struct ContractRegistry {
    contracts: HashMap<String, ContractKind>,
    events: HashMap<String, EventSignature>,
}

impl ContractRegistry {
    /// Registry without contracts
    pub fn new() -> Self {
        let events = KNOWN_EVENTS
            .iter()
            .map(|&(name, signature, params)| {
                let topic = event_topic(signature);
                (topic.clone(), EventSignature { name, signature, topic, params })
            })
            .collect();
        Self { contracts: HashMap::new(), events }
    }

    /// Registry with the contract addresses from the settings
    pub fn from_config(config: &BlockchainConfig) -> Self {
        let mut registry = Self::new();
        let configured = [
            (&config.token_address, ContractKind::Token),
            (&config.factory_address, ContractKind::Factory),
            (&config.governance_address, ContractKind::Governance),
            (&config.treasury_address, ContractKind::Treasury),
        ];
        for (address, kind) in configured {
            if let Some(address) = address {
                registry.register(address, kind);
            }
        }
        registry
    }

    /// Watch a contract; invalid addresses are ignored with a warning
    pub fn register(&mut self, address: &str, kind: ContractKind) {
        if !is_wallet_address(address) {
            warn!("Ignoring invalid {} contract address: {}", kind, address);
            return;
        }
        self.contracts.insert(address.to_lowercase(), kind);
    }

    /// Watched addresses
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.contracts.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Role of a watched address
    pub fn kind_of(&self, address: &str) -> Option<ContractKind> {
        self.contracts.get(&address.to_lowercase()).copied()
    }

    /// Event for a topic0 hash
    pub fn event_for_topic(&self, topic: &str) -> Option<&EventSignature> {
        self.events.get(&topic.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

impl Default for ContractRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one listener round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    /// Nothing to watch or the node is unreachable
    Skipped { reason: String },
    /// No new blocks
    UpToDate { block: u64 },
    /// A batch of blocks was scanned
    Synced { from_block: u64, to_block: u64, recorded: usize },
}

/// Polls the chain for contract logs
pub struct EventListener {
    chain: Arc<dyn ChainSource>,
    store: Arc<EventStore>,
    registry: ContractRegistry,
    batch_size: u64,
}

impl EventListener {
    /// Create a new listener
    pub fn new(chain: Arc<dyn ChainSource>, store: Arc<EventStore>, registry: ContractRegistry, batch_size: u64) -> Self {
        Self { chain, store, registry, batch_size: batch_size.max(1) }
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// Scan the next batch of blocks
    pub async fn poll(&self) -> LedgerResult<PollOutcome> {
        if self.registry.is_empty() {
            debug!("No contracts configured, skipping sync");
            return Ok(PollOutcome::Skipped { reason: "no_contracts".to_string() });
        }

        let latest = match self.chain.block_number().await {
            Ok(block) => block,
            Err(e) => {
                warn!("RPC not reachable, skipping sync: {}", e);
                return Ok(PollOutcome::Skipped { reason: "not_connected".to_string() });
            }
        };

        let last = self.store.sync_status().await?.last_synced_block;
        if latest <= last {
            return Ok(PollOutcome::UpToDate { block: latest });
        }

        let from_block = last + 1;
        let to_block = (from_block + self.batch_size).min(latest);
        info!("Processing blocks {} to {}", from_block, to_block);

        let logs = match self.chain.get_logs(&self.registry.addresses(), from_block, to_block).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Failed to fetch logs for blocks {}..{}: {}", from_block, to_block, e);
                return Ok(PollOutcome::Skipped { reason: "not_connected".to_string() });
            }
        };

        let mut timestamps: HashMap<u64, DateTime<Utc>> = HashMap::new();
        let mut recorded = 0;
        for log in logs {
            let Some(signature) = log.topics.first().and_then(|t| self.registry.event_for_topic(t)) else {
                debug!("Skipping unknown log in tx {}", log.transaction_hash);
                continue;
            };
            if self.registry.kind_of(&log.address).is_none() {
                continue;
            }

            let block_timestamp = match timestamps.get(&log.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = self.chain.block_timestamp(log.block_number).await?;
                    timestamps.insert(log.block_number, ts);
                    ts
                }
            };

            let event = BlockchainEventCreate {
                event_type: signature.name.to_string(),
                contract_address: log.address.clone(),
                event_data: signature.decode(&log),
                transaction_hash: log.transaction_hash.clone(),
                block_number: log.block_number,
                block_timestamp,
                log_index: log.log_index,
            };
            match self.store.record(event).await {
                Ok(_) => recorded += 1,
                Err(e) => warn!("Error saving {} event: {}", signature.name, e),
            }
        }

        self.store.set_last_synced_block(to_block).await?;
        info!("Processed up to block {} ({} events)", to_block, recorded);
        Ok(PollOutcome::Synced { from_block, to_block, recorded })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::MockChainSource;
    use crate::LedgerError;
    use chrono::TimeZone;
    use ethernity_core::{ManualClock, MemoryStorage};

    const TOKEN: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
    const RECEIVER: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";

    fn word(hex_tail: &str) -> String {
        format!("{:0>64}", hex_tail)
    }

    fn mint_log(block: u64) -> RpcLog {
        RpcLog {
            address: TOKEN.to_string(),
            topics: vec![
                event_topic("Transfer(address,address,uint256)"),
                format!("0x{}", word("0")),
                format!("0x{}", word(&RECEIVER[2..])),
            ],
            data: format!("0x{}", word("de0b6b3a7640000")),
            block_number: block,
            transaction_hash: format!("0x{}", "cd".repeat(32)),
            log_index: 0,
        }
    }

    fn registry() -> ContractRegistry {
        let mut registry = ContractRegistry::new();
        registry.register(TOKEN, ContractKind::Token);
        registry
    }

    fn store() -> Arc<EventStore> {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()));
        Arc::new(EventStore::new(Arc::new(MemoryStorage::new()), clock))
    }

    #[test]
    fn test_known_topics() {
        let registry = registry();
        assert_eq!(
            event_topic("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
        let transfer = registry
            .event_for_topic("0xDDF252AD1BE2C89B69C2B068FC378DAA952BA7F163C4A11628F55A4DF523B3EF")
            .unwrap();
        assert_eq!(transfer.name, "Transfer");
        assert_eq!(registry.kind_of(&TOKEN.to_uppercase().replace("0X", "0x")), Some(ContractKind::Token));
    }

    #[test]
    fn test_decode_transfer() {
        let registry = registry();
        let log = mint_log(7);
        let decoded = registry.event_for_topic(&log.topics[0]).unwrap().decode(&log);
        assert_eq!(decoded["sender"], "0x0000000000000000000000000000000000000000");
        assert_eq!(decoded["receiver"], RECEIVER);
        assert_eq!(decoded["value"], "1000000000000000000");
        assert_eq!(decoded["topics"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_decode_string_argument() {
        let registry = registry();
        let title = hex::encode("Audit");
        let log = RpcLog {
            address: TOKEN.to_string(),
            topics: vec![
                event_topic("ProposalCreated(uint256,address,string,uint8)"),
                format!("0x{}", word("2a")),
                format!("0x{}", word(&RECEIVER[2..])),
            ],
            data: format!("0x{}{}{}{:0<64}", word("40"), word("2"), word("5"), title),
            block_number: 1,
            transaction_hash: format!("0x{}", "ef".repeat(32)),
            log_index: 3,
        };
        let decoded = registry.event_for_topic(&log.topics[0]).unwrap().decode(&log);
        assert_eq!(decoded["proposalId"], "42");
        assert_eq!(decoded["title"], "Audit");
        assert_eq!(decoded["proposalType"], "2");
    }

    fn proposal_log(data: String) -> RpcLog {
        RpcLog {
            address: TOKEN.to_string(),
            topics: vec![
                event_topic("ProposalCreated(uint256,address,string,uint8)"),
                format!("0x{}", word("2a")),
                format!("0x{}", word(&RECEIVER[2..])),
            ],
            data,
            block_number: 1,
            transaction_hash: format!("0x{}", "ef".repeat(32)),
            log_index: 4,
        }
    }

    #[test]
    fn test_decode_string_with_oversized_offset() {
        let registry = registry();
        let log = proposal_log(format!("0x{}{}", word("ffffffffffffffff"), word("2")));
        let decoded = registry.event_for_topic(&log.topics[0]).unwrap().decode(&log);
        assert_eq!(decoded["title"], Value::Null);
        assert_eq!(decoded["proposalType"], "2");

        let log = proposal_log(format!("0x{}{}{}", word("40"), word("2"), word("ffffffffffffffff")));
        let decoded = registry.event_for_topic(&log.topics[0]).unwrap().decode(&log);
        assert_eq!(decoded["title"], Value::Null);
    }

    #[test]
    fn test_decode_non_ascii_data() {
        let registry = registry();
        let mut log = mint_log(7);
        log.data = format!("0x{}é{}", "0".repeat(31), "0".repeat(31));
        let decoded = registry.event_for_topic(&log.topics[0]).unwrap().decode(&log);
        assert_eq!(decoded["value"], Value::Null);

        log.topics[2] = format!("0x{}é{}", "1".repeat(23), "1".repeat(39));
        let decoded = registry.event_for_topic(&log.topics[0]).unwrap().decode(&log);
        assert_eq!(decoded["receiver"], Value::Null);
    }

    #[test_log::test(tokio::test)]
    async fn test_poll_records_batch() {
        let mut chain = MockChainSource::new();
        chain.expect_block_number().returning(|| Ok(500));
        chain
            .expect_get_logs()
            .withf(|addresses, from, to| addresses.len() == 1 && *from == 1 && *to == 101)
            .returning(|_, _, _| Ok(vec![mint_log(50)]));
        chain
            .expect_block_timestamp()
            .returning(|_| Ok(Utc.with_ymd_and_hms(2026, 1, 31, 23, 0, 0).unwrap()));

        let store = store();
        let listener = EventListener::new(Arc::new(chain), store.clone(), registry(), 100);
        let outcome = listener.poll().await.unwrap();
        assert_eq!(outcome, PollOutcome::Synced { from_block: 1, to_block: 101, recorded: 1 });

        let status = store.sync_status().await.unwrap();
        assert_eq!(status.last_synced_block, 101);
        assert_eq!(status.unprocessed_events, 1);
        assert_eq!(store.unprocessed(10).await.unwrap()[0].arg("receiver"), Some(RECEIVER));
    }

    #[test_log::test(tokio::test)]
    async fn test_poll_skips_unreachable_node() {
        let mut chain = MockChainSource::new();
        chain
            .expect_block_number()
            .returning(|| Err(LedgerError::Rpc("connection refused".to_string())));
        chain.expect_get_logs().never();

        let listener = EventListener::new(Arc::new(chain), store(), registry(), 100);
        assert!(matches!(listener.poll().await.unwrap(), PollOutcome::Skipped { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn test_poll_up_to_date() {
        let mut chain = MockChainSource::new();
        chain.expect_block_number().returning(|| Ok(20));

        let store = store();
        store.set_last_synced_block(20).await.unwrap();
        let listener = EventListener::new(Arc::new(chain), store, registry(), 100);
        assert_eq!(listener.poll().await.unwrap(), PollOutcome::UpToDate { block: 20 });
    }

    #[tokio::test]
    async fn test_empty_registry_is_skipped() {
        let listener = EventListener::new(Arc::new(MockChainSource::new()), store(), ContractRegistry::new(), 100);
        assert_eq!(
            listener.poll().await.unwrap(),
            PollOutcome::Skipped { reason: "no_contracts".to_string() }
        );
    }
}
