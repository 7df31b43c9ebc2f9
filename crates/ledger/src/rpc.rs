//! Ethereum JSON-RPC access
//!
//! Only the three calls the listener needs are implemented. Quantities travel
//! as `0x`-prefixed hex strings and are parsed here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::{LedgerError, LedgerResult};

const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Parse a `0x`-prefixed hex quantity
pub fn parse_hex_quantity(value: &str) -> LedgerResult<u64> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| LedgerError::Rpc(format!("Quantity without 0x prefix: {}", value)))?;
    if digits.is_empty() {
        return Err(LedgerError::Rpc("Empty hex quantity".to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|e| LedgerError::Rpc(format!("Invalid hex quantity {}: {}", value, e)))
}

fn hex_quantity<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_hex_quantity(&raw).map_err(serde::de::Error::custom)
}

/// A log entry as returned by `eth_getLogs`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(deserialize_with = "hex_quantity")]
    pub block_number: u64,
    pub transaction_hash: String,
    #[serde(deserialize_with = "hex_quantity")]
    pub log_index: u64,
}

/// Read access to a chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Latest block number
    async fn block_number(&self) -> LedgerResult<u64>;

    /// Timestamp of a block
    async fn block_timestamp(&self, block: u64) -> LedgerResult<DateTime<Utc>>;

    /// Logs emitted by `addresses` within an inclusive block range
    async fn get_logs(&self, addresses: &[String], from_block: u64, to_block: u64) -> LedgerResult<Vec<RpcLog>>;
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    timestamp: String,
}

/// JSON-RPC client over HTTP
pub struct RpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client for `url`
    pub fn new(url: impl Into<String>) -> LedgerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { url: url.into(), http, next_id: AtomicU64::new(1) })
    }

    /// Endpoint this client talks to
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> LedgerResult<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!("RPC {} #{}", method, id);

        let response = self.http.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(LedgerError::Rpc(format!("{} returned HTTP {}", method, response.status())));
        }

        let payload: RpcResponse<T> = response.json().await?;
        if let Some(error) = payload.error {
            return Err(LedgerError::Rpc(format!("{} failed ({}): {}", method, error.code, error.message)));
        }
        Ok(payload.result)
    }
}

#[async_trait]
impl ChainSource for RpcClient {
    async fn block_number(&self) -> LedgerResult<u64> {
        let raw: String = self
            .call("eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| LedgerError::Rpc("eth_blockNumber returned no result".to_string()))?;
        parse_hex_quantity(&raw)
    }

    async fn block_timestamp(&self, block: u64) -> LedgerResult<DateTime<Utc>> {
        let found: RpcBlock = self
            .call("eth_getBlockByNumber", json!([format!("{:#x}", block), false]))
            .await?
            .ok_or_else(|| LedgerError::Rpc(format!("Block {} not found", block)))?;
        let secs = parse_hex_quantity(&found.timestamp)?;
        Utc.timestamp_opt(secs as i64, 0)
            .single()
            .ok_or_else(|| LedgerError::Rpc(format!("Invalid timestamp for block {}", block)))
    }

    async fn get_logs(&self, addresses: &[String], from_block: u64, to_block: u64) -> LedgerResult<Vec<RpcLog>> {
        let filter = json!({
            "address": addresses,
            "fromBlock": format!("{:#x}", from_block),
            "toBlock": format!("{:#x}", to_block),
        });
        Ok(self.call("eth_getLogs", json!([filter])).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_quantity() {
        assert_eq!(parse_hex_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_hex_quantity("0x1b4").unwrap(), 436);
        assert!(parse_hex_quantity("1b4").is_err());
        assert!(parse_hex_quantity("0x").is_err());
        assert!(parse_hex_quantity("0xzz").is_err());
    }

    #[test]
    fn test_log_deserialization() {
        let raw = json!({
            "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
            "data": "0x",
            "blockNumber": "0x10",
            "transactionHash": format!("0x{}", "ab".repeat(32)),
            "logIndex": "0x2",
            "removed": false
        });
        let log: RpcLog = serde_json::from_value(raw).unwrap();
        assert_eq!(log.block_number, 16);
        assert_eq!(log.log_index, 2);
    }

    #[test]
    fn test_client_keeps_url() {
        let client = RpcClient::new("http://localhost:8545").unwrap();
        assert_eq!(client.url(), "http://localhost:8545");
    }
}
