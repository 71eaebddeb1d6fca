//! JSON-RPC envelopes and the subset of EVM node payloads the adapter reads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthBlock {
    pub number: String,
    pub hash: String,
    pub parent_hash: String,
    #[serde(default)]
    pub transactions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthTransaction {
    pub hash: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub block_hash: String,
    pub transaction_hash: String,
    pub log_index: String,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthReceipt {
    pub block_number: String,
    pub block_hash: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Outcome of a mined transaction as reported by its receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub block_height: u64,
    pub block_hash: String,
    pub succeeded: bool,
}

pub fn parse_quantity(raw: &str) -> Option<u64> {
    u64::from_str_radix(raw.strip_prefix("0x")?, 16).ok()
}

/// Parses a 256-bit hex value, rejecting anything above `u128::MAX`.
pub fn parse_u128(raw: &str) -> Option<u128> {
    let digits = raw.strip_prefix("0x")?.trim_start_matches('0');
    if digits.is_empty() {
        return Some(0);
    }
    if digits.len() > 32 {
        return None;
    }
    u128::from_str_radix(digits, 16).ok()
}

pub fn to_quantity(value: u64) -> String {
    format!("{value:#x}")
}

/// The address held in the low 20 bytes of a 32-byte log topic.
pub fn topic_address(topic: &str) -> Option<String> {
    let hex = topic.strip_prefix("0x")?;
    if hex.len() != 64 || !hex.is_ascii() {
        return None;
    }
    Some(format!("0x{}", &hex[24..]))
}

pub fn address_topic(address: &str) -> String {
    format!("0x{:0>64}", address.trim_start_matches("0x"))
}
