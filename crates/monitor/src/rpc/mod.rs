use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;
use xfer_bridge_domain::config::{ChainConfig, RetryConfig, TokenContract};
use xfer_bridge_domain::model::{
    derive_payload_ref, Address, Amount, Asset, Block, BlockHash, ObservedTransfer, TxHash,
    NATIVE_TRANSFER_INDEX,
};

use crate::retry::{RetryPolicy, Transient};

mod types;

pub use types::TransactionReceipt;
use types::{
    address_topic, parse_quantity, parse_u128, to_quantity, topic_address, EthBlock, EthLog,
    EthReceipt, EthTransaction, JsonRpcRequest, JsonRpcResponse,
};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain node unavailable: {0}")]
    Unavailable(String),
    /// The node returned data that does not line up, e.g. a range that does
    /// not chain. Refetching later usually resolves it.
    #[error("inconsistent chain data: {0}")]
    Inconsistent(String),
    #[error("undecodable chain data: {0}")]
    Decode(String),
}

impl Transient for ChainError {
    fn is_transient(&self) -> bool {
        matches!(self, ChainError::Unavailable(_))
    }
}

/// Read-only view of one chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn head_height(&self) -> Result<u64, ChainError>;

    /// Blocks `from..=to` in ascending order. Each block only carries the
    /// transfers whose recipient is in `watched`, ordered by log index.
    async fn blocks_in_range(
        &self,
        from: u64,
        to: u64,
        watched: &HashSet<Address>,
    ) -> Result<Vec<Block>, ChainError>;

    /// Hash of the canonical block at `height`, if the node has it.
    async fn block_hash(&self, height: u64) -> Result<Option<BlockHash>, ChainError>;

    async fn transaction_receipt(
        &self,
        tx_hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, ChainError>;
}

/// JSON-RPC adapter for EVM-compatible nodes.
pub struct EvmRpcClient {
    http: reqwest::Client,
    url: String,
    retry_policy: RetryPolicy,
    native_asset: Asset,
    tokens: Vec<TokenContract>,
    next_id: AtomicU64,
}

impl EvmRpcClient {
    pub fn new(chain: &ChainConfig, retry: &RetryConfig) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(retry.rpc_timeout)
            .build()
            .map_err(|err| ChainError::Unavailable(format!("http client: {err}")))?;
        Ok(Self {
            http,
            url: chain.rpc_url.clone(),
            retry_policy: RetryPolicy::new(
                retry.rpc_base_delay,
                retry.rpc_base_delay.saturating_mul(32),
                retry.rpc_attempts,
            ),
            native_asset: chain.native_asset.clone(),
            tokens: chain.tokens.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        self.retry_policy
            .retry(method, || self.call_once(method, params.clone()))
            .await
    }

    async fn call_once(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| ChainError::Unavailable(format!("{method}: {err}")))?;
        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|err| ChainError::Decode(format!("{method}: {err}")))?;
        if let Some(error) = body.error {
            return Err(ChainError::Unavailable(format!(
                "{method}: node error {}: {}",
                error.code, error.message
            )));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    async fn fetch_block(&self, height: u64, full: bool) -> Result<Option<EthBlock>, ChainError> {
        let result = self
            .call("eth_getBlockByNumber", json!([to_quantity(height), full]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|err| ChainError::Decode(format!("block {height}: {err}")))
    }

    async fn native_transfers(
        &self,
        block: &EthBlock,
        watched: &HashSet<Address>,
    ) -> Result<Vec<ObservedTransfer>, ChainError> {
        let mut transfers = Vec::new();
        for raw in &block.transactions {
            let tx: EthTransaction = serde_json::from_value(raw.clone())
                .map_err(|err| ChainError::Decode(format!("transaction: {err}")))?;
            let Some(to) = tx.to.as_deref().and_then(|to| Address::parse(to).ok()) else {
                continue;
            };
            if !watched.contains(&to) {
                continue;
            }
            let amount = parse_u128(&tx.value)
                .ok_or_else(|| ChainError::Decode(format!("value of {}", tx.hash)))?;
            if amount == 0 {
                continue;
            }
            let tx_hash = decode_tx_hash(&tx.hash)?;
            let succeeded = self
                .transaction_receipt(&tx_hash)
                .await?
                .is_some_and(|receipt| receipt.succeeded);
            if !succeeded {
                warn!(tx = %tx_hash, "skipping failed native transfer");
                continue;
            }
            transfers.push(ObservedTransfer {
                tx_hash,
                log_index: NATIVE_TRANSFER_INDEX,
                from: tx.from.as_deref().and_then(|from| Address::parse(from).ok()),
                to,
                asset: self.native_asset.clone(),
                amount: Amount::new(amount),
                payload_ref: fingerprint(raw),
            });
        }
        Ok(transfers)
    }

    async fn token_logs(
        &self,
        from: u64,
        to: u64,
        watched: &HashSet<Address>,
    ) -> Result<Vec<(Value, EthLog)>, ChainError> {
        if self.tokens.is_empty() {
            return Ok(Vec::new());
        }
        let contracts: Vec<&str> = self.tokens.iter().map(|t| t.contract.as_str()).collect();
        let recipients: Vec<String> = watched.iter().map(|a| address_topic(a.as_str())).collect();
        let filter = json!([{
            "fromBlock": to_quantity(from),
            "toBlock": to_quantity(to),
            "address": contracts,
            "topics": [TRANSFER_TOPIC, Value::Null, recipients],
        }]);
        let result = self.call("eth_getLogs", filter).await?;
        let raw_logs: Vec<Value> = serde_json::from_value(result)
            .map_err(|err| ChainError::Decode(format!("logs: {err}")))?;
        raw_logs
            .into_iter()
            .map(|raw| {
                let log: EthLog = serde_json::from_value(raw.clone())
                    .map_err(|err| ChainError::Decode(format!("log: {err}")))?;
                Ok((raw, log))
            })
            .collect()
    }

    fn token_transfer(
        &self,
        raw: &Value,
        log: &EthLog,
        watched: &HashSet<Address>,
    ) -> Result<Option<ObservedTransfer>, ChainError> {
        let contract = Address::parse(&log.address)
            .map_err(|err| ChainError::Decode(format!("log address: {err}")))?;
        let Some(asset) = self
            .tokens
            .iter()
            .find(|token| token.contract == contract)
            .map(|token| token.asset.clone())
        else {
            return Ok(None);
        };
        if log.topics.len() != 3 || !log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
            return Ok(None);
        }
        let Some(to) = topic_address(&log.topics[2]).and_then(|to| Address::parse(&to).ok())
        else {
            return Ok(None);
        };
        if !watched.contains(&to) {
            return Ok(None);
        }
        let Some(amount) = parse_u128(&log.data) else {
            warn!(tx = %log.transaction_hash, "skipping token transfer wider than 128 bits");
            return Ok(None);
        };
        let log_index = parse_quantity(&log.log_index)
            .and_then(|index| u32::try_from(index).ok())
            .filter(|index| *index != NATIVE_TRANSFER_INDEX)
            .ok_or_else(|| ChainError::Decode(format!("log index {}", log.log_index)))?;
        Ok(Some(ObservedTransfer {
            tx_hash: decode_tx_hash(&log.transaction_hash)?,
            log_index,
            from: topic_address(&log.topics[1]).and_then(|from| Address::parse(&from).ok()),
            to,
            asset,
            amount: Amount::new(amount),
            payload_ref: fingerprint(raw),
        }))
    }
}

#[async_trait]
impl ChainClient for EvmRpcClient {
    async fn head_height(&self) -> Result<u64, ChainError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        result
            .as_str()
            .and_then(parse_quantity)
            .ok_or_else(|| ChainError::Decode(format!("block number {result}")))
    }

    async fn blocks_in_range(
        &self,
        from: u64,
        to: u64,
        watched: &HashSet<Address>,
    ) -> Result<Vec<Block>, ChainError> {
        if from > to {
            return Ok(Vec::new());
        }

        let mut blocks: Vec<Block> = Vec::with_capacity((to - from + 1) as usize);
        for height in from..=to {
            let raw = self
                .fetch_block(height, !watched.is_empty())
                .await?
                .ok_or_else(|| ChainError::Inconsistent(format!("block {height} not available")))?;
            if parse_quantity(&raw.number) != Some(height) {
                return Err(ChainError::Inconsistent(format!(
                    "asked for block {height}, node returned {}",
                    raw.number
                )));
            }
            let transfers = if watched.is_empty() {
                Vec::new()
            } else {
                self.native_transfers(&raw, watched).await?
            };
            let block = Block {
                height,
                hash: decode_block_hash(&raw.hash)?,
                parent_hash: decode_block_hash(&raw.parent_hash)?,
                transfers,
            };
            if let Some(previous) = blocks.last() {
                if block.parent_hash != previous.hash {
                    return Err(ChainError::Inconsistent(format!(
                        "block {height} does not extend block {}",
                        previous.height
                    )));
                }
            }
            blocks.push(block);
        }

        if !watched.is_empty() {
            for (raw, log) in self.token_logs(from, to, watched).await? {
                if log.removed {
                    continue;
                }
                let Some(transfer) = self.token_transfer(&raw, &log, watched)? else {
                    continue;
                };
                let height = parse_quantity(&log.block_number)
                    .ok_or_else(|| ChainError::Decode(format!("log block {}", log.block_number)))?;
                let block = height
                    .checked_sub(from)
                    .and_then(|offset| blocks.get_mut(offset as usize))
                    .ok_or_else(|| {
                        ChainError::Inconsistent(format!("log outside range at {height}"))
                    })?;
                if decode_block_hash(&log.block_hash)? != block.hash {
                    return Err(ChainError::Inconsistent(format!(
                        "log in tx {} references a non-canonical block at {height}",
                        log.transaction_hash
                    )));
                }
                block.transfers.push(transfer);
            }
            for block in &mut blocks {
                block.transfers.sort_by_key(|transfer| transfer.log_index);
            }
        }

        Ok(blocks)
    }

    async fn block_hash(&self, height: u64) -> Result<Option<BlockHash>, ChainError> {
        self.fetch_block(height, false)
            .await?
            .map(|block| decode_block_hash(&block.hash))
            .transpose()
    }

    async fn transaction_receipt(
        &self,
        tx_hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([tx_hash.as_str()]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let receipt: EthReceipt = serde_json::from_value(result)
            .map_err(|err| ChainError::Decode(format!("receipt {tx_hash}: {err}")))?;
        Ok(Some(TransactionReceipt {
            block_height: parse_quantity(&receipt.block_number)
                .ok_or_else(|| ChainError::Decode(format!("receipt block {tx_hash}")))?,
            block_hash: receipt.block_hash,
            // Pre-byzantium receipts carry no status field.
            succeeded: receipt.status.as_deref().map_or(true, |status| status == "0x1"),
        }))
    }
}

fn decode_block_hash(raw: &str) -> Result<BlockHash, ChainError> {
    BlockHash::parse(raw).map_err(|err| ChainError::Decode(err.to_string()))
}

fn decode_tx_hash(raw: &str) -> Result<TxHash, ChainError> {
    TxHash::parse(raw).map_err(|err| ChainError::Decode(err.to_string()))
}

fn fingerprint(raw: &Value) -> String {
    derive_payload_ref(raw.to_string().as_bytes())
}
