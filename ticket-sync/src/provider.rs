//! Chain event provider
//!
//! The reconciler only needs two read calls from an Ethereum node: the current
//! head and the logs of a block range. [`JsonRpcProvider`] speaks plain HTTP
//! JSON-RPC, which is what gateways such as Infura expose.

use crate::config::ProviderConfig;
use crate::decode::parse_quantity;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error as ThisError;
use ticket_ledger::Address;
use tracing::debug;

/// Provider call failure, classified for the retry loop
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ProviderError {
    /// Network error, rate limit, 5xx: worth retrying
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Provider refuses this range or result size; split the range
    #[error("range too large: {0}")]
    RangeTooLarge(String),

    /// Provider rejected the request; retrying will not help
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

/// `eth_getLogs` filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    /// Emitting contract
    pub address: Address,

    /// Required first topic (event signature)
    pub topic0: String,

    /// First block, inclusive
    pub from_block: u64,

    /// Last block, inclusive
    pub to_block: u64,
}

/// Log entry as returned by `eth_getLogs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    /// Emitting contract
    pub address: String,

    /// Indexed topics, topic0 first
    pub topics: Vec<String>,

    /// Non-indexed data
    #[serde(default)]
    pub data: String,

    /// Block number (hex quantity); absent for pending logs
    pub block_number: Option<String>,

    /// Transaction hash; absent for pending logs
    pub transaction_hash: Option<String>,

    /// Log index within the block (hex quantity)
    pub log_index: Option<String>,

    /// Set when the log was dropped by a reorganisation
    #[serde(default)]
    pub removed: bool,
}

/// Read-only access to chain logs
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Current chain head
    async fn block_number(&self) -> std::result::Result<u64, ProviderError>;

    /// Logs matching `filter`
    async fn get_logs(&self, filter: &LogFilter) -> std::result::Result<Vec<RawLog>, ProviderError>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Infura-style limit errors: code -32005, or a message naming the limit
fn is_range_limit(err: &RpcError) -> bool {
    let message = err.message.to_lowercase();
    err.code == -32005
        || message.contains("query returned more than")
        || message.contains("block range")
        || message.contains("too many results")
        || message.contains("response size")
}

/// HTTP JSON-RPC chain provider
#[derive(Debug)]
pub struct JsonRpcProvider {
    endpoint: String,
    http_client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcProvider {
    /// Create provider from configuration
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            http_client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<T, ProviderError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!(method, id = request.id, "JSON-RPC request");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        classify_response(method, status, &body)
    }
}

/// Map an HTTP status and JSON-RPC body to a result or a retry class
fn classify_response<T: serde::de::DeserializeOwned>(
    method: &str,
    status: reqwest::StatusCode,
    body: &[u8],
) -> std::result::Result<T, ProviderError> {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(ProviderError::Transient(format!("HTTP {}", status)));
    }
    if !status.is_success() {
        return Err(ProviderError::Rejected(format!("HTTP {}", status)));
    }

    let body: RpcResponse<T> = serde_json::from_slice(body)
        .map_err(|e| ProviderError::Transient(format!("malformed response: {}", e)))?;

    if let Some(err) = body.error {
        if is_range_limit(&err) {
            return Err(ProviderError::RangeTooLarge(err.message));
        }
        // -32603 internal error and -32000 family are usually node hiccups
        if err.code == -32603 || err.code == -32000 {
            return Err(ProviderError::Transient(err.message));
        }
        return Err(ProviderError::Rejected(format!("{} ({})", err.message, err.code)));
    }

    body.result
        .ok_or_else(|| ProviderError::Transient(format!("{}: empty result", method)))
}

#[async_trait]
impl ChainProvider for JsonRpcProvider {
    async fn block_number(&self) -> std::result::Result<u64, ProviderError> {
        let raw: String = self.call("eth_blockNumber", serde_json::json!([])).await?;
        parse_quantity(&raw)
            .ok_or_else(|| ProviderError::Transient(format!("bad block number {:?}", raw)))
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
    ) -> std::result::Result<Vec<RawLog>, ProviderError> {
        let params = serde_json::json!([{
            "address": filter.address.to_string(),
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
            "topics": [filter.topic0],
        }]);
        self.call("eth_getLogs", params).await
    }
}
