//! # Chain RPC Client
//!
//! The [`ChainRpcProvider`] port and its HTTP JSON-RPC implementation for a substrate node.
//! Finalized head and hash lookups use the standard `chain_*` methods; block content comes
//! pre-decoded from `reef_getDecodedBlock`.

mod raw_block;

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    errors::{IndexerError, Result},
    types::{BlockHash, BlockHeight},
    utils::truncate_error,
};

pub use raw_block::{
    value_to_string, EventPhase, RawBlock, RawEvent, RawEvmLog, RawExtrinsic,
    RawValidatorExposure,
};

/// Read access to a chain's finalized history.
#[async_trait]
pub trait ChainRpcProvider: Send + Sync {
    async fn get_finalized_head_height(&self) -> Result<BlockHeight>;

    async fn get_block_hash(&self, height: BlockHeight) -> Result<BlockHash>;

    /// Fetches decoded block content. Without extrinsics the node skips reading the block body.
    async fn get_raw_block(&self, hash: &BlockHash, include_extrinsics: bool) -> Result<RawBlock>;
}

#[derive(Deserialize, Debug)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcErrorObject>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'a str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SubstrateHeader {
    number: String,
}

/// JSON-RPC over HTTP client for a Reef substrate node.
pub struct SubstrateJsonRpcClient {
    client: Client,
    url: String,
    timeout: Duration,
    max_retries: u32,
    next_id: AtomicU64,
}

impl SubstrateJsonRpcClient {
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout,
            max_retries,
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn make_rpc_call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: &Value,
    ) -> Result<Option<R>> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params: params.clone(),
        };

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IndexerError::rpc_timeout(self.timeout.as_secs())
                } else {
                    IndexerError::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_status_error(method, status, &body));
        }

        let text = response.text().await?;
        let parsed: RpcResponse<R> = serde_json::from_str(&text).map_err(|e| {
            warn!(
                "[rpc] Deserialization error for {}: {}. Response snippet: {:?}",
                method,
                e,
                text.chars().take(200).collect::<String>()
            );
            IndexerError::from(e)
        })?;

        if let Some(error) = parsed.error {
            return Err(IndexerError::rpc_response(method, error.code, error.message));
        }

        Ok(parsed.result)
    }

    /// Retries transport-level failures with exponential backoff; error responses are final.
    async fn make_retrying_rpc_call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<R>> {
        let mut attempts = 0;
        loop {
            match self.make_rpc_call(method, &params).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_systemic() && attempts < self.max_retries => {
                    attempts += 1;
                    let backoff = Duration::from_secs(2_u64.pow(attempts));
                    warn!(
                        "[rpc] {} failed with error: {}. Retrying in {:?} (Attempt {}/{})",
                        method, e, backoff, attempts, self.max_retries
                    );
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Maps a non-2xx reply. Gateway failures, timeouts and rate limiting mean the node is not
/// serving right now, so they count as connection failures.
fn http_status_error(method: &str, status: StatusCode, body: &str) -> IndexerError {
    let message = format!("{method} returned HTTP {status}: {}", truncate_error(&body));
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        IndexerError::rpc_connection(message)
    } else {
        IndexerError::rpc_response(method, i64::from(status.as_u16()), message)
    }
}

#[async_trait]
impl ChainRpcProvider for SubstrateJsonRpcClient {
    async fn get_finalized_head_height(&self) -> Result<BlockHeight> {
        let head_hash: String = self
            .make_retrying_rpc_call("chain_getFinalizedHead", json!([]))
            .await?
            .ok_or_else(|| IndexerError::block_not_found("finalized head"))?;

        let header: SubstrateHeader = self
            .make_retrying_rpc_call("chain_getHeader", json!([head_hash]))
            .await?
            .ok_or_else(|| IndexerError::block_not_found(format!("header {head_hash}")))?;

        let height = BlockHeight::from_hex(&header.number)?;
        debug!("[rpc] Finalized head #{} ({})", height, head_hash);
        Ok(height)
    }

    async fn get_block_hash(&self, height: BlockHeight) -> Result<BlockHash> {
        let hash: String = self
            .make_retrying_rpc_call("chain_getBlockHash", json!([height.value()]))
            .await?
            .ok_or_else(|| IndexerError::block_not_found(height.to_string()))?;

        BlockHash::new(hash)
    }

    async fn get_raw_block(&self, hash: &BlockHash, include_extrinsics: bool) -> Result<RawBlock> {
        self.make_retrying_rpc_call(
            "reef_getDecodedBlock",
            json!([hash.value(), include_extrinsics]),
        )
        .await?
        .ok_or_else(|| IndexerError::block_not_found(hash.to_string()))
    }
}
