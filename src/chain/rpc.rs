// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Adapter for bitcoin-family JSON-RPC nodes.
//!
//! Speaks the JSON-RPC 1.0 dialect of `bitcoind` and its descendants
//! (`zcashd` in particular) over HTTP. Payloads are raw serialized
//! transactions, submitted hex-encoded via `sendrawtransaction`. Blocks are
//! polled with `getbestblockhash` and `getblock`; `getblockhash` lets the
//! dispatch loop catch up on blocks produced between two polls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{AdapterError, BlockFeed, BlockHandle, ChainAdapter, Connect};
use crate::config::ChainConfig;
use crate::{MAX_TRANSACTION_SIZE, Payload, Transaction, TxId};

/// Timeout for a single RPC request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

impl<T> RpcResponse<T> {
    fn into_result(self) -> Result<T, AdapterError> {
        match (self.result, self.error) {
            (_, Some(err)) => Err(AdapterError::Rpc {
                code: err.code,
                message: err.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(AdapterError::Rpc {
                code: 0,
                message: "empty response".to_owned(),
            }),
        }
    }
}

/// Block as returned by `getblock <hash> 1`.
#[derive(Debug, Deserialize)]
struct RpcBlock {
    hash: String,
    height: u64,
    #[serde(default)]
    tx: Vec<String>,
}

impl From<RpcBlock> for BlockHandle {
    fn from(block: RpcBlock) -> Self {
        BlockHandle::new(block.hash, block.height)
            .with_transactions(block.tx.into_iter().map(TxId::from).collect())
    }
}

/// Chain adapter for a single JSON-RPC node.
pub struct RpcChain {
    client: reqwest::Client,
    node: String,
    url: String,
    user: Option<String>,
    password: Option<String>,
    poll_interval: Duration,
    next_request_id: AtomicU64,
}

impl RpcChain {
    /// Creates an adapter for the node at `node` without contacting it.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Connect`] if the HTTP client cannot be built.
    pub fn new(node: &str, config: &ChainConfig) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AdapterError::Connect {
                node: node.to_owned(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            client,
            node: node.to_owned(),
            url: node_url(node),
            user: config.rpc_user.clone(),
            password: config.rpc_password.clone(),
            poll_interval: config.poll_interval(),
            next_request_id: AtomicU64::new(0),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, AdapterError> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let mut request = self.client.post(&self.url).json(&request_body(id, method, params));
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }
        // nodes answer RPC errors with non-2xx status and a JSON body
        let response: RpcResponse<T> = request.send().await?.json().await?;
        response.into_result()
    }

    async fn block_by_hash(&self, hash: &str) -> Result<BlockHandle, AdapterError> {
        let block: RpcBlock = self.call("getblock", json!([hash, 1])).await?;
        Ok(block.into())
    }
}

fn node_url(node: &str) -> String {
    if node.starts_with("http://") || node.starts_with("https://") {
        node.to_owned()
    } else {
        format!("http://{node}")
    }
}

fn request_body(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "1.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

#[async_trait]
impl Connect for RpcChain {
    async fn connect(node: &str, config: &ChainConfig) -> Result<Self, AdapterError> {
        let chain = Self::new(node, config)?;
        let height: u64 = chain
            .call("getblockcount", json!([]))
            .await
            .map_err(|err| AdapterError::Connect {
                node: node.to_owned(),
                reason: err.to_string(),
            })?;
        debug!("connected to {} at height {height}", chain.url);
        Ok(chain)
    }
}

#[async_trait]
impl ChainAdapter for RpcChain {
    fn name(&self) -> &str {
        "rpc"
    }

    fn node(&self) -> &str {
        &self.node
    }

    fn parse(&self, payload: &Payload) -> Result<Transaction, AdapterError> {
        if payload.is_empty() {
            return Err(AdapterError::Parse("empty transaction".to_owned()));
        }
        if payload.len() > MAX_TRANSACTION_SIZE {
            return Err(AdapterError::Parse(format!(
                "transaction of {} bytes exceeds {MAX_TRANSACTION_SIZE}",
                payload.len()
            )));
        }
        Ok(Transaction(payload.clone()))
    }

    async fn submit(&self, tx: &Transaction) -> Result<TxId, AdapterError> {
        let txid: String = self
            .call("sendrawtransaction", json!([hex::encode(tx.bytes())]))
            .await
            .map_err(|err| match err {
                AdapterError::Rpc { code, message } => {
                    AdapterError::Submit(format!("{message} ({code})"))
                }
                other => other,
            })?;
        Ok(TxId::from(txid))
    }

    async fn block_feed(&self) -> Result<BlockFeed, AdapterError> {
        Ok(BlockFeed::Poll(self.poll_interval))
    }

    async fn latest_block(&self) -> Result<BlockHandle, AdapterError> {
        let hash: String = self.call("getbestblockhash", json!([])).await?;
        self.block_by_hash(&hash).await
    }

    async fn block_at(&self, height: u64) -> Result<BlockHandle, AdapterError> {
        let hash: String = self.call("getblockhash", json!([height])).await?;
        self.block_by_hash(&hash).await
    }

    async fn transactions_of(&self, block: &BlockHandle) -> Result<Vec<TxId>, AdapterError> {
        if let Some(txs) = &block.transactions {
            return Ok(txs.clone());
        }
        let full = self.block_by_hash(&block.id).await?;
        Ok(full.transactions.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn urls() {
        assert_eq!(node_url("127.0.0.1:8232"), "http://127.0.0.1:8232");
        assert_eq!(node_url("https://node.example"), "https://node.example");
    }

    #[test]
    fn request_shape() {
        let body = request_body(7, "getblock", json!(["abc", 1]));
        assert_eq!(body["method"], "getblock");
        assert_eq!(body["id"], 7);
        assert_eq!(body["params"][1], 1);
    }

    #[test]
    fn block_response() {
        let text = r#"{"result":{"hash":"00ab","height":42,"confirmations":1,"tx":["t1","t2"]},"error":null,"id":3}"#;
        let response: RpcResponse<RpcBlock> = serde_json::from_str(text).unwrap();
        let block: BlockHandle = response.into_result().unwrap().into();
        assert_eq!(block.id, "00ab");
        assert_eq!(block.height, 42);
        assert_eq!(
            block.transactions,
            Some(vec![TxId::from("t1"), TxId::from("t2")])
        );
    }

    #[test]
    fn error_response() {
        let text = r#"{"result":null,"error":{"code":-26,"message":"bad-txns-inputs-spent"},"id":1}"#;
        let response: RpcResponse<String> = serde_json::from_str(text).unwrap();
        assert!(matches!(
            response.into_result(),
            Err(AdapterError::Rpc { code: -26, .. })
        ));
        let response: RpcResponse<String> =
            serde_json::from_str(r#"{"result":null,"error":null,"id":1}"#).unwrap();
        assert!(response.into_result().is_err());
    }

    #[test]
    fn parse_rejects_empty() {
        let chain = RpcChain::new("127.0.0.1:1", &ChainConfig::simulated(Default::default())).unwrap();
        assert!(chain.parse(&Bytes::new()).is_err());
        assert!(chain.parse(&Bytes::from_static(&[1, 2, 3])).is_ok());
    }
}
