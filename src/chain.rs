// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Abstraction layer for the blockchains under test.
//!
//! The [`ChainAdapter`] trait is the capability set the engine needs from a
//! concrete chain: submitting transactions, and observing blocks to learn
//! which transactions were included. Blocks are observed either through a
//! push subscription or by polling for the latest block, see [`BlockFeed`].
//!
//! Specific implementations are provided:
//! - [`SimulatedChain`] is an in-process chain for local testing
//! - [`RpcChain`] talks to a bitcoin-family JSON-RPC node (e.g. zcashd)
//!
//! The engine drives exactly one [`dispatch`] loop per adapter instance,
//! which feeds confirmations into the [`ConfirmationTracker`].
//!
//! # Examples
//!
//! ```
//! use diablo::chain::{AdapterError, ChainAdapter};
//! use diablo::{Transaction, TxId};
//!
//! async fn submit_all(chain: &dyn ChainAdapter, txs: &[Transaction]) -> Vec<TxId> {
//!     let mut ids = Vec::new();
//!     for tx in txs {
//!         match chain.submit(tx).await {
//!             Ok(id) => ids.push(id),
//!             Err(AdapterError::Submit(reason)) => eprintln!("rejected: {reason}"),
//!             Err(err) => eprintln!("{err}"),
//!         }
//!     }
//!     ids
//! }
//! ```
//!
//! [`ConfirmationTracker`]: crate::ConfirmationTracker

pub mod dispatch;
pub mod rpc;
pub mod simulated;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use self::rpc::RpcChain;
pub use self::simulated::SimulatedChain;
use crate::config::{ChainConfig, ChainKind};
use crate::{Payload, Transaction, TxId};

/// Error type for chain adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("cannot connect to {node}: {reason}")]
    Connect { node: String, reason: String },
    #[error("submission rejected: {0}")]
    Submit(String),
    #[error("cannot parse payload: {0}")]
    Parse(String),
    #[error("block feed failed: {0}")]
    Stream(String),
    #[error("operation not supported by this chain")]
    Unsupported,
    #[error("rpc transport error")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// A block as seen by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHandle {
    /// Chain-specific block identifier, e.g. its hash.
    pub id: String,
    pub height: u64,
    /// Included transactions, if the adapter delivered them with the block.
    pub transactions: Option<Vec<TxId>>,
}

impl BlockHandle {
    #[must_use]
    pub fn new(id: impl Into<String>, height: u64) -> Self {
        Self {
            id: id.into(),
            height,
            transactions: None,
        }
    }

    #[must_use]
    pub fn with_transactions(mut self, transactions: Vec<TxId>) -> Self {
        self.transactions = Some(transactions);
        self
    }
}

/// How an adapter delivers new blocks to the engine.
#[derive(Debug)]
pub enum BlockFeed {
    /// Blocks are pushed through a bounded channel.
    ///
    /// The producer waits when the channel is full. The feed ends when the
    /// sender is dropped.
    Push(mpsc::Receiver<BlockHandle>),
    /// The engine polls [`ChainAdapter::latest_block`] at the given interval.
    Poll(Duration),
}

/// Capability set of a blockchain under test.
///
/// All methods take `&self`; implementors are shared between worker threads
/// and the dispatch loop.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Short human-readable name of the chain, for logging.
    fn name(&self) -> &str;

    /// Address of the node this adapter talks to.
    fn node(&self) -> &str;

    /// Parses a planned payload into a submittable transaction.
    ///
    /// Called for every payload before the benchmark starts.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Parse`] if the payload is not a valid transaction.
    fn parse(&self, payload: &Payload) -> Result<Transaction, AdapterError>;

    /// Submits a transaction, resolving to its identifier once accepted.
    ///
    /// # Errors
    ///
    /// Returns an [`AdapterError`] if the node rejects the transaction or
    /// cannot be reached. Such errors are accounted as failed sends.
    async fn submit(&self, tx: &Transaction) -> Result<TxId, AdapterError>;

    /// Opens the block feed. Called once per benchmark run.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Stream`] if the subscription cannot be set up.
    async fn block_feed(&self) -> Result<BlockFeed, AdapterError>;

    /// Returns the most recent block.
    ///
    /// # Errors
    ///
    /// Returns an [`AdapterError`] if the node cannot be queried.
    async fn latest_block(&self) -> Result<BlockHandle, AdapterError>;

    /// Returns the block at `height`.
    ///
    /// Adapters that support this let the poll loop catch up on blocks
    /// produced between two polls.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Unsupported`] unless overridden.
    async fn block_at(&self, _height: u64) -> Result<BlockHandle, AdapterError> {
        Err(AdapterError::Unsupported)
    }

    /// Returns the identifiers of all transactions included in `block`.
    ///
    /// # Errors
    ///
    /// Returns an [`AdapterError`] if the block contents cannot be fetched.
    async fn transactions_of(&self, block: &BlockHandle) -> Result<Vec<TxId>, AdapterError>;
}

/// Construction of an adapter from a node address.
#[async_trait]
pub trait Connect: Sized {
    /// Connects to the node at `node`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Connect`] if the node cannot be reached.
    async fn connect(node: &str, config: &ChainConfig) -> Result<Self, AdapterError>;
}

/// Picks the node for `node_index`, wrapping around the configured nodes.
///
/// Secondary `i` passes `i` so the load spreads over all nodes. Falls back to
/// `"local"` if no node is configured.
#[must_use]
pub fn node_for(config: &ChainConfig, node_index: usize) -> &str {
    if config.nodes.is_empty() {
        return "local";
    }
    &config.nodes[node_index % config.nodes.len()]
}

/// Connects to the node picked by [`node_for`] using the adapter selected by `config.kind`.
///
/// # Errors
///
/// Returns [`AdapterError::Connect`] if the connection fails.
pub async fn connect(
    config: &ChainConfig,
    node_index: usize,
) -> Result<Arc<dyn ChainAdapter>, AdapterError> {
    let node = node_for(config, node_index);
    Ok(match config.kind {
        ChainKind::Simulated => Arc::new(SimulatedChain::connect(node, config).await?),
        ChainKind::Rpc => Arc::new(RpcChain::connect(node, config).await?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatedConfig;

    #[test]
    fn nodes_wrap_around() {
        let mut config = ChainConfig::simulated(SimulatedConfig::default());
        config.nodes = vec!["n0".to_owned(), "n1".to_owned(), "n2".to_owned()];
        let picked: Vec<_> = (0..5).map(|i| node_for(&config, i)).collect();
        assert_eq!(picked, ["n0", "n1", "n2", "n0", "n1"]);

        config.nodes.clear();
        assert_eq!(node_for(&config, 3), "local");
    }

    #[tokio::test]
    async fn secondaries_connect_to_different_nodes() {
        let mut config = ChainConfig::simulated(SimulatedConfig::default());
        config.nodes = vec!["sim-a".to_owned(), "sim-b".to_owned()];
        let first = connect(&config, 0).await.unwrap();
        let second = connect(&config, 1).await.unwrap();
        assert_eq!(first.node(), "sim-a");
        assert_eq!(second.node(), "sim-b");
    }
}
