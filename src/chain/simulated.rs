// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Simulated chain for local testing.
//!
//! [`SimulatedChain`] accepts any non-empty payload and includes each accepted
//! transaction in its own block after a configurable delay. It can be told to
//! never confirm, to reject every n-th submission, and to deliver every block
//! twice, which covers the failure modes real adapters exhibit.
//!
//! Accepted transactions go through a bounded queue to a single sealing task,
//! so a full queue slows down submitters instead of piling up tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

use super::{AdapterError, BlockFeed, BlockHandle, ChainAdapter, Connect};
use crate::config::{ChainConfig, FeedMode, SimulatedConfig};
use crate::{MAX_TRANSACTION_SIZE, Payload, Transaction, TxId};

/// Capacity of the push subscription channel.
const SUBSCRIPTION_CAPACITY: usize = 256;

/// Capacity of the queue of accepted, not yet sealed transactions.
const SEALING_QUEUE_CAPACITY: usize = 1024;

/// Accepted transaction waiting for its block.
type Pending = (Instant, TxId);

struct Inner {
    config: SimulatedConfig,
    poll_interval: Duration,
    /// Number of submissions so far, including rejected ones.
    submissions: AtomicU64,
    /// All blocks produced so far, indexed by height.
    blocks: Mutex<Vec<BlockHandle>>,
    subscriber: Mutex<Option<mpsc::Sender<BlockHandle>>>,
    /// Queue to the sealing task, started on the first accepted submission.
    sealer: OnceLock<mpsc::Sender<Pending>>,
}

impl Inner {
    fn sealer(self: &Arc<Self>) -> &mpsc::Sender<Pending> {
        self.sealer.get_or_init(|| {
            let (tx, rx) = mpsc::channel(SEALING_QUEUE_CAPACITY);
            tokio::spawn(seal_pending(Arc::downgrade(self), rx));
            tx
        })
    }

    /// Appends a block containing `txs` and publishes it to the subscriber.
    async fn seal_block(&self, txs: Vec<TxId>) {
        let block = {
            let mut blocks = self.blocks.lock().await;
            let height = blocks.len() as u64;
            let block = BlockHandle::new(format!("sim-block-{height}"), height)
                .with_transactions(txs);
            blocks.push(block.clone());
            block
        };
        trace!("sealed simulated block {}", block.height);

        let subscriber = self.subscriber.lock().await.clone();
        if let Some(sender) = subscriber {
            let copies = if self.config.duplicate_delivery { 2 } else { 1 };
            for _ in 0..copies {
                if sender.send(block.clone()).await.is_err() {
                    debug!("block subscriber went away");
                    break;
                }
            }
        }
    }
}

/// Seals queued transactions once they are due, in submission order.
///
/// Ends when the chain is dropped.
async fn seal_pending(chain: Weak<Inner>, mut queue: mpsc::Receiver<Pending>) {
    while let Some((due, id)) = queue.recv().await {
        tokio::time::sleep_until(due).await;
        let Some(inner) = chain.upgrade() else {
            break;
        };
        inner.seal_block(vec![id]).await;
    }
    trace!("simulated sealer stopped");
}

/// In-process chain with configurable confirmation behavior.
#[derive(Clone)]
pub struct SimulatedChain {
    inner: Arc<Inner>,
    node: String,
}

impl SimulatedChain {
    /// Creates a new simulated chain holding only a genesis block.
    #[must_use]
    pub fn new(config: SimulatedConfig, poll_interval: Duration) -> Self {
        let genesis = BlockHandle::new("sim-block-0", 0).with_transactions(Vec::new());
        Self {
            inner: Arc::new(Inner {
                config,
                poll_interval,
                submissions: AtomicU64::new(0),
                blocks: Mutex::new(vec![genesis]),
                subscriber: Mutex::new(None),
                sealer: OnceLock::new(),
            }),
            node: "local".to_owned(),
        }
    }

    /// Names the node this chain stands in for.
    #[must_use]
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    /// Number of submissions received so far, including rejected ones.
    #[must_use]
    pub fn submissions(&self) -> u64 {
        self.inner.submissions.load(Ordering::Relaxed)
    }

    /// Height of the most recent block.
    pub async fn height(&self) -> u64 {
        self.inner.blocks.lock().await.len() as u64 - 1
    }

    fn tx_id(payload: &[u8], nonce: u64) -> TxId {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        hasher.update(nonce.to_le_bytes());
        TxId::new(hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl Connect for SimulatedChain {
    async fn connect(node: &str, config: &ChainConfig) -> Result<Self, AdapterError> {
        debug!("starting simulated chain for node {node}");
        Ok(Self::new(config.simulated.clone(), config.poll_interval()).with_node(node))
    }
}

#[async_trait]
impl ChainAdapter for SimulatedChain {
    fn name(&self) -> &str {
        "simulated"
    }

    fn node(&self) -> &str {
        &self.node
    }

    fn parse(&self, payload: &Payload) -> Result<Transaction, AdapterError> {
        if payload.is_empty() {
            return Err(AdapterError::Parse("empty payload".to_owned()));
        }
        if payload.len() > MAX_TRANSACTION_SIZE {
            return Err(AdapterError::Parse(format!(
                "payload of {} bytes exceeds {MAX_TRANSACTION_SIZE}",
                payload.len()
            )));
        }
        Ok(Transaction(payload.clone()))
    }

    async fn submit(&self, tx: &Transaction) -> Result<TxId, AdapterError> {
        let nonce = self.inner.submissions.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(every) = self.inner.config.fail_every {
            if every > 0 && nonce % every == 0 {
                return Err(AdapterError::Submit(format!("injected failure #{nonce}")));
            }
        }

        let id = Self::tx_id(tx.bytes(), nonce);
        if !self.inner.config.never_confirm {
            let due = Instant::now() + Duration::from_millis(self.inner.config.confirm_delay_ms);
            self.inner
                .sealer()
                .send((due, id.clone()))
                .await
                .map_err(|_| AdapterError::Submit("simulated sealer stopped".to_owned()))?;
        }
        Ok(id)
    }

    async fn block_feed(&self) -> Result<BlockFeed, AdapterError> {
        match self.inner.config.feed {
            FeedMode::Push => {
                let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
                *self.inner.subscriber.lock().await = Some(tx);
                Ok(BlockFeed::Push(rx))
            }
            FeedMode::Poll => Ok(BlockFeed::Poll(self.inner.poll_interval)),
        }
    }

    async fn latest_block(&self) -> Result<BlockHandle, AdapterError> {
        let blocks = self.inner.blocks.lock().await;
        blocks
            .last()
            .cloned()
            .ok_or_else(|| AdapterError::Stream("no blocks".to_owned()))
    }

    async fn block_at(&self, height: u64) -> Result<BlockHandle, AdapterError> {
        let blocks = self.inner.blocks.lock().await;
        blocks
            .get(height as usize)
            .cloned()
            .ok_or_else(|| AdapterError::Stream(format!("no block at height {height}")))
    }

    async fn transactions_of(&self, block: &BlockHandle) -> Result<Vec<TxId>, AdapterError> {
        if let Some(txs) = &block.transactions {
            return Ok(txs.clone());
        }
        let stored = self.block_at(block.height).await?;
        Ok(stored.transactions.unwrap_or_default())
    }
}
