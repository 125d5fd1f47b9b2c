// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Block dispatch loop.
//!
//! One [`BlockDispatcher`] runs per adapter instance. It observes new blocks
//! through the adapter's [`BlockFeed`], extracts the included transaction
//! identifiers and reports them to the [`ConfirmationTracker`]. Blocks are
//! processed sequentially; with a push feed the adapter's bounded channel
//! makes the producer wait while the loop is busy.
//!
//! Blocks may be delivered more than once (overlapping polls, duplicate
//! notifications). The loop does not deduplicate them, the tracker ignores
//! confirmations of identifiers it has already confirmed.

use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{AdapterError, BlockFeed, BlockHandle, ChainAdapter};
use crate::ConfirmationTracker;

/// Number of failed polls in a row after which the feed is considered dead.
pub const MAX_CONSECUTIVE_POLL_FAILURES: u32 = 5;

/// Maximum number of skipped blocks fetched individually after a poll.
const MAX_CATCH_UP_BLOCKS: u64 = 64;

/// Counters reported when the dispatch loop exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub blocks: u64,
    pub confirmations: u64,
}

/// Feeds block contents from a [`ChainAdapter`] into a [`ConfirmationTracker`].
pub struct BlockDispatcher {
    adapter: Arc<dyn ChainAdapter>,
    tracker: Arc<ConfirmationTracker>,
    stop: CancellationToken,
    stats: DispatchStats,
}

impl BlockDispatcher {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        tracker: Arc<ConfirmationTracker>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            tracker,
            stop,
            stats: DispatchStats::default(),
        }
    }

    /// Runs until `stop` is cancelled or the block feed dies.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Stream`] if the feed could not be opened, the
    /// subscription closed, or polling failed [`MAX_CONSECUTIVE_POLL_FAILURES`]
    /// times in a row. Transactions not confirmed by then stay unconfirmed.
    pub async fn run(mut self, feed: BlockFeed) -> Result<DispatchStats, AdapterError> {
        let res = match feed {
            BlockFeed::Push(receiver) => self.push_loop(receiver).await,
            BlockFeed::Poll(period) => self.poll_loop(period).await,
        };
        match &res {
            Ok(()) => debug!(
                "{} dispatch loop stopped after {} blocks, {} confirmations",
                self.adapter.name(),
                self.stats.blocks,
                self.stats.confirmations
            ),
            Err(err) => warn!("{} block feed died: {err}", self.adapter.name()),
        }
        res.map(|()| self.stats)
    }

    async fn push_loop(
        &mut self,
        mut receiver: tokio::sync::mpsc::Receiver<BlockHandle>,
    ) -> Result<(), AdapterError> {
        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => return Ok(()),
                block = receiver.recv() => match block {
                    Some(block) => self.process(&block, Instant::now()).await,
                    None => return Err(AdapterError::Stream("subscription closed".to_owned())),
                },
            }
        }
    }

    async fn poll_loop(&mut self, period: std::time::Duration) -> Result<(), AdapterError> {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_height = None;
        let mut failures = 0;
        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            match self.poll_once(last_height).await {
                Ok(height) => {
                    last_height = Some(height);
                    failures = 0;
                }
                Err(err) => {
                    failures += 1;
                    warn!("polling {} failed ({failures} in a row): {err}", self.adapter.name());
                    if failures >= MAX_CONSECUTIVE_POLL_FAILURES {
                        return Err(AdapterError::Stream(format!(
                            "{failures} consecutive poll failures, last: {err}"
                        )));
                    }
                }
            }
        }
    }

    /// Processes the latest block and, where supported, blocks skipped since
    /// `last_height`. Returns the height of the latest block.
    async fn poll_once(&mut self, last_height: Option<u64>) -> Result<u64, AdapterError> {
        let latest = self.adapter.latest_block().await?;
        let observed = Instant::now();
        if let Some(last) = last_height {
            let first = (last + 1).max(latest.height.saturating_sub(MAX_CATCH_UP_BLOCKS));
            for height in first..latest.height {
                match self.adapter.block_at(height).await {
                    Ok(block) => self.process(&block, observed).await,
                    Err(AdapterError::Unsupported) => break,
                    Err(err) => return Err(err),
                }
            }
        }
        self.process(&latest, observed).await;
        Ok(latest.height)
    }

    async fn process(&mut self, block: &BlockHandle, observed: Instant) {
        let txs = match self.adapter.transactions_of(block).await {
            Ok(txs) => txs,
            Err(err) => {
                warn!("cannot read transactions of block {}: {err}", block.id);
                return;
            }
        };
        let confirmed = self.tracker.record_confirmed_batch(&txs, observed).await;
        self.stats.blocks += 1;
        self.stats.confirmations += confirmed;
        trace!(
            "block {} at height {}: {} txs, {confirmed} newly confirmed",
            block.id,
            block.height,
            txs.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::Mutex;

    use super::*;
    use crate::chain::SimulatedChain;
    use crate::config::{FeedMode, SimulatedConfig};
    use crate::{Payload, Transaction, TxId};

    /// Chain whose blocks are scripted by the test and that may lack `block_at`.
    struct ScriptedChain {
        blocks: Mutex<Vec<BlockHandle>>,
        supports_block_at: bool,
        failing_polls: AtomicU32,
    }

    impl ScriptedChain {
        fn new(supports_block_at: bool) -> Self {
            Self {
                blocks: Mutex::new(vec![BlockHandle::new("b0", 0).with_transactions(vec![])]),
                supports_block_at,
                failing_polls: AtomicU32::new(0),
            }
        }

        async fn push(&self, txs: &[&str]) {
            let mut blocks = self.blocks.lock().await;
            let height = blocks.len() as u64;
            let txs = txs.iter().map(|&t| TxId::from(t)).collect();
            blocks.push(BlockHandle::new(format!("b{height}"), height).with_transactions(txs));
        }
    }

    #[async_trait]
    impl ChainAdapter for ScriptedChain {
        fn name(&self) -> &str {
            "scripted"
        }

        fn node(&self) -> &str {
            "script"
        }

        fn parse(&self, payload: &Payload) -> Result<Transaction, AdapterError> {
            Ok(Transaction(payload.clone()))
        }

        async fn submit(&self, _tx: &Transaction) -> Result<TxId, AdapterError> {
            Err(AdapterError::Unsupported)
        }

        async fn block_feed(&self) -> Result<BlockFeed, AdapterError> {
            Ok(BlockFeed::Poll(Duration::from_millis(100)))
        }

        async fn latest_block(&self) -> Result<BlockHandle, AdapterError> {
            if self.failing_polls.load(Ordering::Relaxed) > 0 {
                self.failing_polls.fetch_sub(1, Ordering::Relaxed);
                return Err(AdapterError::Stream("node down".to_owned()));
            }
            Ok(self.blocks.lock().await.last().cloned().unwrap())
        }

        async fn block_at(&self, height: u64) -> Result<BlockHandle, AdapterError> {
            if !self.supports_block_at {
                return Err(AdapterError::Unsupported);
            }
            Ok(self.blocks.lock().await[height as usize].clone())
        }

        async fn transactions_of(&self, block: &BlockHandle) -> Result<Vec<TxId>, AdapterError> {
            Ok(block.transactions.clone().unwrap_or_default())
        }
    }

    async fn tracker_with(ids: &[&str]) -> Arc<ConfirmationTracker> {
        let tracker = Arc::new(ConfirmationTracker::new());
        for id in ids {
            tracker.record_sent(TxId::from(*id)).await;
        }
        tracker
    }

    #[tokio::test(start_paused = true)]
    async fn push_feed_with_duplicates() {
        let chain = Arc::new(SimulatedChain::new(
            SimulatedConfig {
                duplicate_delivery: true,
                ..SimulatedConfig::default()
            },
            Duration::from_millis(10),
        ));
        let tracker = Arc::new(ConfirmationTracker::new());
        let stop = CancellationToken::new();
        let feed = chain.block_feed().await.unwrap();
        let dispatcher = BlockDispatcher::new(chain.clone(), tracker.clone(), stop.clone());
        let handle = tokio::spawn(dispatcher.run(feed));

        for payload in [&b"a"[..], b"b", b"c"] {
            let id = chain.submit(&Transaction(Bytes::copy_from_slice(payload))).await.unwrap();
            tracker.record_sent(id).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.cancel();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.blocks, 6);
        assert_eq!(stats.confirmations, 3);
        assert_eq!(tracker.counters().confirmed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_subscription_is_a_stream_error() {
        let chain = Arc::new(ScriptedChain::new(true));
        let tracker = Arc::new(ConfirmationTracker::new());
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        drop(tx);
        let dispatcher = BlockDispatcher::new(chain, tracker, CancellationToken::new());
        let res = dispatcher.run(BlockFeed::Push(rx)).await;
        assert!(matches!(res, Err(AdapterError::Stream(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_catches_up_skipped_blocks() {
        let chain = Arc::new(ScriptedChain::new(true));
        let tracker = tracker_with(&["t1", "t2", "t3"]).await;
        let stop = CancellationToken::new();
        let dispatcher = BlockDispatcher::new(chain.clone(), tracker.clone(), stop.clone());
        let handle = tokio::spawn(dispatcher.run(BlockFeed::Poll(Duration::from_millis(100))));

        // let the first poll observe the genesis block
        tokio::time::sleep(Duration::from_millis(50)).await;
        chain.push(&["t1"]).await;
        chain.push(&["t2"]).await;
        chain.push(&["t3"]).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        stop.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(tracker.counters().confirmed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_without_block_at_sees_latest_only() {
        let chain = Arc::new(ScriptedChain::new(false));
        let tracker = tracker_with(&["t1", "t2"]).await;
        let stop = CancellationToken::new();
        let dispatcher = BlockDispatcher::new(chain.clone(), tracker.clone(), stop.clone());
        let handle = tokio::spawn(dispatcher.run(BlockFeed::Poll(Duration::from_millis(100))));

        tokio::time::sleep(Duration::from_millis(50)).await;
        chain.push(&["t1"]).await;
        chain.push(&["t2"]).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        stop.cancel();
        handle.await.unwrap().unwrap();

        assert!(tracker.get(&TxId::from("t1")).await.unwrap().confirm_time.is_none());
        assert!(tracker.get(&TxId::from("t2")).await.unwrap().confirm_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failures() {
        // transient failures are tolerated
        let chain = Arc::new(ScriptedChain::new(true));
        chain
            .failing_polls
            .store(MAX_CONSECUTIVE_POLL_FAILURES - 1, Ordering::Relaxed);
        chain.push(&["t1"]).await;
        let tracker = tracker_with(&["t1"]).await;
        let stop = CancellationToken::new();
        let dispatcher = BlockDispatcher::new(chain.clone(), tracker.clone(), stop.clone());
        let handle = tokio::spawn(dispatcher.run(BlockFeed::Poll(Duration::from_millis(100))));
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(tracker.counters().confirmed, 1);

        // too many in a row end the loop
        let chain = Arc::new(ScriptedChain::new(true));
        chain.failing_polls.store(u32::MAX, Ordering::Relaxed);
        let dispatcher =
            BlockDispatcher::new(chain, tracker_with(&[]).await, CancellationToken::new());
        let res = dispatcher.run(BlockFeed::Poll(Duration::from_millis(100))).await;
        assert!(matches!(res, Err(AdapterError::Stream(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_poll_feed() {
        let chain = Arc::new(SimulatedChain::new(
            SimulatedConfig {
                feed: FeedMode::Poll,
                ..SimulatedConfig::default()
            },
            Duration::from_millis(20),
        ));
        let tracker = Arc::new(ConfirmationTracker::new());
        let stop = CancellationToken::new();
        let feed = chain.block_feed().await.unwrap();
        let dispatcher = BlockDispatcher::new(chain.clone(), tracker.clone(), stop.clone());
        let handle = tokio::spawn(dispatcher.run(feed));
        for i in 0..10u8 {
            let id = chain.submit(&Transaction(Bytes::from(vec![i]))).await.unwrap();
            tracker.record_sent(id).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(tracker.counters().confirmed, 10);
    }
}
