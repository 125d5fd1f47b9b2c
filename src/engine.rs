// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Benchmark engine of one secondary.
//!
//! An [`Engine`] owns everything a benchmark run shares between concurrent
//! tasks: the chain adapter, the [`ConfirmationTracker`] and the stop signal.
//! Its lifecycle is a strict state machine:
//!
//! ```text
//! Created --init--> Initialized --start--> Running --stop--> Stopping --generate--> Finalized
//! ```
//!
//! No transition skips a state. While running, one [`ExecutionPacer`] task
//! per worker thread replays the schedule, a [`BlockDispatcher`] feeds
//! confirmations into the tracker and a [`ThroughputSampler`] samples them.
//! A single [`CancellationToken`] stops all of them.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::chain::dispatch::{BlockDispatcher, DispatchStats};
use crate::chain::{self, AdapterError, ChainAdapter};
use crate::config::{ChainConfig, ConfigValidationError};
use crate::pacer::{ExecutionPacer, PacerStats, SendTransaction};
use crate::results::ResultsRecord;
use crate::sampler::{DEFAULT_WINDOW, ThroughputSampler};
use crate::workload::SecondaryWorkload;
use crate::{ConfirmationTracker, Transaction};

/// How often [`Engine::run`] checks for outstanding confirmations.
const CONFIRMATION_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle state of an [`Engine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Initialized,
    Running,
    Stopping,
    Finalized,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },
    #[error("invalid chain config")]
    Config(#[from] ConfigValidationError),
    #[error("cannot parse transaction {index} of thread {thread}")]
    Parse {
        thread: usize,
        index: usize,
        #[source]
        source: AdapterError,
    },
    #[error("no transaction {index} on thread {thread}")]
    UnknownTransaction { thread: usize, index: usize },
    #[error("transaction {index} of thread {thread} was already sent")]
    AlreadySent { thread: usize, index: usize },
    #[error("no workload was parsed")]
    NoWorkload,
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Sender of one worker thread.
///
/// Holds the thread's parsed transactions in schedule order. Every index is
/// submitted at most once, whether by the pacer or by a manual send.
struct Worker {
    thread: usize,
    adapter: Arc<dyn ChainAdapter>,
    tracker: Arc<ConfirmationTracker>,
    transactions: Vec<Transaction>,
    sent: Vec<AtomicBool>,
}

impl Worker {
    fn new(
        thread: usize,
        adapter: Arc<dyn ChainAdapter>,
        tracker: Arc<ConfirmationTracker>,
        transactions: Vec<Transaction>,
    ) -> Self {
        let sent = transactions.iter().map(|_| AtomicBool::new(false)).collect();
        Self {
            thread,
            adapter,
            tracker,
            transactions,
            sent,
        }
    }

    /// Marks `index` as sent, returning `false` if it already was.
    fn claim(&self, index: usize) -> bool {
        self.sent
            .get(index)
            .is_some_and(|sent| !sent.swap(true, Ordering::AcqRel))
    }

    async fn submit(&self, index: usize, tx: &Transaction) {
        let send_time = Instant::now();
        match self.adapter.submit(tx).await {
            Ok(id) => self.tracker.record_sent_at(id, send_time).await,
            Err(err) => {
                warn!("thread {} failed to send transaction {index}: {err}", self.thread);
                self.tracker.record_send_failure();
            }
        }
    }
}

#[async_trait]
impl SendTransaction for Worker {
    async fn send_transaction(&self, index: usize) {
        let Some(tx) = self.transactions.get(index) else {
            warn!("thread {} has no transaction {index}", self.thread);
            return;
        };
        if !self.claim(index) {
            debug!("thread {} skips transaction {index}, already sent", self.thread);
            return;
        }
        self.submit(index, tx).await;
    }
}

/// Tasks spawned by [`Engine::start_benchmark`].
struct RunningTasks {
    pacers: Vec<JoinHandle<PacerStats>>,
    dispatcher: JoinHandle<Result<DispatchStats, AdapterError>>,
    sampler: JoinHandle<Vec<u64>>,
}

/// Benchmark instance of one secondary.
pub struct Engine {
    state: EngineState,
    adapter: Option<Arc<dyn ChainAdapter>>,
    node_index: usize,
    tracker: Arc<ConfirmationTracker>,
    stop: CancellationToken,
    window: Duration,
    grace: Duration,
    workers: Vec<Arc<Worker>>,
    pacers: Vec<ExecutionPacer>,
    tasks: Option<RunningTasks>,
    samples: Vec<u64>,
    start: Option<(Instant, OffsetDateTime)>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine that connects to the chain during [`Engine::init`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: EngineState::Created,
            adapter: None,
            node_index: 0,
            tracker: Arc::new(ConfirmationTracker::new()),
            stop: CancellationToken::new(),
            window: DEFAULT_WINDOW,
            grace: Duration::ZERO,
            workers: Vec::new(),
            pacers: Vec::new(),
            tasks: None,
            samples: Vec::new(),
            start: None,
        }
    }

    /// Creates an engine using an already connected adapter.
    #[must_use]
    pub fn with_adapter(adapter: Arc<dyn ChainAdapter>) -> Self {
        Self {
            adapter: Some(adapter),
            ..Self::new()
        }
    }

    /// Selects which configured node [`Engine::init`] connects to.
    ///
    /// Secondary `i` passes `i`; the index wraps around the node list.
    #[must_use]
    pub fn with_node_index(mut self, node_index: usize) -> Self {
        self.node_index = node_index;
        self
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Address of the node in use, once connected.
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        self.adapter.as_ref().map(|adapter| adapter.node())
    }

    /// The engine's ledger.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ConfirmationTracker> {
        &self.tracker
    }

    fn expect_state(&self, expected: EngineState, operation: &'static str) -> Result<(), EngineError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: EngineState) {
        debug!("engine {} -> {next}", self.state);
        self.state = next;
    }

    fn adapter(&self) -> Result<&Arc<dyn ChainAdapter>, EngineError> {
        self.adapter.as_ref().ok_or(EngineError::InvalidState {
            operation: "use the chain",
            state: self.state,
        })
    }

    /// Applies the chain configuration and connects to the chain if needed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the engine was already initialized, the
    /// configuration is invalid or the connection fails.
    pub async fn init(&mut self, config: &ChainConfig) -> Result<(), EngineError> {
        self.expect_state(EngineState::Created, "initialize")?;
        config.validate()?;
        if self.adapter.is_none() {
            self.adapter = Some(chain::connect(config, self.node_index).await?);
        }
        self.window = config.window();
        self.grace = config.confirmation_grace();
        info!(
            "initialized engine for chain {} on node {}",
            config.name,
            self.node().unwrap_or("?")
        );
        self.transition(EngineState::Initialized);
        Ok(())
    }

    /// Parses every payload of `slice` into a transaction.
    ///
    /// Replaces a previously parsed workload. Returns the number of
    /// transactions.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Parse`] for the first payload the adapter rejects.
    pub fn parse_workload(&mut self, slice: SecondaryWorkload) -> Result<usize, EngineError> {
        self.expect_state(EngineState::Initialized, "parse a workload")?;
        let adapter = Arc::clone(self.adapter()?);

        let mut workers = Vec::with_capacity(slice.threads().len());
        let mut pacers = Vec::with_capacity(slice.threads().len());
        for (thread, workload) in slice.into_threads().into_iter().enumerate() {
            let transactions = workload
                .intervals()
                .flatten()
                .enumerate()
                .map(|(index, payload)| {
                    adapter
                        .parse(payload)
                        .map_err(|source| EngineError::Parse {
                            thread,
                            index,
                            source,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            pacers.push(ExecutionPacer::for_thread(&workload));
            workers.push(Arc::new(Worker::new(
                thread,
                Arc::clone(&adapter),
                Arc::clone(&self.tracker),
                transactions,
            )));
        }

        let total = workers.iter().map(|w| w.transactions.len()).sum();
        debug!("parsed {total} transactions for {} threads", workers.len());
        self.workers = workers;
        self.pacers = pacers;
        Ok(total)
    }

    /// Starts the dispatch loop, the sampler and one pacer per thread.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the engine is not initialized, no workload
    /// was parsed or the block feed cannot be opened.
    pub async fn start_benchmark(&mut self) -> Result<(), EngineError> {
        self.expect_state(EngineState::Initialized, "start")?;
        if self.workers.is_empty() {
            return Err(EngineError::NoWorkload);
        }
        let adapter = Arc::clone(self.adapter()?);
        let feed = adapter.block_feed().await?;

        let dispatcher = BlockDispatcher::new(adapter, self.tracker.clone(), self.stop.clone());
        let dispatcher = tokio::spawn(dispatcher.run(feed));
        let sampler = ThroughputSampler::new(self.tracker.clone(), self.window, self.stop.clone()).spawn();

        let start = Instant::now();
        let pacers = self
            .pacers
            .iter()
            .zip(&self.workers)
            .map(|(pacer, worker)| {
                let pacer = pacer.clone();
                let sender: Arc<dyn SendTransaction> = worker.clone();
                let stop = self.stop.clone();
                tokio::spawn(async move { pacer.run(sender, start, stop).await })
            })
            .collect();

        self.start = Some((start, OffsetDateTime::now_utc()));
        self.tasks = Some(RunningTasks {
            pacers,
            dispatcher,
            sampler,
        });
        info!("benchmark started with {} threads", self.workers.len());
        self.transition(EngineState::Running);
        Ok(())
    }

    /// Sends transaction `index` of `thread` right away.
    ///
    /// An index sent this way is skipped when its pacer reaches it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the engine is not running, the index is
    /// unknown or the transaction was already sent.
    pub async fn send_transaction(&self, thread: usize, index: usize) -> Result<(), EngineError> {
        self.expect_state(EngineState::Running, "send")?;
        let (worker, tx) = self
            .workers
            .get(thread)
            .and_then(|w| Some((w, w.transactions.get(index)?)))
            .ok_or(EngineError::UnknownTransaction { thread, index })?;
        if !worker.claim(index) {
            return Err(EngineError::AlreadySent { thread, index });
        }
        worker.submit(index, tx).await;
        Ok(())
    }

    /// Waits until every pacer has worked through its schedule.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] unless running.
    pub async fn wait_for_schedule(&mut self) -> Result<PacerStats, EngineError> {
        self.expect_state(EngineState::Running, "wait for the schedule")?;
        let mut total = PacerStats::default();
        if let Some(tasks) = &mut self.tasks {
            for handle in tasks.pacers.drain(..) {
                let stats = join_logged(handle, "pacer").await.unwrap_or_default();
                total.issued += stats.issued;
                total.skipped += stats.skipped;
            }
        }
        Ok(total)
    }

    /// Waits for outstanding confirmations, at most for the configured grace period.
    async fn wait_for_confirmations(&self) {
        let deadline = Instant::now() + self.grace;
        loop {
            let counters = self.tracker.counters();
            if counters.done >= counters.sent || Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(CONFIRMATION_CHECK_INTERVAL.min(deadline - Instant::now())).await;
        }
    }

    /// Broadcasts the stop signal and waits for all tasks to wind down.
    ///
    /// In-flight sends complete; no new sends are issued.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] unless running.
    pub async fn stop_benchmark(&mut self) -> Result<(), EngineError> {
        self.expect_state(EngineState::Running, "stop")?;
        self.transition(EngineState::Stopping);
        self.stop.cancel();

        let Some(tasks) = self.tasks.take() else {
            return Ok(());
        };
        for handle in tasks.pacers {
            join_logged(handle, "pacer").await;
        }
        if let Some(Ok(stats)) = join_logged(tasks.dispatcher, "dispatcher").await {
            debug!("dispatched {} blocks", stats.blocks);
        }
        self.samples = join_logged(tasks.sampler, "sampler").await.unwrap_or_default();
        info!("benchmark stopped");
        Ok(())
    }

    /// Finalizes the ledger and computes the results.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] unless stopping.
    pub async fn generate(&mut self) -> Result<ResultsRecord, EngineError> {
        self.expect_state(EngineState::Stopping, "generate results")?;
        let finalized = self.tracker.finalize().await;
        let (start, started_at) = self
            .start
            .unwrap_or_else(|| (Instant::now(), OffsetDateTime::now_utc()));
        let record = ResultsRecord::aggregate(&finalized, &self.samples, self.window, start)
            .with_started_at(started_at);
        info!(
            "results: {} confirmed, {} failed, average latency {:.1}ms",
            record.success, record.fail, record.average_latency_ms
        );
        self.transition(EngineState::Finalized);
        Ok(record)
    }

    /// Runs a full benchmark on an initialized engine with a parsed workload.
    ///
    /// After the schedule completes, keeps listening for confirmations until
    /// all sent transactions are confirmed or the grace period has passed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if any lifecycle step fails.
    pub async fn run(&mut self) -> Result<ResultsRecord, EngineError> {
        self.start_benchmark().await?;
        let stats = self.wait_for_schedule().await?;
        debug!("schedule complete, {} sends issued", stats.issued);
        self.wait_for_confirmations().await;
        self.stop_benchmark().await?;
        self.generate().await
    }
}

/// Awaits a task, logging instead of propagating a panic.
async fn join_logged<T>(handle: JoinHandle<T>, what: &str) -> Option<T> {
    match handle.await {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("{what} task failed: {err}");
            None
        }
    }
}
