// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Ledger of submitted transactions and their confirmations.
//!
//! The [`ConfirmationTracker`] is the single source of truth for the outcome
//! of every transaction of a benchmark run. Senders register transactions
//! with [`ConfirmationTracker::record_sent`] (or report a failed submission
//! with [`ConfirmationTracker::record_send_failure`]), the block dispatch loop
//! crosses them off with [`ConfirmationTracker::record_confirmed`].
//!
//! The ledger is protected by one mutex that is only ever held for a single
//! map operation. The counters are lock-free atomics updated after the lock
//! is released, so a concurrent reader may briefly observe a counter that lags
//! behind the ledger. Final statistics are computed from the ledger by
//! [`ConfirmationTracker::finalize`], never from the counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, trace, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::TxId;

/// A submitted transaction awaiting (or having received) confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingTransaction {
    pub send_time: Instant,
    pub confirm_time: Option<Instant>,
}

impl PendingTransaction {
    /// Time between submission and confirmation, if confirmed.
    #[must_use]
    pub fn latency(&self) -> Option<std::time::Duration> {
        self.confirm_time
            .map(|confirmed| confirmed.saturating_duration_since(self.send_time))
    }
}

/// Snapshot of the tracker's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    /// Submission attempts, successful or not.
    pub sent: u64,
    /// Transactions observed in a block.
    pub confirmed: u64,
    /// Submissions rejected immediately by the adapter.
    pub failed: u64,
    /// Transactions with a final outcome so far: confirmed plus failed submissions.
    pub done: u64,
}

/// Reduction of the ledger at the end of a run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Finalized {
    /// Confirmation latency of every confirmed transaction, in milliseconds.
    pub latencies_ms: Vec<f64>,
    /// Ledger entries that were confirmed.
    pub confirmed: u64,
    /// Ledger entries never confirmed before the run ended.
    pub unconfirmed: u64,
    /// Submissions rejected immediately, without ledger entry.
    pub send_failures: u64,
    /// Time of the latest confirmation, if any.
    pub last_confirmation: Option<Instant>,
}

impl Finalized {
    /// All failures: rejected submissions plus never-confirmed transactions.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.send_failures + self.unconfirmed
    }
}

/// Thread-safe ledger of pending and confirmed transactions.
#[derive(Debug, Default)]
pub struct ConfirmationTracker {
    ledger: Mutex<HashMap<TxId, PendingTransaction>>,
    sent: AtomicU64,
    confirmed: AtomicU64,
    failed: AtomicU64,
    done: AtomicU64,
    finalized: AtomicBool,
}

impl ConfirmationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a successfully submitted transaction with send time now.
    pub async fn record_sent(&self, id: TxId) {
        self.record_sent_at(id, Instant::now()).await;
    }

    /// Registers a successfully submitted transaction with the given send time.
    ///
    /// Re-registering a known identifier keeps the original entry.
    pub async fn record_sent_at(&self, id: TxId, when: Instant) {
        let inserted = {
            let mut ledger = self.ledger.lock().await;
            match ledger.entry(id) {
                std::collections::hash_map::Entry::Occupied(entry) => {
                    warn!("transaction {} submitted twice", entry.key());
                    false
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(PendingTransaction {
                        send_time: when,
                        confirm_time: None,
                    });
                    true
                }
            }
        };
        if inserted {
            self.sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Accounts for a submission the adapter rejected immediately.
    pub fn record_send_failure(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks a transaction as confirmed at `when`.
    ///
    /// Unknown and already confirmed identifiers are ignored, which makes
    /// repeated delivery of the same block harmless.
    /// Returns `true` iff the ledger was changed.
    pub async fn record_confirmed(&self, id: &TxId, when: Instant) -> bool {
        let changed = {
            let mut ledger = self.ledger.lock().await;
            match ledger.get_mut(id) {
                Some(tx) if tx.confirm_time.is_none() => {
                    tx.confirm_time = Some(when);
                    true
                }
                _ => false,
            }
        };
        if changed {
            trace!("confirmed {id}");
            self.confirmed.fetch_add(1, Ordering::Relaxed);
            self.done.fetch_add(1, Ordering::Relaxed);
        }
        changed
    }

    /// Marks all given identifiers as confirmed at `when`, under one lock.
    ///
    /// Returns the number of ledger entries that changed.
    pub async fn record_confirmed_batch<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a TxId>,
        when: Instant,
    ) -> u64 {
        let mut changed = 0;
        {
            let mut ledger = self.ledger.lock().await;
            for id in ids {
                if let Some(tx) = ledger.get_mut(id) {
                    if tx.confirm_time.is_none() {
                        tx.confirm_time = Some(when);
                        changed += 1;
                    }
                }
            }
        }
        self.confirmed.fetch_add(changed, Ordering::Relaxed);
        self.done.fetch_add(changed, Ordering::Relaxed);
        changed
    }

    /// Current counter values, read without taking the ledger lock.
    #[must_use]
    pub fn counters(&self) -> Counters {
        Counters {
            sent: self.sent.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
        }
    }

    /// Number of transactions confirmed so far, excluding failed submissions.
    #[must_use]
    pub fn confirmed_so_far(&self) -> u64 {
        let done = self.done.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        done.saturating_sub(failed)
    }

    /// Looks up the ledger entry of `id`.
    pub async fn get(&self, id: &TxId) -> Option<PendingTransaction> {
        self.ledger.lock().await.get(id).copied()
    }

    /// Number of ledger entries.
    pub async fn len(&self) -> usize {
        self.ledger.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ledger.lock().await.is_empty()
    }

    /// Reduces the ledger into latencies and failure counts.
    ///
    /// Must be called once, after sends and confirmations have stopped.
    /// Entries without confirmation time count as failures.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub async fn finalize(&self) -> Finalized {
        let already = self.finalized.swap(true, Ordering::AcqRel);
        assert!(!already, "confirmation tracker finalized twice");

        let ledger = self.ledger.lock().await;
        let mut result = Finalized {
            latencies_ms: Vec::with_capacity(ledger.len()),
            send_failures: self.failed.load(Ordering::Relaxed),
            ..Finalized::default()
        };
        for tx in ledger.values() {
            match (tx.confirm_time, tx.latency()) {
                (Some(confirmed), Some(latency)) => {
                    result.latencies_ms.push(latency.as_secs_f64() * 1000.0);
                    result.confirmed += 1;
                    if result.last_confirmation.is_none_or(|last| confirmed > last) {
                        result.last_confirmation = Some(confirmed);
                    }
                }
                _ => result.unconfirmed += 1,
            }
        }
        debug!(
            "finalized ledger: {} confirmed, {} unconfirmed, {} send failures",
            result.confirmed, result.unconfirmed, result.send_failures
        );
        result
    }
}
