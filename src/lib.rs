// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Diablo: Distributed Transaction-Load Generator for Blockchain Networks
//!
//! A primary node plans a time-varying transaction schedule and partitions it
//! across secondary machines and worker threads. Each secondary replays its
//! slice of the schedule against a live network endpoint and records when each
//! transaction was accepted versus confirmed.
//!
//! The planning side consists of:
//! - [`rate_curve`] turns sparse rate checkpoints into a dense per-second schedule.
//! - [`workload`] distributes that schedule across secondaries, threads and seconds.
//! - [`Controller`] validates the benchmark configuration and drives both.
//!
//! The execution side consists of:
//! - [`Engine`] is one secondary's benchmark instance and owns all shared state.
//! - [`pacer`] replays a thread's slice in wall-clock time.
//! - [`ConfirmationTracker`] correlates submitted transactions with confirmations.
//! - [`chain`] defines the adapter contract for concrete blockchains.
//! - [`sampler`] and [`results`] turn counters and ledger into statistics.

#![deny(rustdoc::broken_intra_doc_links)]

pub mod chain;
pub mod config;
pub mod controller;
pub mod engine;
pub mod logging;
pub mod pacer;
pub mod rate_curve;
pub mod results;
pub mod sampler;
#[cfg(test)]
pub mod test_utils;
pub mod tracker;
pub mod workload;

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use self::chain::ChainAdapter;
pub use self::controller::Controller;
pub use self::engine::{Engine, EngineState};
pub use self::results::ResultsRecord;
pub use self::tracker::ConfirmationTracker;
pub use self::workload::Workload;

/// Maximum number of bytes a transaction payload can contain.
pub const MAX_TRANSACTION_SIZE: usize = 100 * 1024;

/// Opaque transaction payload as produced by the planning phase.
pub type Payload = Bytes;

/// Chain-assigned transaction identifier, e.g. a hex-encoded transaction hash.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TxId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TxId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction that was parsed by a [`ChainAdapter`] ahead of the benchmark.
///
/// Holds the payload bytes exactly as they will be submitted.
/// A transaction cannot hold more than [`MAX_TRANSACTION_SIZE`] bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction(pub Payload);

impl Transaction {
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}
