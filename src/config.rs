// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Benchmark and chain configuration files.
//!
//! Both files are TOML. A benchmark file describes the load to generate:
//!
//! ```toml
//! name = "sample"
//! description = "ramp down after ten seconds"
//!
//! [bench]
//! type = "simple"
//! secondaries = 2
//! threads = 4
//!
//! [bench.txs]
//! 0 = 70
//! 10 = 70
//! 30 = 40
//! ```
//!
//! Each entry of `bench.txs` is a rate checkpoint: the key is the offset in
//! seconds and the value the target rate. Keys must be non-negative integers,
//! values non-negative numbers. Validation failures surface as
//! [`ConfigValidationError`] before any planning happens.
//!
//! A chain file describes which adapter to use and how to reach the network.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rate_curve::{CheckpointError, MAX_OFFSET_SECS, RateCheckpoint, RateCurve};

/// Errors that can occur while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config")]
    Validation(#[from] ConfigValidationError),
}

/// Semantic errors in an otherwise well-formed configuration file.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigValidationError {
    #[error("`{0}` must be a plain value")]
    NotAScalar(&'static str),
    #[error("`bench.txs` must be a table of offset = rate entries")]
    TxsNotATable,
    #[error("checkpoint offset `{0}` is not an integer")]
    InvalidOffset(String),
    #[error("checkpoint offset {0} is negative")]
    NegativeOffset(i64),
    #[error("rate `{value}` at offset {offset}s is not a number")]
    InvalidRate { offset: u64, value: String },
    #[error(transparent)]
    Checkpoints(#[from] CheckpointError),
    #[error("duration of {0}s exceeds the maximum of {max}s", max = MAX_OFFSET_SECS)]
    DurationTooLarge(u64),
    #[error("at least one secondary is required")]
    NoSecondaries,
    #[error("at least one thread per secondary is required")]
    NoThreads,
    #[error("at least one node address is required")]
    NoNodes,
    #[error("throughput window must be at least one second")]
    ZeroWindow,
}

/// Kind of transactions the benchmark submits.
///
/// The admissible set is fixed; unknown tags are rejected when parsing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    /// Plain value transfers.
    #[default]
    Simple,
    /// Smart-contract invocations.
    Contract,
}

#[derive(Debug, Deserialize)]
struct RawBenchConfig {
    name: toml::Value,
    #[serde(default)]
    description: Option<toml::Value>,
    bench: RawBench,
}

#[derive(Debug, Deserialize)]
struct RawBench {
    #[serde(rename = "type")]
    tx_type: TxType,
    #[serde(default = "one")]
    secondaries: usize,
    #[serde(default = "one")]
    threads: usize,
    #[serde(default)]
    duration_secs: Option<u64>,
    #[serde(default)]
    txs: Option<toml::Value>,
}

const fn one() -> usize {
    1
}

/// Validated benchmark description.
#[derive(Clone, Debug, PartialEq)]
pub struct BenchConfig {
    pub name: String,
    pub description: Option<String>,
    pub tx_type: TxType,
    /// Number of secondary machines replaying the workload.
    pub secondaries: usize,
    /// Number of worker threads on each secondary.
    pub threads: usize,
    /// Total run duration; defaults to the length of the rate curve.
    pub duration_secs: Option<u64>,
    /// Rate checkpoints, sorted by offset.
    pub checkpoints: Vec<RateCheckpoint>,
}

impl BenchConfig {
    /// Reads and validates the benchmark file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, is not valid TOML,
    /// or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = read_file(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates a benchmark description from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] for syntax errors, missing fields and
    /// unknown transaction types, and [`ConfigError::Validation`] for
    /// semantically invalid values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawBenchConfig = toml::from_str(text)?;
        let name = scalar_to_string(&raw.name).ok_or(ConfigValidationError::NotAScalar("name"))?;
        let description = match &raw.description {
            None => None,
            Some(v) => Some(
                scalar_to_string(v).ok_or(ConfigValidationError::NotAScalar("description"))?,
            ),
        };
        if raw.bench.secondaries == 0 {
            return Err(ConfigValidationError::NoSecondaries.into());
        }
        if raw.bench.threads == 0 {
            return Err(ConfigValidationError::NoThreads.into());
        }
        if let Some(secs) = raw.bench.duration_secs {
            check_duration(secs)?;
        }
        let txs = raw.bench.txs.unwrap_or_else(|| toml::Value::Table(toml::Table::new()));
        let checkpoints = parse_checkpoints(&txs)?;

        Ok(Self {
            name,
            description,
            tx_type: raw.bench.tx_type,
            secondaries: raw.bench.secondaries,
            threads: raw.bench.threads,
            duration_secs: raw.bench.duration_secs,
            checkpoints,
        })
    }

    /// Builds the dense rate curve, adjusted to `duration_secs` if set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValidationError`] if the checkpoints do not form a
    /// valid curve or the duration is too long.
    pub fn rate_curve(&self) -> Result<RateCurve, ConfigValidationError> {
        let curve = RateCurve::build(&self.checkpoints)?;
        Ok(match self.duration_secs {
            Some(secs) => {
                check_duration(secs)?;
                curve.with_duration_secs(secs)
            }
            None => curve,
        })
    }
}

fn check_duration(secs: u64) -> Result<(), ConfigValidationError> {
    if secs > MAX_OFFSET_SECS {
        return Err(ConfigValidationError::DurationTooLarge(secs));
    }
    Ok(())
}

/// Validates the checkpoint table of a benchmark file.
///
/// # Errors
///
/// Returns [`ConfigValidationError`] if `txs` is not a non-empty table with
/// integer keys in `0..=MAX_OFFSET_SECS` and numeric values in `0..=MAX_RATE`.
pub fn parse_checkpoints(txs: &toml::Value) -> Result<Vec<RateCheckpoint>, ConfigValidationError> {
    let toml::Value::Table(table) = txs else {
        return Err(ConfigValidationError::TxsNotATable);
    };
    if table.is_empty() {
        return Err(CheckpointError::Empty.into());
    }

    let mut checkpoints = Vec::with_capacity(table.len());
    for (key, value) in table {
        let offset: i64 = key
            .trim()
            .parse()
            .map_err(|_| ConfigValidationError::InvalidOffset(key.clone()))?;
        let offset =
            u64::try_from(offset).map_err(|_| ConfigValidationError::NegativeOffset(offset))?;
        let rate = match value {
            toml::Value::Integer(i) => *i as f64,
            toml::Value::Float(f) => *f,
            toml::Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
                ConfigValidationError::InvalidRate {
                    offset,
                    value: s.clone(),
                }
            })?,
            other => {
                return Err(ConfigValidationError::InvalidRate {
                    offset,
                    value: other.to_string(),
                });
            }
        };
        let checkpoint = RateCheckpoint::new(offset, rate);
        CheckpointError::check(&checkpoint)?;
        checkpoints.push(checkpoint);
    }
    checkpoints.sort_by_key(|cp| cp.offset_secs);
    Ok(checkpoints)
}

fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Which [`ChainAdapter`](crate::chain::ChainAdapter) implementation to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// In-process simulated chain, see [`crate::chain::simulated`].
    #[default]
    Simulated,
    /// Bitcoin-family JSON-RPC node, see [`crate::chain::rpc`].
    Rpc,
}

/// How confirmations are delivered by the simulated chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    /// New blocks are pushed through a subscription.
    #[default]
    Push,
    /// The engine polls for the latest block.
    Poll,
}

/// Behavior knobs of the simulated chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Delay between submission and inclusion in a block.
    pub confirm_delay_ms: u64,
    /// Accept submissions but never include them in a block.
    pub never_confirm: bool,
    /// Reject every n-th submission immediately.
    pub fail_every: Option<u64>,
    /// Deliver every block twice.
    pub duplicate_delivery: bool,
    pub feed: FeedMode,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            confirm_delay_ms: 50,
            never_confirm: false,
            fail_every: None,
            duplicate_delivery: false,
            feed: FeedMode::Push,
        }
    }
}

/// Blockchain the benchmark runs against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    #[serde(default)]
    pub kind: ChainKind,
    /// Node addresses. Secondary `i` talks to node `i % nodes.len()`.
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Throughput sampling window in seconds.
    #[serde(default = "default_window")]
    pub window: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long to keep listening for confirmations after the last send.
    #[serde(default = "default_confirmation_grace_secs")]
    pub confirmation_grace_secs: u64,
    #[serde(default)]
    pub rpc_user: Option<String>,
    #[serde(default)]
    pub rpc_password: Option<String>,
    #[serde(default)]
    pub simulated: SimulatedConfig,
}

const fn default_window() -> u64 {
    1
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_confirmation_grace_secs() -> u64 {
    10
}

impl ChainConfig {
    /// Configuration for the in-process simulated chain with default settings.
    #[must_use]
    pub fn simulated(simulated: SimulatedConfig) -> Self {
        Self {
            name: "simulated".to_owned(),
            kind: ChainKind::Simulated,
            nodes: vec!["local".to_owned()],
            window: default_window(),
            poll_interval_ms: default_poll_interval_ms(),
            confirmation_grace_secs: default_confirmation_grace_secs(),
            rpc_user: None,
            rpc_password: None,
            simulated,
        }
    }

    /// Reads and validates the chain file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = read_file(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates a chain description from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if parsing or validation fails.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValidationError`] for a zero window or a missing node address.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.window == 0 {
            return Err(ConfigValidationError::ZeroWindow);
        }
        if self.kind == ChainKind::Rpc && self.nodes.is_empty() {
            return Err(ConfigValidationError::NoNodes);
        }
        Ok(())
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    #[must_use]
    pub fn confirmation_grace(&self) -> Duration {
        Duration::from_secs(self.confirmation_grace_secs)
    }
}
