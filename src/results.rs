// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Final statistics of a benchmark run.
//!
//! A [`ResultsRecord`] is computed exactly once per engine, after the
//! [`ConfirmationTracker`](crate::ConfirmationTracker) was finalized, from
//! the reduced ledger and the throughput samples. Records of several
//! secondaries can be combined with [`ResultsRecord::merge`].
//!
//! Records are exported as JSON; the per-transaction latencies can also be
//! written as CSV for plotting.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::tracker::Finalized;

/// Errors that can occur while exporting results.
#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("io error")]
    Io(#[from] io::Error),
    #[error("json error")]
    Json(#[from] serde_json::Error),
    #[error("csv error")]
    Csv(#[from] csv::Error),
}

/// Aggregated outcome of a benchmark run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsRecord {
    /// Wall-clock time the benchmark started.
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub started_at: Option<OffsetDateTime>,
    /// Length of one throughput window in seconds.
    pub window_secs: f64,
    /// Confirmation latency of every confirmed transaction, in milliseconds.
    pub latencies_ms: Vec<f64>,
    pub average_latency_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,
    /// Mean of the per-window confirmation counts.
    pub average_throughput: f64,
    /// Transactions confirmed during each window.
    pub throughput_per_window: Vec<u64>,
    /// Confirmed transactions divided by the time until the last confirmation.
    pub overall_throughput: f64,
    /// Submission attempts, including rejected ones.
    pub sent: u64,
    /// Confirmed transactions.
    pub success: u64,
    /// Rejected submissions plus transactions never confirmed.
    pub fail: u64,
}

impl ResultsRecord {
    /// Reduces a finalized ledger and the throughput samples into a record.
    ///
    /// `samples` are cumulative confirmed counts at the end of each window
    /// and `start` is the instant the benchmark started.
    #[must_use]
    pub fn aggregate(finalized: &Finalized, samples: &[u64], window: Duration, start: Instant) -> Self {
        let throughput_per_window = window_deltas(samples);
        let window_secs = window.as_secs_f64();
        let overall_throughput = match finalized.last_confirmation {
            Some(last) if last > start => {
                finalized.confirmed as f64 / last.duration_since(start).as_secs_f64()
            }
            _ => 0.0,
        };

        let mut record = Self {
            started_at: None,
            window_secs,
            latencies_ms: finalized.latencies_ms.clone(),
            average_throughput: 0.0,
            throughput_per_window,
            overall_throughput,
            sent: finalized.confirmed + finalized.failures(),
            success: finalized.confirmed,
            fail: finalized.failures(),
            ..Self::default()
        };
        record.compute_statistics();
        record
    }

    #[must_use]
    pub fn with_started_at(mut self, started_at: OffsetDateTime) -> Self {
        self.started_at = Some(started_at);
        self
    }

    /// Combines the records of several secondaries into one.
    ///
    /// Windows are aligned by index and summed, assuming all secondaries use
    /// the same window length and started at about the same time.
    #[must_use]
    pub fn merge(records: &[Self]) -> Self {
        let mut merged = Self {
            started_at: records.iter().filter_map(|r| r.started_at).min(),
            window_secs: records.first().map_or(0.0, |r| r.window_secs),
            ..Self::default()
        };
        for record in records {
            merged.latencies_ms.extend_from_slice(&record.latencies_ms);
            if merged.throughput_per_window.len() < record.throughput_per_window.len() {
                merged
                    .throughput_per_window
                    .resize(record.throughput_per_window.len(), 0);
            }
            for (sum, value) in merged
                .throughput_per_window
                .iter_mut()
                .zip(&record.throughput_per_window)
            {
                *sum += value;
            }
            merged.overall_throughput += record.overall_throughput;
            merged.sent += record.sent;
            merged.success += record.success;
            merged.fail += record.fail;
        }
        merged.compute_statistics();
        merged
    }

    /// Recomputes averages and percentiles from latencies and windows.
    fn compute_statistics(&mut self) {
        self.average_latency_ms = mean(&self.latencies_ms);
        let mut sorted = self.latencies_ms.clone();
        sorted.sort_unstable_by(f64::total_cmp);
        self.latency_p50_ms = percentile(&sorted, 50.0);
        self.latency_p90_ms = percentile(&sorted, 90.0);
        self.latency_p99_ms = percentile(&sorted, 99.0);

        let deltas: Vec<f64> = self.throughput_per_window.iter().map(|&d| d as f64).collect();
        self.average_throughput = mean(&deltas);
    }

    /// Serializes the record as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ResultsError::Json`] if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, ResultsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the record as JSON to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ResultsError`] if the file cannot be written.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ResultsError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Writes one `index,latency_ms` row per confirmed transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ResultsError`] if writing fails.
    pub fn write_latencies_csv(&self, writer: impl Write) -> Result<(), ResultsError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(["index", "latency_ms"])?;
        for (index, latency) in self.latencies_ms.iter().enumerate() {
            csv.serialize((index, latency))?;
        }
        csv.flush()?;
        Ok(())
    }
}

/// Turns cumulative samples into per-window counts.
///
/// The first sample is the count of the first window.
fn window_deltas(samples: &[u64]) -> Vec<u64> {
    let mut previous = 0;
    samples
        .iter()
        .map(|&sample| {
            let delta = sample.saturating_sub(previous);
            previous = sample;
            delta
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Nearest-rank percentile of an ascending slice, 0 if empty.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
