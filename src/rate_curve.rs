// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Target-rate curve of a benchmark.
//!
//! A benchmark describes its load as a sparse set of [`RateCheckpoint`]s,
//! each saying "at `offset_secs` seconds into the run, send `rate` transactions
//! per second". [`RateCurve::build`] turns those into a dense schedule with one
//! integer rate per second, interpolating linearly between checkpoints.
//!
//! # Examples
//!
//! ```
//! use diablo::rate_curve::{RateCheckpoint, RateCurve};
//!
//! let checkpoints = [RateCheckpoint::new(10, 10.0), RateCheckpoint::new(40, 70.0)];
//! let curve = RateCurve::build(&checkpoints).unwrap();
//! assert_eq!(curve.len(), 41);
//! assert_eq!(curve[0], 0);
//! assert_eq!(curve[10], 10);
//! assert_eq!(curve[11], 12);
//! assert_eq!(curve[40], 70);
//! ```

use std::ops::Index;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted checkpoint offset or run duration, one week.
pub const MAX_OFFSET_SECS: u64 = 7 * 24 * 60 * 60;

/// Largest accepted target rate in transactions per second.
pub const MAX_RATE: f64 = 1_000_000.0;

/// One control point of the desired load curve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateCheckpoint {
    /// Seconds since the start of the benchmark.
    pub offset_secs: u64,
    /// Target transactions per second at this offset.
    pub rate: f64,
}

impl RateCheckpoint {
    #[must_use]
    pub const fn new(offset_secs: u64, rate: f64) -> Self {
        Self { offset_secs, rate }
    }
}

/// Errors for checkpoint sets that do not describe a valid curve.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CheckpointError {
    #[error("at least one rate checkpoint is required")]
    Empty,
    #[error("rate {rate} at offset {offset}s is negative")]
    NegativeRate { offset: u64, rate: f64 },
    #[error("rate at offset {0}s is not a finite number")]
    NonFiniteRate(u64),
    #[error("offset {0}s is given more than once")]
    DuplicateOffset(u64),
    #[error("offset {0}s exceeds the maximum of {max}s", max = MAX_OFFSET_SECS)]
    OffsetTooLarge(u64),
    #[error("rate {rate} at offset {offset}s exceeds the maximum of {max}", max = MAX_RATE)]
    RateTooLarge { offset: u64, rate: f64 },
}

impl CheckpointError {
    /// Checks a single checkpoint against the accepted ranges.
    pub(crate) fn check(cp: &RateCheckpoint) -> Result<(), Self> {
        if cp.offset_secs > MAX_OFFSET_SECS {
            return Err(Self::OffsetTooLarge(cp.offset_secs));
        }
        if !cp.rate.is_finite() {
            return Err(Self::NonFiniteRate(cp.offset_secs));
        }
        if cp.rate < 0.0 {
            return Err(Self::NegativeRate {
                offset: cp.offset_secs,
                rate: cp.rate,
            });
        }
        if cp.rate > MAX_RATE {
            return Err(Self::RateTooLarge {
                offset: cp.offset_secs,
                rate: cp.rate,
            });
        }
        Ok(())
    }
}

/// Dense per-second target rates.
///
/// Entry `i` is the number of transactions to send during second `i` of the
/// benchmark. Always holds at least one entry and is immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCurve(Vec<u64>);

impl RateCurve {
    /// Builds the curve by interpolating between the given checkpoints.
    ///
    /// Checkpoints may be given in any order. If none starts at offset 0,
    /// an implicit `(0, 0)` anchor is added. For consecutive checkpoints
    /// `(o1, r1)` and `(o2, r2)`, second `i` in `[o1, o2)` gets
    /// `floor(r1 + (r2 - r1) * (i - o1) / (o2 - o1))`. The last checkpoint
    /// contributes its own rate, so the curve has length `last offset + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if `checkpoints` is empty, repeats an
    /// offset, or holds an offset or rate outside the accepted ranges.
    pub fn build(checkpoints: &[RateCheckpoint]) -> Result<Self, CheckpointError> {
        if checkpoints.is_empty() {
            return Err(CheckpointError::Empty);
        }
        for cp in checkpoints {
            CheckpointError::check(cp)?;
        }

        let mut sorted = checkpoints.to_vec();
        sorted.sort_by_key(|cp| cp.offset_secs);
        if let Some(dup) = sorted.windows(2).find(|w| w[0].offset_secs == w[1].offset_secs) {
            return Err(CheckpointError::DuplicateOffset(dup[0].offset_secs));
        }
        if sorted[0].offset_secs > 0 {
            sorted.insert(0, RateCheckpoint::new(0, 0.0));
        }

        let last = sorted[sorted.len() - 1];
        let mut rates = Vec::with_capacity(last.offset_secs as usize + 1);
        for pair in sorted.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let span = (to.offset_secs - from.offset_secs) as f64;
            for i in from.offset_secs..to.offset_secs {
                let progress = (i - from.offset_secs) as f64;
                let rate = from.rate + (to.rate - from.rate) * progress / span;
                rates.push(floor_rate(rate));
            }
        }
        rates.push(floor_rate(last.rate));
        Ok(Self(rates))
    }

    /// Creates a curve directly from per-second rates.
    ///
    /// # Panics
    ///
    /// Panics if `rates` is empty.
    #[must_use]
    pub fn from_rates(rates: Vec<u64>) -> Self {
        assert!(!rates.is_empty(), "rate curve needs at least one second");
        Self(rates)
    }

    /// Returns a curve covering exactly `secs` seconds.
    ///
    /// Longer curves are truncated, shorter ones are extended by holding the
    /// rate of their final second. A length of 0 is treated as 1 and lengths
    /// beyond [`MAX_OFFSET_SECS`] are clamped to it.
    #[must_use]
    pub fn with_duration_secs(mut self, secs: u64) -> Self {
        let secs = secs.clamp(1, MAX_OFFSET_SECS) as usize;
        let last = self.0[self.0.len() - 1];
        self.0.resize(secs, last);
        self
    }

    /// Number of seconds covered by this curve.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`, a curve covers at least one second.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Wall-clock duration of the schedule described by this curve.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.0.len() as u64)
    }

    /// Total number of transactions over the whole curve.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }
}

impl Index<usize> for RateCurve {
    type Output = u64;

    fn index(&self, second: usize) -> &u64 {
        &self.0[second]
    }
}

fn floor_rate(rate: f64) -> u64 {
    rate.floor().max(0.0) as u64
}
