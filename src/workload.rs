// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Planned benchmark workload.
//!
//! The [`Workload`] is indexed as `[secondary][thread][second]`, each entry
//! being the ordered list of opaque transaction payloads to submit during
//! that second. It is produced once by the [`WorkloadAllocator`] on the
//! primary and then read-only. Each secondary only ever sees its own
//! [`SecondaryWorkload`], which is shipped as bytes via
//! [`SecondaryWorkload::to_bytes`] and [`SecondaryWorkload::from_bytes`].

mod allocator;
mod source;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::allocator::{AllocationError, WorkloadAllocator};
pub use self::source::{PayloadPool, PayloadSource, RandomPayloads};
use crate::Payload;

const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

/// Error type for encoding and decoding workload slices.
#[derive(Debug, Error)]
pub enum WorkloadCodecError {
    #[error("serialization error")]
    Serialization(#[from] bincode::error::EncodeError),
    #[error("deserialization error")]
    Deserialization(#[from] bincode::error::DecodeError),
    #[error("{0} trailing bytes after workload")]
    TrailingBytes(usize),
}

/// Per-second payloads of a single worker thread.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadWorkload {
    intervals: Vec<Vec<Payload>>,
}

impl ThreadWorkload {
    fn with_seconds(seconds: usize) -> Self {
        Self {
            intervals: vec![Vec::new(); seconds],
        }
    }

    #[must_use]
    pub fn from_intervals(intervals: Vec<Vec<Payload>>) -> Self {
        Self { intervals }
    }

    /// Payloads to submit during `second`.
    #[must_use]
    pub fn interval(&self, second: usize) -> &[Payload] {
        self.intervals.get(second).map_or(&[], Vec::as_slice)
    }

    pub fn intervals(&self) -> impl Iterator<Item = &[Payload]> {
        self.intervals.iter().map(Vec::as_slice)
    }

    /// Number of seconds covered by this thread's schedule.
    #[must_use]
    pub fn seconds(&self) -> usize {
        self.intervals.len()
    }

    /// Total number of payloads over all seconds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn push(&mut self, second: usize, payload: Payload) {
        self.intervals[second].push(payload);
    }
}

/// Slice of the workload handed to one secondary.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryWorkload {
    threads: Vec<ThreadWorkload>,
}

impl SecondaryWorkload {
    #[must_use]
    pub fn from_threads(threads: Vec<ThreadWorkload>) -> Self {
        Self { threads }
    }

    #[must_use]
    pub fn threads(&self) -> &[ThreadWorkload] {
        &self.threads
    }

    #[must_use]
    pub fn into_threads(self) -> Vec<ThreadWorkload> {
        self.threads
    }

    /// Total number of payloads over all threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.iter().map(ThreadWorkload::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes this slice using [`bincode`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadCodecError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WorkloadCodecError> {
        Ok(bincode::serde::encode_to_vec(self, BINCODE_CONFIG)?)
    }

    /// Deserializes a slice previously produced by [`Self::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadCodecError`] if decoding fails or `bytes` holds more
    /// than a single slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WorkloadCodecError> {
        let (slice, read) = bincode::serde::decode_from_slice(bytes, BINCODE_CONFIG)?;
        if read != bytes.len() {
            return Err(WorkloadCodecError::TrailingBytes(bytes.len() - read));
        }
        Ok(slice)
    }
}

/// Full benchmark schedule, indexed by `[secondary][thread][second]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    secondaries: Vec<SecondaryWorkload>,
    seconds: usize,
}

impl Workload {
    /// Creates an empty workload where every slot has an (empty) entry per second.
    #[must_use]
    pub fn empty(secondaries: usize, threads: usize, seconds: usize) -> Self {
        let secondary = SecondaryWorkload {
            threads: vec![ThreadWorkload::with_seconds(seconds); threads],
        };
        Self {
            secondaries: vec![secondary; secondaries],
            seconds,
        }
    }

    /// Appends `payload` to the given slot and second.
    ///
    /// # Panics
    ///
    /// Panics if any index is out of range.
    pub fn add(&mut self, secondary: usize, thread: usize, second: usize, payload: Payload) {
        self.secondaries[secondary].threads[thread].push(second, payload);
    }

    #[must_use]
    pub fn num_secondaries(&self) -> usize {
        self.secondaries.len()
    }

    #[must_use]
    pub fn threads_per_secondary(&self) -> usize {
        self.secondaries.first().map_or(0, |s| s.threads.len())
    }

    #[must_use]
    pub fn seconds(&self) -> usize {
        self.seconds
    }

    #[must_use]
    pub fn secondary(&self, index: usize) -> Option<&SecondaryWorkload> {
        self.secondaries.get(index)
    }

    #[must_use]
    pub fn secondaries(&self) -> &[SecondaryWorkload] {
        &self.secondaries
    }

    /// Splits the workload into one slice per secondary.
    #[must_use]
    pub fn into_secondaries(self) -> Vec<SecondaryWorkload> {
        self.secondaries
    }

    /// Number of payloads scheduled for `second` across all slots.
    #[must_use]
    pub fn count_at(&self, second: usize) -> usize {
        self.secondaries
            .iter()
            .flat_map(|s| &s.threads)
            .map(|t| t.interval(second).len())
            .sum()
    }

    /// Total number of payloads in the workload.
    #[must_use]
    pub fn len(&self) -> usize {
        self.secondaries.iter().map(SecondaryWorkload::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn empty_has_every_second() {
        let workload = Workload::empty(2, 3, 5);
        assert_eq!(workload.num_secondaries(), 2);
        assert_eq!(workload.threads_per_secondary(), 3);
        for secondary in workload.secondaries() {
            for thread in secondary.threads() {
                assert_eq!(thread.seconds(), 5);
                assert!(thread.is_empty());
            }
        }
    }

    #[test]
    fn slice_codec() {
        let mut workload = Workload::empty(2, 2, 3);
        workload.add(0, 1, 2, Bytes::from_static(b"tx-a"));
        workload.add(1, 0, 0, Bytes::from_static(b"tx-b"));
        let slice = workload.secondary(0).unwrap();
        let bytes = slice.to_bytes().unwrap();
        let decoded = SecondaryWorkload::from_bytes(&bytes).unwrap();
        assert_eq!(&decoded, slice);
        assert_eq!(decoded.threads()[1].interval(2), &[Bytes::from_static(b"tx-a")]);
        assert!(decoded.threads()[0].is_empty());
    }

    #[test]
    fn slice_codec_rejects_garbage() {
        let slice = Workload::empty(1, 1, 1).into_secondaries().remove(0);
        let mut bytes = slice.to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(
            SecondaryWorkload::from_bytes(&bytes),
            Err(WorkloadCodecError::TrailingBytes(1))
        ));
        assert!(SecondaryWorkload::from_bytes(&[0xff; 3]).is_err());
    }
}
