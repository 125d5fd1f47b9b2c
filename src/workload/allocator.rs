// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Fair distribution of a rate curve across secondaries and threads.
//!
//! Every (secondary, thread) pair is a *slot*. Payloads of consecutive
//! seconds are dealt to the slots round-robin with a cursor that carries over
//! from one second to the next. Each slot thus receives either
//! `floor(rate / slots)` or `ceil(rate / slots)` payloads per second, and the
//! slots receiving the extra payload rotate instead of always being slot 0.
//! Consecutive slots alternate between secondaries, so neighboring payloads
//! land on different machines.

use log::debug;
use thiserror::Error;

use super::{PayloadSource, Workload};
use crate::rate_curve::RateCurve;

/// Error type for workload generation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("payload source exhausted at second {second}: needed {needed}, {available} left")]
    SourceExhausted {
        second: usize,
        needed: usize,
        available: usize,
    },
}

/// Distributes a [`RateCurve`] over `secondaries × threads` slots.
#[derive(Clone, Copy, Debug)]
pub struct WorkloadAllocator {
    secondaries: usize,
    threads: usize,
}

impl WorkloadAllocator {
    /// Creates a new allocator.
    ///
    /// # Panics
    ///
    /// Panics if `secondaries` or `threads` is zero.
    #[must_use]
    pub fn new(secondaries: usize, threads: usize) -> Self {
        assert!(secondaries > 0, "need at least one secondary");
        assert!(threads > 0, "need at least one thread");
        Self {
            secondaries,
            threads,
        }
    }

    /// Total number of (secondary, thread) slots.
    #[must_use]
    pub const fn slots(&self) -> usize {
        self.secondaries * self.threads
    }

    /// Maps a slot number to its (secondary, thread) pair.
    const fn slot_position(&self, slot: usize) -> (usize, usize) {
        (slot % self.secondaries, slot / self.secondaries)
    }

    /// Builds the workload for `curve`, pulling payloads from `source`.
    ///
    /// For every second `i` exactly `curve[i]` payloads are taken and assigned
    /// in the order they were supplied.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::SourceExhausted`] as soon as `source` cannot
    /// supply the count required for a second. No partial workload is returned.
    pub fn allocate(
        &self,
        curve: &RateCurve,
        source: &mut impl PayloadSource,
    ) -> Result<Workload, AllocationError> {
        let slots = self.slots();
        let mut workload = Workload::empty(self.secondaries, self.threads, curve.len());
        let mut cursor = 0;

        for (second, rate) in curve.iter().enumerate() {
            let needed = rate as usize;
            let Some(payloads) = source.take(needed) else {
                return Err(AllocationError::SourceExhausted {
                    second,
                    needed,
                    available: source.remaining().unwrap_or(0),
                });
            };
            for payload in payloads {
                let (secondary, thread) = self.slot_position(cursor);
                workload.add(secondary, thread, second, payload);
                cursor = (cursor + 1) % slots;
            }
        }

        debug!(
            "allocated {} payloads over {} seconds to {} secondaries x {} threads",
            workload.len(),
            curve.len(),
            self.secondaries,
            self.threads
        );
        Ok(workload)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::rate_curve::RateCheckpoint;
    use crate::workload::{PayloadPool, RandomPayloads};

    fn numbered_pool(count: u32) -> PayloadPool {
        PayloadPool::new((0..count).map(|i| Bytes::from(i.to_be_bytes().to_vec())))
    }

    #[test]
    fn counts_match_curve() {
        let curve = RateCurve::build(&[
            RateCheckpoint::new(0, 70.0),
            RateCheckpoint::new(10, 70.0),
            RateCheckpoint::new(30, 40.0),
        ])
        .unwrap();
        for (secondaries, threads) in [(1, 1), (1, 4), (3, 1), (3, 7)] {
            let allocator = WorkloadAllocator::new(secondaries, threads);
            let workload = allocator
                .allocate(&curve, &mut RandomPayloads::new(8))
                .unwrap();
            assert_eq!(workload.seconds(), curve.len());
            for (second, rate) in curve.iter().enumerate() {
                assert_eq!(workload.count_at(second) as u64, rate);
            }
            assert_eq!(workload.len() as u64, curve.total());
        }
    }

    #[test]
    fn even_spread_with_rotation() {
        // 5 payloads per second over 2x2 slots: one slot gets 2 each second
        let curve = RateCurve::from_rates(vec![5; 4]);
        let workload = WorkloadAllocator::new(2, 2)
            .allocate(&curve, &mut RandomPayloads::new(4))
            .unwrap();

        let mut heavy_slots = Vec::new();
        for second in 0..4 {
            let mut counts = Vec::new();
            for secondary in workload.secondaries() {
                for thread in secondary.threads() {
                    counts.push(thread.interval(second).len());
                }
            }
            assert!(counts.iter().all(|&c| c == 1 || c == 2));
            heavy_slots.push(counts.iter().position(|&c| c == 2).unwrap());
        }
        // the extra payload moves to a different slot every second
        heavy_slots.sort_unstable();
        heavy_slots.dedup();
        assert_eq!(heavy_slots.len(), 4);
    }

    #[test]
    fn payload_order_is_preserved() {
        let curve = RateCurve::from_rates(vec![4, 4]);
        let workload = WorkloadAllocator::new(1, 2)
            .allocate(&curve, &mut numbered_pool(8))
            .unwrap();
        let thread0 = &workload.secondary(0).unwrap().threads()[0];
        let expected: Vec<Bytes> = [0u32, 2]
            .iter()
            .map(|i| Bytes::from(i.to_be_bytes().to_vec()))
            .collect();
        assert_eq!(thread0.interval(0), expected.as_slice());
    }

    #[test]
    fn zero_rate_seconds_have_empty_entries() {
        let curve = RateCurve::from_rates(vec![0, 3, 0]);
        let workload = WorkloadAllocator::new(2, 1)
            .allocate(&curve, &mut numbered_pool(3))
            .unwrap();
        for secondary in workload.secondaries() {
            for thread in secondary.threads() {
                assert_eq!(thread.seconds(), 3);
                assert!(thread.interval(0).is_empty());
                assert!(thread.interval(2).is_empty());
            }
        }
        assert_eq!(workload.count_at(1), 3);
    }

    #[test]
    fn exhausted_source() {
        let curve = RateCurve::from_rates(vec![2, 2, 2]);
        let err = WorkloadAllocator::new(1, 1)
            .allocate(&curve, &mut numbered_pool(5))
            .unwrap_err();
        assert_eq!(
            err,
            AllocationError::SourceExhausted {
                second: 2,
                needed: 2,
                available: 1
            }
        );
    }
}
