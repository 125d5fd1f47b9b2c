// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Real-time replay of one worker thread's schedule.
//!
//! An [`ExecutionPacer`] owns the per-second transaction counts of a single
//! worker thread. Transaction indices are assigned in schedule order, so
//! second 0 covers indices `0..c0`, second 1 covers `c0..c0+c1`, and so on.
//! During second `i` the pacer waits until `start + i` seconds and then hands
//! every index of that second to a [`SendTransaction`] implementation.
//!
//! Sends of the same second run concurrently. Seconds are strictly ordered:
//! no send of second `i` starts before `start + i`. Cancelling the stop token
//! prevents new sends, while sends already in flight run to completion.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::workload::ThreadWorkload;

/// Capability to submit the transaction at a given schedule index.
#[async_trait]
pub trait SendTransaction: Send + Sync + 'static {
    /// Submits transaction `index` and accounts for its outcome.
    ///
    /// Called exactly once per scheduled index.
    async fn send_transaction(&self, index: usize);
}

/// Outcome of one pacer run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacerStats {
    /// Sends that were started.
    pub issued: usize,
    /// Scheduled sends that were never started because of the stop signal.
    pub skipped: usize,
}

/// Replays one worker thread's slice in wall-clock time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionPacer {
    seconds: Vec<Range<usize>>,
}

impl ExecutionPacer {
    /// Creates a pacer from the number of transactions to send in each second.
    #[must_use]
    pub fn from_counts(counts: impl IntoIterator<Item = usize>) -> Self {
        let mut next = 0;
        let seconds = counts
            .into_iter()
            .map(|count| {
                let range = next..next + count;
                next += count;
                range
            })
            .collect();
        Self { seconds }
    }

    /// Creates a pacer for the shape of `workload`.
    #[must_use]
    pub fn for_thread(workload: &ThreadWorkload) -> Self {
        Self::from_counts(workload.intervals().map(<[_]>::len))
    }

    /// Total number of scheduled transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seconds.last().map_or(0, |range| range.end)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indices scheduled for `second`.
    #[must_use]
    pub fn indices_at(&self, second: usize) -> Range<usize> {
        self.seconds.get(second).cloned().unwrap_or(0..0)
    }

    /// Runs the schedule relative to `start` until done or stopped.
    ///
    /// Returns once every started send has completed.
    pub async fn run(
        &self,
        sender: Arc<dyn SendTransaction>,
        start: Instant,
        stop: CancellationToken,
    ) -> PacerStats {
        let mut stats = PacerStats::default();
        let mut in_flight = JoinSet::new();

        'schedule: for (second, indices) in self.seconds.iter().enumerate() {
            let deadline = start + Duration::from_secs(second as u64);
            tokio::select! {
                biased;
                () = stop.cancelled() => break 'schedule,
                () = sleep_until(deadline) => {}
            }
            while in_flight.try_join_next().is_some() {}

            for index in indices.clone() {
                if stop.is_cancelled() {
                    break 'schedule;
                }
                let sender = Arc::clone(&sender);
                in_flight.spawn(async move { sender.send_transaction(index).await });
                stats.issued += 1;
            }
        }
        stats.skipped = self.len() - stats.issued;
        if stats.skipped > 0 {
            debug!("pacer stopped with {} sends left", stats.skipped);
        }

        while let Some(res) = in_flight.join_next().await {
            if let Err(err) = res {
                warn!("send task failed: {err}");
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::Mutex;

    use super::*;

    /// Records the time of every send, each send taking `latency`.
    struct RecordingSender {
        start: Instant,
        latency: Duration,
        sends: Mutex<Vec<(usize, Duration)>>,
    }

    impl RecordingSender {
        fn new(start: Instant, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                start,
                latency,
                sends: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SendTransaction for RecordingSender {
        async fn send_transaction(&self, index: usize) {
            let at = self.start.elapsed();
            tokio::time::sleep(self.latency).await;
            self.sends.lock().await.push((index, at));
        }
    }

    #[test]
    fn indices_follow_schedule_order() {
        let pacer = ExecutionPacer::from_counts([2, 0, 3]);
        assert_eq!(pacer.len(), 5);
        assert_eq!(pacer.indices_at(0), 0..2);
        assert_eq!(pacer.indices_at(1), 2..2);
        assert_eq!(pacer.indices_at(2), 2..5);
        assert_eq!(pacer.indices_at(3), 0..0);
        assert!(ExecutionPacer::from_counts([]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sends_are_aligned_to_seconds() {
        let start = Instant::now();
        let sender = RecordingSender::new(start, Duration::ZERO);
        let pacer = ExecutionPacer::from_counts([2, 1, 0, 2]);
        let stats = pacer
            .run(sender.clone(), start, CancellationToken::new())
            .await;
        assert_eq!(stats, PacerStats { issued: 5, skipped: 0 });

        let mut sends = sender.sends.lock().await.clone();
        sends.sort_unstable();
        let seconds: Vec<_> = sends.iter().map(|(i, at)| (*i, at.as_secs())).collect();
        assert_eq!(seconds, [(0, 0), (1, 0), (2, 1), (3, 3), (4, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_within_a_second_overlap() {
        let start = Instant::now();
        let sender = RecordingSender::new(start, Duration::from_millis(800));
        let pacer = ExecutionPacer::from_counts([10]);
        pacer
            .run(sender.clone(), start, CancellationToken::new())
            .await;
        // ten sequential sends would have taken eight seconds
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(sender.sends.lock().await.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_new_sends_but_finishes_in_flight() {
        let start = Instant::now();
        let sender = RecordingSender::new(start, Duration::from_millis(700));
        let pacer = ExecutionPacer::from_counts([1, 1, 1, 1]);
        let stop = CancellationToken::new();

        let task = {
            let (pacer, sender, stop) = (pacer.clone(), sender.clone(), stop.clone());
            tokio::spawn(async move { pacer.run(sender, start, stop).await })
        };
        tokio::time::sleep(Duration::from_millis(1500)).await;
        stop.cancel();
        let stats = task.await.unwrap();

        assert_eq!(stats, PacerStats { issued: 2, skipped: 2 });
        // the send started at 1s completes after the stop signal
        let sends = sender.sends.lock().await.clone();
        assert_eq!(sends.len(), 2);
        assert!(start.elapsed() >= Duration::from_millis(1700));
    }
}
