// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Periodic sampling of confirmed transactions.

use std::sync::Arc;
use std::time::Duration;

use log::trace;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::ConfirmationTracker;

/// Default sampling window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Background task recording the cumulative confirmed count once per window.
pub struct ThroughputSampler {
    tracker: Arc<ConfirmationTracker>,
    window: Duration,
    stop: CancellationToken,
}

impl ThroughputSampler {
    #[must_use]
    pub fn new(tracker: Arc<ConfirmationTracker>, window: Duration, stop: CancellationToken) -> Self {
        Self {
            tracker,
            window,
            stop,
        }
    }

    /// Spawns the sampler; the handle resolves to the samples once stopped.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<Vec<u64>> {
        tokio::spawn(self.run())
    }

    /// Samples at the end of every window until the stop token is cancelled.
    pub async fn run(self) -> Vec<u64> {
        let mut ticker = interval_at(Instant::now() + self.window, self.window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut samples = Vec::new();
        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    let sample = self.tracker.confirmed_so_far();
                    trace!("throughput sample {}: {sample}", samples.len());
                    samples.push(sample);
                }
            }
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxId;

    #[tokio::test(start_paused = true)]
    async fn samples_cumulative_confirmations() {
        let tracker = Arc::new(ConfirmationTracker::new());
        let stop = CancellationToken::new();
        let handle = ThroughputSampler::new(tracker.clone(), DEFAULT_WINDOW, stop.clone()).spawn();

        for i in 0..6 {
            tracker.record_sent(TxId::new(format!("{i}"))).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        for i in 0..2 {
            tracker.record_confirmed(&TxId::new(format!("{i}")), Instant::now()).await;
        }
        tracker.record_send_failure();
        tokio::time::sleep(Duration::from_secs(1)).await;
        for i in 2..6 {
            tracker.record_confirmed(&TxId::new(format!("{i}")), Instant::now()).await;
        }
        tokio::time::sleep(Duration::from_millis(1700)).await;
        stop.cancel();

        // ticks at 1s, 2s and 3s
        assert_eq!(handle.await.unwrap(), vec![2, 6, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_stop_yields_no_samples() {
        let stop = CancellationToken::new();
        stop.cancel();
        let sampler = ThroughputSampler::new(Arc::default(), DEFAULT_WINDOW, stop);
        assert!(sampler.run().await.is_empty());
    }
}
