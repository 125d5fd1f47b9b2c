// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Utility functions for tests.

use std::sync::Arc;

use bytes::Bytes;

use crate::Engine;
use crate::chain::SimulatedChain;
use crate::config::{ChainConfig, SimulatedConfig};
use crate::workload::{SecondaryWorkload, ThreadWorkload};

/// Builds a one-thread slice from per-second payload strings.
pub fn single_thread_slice(seconds: &[&[&str]]) -> SecondaryWorkload {
    let intervals = seconds
        .iter()
        .map(|second| {
            second
                .iter()
                .map(|payload| Bytes::copy_from_slice(payload.as_bytes()))
                .collect()
        })
        .collect();
    SecondaryWorkload::from_threads(vec![ThreadWorkload::from_intervals(intervals)])
}

/// Returns an initialized engine running against a fresh simulated chain.
pub async fn simulated_engine(simulated: SimulatedConfig) -> Engine {
    let config = ChainConfig::simulated(simulated);
    let chain = SimulatedChain::new(config.simulated.clone(), config.poll_interval());
    let mut engine = Engine::with_adapter(Arc::new(chain));
    engine
        .init(&config)
        .await
        .expect("simulated chain config is valid");
    engine
}
