// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Planning entry point on the primary.
//!
//! The [`Controller`] validates a [`BenchConfig`], builds the rate curve once
//! and turns it into a [`Workload`] split across all secondaries.

use log::info;

use crate::config::{BenchConfig, ConfigValidationError};
use crate::rate_curve::RateCurve;
use crate::workload::{AllocationError, PayloadSource, Workload, WorkloadAllocator};

/// Validated benchmark plan.
#[derive(Clone, Debug)]
pub struct Controller {
    config: BenchConfig,
    curve: RateCurve,
    allocator: WorkloadAllocator,
}

impl Controller {
    /// Validates `config` and builds its rate curve.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValidationError`] if the configuration is invalid.
    pub fn init(config: BenchConfig) -> Result<Self, ConfigValidationError> {
        if config.secondaries == 0 {
            return Err(ConfigValidationError::NoSecondaries);
        }
        if config.threads == 0 {
            return Err(ConfigValidationError::NoThreads);
        }
        let curve = config.rate_curve()?;
        info!(
            "benchmark {}: {} transactions over {}s on {}x{} workers",
            config.name,
            curve.total(),
            curve.len(),
            config.secondaries,
            config.threads
        );
        let allocator = WorkloadAllocator::new(config.secondaries, config.threads);
        Ok(Self {
            config,
            curve,
            allocator,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    #[must_use]
    pub fn curve(&self) -> &RateCurve {
        &self.curve
    }

    /// Generates the full workload from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError`] if `source` runs out of payloads.
    pub fn generate(&self, source: &mut impl PayloadSource) -> Result<Workload, AllocationError> {
        self.allocator.allocate(&self.curve, source)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::rate_curve::RateCheckpoint;
    use crate::workload::{PayloadPool, RandomPayloads};

    fn config(checkpoints: Vec<RateCheckpoint>) -> BenchConfig {
        BenchConfig {
            name: "test".to_owned(),
            description: None,
            tx_type: Default::default(),
            secondaries: 2,
            threads: 3,
            duration_secs: None,
            checkpoints,
        }
    }

    #[test]
    fn generate_matches_curve() {
        let controller = Controller::init(config(vec![
            RateCheckpoint::new(0, 70.0),
            RateCheckpoint::new(10, 70.0),
            RateCheckpoint::new(30, 40.0),
        ]))
        .unwrap();
        let workload = controller.generate(&mut RandomPayloads::new(16)).unwrap();
        assert_eq!(workload.num_secondaries(), 2);
        assert_eq!(workload.threads_per_secondary(), 3);
        for (second, rate) in controller.curve().iter().enumerate() {
            assert_eq!(workload.count_at(second) as u64, rate);
        }
    }

    #[test]
    fn invalid_configs() {
        assert!(matches!(
            Controller::init(config(Vec::new())),
            Err(ConfigValidationError::Checkpoints(_))
        ));
        let mut no_threads = config(vec![RateCheckpoint::new(0, 1.0)]);
        no_threads.threads = 0;
        assert_eq!(
            Controller::init(no_threads).unwrap_err(),
            ConfigValidationError::NoThreads
        );
    }

    #[test]
    fn exhausted_source() {
        let controller = Controller::init(config(vec![RateCheckpoint::new(0, 5.0)])).unwrap();
        let mut pool = PayloadPool::new([Bytes::from_static(b"only")]);
        assert!(matches!(
            controller.generate(&mut pool),
            Err(AllocationError::SourceExhausted { second: 0, .. })
        ));
    }
}
