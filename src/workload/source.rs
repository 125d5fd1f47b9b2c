// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

//! Sources of transaction payloads for the allocator.

use std::collections::VecDeque;
use std::path::Path;

use bytes::Bytes;
use rand::RngCore;

use crate::Payload;

/// Supplier of opaque transaction payloads.
pub trait PayloadSource {
    /// Returns exactly `count` payloads, or `None` if fewer are available.
    ///
    /// Implementors must not consume anything when returning `None`.
    fn take(&mut self, count: usize) -> Option<Vec<Payload>>;

    /// Number of payloads still available, `None` if unbounded.
    fn remaining(&self) -> Option<usize>;
}

/// Unbounded source of random payloads of a fixed size.
///
/// Useful against chains (or the simulated chain) that accept arbitrary bytes.
pub struct RandomPayloads<R> {
    rng: R,
    size: usize,
}

impl RandomPayloads<rand::rngs::ThreadRng> {
    /// Creates a source of `size`-byte payloads using the thread-local RNG.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self::with_rng(rand::rng(), size)
    }
}

impl<R: RngCore> RandomPayloads<R> {
    pub fn with_rng(rng: R, size: usize) -> Self {
        Self { rng, size }
    }
}

impl<R: RngCore> PayloadSource for RandomPayloads<R> {
    fn take(&mut self, count: usize) -> Option<Vec<Payload>> {
        let mut buf = vec![0; self.size.checked_mul(count)?];
        self.rng.fill_bytes(&mut buf);
        let buf = Bytes::from(buf);
        Some(
            (0..count)
                .map(|i| buf.slice(i * self.size..(i + 1) * self.size))
                .collect(),
        )
    }

    fn remaining(&self) -> Option<usize> {
        None
    }
}

/// Finite pool of pre-built payloads, e.g. signed transactions.
#[derive(Clone, Debug, Default)]
pub struct PayloadPool {
    payloads: VecDeque<Payload>,
}

impl PayloadPool {
    #[must_use]
    pub fn new(payloads: impl IntoIterator<Item = Payload>) -> Self {
        Self {
            payloads: payloads.into_iter().collect(),
        }
    }

    /// Parses one hex-encoded payload per non-empty line.
    ///
    /// # Errors
    ///
    /// Returns the decoding error of the first malformed line.
    pub fn from_hex_lines(text: &str) -> Result<Self, hex::FromHexError> {
        let payloads = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| hex::decode(line).map(Bytes::from))
            .collect::<Result<VecDeque<_>, _>>()?;
        Ok(Self { payloads })
    }

    /// Reads a file of hex-encoded payloads, see [`Self::from_hex_lines`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains malformed hex.
    pub fn from_hex_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_hex_lines(&text)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

impl PayloadSource for PayloadPool {
    fn take(&mut self, count: usize) -> Option<Vec<Payload>> {
        if self.payloads.len() < count {
            return None;
        }
        Some(self.payloads.drain(..count).collect())
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.payloads.len())
    }
}
