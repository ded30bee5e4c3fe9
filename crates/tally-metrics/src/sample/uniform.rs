// Copyright 2025 Tally Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::Sample;
use crate::error::{ensure_finite, MetricsError, Result};
use crate::snapshot::Snapshot;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Uniform random sample using Vitter's Algorithm R.
///
/// The first `capacity` values fill the reservoir in order. After that, the
/// n-th value replaces a random slot with probability `capacity / n`, so at
/// any point every value seen so far is equally likely to be present.
///
/// # Thread Safety
///
/// Slots are individual `AtomicU64`s holding `f64` bit patterns and the
/// observation counter is claimed with `fetch_add`, so updates never block.
/// A snapshot racing with updates may see some of them and not others.
#[derive(Debug)]
pub struct UniformSample {
    values: Vec<AtomicU64>,
    count: AtomicU64,
}

impl UniformSample {
    /// Creates a sample holding at most `reservoir_size` values.
    pub fn new(reservoir_size: usize) -> Result<Self> {
        if reservoir_size == 0 {
            return Err(MetricsError::InvalidReservoirSize(reservoir_size));
        }

        Ok(Self {
            values: (0..reservoir_size).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
        })
    }

    /// Total number of values offered since creation or the last clear.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn capacity(&self) -> u64 {
        self.values.len() as u64
    }
}

impl Sample for UniformSample {
    fn update(&self, value: f64) -> Result<()> {
        let value = ensure_finite(value)?;
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;

        if count <= self.capacity() {
            self.values[(count - 1) as usize].store(value.to_bits(), Ordering::Relaxed);
        } else {
            let slot = rand::thread_rng().gen_range(0..count);
            if slot < self.capacity() {
                self.values[slot as usize].store(value.to_bits(), Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn clear(&self) {
        for value in &self.values {
            value.store(0, Ordering::Relaxed);
        }
        self.count.store(0, Ordering::Relaxed);
    }

    fn size(&self) -> usize {
        self.count().min(self.capacity()) as usize
    }

    fn snapshot(&self) -> Snapshot {
        let values = self.values[..self.size()]
            .iter()
            .map(|bits| f64::from_bits(bits.load(Ordering::Relaxed)))
            .collect();
        Snapshot::new(values)
    }
}
