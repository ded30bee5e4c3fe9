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

use crate::atomic::AtomicF64;
use crate::clock::Clock;
use crate::error::{ensure_finite, Result};
use crate::sample::{ExponentiallyDecayingSample, Sample, UniformSample};
use crate::snapshot::Snapshot;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running mean and sum of squared deviations (Welford).
///
/// The pair carries its own count so that `n` always matches the values
/// folded into `mean` and `m2`, whatever the histogram's counter says.
#[derive(Debug, Default, Clone, Copy)]
struct Variance {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Variance {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn variance(&self) -> f64 {
        if self.count <= 1 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }
}

/// Distribution of a stream of values.
///
/// Count, min, max, sum, mean and variance are exact over every value ever
/// recorded. Percentiles come from the backing [`Sample`] through
/// [`Histogram::snapshot`].
///
/// # Thread Safety
///
/// - `count` and `sum` are atomic adds
/// - `min` and `max` are compare-and-swap retry loops
/// - the mean/variance pair is updated as a unit under a narrow `Mutex`,
///   so a reader never observes a mean from one update with a sum of squares
///   from another
///
/// A histogram with no values reports `0.0` for every statistic.
///
/// # Example
///
/// ```rust
/// use tally_metrics::Histogram;
///
/// let histogram = Histogram::uniform(1028).unwrap();
/// for value in [1.0, 2.0, 3.0] {
///     histogram.update(value).unwrap();
/// }
/// assert_eq!(histogram.count(), 3);
/// assert_eq!(histogram.mean(), 2.0);
/// ```
#[derive(Debug)]
pub struct Histogram {
    sample: Box<dyn Sample>,
    count: AtomicU64,
    min: AtomicF64,
    max: AtomicF64,
    sum: AtomicF64,
    variance: Mutex<Variance>,
}

impl Histogram {
    /// Creates a histogram over an arbitrary sample.
    pub fn with_sample(sample: Box<dyn Sample>) -> Self {
        Self {
            sample,
            count: AtomicU64::new(0),
            min: AtomicF64::new(f64::INFINITY),
            max: AtomicF64::new(f64::NEG_INFINITY),
            sum: AtomicF64::new(0.0),
            variance: Mutex::new(Variance::default()),
        }
    }

    /// Histogram over a [`UniformSample`]: percentiles describe all-time history.
    pub fn uniform(reservoir_size: usize) -> Result<Self> {
        Ok(Self::with_sample(Box::new(UniformSample::new(
            reservoir_size,
        )?)))
    }

    /// Histogram over an [`ExponentiallyDecayingSample`]: percentiles describe
    /// recent history.
    pub fn exponentially_decaying(
        reservoir_size: usize,
        alpha: f64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self::with_sample(Box::new(ExponentiallyDecayingSample::new(
            reservoir_size,
            alpha,
            clock,
        )?)))
    }

    /// Records a value. NaN and infinities are rejected without touching any state.
    pub fn update(&self, value: f64) -> Result<()> {
        let value = ensure_finite(value)?;
        self.sample.update(value)?;
        self.record(value);
        Ok(())
    }

    /// Folds an already validated value into the running statistics.
    fn record(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.min.fetch_min(value);
        self.max.fetch_max(value);
        self.sum.fetch_add(value);
        self.variance.lock().push(value);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn min(&self) -> f64 {
        // A writer may have bumped the count without lowering min yet.
        let min = self.min.load();
        if min.is_finite() {
            min
        } else {
            0.0
        }
    }

    pub fn max(&self) -> f64 {
        let max = self.max.load();
        if max.is_finite() {
            max
        } else {
            0.0
        }
    }

    pub fn sum(&self) -> f64 {
        self.sum.load()
    }

    pub fn mean(&self) -> f64 {
        self.variance.lock().mean
    }

    /// Sample variance (`n - 1` denominator); `0.0` with fewer than two values.
    pub fn variance(&self) -> f64 {
        self.variance.lock().variance()
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Sorted copy of the backing sample for percentile queries.
    pub fn snapshot(&self) -> Snapshot {
        self.sample.snapshot()
    }

    /// Resets the sample and every statistic.
    pub fn clear(&self) {
        self.sample.clear();
        self.count.store(0, Ordering::Relaxed);
        self.min.store(f64::INFINITY);
        self.max.store(f64::NEG_INFINITY);
        self.sum.store(0.0);
        *self.variance.lock() = Variance::default();
    }
}
