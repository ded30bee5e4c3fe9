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
use crate::clock::Clock;
use crate::error::{ensure_finite, MetricsError, Result};
use crate::snapshot::Snapshot;
use crossbeam_skiplist::SkipMap;
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use rand::Rng;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Priorities are rescaled at least once an hour.
const RESCALE_THRESHOLD_NANOS: u64 = 60 * 60 * 1_000_000_000;

/// Largest `alpha * age` a weight may reach before a rescale.
///
/// `exp(600)` is about `1e260`; the smallest draw (`2^-53`) multiplies it by
/// about `1e16`, which still fits below `f64::MAX` (`1.8e308`).
const MAX_WEIGHT_EXPONENT: f64 = 600.0;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Reservoir ordering key.
///
/// Entries sort by priority first. Among equal priorities the newest
/// insertion sorts lowest, so the oldest of a tie is the last to be evicted.
type PriorityKey = (OrderedFloat<f64>, Reverse<u64>);

/// Exponentially decaying random sample (forward decay).
///
/// Each observation gets the priority `exp(alpha * age) / u` where `age` is
/// its timestamp relative to a landmark and `u` is uniform on `(0, 1]`. The
/// reservoir keeps the `reservoir_size` highest priorities, so recent
/// observations are retained preferentially and percentiles describe
/// recent behaviour rather than all-time history.
///
/// Priorities grow exponentially with time since the landmark. Once an hour,
/// or sooner when `alpha` is large enough that an hour of growth would
/// overflow an `f64`, every stored priority is multiplied by
/// `exp(-alpha * elapsed)` and the landmark moves forward, which keeps them
/// finite without changing their relative order. A timestamp past the rescale
/// deadline moves the landmark up to it before its weight is computed.
///
/// # Thread Safety
///
/// The priority map is a lock-free skip list. Updates and snapshots run
/// concurrently under the shared side of an `RwLock`; only the periodic
/// rescale takes the exclusive side while it rewrites the map.
#[derive(Debug)]
pub struct ExponentiallyDecayingSample {
    values: RwLock<SkipMap<PriorityKey, f64>>,
    reservoir_size: usize,
    alpha: f64,
    count: AtomicU64,
    sequence: AtomicU64,
    start_time: AtomicU64,
    next_scale_time: AtomicU64,
    rescale_threshold: u64,
    clock: Arc<dyn Clock>,
}

impl ExponentiallyDecayingSample {
    /// Creates a sample of `reservoir_size` values decaying at rate `alpha`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tally_metrics::{ExponentiallyDecayingSample, Sample, SystemClock};
    ///
    /// let sample = ExponentiallyDecayingSample::new(1028, 0.015, SystemClock::shared()).unwrap();
    /// sample.update(12.0).unwrap();
    /// assert_eq!(sample.size(), 1);
    /// ```
    pub fn new(reservoir_size: usize, alpha: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if reservoir_size == 0 {
            return Err(MetricsError::InvalidReservoirSize(reservoir_size));
        }
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(MetricsError::InvalidAlpha(alpha));
        }

        let rescale_threshold = rescale_threshold(alpha);
        let now = clock.tick();
        Ok(Self {
            values: RwLock::new(SkipMap::new()),
            reservoir_size,
            alpha,
            count: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            start_time: AtomicU64::new(now),
            next_scale_time: AtomicU64::new(now.saturating_add(rescale_threshold)),
            rescale_threshold,
            clock,
        })
    }

    /// Offers a value observed at `timestamp` (clock ticks, nanoseconds).
    pub fn update_at(&self, value: f64, timestamp: u64) -> Result<()> {
        let value = ensure_finite(value)?;
        // gen::<f64>() is in [0, 1); flip it to (0, 1] so the draw never divides by zero.
        let draw = 1.0 - rand::thread_rng().gen::<f64>();
        self.update_with_draw(value, timestamp, draw);
        Ok(())
    }

    /// Total number of values offered since the last clear or rescale.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub(crate) fn update_with_draw(&self, value: f64, timestamp: u64, draw: f64) {
        self.rescale_if_needed(timestamp);

        let values = self.values.read();
        let priority = self.weight(timestamp) / draw;
        let key = (
            OrderedFloat(priority),
            Reverse(self.sequence.fetch_add(1, Ordering::Relaxed)),
        );

        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count <= self.reservoir_size as u64 {
            values.insert(key, value);
            return;
        }

        let replaces_smallest = values
            .front()
            .is_some_and(|smallest| smallest.key().0 < key.0);
        if replaces_smallest {
            values.insert(key, value);
            values.pop_front();
        }
    }

    fn weight(&self, timestamp: u64) -> f64 {
        let start = self.start_time.load(Ordering::Acquire);
        let age_secs = (timestamp as f64 - start as f64) / NANOS_PER_SEC;
        (self.alpha * age_secs).exp()
    }

    /// Rescales until `timestamp` falls before the next deadline.
    fn rescale_if_needed(&self, timestamp: u64) {
        let now = self.clock.tick().max(timestamp);
        loop {
            let next = self.next_scale_time.load(Ordering::Acquire);
            if now < next || self.rescale(now, next) {
                return;
            }
        }
    }

    /// Returns `false` when another thread rescaled first.
    fn rescale(&self, now: u64, next: u64) -> bool {
        let mut values = self.values.write();

        // Losing threads saw the same overdue deadline; only the winner rewrites.
        if self
            .next_scale_time
            .compare_exchange(
                next,
                now.saturating_add(self.rescale_threshold),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        let old_start = self.start_time.swap(now, Ordering::AcqRel);
        let scaling = (-self.alpha * (now.saturating_sub(old_start) as f64 / NANOS_PER_SEC)).exp();

        let rescaled = SkipMap::new();
        for entry in values.iter() {
            let (priority, sequence) = *entry.key();
            let priority = priority.0 * scaling;
            if priority > 0.0 {
                rescaled.insert((OrderedFloat(priority), sequence), *entry.value());
            }
        }

        let dropped = values.len() - rescaled.len();
        *values = rescaled;
        self.count.store(values.len() as u64, Ordering::Relaxed);

        debug!(
            scaling,
            retained = values.len(),
            dropped,
            "rescaled exponentially decaying sample"
        );
        true
    }
}

/// Longest landmark age, in nanoseconds, whose weight stays finite for `alpha`.
fn rescale_threshold(alpha: f64) -> u64 {
    let max_age_nanos = MAX_WEIGHT_EXPONENT / alpha * NANOS_PER_SEC;
    if max_age_nanos >= RESCALE_THRESHOLD_NANOS as f64 {
        RESCALE_THRESHOLD_NANOS
    } else {
        (max_age_nanos as u64).max(1)
    }
}

impl Sample for ExponentiallyDecayingSample {
    fn update(&self, value: f64) -> Result<()> {
        self.update_at(value, self.clock.tick())
    }

    fn clear(&self) {
        let values = self.values.write();
        values.clear();
        self.count.store(0, Ordering::Relaxed);

        let now = self.clock.tick();
        self.start_time.store(now, Ordering::Release);
        self.next_scale_time
            .store(now.saturating_add(self.rescale_threshold), Ordering::Release);
    }

    fn size(&self) -> usize {
        self.count().min(self.reservoir_size as u64) as usize
    }

    fn snapshot(&self) -> Snapshot {
        let values = self.values.read();
        Snapshot::new(values.iter().map(|entry| *entry.value()).collect())
    }
}
