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
use crate::config::RateUnit;
use crate::error::{MetricsError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Exponentially weighted moving average of an event rate.
///
/// Mirrors UNIX load averages: events are accumulated between ticks and
/// every tick blends the rate observed over the last interval into the
/// running average with the weight `alpha = 1 - exp(-interval / window)`.
///
/// [`Ewma::update`] is a single atomic add. [`Ewma::tick`] must be driven by
/// exactly one thread per interval; [`Meter`](crate::Meter) guarantees that.
#[derive(Debug)]
pub struct Ewma {
    alpha: f64,
    interval_secs: f64,
    uncounted: AtomicU64,
    rate: AtomicF64,
    initialized: AtomicBool,
}

impl Ewma {
    /// Creates an average over a `window_minutes` window, ticked every `tick_interval`.
    pub fn new(window_minutes: u64, tick_interval: Duration) -> Result<Self> {
        if window_minutes == 0 {
            return Err(MetricsError::InvalidWindow(window_minutes));
        }
        if tick_interval.is_zero() {
            return Err(MetricsError::InvalidTickInterval(tick_interval));
        }

        Ok(Self::for_window(window_minutes, tick_interval))
    }

    /// Builds an average from parameters the caller has already validated.
    pub(crate) fn for_window(window_minutes: u64, tick_interval: Duration) -> Self {
        let interval_secs = tick_interval.as_secs_f64();
        let alpha = 1.0 - (-interval_secs / (60.0 * window_minutes as f64)).exp();
        Self {
            alpha,
            interval_secs,
            uncounted: AtomicU64::new(0),
            rate: AtomicF64::new(0.0),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn one_minute(tick_interval: Duration) -> Result<Self> {
        Self::new(1, tick_interval)
    }

    pub fn five_minute(tick_interval: Duration) -> Result<Self> {
        Self::new(5, tick_interval)
    }

    pub fn fifteen_minute(tick_interval: Duration) -> Result<Self> {
        Self::new(15, tick_interval)
    }

    /// Counts `n` events toward the current interval.
    pub fn update(&self, n: u64) {
        self.uncounted.fetch_add(n, Ordering::Relaxed);
    }

    /// Folds the events of the elapsed interval into the average.
    pub fn tick(&self) {
        let count = self.uncounted.swap(0, Ordering::Relaxed);
        let instant_rate = count as f64 / self.interval_secs;

        if self.initialized.load(Ordering::Acquire) {
            let rate = self.rate.load();
            self.rate.store(rate + self.alpha * (instant_rate - rate));
        } else {
            self.rate.store(instant_rate);
            self.initialized.store(true, Ordering::Release);
        }
    }

    /// Current rate in `unit`, or `None` before the first tick.
    pub fn rate(&self, unit: RateUnit) -> Option<f64> {
        if self.initialized.load(Ordering::Acquire) {
            Some(unit.scale(self.rate.load()))
        } else {
            None
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}
