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

use crate::clock::Clock;
use crate::config::{DurationUnit, MetricsConfig, RateUnit};
use crate::error::Result;
use crate::histogram::Histogram;
use crate::meter::{Meter, Rates};
use crate::snapshot::Snapshot;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// How often an operation runs ([`Meter`]) and how long it takes ([`Histogram`]).
///
/// Durations are recorded in the timer's [`DurationUnit`]. A duration is
/// recorded however the timed operation ends: returning an error, returning
/// normally, or unwinding. A slow failure still counts as load.
///
/// # Example
///
/// ```rust
/// use tally_metrics::{MetricsConfig, SystemClock, Timer};
///
/// let timer = Timer::new(SystemClock::shared(), &MetricsConfig::default()).unwrap();
///
/// let answer = timer.time(|| 6 * 7);
/// assert_eq!(answer, 42);
///
/// let context = timer.start();
/// // ... work that can't be wrapped in a closure ...
/// context.stop();
///
/// assert_eq!(timer.count(), 2);
/// ```
#[derive(Debug)]
pub struct Timer {
    meter: Meter,
    histogram: Histogram,
    clock: Arc<dyn Clock>,
    duration_unit: DurationUnit,
}

impl Timer {
    /// Creates a timer with a forward-decaying histogram and meter built from `config`.
    pub fn new(clock: Arc<dyn Clock>, config: &MetricsConfig) -> Result<Self> {
        let histogram =
            Histogram::exponentially_decaying(config.reservoir_size, config.alpha, clock.clone())?;
        let meter = Meter::with_tick_interval(clock.clone(), config.tick_interval)?;
        Ok(Self::from_parts(meter, histogram, clock, config.duration_unit))
    }

    pub fn from_parts(
        meter: Meter,
        histogram: Histogram,
        clock: Arc<dyn Clock>,
        duration_unit: DurationUnit,
    ) -> Self {
        Self {
            meter,
            histogram,
            clock,
            duration_unit,
        }
    }

    /// Runs `operation`, records how long it took and returns its result.
    pub fn time<T, F>(&self, operation: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _context = self.start();
        operation()
    }

    /// Starts timing; the duration is recorded when the context is stopped or dropped.
    pub fn start(&self) -> TimerContext<'_> {
        TimerContext {
            timer: self,
            start: self.clock.tick(),
            stopped: false,
        }
    }

    /// Records a duration measured elsewhere.
    pub fn update(&self, duration: Duration) {
        self.record(duration.as_nanos().min(u64::MAX as u128) as u64);
    }

    fn record(&self, elapsed_nanos: u64) {
        let value = self.duration_unit.convert_nanos(elapsed_nanos);
        if let Err(err) = self.histogram.update(value) {
            warn!(%err, elapsed_nanos, "dropping timer sample");
        }
        self.meter.mark(1);
    }

    /// Number of timed operations.
    pub fn count(&self) -> u64 {
        self.histogram.count()
    }

    /// Distribution of recorded durations, in [`Timer::duration_unit`].
    pub fn snapshot(&self) -> Snapshot {
        self.histogram.snapshot()
    }

    /// Call rates, scaled to `unit`.
    pub fn rates(&self, unit: RateUnit) -> Rates {
        self.meter.rates(unit)
    }

    pub fn min(&self) -> f64 {
        self.histogram.min()
    }

    pub fn max(&self) -> f64 {
        self.histogram.max()
    }

    pub fn mean(&self) -> f64 {
        self.histogram.mean()
    }

    pub fn std_dev(&self) -> f64 {
        self.histogram.std_dev()
    }

    pub fn duration_unit(&self) -> DurationUnit {
        self.duration_unit
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }
}

/// An in-flight timing started by [`Timer::start`].
///
/// Dropping the context without calling [`TimerContext::stop`] records the
/// elapsed time as well, which covers early returns and panics.
#[derive(Debug)]
#[must_use = "the duration is recorded when the context is stopped or dropped"]
pub struct TimerContext<'a> {
    timer: &'a Timer,
    start: u64,
    stopped: bool,
}

impl TimerContext<'_> {
    /// Records and returns the elapsed time.
    pub fn stop(mut self) -> Duration {
        self.finish()
    }

    fn finish(&mut self) -> Duration {
        self.stopped = true;
        let elapsed = self.timer.clock.tick().saturating_sub(self.start);
        self.timer.record(elapsed);
        Duration::from_nanos(elapsed)
    }
}

impl Drop for TimerContext<'_> {
    fn drop(&mut self) {
        if !self.stopped {
            self.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, StepClock};
    use std::panic::{self, AssertUnwindSafe};

    fn step_timer() -> Timer {
        let clock = Arc::new(StepClock::new(Duration::from_millis(50)));
        Timer::new(clock, &MetricsConfig::default()).unwrap()
    }

    #[test]
    fn test_starts_out_empty() {
        let timer = Timer::new(Arc::new(ManualClock::new()), &MetricsConfig::default()).unwrap();

        assert_eq!(timer.count(), 0);
        assert_eq!(timer.min(), 0.0);
        assert_eq!(timer.max(), 0.0);
        assert_eq!(timer.mean(), 0.0);
        assert_eq!(timer.std_dev(), 0.0);
        assert_eq!(timer.snapshot().size(), 0);
        assert_eq!(timer.rates(RateUnit::PerSecond).one_minute, None);
    }

    #[test]
    fn test_times_closures_with_a_stepping_clock() {
        let timer = step_timer();

        let result = timer.time(|| "done");
        assert_eq!(result, "done");
        assert_eq!(timer.count(), 1);
        assert_eq!(timer.meter().count(), 1);
        assert_eq!(timer.snapshot().values(), &[50.0]);

        for _ in 0..4 {
            timer.time(|| ());
        }

        assert_eq!(timer.count(), 5);
        assert_eq!(timer.meter().count(), 5);
        assert_eq!(timer.min(), 50.0);
        assert_eq!(timer.max(), 50.0);
        assert_eq!(timer.mean(), 50.0);
    }

    #[test]
    fn test_scoped_context() {
        let timer = step_timer();

        let context = timer.start();
        let elapsed = context.stop();

        assert_eq!(elapsed, Duration::from_millis(50));
        assert_eq!(timer.count(), 1);
        assert_eq!(timer.max(), 50.0);
    }

    #[test]
    fn test_dropped_context_still_records() {
        let timer = step_timer();
        {
            let _context = timer.start();
        }
        assert_eq!(timer.count(), 1);
    }

    #[test]
    fn test_failed_operations_are_recorded() {
        let timer = step_timer();

        let result: std::result::Result<(), &str> = timer.time(|| Err("boom"));
        assert!(result.is_err());
        assert_eq!(timer.count(), 1);

        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            timer.time(|| panic!("operation blew up"));
        }));
        assert!(unwound.is_err());
        assert_eq!(timer.count(), 2);
        assert_eq!(timer.max(), 50.0);
    }

    #[test]
    fn test_manual_updates_respect_the_duration_unit() {
        let config = MetricsConfig {
            duration_unit: DurationUnit::Microseconds,
            ..MetricsConfig::default()
        };
        let timer = Timer::new(Arc::new(ManualClock::new()), &config).unwrap();

        timer.update(Duration::from_millis(2));
        timer.update(Duration::from_micros(500));

        assert_eq!(timer.duration_unit(), DurationUnit::Microseconds);
        assert_eq!(timer.count(), 2);
        assert_eq!(timer.min(), 500.0);
        assert_eq!(timer.max(), 2000.0);
        assert_eq!(timer.histogram().sum(), 2500.0);
    }
}
