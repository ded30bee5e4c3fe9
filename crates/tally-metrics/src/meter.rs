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
use crate::config::{RateUnit, DEFAULT_TICK_INTERVAL};
use crate::error::{MetricsError, Result};
use crate::ewma::Ewma;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Rates reported by a [`Meter`].
///
/// The moving averages are `None` until the meter has ticked at least once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rates {
    pub one_minute: Option<f64>,
    pub five_minute: Option<f64>,
    pub fifteen_minute: Option<f64>,
    pub mean: f64,
}

/// Event counter with 1, 5 and 15 minute moving-average rates.
///
/// # Ticking
///
/// The averages advance once per tick interval (5 seconds by default).
/// There is no background thread: every mark and every rate read checks
/// whether whole intervals have elapsed since the last tick. The thread that
/// wins the compare-and-swap on `last_tick` applies all overdue ticks, one
/// per elapsed interval; everyone else carries on. Each interval is
/// therefore applied exactly once however many threads notice it.
///
/// # Example
///
/// ```rust
/// use tally_metrics::{Meter, SystemClock};
///
/// let meter = Meter::new(SystemClock::shared());
/// meter.mark(3);
/// assert_eq!(meter.count(), 3);
/// ```
#[derive(Debug)]
pub struct Meter {
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
    count: AtomicU64,
    start_time: u64,
    last_tick: AtomicU64,
    tick_interval: u64,
    clock: Arc<dyn Clock>,
}

impl Meter {
    /// Creates a meter ticking every 5 seconds.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::build(clock, DEFAULT_TICK_INTERVAL)
    }

    /// Creates a meter with a custom tick interval.
    pub fn with_tick_interval(clock: Arc<dyn Clock>, tick_interval: Duration) -> Result<Self> {
        if tick_interval.is_zero() || tick_interval.as_nanos() > u64::MAX as u128 {
            return Err(MetricsError::InvalidTickInterval(tick_interval));
        }
        Ok(Self::build(clock, tick_interval))
    }

    fn build(clock: Arc<dyn Clock>, tick_interval: Duration) -> Self {
        let now = clock.tick();
        Self {
            m1: Ewma::for_window(1, tick_interval),
            m5: Ewma::for_window(5, tick_interval),
            m15: Ewma::for_window(15, tick_interval),
            count: AtomicU64::new(0),
            start_time: now,
            last_tick: AtomicU64::new(now),
            tick_interval: tick_interval.as_nanos() as u64,
            clock,
        }
    }

    /// Records `n` events.
    pub fn mark(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
        self.m1.update(n);
        self.m5.update(n);
        self.m15.update(n);
        self.tick_if_necessary();
    }

    fn tick_if_necessary(&self) {
        let old_tick = self.last_tick.load(Ordering::Acquire);
        let new_tick = self.clock.tick();
        let age = new_tick.saturating_sub(old_tick);
        if age < self.tick_interval {
            return;
        }

        let new_interval_start = new_tick - age % self.tick_interval;
        if self
            .last_tick
            .compare_exchange(old_tick, new_interval_start, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let required_ticks = age / self.tick_interval;
            for _ in 0..required_ticks {
                self.m1.tick();
                self.m5.tick();
                self.m15.tick();
            }
        }
    }

    /// Total events marked.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// One-minute moving average in events per second.
    pub fn one_minute_rate(&self) -> Option<f64> {
        self.tick_if_necessary();
        self.m1.rate(RateUnit::PerSecond)
    }

    /// Five-minute moving average in events per second.
    pub fn five_minute_rate(&self) -> Option<f64> {
        self.tick_if_necessary();
        self.m5.rate(RateUnit::PerSecond)
    }

    /// Fifteen-minute moving average in events per second.
    pub fn fifteen_minute_rate(&self) -> Option<f64> {
        self.tick_if_necessary();
        self.m15.rate(RateUnit::PerSecond)
    }

    /// Events per second since the meter was created; `0.0` before any event.
    pub fn mean_rate(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }

        let elapsed = self.clock.tick().saturating_sub(self.start_time);
        if elapsed == 0 {
            return 0.0;
        }
        count as f64 / (elapsed as f64 / 1_000_000_000.0)
    }

    /// All rates, scaled to `unit`.
    pub fn rates(&self, unit: RateUnit) -> Rates {
        self.tick_if_necessary();
        Rates {
            one_minute: self.m1.rate(unit),
            five_minute: self.m5.rate(unit),
            fifteen_minute: self.m15.rate(unit),
            mean: unit.scale(self.mean_rate()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::thread;

    fn meter() -> (Arc<ManualClock>, Meter) {
        let clock = Arc::new(ManualClock::new());
        let meter = Meter::new(clock.clone());
        (clock, meter)
    }

    #[test]
    fn test_starts_out_with_no_rates_or_count() {
        let (_clock, meter) = meter();

        assert_eq!(meter.count(), 0);
        assert_eq!(meter.mean_rate(), 0.0);
        assert_eq!(meter.one_minute_rate(), None);
        assert_eq!(meter.five_minute_rate(), None);
        assert_eq!(meter.fifteen_minute_rate(), None);
    }

    #[test]
    fn test_marks_events_and_updates_rates() {
        let (clock, meter) = meter();

        meter.mark(1);
        clock.advance(Duration::from_secs(10));
        meter.mark(2);

        assert_eq!(meter.count(), 3);
        assert!((meter.mean_rate() - 0.3).abs() < 1e-12);

        // Both marks land in the first interval, the second interval is empty.
        let reference = Ewma::one_minute(DEFAULT_TICK_INTERVAL).unwrap();
        reference.update(3);
        reference.tick();
        reference.tick();
        assert_eq!(
            meter.one_minute_rate(),
            reference.rate(RateUnit::PerSecond)
        );
    }

    #[test]
    fn test_no_tick_before_a_full_interval() {
        let (clock, meter) = meter();

        meter.mark(5);
        clock.advance(Duration::from_millis(4_999));
        assert_eq!(meter.one_minute_rate(), None);

        clock.advance(Duration::from_millis(1));
        assert_eq!(meter.one_minute_rate(), Some(1.0));
    }

    #[test]
    fn test_catches_up_after_idle_period() {
        let (clock, meter) = meter();

        meter.mark(5);
        clock.advance(Duration::from_secs(60));

        let reference = Ewma::five_minute(DEFAULT_TICK_INTERVAL).unwrap();
        reference.update(5);
        for _ in 0..12 {
            reference.tick();
        }
        assert_eq!(
            meter.five_minute_rate(),
            reference.rate(RateUnit::PerSecond)
        );
    }

    #[test]
    fn test_overdue_tick_is_applied_once_under_contention() {
        let (clock, meter) = meter();
        let meter = Arc::new(meter);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let meter = meter.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        meter.mark(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(meter.count(), 8000);

        clock.advance(Duration::from_secs(5));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let meter = meter.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        meter.rates(RateUnit::PerSecond);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // One tick over 8000 events in 5 seconds; a second tick would decay it.
        assert_eq!(meter.one_minute_rate(), Some(1600.0));
        assert_eq!(meter.fifteen_minute_rate(), Some(1600.0));
    }

    #[test]
    fn test_rates_in_other_units() {
        let (clock, meter) = meter();
        meter.mark(10);
        clock.advance(Duration::from_secs(5));

        let rates = meter.rates(RateUnit::PerMinute);
        assert_eq!(rates.one_minute, Some(120.0));
        assert_eq!(rates.five_minute, Some(120.0));
        assert_eq!(rates.fifteen_minute, Some(120.0));
        assert!((rates.mean - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_custom_tick_interval() {
        let clock = Arc::new(ManualClock::new());
        assert!(matches!(
            Meter::with_tick_interval(clock.clone(), Duration::ZERO),
            Err(MetricsError::InvalidTickInterval(_))
        ));

        let meter = Meter::with_tick_interval(clock.clone(), Duration::from_secs(1)).unwrap();
        meter.mark(4);
        clock.advance(Duration::from_secs(1));
        assert_eq!(meter.one_minute_rate(), Some(4.0));
    }
}
