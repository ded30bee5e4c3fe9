use crate::error::{MetricsError, Result};
use serde::Serialize;
use std::time::Duration;

/// Default reservoir capacity. Offers a 99.9% confidence level with a 5%
/// margin of error assuming a normal distribution.
pub const DEFAULT_RESERVOIR_SIZE: usize = 1028;

/// Default decay factor. Heavily biases the reservoir to the last 5 minutes.
pub const DEFAULT_ALPHA: f64 = 0.015;

/// Default meter tick interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Unit histogram values of a timer are recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl DurationUnit {
    /// Converts a nanosecond count into this unit.
    pub fn convert_nanos(self, nanos: u64) -> f64 {
        let nanos = nanos as f64;
        match self {
            DurationUnit::Nanoseconds => nanos,
            DurationUnit::Microseconds => nanos / 1_000.0,
            DurationUnit::Milliseconds => nanos / 1_000_000.0,
            DurationUnit::Seconds => nanos / 1_000_000_000.0,
        }
    }

    pub fn convert(self, duration: Duration) -> f64 {
        self.convert_nanos(duration.as_nanos() as u64)
    }
}

/// Unit rates are reported in. Meters compute rates per second internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateUnit {
    PerSecond,
    PerMinute,
    PerHour,
}

impl RateUnit {
    /// Scales a per-second rate into this unit.
    pub fn scale(self, per_second: f64) -> f64 {
        match self {
            RateUnit::PerSecond => per_second,
            RateUnit::PerMinute => per_second * 60.0,
            RateUnit::PerHour => per_second * 3600.0,
        }
    }
}

/// Configuration for metrics built by a [`MetricsRegistry`](crate::MetricsRegistry).
///
/// # Example
///
/// ```rust
/// use tally_metrics::{MetricsConfig, MetricsRegistry, DurationUnit};
///
/// let config = MetricsConfig {
///     reservoir_size: 512,
///     duration_unit: DurationUnit::Microseconds,
///     ..MetricsConfig::default()
/// };
/// let registry = MetricsRegistry::with_config(config).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Capacity of each histogram's reservoir.
    pub reservoir_size: usize,
    /// Forward-decay factor of histogram reservoirs.
    pub alpha: f64,
    /// How often meters advance their moving averages.
    pub tick_interval: Duration,
    /// Unit timer durations are recorded in.
    pub duration_unit: DurationUnit,
    /// Unit rates are reported in.
    pub rate_unit: RateUnit,
}

impl MetricsConfig {
    /// Checks every field, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        if self.reservoir_size == 0 {
            return Err(MetricsError::InvalidReservoirSize(self.reservoir_size));
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(MetricsError::InvalidAlpha(self.alpha));
        }
        if self.tick_interval.is_zero() {
            return Err(MetricsError::InvalidTickInterval(self.tick_interval));
        }
        Ok(())
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            reservoir_size: DEFAULT_RESERVOIR_SIZE,
            alpha: DEFAULT_ALPHA,
            tick_interval: DEFAULT_TICK_INTERVAL,
            duration_unit: DurationUnit::Milliseconds,
            rate_unit: RateUnit::PerSecond,
        }
    }
}
