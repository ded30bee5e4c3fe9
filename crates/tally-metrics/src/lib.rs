//! Tally Metrics
//!
//! This crate provides thread-safe, low-overhead instrumentation for
//! concurrent services. Many request threads record counts, durations and
//! rates into named metrics while a reporter periodically takes a
//! statistically valid snapshot of each one, without stopping the producers.
//!
//! # Architecture
//!
//! The engine is built from a handful of composable pieces:
//!
//! - [`UniformSample`] / [`ExponentiallyDecayingSample`]: bounded reservoirs
//!   (Vitter's Algorithm R and forward decay) behind the [`Sample`] trait
//! - [`Histogram`]: exact count/min/max/mean/variance plus sampled percentiles
//! - [`Ewma`] and [`Meter`]: 1, 5 and 15 minute moving-average rates
//! - [`Timer`]: a meter and a histogram of durations in one
//! - [`MetricsRegistry`]: concurrent name to metric map with listeners and
//!   failure-isolated reporting
//! - [`Reporter`] / [`ScheduledReporter`]: periodic delivery of a
//!   serializable [`MetricsReport`]
//!
//! # Usage Example
//!
//! ```rust
//! use tally_metrics::{MetricName, MetricsRegistry};
//! use std::time::Duration;
//!
//! let registry = MetricsRegistry::new();
//! let name = MetricName::new("latency", "rpc", "server");
//!
//! let timer = registry.timer(name.clone()).unwrap();
//! timer.time(|| {
//!     // ... handle a request ...
//! });
//! timer.update(Duration::from_millis(12));
//!
//! let report = registry.collect();
//! println!("{:?}", report.get(&name));
//! ```
//!
//! # Thread Safety
//!
//! Every metric is `Send + Sync` and is shared through `Arc`. Hot paths are
//! atomic adds and compare-and-swap loops; locks are held only for the
//! variance pair, the decaying sample's periodic rescale and registry
//! membership changes.
//!
//! # Time
//!
//! All time-dependent metrics read an injected [`Clock`]. Production code
//! uses [`SystemClock`]; tests drive [`ManualClock`] or [`StepClock`] so that
//! rates, decay and durations are deterministic.

mod atomic;
mod clock;
mod config;
mod counter;
mod error;
mod ewma;
mod gauge;
mod histogram;
mod meter;
mod metric;
mod registry;
mod reporter;
mod sample;
mod snapshot;
mod timer;
mod value;


pub use clock::{Clock, ManualClock, StepClock, SystemClock};
pub use config::{
    DurationUnit, MetricsConfig, RateUnit, DEFAULT_ALPHA, DEFAULT_RESERVOIR_SIZE,
    DEFAULT_TICK_INTERVAL,
};
pub use counter::Counter;
pub use error::{MetricsError, Result};
pub use ewma::Ewma;
pub use gauge::Gauge;
pub use histogram::Histogram;
pub use meter::{Meter, Rates};
pub use metric::{Metric, MetricName};
pub use registry::{MetricsListener, MetricsRegistry};
pub use reporter::{LogReporter, Reporter, ScheduledReporter};
pub use sample::{ExponentiallyDecayingSample, Sample, UniformSample};
pub use snapshot::Snapshot;
pub use timer::{Timer, TimerContext};
pub use value::{
    CounterValue, Distribution, GaugeValue, MeterValue, MetricEntry, MetricValue, MetricsReport,
    TimerValue,
};
