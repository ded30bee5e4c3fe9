use crate::config::RateUnit;
use crate::counter::Counter;
use crate::gauge::Gauge;
use crate::histogram::Histogram;
use crate::meter::Meter;
use crate::timer::Timer;
use crate::value::{CounterValue, Distribution, GaugeValue, MeterValue, MetricValue, TimerValue};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Registry key: a metric's name, type and scope.
///
/// Equality, ordering and hashing are structural over all three fields, so
/// two names built from the same strings are interchangeable.
///
/// # Example
///
/// ```rust
/// use tally_metrics::MetricName;
///
/// let name = MetricName::new("requests", "http", "api");
/// assert_eq!(name.to_string(), "api.http.requests");
/// assert_eq!(name, MetricName::new("requests", "http", "api"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MetricName {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    scope: String,
}

impl MetricName {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            scope: scope.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The metric's type label (`type` is reserved in Rust).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl fmt::Display for MetricName {
    /// Dotted `scope.type.name`, skipping empty parts.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in [&self.scope, &self.kind, &self.name] {
            if part.is_empty() {
                continue;
            }
            if !first {
                f.write_str(".")?;
            }
            f.write_str(part)?;
            first = false;
        }
        Ok(())
    }
}

/// Any metric the registry can hold. Cloning shares the underlying metric.
#[derive(Debug, Clone)]
pub enum Metric {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Histogram(Arc<Histogram>),
    Meter(Arc<Meter>),
    Timer(Arc<Timer>),
}

impl Metric {
    /// Lowercase name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Metric::Counter(_) => "counter",
            Metric::Gauge(_) => "gauge",
            Metric::Histogram(_) => "histogram",
            Metric::Meter(_) => "meter",
            Metric::Timer(_) => "timer",
        }
    }

    /// True when both handles point at the same metric instance.
    pub fn same_instance(&self, other: &Metric) -> bool {
        match (self, other) {
            (Metric::Counter(a), Metric::Counter(b)) => Arc::ptr_eq(a, b),
            (Metric::Gauge(a), Metric::Gauge(b)) => Arc::ptr_eq(a, b),
            (Metric::Histogram(a), Metric::Histogram(b)) => Arc::ptr_eq(a, b),
            (Metric::Meter(a), Metric::Meter(b)) => Arc::ptr_eq(a, b),
            (Metric::Timer(a), Metric::Timer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Reads the metric's current values, with rates scaled to `rate_unit`.
    pub fn value(&self, rate_unit: RateUnit) -> MetricValue {
        match self {
            Metric::Counter(counter) => MetricValue::Counter(CounterValue {
                count: counter.count(),
            }),
            Metric::Gauge(gauge) => MetricValue::Gauge(GaugeValue {
                value: gauge.value(),
            }),
            Metric::Histogram(histogram) => {
                MetricValue::Histogram(Distribution::from_histogram(histogram))
            }
            Metric::Meter(meter) => MetricValue::Meter(MeterValue {
                count: meter.count(),
                rates: meter.rates(rate_unit),
                rate_unit,
            }),
            Metric::Timer(timer) => MetricValue::Timer(TimerValue {
                distribution: Distribution::from_histogram(timer.histogram()),
                duration_unit: timer.duration_unit(),
                rates: timer.rates(rate_unit),
                rate_unit,
            }),
        }
    }
}

impl From<Counter> for Metric {
    fn from(counter: Counter) -> Self {
        Metric::Counter(Arc::new(counter))
    }
}

impl From<Gauge> for Metric {
    fn from(gauge: Gauge) -> Self {
        Metric::Gauge(Arc::new(gauge))
    }
}

impl From<Histogram> for Metric {
    fn from(histogram: Histogram) -> Self {
        Metric::Histogram(Arc::new(histogram))
    }
}

impl From<Meter> for Metric {
    fn from(meter: Meter) -> Self {
        Metric::Meter(Arc::new(meter))
    }
}

impl From<Timer> for Metric {
    fn from(timer: Timer) -> Self {
        Metric::Timer(Arc::new(timer))
    }
}
