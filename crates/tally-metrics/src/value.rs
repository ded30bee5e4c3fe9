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

//! Serializable point-in-time values of registered metrics.

use crate::config::{DurationUnit, RateUnit};
use crate::histogram::Histogram;
use crate::meter::Rates;
use crate::metric::MetricName;
use serde::Serialize;

/// Value of a counter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterValue {
    pub count: i64,
}

/// Value of a gauge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaugeValue {
    pub value: f64,
}

/// Summary of a histogram: exact running statistics plus sampled percentiles
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub p75: f64,
    pub p95: f64,
    pub p98: f64,
    pub p99: f64,
    pub p999: f64,
}

impl Distribution {
    pub fn from_histogram(histogram: &Histogram) -> Self {
        let snapshot = histogram.snapshot();
        Self {
            count: histogram.count(),
            min: histogram.min(),
            max: histogram.max(),
            mean: histogram.mean(),
            std_dev: histogram.std_dev(),
            median: snapshot.median(),
            p75: snapshot.p75(),
            p95: snapshot.p95(),
            p98: snapshot.p98(),
            p99: snapshot.p99(),
            p999: snapshot.p999(),
        }
    }
}

/// Value of a meter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterValue {
    pub count: u64,
    pub rates: Rates,
    pub rate_unit: RateUnit,
}

/// Value of a timer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerValue {
    #[serde(flatten)]
    pub distribution: Distribution,
    pub duration_unit: DurationUnit,
    pub rates: Rates,
    pub rate_unit: RateUnit,
}

/// Value of any metric, tagged with its kind when serialized
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MetricValue {
    Counter(CounterValue),
    Gauge(GaugeValue),
    Histogram(Distribution),
    Meter(MeterValue),
    Timer(TimerValue),
}

/// One registry entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEntry {
    pub name: MetricName,
    pub value: MetricValue,
}

/// Every registered metric at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub timestamp_ms: u64,
    pub uptime_ms: u64,
    pub metrics: Vec<MetricEntry>,
}

impl MetricsReport {
    pub fn new(timestamp_ms: u64, uptime_ms: u64) -> Self {
        Self {
            timestamp_ms,
            uptime_ms,
            metrics: Vec::new(),
        }
    }

    /// Looks up an entry by name.
    pub fn get(&self, name: &MetricName) -> Option<&MetricValue> {
        self.metrics
            .iter()
            .find(|entry| &entry.name == name)
            .map(|entry| &entry.value)
    }
}
