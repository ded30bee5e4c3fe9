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

//! Reporters that ship registry contents to a sink.

use crate::error::{MetricsError, Result};
use crate::registry::MetricsRegistry;
use crate::value::{MetricValue, MetricsReport};
use crossbeam_channel::{select, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// A sink for collected metrics.
pub trait Reporter: Send + Sync {
    fn report(&self, report: &MetricsReport) -> anyhow::Result<()>;
}

/// Emits one `tracing` event per metric at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl LogReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for LogReporter {
    fn report(&self, report: &MetricsReport) -> anyhow::Result<()> {
        for entry in &report.metrics {
            let metric = &entry.name;
            match &entry.value {
                MetricValue::Counter(value) => {
                    info!(metric = %metric, kind = "counter", count = value.count, "metric");
                }
                MetricValue::Gauge(value) => {
                    info!(metric = %metric, kind = "gauge", value = value.value, "metric");
                }
                MetricValue::Histogram(value) => info!(
                    metric = %metric,
                    kind = "histogram",
                    count = value.count,
                    min = value.min,
                    max = value.max,
                    mean = value.mean,
                    p50 = value.median,
                    p99 = value.p99,
                    "metric"
                ),
                MetricValue::Meter(value) => info!(
                    metric = %metric,
                    kind = "meter",
                    count = value.count,
                    m1 = ?value.rates.one_minute,
                    mean_rate = value.rates.mean,
                    rate_unit = ?value.rate_unit,
                    "metric"
                ),
                MetricValue::Timer(value) => info!(
                    metric = %metric,
                    kind = "timer",
                    count = value.distribution.count,
                    mean = value.distribution.mean,
                    p99 = value.distribution.p99,
                    m1 = ?value.rates.one_minute,
                    duration_unit = ?value.duration_unit,
                    "metric"
                ),
            }
        }
        Ok(())
    }
}

/// Drives a [`Reporter`] from a background thread at a fixed period.
///
/// Each period the registry is collected and handed to the reporter. A
/// reporter that fails or panics is logged and called again next period.
/// The thread stops on [`ScheduledReporter::stop`] or when the handle is
/// dropped, after one final report so the last partial period is not lost.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tally_metrics::{LogReporter, MetricsRegistry, ScheduledReporter};
///
/// let registry = Arc::new(MetricsRegistry::new());
/// let mut reporter =
///     ScheduledReporter::start(registry, Arc::new(LogReporter), Duration::from_secs(60)).unwrap();
/// // ...
/// reporter.stop();
/// ```
#[derive(Debug)]
pub struct ScheduledReporter {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledReporter {
    pub fn start(
        registry: Arc<MetricsRegistry>,
        reporter: Arc<dyn Reporter>,
        period: Duration,
    ) -> Result<Self> {
        if period.is_zero() {
            return Err(MetricsError::InvalidReportPeriod(period));
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("tally-reporter".to_string())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(period);
                info!(?period, "scheduled reporter started");

                loop {
                    select! {
                        recv(ticker) -> _ => report_once(&registry, reporter.as_ref()),
                        recv(stop_rx) -> _ => break,
                    }
                }

                report_once(&registry, reporter.as_ref());
                info!("scheduled reporter stopped");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops the background thread and waits for its final report.
    pub fn stop(&mut self) {
        // Disconnecting the channel wakes the thread.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("scheduled reporter thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for ScheduledReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn report_once(registry: &MetricsRegistry, reporter: &dyn Reporter) {
    let report = registry.collect();
    match panic::catch_unwind(AssertUnwindSafe(|| reporter.report(&report))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "reporter failed"),
        Err(_) => error!("reporter panicked"),
    }
}
