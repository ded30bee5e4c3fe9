use crate::metric::MetricName;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Invalid reservoir size: {0} (must be at least 1)")]
    InvalidReservoirSize(usize),

    #[error("Invalid decay factor: {0} (must be finite and greater than 0)")]
    InvalidAlpha(f64),

    #[error("Invalid tick interval: {0:?} (must be greater than 0)")]
    InvalidTickInterval(Duration),

    #[error("Invalid EWMA window: {0} minutes (must be greater than 0)")]
    InvalidWindow(u64),

    #[error("Non-finite value rejected: {0}")]
    NonFiniteValue(f64),

    #[error("Invalid quantile: {0} (must be within [0, 1])")]
    InvalidQuantile(f64),

    #[error("Metric already registered: {0}")]
    DuplicateMetric(MetricName),

    #[error("Metric {name} is a {actual}, not a {expected}")]
    TypeMismatch {
        name: MetricName,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid report period: {0:?} (must be greater than 0)")]
    InvalidReportPeriod(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MetricsError>;

/// Rejects NaN and infinities at an update boundary.
pub(crate) fn ensure_finite(value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MetricsError::NonFiniteValue(value))
    }
}
