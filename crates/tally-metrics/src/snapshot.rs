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

use crate::error::{MetricsError, Result};

/// Immutable, sorted copy of a sample's contents.
///
/// A snapshot owns its values outright; nothing in it aliases the live
/// sample it was taken from. All statistics here are computed over the
/// sampled values only, which is what makes percentile queries cheap.
///
/// An empty snapshot reports `0.0` for every statistic.
///
/// # Example
///
/// ```rust
/// use tally_metrics::Snapshot;
///
/// let snapshot = Snapshot::new(vec![5.0, 1.0, 3.0, 2.0, 4.0]);
/// assert_eq!(snapshot.values(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
/// assert_eq!(snapshot.median(), 3.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    values: Vec<f64>,
}

impl Snapshot {
    /// Takes ownership of `values` and sorts them.
    pub fn new(mut values: Vec<f64>) -> Self {
        values.sort_by(f64::total_cmp);
        Self { values }
    }

    /// Returns the value at `quantile` (0.0 to 1.0 inclusive).
    ///
    /// Uses the `q * (n + 1)` position with linear interpolation between
    /// neighbours. Positions before the first element clamp to the minimum
    /// and positions past the last clamp to the maximum.
    pub fn value(&self, quantile: f64) -> Result<f64> {
        if !(0.0..=1.0).contains(&quantile) {
            return Err(MetricsError::InvalidQuantile(quantile));
        }
        Ok(self.quantile(quantile))
    }

    fn quantile(&self, quantile: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }

        let pos = quantile * (self.values.len() + 1) as f64;
        if pos < 1.0 {
            return self.values[0];
        }
        if pos >= self.values.len() as f64 {
            return self.values[self.values.len() - 1];
        }

        let lower = self.values[pos as usize - 1];
        let upper = self.values[pos as usize];
        lower + (pos - pos.floor()) * (upper - lower)
    }

    pub fn median(&self) -> f64 {
        self.quantile(0.5)
    }

    pub fn p75(&self) -> f64 {
        self.quantile(0.75)
    }

    pub fn p95(&self) -> f64 {
        self.quantile(0.95)
    }

    pub fn p98(&self) -> f64 {
        self.quantile(0.98)
    }

    pub fn p99(&self) -> f64 {
        self.quantile(0.99)
    }

    pub fn p999(&self) -> f64 {
        self.quantile(0.999)
    }

    /// Number of values in the snapshot.
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// The sorted values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn min(&self) -> f64 {
        self.values.first().copied().unwrap_or(0.0)
    }

    pub fn max(&self) -> f64 {
        self.values.last().copied().unwrap_or(0.0)
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Sample standard deviation of the sampled values.
    pub fn std_dev(&self) -> f64 {
        if self.values.len() <= 1 {
            return 0.0;
        }

        let mean = self.mean();
        let sum_of_squares: f64 = self.values.iter().map(|v| (v - mean) * (v - mean)).sum();
        (sum_of_squares / (self.values.len() - 1) as f64).sqrt()
    }
}
