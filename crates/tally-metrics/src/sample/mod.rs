//! Fixed-capacity reservoirs over unbounded value streams.
//!
//! - [`UniformSample`]: every observation is equally likely to be retained
//!   (Vitter's Algorithm R)
//! - [`ExponentiallyDecayingSample`]: retention is biased toward recent
//!   observations using forward decay
//!
//! Both are safe to update from many threads at once. A sample's capacity is
//! fixed at construction and it is only ever emptied through [`Sample::clear`].

mod exp_decay;
mod uniform;

use crate::error::Result;
use crate::snapshot::Snapshot;

pub use exp_decay::ExponentiallyDecayingSample;
pub use uniform::UniformSample;

/// A statistically representative subset of a stream of values.
pub trait Sample: Send + Sync + std::fmt::Debug {
    /// Offers a value to the reservoir. Non-finite values are rejected.
    fn update(&self, value: f64) -> Result<()>;

    /// Empties the reservoir and resets its observation counter.
    fn clear(&self);

    /// Number of values currently retained, `min(observations, capacity)`.
    fn size(&self) -> usize;

    /// Copies the retained values into a sorted [`Snapshot`].
    fn snapshot(&self) -> Snapshot;
}
