//! Time sources.
//!
//! Every metric that needs time reads it through the [`Clock`] trait so that
//! tests can drive time by hand. Two readings are exposed:
//!
//! - [`Clock::tick`]: monotonic nanoseconds from an arbitrary origin, used for
//!   durations, tick bookkeeping and decay weights
//! - [`Clock::time`]: wall-clock milliseconds since the Unix epoch, used for
//!   report timestamps

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic time in nanoseconds. Never decreases.
    fn tick(&self) -> u64;

    /// Wall-clock time in milliseconds since the Unix epoch.
    fn time(&self) -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock backed by [`Instant`].
///
/// All instances share one process-wide origin, so ticks read from different
/// `SystemClock` values are comparable.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Returns the shared default clock.
    pub fn shared() -> Arc<dyn Clock> {
        static CLOCK: OnceLock<Arc<dyn Clock>> = OnceLock::new();
        CLOCK.get_or_init(|| Arc::new(SystemClock)).clone()
    }
}

impl Clock for SystemClock {
    fn tick(&self) -> u64 {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        ORIGIN.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

/// Clock that only moves when told to.
///
/// # Example
///
/// ```rust
/// use tally_metrics::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.tick(), 5_000_000_000);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
    wall_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves both readings forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
        self.wall_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Sets the monotonic reading. Callers are responsible for never moving it backwards.
    pub fn set_tick(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn tick(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }

    fn time(&self) -> u64 {
        self.wall_ms.load(Ordering::SeqCst)
    }
}

/// Clock that advances by a fixed step every time it is read.
///
/// Useful for timing tests: two consecutive reads are always exactly one
/// step apart.
#[derive(Debug)]
pub struct StepClock {
    step: u64,
    nanos: AtomicU64,
}

impl StepClock {
    pub fn new(step: Duration) -> Self {
        Self {
            step: step.as_nanos() as u64,
            nanos: AtomicU64::new(0),
        }
    }
}

impl Clock for StepClock {
    fn tick(&self) -> u64 {
        self.nanos.fetch_add(self.step, Ordering::SeqCst) + self.step
    }

    fn time(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst) / 1_000_000
    }
}
