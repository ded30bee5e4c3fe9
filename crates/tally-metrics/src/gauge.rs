use std::fmt;

/// A value read on demand from a closure.
///
/// # Example
///
/// ```rust
/// use tally_metrics::Gauge;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let queue_depth = Arc::new(AtomicUsize::new(3));
/// let depth = queue_depth.clone();
/// let gauge = Gauge::new(move || depth.load(Ordering::Relaxed) as f64);
///
/// assert_eq!(gauge.value(), 3.0);
/// queue_depth.store(7, Ordering::Relaxed);
/// assert_eq!(gauge.value(), 7.0);
/// ```
pub struct Gauge {
    read: Box<dyn Fn() -> f64 + Send + Sync>,
}

impl Gauge {
    pub fn new<F>(read: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self {
            read: Box::new(read),
        }
    }

    pub fn value(&self) -> f64 {
        (self.read)()
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge").finish_non_exhaustive()
    }
}
