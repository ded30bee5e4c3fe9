use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` stored as its bit pattern in an [`AtomicU64`].
///
/// Read-modify-write operations are compare-and-swap retry loops over the
/// bit pattern, so every successful update is applied exactly once.
#[derive(Debug)]
pub(crate) struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Stores `new` if the current value is bitwise equal to `current`.
    pub(crate) fn compare_exchange(&self, current: f64, new: f64) -> Result<f64, f64> {
        self.bits
            .compare_exchange_weak(
                current.to_bits(),
                new.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(f64::from_bits)
            .map_err(f64::from_bits)
    }

    /// Adds `delta`, returning the previous value.
    pub(crate) fn fetch_add(&self, delta: f64) -> f64 {
        let mut current = self.load();
        loop {
            match self.compare_exchange(current, current + delta) {
                Ok(previous) => return previous,
                Err(actual) => current = actual,
            }
        }
    }

    /// Lowers the stored value to `value` if it is smaller.
    pub(crate) fn fetch_min(&self, value: f64) {
        let mut current = self.load();
        while value < current {
            match self.compare_exchange(current, value) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Raises the stored value to `value` if it is larger.
    pub(crate) fn fetch_max(&self, value: f64) {
        let mut current = self.load();
        while value > current {
            match self.compare_exchange(current, value) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}
