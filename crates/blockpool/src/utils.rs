//! Small helpers shared by the pool internals

use core::sync::atomic::{AtomicUsize, Ordering};

/// Pointer width in bytes; the smallest block that can hold a free-list link.
pub const POINTER_WIDTH: usize = size_of::<*mut u8>();

/// Alignment of a free-list link.
pub const POINTER_ALIGN: usize = align_of::<*mut u8>();

/// Aligns a value up to the nearest multiple of alignment
///
/// Returns `None` on overflow. `alignment` must be a power of two.
///
/// # Examples
/// ```
/// use blockpool::utils::align_up;
///
/// assert_eq!(align_up(7, 8), Some(8));
/// assert_eq!(align_up(8, 8), Some(8));
/// assert_eq!(align_up(usize::MAX, 8), None);
/// ```
#[inline]
pub const fn align_up(value: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());
    match value.checked_add(alignment - 1) {
        Some(v) => Some(v & !(alignment - 1)),
        None => None,
    }
}

/// Raises `current` to `value` if `value` is larger
pub fn atomic_max(current: &AtomicUsize, value: usize) {
    let mut max = current.load(Ordering::Relaxed);
    while value > max {
        match current.compare_exchange_weak(max, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => max = observed,
        }
    }
}

/// Exponential spin backoff for contended CAS loops
#[derive(Debug, Clone)]
pub struct Backoff {
    current: u32,
    max: u32,
}

impl Backoff {
    /// Create new backoff with default parameters
    #[inline]
    pub const fn new() -> Self {
        Self { current: 1, max: 64 }
    }

    /// Create backoff with custom maximum spin count
    #[inline]
    pub const fn with_max(max: u32) -> Self {
        Self { current: 1, max }
    }

    /// Spin for the current step, then double it up to the maximum
    #[inline]
    pub fn spin(&mut self) {
        for _ in 0..self.current {
            core::hint::spin_loop();
        }
        if self.current < self.max {
            self.current *= 2;
        }
    }

    /// Reset backoff
    #[inline]
    pub fn reset(&mut self) {
        self.current = 1;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(1, 8), Some(8));
        assert_eq!(align_up(16, 16), Some(16));
        assert_eq!(align_up(17, 16), Some(32));
        assert_eq!(align_up(usize::MAX - 2, 4), None);
    }

    #[test]
    fn test_atomic_max() {
        let value = AtomicUsize::new(5);
        atomic_max(&value, 3);
        assert_eq!(value.load(Ordering::Relaxed), 5);
        atomic_max(&value, 9);
        assert_eq!(value.load(Ordering::Relaxed), 9);
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let mut backoff = Backoff::with_max(4);
        for _ in 0..10 {
            backoff.spin();
        }
        assert_eq!(backoff.current, 4);
        backoff.reset();
        assert_eq!(backoff.current, 1);
    }
}
