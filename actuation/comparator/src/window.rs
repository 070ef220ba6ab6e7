use std::collections::VecDeque;

/// Number of samples each window retains unless configured otherwise.
pub const DEFAULT_WINDOW_CAPACITY: usize = 10;

/// Fixed-capacity FIFO buffer of recent samples, oldest first.
///
/// The window is created full of zeros and every append evicts exactly one
/// sample, so its length is always equal to its capacity. It carries no lock
/// of its own; [`crate::registry::WindowRegistry`] wraps each one in a guard.
#[derive(Debug, Clone, PartialEq)]
pub struct SlidingWindow {
    capacity: usize,
    samples: VecDeque<f32>,
}

impl SlidingWindow {
    /// Creates a window pre-filled with `capacity` zero samples (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut samples = VecDeque::with_capacity(capacity);
        samples.resize(capacity, 0.0);
        Self { capacity, samples }
    }

    /// Appends a sample at the newest end, evicting the oldest once full.
    pub fn append(&mut self, sample: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Independent copy of the current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<f32> {
        self.samples.iter().copied().collect()
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always `false` after construction; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples retained.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

/// Arithmetic mean of `samples`; NaN for an empty slice.
///
/// Accumulates in `f64` and rounds once, so a window holding one repeated
/// value averages back to exactly that value.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn mean(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return f32::NAN;
    }
    let sum: f64 = samples.iter().copied().map(f64::from).sum();
    (sum / samples.len() as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_full_of_zeros() {
        let window = SlidingWindow::new(10);
        assert_eq!(window.len(), 10);
        assert!(window.snapshot().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn length_stays_at_capacity_for_any_number_of_appends() {
        let mut window = SlidingWindow::new(10);
        for i in 0..137 {
            window.append(i as f32);
            assert_eq!(window.len(), 10);
        }
    }

    #[test]
    fn append_evicts_oldest_first() {
        let mut window = SlidingWindow::new(4);
        for v in [1.0, 2.0, 3.0, 4.0] {
            window.append(v);
        }
        window.append(5.0);
        assert_eq!(window.snapshot(), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn snapshot_is_independent_of_later_appends() {
        let mut window = SlidingWindow::new(3);
        window.append(1.0);
        let before = window.snapshot();
        window.append(2.0);
        assert_eq!(before, vec![0.0, 0.0, 1.0]);
        assert_eq!(window.snapshot(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let window = SlidingWindow::new(0);
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn mean_matches_reference_sum() {
        let samples = [1.0, 2.0, 3.0, 4.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert!((mean(&samples) - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn mean_of_repeated_value_is_that_value() {
        for value in [0.5_f32, 0.2, 0.8, 0.1, -0.3] {
            assert_eq!(mean(&[value; 10]), value);
        }
    }

    #[test]
    fn mean_of_empty_is_nan() {
        assert!(mean(&[]).is_nan());
    }
}
