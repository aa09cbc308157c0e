/// Fixed-capacity moving average for one axis.
///
/// Each new value overwrites the oldest slot once the ring is full. Before
/// that, the mean is taken over the populated slots only.
#[derive(Clone, Debug)]
pub struct MovingAverage {
    slots: Vec<f64>,
    capacity: usize,
    next: usize,
}

impl MovingAverage {
    /// Create a new average with the given window size (typically 10)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        MovingAverage {
            slots: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    /// Push a value and return the mean of the current window
    pub fn apply(&mut self, value: f64) -> f64 {
        if self.slots.len() < self.capacity {
            self.slots.push(value);
        } else {
            self.slots[self.next] = value;
        }
        self.next = (self.next + 1) % self.capacity;

        // Mean taken relative to slot 0, so a window of identical values
        // returns that value bit for bit. Summed fresh each call.
        let anchor = self.slots[0];
        let spread: f64 = self.slots.iter().map(|x| x - anchor).sum();
        anchor + spread / self.slots.len() as f64
    }

    pub fn reset(&mut self) {
        self.slots.clear();
        self.next = 0;
    }

    /// Populated slots (not capacity)
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_value() {
        let mut avg = MovingAverage::new(10);
        assert_eq!(avg.apply(5.0), 5.0);
    }

    #[test]
    fn test_partial_window_uses_populated_slots() {
        let mut avg = MovingAverage::new(10);
        avg.apply(2.0);
        let result = avg.apply(4.0);
        // mean of [2, 4], no zero padding
        assert_relative_eq!(result, 3.0);
        assert_eq!(avg.len(), 2);
    }

    #[test]
    fn test_window_wrapping() {
        let mut avg = MovingAverage::new(3);
        avg.apply(1.0);
        avg.apply(2.0);
        avg.apply(3.0);
        let result = avg.apply(10.0); // overwrites 1.0 -> [10, 2, 3]
        assert_eq!(avg.len(), 3);
        assert_relative_eq!(result, 5.0);
    }

    #[test]
    fn test_constant_input_converges_and_stays() {
        let mut avg = MovingAverage::new(10);
        avg.apply(-4.0);
        avg.apply(12.0);
        let mut last = 0.0;
        for _ in 0..10 {
            last = avg.apply(2.5);
        }
        assert!(avg.is_full());
        assert_eq!(last, 2.5);
        for _ in 0..1000 {
            assert_eq!(avg.apply(2.5), 2.5);
        }
    }

    #[test]
    fn test_constant_input_is_exact_for_unrepresentable_values() {
        for c in [0.1, 0.3, -0.17, 9.81] {
            let mut avg = MovingAverage::new(10);
            for _ in 0..30 {
                avg.apply(c);
            }
            assert!(avg.is_full());
            for _ in 0..100 {
                assert_eq!(avg.apply(c), c, "window of {} drifted", c);
            }
        }
    }

    #[test]
    fn test_settles_exactly_after_a_step() {
        let mut avg = MovingAverage::new(4);
        for x in [1.0, -2.5, 7.25, 0.3] {
            avg.apply(x);
        }
        let mut last = 0.0;
        for _ in 0..4 {
            last = avg.apply(0.3);
        }
        assert_eq!(last, 0.3);
    }

    #[test]
    fn test_reset_empties_window() {
        let mut avg = MovingAverage::new(4);
        avg.apply(100.0);
        avg.reset();
        assert!(avg.is_empty());
        assert_eq!(avg.apply(1.0), 1.0);
    }
}
