use ig_tensor::Element;

/// A tile's worth of loaded operand data.
///
/// Indexed by (reduction step, row-or-column within the tile, interleave
/// lane). Masked loads leave lanes at zero, so the compute step never needs
/// its own boundary checks.
#[derive(Debug, Clone)]
pub struct Fragment<T: Element> {
    data: Vec<T>,
    steps: usize,
    count: usize,
    lanes: usize,
}

impl<T: Element> Fragment<T> {
    pub fn new(steps: usize, count: usize, lanes: usize) -> Self {
        Fragment {
            data: vec![T::default(); steps * count * lanes],
            steps,
            count,
            lanes,
        }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    #[inline]
    fn index(&self, step: usize, i: usize, lane: usize) -> usize {
        debug_assert!(step < self.steps && i < self.count && lane < self.lanes);
        (step * self.count + i) * self.lanes + lane
    }

    #[inline]
    pub fn get(&self, step: usize, i: usize, lane: usize) -> T {
        self.data[self.index(step, i, lane)]
    }

    #[inline]
    pub fn set(&mut self, step: usize, i: usize, lane: usize, value: T) {
        let idx = self.index(step, i, lane);
        self.data[idx] = value;
    }

    /// The contiguous lane group of one (step, position) access.
    #[inline]
    pub fn lane_group_mut(&mut self, step: usize, i: usize) -> &mut [T] {
        let start = self.index(step, i, 0);
        &mut self.data[start..start + self.lanes]
    }

    /// Resets every lane to zero, the fill value of masked accesses.
    pub fn clear(&mut self) {
        self.data.fill(T::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexing_round_trip() {
        let mut f = Fragment::<i8>::new(2, 3, 4);
        f.set(1, 2, 3, 7);
        assert_eq!(f.get(1, 2, 3), 7);
        assert_eq!(f.get(0, 0, 0), 0);
    }

    #[test]
    fn test_lane_group_is_contiguous() {
        let mut f = Fragment::<f32>::new(1, 2, 4);
        let group = f.lane_group_mut(0, 1);
        group.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        for lane in 0..4 {
            assert_eq!(f.get(0, 1, lane), (lane + 1) as f32);
        }
        assert_eq!(f.get(0, 0, 0), 0.0);
    }

    #[test]
    fn test_clear() {
        let mut f = Fragment::<i32>::new(1, 1, 2);
        f.set(0, 0, 1, 5);
        f.clear();
        assert_eq!(f.get(0, 0, 1), 0);
    }
}
