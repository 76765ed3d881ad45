//! Sum tree for prioritized sampling.
//!
//! Code is adapted from https://github.com/jaromiru/AI-blog/blob/master/SumTree.py and
//! https://github.com/openai/baselines/blob/master/baselines/deepq/replay_buffer.py
use crate::error::ReplayError;
use segment_tree::{ops::MaxIgnoreNaN, SegmentPoint};
use std::collections::HashSet;

#[derive(Debug)]
pub struct SumTree {
    alpha: f32,
    capacity: usize,

    /// Number of leaves with nonzero priority.
    n_valid: usize,

    tree: Vec<f32>,
    max_tree: SegmentPoint<f32, MaxIgnoreNaN>,
}

impl SumTree {
    pub fn new(capacity: usize, alpha: f32) -> Self {
        Self {
            alpha,
            capacity,
            n_valid: 0,
            tree: vec![0f32; 2 * capacity - 1],
            max_tree: SegmentPoint::build(vec![0f32; capacity], MaxIgnoreNaN),
        }
    }

    fn propagate(&mut self, ix: usize, change: f32) {
        let parent = (ix - 1) / 2;
        self.tree[parent] += change;
        if parent != 0 {
            self.propagate(parent, change);
        }
    }

    fn retrieve(&self, ix: usize, s: f32) -> usize {
        let left = 2 * ix + 1;
        let right = left + 1;

        if left >= self.tree.len() {
            return ix;
        }

        if s <= self.tree[left] || self.tree[right] == 0f32 {
            self.retrieve(left, s)
        } else {
            self.retrieve(right, s - self.tree[left])
        }
    }

    /// Sum of all leaf priorities (the tree root).
    pub fn total(&self) -> f32 {
        self.tree[0]
    }

    /// Number of leaves currently sampleable.
    pub fn n_valid(&self) -> usize {
        self.n_valid
    }

    /// Raw priority to assign to fresh entries: the maximum raw priority
    /// seen so far, and at least 1 so an empty tree bootstraps.
    pub fn max(&self) -> f32 {
        if self.alpha <= 0.0 {
            return 1.0;
        }
        self.max_tree
            .query(0, self.max_tree.len())
            .powf(1.0 / self.alpha)
            .max(1.0)
    }

    /// Update priority value at `ix`-th element in the sum tree.
    ///
    /// The alpha-th power of the priority value is taken. A priority of
    /// exactly zero invalidates the leaf: it keeps zero mass and is never
    /// reachable by [`SumTree::get`].
    pub fn update(&mut self, ix: usize, p: f32) {
        debug_assert!(ix < self.capacity);

        let p = if p == 0.0 { 0.0 } else { p.powf(self.alpha) };
        self.max_tree.modify(ix, p);
        let ix = ix + self.capacity - 1;
        let change = p - self.tree[ix];
        match (self.tree[ix] == 0.0, p == 0.0) {
            (true, false) => self.n_valid += 1,
            (false, true) => self.n_valid -= 1,
            _ => {}
        }
        self.tree[ix] = p;
        self.propagate(ix, change);
    }

    /// Get the leaf index where the cumulative priority mass reaches `s`.
    ///
    /// Ties in cumulative mass resolve toward the lower-index leaf.
    pub fn get(&self, s: f32) -> usize {
        let ix = self.retrieve(0, s);
        debug_assert!(ix >= (self.capacity - 1));
        ix + 1 - self.capacity
    }

    /// Leaf priority (after the alpha transform) at `ix`.
    pub fn priority(&self, ix: usize) -> f32 {
        self.tree[ix + self.capacity - 1]
    }

    /// Samples `batch_size` leaves with probability proportional to their
    /// priority, returning leaf indices and their (transformed) priorities.
    ///
    /// With `unique`, collisions are resampled until all draws are
    /// distinct; fails if fewer than `batch_size` leaves are sampleable.
    pub fn sample(
        &self,
        batch_size: usize,
        unique: bool,
        rng: &mut fastrand::Rng,
    ) -> Result<(Vec<usize>, Vec<f32>), ReplayError> {
        if self.n_valid == 0 || (unique && self.n_valid < batch_size) {
            return Err(ReplayError::InsufficientUniqueSamples {
                requested: batch_size,
                available: self.n_valid,
            });
        }

        let p_sum = self.total();
        let mut indices = Vec::with_capacity(batch_size);
        let mut seen = HashSet::new();
        while indices.len() < batch_size {
            let ix = self.get(p_sum * rng.f32());
            if unique && !seen.insert(ix) {
                continue;
            }
            indices.push(ix);
        }

        let ps = indices.iter().map(|&ix| self.priority(ix)).collect();
        Ok((indices, ps))
    }
}

#[cfg(test)]
mod tests {
    use super::SumTree;
    use crate::error::ReplayError;

    #[test]
    fn test_inverse_cdf_walk() {
        let data = vec![0.5f32, 0.2, 0.8, 0.3, 1.1, 2.5, 3.9];
        let mut sum_tree = SumTree::new(8, 1.0);
        for ix in 0..data.len() {
            sum_tree.update(ix, data[ix]);
        }

        assert_eq!(sum_tree.get(0.0), 0);
        assert_eq!(sum_tree.get(0.4), 0);
        assert_eq!(sum_tree.get(0.5), 0);
        assert_eq!(sum_tree.get(0.6), 1);
        assert_eq!(sum_tree.get(1.2), 2);
        assert_eq!(sum_tree.get(1.6), 3);
        assert_eq!(sum_tree.get(2.0), 4);
        assert_eq!(sum_tree.get(2.8), 4);
    }

    #[test]
    fn test_root_equals_leaf_sum() {
        let mut sum_tree = SumTree::new(16, 0.7);
        let updates: Vec<(usize, f32)> = vec![
            (0, 1.0),
            (3, 2.5),
            (7, 0.1),
            (3, 0.0),
            (15, 4.2),
            (7, 1.3),
            (0, 0.25),
        ];
        for (ix, p) in updates {
            sum_tree.update(ix, p);
        }

        let leaf_sum: f32 = (0..16).map(|ix| sum_tree.priority(ix)).sum();
        assert!((sum_tree.total() - leaf_sum).abs() < 1e-5);
        assert_eq!(sum_tree.n_valid(), 3);
    }

    #[test]
    fn test_empirical_distribution() {
        let mut sum_tree = SumTree::new(4, 1.0);
        sum_tree.update(0, 1.0);
        sum_tree.update(1, 3.0);
        sum_tree.update(2, 6.0);

        let mut rng = fastrand::Rng::with_seed(42);
        let n = 100_000;
        let (ixs, _) = sum_tree.sample(n, false, &mut rng).unwrap();
        assert!(ixs.iter().all(|&ix| ix < 3));

        for (ix, expected) in [(0usize, 0.1f64), (1, 0.3), (2, 0.6)] {
            let freq = ixs.iter().filter(|&&e| e == ix).count() as f64 / n as f64;
            assert!(
                (freq - expected).abs() < 0.01,
                "leaf {}: frequency {} vs expected {}",
                ix,
                freq,
                expected
            );
        }
    }

    #[test]
    fn test_zero_priority_never_sampled() {
        let mut sum_tree = SumTree::new(8, 0.6);
        sum_tree.update(2, 1.0);
        sum_tree.update(5, 2.0);

        let mut rng = fastrand::Rng::with_seed(7);
        let (ixs, _) = sum_tree.sample(10_000, false, &mut rng).unwrap();
        assert!(ixs.iter().all(|&ix| ix == 2 || ix == 5));
    }

    #[test]
    fn test_unique_sampling() {
        let mut sum_tree = SumTree::new(8, 1.0);
        for ix in 0..3 {
            sum_tree.update(ix, 1.0 + ix as f32);
        }

        let mut rng = fastrand::Rng::with_seed(0);
        let (mut ixs, _) = sum_tree.sample(3, true, &mut rng).unwrap();
        ixs.sort_unstable();
        assert_eq!(ixs, vec![0, 1, 2]);

        match sum_tree.sample(4, true, &mut rng) {
            Err(ReplayError::InsufficientUniqueSamples {
                requested,
                available,
            }) => {
                assert_eq!(requested, 4);
                assert_eq!(available, 3);
            }
            _ => panic!("expected InsufficientUniqueSamples"),
        }
    }
}
