//! Circular store of per-timestep transition records.
use super::batch::StepBatch;
use crate::error::ReplayError;

/// Fixed-capacity circular array of transition records with one time axis
/// and one environment axis.
///
/// Each field is a flat time-major array of `capacity * n_envs (* feature)`
/// elements. Writes land at `t_total % capacity` and advance the
/// monotonically increasing logical time counter `t_total`; a logical time
/// `t` is *live* (its slot still holds the data written at `t`) iff
/// `t_total - capacity <= t < t_total`. All reads are addressed in logical
/// time so that staleness is detectable after ring wraparound.
pub(crate) struct SequenceStore {
    capacity: usize,
    n_envs: usize,
    obs_len: usize,
    policy_len: usize,
    store_value: bool,

    /// Total timesteps ever written.
    t_total: u64,

    obs: Vec<u8>,
    act: Vec<i64>,
    reward: Vec<f32>,
    done: Vec<i8>,
    timestep: Vec<i64>,
    policy: Vec<f32>,
    value: Vec<f32>,

    /// Per-environment episode-local step counters.
    local_t: Vec<i64>,
}

impl SequenceStore {
    pub fn new(
        capacity: usize,
        n_envs: usize,
        obs_len: usize,
        policy_len: usize,
        store_value: bool,
    ) -> Self {
        let slots = capacity * n_envs;
        Self {
            capacity,
            n_envs,
            obs_len,
            policy_len,
            store_value,
            t_total: 0,
            obs: vec![0u8; slots * obs_len],
            act: vec![0i64; slots],
            reward: vec![0f32; slots],
            done: vec![0i8; slots],
            timestep: vec![0i64; slots],
            policy: vec![0f32; slots * policy_len],
            value: vec![0f32; if store_value { slots } else { 0 }],
            local_t: vec![0i64; n_envs],
        }
    }

    /// Total timesteps ever written.
    pub fn t_total(&self) -> u64 {
        self.t_total
    }

    /// Number of timesteps currently held.
    pub fn len(&self) -> usize {
        self.t_total.min(self.capacity as u64) as usize
    }

    /// Slot on the ring holding logical time `t`.
    #[inline]
    pub fn slot(&self, t: u64) -> usize {
        (t % self.capacity as u64) as usize
    }

    /// Oldest live logical time, shrunk by `guard` slots once the ring has
    /// wrapped.
    pub fn oldest(&self, guard: usize) -> u64 {
        if self.t_total <= self.capacity as u64 {
            0
        } else {
            self.t_total - self.capacity as u64 + guard as u64
        }
    }

    /// Writes one timestep per environment at the current cursor.
    pub fn append(&mut self, step: &StepBatch) -> Result<(), ReplayError> {
        if step.n_envs() != self.n_envs
            || step.obs.len() != self.n_envs * self.obs_len
            || step.reward.len() != self.n_envs
            || step.done.len() != self.n_envs
        {
            return Err(ReplayError::OutOfRange(format!(
                "step shape mismatch: expected {} envs with obs_len {}",
                self.n_envs, self.obs_len,
            )));
        }

        let s = self.slot(self.t_total);
        let row = s * self.n_envs;

        self.obs[row * self.obs_len..(row + self.n_envs) * self.obs_len]
            .copy_from_slice(&step.obs);
        self.act[row..row + self.n_envs].copy_from_slice(&step.act);
        self.reward[row..row + self.n_envs].copy_from_slice(&step.reward);
        self.done[row..row + self.n_envs].copy_from_slice(&step.done);

        if self.policy_len > 0 {
            let p = step.policy.as_ref().ok_or_else(|| {
                ReplayError::OutOfRange("buffer stores policies but step has none".into())
            })?;
            if p.len() != self.n_envs * self.policy_len {
                return Err(ReplayError::OutOfRange(format!(
                    "policy length {} does not match n_envs {} * policy_len {}",
                    p.len(),
                    self.n_envs,
                    self.policy_len,
                )));
            }
            self.policy[row * self.policy_len..(row + self.n_envs) * self.policy_len]
                .copy_from_slice(p);
        }
        if self.store_value {
            let v = step.value.as_ref().ok_or_else(|| {
                ReplayError::OutOfRange("buffer stores values but step has none".into())
            })?;
            self.value[row..row + self.n_envs].copy_from_slice(v);
        }

        for b in 0..self.n_envs {
            self.timestep[row + b] = self.local_t[b];
            if step.done[b] != 0 {
                self.local_t[b] = 0;
            } else {
                self.local_t[b] += 1;
            }
        }

        self.t_total += 1;
        Ok(())
    }

    /// Validates that the window `[t_idx, t_idx + len)` at environment
    /// `b_idx` lies fully inside the live range.
    pub fn check_window(
        &self,
        t_idx: u64,
        b_idx: usize,
        len: usize,
        guard: usize,
    ) -> Result<(), ReplayError> {
        if len > self.capacity || b_idx >= self.n_envs {
            return Err(ReplayError::OutOfRange(format!(
                "window len {} (capacity {}) at env {} (n_envs {})",
                len, self.capacity, b_idx, self.n_envs,
            )));
        }
        if t_idx < self.oldest(guard) || t_idx + len as u64 > self.t_total {
            return Err(ReplayError::StaleIndex {
                t_idxs: vec![t_idx],
                b_idxs: vec![b_idx],
                t_total: self.t_total,
            });
        }
        Ok(())
    }

    #[inline]
    fn cell(&self, t: u64, b: usize) -> usize {
        self.slot(t) * self.n_envs + b
    }

    pub fn obs_at(&self, t: u64, b: usize) -> &[u8] {
        let c = self.cell(t, b) * self.obs_len;
        &self.obs[c..c + self.obs_len]
    }

    pub fn act_at(&self, t: u64, b: usize) -> i64 {
        self.act[self.cell(t, b)]
    }

    pub fn reward_at(&self, t: u64, b: usize) -> f32 {
        self.reward[self.cell(t, b)]
    }

    pub fn done_at(&self, t: u64, b: usize) -> i8 {
        self.done[self.cell(t, b)]
    }

    pub fn timestep_at(&self, t: u64, b: usize) -> i64 {
        self.timestep[self.cell(t, b)]
    }

    pub fn value_at(&self, t: u64, b: usize) -> f32 {
        if self.store_value {
            self.value[self.cell(t, b)]
        } else {
            0.0
        }
    }

    pub fn policy_at(&self, t: u64, b: usize) -> &[f32] {
        let c = self.cell(t, b) * self.policy_len;
        &self.policy[c..c + self.policy_len]
    }

    pub fn has_value(&self) -> bool {
        self.store_value
    }

    pub fn policy_len(&self) -> usize {
        self.policy_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n_envs: usize, obs_len: usize, v: u8) -> StepBatch {
        StepBatch::new(
            vec![v; n_envs * obs_len],
            vec![v as i64; n_envs],
            vec![v as f32; n_envs],
            vec![0; n_envs],
        )
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let capacity = 5;
        let mut store = SequenceStore::new(capacity, 2, 3, 0, false);

        // Write past capacity; only the most recent `capacity` survive.
        for v in 0..12u8 {
            store.append(&step(2, 3, v)).unwrap();
        }
        assert_eq!(store.t_total(), 12);
        assert_eq!(store.len(), capacity);

        for t in 7..12u64 {
            assert_eq!(store.act_at(t, 0), t as i64);
            assert_eq!(store.obs_at(t, 1), &[t as u8; 3]);
        }
    }

    #[test]
    fn test_window_validation() {
        let mut store = SequenceStore::new(5, 1, 1, 0, false);
        for v in 0..8u8 {
            store.append(&step(1, 1, v)).unwrap();
        }

        // Live range is [3, 8).
        assert!(store.check_window(3, 0, 5, 0).is_ok());
        assert!(matches!(
            store.check_window(2, 0, 3, 0),
            Err(ReplayError::StaleIndex { .. })
        ));
        assert!(matches!(
            store.check_window(6, 0, 3, 0),
            Err(ReplayError::StaleIndex { .. })
        ));
        // Structural misuse is fatal, not stale.
        assert!(matches!(
            store.check_window(3, 0, 6, 0),
            Err(ReplayError::OutOfRange(_))
        ));
        assert!(matches!(
            store.check_window(3, 1, 2, 0),
            Err(ReplayError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_rewrite_guard_shrinks_live_range() {
        let mut store = SequenceStore::new(5, 1, 1, 0, false);
        for v in 0..8u8 {
            store.append(&step(1, 1, v)).unwrap();
        }
        assert_eq!(store.oldest(0), 3);
        assert_eq!(store.oldest(2), 5);
        assert!(store.check_window(3, 0, 2, 2).is_err());
        assert!(store.check_window(5, 0, 2, 2).is_ok());
    }

    #[test]
    fn test_local_timestep_resets_after_done() {
        let mut store = SequenceStore::new(8, 1, 1, 0, false);
        for t in 0..6u8 {
            let mut s = step(1, 1, t);
            s.done[0] = (t == 2) as i8;
            store.append(&s).unwrap();
        }
        assert_eq!(store.timestep_at(2, 0), 2);
        assert_eq!(store.timestep_at(3, 0), 0);
        assert_eq!(store.timestep_at(5, 0), 2);
    }
}
