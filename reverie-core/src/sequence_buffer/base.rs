//! Sequence replay buffer with optional prioritized sampling.
mod iw_scheduler;
mod sum_tree;
use super::{
    batch::{SequenceBatch, StepBatch},
    config::SequenceBufferConfig,
    sanitize::sanitize_batch,
    store::SequenceStore,
};
use crate::{error::ReplayError, ExperienceBufferBase, ReplayBufferBase, SampleOutcome};
use anyhow::Result;
pub use iw_scheduler::IwScheduler;
use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};
use sum_tree::SumTree;

/// Epsilon added to sampled priorities before inversion, so zero and
/// near-zero priorities produce finite importance weights.
const IW_EPS: f32 = 1e-5;

struct PerState {
    sum_tree: SumTree,
    iw_scheduler: IwScheduler,
    unique: bool,
    rng: fastrand::Rng,
}

impl PerState {
    fn new(config: &SequenceBufferConfig) -> Option<Self> {
        let per = config.per_config.as_ref()?;
        let leaves = (config.capacity / config.rnn_state_interval) * config.n_envs;
        Some(Self {
            sum_tree: SumTree::new(leaves, per.alpha),
            iw_scheduler: IwScheduler::new(per.beta_0, per.beta_final, per.n_opts_final),
            unique: per.unique,
            rng: fastrand::Rng::with_seed(config.seed),
        })
    }
}

/// A fixed-capacity `[T, B]` replay buffer of transition sequences.
///
/// Appending writes one timestep per environment at the ring cursor and
/// advances the logical time counter. Sampling draws `(time, env)` start
/// pairs, uniformly or by priority, extracts wraparound-safe windows of
/// `batch_t + n_step + 1` consecutive records, computes n-step returns and
/// importance weights, and sanitizes sequences that cross an episode
/// boundary.
///
/// Sampling and appending may race when the two sides are decoupled (see
/// `reverie-async`); the buffer reports such races as
/// [`SampleOutcome::Retry`] and the caller restarts the whole cycle.
pub struct SequenceReplayBuffer {
    config: SequenceBufferConfig,
    store: SequenceStore,
    rng: StdRng,
    per_state: Option<PerState>,
}

impl SequenceReplayBuffer {
    /// Total number of timesteps ever appended.
    pub fn t_total(&self) -> u64 {
        self.store.t_total()
    }

    /// Current importance-weight exponent, if prioritized.
    pub fn beta(&self) -> Option<f32> {
        self.per_state.as_ref().map(|p| p.iw_scheduler.beta())
    }

    fn n_envs(&self) -> usize {
        self.config.n_envs
    }

    fn interval(&self) -> usize {
        self.config.rnn_state_interval
    }

    /// Episode-local timestep recorded at logical time `t` for environment
    /// `b`, if that record is still live.
    pub fn local_timestep(&self, t: u64, b: usize) -> Result<i64, ReplayError> {
        self.store.check_window(t, b, 1, 0)?;
        Ok(self.store.timestep_at(t, b))
    }

    /// Logical time currently held by a ring slot, if the slot has been
    /// written at all.
    fn logical_of_slot(&self, slot: usize) -> Option<u64> {
        let cap = self.config.capacity as u64;
        let cur = self.store.t_total().checked_sub(1)?;
        let cur_slot = cur % cap;
        let back = (cur_slot + cap - slot as u64) % cap;
        cur.checked_sub(back)
    }

    /// Priority-index maintenance after a write at logical time `t_written`.
    ///
    /// The slot that was just overwritten (and the guard band ahead of the
    /// cursor) loses its mass; the step that just became a complete window
    /// start is promoted to the current max priority. Together these keep
    /// every sampleable leaf pointing at a live, fully extractable window.
    fn refresh_priorities(&mut self, t_written: u64) {
        let cap = self.config.capacity as u64;
        let window = self.config.window_len() as u64;
        let n_envs = self.n_envs();
        let interval = self.interval() as u64;

        let per = match &mut self.per_state {
            Some(per) => per,
            None => return,
        };

        if t_written >= cap {
            for g in 0..=self.config.rewrite_guard as u64 {
                let slot = ((t_written + g) % cap) as usize;
                if slot as u64 % interval == 0 {
                    let row = slot / interval as usize;
                    for b in 0..n_envs {
                        per.sum_tree.update(row * n_envs + b, 0.0);
                    }
                }
            }
        }

        if t_written + 1 >= window {
            let t_start = t_written + 1 - window;
            let slot = (t_start % cap) as usize;
            if slot as u64 % interval == 0 {
                let row = slot / interval as usize;
                let p = per.sum_tree.max();
                for b in 0..n_envs {
                    per.sum_tree.update(row * n_envs + b, p);
                }
            }
        }
    }

    /// Draws `(time, env)` start pairs uniformly from the live range.
    fn sample_idxs_uniform(
        &mut self,
        batch_b: usize,
    ) -> Result<(Vec<u64>, Vec<usize>), ReplayError> {
        let window = self.config.window_len() as u64;
        let interval = self.interval() as u64;
        let lo = self.store.oldest(self.config.rewrite_guard);
        let hi = self.store.t_total().checked_sub(window).ok_or_else(|| {
            ReplayError::StaleIndex {
                t_idxs: vec![],
                b_idxs: vec![],
                t_total: self.store.t_total(),
            }
        })?;

        // Strided start positions within [lo, hi].
        let lo_r = (lo + interval - 1) / interval;
        let hi_r = hi / interval;
        if hi_r < lo_r {
            return Err(ReplayError::StaleIndex {
                t_idxs: vec![],
                b_idxs: vec![],
                t_total: self.store.t_total(),
            });
        }

        let n_envs = self.n_envs();
        let t_idxs = (0..batch_b)
            .map(|_| self.rng.gen_range(lo_r..=hi_r) * interval)
            .collect();
        let b_idxs = (0..batch_b).map(|_| self.rng.gen_range(0..n_envs)).collect();
        Ok((t_idxs, b_idxs))
    }

    /// Draws `(time, env)` start pairs from the priority index, returning
    /// their priorities as well.
    fn sample_idxs_per(
        &mut self,
        batch_b: usize,
    ) -> Result<(Vec<u64>, Vec<usize>, Vec<f32>), ReplayError> {
        let interval = self.interval();
        let n_envs = self.n_envs();
        let capacity = self.config.capacity;

        let (leaves, priorities) = {
            let per = self.per_state.as_mut().expect("per_state checked by caller");
            per.sum_tree.sample(batch_b, per.unique, &mut per.rng)?
        };

        let mut t_idxs = Vec::with_capacity(batch_b);
        let mut b_idxs = Vec::with_capacity(batch_b);
        for leaf in leaves {
            let slot = (leaf / n_envs) * interval;
            debug_assert!(slot < capacity);
            let t = self
                .logical_of_slot(slot)
                .ok_or_else(|| ReplayError::StaleIndex {
                    t_idxs: t_idxs.clone(),
                    b_idxs: b_idxs.clone(),
                    t_total: self.store.t_total(),
                })?;
            t_idxs.push(t);
            b_idxs.push(leaf % n_envs);
        }
        Ok((t_idxs, b_idxs, priorities))
    }

    /// Gathers `batch_t`-step training windows (plus the n-step lookahead
    /// for base fields) at the given `(time, env)` start pairs.
    ///
    /// Fails with [`ReplayError::StaleIndex`] if any window is no longer
    /// fully live; the caller retries the whole sample-extract cycle rather
    /// than recovering partially.
    pub fn extract_batch(
        &self,
        t_idxs: &[u64],
        b_idxs: &[usize],
        batch_t: usize,
    ) -> Result<SequenceBatch, ReplayError> {
        let batch_b = t_idxs.len();
        let n_step = self.config.n_step;
        let rows_full = batch_t + n_step + 1;
        let obs_len = self.config.obs_len;
        let policy_len = self.store.policy_len();
        let discount = self.config.discount;

        for (&t, &b) in t_idxs.iter().zip(b_idxs.iter()) {
            self.store
                .check_window(t, b, rows_full, self.config.rewrite_guard)
                .map_err(|e| match e {
                    ReplayError::StaleIndex { .. } => ReplayError::StaleIndex {
                        t_idxs: t_idxs.to_vec(),
                        b_idxs: b_idxs.to_vec(),
                        t_total: self.store.t_total(),
                    },
                    other => other,
                })?;
        }

        let mut batch = SequenceBatch {
            obs: vec![0u8; rows_full * batch_b * obs_len],
            act: vec![0i64; rows_full * batch_b],
            reward: vec![0f32; rows_full * batch_b],
            done: vec![0i8; batch_t * batch_b],
            done_n: vec![0i8; batch_t * batch_b],
            return_n: vec![0f32; batch_t * batch_b],
            value: if self.store.has_value() {
                vec![0f32; rows_full * batch_b]
            } else {
                vec![]
            },
            policy: vec![0f32; rows_full * batch_b * policy_len],
            weights: None,
            priorities: None,
            t_idxs: t_idxs.to_vec(),
            b_idxs: b_idxs.to_vec(),
            batch_t,
            rows_full,
            batch_b,
            obs_len,
            policy_len,
        };

        for row in 0..rows_full {
            for (col, (&t0, &b)) in t_idxs.iter().zip(b_idxs.iter()).enumerate() {
                let t = t0 + row as u64;
                let cell = row * batch_b + col;
                batch.obs[cell * obs_len..(cell + 1) * obs_len]
                    .copy_from_slice(self.store.obs_at(t, b));
                batch.act[cell] = self.store.act_at(t, b);
                batch.reward[cell] = self.store.reward_at(t, b);
                if self.store.has_value() {
                    batch.value[cell] = self.store.value_at(t, b);
                }
                if policy_len > 0 {
                    batch.policy[cell * policy_len..(cell + 1) * policy_len]
                        .copy_from_slice(self.store.policy_at(t, b));
                }
            }
        }

        // Derived n-step fields over the nominal window. The sum stops at
        // the first terminal: its reward is included, later ones are not.
        for row in 0..batch_t {
            for (col, (&t0, &b)) in t_idxs.iter().zip(b_idxs.iter()).enumerate() {
                let cell = row * batch_b + col;
                batch.done[cell] = self.store.done_at(t0 + row as u64, b);

                let mut ret = 0f32;
                let mut done_n = 0i8;
                let mut gamma = 1f32;
                for k in 0..n_step {
                    let t = t0 + (row + k) as u64;
                    ret += gamma * self.store.reward_at(t, b);
                    if self.store.done_at(t, b) != 0 {
                        done_n = 1;
                        break;
                    }
                    gamma *= discount;
                }
                batch.return_n[cell] = ret;
                batch.done_n[cell] = done_n;
            }
        }

        Ok(batch)
    }

    /// Importance weights for sampled priorities:
    /// `w_i = (1 / (p_i + eps))^beta`, normalized by the batch maximum.
    fn importance_weights(priorities: &[f32], beta: f32) -> Vec<f32> {
        let ws: Vec<f32> = priorities
            .iter()
            .map(|p| (1.0 / (p + IW_EPS)).powf(beta))
            .collect();
        let w_max = ws.iter().fold(f32::MIN, |m, &v| v.max(m));
        ws.iter().map(|w| w / w_max).collect()
    }
}

impl ExperienceBufferBase for SequenceReplayBuffer {
    type Item = StepBatch;

    fn push(&mut self, step: Self::Item) -> Result<()> {
        self.store.append(&step)?;
        let t_written = self.store.t_total() - 1;
        self.refresh_priorities(t_written);
        Ok(())
    }

    fn len(&self) -> usize {
        self.store.len()
    }
}

impl ReplayBufferBase for SequenceReplayBuffer {
    type Config = SequenceBufferConfig;
    type Batch = SequenceBatch;

    fn build(config: &Self::Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: SequenceStore::new(
                config.capacity,
                config.n_envs,
                config.obs_len,
                config.policy_len,
                config.store_value,
            ),
            rng: StdRng::seed_from_u64(config.seed),
            per_state: PerState::new(config),
            config: config.clone(),
        })
    }

    fn sample(&mut self, batch_b: usize) -> Result<SampleOutcome<Self::Batch>> {
        // Warm-up: the writer has not yet produced one full window.
        if self.store.t_total() < self.config.window_len() as u64 {
            return Ok(SampleOutcome::Retry(ReplayError::StaleIndex {
                t_idxs: vec![],
                b_idxs: vec![],
                t_total: self.store.t_total(),
            }));
        }

        let (t_idxs, b_idxs, priorities) = if self.per_state.is_some() {
            match self.sample_idxs_per(batch_b) {
                Ok((t, b, p)) => (t, b, Some(p)),
                Err(e) if e.is_recoverable() => return Ok(SampleOutcome::Retry(e)),
                Err(e) => return Err(e.into()),
            }
        } else {
            match self.sample_idxs_uniform(batch_b) {
                Ok((t, b)) => (t, b, None),
                Err(e) if e.is_recoverable() => return Ok(SampleOutcome::Retry(e)),
                Err(e) => return Err(e.into()),
            }
        };

        let mut batch = match self.extract_batch(&t_idxs, &b_idxs, self.config.batch_t) {
            Ok(batch) => batch,
            Err(e) if e.is_recoverable() => return Ok(SampleOutcome::Retry(e)),
            Err(e) => return Err(e.into()),
        };

        if let (Some(ps), Some(per)) = (priorities, &self.per_state) {
            batch.weights = Some(Self::importance_weights(&ps, per.iw_scheduler.beta()));
            batch.priorities = Some(ps);
        }

        // Single-step batches cannot cross an episode boundary.
        if self.config.batch_t > 1 {
            sanitize_batch(&mut batch);
        }

        Ok(SampleOutcome::Batch(batch))
    }

    fn update_priority(&mut self, t_idxs: &[u64], b_idxs: &[usize], priorities: &[f32]) {
        let oldest = self.store.oldest(0);
        let t_total = self.store.t_total();
        let capacity = self.config.capacity as u64;
        let interval = self.interval() as u64;
        let n_envs = self.n_envs();

        if let Some(per) = &mut self.per_state {
            for ((&t, &b), &p) in t_idxs.iter().zip(b_idxs.iter()).zip(priorities.iter()) {
                // Skip entries overwritten since they were sampled.
                if t < oldest || t >= t_total || b >= n_envs {
                    debug!("skipping stale priority update at (t={}, b={})", t, b);
                    continue;
                }
                let slot = t % capacity;
                if slot % interval != 0 {
                    continue;
                }
                let leaf = (slot / interval) as usize * n_envs + b;
                per.sum_tree.update(leaf, p);
            }
            per.iw_scheduler.add_n_opts();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence_buffer::config::PerConfig;

    fn obs_fill(t: u8, n_envs: usize, obs_len: usize) -> Vec<u8> {
        (0..n_envs)
            .flat_map(|b| vec![t.wrapping_add(b as u8 * 100); obs_len])
            .collect()
    }

    fn push_steps(buffer: &mut SequenceReplayBuffer, n: usize, done_at: Option<(usize, usize)>) {
        let n_envs = buffer.config.n_envs;
        let obs_len = buffer.config.obs_len;
        for t in 0..n {
            let mut done = vec![0i8; n_envs];
            if let Some((dt, db)) = done_at {
                if t == dt {
                    done[db] = 1;
                }
            }
            let step = StepBatch::new(
                obs_fill(t as u8, n_envs, obs_len),
                vec![t as i64; n_envs],
                vec![t as f32; n_envs],
                done,
            );
            buffer.push(step).unwrap();
        }
    }

    fn config() -> SequenceBufferConfig {
        SequenceBufferConfig::default()
            .capacity(32)
            .n_envs(2)
            .obs_len(4)
            .batch_t(5)
            .n_step(2)
            .discount(1.0)
            .seed(7)
    }

    #[test]
    fn test_warmup_requests_retry() {
        let mut buffer = SequenceReplayBuffer::build(&config()).unwrap();
        push_steps(&mut buffer, 3, None);
        match buffer.sample(4).unwrap() {
            SampleOutcome::Retry(_) => {}
            SampleOutcome::Batch(_) => panic!("expected retry during warm-up"),
        }
    }

    #[test]
    fn test_uniform_sample_shapes() {
        let mut buffer = SequenceReplayBuffer::build(&config()).unwrap();
        push_steps(&mut buffer, 20, None);

        let batch = buffer.sample(6).unwrap().into_batch();
        assert_eq!(batch.batch_b, 6);
        assert_eq!(batch.rows_full, 5 + 2 + 1);
        assert_eq!(batch.obs.len(), batch.rows_full * 6 * 4);
        assert_eq!(batch.done.len(), 5 * 6);
        assert!(batch.weights.is_none());

        // Rows are consecutive timesteps of the sampled start.
        for col in 0..batch.batch_b {
            let t0 = batch.t_idxs[col];
            for row in 0..batch.rows_full {
                assert_eq!(batch.act[batch.at(row, col)], (t0 + row as u64) as i64);
            }
        }
    }

    #[test]
    fn test_extract_after_wraparound() {
        let mut buffer = SequenceReplayBuffer::build(&config()).unwrap();
        push_steps(&mut buffer, 50, None);

        // Live range is [18, 50); a window at the oldest edge still works.
        let batch = buffer.extract_batch(&[18], &[1], 5).unwrap();
        for row in 0..batch.rows_full {
            assert_eq!(batch.act[batch.at(row, 0)], 18 + row as i64);
        }

        // An overwritten start is stale.
        assert!(matches!(
            buffer.extract_batch(&[17], &[1], 5),
            Err(ReplayError::StaleIndex { .. })
        ));
    }

    #[test]
    fn test_n_step_return_truncates_at_terminal() {
        let mut buffer = SequenceReplayBuffer::build(&config()).unwrap();
        // Terminal at t=10 for env 0; rewards equal t.
        push_steps(&mut buffer, 20, Some((10, 0)));

        let batch = buffer.extract_batch(&[8], &[0], 5).unwrap();
        // Row 0 starts at t=8: n_step=2 rewards 8 + 9, no terminal.
        assert_eq!(batch.return_n[batch.at(0, 0)], 17.0);
        assert_eq!(batch.done_n[batch.at(0, 0)], 0);
        // Row 2 starts at t=10: terminal reward only, done_n set.
        assert_eq!(batch.return_n[batch.at(2, 0)], 10.0);
        assert_eq!(batch.done_n[batch.at(2, 0)], 1);
    }

    #[test]
    fn test_prioritized_sample_weights_normalized() {
        let cfg = config().per_config(Some(PerConfig::default()));
        let mut buffer = SequenceReplayBuffer::build(&cfg).unwrap();
        push_steps(&mut buffer, 30, None);

        let batch = buffer.sample(8).unwrap().into_batch();
        let ws = batch.weights.as_ref().unwrap();
        let ps = batch.priorities.as_ref().unwrap();
        assert_eq!(ws.len(), 8);
        assert_eq!(ps.len(), 8);
        let w_max = ws.iter().cloned().fold(f32::MIN, f32::max);
        assert!((w_max - 1.0).abs() < 1e-6);
        assert!(ws.iter().all(|&w| w >= 0.0));

        // Write back fresh priorities and sample again.
        buffer.update_priority(&batch.t_idxs, &batch.b_idxs, &vec![0.5; 8]);
        let _ = buffer.sample(8).unwrap().into_batch();
    }

    #[test]
    fn test_prioritized_unique_exhausts() {
        // Capacity 8 with window 8 leaves exactly one valid start per env.
        let cfg = config()
            .capacity(8)
            .per_config(Some(PerConfig::default().unique(true)));
        let mut buffer = SequenceReplayBuffer::build(&cfg).unwrap();
        push_steps(&mut buffer, 8, None);

        // Two valid leaves (one per env): unique batch of 2 succeeds.
        let batch = buffer.sample(2).unwrap().into_batch();
        let mut cols: Vec<(u64, usize)> = batch
            .t_idxs
            .iter()
            .cloned()
            .zip(batch.b_idxs.iter().cloned())
            .collect();
        cols.sort_unstable();
        cols.dedup();
        assert_eq!(cols.len(), 2);

        // A third unique sample cannot exist.
        assert!(buffer.sample(3).is_err());
    }

    #[test]
    fn test_stale_priority_update_skipped() {
        let cfg = config().per_config(Some(PerConfig::default()));
        let mut buffer = SequenceReplayBuffer::build(&cfg).unwrap();
        push_steps(&mut buffer, 40, None);

        let before = buffer.per_state.as_ref().unwrap().sum_tree.total();
        // Logical time 0 was overwritten long ago; the update must be a no-op.
        buffer.update_priority(&[0], &[0], &[1000.0]);
        let after = buffer.per_state.as_ref().unwrap().sum_tree.total();
        assert!((before - after).abs() < 1e-4);
    }

    #[test]
    fn test_value_and_policy_columns() {
        let cfg = config().policy_len(3).store_value(true);
        let mut buffer = SequenceReplayBuffer::build(&cfg).unwrap();
        for t in 0..20 {
            let step = StepBatch::new(
                obs_fill(t as u8, 2, 4),
                vec![t as i64; 2],
                vec![t as f32; 2],
                vec![0i8; 2],
            )
            .with_policy(vec![t as f32 * 0.1; 2 * 3])
            .with_value(vec![t as f32 * 10.0; 2]);
            buffer.push(step).unwrap();
        }

        let batch = buffer.extract_batch(&[12], &[1], 5).unwrap();
        assert_eq!(batch.value.len(), batch.rows_full);
        assert_eq!(batch.policy.len(), batch.rows_full * 3);
        for row in 0..batch.rows_full {
            let t = 12 + row as u64;
            assert_eq!(batch.value[batch.at(row, 0)], t as f32 * 10.0);
            assert_eq!(batch.policy[batch.at(row, 0) * 3], t as f32 * 0.1);
        }
        assert_eq!(buffer.local_timestep(12, 1).unwrap(), 12);
    }

    #[test]
    fn test_rnn_state_interval_strides_starts() {
        let cfg = config().rnn_state_interval(4);
        let mut buffer = SequenceReplayBuffer::build(&cfg).unwrap();
        push_steps(&mut buffer, 24, None);

        for _ in 0..10 {
            let batch = buffer.sample(4).unwrap().into_batch();
            assert!(batch.t_idxs.iter().all(|t| t % 4 == 0));
        }
    }
}
