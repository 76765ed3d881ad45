//! Terminal-boundary sanitization of sampled sequences.
use super::batch::SequenceBatch;

/// Stops every sampled sequence at its first terminal step.
///
/// A window that crosses an episode boundary would otherwise splice two
/// unrelated episodes into one trajectory. For each column with a terminal
/// at row `d` (within the nominal `batch_t` rows): observations after `d`
/// are frozen to the terminal observation, rewards, n-step returns and
/// values after `d` are zeroed, and `done_n` after `d` is forced on. The
/// terminal row itself is left untouched. Columns without a terminal pass
/// through unmodified, and reapplication is a no-op.
pub fn sanitize_batch(batch: &mut SequenceBatch) {
    for col in 0..batch.batch_b {
        // First terminal within the nominal window, if any.
        let d = match (0..batch.batch_t).find(|&row| batch.done[batch.at(row, col)] != 0) {
            Some(d) => d,
            None => continue,
        };

        for row in d + 1..batch.rows_full {
            batch.copy_obs_within(d, row, col);
            let cell = row * batch.batch_b + col;
            batch.reward[cell] = 0.0;
            if !batch.value.is_empty() {
                batch.value[cell] = 0.0;
            }
        }
        for row in d + 1..batch.batch_t {
            let cell = row * batch.batch_b + col;
            batch.return_n[cell] = 0.0;
            batch.done_n[cell] = 1;
        }
    }
}
