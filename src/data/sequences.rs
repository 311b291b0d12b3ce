// ============================================================
// Layer 4 — Random Token Sequences
// ============================================================
// Seeded batches of token ids for parity checks that do not
// come from a tokenizer: every id is drawn uniformly from
// [0, vocab_size), so any vocabulary row can be exercised.
//
// The generator is owned, never thread-local, so the same seed
// yields the same batches however the checks are scheduled.
//
// Reference: rand crate documentation (StdRng, SeedableRng)

use rand::{rngs::StdRng, Rng, SeedableRng};

pub struct RandomSequences {
    rng: StdRng,
}

impl RandomSequences {
    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// `batch` rows of `seq_len` ids in `[0, vocab_size)`.
    pub fn next_batch(&mut self, batch: usize, seq_len: usize, vocab_size: usize) -> Vec<Vec<u32>> {
        (0..batch)
            .map(|_| (0..seq_len).map(|_| self.rng.gen_range(0..vocab_size as u32)).collect())
            .collect()
    }

    /// `count` single-row batches, as fed to the transplant check.
    pub fn sequences(&mut self, count: usize, seq_len: usize, vocab_size: usize) -> Vec<Vec<Vec<u32>>> {
        (0..count).map(|_| self.next_batch(1, seq_len, vocab_size)).collect()
    }
}
