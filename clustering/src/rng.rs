use comms::{Collective, ReduceOp};
use log::debug;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{KMeansErr, Result};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// A generator every rank seeds identically and advances in lockstep.
///
/// Every rank must make the same draws in the same order, including the ranks that throw the
/// result away. Each draw is folded into a fingerprint so the group can check afterwards that
/// nobody drifted.
#[derive(Debug, Clone)]
pub struct SharedRng {
    rng: StdRng,
    fingerprint: u64,
    draws: u64,
}

impl SharedRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            fingerprint: FNV_OFFSET,
            draws: 0,
        }
    }

    /// Draws an index uniformly from `0..n`.
    ///
    /// # Panics
    /// If `n` is 0.
    pub fn index(&mut self, n: usize) -> usize {
        let value = self.rng.random_range(0..n);
        self.record(value as u64);
        value
    }

    /// Draws a seed for a generator derived from this one.
    pub fn derive_seed(&mut self) -> u64 {
        let value = self.rng.random();
        self.record(value);
        value
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    fn record(&mut self, value: u64) {
        self.draws += 1;
        for byte in value.to_le_bytes() {
            self.fingerprint ^= byte as u64;
            self.fingerprint = self.fingerprint.wrapping_mul(FNV_PRIME);
        }
    }

    /// Checks that every rank of the group made the same draws.
    ///
    /// The fingerprint travels as two 32 bit halves so it survives the trip through `f64`.
    ///
    /// # Returns
    /// `DesynchronizedDraws` on every rank if any two ranks disagree.
    pub fn verify(&self, comm: &dyn Collective) -> Result<()> {
        let local = [
            (self.fingerprint >> 32) as f64,
            (self.fingerprint & 0xffff_ffff) as f64,
            self.draws as f64,
        ];

        let lowest = comm.all_reduce(&local, ReduceOp::Min)?;
        let highest = comm.all_reduce(&local, ReduceOp::Max)?;

        if lowest != highest {
            return Err(KMeansErr::DesynchronizedDraws);
        }

        debug!(draws = self.draws; "shared draws agree across the group");
        Ok(())
    }
}

/// A generator private to `rank`, seeded from a value every rank shares.
pub fn local_rng(seed: u64, rank: usize) -> StdRng {
    let mixed = seed ^ (rank as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    StdRng::seed_from_u64(mixed)
}
