use serde::{Deserialize, Serialize};

use crate::{CommErr, Result};

/// The element-wise combination applied by a reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    /// The neutral element of the operation.
    pub fn identity(self) -> f64 {
        match self {
            ReduceOp::Sum => 0.,
            ReduceOp::Min => f64::INFINITY,
            ReduceOp::Max => f64::NEG_INFINITY,
        }
    }

    /// Combines two values.
    pub fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }
}

/// A group of ranks running the same program in lockstep.
///
/// Every method is a blocking collective: all ranks of the group must call it, in the same
/// order, or the group hangs. Implementors only provide `all_gather_parts`, the rest is derived
/// from it by folding the gathered parts in ascending rank order, which makes every rank
/// compute a bit-identical result.
pub trait Collective: Send + Sync {
    /// The index of this member inside the group.
    fn rank(&self) -> usize;

    /// The amount of members in the group.
    fn world_size(&self) -> usize;

    /// Hands `local` to every member and returns every member's contribution, indexed by rank.
    ///
    /// # Arguments
    /// * `local` - This rank's contribution, may be empty.
    ///
    /// # Returns
    /// A vec of `world_size` parts, or an error if the transport failed.
    fn all_gather_parts(&self, local: &[f64]) -> Result<Vec<Vec<f64>>>;

    /// Combines `local` element-wise across the group.
    ///
    /// # Arguments
    /// * `local` - This rank's contribution, all ranks must contribute the same length.
    /// * `op` - The reduction to apply.
    ///
    /// # Returns
    /// The global combination, identical on every rank, or `CommErr::ShapeMismatch`.
    fn all_reduce(&self, local: &[f64], op: ReduceOp) -> Result<Vec<f64>> {
        let parts = self.all_gather_parts(local)?;
        let len = uniform_len(&parts)?;
        Ok(fold(&parts, len, op))
    }

    /// Same as `all_reduce` but overwrites `buf` with the result.
    fn all_reduce_in_place(&self, buf: &mut [f64], op: ReduceOp) -> Result<()> {
        let reduced = self.all_reduce(buf, op)?;
        buf.copy_from_slice(&reduced);
        Ok(())
    }

    /// Reduces a single value across the group.
    fn all_reduce_scalar(&self, value: f64, op: ReduceOp) -> Result<f64> {
        Ok(self.all_reduce(&[value], op)?[0])
    }

    /// Combines the contributions of every rank below this one.
    ///
    /// # Returns
    /// The combination of ranks `0..rank`, the identity of `op` at rank 0.
    fn exclusive_scan(&self, local: &[f64], op: ReduceOp) -> Result<Vec<f64>> {
        let parts = self.all_gather_parts(local)?;
        let len = uniform_len(&parts)?;
        Ok(fold(&parts[..self.rank()], len, op))
    }

    /// Concatenates every rank's contribution in rank order.
    ///
    /// Contributions may have different lengths, including zero.
    fn all_gather_varying(&self, local: &[f64]) -> Result<Vec<f64>> {
        Ok(self.all_gather_parts(local)?.concat())
    }

    /// Blocks until every rank reaches this point.
    fn barrier(&self) -> Result<()> {
        self.all_gather_parts(&[]).map(|_| ())
    }
}

fn uniform_len(parts: &[Vec<f64>]) -> Result<usize> {
    let expected = parts.first().map(Vec::len).unwrap_or_default();

    match parts.iter().position(|part| part.len() != expected) {
        Some(rank) => Err(CommErr::ShapeMismatch {
            rank,
            got: parts[rank].len(),
            expected,
        }),
        None => Ok(expected),
    }
}

fn fold(parts: &[Vec<f64>], len: usize, op: ReduceOp) -> Vec<f64> {
    let mut acc = vec![op.identity(); len];

    for part in parts {
        acc.iter_mut()
            .zip(part)
            .for_each(|(a, &x)| *a = op.combine(*a, x));
    }

    acc
}
