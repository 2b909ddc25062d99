use comms::{Collective, ReduceOp};
use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::{KMeansErr, Result};

/// A k×f centroid matrix every rank of the group holds an identical copy of.
///
/// There's no way to mutate it in place: new sets come out of a collective or out of data
/// every rank already agrees on.
#[derive(Debug, Clone, PartialEq)]
pub struct CentroidSet {
    matrix: Array2<f64>,
}

impl CentroidSet {
    /// Creates a set out of a matrix the caller guarantees is replicated.
    ///
    /// # Returns
    /// The set, or `InvalidShape` if the matrix has no rows or no columns.
    pub fn from_matrix(matrix: Array2<f64>) -> Result<Self> {
        if matrix.nrows() == 0 {
            return Err(KMeansErr::InvalidShape {
                what: "centroids",
                got: 0,
                expected: 1,
            });
        }

        if matrix.ncols() == 0 {
            return Err(KMeansErr::InvalidShape {
                what: "centroid features",
                got: 0,
                expected: 1,
            });
        }

        Ok(Self { matrix })
    }

    /// Reduces a locally built matrix across the group and wraps the result.
    pub(crate) fn reduce(comm: &dyn Collective, local: &Array2<f64>, op: ReduceOp) -> Result<Self> {
        Self::from_matrix(all_reduce_matrix(comm, local, op)?)
    }

    pub fn k(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    pub fn centroid(&self, j: usize) -> ArrayView1<'_, f64> {
        self.matrix.row(j)
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.matrix
    }
}

/// Runs an allreduce over a whole matrix, keeping its shape.
pub(crate) fn all_reduce_matrix(
    comm: &dyn Collective,
    local: &Array2<f64>,
    op: ReduceOp,
) -> Result<Array2<f64>> {
    let flat: Vec<f64> = local.iter().copied().collect();
    let reduced = comm.all_reduce(&flat, op)?;

    Array2::from_shape_vec(local.dim(), reduced).map_err(|_| KMeansErr::InvalidShape {
        what: "reduced matrix",
        got: flat.len(),
        expected: local.len(),
    })
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn empty_sets_are_rejected() {
        assert!(CentroidSet::from_matrix(Array2::zeros((0, 3))).is_err());
        assert!(CentroidSet::from_matrix(Array2::zeros((3, 0))).is_err());
    }

    #[test]
    fn accessors() {
        let set = CentroidSet::from_matrix(array![[1., 2.], [3., 4.], [5., 6.]]).unwrap();

        assert_eq!(set.k(), 3);
        assert_eq!(set.n_features(), 2);
        assert_eq!(set.centroid(1), array![3., 4.]);
    }
}
