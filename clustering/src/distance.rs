use std::fmt::Debug;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, Axis, Ix2, Zip};

use crate::{KMeansErr, Result};

/// Measures how far every sample of a batch lies from every centroid.
pub trait DistanceMetric: Send + Sync + Debug {
    /// Computes the pairwise distances between `centroids` and `samples`.
    ///
    /// # Arguments
    /// * `centroids` - A k×f matrix.
    /// * `samples` - An n×f matrix.
    ///
    /// # Returns
    /// A k×n matrix whose entry `[j, i]` is the distance from centroid `j` to sample `i`, or
    /// `InvalidShape` if the feature counts differ. Non finite inputs are propagated.
    fn pairwise(&self, centroids: ArrayView2<f64>, samples: ArrayView2<f64>)
    -> Result<Array2<f64>>;

    /// The distance turned into the quantity K-Means minimizes.
    fn squared(&self, distance: f64) -> f64;
}

/// sqrt(Σ(c − s)²).
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

/// Σ(c − s)², same ordering as `Euclidean` without the root.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredEuclidean;

impl DistanceMetric for Euclidean {
    fn pairwise(
        &self,
        centroids: ArrayView2<f64>,
        samples: ArrayView2<f64>,
    ) -> Result<Array2<f64>> {
        pairwise_with(centroids, samples, |c, s| squared_norm(c, s).sqrt())
    }

    fn squared(&self, distance: f64) -> f64 {
        distance * distance
    }
}

impl DistanceMetric for SquaredEuclidean {
    fn pairwise(
        &self,
        centroids: ArrayView2<f64>,
        samples: ArrayView2<f64>,
    ) -> Result<Array2<f64>> {
        pairwise_with(centroids, samples, squared_norm)
    }

    fn squared(&self, distance: f64) -> f64 {
        distance
    }
}

fn squared_norm(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn pairwise_with<F>(
    centroids: ArrayView2<f64>,
    samples: ArrayView2<f64>,
    dist: F,
) -> Result<Array2<f64>>
where
    F: Fn(ArrayView1<f64>, ArrayView1<f64>) -> f64 + Sync,
{
    if centroids.ncols() != samples.ncols() {
        return Err(KMeansErr::InvalidShape {
            what: "sample features",
            got: samples.ncols(),
            expected: centroids.ncols(),
        });
    }

    let mut out = Array2::zeros((centroids.nrows(), samples.nrows()));

    // One column per sample, samples outnumber centroids by far.
    Zip::from(out.columns_mut())
        .and(samples.rows())
        .par_for_each(|mut column, sample| {
            column
                .iter_mut()
                .zip(centroids.rows())
                .for_each(|(d, centroid)| *d = dist(centroid, sample));
        });

    Ok(out)
}

/// Views an arbitrary array as a batch of samples.
///
/// A 1-D array is taken as a single sample.
///
/// # Returns
/// The 2-D view, or `InvalidShape` if the array has more than 2 dimensions or none.
pub fn check_dims(view: ArrayViewD<'_, f64>) -> Result<ArrayView2<'_, f64>> {
    let ndim = view.ndim();
    let invalid = || KMeansErr::InvalidShape {
        what: "dimensions",
        got: ndim,
        expected: 2,
    };

    match ndim {
        1 => {
            let len = view.len();
            view.into_shape_with_order((1, len)).map_err(|_| invalid())
        }
        2 => view.into_dimensionality::<Ix2>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Collapses every axis after the first into the feature axis.
///
/// Only for callers that explicitly want it, `check_dims` rejects such arrays.
pub fn flatten_to_2d(view: ArrayViewD<'_, f64>) -> Result<Array2<f64>> {
    let rows = view.shape().first().copied().unwrap_or(1);
    let cols = view.shape().iter().skip(1).product::<usize>();

    let flat = view
        .to_shape((rows, cols))
        .map_err(|_| KMeansErr::InvalidShape {
            what: "flattened elements",
            got: view.len(),
            expected: rows * cols,
        })?;

    Ok(flat.into_owned())
}

/// The index of the smallest entry of every column, the lowest index wins ties.
pub fn argmin_columns(distances: ArrayView2<f64>) -> Vec<usize> {
    distances
        .axis_iter(Axis(1))
        .map(|column| {
            let mut best = 0;
            for (j, &d) in column.iter().enumerate().skip(1) {
                if d < column[best] {
                    best = j;
                }
            }
            best
        })
        .collect()
}

/// The smallest entry of every column.
pub fn min_columns(distances: ArrayView2<f64>) -> Array1<f64> {
    distances.fold_axis(Axis(0), f64::INFINITY, |&acc, &d| acc.min(d))
}
