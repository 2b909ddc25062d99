#![allow(dead_code)]

use std::{num::NonZeroUsize, thread};

use clustering::rng::SharedRng;
use comms::LocalGroup;
use ndarray::{Array2, Axis};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

pub const CENTERS: [[f64; 2]; 3] = [[0., 0.], [10., 10.], [-10., 10.]];
pub const PER_BLOB: usize = 100;

/// Runs `f` once per rank of an in-process group and returns the results in rank order.
pub fn run_group<T, F>(world_size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalGroup) -> T + Sync,
{
    let group = LocalGroup::new_group(NonZeroUsize::new(world_size).unwrap());

    thread::scope(|s| {
        let handles: Vec<_> = group
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Three tight gaussian blobs, stored blob after blob.
pub fn blobs(seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0., 0.5).unwrap();

    Array2::from_shape_fn((CENTERS.len() * PER_BLOB, 2), |(i, j)| {
        CENTERS[i / PER_BLOB][j] + noise.sample(&mut rng)
    })
}

/// The mean of every blob, in blob order.
pub fn blob_means(data: &Array2<f64>) -> Array2<f64> {
    let mut means = Array2::zeros((CENTERS.len(), data.ncols()));
    for (b, chunk) in data.axis_chunks_iter(Axis(0), PER_BLOB).enumerate() {
        means.row_mut(b).assign(&chunk.mean_axis(Axis(0)).unwrap());
    }
    means
}

/// The first seed whose first draws over `0..n` are `wanted`.
pub fn seed_drawing(n: usize, wanted: impl Fn(&[usize]) -> bool, draws: usize) -> u64 {
    (0..100_000)
        .find(|&seed| {
            let mut rng = SharedRng::new(seed);
            let picked: Vec<_> = (0..draws).map(|_| rng.index(n)).collect();
            wanted(&picked)
        })
        .expect("no seed draws the wanted indices")
}

/// Pairs every row of `found` with the closest row of `expected` and returns the largest gap.
pub fn max_gap(found: &Array2<f64>, expected: &Array2<f64>) -> f64 {
    found
        .rows()
        .into_iter()
        .map(|row| {
            expected
                .rows()
                .into_iter()
                .map(|e| (&row - &e).mapv(f64::abs).fold(0f64, |a, &b| a.max(b)))
                .fold(f64::INFINITY, f64::min)
        })
        .fold(0., f64::max)
}
