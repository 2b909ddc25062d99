use std::{
    fs::File,
    num::{NonZeroUsize, ParseFloatError},
    ops::Range,
    path::Path,
};

use comms::Collective;
use csv::{ReaderBuilder, StringRecord, Trim};
use log::debug;
use ndarray::{Array2, ArrayView1, ArrayView2, s};
use rayon::prelude::*;

use crate::{KMeansErr, Result};

/// Splits `total` samples among `num_workers` and returns the shard for `worker_id`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1, the first `total % num_workers` workers get the extra sample.
pub fn shard_range(total: usize, worker_id: usize, num_workers: usize) -> Range<usize> {
    assert!(num_workers > 0);
    assert!(worker_id < num_workers);

    let base = total / num_workers;
    let rem = total % num_workers;

    let start = worker_id * base + worker_id.min(rem);
    let extra = if worker_id < rem { 1 } else { 0 };
    let end = start + base + extra;

    start..end
}

/// Returns the worker whose shard holds `global_index`, the inverse of `shard_range`.
pub fn owner_of(global_index: usize, total: usize, num_workers: usize) -> usize {
    assert!(num_workers > 0);
    assert!(global_index < total);

    let base = total / num_workers;
    let rem = total % num_workers;

    // The first `rem` shards are one sample longer.
    let long = rem * (base + 1);
    if global_index < long {
        global_index / (base + 1)
    } else {
        rem + (global_index - long) / base
    }
}

/// The contiguous slice of the global dataset a worker owns.
#[derive(Debug, Clone, PartialEq)]
pub struct Shard {
    samples: Array2<f64>,
    global_offset: usize,
    global_n_samples: usize,
}

impl Shard {
    /// Creates a new `Shard`.
    ///
    /// # Arguments
    /// * `samples` - The local samples, one per row.
    /// * `global_offset` - The global index of the first local sample.
    /// * `global_n_samples` - The amount of samples across every shard.
    ///
    /// # Returns
    /// The shard, or `InvalidShape` if it has no features or reaches past `global_n_samples`.
    pub fn new(samples: Array2<f64>, global_offset: usize, global_n_samples: usize) -> Result<Self> {
        if samples.ncols() == 0 {
            return Err(KMeansErr::InvalidShape {
                what: "features per sample",
                got: 0,
                expected: 1,
            });
        }

        let end = global_offset + samples.nrows();
        if end > global_n_samples {
            return Err(KMeansErr::InvalidShape {
                what: "shard end",
                got: end,
                expected: global_n_samples,
            });
        }

        Ok(Self {
            samples,
            global_offset,
            global_n_samples,
        })
    }

    /// Takes this worker's rows out of a dataset every worker holds whole.
    pub fn from_global(data: ArrayView2<f64>, worker_id: usize, num_workers: NonZeroUsize) -> Self {
        let total = data.nrows();
        let range = shard_range(total, worker_id, num_workers.get());

        Self {
            global_offset: range.start,
            samples: data.slice(s![range, ..]).to_owned(),
            global_n_samples: total,
        }
    }

    pub fn samples(&self) -> ArrayView2<'_, f64> {
        self.samples.view()
    }

    pub fn sample(&self, local_index: usize) -> ArrayView1<'_, f64> {
        self.samples.row(local_index)
    }

    pub fn n_local(&self) -> usize {
        self.samples.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.samples.ncols()
    }

    pub fn global_offset(&self) -> usize {
        self.global_offset
    }

    pub fn global_n_samples(&self) -> usize {
        self.global_n_samples
    }

    pub fn global_range(&self) -> Range<usize> {
        self.global_offset..self.global_offset + self.n_local()
    }

    /// Maps a global sample index to a row of this shard, if this shard owns it.
    pub fn local_index(&self, global_index: usize) -> Option<usize> {
        self.global_range()
            .contains(&global_index)
            .then(|| global_index - self.global_offset)
    }

    /// Checks that the shards of the whole group follow the partition rule.
    ///
    /// Every rank gathers every other rank's layout and runs the same checks, so they all fail
    /// or succeed together.
    ///
    /// # Returns
    /// `InvalidShape` if ranks disagree on the sample count or feature count, or if any shard
    /// is not the range `shard_range` assigns to its rank.
    pub fn check_layout(&self, comm: &dyn Collective) -> Result<()> {
        let local = [
            self.global_offset as f64,
            self.n_local() as f64,
            self.n_features() as f64,
            self.global_n_samples as f64,
        ];

        let layouts = comm.all_gather_parts(&local)?;
        let world_size = layouts.len();

        for (rank, layout) in layouts.iter().enumerate() {
            let &[offset, n_local, n_features, total] = layout.as_slice() else {
                return Err(KMeansErr::InvalidShape {
                    what: "shard layout",
                    got: layout.len(),
                    expected: local.len(),
                });
            };

            let (offset, n_local) = (offset as usize, n_local as usize);
            let (n_features, total) = (n_features as usize, total as usize);

            if total != self.global_n_samples {
                return Err(KMeansErr::InvalidShape {
                    what: "global sample count",
                    got: total,
                    expected: self.global_n_samples,
                });
            }

            if n_features != self.n_features() {
                return Err(KMeansErr::InvalidShape {
                    what: "features per sample",
                    got: n_features,
                    expected: self.n_features(),
                });
            }

            let expected = shard_range(total, rank, world_size);
            if offset != expected.start {
                return Err(KMeansErr::InvalidShape {
                    what: "shard offset",
                    got: offset,
                    expected: expected.start,
                });
            }

            if n_local != expected.len() {
                return Err(KMeansErr::InvalidShape {
                    what: "shard length",
                    got: n_local,
                    expected: expected.len(),
                });
            }
        }

        debug!(rank = comm.rank(), n_local = self.n_local(); "shard layout checked");
        Ok(())
    }
}

/// Loads this worker's shard out of a comma separated file.
///
/// Every worker streams the same file twice, once to count the samples and once to parse the
/// rows of its own range, so no worker holds more than its shard. Lines starting with `#` are
/// skipped, fields are trimmed and a first record that does not parse as numbers is taken as a
/// header. Each row must have as many columns as the first sample.
///
/// # Arguments
/// * `path` - The path of the file.
/// * `worker_id` - This worker's rank.
/// * `num_workers` - The amount of workers sharing the file.
///
/// # Returns
/// The shard, or `LoadFailure` if the file can't be read or a row is malformed.
pub fn load_csv_shard(
    path: impl AsRef<Path>,
    worker_id: usize,
    num_workers: NonZeroUsize,
) -> Result<Shard> {
    let path = path.as_ref();
    let fail = |detail: String| KMeansErr::LoadFailure(format!("{}: {detail}", path.display()));

    let mut header = false;
    let mut n_features = None;
    let mut total = 0;

    for (i, record) in csv_reader(path)
        .map_err(|e| fail(e.to_string()))?
        .into_records()
        .enumerate()
    {
        let record = record.map_err(|e| fail(e.to_string()))?;

        if n_features.is_none() {
            match parse_record(&record) {
                Ok(values) => n_features = Some(values.len()),
                Err(_) if i == 0 => {
                    header = true;
                    continue;
                }
                Err(e) => return Err(fail(format!("sample 0: {e}"))),
            }
        }

        total += 1;
    }

    let Some(n_features) = n_features else {
        return Err(fail("the file holds no samples".into()));
    };

    let range = shard_range(total, worker_id, num_workers.get());
    let records: Vec<StringRecord> = csv_reader(path)
        .map_err(|e| fail(e.to_string()))?
        .into_records()
        .skip(range.start + usize::from(header))
        .take(range.len())
        .collect::<csv::Result<_>>()
        .map_err(|e| fail(e.to_string()))?;

    let parsed: Vec<Vec<f64>> = records
        .par_iter()
        .enumerate()
        .map(|(i, record)| {
            let index = range.start + i;
            let values = parse_record(record).map_err(|e| fail(format!("sample {index}: {e}")))?;

            if values.len() != n_features {
                return Err(fail(format!(
                    "sample {index} has {} columns, expected {n_features}",
                    values.len()
                )));
            }

            Ok(values)
        })
        .collect::<Result<_>>()?;

    let data: Vec<f64> = parsed.into_iter().flatten().collect();
    let samples = Array2::from_shape_vec((range.len(), n_features), data)
        .map_err(|e| fail(e.to_string()))?;

    debug!(worker_id = worker_id, start = range.start, end = range.end; "loaded shard");
    Shard::new(samples, range.start, total)
}

fn csv_reader(path: &Path) -> csv::Result<csv::Reader<File>> {
    ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
}

fn parse_record(record: &StringRecord) -> std::result::Result<Vec<f64>, ParseFloatError> {
    record.iter().map(str::parse).collect()
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use ndarray::array;

    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn shard_range_balanced() {
        // total 10, workers 3 => sizes 4,3,3
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
    }

    #[test]
    fn shard_range_with_more_workers_than_samples() {
        assert_eq!(shard_range(2, 0, 4), 0..1);
        assert_eq!(shard_range(2, 1, 4), 1..2);
        assert_eq!(shard_range(2, 2, 4), 2..2);
        assert_eq!(shard_range(2, 3, 4), 2..2);
    }

    #[test]
    fn owner_of_inverts_shard_range() {
        for total in 1..40 {
            for workers in 1..8 {
                for worker in 0..workers {
                    for index in shard_range(total, worker, workers) {
                        assert_eq!(owner_of(index, total, workers), worker);
                    }
                }
            }
        }
    }

    #[test]
    fn from_global_keeps_global_indices() {
        let data = array![[0.], [1.], [2.], [3.], [4.]];
        let shard = Shard::from_global(data.view(), 1, nz(2));

        assert_eq!(shard.global_range(), 3..5);
        assert_eq!(shard.samples(), array![[3.], [4.]]);
        assert_eq!(shard.local_index(4), Some(1));
        assert_eq!(shard.local_index(2), None);
    }

    #[test]
    fn new_rejects_shards_past_the_end() {
        let result = Shard::new(Array2::zeros((3, 2)), 2, 4);
        assert!(matches!(
            result,
            Err(KMeansErr::InvalidShape { got: 5, expected: 4, .. })
        ));
    }

    #[test]
    fn new_rejects_featureless_samples() {
        assert!(Shard::new(Array2::zeros((3, 0)), 0, 3).is_err());
    }

    #[test]
    fn csv_shard_skips_header_and_comments() {
        let path = env::temp_dir().join(format!("shard-header-{}.csv", std::process::id()));
        fs::write(&path, "x,y\n# a comment\n1,2\n3,4\n\n5,6\n").unwrap();

        let first = load_csv_shard(&path, 0, nz(2)).unwrap();
        let second = load_csv_shard(&path, 1, nz(2)).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(first.samples(), array![[1., 2.], [3., 4.]]);
        assert_eq!(second.samples(), array![[5., 6.]]);
        assert_eq!(second.global_offset(), 2);
        assert_eq!(second.global_n_samples(), 3);
    }

    #[test]
    fn csv_shard_rejects_ragged_rows() {
        let path = env::temp_dir().join(format!("shard-ragged-{}.csv", std::process::id()));
        fs::write(&path, "1,2\n3\n").unwrap();

        let result = load_csv_shard(&path, 0, nz(1));
        fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(KMeansErr::LoadFailure(_))));
    }

    #[test]
    fn csv_shard_reads_quoted_fields() {
        let path = env::temp_dir().join(format!("shard-quoted-{}.csv", std::process::id()));
        fs::write(&path, "\"x\",\"y\"\n\"1.5\",\"-2\"\n3 , 4\n").unwrap();

        let shard = load_csv_shard(&path, 0, nz(1)).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(shard.samples(), array![[1.5, -2.], [3., 4.]]);
    }

    #[test]
    fn csv_shard_only_parses_its_own_range() {
        let path = env::temp_dir().join(format!("shard-range-{}.csv", std::process::id()));
        fs::write(&path, "0,0\n1,1\n2,2\n3\n").unwrap();

        let first = load_csv_shard(&path, 0, nz(2));
        let second = load_csv_shard(&path, 1, nz(2));
        fs::remove_file(&path).unwrap();

        assert_eq!(first.unwrap().samples(), array![[0., 0.], [1., 1.]]);
        assert!(matches!(second, Err(KMeansErr::LoadFailure(detail)) if detail.contains("sample 3")));
    }

    #[test]
    fn missing_csv_is_a_load_failure() {
        let result = load_csv_shard("/definitely/not/here.csv", 0, nz(1));
        assert!(matches!(result, Err(KMeansErr::LoadFailure(_))));
    }
}
