use std::num::NonZeroUsize;

use comms::Collective;
use log::info;
use ndarray::{ArrayView2, ArrayViewD};

use crate::{
    CentroidSet, KMeansConfig, KMeansErr, Result, Shard,
    builder::KMeansBuilder,
    distance::{DistanceMetric, argmin_columns, check_dims},
    init::Initializer,
    lloyd::{self, FitReport, Lloyd},
    rng::SharedRng,
};

/// A K-Means model fitted over a dataset spread across a group.
///
/// `fit` is a collective: every rank of the group must call it with its own shard and the same
/// configuration. Once fitted every rank holds the same centroids and predictions are local.
#[derive(Debug)]
pub struct KMeans {
    config: KMeansConfig,
    metric: Box<dyn DistanceMetric>,
    initializer: Box<dyn Initializer>,
    centroids: Option<CentroidSet>,
    report: Option<FitReport>,
}

impl KMeans {
    /// Creates a new unfitted model.
    ///
    /// # Returns
    /// The model, or `InvalidConfig` if the configuration is not valid.
    pub fn new(config: KMeansConfig) -> Result<Self> {
        KMeansBuilder::new().build(config)
    }

    /// Creates a model that predicts with previously fitted centroids.
    pub fn with_centroids(config: KMeansConfig, centroids: CentroidSet) -> Result<Self> {
        let mut model = Self::new(config)?;
        model.centroids = Some(centroids);
        Ok(model)
    }

    pub(crate) fn from_parts(
        config: KMeansConfig,
        metric: Box<dyn DistanceMetric>,
        initializer: Box<dyn Initializer>,
    ) -> Self {
        Self {
            config,
            metric,
            initializer,
            centroids: None,
            report: None,
        }
    }

    /// Fits the model over the group's dataset.
    ///
    /// # Arguments
    /// * `shard` - This rank's part of the dataset.
    /// * `comm` - The group, every rank must be calling `fit`.
    ///
    /// # Returns
    /// The report of the run, identical on every rank.
    pub fn fit(&mut self, shard: &Shard, comm: &dyn Collective) -> Result<FitReport> {
        shard.check_layout(comm)?;

        if shard.global_n_samples() == 0 {
            return Err(KMeansErr::InvalidConfig("the dataset is empty".into()));
        }

        let max_iter = NonZeroUsize::new(self.config.max_iter)
            .ok_or_else(|| KMeansErr::InvalidConfig("max_iter must be at least 1".into()))?;

        let mut rng = SharedRng::new(self.config.seed);
        let init = self
            .initializer
            .seed(shard, self.config.k, comm, &mut rng)?;

        info!(rank = comm.rank(), k = init.k(); "seeding finished");

        let mut engine = Lloyd::new(
            self.metric.as_ref(),
            max_iter,
            self.config.tolerance,
            self.config.empty_cluster,
        );
        let (centroids, report) = engine.run(shard, init, comm)?;

        rng.verify(comm)?;

        self.centroids = Some(centroids);
        self.report = Some(report.clone());
        Ok(report)
    }

    /// Assigns every sample to its closest centroid, without talking to the group.
    ///
    /// # Returns
    /// One cluster index per sample, or `NotFitted` if there are no centroids yet.
    pub fn predict(&self, samples: ArrayView2<f64>) -> Result<Vec<usize>> {
        let centroids = self.centroids.as_ref().ok_or(KMeansErr::NotFitted)?;
        let distances = self.metric.pairwise(centroids.view(), samples)?;
        Ok(argmin_columns(distances.view()))
    }

    /// Same as `predict` for arrays of unknown dimensionality, a 1-D array is one sample.
    pub fn predict_array(&self, samples: ArrayViewD<f64>) -> Result<Vec<usize>> {
        self.predict(check_dims(samples)?)
    }

    /// The inertia of the group's dataset under the current centroids.
    ///
    /// Unlike `predict` this is a collective.
    pub fn score(&self, shard: &Shard, comm: &dyn Collective) -> Result<f64> {
        let centroids = self.centroids.as_ref().ok_or(KMeansErr::NotFitted)?;
        lloyd::inertia(self.metric.as_ref(), shard, centroids, comm)
    }

    pub fn centroids(&self) -> Option<&CentroidSet> {
        self.centroids.as_ref()
    }

    pub fn report(&self) -> Option<&FitReport> {
        self.report.as_ref()
    }

    pub fn config(&self) -> &KMeansConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use comms::LocalGroup;
    use ndarray::{Array2, array};

    use super::*;
    use crate::{EmptyClusterPolicy, InitSpec, lloyd::FitState};

    fn solo() -> LocalGroup {
        LocalGroup::new_group(NonZeroUsize::MIN).remove(0)
    }

    #[test]
    fn predict_before_fit_fails() {
        let model = KMeans::new(KMeansConfig::new(2)).unwrap();
        assert!(matches!(
            model.predict(array![[0., 0.]].view()),
            Err(KMeansErr::NotFitted)
        ));
    }

    #[test]
    fn invalid_config_is_rejected_before_fitting() {
        assert!(matches!(
            KMeans::new(KMeansConfig::new(1)),
            Err(KMeansErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn fit_with_given_centroids() {
        let data = array![[-1., -1.], [-2., -1.], [1., 1.], [2., 1.]];
        let shard = Shard::new(data.clone(), 0, 4).unwrap();

        let mut config = KMeansConfig::new(2);
        config.init = InitSpec::Given {
            centroids: vec![vec![-1., -1.], vec![1., 1.]],
        };
        config.empty_cluster = EmptyClusterPolicy::Propagate;

        let mut model = KMeans::new(config).unwrap();
        let report = model.fit(&shard, &solo()).unwrap();

        assert_eq!(report.state, FitState::Converged);
        assert_eq!(model.predict(data.view()).unwrap(), [0, 0, 1, 1]);
        assert_eq!(model.score(&shard, &solo()).unwrap(), report.inertia);
        assert_eq!(model.report(), Some(&report));
    }

    #[test]
    fn given_centroids_must_match_the_features() {
        let shard = Shard::new(Array2::zeros((4, 3)), 0, 4).unwrap();

        let mut config = KMeansConfig::new(2);
        config.init = InitSpec::Given {
            centroids: vec![vec![0., 0.], vec![1., 1.]],
        };

        let mut model = KMeans::new(config).unwrap();
        assert!(matches!(
            model.fit(&shard, &solo()),
            Err(KMeansErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn predict_array_takes_a_single_sample() {
        let centroids = CentroidSet::from_matrix(array![[0.], [10.]]).unwrap();
        let model = KMeans::with_centroids(KMeansConfig::new(2), centroids).unwrap();

        let sample = array![9.].into_dyn();
        assert_eq!(model.predict_array(sample.view()).unwrap(), [1]);
    }
}
