use log::debug;
use ndarray::Array2;

use crate::{
    InitSpec, KMeans, KMeansConfig, KMeansErr, MetricSpec, Result,
    distance::{DistanceMetric, Euclidean, SquaredEuclidean},
    init::{GivenCentroids, Initializer, KMeansPlusPlus, RandomInit},
};

/// Builds `KMeans` models given a configuration.
#[derive(Default)]
pub struct KMeansBuilder;

impl KMeansBuilder {
    /// Creates a new `KMeansBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new unfitted `KMeans` following a configuration.
    ///
    /// # Arguments
    /// * `config` - The configuration of the run, validated before anything is built.
    pub fn build(&self, config: KMeansConfig) -> Result<KMeans> {
        config.validate()?;

        let metric = self.resolve_metric(config.metric);
        let initializer = self.resolve_initializer(&config)?;
        debug!(k = config.k; "built k-means model");

        Ok(KMeans::from_parts(config, metric, initializer))
    }

    fn resolve_metric(&self, spec: MetricSpec) -> Box<dyn DistanceMetric> {
        match spec {
            MetricSpec::Euclidean => Box::new(Euclidean),
            MetricSpec::SquaredEuclidean => Box::new(SquaredEuclidean),
        }
    }

    fn resolve_initializer(&self, config: &KMeansConfig) -> Result<Box<dyn Initializer>> {
        let initializer: Box<dyn Initializer> = match &config.init {
            InitSpec::Random => Box::new(RandomInit),
            InitSpec::KmeansPlusplus => Box::new(KMeansPlusPlus::new(config.oversampling)),
            InitSpec::Given { centroids } => {
                Box::new(GivenCentroids::new(self.resolve_matrix(centroids)?))
            }
        };

        Ok(initializer)
    }

    fn resolve_matrix(&self, rows: &[Vec<f64>]) -> Result<Array2<f64>> {
        let n_features = rows.first().map(Vec::len).unwrap_or_default();
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();

        Array2::from_shape_vec((rows.len(), n_features), flat)
            .map_err(|e| KMeansErr::InvalidConfig(format!("malformed centroids: {e}")))
    }
}
