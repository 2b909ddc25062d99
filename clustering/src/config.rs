use serde::{Deserialize, Serialize};

use crate::{KMeansErr, Result, init::DEFAULT_OVERSAMPLING};

/// Which initializer seeds the centroids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitSpec {
    #[default]
    Random,
    KmeansPlusplus,
    Given { centroids: Vec<Vec<f64>> },
}

/// Which `DistanceMetric` assigns samples to centroids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSpec {
    #[default]
    Euclidean,
    SquaredEuclidean,
}

/// What to do with a centroid no sample was assigned to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyClusterPolicy {
    /// Keep the centroid where it was.
    #[default]
    Keep,
    /// Divide by the zero count, leaving a row of NaN.
    Propagate,
    /// Move the centroid onto the sample farthest from its own centroid.
    ReseedFarthest,
}

/// The configuration of a K-Means run, identical on every rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansConfig {
    pub k: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default)]
    pub init: InitSpec,
    #[serde(default)]
    pub metric: MetricSpec,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub empty_cluster: EmptyClusterPolicy,
    #[serde(default = "default_oversampling")]
    pub oversampling: f64,
}

fn default_max_iter() -> usize {
    100
}

fn default_tolerance() -> f64 {
    1e-4
}

fn default_oversampling() -> f64 {
    DEFAULT_OVERSAMPLING
}

impl KMeansConfig {
    /// Creates a new `KMeansConfig` with every optional setting at its default.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: default_max_iter(),
            init: InitSpec::default(),
            metric: MetricSpec::default(),
            tolerance: default_tolerance(),
            seed: 0,
            empty_cluster: EmptyClusterPolicy::default(),
            oversampling: default_oversampling(),
        }
    }

    /// Parses and validates a json document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| KMeansErr::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every setting that doesn't depend on the data.
    ///
    /// # Returns
    /// `InvalidConfig` naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let invalid = |detail: String| Err(KMeansErr::InvalidConfig(detail));

        if self.k < 2 {
            return invalid(format!("k must be at least 2, got {}", self.k));
        }

        if self.max_iter == 0 {
            return invalid("max_iter must be at least 1".into());
        }

        if !(0. ..1.).contains(&self.tolerance) {
            return invalid(format!("tolerance must be in [0, 1), got {}", self.tolerance));
        }

        if !(self.oversampling.is_finite() && self.oversampling > 0.) {
            return invalid(format!(
                "oversampling must be positive, got {}",
                self.oversampling
            ));
        }

        if let InitSpec::Given { centroids } = &self.init {
            if centroids.len() != self.k {
                return invalid(format!(
                    "{} centroids were given for k = {}",
                    centroids.len(),
                    self.k
                ));
            }

            let n_features = centroids[0].len();
            if n_features == 0 || centroids.iter().any(|c| c.len() != n_features) {
                return invalid("the given centroids must share a non zero length".into());
            }

            if centroids.iter().flatten().any(|x| !x.is_finite()) {
                return invalid("the given centroids must be finite".into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = KMeansConfig::from_json(r#"{ "k": 3 }"#).unwrap();
        assert_eq!(config, KMeansConfig::new(3));
    }

    #[test]
    fn full_document() {
        let json = r#"{
            "k": 2,
            "max_iter": 7,
            "init": { "given": { "centroids": [[0, 0], [1, 1]] } },
            "metric": "squared_euclidean",
            "tolerance": 0,
            "seed": 9,
            "empty_cluster": "reseed_farthest"
        }"#;

        let config = KMeansConfig::from_json(json).unwrap();

        assert_eq!(config.max_iter, 7);
        assert_eq!(config.metric, MetricSpec::SquaredEuclidean);
        assert_eq!(config.empty_cluster, EmptyClusterPolicy::ReseedFarthest);
        assert_eq!(
            config.init,
            InitSpec::Given {
                centroids: vec![vec![0., 0.], vec![1., 1.]]
            }
        );
    }

    #[test]
    fn kmeans_plusplus_spelling() {
        let config = KMeansConfig::from_json(r#"{ "k": 2, "init": "kmeans_plusplus" }"#).unwrap();
        assert_eq!(config.init, InitSpec::KmeansPlusplus);
    }

    #[test]
    fn rejects_bad_settings() {
        let bad = [
            r#"{ "k": 1 }"#,
            r#"{ "k": 2, "max_iter": 0 }"#,
            r#"{ "k": 2, "tolerance": 1 }"#,
            r#"{ "k": 2, "tolerance": -0.1 }"#,
            r#"{ "k": 2, "oversampling": 0 }"#,
            r#"{ "k": 2, "init": { "given": { "centroids": [[0, 0]] } } }"#,
            r#"{ "k": 2, "init": { "given": { "centroids": [[0, 0], [1]] } } }"#,
            r#"{ "k": 2, "metric": "manhattan" }"#,
            r#"{ "max_iter": 3 }"#,
        ];

        for json in bad {
            assert!(
                matches!(KMeansConfig::from_json(json), Err(KMeansErr::InvalidConfig(_))),
                "{json} was accepted"
            );
        }
    }
}
