use std::collections::HashSet;

use frbrizer_core::config::{FeatureConfig, KMeansConfig};
use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::features::FeatureTable;
use crate::vectorize::feature_matrix;
use crate::{ClusterError, Result};

/// Result of one k-means fit over a feature matrix.
#[derive(Debug, Clone)]
pub struct Clustering {
    pub labels: Vec<usize>,
    pub inertia: f64,
}

/// Weighted TF-IDF features fed into seeded k-means++ with restarts.
pub struct KMeansPipeline<'a> {
    features: &'a FeatureConfig,
    kmeans: &'a KMeansConfig,
}

impl<'a> KMeansPipeline<'a> {
    pub fn new(features: &'a FeatureConfig, kmeans: &'a KMeansConfig) -> Self {
        Self { features, kmeans }
    }

    pub fn matrix(&self, table: &FeatureTable) -> Array2<f64> {
        feature_matrix(table, self.features)
    }

    /// Cluster label per row, in row order.
    pub fn cluster(&self, table: &FeatureTable, k: usize) -> Result<Vec<usize>> {
        Ok(self.fit(&self.matrix(table), k)?.labels)
    }

    /// Within-cluster sum of squares at `k`.
    pub fn cluster_score(&self, table: &FeatureTable, k: usize) -> Result<f64> {
        Ok(self.fit(&self.matrix(table), k)?.inertia)
    }

    /// Fits `k` clusters over a precomputed matrix. Fails with
    /// [`ClusterError::Degenerate`] when `k` is zero or exceeds the number of
    /// distinct rows.
    pub fn fit(&self, records: &Array2<f64>, k: usize) -> Result<Clustering> {
        let distinct = distinct_rows(records);
        if k == 0 || k > distinct {
            return Err(ClusterError::Degenerate {
                requested: k,
                distinct,
            });
        }
        if k == 1 {
            return Ok(single_cluster(records));
        }

        let rng = StdRng::seed_from_u64(self.kmeans.seed);
        let dataset = DatasetBase::from(records.clone());
        let model = KMeans::params_with_rng(k, rng)
            .n_runs(self.kmeans.n_runs.max(1))
            .max_n_iterations(self.kmeans.max_iterations)
            .tolerance(self.kmeans.tolerance)
            .fit(&dataset)
            .map_err(|e| ClusterError::KMeans(format!("fit failed: {e}")))?;

        let predicted: Array1<usize> = model.predict(records);
        let labels = predicted.to_vec();
        let inertia = inertia(records, model.centroids(), &labels);
        Ok(Clustering { labels, inertia })
    }
}

fn single_cluster(records: &Array2<f64>) -> Clustering {
    let labels = vec![0; records.nrows()];
    let inertia = match records.mean_axis(Axis(0)) {
        Some(centroid) => {
            let centroid = centroid.insert_axis(Axis(0));
            inertia(records, &centroid, &labels)
        }
        None => 0.0,
    };
    Clustering { labels, inertia }
}

/// Sum of squared distances from each row to its assigned centroid.
pub fn inertia(records: &Array2<f64>, centroids: &Array2<f64>, labels: &[usize]) -> f64 {
    records
        .outer_iter()
        .zip(labels)
        .map(|(row, &label)| {
            let diff = &row - &centroids.row(label);
            diff.dot(&diff)
        })
        .sum()
}

/// Number of distinct row vectors, compared bitwise.
pub fn distinct_rows(records: &Array2<f64>) -> usize {
    records
        .outer_iter()
        .map(|row| row.iter().map(|v| v.to_bits()).collect::<Vec<u64>>())
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn pipeline_configs() -> (FeatureConfig, KMeansConfig) {
        (FeatureConfig::default(), KMeansConfig::default())
    }

    #[test]
    fn test_degenerate_requests_are_rejected() {
        let (f, k) = pipeline_configs();
        let pipeline = KMeansPipeline::new(&f, &k);
        let records = array![[0.0, 0.0], [0.0, 0.0], [1.0, 1.0]];

        assert!(pipeline.fit(&records, 0).unwrap_err().is_degenerate());
        assert!(matches!(
            pipeline.fit(&records, 3),
            Err(ClusterError::Degenerate { requested: 3, distinct: 2 })
        ));
        assert!(pipeline.fit(&records, 2).is_ok());
    }

    #[test]
    fn test_two_clear_groups() {
        let (f, k) = pipeline_configs();
        let pipeline = KMeansPipeline::new(&f, &k);
        let records = array![[0.0, 0.0], [0.1, 0.0], [5.0, 5.0], [5.1, 5.0]];

        let result = pipeline.fit(&records, 2).unwrap();
        assert_eq!(result.labels[0], result.labels[1]);
        assert_eq!(result.labels[2], result.labels[3]);
        assert_ne!(result.labels[0], result.labels[2]);
        // centroids settle within the convergence tolerance, not exactly
        assert!((result.inertia - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_single_cluster_inertia() {
        let (f, k) = pipeline_configs();
        let pipeline = KMeansPipeline::new(&f, &k);
        let records = array![[0.0], [2.0]];
        let result = pipeline.fit(&records, 1).unwrap();
        assert_eq!(result.labels, vec![0, 0]);
        assert!((result.inertia - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let (f, k) = pipeline_configs();
        let pipeline = KMeansPipeline::new(&f, &k);
        let records = array![[0.0, 1.0], [0.2, 0.9], [3.0, 0.0], [3.1, 0.2], [9.0, 9.0], [8.8, 9.1]];
        let first = pipeline.fit(&records, 3).unwrap();
        let second = pipeline.fit(&records, 3).unwrap();
        assert_eq!(first.labels, second.labels);
        assert_eq!(first.inertia, second.inertia);
    }

    #[test]
    fn test_table_entry_points_agree_with_fit() {
        use crate::features::{FeatureRow, FeatureTable};
        use uuid::Uuid;

        let (f, k) = pipeline_configs();
        let pipeline = KMeansPipeline::new(&f, &k);
        let row = |publisher: &str, year: i32| FeatureRow {
            place: "london".to_string(),
            publisher: publisher.to_string(),
            edition: None,
            pub_date: year,
            uuid: Uuid::now_v7(),
        };
        let table = FeatureTable::new(vec![row("penguin", 1960), row("penguin", 1960), row("faber", 2004)]);

        let labels = pipeline.cluster(&table, 2).unwrap();
        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[0], labels[2]);
        assert!(pipeline.cluster_score(&table, 2).unwrap().abs() < 1e-12);
        assert!(pipeline.cluster_score(&table, 1).unwrap() > 0.0);
        assert!(pipeline.cluster(&table, 3).unwrap_err().is_degenerate());
    }

    #[test]
    fn test_distinct_rows() {
        assert_eq!(distinct_rows(&array![[1.0, 2.0], [1.0, 2.0], [2.0, 1.0]]), 2);
        assert_eq!(distinct_rows(&Array2::<f64>::zeros((3, 0))), 1);
        assert_eq!(distinct_rows(&Array2::<f64>::zeros((0, 2))), 0);
    }
}
