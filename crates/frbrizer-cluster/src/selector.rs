//! Elbow-method choice of the cluster count.
//!
//! Inertia is evaluated on a coarse grid of candidate `k`, the elbow of that
//! curve is located by perpendicular distance from the chord joining its end
//! points, and a unit-step pass around the elbow refines the choice.

use ndarray::Array2;
use tracing::{debug, warn};

use crate::features::FeatureTable;
use crate::kmeans::KMeansPipeline;
use crate::{ClusterError, Result};

/// Chosen cluster count and the final labels at that count.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub k: usize,
    pub labels: Vec<usize>,
}

/// Upper bound of the candidate range, scaled down for large pools.
pub fn candidate_max_k(n: usize) -> usize {
    let max_k = n.max(2);
    if max_k > 1000 {
        max_k * 2 / 9
    } else if max_k > 500 {
        max_k * 3 / 9
    } else if max_k > 250 {
        max_k * 4 / 9
    } else {
        max_k
    }
}

pub fn coarse_step(max_k: usize) -> usize {
    let log = (max_k as f64).ln();
    if log > 1.6 {
        ((log.powf(1.5) - 1.0).ceil() as usize).max(1)
    } else {
        1
    }
}

/// `k` of the point farthest from the chord joining the first and last
/// points; the first maximum wins. A single point is its own elbow.
pub fn elbow(points: &[(usize, f64)]) -> usize {
    let (first, last) = match points {
        [] => return 1,
        [only] => return only.0,
        [first, .., last] => (*first, *last),
    };

    let (x1, y1) = (first.0 as f64, first.1);
    let (x2, y2) = (last.0 as f64, last.1);
    let denominator = ((y2 - y1).powi(2) + (x2 - x1).powi(2)).sqrt();

    let mut best = points[0].0;
    let mut best_distance = f64::NEG_INFINITY;
    for &(k, score) in points {
        let x = k as f64;
        let distance = ((y2 - y1) * x - (x2 - x1) * score + x2 * y1 - y2 * x1).abs() / denominator;
        if distance > best_distance {
            best = k;
            best_distance = distance;
        }
    }
    best
}

/// Inertia at each `k` in order, stopping at the first degenerate request.
fn score_range(
    pipeline: &KMeansPipeline<'_>,
    matrix: &Array2<f64>,
    ks: impl IntoIterator<Item = usize>,
) -> Result<Vec<(usize, f64)>> {
    let mut points = Vec::new();
    for k in ks {
        match pipeline.fit(matrix, k) {
            Ok(clustering) => points.push((k, clustering.inertia)),
            Err(e) if e.is_degenerate() => {
                debug!(k, "candidate range truncated at degenerate k");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(points)
}

fn select_k_on(pipeline: &KMeansPipeline<'_>, matrix: &Array2<f64>) -> Result<usize> {
    let n = matrix.nrows();
    if n <= 1 {
        return Ok(1);
    }

    let max_k = candidate_max_k(n);
    let step = coarse_step(max_k);

    let coarse = score_range(pipeline, matrix, (1..=max_k).step_by(step))?;
    let k0 = elbow(&coarse);

    let low = k0.saturating_sub(step - 1).max(1);
    let high = (k0 + step).min(max_k);
    let fine = score_range(pipeline, matrix, low..=high)?;
    let k = if fine.is_empty() { k0 } else { elbow(&fine) };

    debug!(n, max_k, step, k0, k, "cluster count selected");
    Ok(k)
}

pub fn select_k(pipeline: &KMeansPipeline<'_>, table: &FeatureTable) -> Result<usize> {
    if table.len() <= 1 {
        return Ok(1);
    }
    select_k_on(pipeline, &pipeline.matrix(table))
}

fn labels_on(pipeline: &KMeansPipeline<'_>, matrix: &Array2<f64>, k: usize) -> Result<Vec<usize>> {
    match pipeline.fit(matrix, k) {
        Ok(clustering) => Ok(clustering.labels),
        Err(e @ (ClusterError::Degenerate { .. } | ClusterError::KMeans(_))) => {
            warn!(k, error = %e, "final clustering failed; using a single cluster");
            Ok(vec![0; matrix.nrows()])
        }
        Err(e) => Err(e),
    }
}

/// Final labelling at `k`, falling back to one cluster when `k` cannot be
/// fitted.
pub fn assign_labels(pipeline: &KMeansPipeline<'_>, table: &FeatureTable, k: usize) -> Result<Vec<usize>> {
    labels_on(pipeline, &pipeline.matrix(table), k)
}

/// Selects `k` and labels the pool, vectorizing once.
pub fn select_and_label(pipeline: &KMeansPipeline<'_>, table: &FeatureTable) -> Result<Selection> {
    if table.len() <= 1 {
        return Ok(Selection {
            k: 1,
            labels: vec![0; table.len()],
        });
    }
    let matrix = pipeline.matrix(table);
    let k = select_k_on(pipeline, &matrix)?;
    let labels = labels_on(pipeline, &matrix, k)?;
    Ok(Selection { k, labels })
}
