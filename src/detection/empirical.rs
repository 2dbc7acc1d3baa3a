//! Empirical (k-nearest-neighbor) outlier detector
//!
//! Non-parametric: the fitted "model" is the training matrix itself. A
//! sample's anomaly score is its mean Euclidean distance to the k nearest
//! reference samples, so low-density regions score high without any
//! Gaussian or linear assumption. `score` reports the mean log of a kNN
//! density estimate.

use crate::detector::{self, Fitted, OutlierDetector, DEFAULT_FPR};
use crate::error::{OutlierError, Result};
use crate::linalg::special::lgamma;
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::f64::consts::PI;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmpiricalConfig {
    /// Target false positive rate on the training data, in [0, 1)
    pub false_positive_rate: f64,
    /// Emit an info-level fit summary
    pub verbose: bool,
    /// Number of nearest neighbors
    pub n_neighbors: usize,
}

impl Default for EmpiricalConfig {
    fn default() -> Self {
        Self {
            false_positive_rate: DEFAULT_FPR,
            verbose: false,
            n_neighbors: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmpiricalModel {
    /// Effective neighbor count, clamped to the reference-set size
    k: usize,
}

/// Distance-to-neighbors detector over the raw training distribution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmpiricalDetector {
    config: EmpiricalConfig,
    fitted: Option<Fitted<EmpiricalModel>>,
}

/// Max-heap entry so `peek` returns the current k-th distance
#[derive(Debug, Clone, Copy)]
struct HeapDist(f64);

impl PartialEq for HeapDist {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for HeapDist {}

impl PartialOrd for HeapDist {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapDist {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

impl EmpiricalDetector {
    pub fn new(config: EmpiricalConfig) -> Result<Self> {
        let detector = Self {
            config,
            fitted: None,
        };
        detector.check_params()?;
        Ok(detector)
    }

    /// Number of neighbors actually used after clamping against the
    /// reference-set size
    pub fn effective_neighbors(&self) -> Result<usize> {
        self.fitted
            .as_ref()
            .map(|f| f.model.k)
            .ok_or(OutlierError::NotFitted)
    }

    fn scores_against_reference(
        reference: &Array2<f64>,
        x: &Array2<f64>,
        k: usize,
        exclude_self: bool,
    ) -> Array1<f64> {
        let scores: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let exclude = if exclude_self { Some(i) } else { None };
                let dists = k_nearest_distances(&x.row(i), reference, k, exclude);
                dists.iter().sum::<f64>() / dists.len() as f64
            })
            .collect();
        Array1::from_vec(scores)
    }
}

fn euclidean_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Distances to the k nearest reference rows, via partial selection with a
/// bounded max-heap
fn k_nearest_distances(
    point: &ArrayView1<f64>,
    reference: &Array2<f64>,
    k: usize,
    exclude: Option<usize>,
) -> Vec<f64> {
    let mut heap: BinaryHeap<HeapDist> = BinaryHeap::with_capacity(k + 1);

    for (i, row) in reference.rows().into_iter().enumerate() {
        if Some(i) == exclude {
            continue;
        }
        let dist = euclidean_distance(point, &row);
        if heap.len() < k {
            heap.push(HeapDist(dist));
        } else if let Some(&HeapDist(max_dist)) = heap.peek() {
            if dist < max_dist {
                heap.pop();
                heap.push(HeapDist(dist));
            }
        }
    }

    heap.into_iter().map(|HeapDist(d)| d).collect()
}

impl OutlierDetector for EmpiricalDetector {
    fn check_params(&self) -> Result<()> {
        detector::check_fpr(self.config.false_positive_rate)?;
        if self.config.n_neighbors == 0 {
            return Err(OutlierError::InvalidParameter(
                "n_neighbors must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        detector::check_matrix(x)?;
        let n = x.nrows();
        if n < 2 {
            return Err(OutlierError::Data(
                "empirical detector needs at least two samples".to_string(),
            ));
        }

        let k = self.config.n_neighbors.min(n - 1);
        let model = EmpiricalModel { k };

        // Training samples are members of the reference set; exclude self
        let scores = Self::scores_against_reference(x, x, k, true);
        let threshold = detector::calibrate_threshold(&scores, self.config.false_positive_rate);

        if self.config.verbose {
            info!(
                n_samples = n,
                n_features = x.ncols(),
                k,
                threshold,
                "fitted empirical detector"
            );
        }

        self.fitted = Some(Fitted {
            model,
            x_train: x.clone(),
            threshold,
        });
        Ok(self)
    }

    fn anomaly_score(&self, x: Option<&Array2<f64>>) -> Result<Array1<f64>> {
        let fitted = self.fitted.as_ref().ok_or(OutlierError::NotFitted)?;
        let k = fitted.model.k;
        match x {
            Some(x) => {
                detector::check_matrix(x)?;
                detector::check_n_features(x, fitted.x_train.ncols())?;
                Ok(Self::scores_against_reference(&fitted.x_train, x, k, false))
            }
            None => Ok(Self::scores_against_reference(
                &fitted.x_train,
                &fitted.x_train,
                k,
                true,
            )),
        }
    }

    /// Mean log kNN density: log f(x) = log k - log n - log V_d(r_k), where
    /// V_d(r) is the volume of the d-ball with radius equal to the k-th
    /// neighbor distance
    fn score(&self, x: &Array2<f64>) -> Result<f64> {
        let fitted = self.fitted.as_ref().ok_or(OutlierError::NotFitted)?;
        detector::check_matrix(x)?;
        detector::check_n_features(x, fitted.x_train.ncols())?;

        let k = fitted.model.k;
        let n = fitted.x_train.nrows() as f64;
        let d = fitted.x_train.ncols() as f64;
        let log_unit_ball = (d / 2.0) * PI.ln() - lgamma(d / 2.0 + 1.0);

        let log_densities: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let dists = k_nearest_distances(&x.row(i), &fitted.x_train, k, None);
                let r_k = dists
                    .iter()
                    .copied()
                    .fold(0.0f64, f64::max)
                    .max(1e-12);
                (k as f64).ln() - n.ln() - log_unit_ball - d * r_k.ln()
            })
            .collect();

        Ok(log_densities.iter().sum::<f64>() / log_densities.len() as f64)
    }

    fn threshold(&self) -> Result<f64> {
        self.fitted
            .as_ref()
            .map(|f| f.threshold)
            .ok_or(OutlierError::NotFitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_moons_like() -> Array2<f64> {
        // Two dense clusters, no single centroid
        array![
            [0.0, 0.0],
            [0.1, 0.1],
            [0.2, 0.0],
            [0.0, 0.2],
            [5.0, 5.0],
            [5.1, 5.1],
            [5.2, 5.0],
            [5.0, 5.2],
            [20.0, -10.0], // isolated
        ]
    }

    #[test]
    fn test_isolated_point_scores_highest() {
        let x = two_moons_like();
        let mut detector = EmpiricalDetector::new(EmpiricalConfig {
            n_neighbors: 3,
            ..Default::default()
        })
        .unwrap();
        detector.fit(&x).unwrap();

        let scores = detector.anomaly_score(None).unwrap();
        let max_idx = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(max_idx, 8);
    }

    #[test]
    fn test_multimodal_members_are_inliers() {
        let x = two_moons_like();
        let mut detector = EmpiricalDetector::new(EmpiricalConfig {
            n_neighbors: 3,
            false_positive_rate: 0.0,
            ..Default::default()
        })
        .unwrap();
        let labels = detector.fit_predict(&x).unwrap();
        // fpr = 0 puts the threshold at the max training score
        assert!(labels.iter().all(|l| !l.is_outlier()));
    }

    #[test]
    fn test_k_clamped_to_reference_size() {
        let x = array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]];
        let mut detector = EmpiricalDetector::new(EmpiricalConfig {
            n_neighbors: 50,
            ..Default::default()
        })
        .unwrap();
        detector.fit(&x).unwrap();
        assert_eq!(detector.effective_neighbors().unwrap(), 2);
    }

    #[test]
    fn test_not_fitted() {
        let detector = EmpiricalDetector::default();
        assert!(matches!(
            detector.anomaly_score(None),
            Err(OutlierError::NotFitted)
        ));
    }

    #[test]
    fn test_zero_neighbors_rejected() {
        let config = EmpiricalConfig {
            n_neighbors: 0,
            ..Default::default()
        };
        assert!(matches!(
            EmpiricalDetector::new(config),
            Err(OutlierError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_dense_region_higher_log_density() {
        let x = two_moons_like();
        let mut detector = EmpiricalDetector::new(EmpiricalConfig {
            n_neighbors: 3,
            ..Default::default()
        })
        .unwrap();
        detector.fit(&x).unwrap();

        let dense = array![[0.05, 0.05]];
        let sparse = array![[50.0, 50.0]];
        assert!(detector.score(&dense).unwrap() > detector.score(&sparse).unwrap());
    }
}
