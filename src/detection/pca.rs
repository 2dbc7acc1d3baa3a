//! Reconstruction-based (PCA) outlier detector
//!
//! Fits a rank-r principal subspace of the centered training data. A sample
//! is scored by its Euclidean reconstruction error after projecting onto the
//! subspace and back, a dimension-reduction analogue of Mahalanobis distance
//! that needs no covariance inversion. `score` reports the mean
//! log-likelihood under the probabilistic-PCA noise model
//! (Tipping & Bishop 1999).

use crate::detector::{self, Fitted, OutlierDetector, DEFAULT_FPR};
use crate::error::{OutlierError, Result};
use crate::linalg::symmetric_eigen;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaConfig {
    /// Target false positive rate on the training data, in [0, 1)
    pub false_positive_rate: f64,
    /// Emit an info-level fit summary
    pub verbose: bool,
    /// Subspace rank; `None` keeps all components
    pub n_components: Option<usize>,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            false_positive_rate: DEFAULT_FPR,
            verbose: false,
            n_components: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PcaModel {
    /// Principal axes, one row per component (r x d)
    components: Array2<f64>,
    mean: Array1<f64>,
    explained_variance: Array1<f64>,
    explained_variance_ratio: Array1<f64>,
    /// Mean of the trailing eigenvalues; 0 at full rank
    noise_variance: f64,
}

/// Principal-component reconstruction-error detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaDetector {
    config: PcaConfig,
    fitted: Option<Fitted<PcaModel>>,
}

impl Default for PcaDetector {
    fn default() -> Self {
        Self {
            config: PcaConfig::default(),
            fitted: None,
        }
    }
}

impl PcaDetector {
    pub fn new(config: PcaConfig) -> Result<Self> {
        let detector = Self {
            config,
            fitted: None,
        };
        detector.check_params()?;
        Ok(detector)
    }

    /// Principal axes, one row per component
    pub fn components(&self) -> Result<&Array2<f64>> {
        self.fitted
            .as_ref()
            .map(|f| &f.model.components)
            .ok_or(OutlierError::NotFitted)
    }

    /// Per-feature training mean
    pub fn mean(&self) -> Result<&Array1<f64>> {
        self.fitted
            .as_ref()
            .map(|f| &f.model.mean)
            .ok_or(OutlierError::NotFitted)
    }

    /// Variance explained by each kept component
    pub fn explained_variance(&self) -> Result<&Array1<f64>> {
        self.fitted
            .as_ref()
            .map(|f| &f.model.explained_variance)
            .ok_or(OutlierError::NotFitted)
    }

    /// Fraction of total variance explained by each kept component
    pub fn explained_variance_ratio(&self) -> Result<&Array1<f64>> {
        self.fitted
            .as_ref()
            .map(|f| &f.model.explained_variance_ratio)
            .ok_or(OutlierError::NotFitted)
    }

    /// Estimated residual noise variance (probabilistic PCA)
    pub fn noise_variance(&self) -> Result<f64> {
        self.fitted
            .as_ref()
            .map(|f| f.model.noise_variance)
            .ok_or(OutlierError::NotFitted)
    }

    /// Project onto the principal subspace and back to the original space
    pub fn reconstruct(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let fitted = self.fitted.as_ref().ok_or(OutlierError::NotFitted)?;
        detector::check_matrix(x)?;
        detector::check_n_features(x, fitted.model.mean.len())?;
        Ok(Self::reconstruct_with(&fitted.model, x))
    }

    /// Squared residual per feature: `(x - reconstruct(x))^2`, shape (n, d)
    pub fn feature_wise_anomaly_score(&self, x: Option<&Array2<f64>>) -> Result<Array2<f64>> {
        let fitted = self.fitted.as_ref().ok_or(OutlierError::NotFitted)?;
        let x = match x {
            Some(x) => {
                detector::check_matrix(x)?;
                detector::check_n_features(x, fitted.model.mean.len())?;
                x
            }
            None => &fitted.x_train,
        };
        let residual = x - &Self::reconstruct_with(&fitted.model, x);
        Ok(residual.mapv(|r| r * r))
    }

    fn reconstruct_with(model: &PcaModel, x: &Array2<f64>) -> Array2<f64> {
        let centered = x - &model.mean;
        let projected = centered.dot(&model.components.t());
        projected.dot(&model.components) + &model.mean
    }
}

impl OutlierDetector for PcaDetector {
    fn check_params(&self) -> Result<()> {
        detector::check_fpr(self.config.false_positive_rate)?;
        if let Some(r) = self.config.n_components {
            if r == 0 {
                return Err(OutlierError::InvalidParameter(
                    "n_components must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        detector::check_matrix(x)?;

        let n = x.nrows();
        let d = x.ncols();
        if n < 2 {
            return Err(OutlierError::Data(
                "PCA needs at least two samples".to_string(),
            ));
        }
        let r = self.config.n_components.unwrap_or(d);
        if r > d {
            return Err(OutlierError::Data(format!(
                "n_components ({}) exceeds n_features ({})",
                r, d
            )));
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| OutlierError::Data("empty sample matrix".to_string()))?;
        let centered = x - &mean;
        let covariance = centered.t().dot(&centered) / (n - 1) as f64;

        let (eigenvalues, eigenvectors) = symmetric_eigen(&covariance)?;
        let eigenvalues = eigenvalues.mapv(|v| v.max(0.0));
        let total_variance = eigenvalues.sum().max(1e-300);

        let mut components = Array2::zeros((r, d));
        for c in 0..r {
            components.row_mut(c).assign(&eigenvectors.column(c));
        }
        let explained_variance = eigenvalues.slice(ndarray::s![..r]).to_owned();
        let explained_variance_ratio = &explained_variance / total_variance;
        let noise_variance = if r < d {
            eigenvalues.slice(ndarray::s![r..]).mean().unwrap_or(0.0)
        } else {
            0.0
        };

        let model = PcaModel {
            components,
            mean,
            explained_variance,
            explained_variance_ratio,
            noise_variance,
        };

        let residual = x - &Self::reconstruct_with(&model, x);
        let scores = residual
            .map_axis(Axis(1), |row| row.dot(&row).sqrt());
        let threshold = detector::calibrate_threshold(&scores, self.config.false_positive_rate);

        if self.config.verbose {
            info!(
                n_samples = n,
                n_features = d,
                n_components = r,
                noise_variance = model.noise_variance,
                threshold,
                "fitted PCA detector"
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
        let feature_wise = self.feature_wise_anomaly_score(x)?;
        Ok(feature_wise.map_axis(Axis(1), |row| row.sum().sqrt()))
    }

    /// Mean log-likelihood under the probabilistic-PCA model: kept
    /// directions carry their eigenvalue variance, the residual subspace
    /// carries the isotropic noise variance
    fn score(&self, x: &Array2<f64>) -> Result<f64> {
        let fitted = self.fitted.as_ref().ok_or(OutlierError::NotFitted)?;
        detector::check_matrix(x)?;
        detector::check_n_features(x, fitted.model.mean.len())?;

        let model = &fitted.model;
        let d = model.mean.len() as f64;
        let r = model.components.nrows();
        let sigma_sq = model.noise_variance.max(1e-12);

        let log_det: f64 = model
            .explained_variance
            .iter()
            .map(|&v| v.max(1e-12).ln())
            .sum::<f64>()
            + (d - r as f64) * sigma_sq.ln();

        let centered = x - &model.mean;
        let projected = centered.dot(&model.components.t());
        let reconstructed = projected.dot(&model.components);

        let mut total = 0.0;
        for i in 0..x.nrows() {
            let z = projected.row(i);
            let maha_kept: f64 = z
                .iter()
                .zip(model.explained_variance.iter())
                .map(|(&zi, &var)| zi * zi / var.max(1e-12))
                .sum();
            let residual = &centered.row(i) - &reconstructed.row(i);
            let residual_sq = residual.dot(&residual);
            total += -0.5 * (d * (2.0 * PI).ln() + log_det + maha_kept + residual_sq / sigma_sq);
        }

        Ok(total / x.nrows() as f64)
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

    fn correlated_data() -> Array2<f64> {
        // Points near the line y = 2x, plus one far off the line
        array![
            [1.0, 2.1],
            [2.0, 3.9],
            [3.0, 6.1],
            [4.0, 8.0],
            [5.0, 9.9],
            [6.0, 12.1],
            [7.0, 14.0],
            [4.0, -8.0], // off the principal axis
        ]
    }

    #[test]
    fn test_full_rank_reconstruction_is_exact() {
        let x = correlated_data();
        let mut detector = PcaDetector::default();
        detector.fit(&x).unwrap();

        let scores = detector.anomaly_score(None).unwrap();
        for &s in scores.iter() {
            assert!(s < 1e-8, "full-rank residual should vanish, got {}", s);
        }
    }

    #[test]
    fn test_rank_one_flags_off_axis_point() {
        let x = correlated_data();
        let mut detector = PcaDetector::new(PcaConfig {
            n_components: Some(1),
            ..PcaConfig::default()
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
        assert_eq!(max_idx, 7);
    }

    #[test]
    fn test_reconstruction_round_trip_scores_zero() {
        let x = correlated_data();
        let mut detector = PcaDetector::new(PcaConfig {
            n_components: Some(1),
            ..PcaConfig::default()
        })
        .unwrap();
        detector.fit(&x).unwrap();

        // A detector's own reconstruction lies in the subspace, so its
        // reconstruction error is the model-class minimum (zero)
        let reconstructed = detector.reconstruct(&x).unwrap();
        let scores = detector.anomaly_score(Some(&reconstructed)).unwrap();
        for &s in scores.iter() {
            assert!(s < 1e-8);
        }
    }

    #[test]
    fn test_feature_wise_shape() {
        let x = correlated_data();
        let mut detector = PcaDetector::default();
        detector.fit(&x).unwrap();

        let fw = detector.feature_wise_anomaly_score(None).unwrap();
        assert_eq!(fw.dim(), (8, 2));
    }

    #[test]
    fn test_explained_variance_ratio_sums_below_one() {
        let x = correlated_data();
        let mut detector = PcaDetector::new(PcaConfig {
            n_components: Some(1),
            ..PcaConfig::default()
        })
        .unwrap();
        detector.fit(&x).unwrap();

        let ratio = detector.explained_variance_ratio().unwrap();
        assert_eq!(ratio.len(), 1);
        assert!(ratio[0] > 0.9); // line-like data: first axis dominates
        assert!(ratio[0] <= 1.0 + 1e-12);
        assert!(detector.noise_variance().unwrap() > 0.0);
    }

    #[test]
    fn test_too_many_components_rejected() {
        let x = correlated_data();
        let mut detector = PcaDetector::new(PcaConfig {
            n_components: Some(5),
            ..PcaConfig::default()
        })
        .unwrap();
        assert!(matches!(detector.fit(&x), Err(OutlierError::Data(_))));
    }

    #[test]
    fn test_not_fitted() {
        let detector = PcaDetector::default();
        assert!(matches!(detector.components(), Err(OutlierError::NotFitted)));
        assert!(matches!(
            detector.reconstruct(&array![[1.0, 2.0]]),
            Err(OutlierError::NotFitted)
        ));
    }

    #[test]
    fn test_ppca_score_prefers_on_axis_points() {
        let x = correlated_data();
        let mut detector = PcaDetector::new(PcaConfig {
            n_components: Some(1),
            ..PcaConfig::default()
        })
        .unwrap();
        detector.fit(&x).unwrap();

        let on_axis = array![[4.0, 8.0]];
        let off_axis = array![[4.0, -8.0]];
        assert!(detector.score(&on_axis).unwrap() > detector.score(&off_axis).unwrap());
    }
}
