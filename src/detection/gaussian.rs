//! Gaussian outlier detector
//!
//! Fits a single multivariate Gaussian and scores samples by squared
//! Mahalanobis distance from the mean under the estimated precision matrix.

use crate::detection::mahalanobis_sq;
use crate::detector::{self, Fitted, OutlierDetector, DEFAULT_FPR};
use crate::error::{OutlierError, Result};
use crate::linalg;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianConfig {
    /// Target false positive rate on the training data, in [0, 1)
    pub false_positive_rate: f64,
    /// Emit an info-level fit summary
    pub verbose: bool,
    /// Regularization added to the covariance diagonal
    pub reg_covar: f64,
}

impl Default for GaussianConfig {
    fn default() -> Self {
        Self {
            false_positive_rate: DEFAULT_FPR,
            verbose: false,
            reg_covar: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GaussianModel {
    mean: Array1<f64>,
    covariance: Array2<f64>,
    precision: Array2<f64>,
    log_det_cov: f64,
}

/// Multivariate Gaussian detector with Mahalanobis-distance scoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GaussianDetector {
    config: GaussianConfig,
    fitted: Option<Fitted<GaussianModel>>,
}

impl GaussianDetector {
    pub fn new(config: GaussianConfig) -> Result<Self> {
        let detector = Self {
            config,
            fitted: None,
        };
        detector.check_params()?;
        Ok(detector)
    }

    /// Fitted mean vector
    pub fn mean(&self) -> Result<&Array1<f64>> {
        self.fitted
            .as_ref()
            .map(|f| &f.model.mean)
            .ok_or(OutlierError::NotFitted)
    }

    /// Fitted covariance matrix (regularized)
    pub fn covariance(&self) -> Result<&Array2<f64>> {
        self.fitted
            .as_ref()
            .map(|f| &f.model.covariance)
            .ok_or(OutlierError::NotFitted)
    }

    /// Fitted precision (inverse covariance) matrix
    pub fn precision(&self) -> Result<&Array2<f64>> {
        self.fitted
            .as_ref()
            .map(|f| &f.model.precision)
            .ok_or(OutlierError::NotFitted)
    }
}

impl OutlierDetector for GaussianDetector {
    fn check_params(&self) -> Result<()> {
        detector::check_fpr(self.config.false_positive_rate)?;
        if self.config.reg_covar < 0.0 {
            return Err(OutlierError::InvalidParameter(format!(
                "reg_covar must be non-negative, got {}",
                self.config.reg_covar
            )));
        }
        Ok(())
    }

    fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        detector::check_matrix(x)?;

        let n = x.nrows();
        let d = x.ncols();
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| OutlierError::Data("empty sample matrix".to_string()))?;

        let centered = x - &mean;
        let mut covariance = centered.t().dot(&centered) / n as f64;
        for i in 0..d {
            covariance[[i, i]] += self.config.reg_covar;
        }

        // Near-singular covariance is rescued by diagonal jitter, not a hard error
        let (precision, log_det_cov) = linalg::spd_inverse_jittered(&covariance)?;

        let model = GaussianModel {
            mean,
            covariance,
            precision,
            log_det_cov,
        };
        let scores = mahalanobis_sq(&model.mean, &model.precision, x);
        let threshold = detector::calibrate_threshold(&scores, self.config.false_positive_rate);

        if self.config.verbose {
            info!(
                n_samples = n,
                n_features = d,
                threshold,
                "fitted Gaussian detector"
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
        let x = match x {
            Some(x) => {
                detector::check_matrix(x)?;
                detector::check_n_features(x, fitted.model.mean.len())?;
                x
            }
            None => &fitted.x_train,
        };
        Ok(mahalanobis_sq(&fitted.model.mean, &fitted.model.precision, x))
    }

    fn score(&self, x: &Array2<f64>) -> Result<f64> {
        let fitted = self.fitted.as_ref().ok_or(OutlierError::NotFitted)?;
        detector::check_matrix(x)?;
        detector::check_n_features(x, fitted.model.mean.len())?;

        let d = fitted.model.mean.len() as f64;
        let maha = mahalanobis_sq(&fitted.model.mean, &fitted.model.precision, x);
        let log_norm = d * (2.0 * PI).ln() + fitted.model.log_det_cov;
        let total: f64 = maha.iter().map(|&m| -0.5 * (log_norm + m)).sum();
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

    fn cluster_with_outlier() -> Array2<f64> {
        array![
            [1.0, 2.0],
            [1.1, 2.1],
            [0.9, 1.9],
            [1.2, 2.0],
            [0.8, 2.2],
            [1.0, 1.8],
            [1.1, 1.9],
            [0.9, 2.1],
            [10.0, -5.0], // outlier
        ]
    }

    #[test]
    fn test_not_fitted_errors() {
        let detector = GaussianDetector::default();
        let x = array![[1.0, 2.0]];
        assert!(matches!(
            detector.anomaly_score(Some(&x)),
            Err(OutlierError::NotFitted)
        ));
        assert!(matches!(detector.predict(&x), Err(OutlierError::NotFitted)));
        assert!(matches!(detector.score(&x), Err(OutlierError::NotFitted)));
        assert!(matches!(detector.mean(), Err(OutlierError::NotFitted)));
    }

    #[test]
    fn test_outlier_scores_highest() {
        let x = cluster_with_outlier();
        let mut detector = GaussianDetector::default();
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
    fn test_score_at_mean_is_minimum() {
        let x = cluster_with_outlier();
        let mut detector = GaussianDetector::default();
        detector.fit(&x).unwrap();

        let mean = detector.mean().unwrap().clone();
        let at_mean = Array2::from_shape_vec((1, 2), mean.to_vec()).unwrap();
        let score = detector.anomaly_score(Some(&at_mean)).unwrap()[0];
        assert!(score.abs() < 1e-10);
    }

    #[test]
    fn test_feature_mismatch_rejected() {
        let x = cluster_with_outlier();
        let mut detector = GaussianDetector::default();
        detector.fit(&x).unwrap();

        let bad = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            detector.anomaly_score(Some(&bad)),
            Err(OutlierError::Shape(_))
        ));
    }

    #[test]
    fn test_constant_feature_does_not_fail() {
        // Second feature has zero variance; jitter must rescue the fit
        let x = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0], [4.0, 5.0]];
        let mut detector = GaussianDetector::default();
        assert!(detector.fit(&x).is_ok());
    }

    #[test]
    fn test_invalid_fpr_rejected() {
        let config = GaussianConfig {
            false_positive_rate: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            GaussianDetector::new(config),
            Err(OutlierError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_predict_matches_threshold_rule() {
        let x = cluster_with_outlier();
        let mut detector = GaussianDetector::default();
        detector.fit(&x).unwrap();

        let scores = detector.anomaly_score(Some(&x)).unwrap();
        let threshold = detector.threshold().unwrap();
        let labels = detector.predict(&x).unwrap();
        for (s, l) in scores.iter().zip(labels.iter()) {
            assert_eq!(*s > threshold, l.is_outlier());
        }
    }
}
