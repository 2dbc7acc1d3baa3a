//! Shared detector lifecycle
//!
//! Every detector variant implements [`OutlierDetector`]: fit a model to a
//! training matrix, score samples, and compare scores against a threshold
//! calibrated from the target false positive rate.

use crate::error::{OutlierError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Default false positive rate used by all detector configs
pub const DEFAULT_FPR: f64 = 0.01;

/// Binary prediction label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    /// Sample is consistent with the training distribution
    Inlier,
    /// Sample's anomaly score exceeds the calibrated threshold
    Outlier,
}

impl Label {
    pub fn is_outlier(self) -> bool {
        matches!(self, Label::Outlier)
    }
}

impl From<Label> for i32 {
    /// sklearn-style convention: 1 = inlier, -1 = outlier
    fn from(label: Label) -> i32 {
        match label {
            Label::Inlier => 1,
            Label::Outlier => -1,
        }
    }
}

/// Common contract shared by all detector variants.
///
/// `fit` is the only mutator; everything else is read-only and returns
/// [`OutlierError::NotFitted`] before a successful fit.
pub trait OutlierDetector {
    /// Validate hyperparameters. Called by constructors, never during fit.
    fn check_params(&self) -> Result<()>;

    /// Estimate model parameters from `x`, cache the training matrix, and
    /// calibrate the decision threshold from the training scores.
    /// Returns `&mut Self` so calls can be chained.
    fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self>;

    /// Anomaly score per sample (higher = more anomalous).
    /// `None` scores the cached training matrix.
    fn anomaly_score(&self, x: Option<&Array2<f64>>) -> Result<Array1<f64>>;

    /// Mean log-likelihood of `x` under the fitted model (higher = more normal)
    fn score(&self, x: &Array2<f64>) -> Result<f64>;

    /// Decision threshold calibrated at fit time
    fn threshold(&self) -> Result<f64>;

    /// Label each sample. A sample is an outlier iff its anomaly score is
    /// strictly greater than the threshold, so `false_positive_rate = 0.0`
    /// classifies every training sample as an inlier.
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<Label>> {
        let threshold = self.threshold()?;
        let scores = self.anomaly_score(Some(x))?;
        Ok(scores.mapv(|s| {
            if s > threshold {
                Label::Outlier
            } else {
                Label::Inlier
            }
        }))
    }

    /// Fit on `x`, then predict labels for the same samples
    fn fit_predict(&mut self, x: &Array2<f64>) -> Result<Array1<Label>> {
        self.fit(x)?;
        self.predict(x)
    }
}

/// Fitted state held by each detector.
///
/// Model parameters, the cached training matrix, and the threshold live in
/// one struct behind a single `Option`, so they are either all present or
/// all absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Fitted<M> {
    pub model: M,
    pub x_train: Array2<f64>,
    pub threshold: f64,
}

/// Threshold = `100 * (1 - fpr)` percentile of the training scores, with
/// linear interpolation between closest ranks. Sorting first makes the
/// result independent of sample order.
pub fn calibrate_threshold(scores: &Array1<f64>, fpr: f64) -> f64 {
    let mut sorted: Vec<f64> = scores.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let h = (n - 1) as f64 * (1.0 - fpr);
    let lo = h.floor() as usize;
    let frac = h - lo as f64;

    if lo + 1 >= n {
        sorted[n - 1]
    } else {
        sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
    }
}

pub(crate) fn check_fpr(fpr: f64) -> Result<()> {
    if !(0.0..1.0).contains(&fpr) || fpr.is_nan() {
        return Err(OutlierError::InvalidParameter(format!(
            "false_positive_rate must be in [0, 1), got {}",
            fpr
        )));
    }
    Ok(())
}

pub(crate) fn check_matrix(x: &Array2<f64>) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(OutlierError::Data("empty sample matrix".to_string()));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(OutlierError::Data(
            "sample matrix contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn check_n_features(x: &Array2<f64>, n_features: usize) -> Result<()> {
    if x.ncols() != n_features {
        return Err(OutlierError::Shape(format!(
            "model was fitted with {} features, got {}",
            n_features,
            x.ncols()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_threshold_interpolation() {
        // scores 1..=5: 90th percentile = 4 + 0.6 * 1 = 4.6
        let scores = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let t = calibrate_threshold(&scores, 0.1);
        assert!((t - 4.6).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_fpr_zero_is_max() {
        let scores = array![3.0, 1.0, 7.0, 2.0];
        assert_eq!(calibrate_threshold(&scores, 0.0), 7.0);
    }

    #[test]
    fn test_threshold_permutation_stable() {
        let a = array![5.0, 1.0, 3.0, 2.0, 4.0];
        let b = array![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(calibrate_threshold(&a, 0.25), calibrate_threshold(&b, 0.25));
    }

    #[test]
    fn test_check_fpr_rejects_one() {
        assert!(check_fpr(1.0).is_err());
        assert!(check_fpr(-0.1).is_err());
        assert!(check_fpr(0.0).is_ok());
        assert!(check_fpr(0.99).is_ok());
    }

    #[test]
    fn test_label_conversion() {
        assert_eq!(i32::from(Label::Inlier), 1);
        assert_eq!(i32::from(Label::Outlier), -1);
        assert!(Label::Outlier.is_outlier());
        assert!(!Label::Inlier.is_outlier());
    }

    #[test]
    fn test_check_matrix_rejects_nan() {
        let x = array![[1.0, 2.0], [f64::NAN, 0.0]];
        assert!(check_matrix(&x).is_err());
    }
}
