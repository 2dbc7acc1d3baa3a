//! outliers - unsupervised outlier detection with statistical models
//!
//! Every detector follows one lifecycle: `fit` a model to a training matrix,
//! compute per-sample anomaly scores, and calibrate a decision threshold as
//! the `100 * (1 - false_positive_rate)` percentile of the training scores.
//! `predict` then labels samples whose score exceeds the threshold as
//! outliers, and `score` reports the mean log-likelihood under the fitted
//! model.
//!
//! # Detector variants
//!
//! - [`detection::GaussianDetector`] - multivariate Gaussian, squared
//!   Mahalanobis distance
//! - [`detection::GgmDetector`] - Gaussian graphical model with a sparse
//!   precision matrix (graphical lasso)
//! - [`detection::EmpiricalDetector`] - non-parametric k-nearest-neighbor
//!   distances
//! - [`detection::MixtureDetector`] - Gaussian mixture fit by EM
//! - [`detection::VmfDetector`] - von Mises-Fisher model for unit-norm
//!   directional data
//! - [`detection::PcaDetector`] - principal-component reconstruction error
//!
//! # Example
//!
//! ```
//! use ndarray::array;
//! use outliers::detection::GaussianDetector;
//! use outliers::detector::OutlierDetector;
//!
//! let x = array![
//!     [1.0, 2.0], [1.1, 2.1], [0.9, 1.9], [1.2, 2.0],
//!     [0.8, 2.2], [1.0, 1.8], [1.1, 1.9], [0.9, 2.1],
//! ];
//! let mut detector = GaussianDetector::default();
//! let labels = detector.fit_predict(&x).unwrap();
//! assert_eq!(labels.len(), 8);
//! ```

pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod linalg;

/// Convenience re-exports
pub mod prelude {
    pub use crate::detection::{
        EmpiricalConfig, EmpiricalDetector, GaussianConfig, GaussianDetector, GgmConfig,
        GgmDetector, MixtureConfig, MixtureDetector, PcaConfig, PcaDetector, VmfConfig,
        VmfDetector,
    };
    pub use crate::detector::{Label, OutlierDetector};
    pub use crate::error::{OutlierError, Result};
}

pub use detector::{Label, OutlierDetector};
pub use error::{OutlierError, Result};
