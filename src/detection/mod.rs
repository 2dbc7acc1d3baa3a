//! Detector variants
//!
//! Each variant fits a different statistical model but shares the
//! [`OutlierDetector`](crate::detector::OutlierDetector) lifecycle:
//! - [`GaussianDetector`] - multivariate Gaussian, squared Mahalanobis score
//! - [`GgmDetector`] - sparse precision matrix via graphical lasso
//! - [`EmpiricalDetector`] - non-parametric k-nearest-neighbor distances
//! - [`MixtureDetector`] - Gaussian mixture fit by EM
//! - [`VmfDetector`] - von Mises-Fisher model for unit-norm data
//! - [`PcaDetector`] - principal-component reconstruction error

pub mod empirical;
pub mod gaussian;
pub mod ggm;
pub mod mixture;
pub mod pca;
pub mod vmf;

pub use empirical::{EmpiricalConfig, EmpiricalDetector};
pub use gaussian::{GaussianConfig, GaussianDetector};
pub use ggm::{GgmConfig, GgmDetector};
pub use mixture::{MixtureConfig, MixtureDetector};
pub use pca::{PcaConfig, PcaDetector};
pub use vmf::{VmfConfig, VmfDetector};

use ndarray::{Array1, Array2};
use rayon::prelude::*;

/// Squared Mahalanobis distance of each row of `x` from `mean` under the
/// given precision matrix.
pub(crate) fn mahalanobis_sq(
    mean: &Array1<f64>,
    precision: &Array2<f64>,
    x: &Array2<f64>,
) -> Array1<f64> {
    let scores: Vec<f64> = (0..x.nrows())
        .into_par_iter()
        .map(|i| {
            let diff = &x.row(i) - mean;
            diff.dot(&precision.dot(&diff))
        })
        .collect();
    Array1::from_vec(scores)
}
