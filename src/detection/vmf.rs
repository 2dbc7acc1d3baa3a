//! Directional (von Mises-Fisher) outlier detector
//!
//! For unit-norm samples on the (d-1)-sphere. Fit estimates the mean
//! direction from the normalized resultant vector and the concentration
//! via the Banerjee et al. (2005) approximation. The anomaly score is the
//! negative vMF log-density, so samples pointing away from the mean
//! direction score high.

use crate::detector::{self, Fitted, OutlierDetector, DEFAULT_FPR};
use crate::error::{OutlierError, Result};
use crate::linalg::special::{lgamma, log_bessel_i};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::f64::consts::{LN_2, PI};
use tracing::info;

/// Cap on the fitted concentration; near-duplicate directions would
/// otherwise push the estimate to infinity
const MAX_CONCENTRATION: f64 = 1e5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmfConfig {
    /// Target false positive rate on the training data, in [0, 1)
    pub false_positive_rate: f64,
    /// Emit an info-level fit summary
    pub verbose: bool,
    /// Tolerance on | ||x|| - 1 | when validating unit-norm rows
    pub unit_tol: f64,
}

impl Default for VmfConfig {
    fn default() -> Self {
        Self {
            false_positive_rate: DEFAULT_FPR,
            verbose: false,
            unit_tol: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VmfModel {
    mean_direction: Array1<f64>,
    concentration: f64,
    log_normalizer: f64,
}

/// von Mises-Fisher detector for directional data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmfDetector {
    config: VmfConfig,
    fitted: Option<Fitted<VmfModel>>,
}

impl VmfDetector {
    pub fn new(config: VmfConfig) -> Result<Self> {
        let detector = Self {
            config,
            fitted: None,
        };
        detector.check_params()?;
        Ok(detector)
    }

    /// Fitted unit-norm mean direction
    pub fn mean_direction(&self) -> Result<&Array1<f64>> {
        self.fitted
            .as_ref()
            .map(|f| &f.model.mean_direction)
            .ok_or(OutlierError::NotFitted)
    }

    /// Fitted concentration parameter (0 = uniform on the sphere)
    pub fn concentration(&self) -> Result<f64> {
        self.fitted
            .as_ref()
            .map(|f| f.model.concentration)
            .ok_or(OutlierError::NotFitted)
    }

    fn check_unit_rows(&self, x: &Array2<f64>) -> Result<()> {
        for (i, row) in x.rows().into_iter().enumerate() {
            let norm = row.dot(&row).sqrt();
            if (norm - 1.0).abs() > self.config.unit_tol {
                return Err(OutlierError::Data(format!(
                    "row {} has norm {}, expected unit-norm directional data",
                    i, norm
                )));
            }
        }
        Ok(())
    }

    fn negative_log_density(model: &VmfModel, x: &Array2<f64>) -> Array1<f64> {
        let cosines = x.dot(&model.mean_direction);
        cosines.mapv(|cos| -(model.concentration * cos + model.log_normalizer))
    }
}

/// log C_d(kappa) = (d/2 - 1) log kappa - (d/2) log 2pi - log I_{d/2-1}(kappa),
/// with the kappa -> 0 limit equal to the log uniform density on the sphere
fn vmf_log_normalizer(concentration: f64, d: f64) -> f64 {
    if concentration < 1e-8 {
        // 1 / surface area of the unit (d-1)-sphere
        lgamma(d / 2.0) - LN_2 - (d / 2.0) * PI.ln()
    } else {
        let order = d / 2.0 - 1.0;
        order * concentration.ln() - (d / 2.0) * (2.0 * PI).ln()
            - log_bessel_i(order, concentration)
    }
}

impl OutlierDetector for VmfDetector {
    fn check_params(&self) -> Result<()> {
        detector::check_fpr(self.config.false_positive_rate)?;
        if self.config.unit_tol <= 0.0 {
            return Err(OutlierError::InvalidParameter(format!(
                "unit_tol must be positive, got {}",
                self.config.unit_tol
            )));
        }
        Ok(())
    }

    fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        detector::check_matrix(x)?;
        self.check_unit_rows(x)?;

        let n = x.nrows();
        let d = x.ncols() as f64;

        // Resultant vector and mean resultant length
        let mut resultant = Array1::<f64>::zeros(x.ncols());
        for row in x.rows() {
            resultant += &row;
        }
        let resultant_norm = resultant.dot(&resultant).sqrt();

        let mean_direction = if resultant_norm > 1e-12 {
            &resultant / resultant_norm
        } else {
            // Near-uniform data: direction is arbitrary, concentration ~ 0
            let mut fallback = Array1::zeros(x.ncols());
            fallback[0] = 1.0;
            fallback
        };

        // Banerjee et al. approximation, with r_bar clamped away from the
        // 0 and 1 poles where the formula blows up
        let r_bar = (resultant_norm / n as f64).clamp(1e-8, 1.0 - 1e-8);
        let concentration =
            (r_bar * (d - r_bar * r_bar) / (1.0 - r_bar * r_bar)).clamp(0.0, MAX_CONCENTRATION);
        let log_normalizer = vmf_log_normalizer(concentration, d);

        let model = VmfModel {
            mean_direction,
            concentration,
            log_normalizer,
        };
        let scores = Self::negative_log_density(&model, x);
        let threshold = detector::calibrate_threshold(&scores, self.config.false_positive_rate);

        if self.config.verbose {
            info!(
                n_samples = n,
                n_features = x.ncols(),
                concentration = model.concentration,
                threshold,
                "fitted vMF detector"
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
                detector::check_n_features(x, fitted.model.mean_direction.len())?;
                self.check_unit_rows(x)?;
                x
            }
            None => &fitted.x_train,
        };
        Ok(Self::negative_log_density(&fitted.model, x))
    }

    fn score(&self, x: &Array2<f64>) -> Result<f64> {
        let scores = self.anomaly_score(Some(x))?;
        // Negative log-density scores, so the mean log-likelihood flips sign
        Ok(-scores.sum() / scores.len() as f64)
    }

    fn threshold(&self) -> Result<f64> {
        self.fitted
            .as_ref()
            .map(|f| f.threshold)
            .ok_or(OutlierError::NotFitted)
    }
}
