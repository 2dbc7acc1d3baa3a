//! Gaussian mixture outlier detector
//!
//! Fits k weighted Gaussian components by expectation-maximization and
//! scores each sample by the negative log-likelihood under the mixture.
//! Covariances carry a `reg_covar` floor on the diagonal at every M-step so
//! EM cannot collapse a component to zero variance.

use crate::detector::{self, Fitted, OutlierDetector, DEFAULT_FPR};
use crate::error::{OutlierError, Result};
use crate::linalg::{self, special::log_sum_exp};
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureConfig {
    /// Target false positive rate on the training data, in [0, 1)
    pub false_positive_rate: f64,
    /// Emit an info-level fit summary
    pub verbose: bool,
    /// Number of mixture components
    pub n_components: usize,
    /// Maximum EM iterations
    pub max_iter: usize,
    /// Convergence tolerance on the mean log-likelihood improvement
    pub tol: f64,
    /// Floor added to every covariance diagonal in each M-step
    pub reg_covar: f64,
    /// RNG seed for mean initialization
    pub random_state: Option<u64>,
}

impl Default for MixtureConfig {
    fn default() -> Self {
        Self {
            false_positive_rate: DEFAULT_FPR,
            verbose: false,
            n_components: 1,
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            random_state: Some(42),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MixtureModel {
    weights: Array1<f64>,
    /// Component means, one row per component
    means: Array2<f64>,
    covariances: Vec<Array2<f64>>,
    precisions: Vec<Array2<f64>>,
    log_det_covs: Vec<f64>,
    converged: bool,
    n_iter: usize,
}

/// Gaussian mixture detector fit by EM
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MixtureDetector {
    config: MixtureConfig,
    fitted: Option<Fitted<MixtureModel>>,
}

impl MixtureDetector {
    pub fn new(config: MixtureConfig) -> Result<Self> {
        let detector = Self {
            config,
            fitted: None,
        };
        detector.check_params()?;
        Ok(detector)
    }

    /// Fitted component weights (sum to 1)
    pub fn weights(&self) -> Result<&Array1<f64>> {
        self.fitted
            .as_ref()
            .map(|f| &f.model.weights)
            .ok_or(OutlierError::NotFitted)
    }

    /// Fitted component means, one row per component
    pub fn means(&self) -> Result<&Array2<f64>> {
        self.fitted
            .as_ref()
            .map(|f| &f.model.means)
            .ok_or(OutlierError::NotFitted)
    }

    /// Fitted component covariance matrices
    pub fn covariances(&self) -> Result<&[Array2<f64>]> {
        self.fitted
            .as_ref()
            .map(|f| f.model.covariances.as_slice())
            .ok_or(OutlierError::NotFitted)
    }

    /// Whether EM converged within `max_iter` iterations
    pub fn converged(&self) -> Result<bool> {
        self.fitted
            .as_ref()
            .map(|f| f.model.converged)
            .ok_or(OutlierError::NotFitted)
    }
}

/// log N(x; mean, Sigma) via the cached precision and log-determinant
fn log_gaussian(
    x: &ndarray::ArrayView1<f64>,
    mean: &ndarray::ArrayView1<f64>,
    precision: &Array2<f64>,
    log_det_cov: f64,
) -> f64 {
    let d = x.len() as f64;
    let diff = x - mean;
    let maha = diff.dot(&precision.dot(&diff));
    -0.5 * (d * (2.0 * PI).ln() + log_det_cov + maha)
}

/// Per-sample log mixture density: logsumexp_c [ log w_c + log N_c(x) ]
fn log_mixture_density(model: &MixtureModel, x: &Array2<f64>) -> Array1<f64> {
    let k = model.weights.len();
    let log_weights: Vec<f64> = model.weights.iter().map(|&w| w.max(1e-300).ln()).collect();

    let densities: Vec<f64> = (0..x.nrows())
        .into_par_iter()
        .map(|i| {
            let row = x.row(i);
            let log_probs: Vec<f64> = (0..k)
                .map(|c| {
                    log_weights[c]
                        + log_gaussian(
                            &row,
                            &model.means.row(c),
                            &model.precisions[c],
                            model.log_det_covs[c],
                        )
                })
                .collect();
            log_sum_exp(&log_probs)
        })
        .collect();
    Array1::from_vec(densities)
}

/// Seed component means from data rows, spread apart by squared-distance
/// weighted sampling
fn init_means(x: &Array2<f64>, k: usize, rng: &mut ChaCha8Rng) -> Array2<f64> {
    let n = x.nrows();
    let d = x.ncols();
    let mut means = Array2::zeros((k, d));

    let first = rng.gen_range(0..n);
    means.row_mut(0).assign(&x.row(first));

    for c in 1..k {
        let dists: Vec<f64> = (0..n)
            .map(|i| {
                let row = x.row(i);
                (0..c)
                    .map(|j| {
                        let diff = &row - &means.row(j);
                        diff.mapv(|v| v * v).sum()
                    })
                    .fold(f64::MAX, f64::min)
            })
            .collect();

        let total: f64 = dists.iter().sum();
        if total <= 0.0 {
            let idx = rng.gen_range(0..n);
            means.row_mut(c).assign(&x.row(idx));
            continue;
        }

        let r = rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        let mut chosen = n - 1;
        for (i, &dist) in dists.iter().enumerate() {
            cumulative += dist;
            if cumulative >= r {
                chosen = i;
                break;
            }
        }
        means.row_mut(c).assign(&x.row(chosen));
    }

    means
}

impl OutlierDetector for MixtureDetector {
    fn check_params(&self) -> Result<()> {
        detector::check_fpr(self.config.false_positive_rate)?;
        if self.config.n_components == 0 {
            return Err(OutlierError::InvalidParameter(
                "n_components must be at least 1".to_string(),
            ));
        }
        if self.config.max_iter == 0 {
            return Err(OutlierError::InvalidParameter(
                "max_iter must be at least 1".to_string(),
            ));
        }
        if self.config.tol <= 0.0 {
            return Err(OutlierError::InvalidParameter(format!(
                "tol must be positive, got {}",
                self.config.tol
            )));
        }
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
        let k = self.config.n_components;
        if n < k {
            return Err(OutlierError::Data(format!(
                "n_samples ({}) < n_components ({})",
                n, k
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.random_state.unwrap_or(42));
        let mut means = init_means(x, k, &mut rng);
        let mut weights = Array1::from_elem(k, 1.0 / k as f64);

        // Pooled covariance as the common starting point for every component
        let global_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| OutlierError::Data("empty sample matrix".to_string()))?;
        let centered = x - &global_mean;
        let mut pooled = centered.t().dot(&centered) / n as f64;
        for i in 0..d {
            pooled[[i, i]] += self.config.reg_covar.max(1e-10);
        }
        let mut covariances = vec![pooled; k];

        let mut precisions = Vec::with_capacity(k);
        let mut log_det_covs = Vec::with_capacity(k);
        for cov in &covariances {
            let (prec, log_det) = linalg::spd_inverse_jittered(cov)?;
            precisions.push(prec);
            log_det_covs.push(log_det);
        }

        let mut converged = false;
        let mut n_iter = 0;
        let mut prev_ll = f64::NEG_INFINITY;

        for iter in 0..self.config.max_iter {
            n_iter = iter + 1;

            // E-step: responsibilities and mean log-likelihood
            let log_weights: Vec<f64> = weights.iter().map(|&w| w.max(1e-300).ln()).collect();
            let rows: Vec<(Vec<f64>, f64)> = (0..n)
                .into_par_iter()
                .map(|i| {
                    let row = x.row(i);
                    let log_probs: Vec<f64> = (0..k)
                        .map(|c| {
                            log_weights[c]
                                + log_gaussian(
                                    &row,
                                    &means.row(c),
                                    &precisions[c],
                                    log_det_covs[c],
                                )
                        })
                        .collect();
                    let norm = log_sum_exp(&log_probs);
                    let resp: Vec<f64> = log_probs.iter().map(|&lp| (lp - norm).exp()).collect();
                    (resp, norm)
                })
                .collect();

            let ll = rows.iter().map(|(_, norm)| norm).sum::<f64>() / n as f64;

            if (ll - prev_ll).abs() < self.config.tol {
                converged = true;
                break;
            }
            prev_ll = ll;

            // M-step
            let mut nk = vec![0.0f64; k];
            for (resp, _) in &rows {
                for c in 0..k {
                    nk[c] += resp[c];
                }
            }

            for c in 0..k {
                let nk_c = nk[c].max(1e-10);
                weights[c] = nk_c / n as f64;

                let mut mean_c = Array1::<f64>::zeros(d);
                for (i, (resp, _)) in rows.iter().enumerate() {
                    mean_c.scaled_add(resp[c], &x.row(i));
                }
                mean_c /= nk_c;
                means.row_mut(c).assign(&mean_c);

                let mut cov = Array2::<f64>::zeros((d, d));
                for (i, (resp, _)) in rows.iter().enumerate() {
                    let diff = &x.row(i) - &mean_c;
                    let r = resp[c];
                    for a in 0..d {
                        let ra = r * diff[a];
                        for b in 0..d {
                            cov[[a, b]] += ra * diff[b];
                        }
                    }
                }
                cov /= nk_c;
                for i in 0..d {
                    cov[[i, i]] += self.config.reg_covar.max(1e-10);
                }

                let (prec, log_det) = linalg::spd_inverse_jittered(&cov)?;
                covariances[c] = cov;
                precisions[c] = prec;
                log_det_covs[c] = log_det;
            }
        }

        if !converged {
            warn!(
                n_iter,
                tol = self.config.tol,
                "EM did not converge; using last iterate"
            );
        }

        let model = MixtureModel {
            weights,
            means,
            covariances,
            precisions,
            log_det_covs,
            converged,
            n_iter,
        };

        let scores = log_mixture_density(&model, x).mapv(|ll| -ll);
        let threshold = detector::calibrate_threshold(&scores, self.config.false_positive_rate);

        if self.config.verbose {
            info!(
                n_samples = n,
                n_features = d,
                n_components = k,
                n_iter = model.n_iter,
                converged = model.converged,
                threshold,
                "fitted mixture detector"
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
                detector::check_n_features(x, fitted.model.means.ncols())?;
                x
            }
            None => &fitted.x_train,
        };
        Ok(log_mixture_density(&fitted.model, x).mapv(|ll| -ll))
    }

    fn score(&self, x: &Array2<f64>) -> Result<f64> {
        let fitted = self.fitted.as_ref().ok_or(OutlierError::NotFitted)?;
        detector::check_matrix(x)?;
        detector::check_n_features(x, fitted.model.means.ncols())?;

        let log_density = log_mixture_density(&fitted.model, x);
        Ok(log_density.sum() / x.nrows() as f64)
    }

    fn threshold(&self) -> Result<f64> {
        self.fitted
            .as_ref()
            .map(|f| f.threshold)
            .ok_or(OutlierError::NotFitted)
    }
}
