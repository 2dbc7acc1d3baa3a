//! Cholesky factorization and SPD matrix routines

use crate::error::{OutlierError, Result};
use ndarray::{Array1, Array2};

/// Lower-triangular Cholesky factor L with A = L * L^T.
/// Fails when A is not positive definite.
pub fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(OutlierError::Shape(format!(
            "expected square matrix, got {}x{}",
            a.nrows(),
            a.ncols()
        )));
    }

    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let val = a[[i, i]] - sum;
                if val <= 0.0 {
                    return Err(OutlierError::Computation(
                        "matrix is not positive definite".to_string(),
                    ));
                }
                l[[i, j]] = val.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }
    Ok(l)
}

/// Forward substitution: solve L * y = b for lower-triangular L
pub fn solve_lower(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * y[j]).sum();
        y[i] = (b[i] - sum) / l[[i, i]];
    }
    y
}

/// Back substitution: solve L^T * x = y for lower-triangular L
pub fn solve_upper(l: &Array2<f64>, y: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (y[i] - sum) / l[[i, i]];
    }
    x
}

/// log|A| from the Cholesky factor of A
pub fn log_det_from_cholesky(l: &Array2<f64>) -> f64 {
    2.0 * (0..l.nrows()).map(|i| l[[i, i]].ln()).sum::<f64>()
}

/// Inverse and log-determinant of a symmetric positive-definite matrix,
/// computed column by column from the Cholesky factor.
pub fn spd_inverse(a: &Array2<f64>) -> Result<(Array2<f64>, f64)> {
    let l = cholesky(a)?;
    let n = a.nrows();
    let log_det = log_det_from_cholesky(&l);

    let mut inv = Array2::zeros((n, n));
    let mut e = Array1::zeros(n);
    for col in 0..n {
        e[col] = 1.0;
        let y = solve_lower(&l, &e);
        let x = solve_upper(&l, &y);
        inv.column_mut(col).assign(&x);
        e[col] = 0.0;
    }

    // Symmetrize against substitution round-off
    for i in 0..n {
        for j in 0..i {
            let v = 0.5 * (inv[[i, j]] + inv[[j, i]]);
            inv[[i, j]] = v;
            inv[[j, i]] = v;
        }
    }

    Ok((inv, log_det))
}

/// `spd_inverse` with escalating diagonal jitter for near-singular input.
/// Retries with jitter 1e-8, 1e-6, ... 1e-2 before giving up.
pub fn spd_inverse_jittered(a: &Array2<f64>) -> Result<(Array2<f64>, f64)> {
    if let Ok(res) = spd_inverse(a) {
        return Ok(res);
    }

    let n = a.nrows();
    let mut jitter = 1e-8;
    while jitter <= 1e-2 {
        let mut regularized = a.clone();
        for i in 0..n {
            regularized[[i, i]] += jitter;
        }
        if let Ok(res) = spd_inverse(&regularized) {
            return Ok(res);
        }
        jitter *= 100.0;
    }

    Err(OutlierError::Computation(
        "matrix is singular even after diagonal regularization".to_string(),
    ))
}
