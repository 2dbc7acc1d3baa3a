//! Symmetric eigendecomposition via cyclic Jacobi rotations

use crate::error::{OutlierError, Result};
use ndarray::{Array1, Array2};

const MAX_SWEEPS: usize = 100;

/// Eigendecomposition of a symmetric matrix.
///
/// Returns `(values, vectors)` with eigenvalues sorted in descending order
/// and the matching eigenvectors as columns of `vectors`.
pub fn symmetric_eigen(a: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(OutlierError::Shape(format!(
            "expected square matrix, got {}x{}",
            a.nrows(),
            a.ncols()
        )));
    }

    let mut m = a.clone();
    let mut v: Array2<f64> = Array2::eye(n);
    let scale: f64 = a.iter().map(|x| x.abs()).fold(0.0, f64::max).max(1.0);

    for _sweep in 0..MAX_SWEEPS {
        let off: f64 = off_diagonal_norm(&m);
        if off < 1e-14 * scale {
            break;
        }

        for p in 0..n.saturating_sub(1) {
            for q in (p + 1)..n {
                let apq = m[[p, q]];
                if apq.abs() < 1e-300 {
                    continue;
                }

                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * apq);
                let sign = if theta >= 0.0 { 1.0 } else { -1.0 };
                let t = sign / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                // Similarity transform M = J^T M J on rows/columns p, q
                for k in 0..n {
                    let mkp = m[[k, p]];
                    let mkq = m[[k, q]];
                    m[[k, p]] = c * mkp - s * mkq;
                    m[[k, q]] = s * mkp + c * mkq;
                }
                for k in 0..n {
                    let mpk = m[[p, k]];
                    let mqk = m[[q, k]];
                    m[[p, k]] = c * mpk - s * mqk;
                    m[[q, k]] = s * mpk + c * mqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    // Sort eigenpairs by eigenvalue, descending
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        m[[j, j]]
            .partial_cmp(&m[[i, i]])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let values = Array1::from_vec(order.iter().map(|&i| m[[i, i]]).collect());
    let mut vectors = Array2::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        vectors.column_mut(dst).assign(&v.column(src));
    }

    Ok((values, vectors))
}

fn off_diagonal_norm(m: &Array2<f64>) -> f64 {
    let n = m.nrows();
    let mut sum = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                sum += m[[i, j]] * m[[i, j]];
            }
        }
    }
    sum.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_eigen_diagonal() {
        let a = array![[3.0, 0.0], [0.0, 1.0]];
        let (values, _) = symmetric_eigen(&a).unwrap();
        assert!((values[0] - 3.0).abs() < 1e-12);
        assert!((values[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_eigen_reconstructs() {
        let a = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let (values, vectors) = symmetric_eigen(&a).unwrap();

        // A = V diag(values) V^T
        let mut recon: Array2<f64> = Array2::zeros((3, 3));
        for k in 0..3 {
            let vk = vectors.column(k);
            for i in 0..3 {
                for j in 0..3 {
                    recon[[i, j]] += values[k] * vk[i] * vk[j];
                }
            }
        }
        for i in 0..3 {
            for j in 0..3 {
                assert!((recon[[i, j]] - a[[i, j]]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_eigen_descending_order() {
        let a = array![[1.0, 0.3, 0.1], [0.3, 5.0, 0.2], [0.1, 0.2, 3.0]];
        let (values, _) = symmetric_eigen(&a).unwrap();
        assert!(values[0] >= values[1]);
        assert!(values[1] >= values[2]);
    }

    #[test]
    fn test_eigenvectors_orthonormal() {
        let a = array![[2.0, 1.0], [1.0, 2.0]];
        let (_, vectors) = symmetric_eigen(&a).unwrap();
        let gram = vectors.t().dot(&vectors);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[[i, j]] - expected).abs() < 1e-12);
            }
        }
    }
}
