//! Numerical primitives backing the detectors
//!
//! Narrow, function-level interfaces so detector code never touches
//! factorization internals: Cholesky-based SPD routines, a Jacobi
//! eigensolver, and the special functions needed by the directional and
//! empirical models.

pub mod cholesky;
pub mod eigen;
pub mod special;

pub use cholesky::{
    cholesky, log_det_from_cholesky, solve_lower, solve_upper, spd_inverse, spd_inverse_jittered,
};
pub use eigen::symmetric_eigen;
pub use special::{lgamma, log_add_exp, log_bessel_i, log_sum_exp};
