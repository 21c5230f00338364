//! Common data types shared across the PnP solvers.

use thiserror::Error;

/// Error types for PnP solvers.
#[derive(Debug, Error, PartialEq)]
pub enum PnPError {
    /// Not enough correspondences for the solver.
    #[error("PnP solver requires at least {required} 2D-3D correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the solver.
        required: usize,
        /// Number of correspondences provided.
        actual: usize,
    },

    /// The two sides of the correspondence set differ in length.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Name of the first array.
        left_name: &'static str,
        /// Length of the first array.
        left_len: usize,
        /// Name of the second array.
        right_name: &'static str,
        /// Length of the second array.
        right_len: usize,
    },

    /// A linear algebra decomposition failed.
    #[error("SVD computation failed: {0}")]
    SvdFailed(String),

    /// The solver produced no usable pose, e.g. on a degenerate point configuration.
    #[error("PnP solver diverged: {0}")]
    SolverDivergence(String),
}

/// Numeric tolerances used by the linear algebra routines.
#[derive(Debug, Clone, Copy)]
pub struct NumericTol {
    /// Tolerance passed to SVD based solves.
    pub svd: f64,
    /// Threshold below which a determinant or eigenvalue counts as zero.
    pub eps: f64,
}

impl Default for NumericTol {
    fn default() -> Self {
        Self {
            svd: 1e-12,
            eps: 1e-12,
        }
    }
}

/// Rigid transform mapping world points into the camera frame, `p_c = R p_w + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    /// Row-major rotation matrix.
    pub rotation: [[f64; 3]; 3],
    /// Translation vector.
    pub translation: [f64; 3],
}

impl RigidTransform {
    /// Returns true if every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.rotation.iter().flatten().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite())
    }
}

/// Result returned by any PnP solver.
///
/// The rotation maps coordinates from the **world** frame to the **camera** frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PnPResult {
    /// Estimated row-major rotation matrix.
    pub rotation: [[f64; 3]; 3],
    /// Estimated translation vector.
    pub translation: [f64; 3],
    /// Rodrigues axis-angle representation of `rotation`.
    pub rvec: [f64; 3],
    /// Root-mean-square reprojection error in pixels over the points used.
    pub reproj_rmse: Option<f64>,
    /// Number of iterations taken by an iterative solver.
    pub num_iterations: Option<usize>,
    /// Whether an iterative solver reported convergence.
    pub converged: Option<bool>,
}

impl PnPResult {
    /// The pose as a [`RigidTransform`].
    pub fn transform(&self) -> RigidTransform {
        RigidTransform {
            rotation: self.rotation,
            translation: self.translation,
        }
    }
}

/// Trait implemented by every PnP solver in this crate.
pub trait PnPSolver {
    /// Parameter object specific to the solver.
    type Param;

    /// Runs the solver.
    fn solve(
        world: &[[f64; 3]],
        image: &[[f64; 2]],
        k: &[[f64; 3]; 3],
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError>;
}
