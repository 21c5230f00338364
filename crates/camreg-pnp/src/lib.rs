#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Perspective-n-Point
//!
//! Camera pose from 3D-2D point correspondences.
//!
//! - **EPnP**: closed-form solver for points spanning 3D space.
//! - **Planar**: homography decomposition for coplanar points.
//! - **RANSAC**: robust estimation with an optional initial guess, followed by
//!   Levenberg–Marquardt refinement on the inliers.
//!
//! ## Example: RANSAC with a fixed seed
//!
//! ```rust
//! use camreg_pnp::{solve_pnp_ransac, PnPMethod, RansacParams};
//!
//! let k = [[600.0, 0.0, 320.0], [0.0, 600.0, 240.0], [0.0, 0.0, 1.0]];
//! let world = vec![
//!     [-0.25, -0.25, 2.0],
//!     [0.25, -0.25, 2.0],
//!     [0.25, 0.25, 2.0],
//!     [-0.25, 0.25, 2.0],
//!     [0.0, 0.1, 2.0],
//! ];
//! let image: Vec<[f64; 2]> = world
//!     .iter()
//!     .map(|p| [600.0 * p[0] / p[2] + 320.0, 600.0 * p[1] / p[2] + 240.0])
//!     .collect();
//!
//! let params = RansacParams {
//!     random_seed: Some(0),
//!     ..Default::default()
//! };
//! let result = solve_pnp_ransac(&world, &image, &k, PnPMethod::Auto, &params)?;
//! assert_eq!(result.inliers.len(), 5);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Efficient Perspective-n-Point (EPnP) solver.
pub mod epnp;

/// Homography based solver for coplanar points.
pub mod planar;

/// RANSAC-based robust PnP pose estimation.
pub mod ransac;

/// Levenberg–Marquardt pose refinement.
pub mod refine;

/// Common data types and traits for PnP solvers.
pub mod types;

mod ops;

pub use epnp::{EPnP, EPnPParams};
pub use ops::reprojection_errors;
pub use planar::{classify_configuration, Planar, PlanarParams, PointConfiguration};
pub use ransac::{solve_pnp_ransac, PnPRansacResult, RansacParams};
pub use refine::{refine_pose_lm, LMParams};
pub use types::{NumericTol, PnPError, PnPResult, PnPSolver, RigidTransform};

/// Enumeration of the Perspective-n-Point algorithms available in this crate.
#[derive(Debug, Clone, Default)]
pub enum PnPMethod {
    /// EPnP with a user-supplied parameter object.
    EPnP(EPnPParams),
    /// EPnP with default parameters.
    EPnPDefault,
    /// Homography decomposition, for coplanar points.
    Planar(PlanarParams),
    /// Planar solver for coplanar points, EPnP otherwise. Degenerate sets fail.
    #[default]
    Auto,
}

/// Dispatch function that routes to the chosen PnP solver.
pub fn solve_pnp(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    method: PnPMethod,
) -> Result<PnPResult, PnPError> {
    match method {
        PnPMethod::EPnP(params) => EPnP::solve(world, image, k, &params),
        PnPMethod::EPnPDefault => EPnP::solve(world, image, k, &EPnPParams::default()),
        PnPMethod::Planar(params) => Planar::solve(world, image, k, &params),
        PnPMethod::Auto => {
            ops::check_correspondences(world, image, 4)?;
            match classify_configuration(world) {
                PointConfiguration::General => {
                    EPnP::solve(world, image, k, &EPnPParams::default())
                }
                PointConfiguration::Planar => {
                    Planar::solve(world, image, k, &PlanarParams::default())
                }
                PointConfiguration::Degenerate => Err(PnPError::SolverDivergence(
                    "points are collinear or coincident".to_string(),
                )),
            }
        }
    }
}
