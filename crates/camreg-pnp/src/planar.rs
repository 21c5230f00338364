//! Pose from coplanar correspondences through a plane-to-image homography.
//!
//! The points are expressed in a frame attached to their best-fit plane, the homography
//! from that plane to normalized image coordinates is estimated with a normalized DLT and
//! decomposed into `[r1 r2 t]`.

use crate::ops::{
    check_correspondences, nearest_rotation, principal_axes, reprojection_rmse, rotation_to_array,
    rotation_to_rvec,
};
use crate::types::{NumericTol, PnPError, PnPResult, PnPSolver};
use glam::{DMat3, DVec2, DVec3};
use nalgebra::{DMatrix, SymmetricEigen};

/// Smallest-to-largest spread ratio below which a point set counts as planar.
const PLANAR_RATIO: f64 = 1e-4;
/// Middle-to-largest spread ratio below which a point set counts as collinear.
const COLLINEAR_RATIO: f64 = 1e-8;

/// Shape of a 3D point set as seen by the solvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointConfiguration {
    /// Points span 3D space.
    General,
    /// Points lie on a plane.
    Planar,
    /// Points coincide or lie on a line, no pose can be recovered.
    Degenerate,
}

/// Classifies a point set from the eigenvalues of its covariance.
pub fn classify_configuration(world: &[[f64; 3]]) -> PointConfiguration {
    if world.len() < 3 {
        return PointConfiguration::Degenerate;
    }
    let (_, values, _) = principal_axes(world);
    if !values.iter().all(|v| v.is_finite()) || values[0] <= f64::EPSILON * f64::EPSILON {
        return PointConfiguration::Degenerate;
    }
    if values[1] / values[0] < COLLINEAR_RATIO {
        PointConfiguration::Degenerate
    } else if values[2] / values[0] < PLANAR_RATIO {
        PointConfiguration::Planar
    } else {
        PointConfiguration::General
    }
}

/// Marker type for the planar solver.
pub struct Planar;

/// Parameters controlling the planar solver.
#[derive(Debug, Clone, Default)]
pub struct PlanarParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
}

impl PnPSolver for Planar {
    type Param = PlanarParams;

    fn solve(
        world: &[[f64; 3]],
        image: &[[f64; 2]],
        k: &[[f64; 3]; 3],
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        solve_planar(world, image, k, params)
    }
}

/// Solve Perspective-n-Point for points lying (approximately) on a plane.
///
/// Points off the plane are projected onto it, so the result is exact only for
/// coplanar input. Fails with [`PnPError::SolverDivergence`] on collinear points.
pub fn solve_planar(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    params: &PlanarParams,
) -> Result<PnPResult, PnPError> {
    check_correspondences(world, image, 4)?;
    if classify_configuration(world) == PointConfiguration::Degenerate {
        return Err(PnPError::SolverDivergence(
            "points are collinear or coincident".to_string(),
        ));
    }

    // plane frame: origin at the centroid, z along the normal
    let (c, _, axes) = principal_axes(world);
    let e1 = axes[0];
    let e2 = axes[1];
    let plane_from_world = DMat3::from_cols(e1, e2, e1.cross(e2)).transpose();

    let plane: Vec<DVec2> = world
        .iter()
        .map(|p| (plane_from_world * (DVec3::from_array(*p) - c)).truncate())
        .collect();
    let (fx, fy, cx, cy) = (k[0][0], k[1][1], k[0][2], k[1][2]);
    let normalized: Vec<DVec2> = image
        .iter()
        .map(|uv| DVec2::new((uv[0] - cx) / fx, (uv[1] - cy) / fy))
        .collect();

    let h = homography_dlt(&plane, &normalized, params.tol.eps)?;
    let (camera_from_plane, t) = decompose_h_normalized(&h)?;

    let r = camera_from_plane * plane_from_world;
    let t = t - r * c;
    if !(r.is_finite() && t.is_finite()) {
        return Err(PnPError::SolverDivergence("non-finite planar pose".to_string()));
    }

    Ok(PnPResult {
        rotation: rotation_to_array(&r),
        translation: t.to_array(),
        rvec: rotation_to_rvec(&r),
        reproj_rmse: Some(reprojection_rmse(world, image, k, &r, &t)),
        num_iterations: None,
        converged: Some(true),
    })
}

/// Similarity moving `pts` to zero mean and an average distance of sqrt(2) from the origin.
fn normalizing_transform(pts: &[DVec2]) -> DMat3 {
    let n = pts.len() as f64;
    let mean = pts.iter().fold(DVec2::ZERO, |a, &p| a + p) / n;
    let spread = pts.iter().map(|p| p.distance(mean)).sum::<f64>() / n;
    let s = if spread > 0.0 {
        std::f64::consts::SQRT_2 / spread
    } else {
        1.0
    };
    DMat3::from_cols(
        DVec3::new(s, 0.0, 0.0),
        DVec3::new(0.0, s, 0.0),
        DVec3::new(-s * mean.x, -s * mean.y, 1.0),
    )
}

/// Homography mapping `src` to `dst` in the least-squares algebraic sense.
fn homography_dlt(src: &[DVec2], dst: &[DVec2], eps: f64) -> Result<DMat3, PnPError> {
    let ts = normalizing_transform(src);
    let td = normalizing_transform(dst);

    let mut a = DMatrix::<f64>::zeros(2 * src.len(), 9);
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        let p = ts * s.extend(1.0);
        let q = td * d.extend(1.0);
        let (x, y) = (p.x, p.y);
        let (u, v) = (q.x, q.y);
        a.row_mut(2 * i)
            .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u]);
        a.row_mut(2 * i + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v]);
    }

    // null vector of A from the normal equations, valid for the 8x9 minimal system too
    let eig = SymmetricEigen::new(a.transpose() * &a);
    let smallest = eig.eigenvalues.imin();
    let h = eig.eigenvectors.column(smallest);

    let hn = DMat3::from_cols_array(&[h[0], h[3], h[6], h[1], h[4], h[7], h[2], h[5], h[8]]);
    if td.determinant().abs() <= eps {
        return Err(PnPError::SvdFailed("degenerate image points".to_string()));
    }
    let hmat = td.inverse() * hn * ts;
    if !hmat.is_finite() {
        return Err(PnPError::SvdFailed("non-finite homography".to_string()));
    }
    Ok(hmat)
}

/// Decompose a plane-to-normalized-image homography into rotation and translation,
/// choosing the sign that puts the plane in front of the camera.
fn decompose_h_normalized(h: &DMat3) -> Result<(DMat3, DVec3), PnPError> {
    let (h1, h2, h3) = (h.x_axis, h.y_axis, h.z_axis);
    let norms = h1.length() * h2.length();
    if norms <= f64::EPSILON {
        return Err(PnPError::SolverDivergence("degenerate homography".to_string()));
    }

    let mut s = 1.0 / norms.sqrt();
    if h3.z * s < 0.0 {
        s = -s;
    }
    let r1 = h1 * s;
    let r2 = h2 * s;
    let r = nearest_rotation(&DMat3::from_cols(r1, r2, r1.cross(r2)))
        .ok_or_else(|| PnPError::SvdFailed("rotation projection failed".to_string()))?;

    Ok((r, h3 * s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{pose_to_rt, rvec_to_rotation};

    fn project(world: &[[f64; 3]], r: &DMat3, t: DVec3, k: &[[f64; 3]; 3]) -> Vec<[f64; 2]> {
        world
            .iter()
            .map(|p| {
                let pc = *r * DVec3::from_array(*p) + t;
                [k[0][0] * pc.x / pc.z + k[0][2], k[1][1] * pc.y / pc.z + k[1][2]]
            })
            .collect()
    }

    #[test]
    fn test_classify_configuration() {
        let general = [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.5], [0.3, 0.2, 2.0]];
        let planar = [[0.0, 0.0, 2.0], [1.0, 0.0, 2.0], [0.0, 1.0, 2.0], [1.0, 1.0, 2.0]];
        let line = [[0.0, 0.0, 2.0], [1.0, 1.0, 2.0], [2.0, 2.0, 2.0], [3.0, 3.0, 2.0]];
        assert_eq!(classify_configuration(&general), PointConfiguration::General);
        assert_eq!(classify_configuration(&planar), PointConfiguration::Planar);
        assert_eq!(classify_configuration(&line), PointConfiguration::Degenerate);
        assert_eq!(classify_configuration(&[[1.0; 3]; 5]), PointConfiguration::Degenerate);
    }

    #[test]
    fn test_square_facing_camera() -> Result<(), PnPError> {
        let k = [[600.0, 0.0, 320.0], [0.0, 600.0, 240.0], [0.0, 0.0, 1.0]];
        let world = [
            [-0.25, -0.25, 2.0],
            [0.25, -0.25, 2.0],
            [0.25, 0.25, 2.0],
            [-0.25, 0.25, 2.0],
        ];
        let image = project(&world, &DMat3::IDENTITY, DVec3::ZERO, &k);

        let res = solve_planar(&world, &image, &k, &PlanarParams::default())?;
        let (r, t) = pose_to_rt(&res.rotation, &res.translation);
        assert!(r.abs_diff_eq(DMat3::IDENTITY, 1e-9));
        assert!(t.abs_diff_eq(DVec3::ZERO, 1e-9));
        assert!(res.reproj_rmse.unwrap_or(f64::INFINITY) < 1e-6);
        Ok(())
    }

    #[test]
    fn test_tilted_plane() -> Result<(), PnPError> {
        let k = [[800.0, 0.0, 640.0], [0.0, 800.0, 480.0], [0.0, 0.0, 1.0]];
        let tilt = rvec_to_rotation(&[0.4, 0.1, -0.2]);
        let world: Vec<[f64; 3]> = (0..9)
            .map(|i| {
                let p = DVec3::new((i % 3) as f64 * 0.2, (i / 3) as f64 * 0.15, 0.0);
                (tilt * p + DVec3::new(0.0, 0.0, 3.0)).to_array()
            })
            .collect();
        let r_true = rvec_to_rotation(&[-0.1, 0.25, 0.05]);
        let t_true = DVec3::new(0.2, -0.1, 0.4);
        let image = project(&world, &r_true, t_true, &k);

        let res = solve_planar(&world, &image, &k, &PlanarParams::default())?;
        let (r, t) = pose_to_rt(&res.rotation, &res.translation);
        assert!(r.abs_diff_eq(r_true, 1e-6));
        assert!(t.abs_diff_eq(t_true, 1e-6));
        Ok(())
    }

    #[test]
    fn test_collinear_diverges() {
        let k = [[600.0, 0.0, 320.0], [0.0, 600.0, 240.0], [0.0, 0.0, 1.0]];
        let world = [[0.0, 0.0, 2.0], [0.1, 0.0, 2.0], [0.2, 0.0, 2.0], [0.3, 0.0, 2.0]];
        let image = [[320.0, 240.0], [350.0, 240.0], [380.0, 240.0], [410.0, 240.0]];
        assert!(matches!(
            solve_planar(&world, &image, &k, &PlanarParams::default()),
            Err(PnPError::SolverDivergence(_))
        ));
    }
}
