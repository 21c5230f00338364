use glam::{DMat3, DQuat, DVec3};
use nalgebra::{DMatrix, Matrix3, Matrix3x4, Matrix4, SMatrix, SVector, SymmetricEigen, Vector3, Vector4};

use crate::{PnPError, RigidTransform};

/// Checks that both sides have the same length and at least `required` entries.
pub(crate) fn check_correspondences(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    required: usize,
) -> Result<(), PnPError> {
    if world.len() != image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: world.len(),
            right_name: "image points",
            right_len: image.len(),
        });
    }
    if world.len() < required {
        return Err(PnPError::InsufficientCorrespondences {
            required,
            actual: world.len(),
        });
    }
    Ok(())
}

/// Compute the centroid of a set of points.
pub(crate) fn compute_centroid(pts: &[[f64; 3]]) -> DVec3 {
    let sum = pts.iter().fold(DVec3::ZERO, |acc, &p| acc + DVec3::from(p));
    sum / pts.len() as f64
}

/// Construct compact intrinsics vectors used for fast projection.
pub(crate) fn intrinsics_as_vectors(k: &[[f64; 3]; 3]) -> (DVec3, DVec3) {
    (
        DVec3::new(k[0][0], k[0][1], k[0][2]),
        DVec3::new(0.0, k[1][1], k[1][2]),
    )
}

/// Convert array-form pose to glam types.
pub(crate) fn pose_to_rt(r: &[[f64; 3]; 3], t: &[f64; 3]) -> (DMat3, DVec3) {
    (DMat3::from_cols_array_2d(r).transpose(), DVec3::from_array(*t))
}

/// Convert a glam rotation back to a row-major array.
pub(crate) fn rotation_to_array(r: &DMat3) -> [[f64; 3]; 3] {
    r.transpose().to_cols_array_2d()
}

pub(crate) fn rotation_to_rvec(r: &DMat3) -> [f64; 3] {
    DQuat::from_mat3(r).normalize().to_scaled_axis().to_array()
}

pub(crate) fn rvec_to_rotation(rvec: &[f64; 3]) -> DMat3 {
    DMat3::from_quat(DQuat::from_scaled_axis(DVec3::from_array(*rvec)))
}

pub(crate) fn to_na(m: &DMat3) -> Matrix3<f64> {
    Matrix3::from_column_slice(&m.to_cols_array())
}

pub(crate) fn from_na(m: &Matrix3<f64>) -> DMat3 {
    DMat3::from_cols_slice(m.as_slice())
}

/// Compute squared reprojection error for a single correspondence.
/// If `skip_if_behind` is true, returns `None` for points with non-positive depth.
pub(crate) fn project_sq_error(
    world_point: &[f64; 3],
    image_point: &[f64; 2],
    r_mat: &DMat3,
    t_vec: &DVec3,
    intr_x: &DVec3,
    intr_y: &DVec3,
    skip_if_behind: bool,
) -> Option<f64> {
    let pc = *r_mat * DVec3::from_array(*world_point) + *t_vec;
    if skip_if_behind && pc.z <= 0.0 {
        return None;
    }
    let inv_z = 1.0 / pc.z;
    let du = intr_x.dot(pc) * inv_z - image_point[0];
    let dv = intr_y.dot(pc) * inv_z - image_point[1];
    Some(du.mul_add(du, dv * dv))
}

/// Reprojection error, in pixels, of every correspondence under `pose`.
///
/// Points at or behind the camera plane get `f64::INFINITY`.
pub fn reprojection_errors(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    pose: &RigidTransform,
) -> Vec<f64> {
    let (r, t) = pose_to_rt(&pose.rotation, &pose.translation);
    let (ix, iy) = intrinsics_as_vectors(k);
    world
        .iter()
        .zip(image)
        .map(|(pw, uv)| {
            project_sq_error(pw, uv, &r, &t, &ix, &iy, true).map_or(f64::INFINITY, f64::sqrt)
        })
        .collect()
}

/// Root-mean-square reprojection error over all correspondences.
pub(crate) fn reprojection_rmse(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    r: &DMat3,
    t: &DVec3,
) -> f64 {
    let (ix, iy) = intrinsics_as_vectors(k);
    let sum: f64 = world
        .iter()
        .zip(image)
        .filter_map(|(pw, uv)| project_sq_error(pw, uv, r, t, &ix, &iy, false))
        .sum();
    (sum / world.len().max(1) as f64).sqrt()
}

/// Principal axes of a point cloud.
///
/// Returns the centroid, the eigenvalues of the covariance in descending order and the
/// matching unit eigenvectors.
pub(crate) fn principal_axes(pts: &[[f64; 3]]) -> (DVec3, [f64; 3], [DVec3; 3]) {
    let c = compute_centroid(pts);
    let mut cov = Matrix3::<f64>::zeros();
    for p in pts {
        let d = Vector3::new(p[0] - c.x, p[1] - c.y, p[2] - c.z);
        cov += d * d.transpose();
    }
    cov /= pts.len() as f64;

    let eig = SymmetricEigen::new(cov);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let values = order.map(|i| eig.eigenvalues[i].max(0.0));
    let axes = order.map(|i| {
        let v = eig.eigenvectors.column(i);
        DVec3::new(v[0], v[1], v[2])
    });
    (c, values, axes)
}

/// Projects an arbitrary 3x3 matrix onto the closest rotation.
pub(crate) fn nearest_rotation(m: &DMat3) -> Option<DMat3> {
    let svd = to_na(m).svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let weakest = svd.singular_values.imin();
        let mut u_fixed = u;
        u_fixed.column_mut(weakest).neg_mut();
        r = u_fixed * v_t;
    }
    Some(from_na(&r))
}

/// Least-squares rigid alignment `dst ≈ R src + t` of two index-aligned point sets.
pub(crate) fn kabsch(src: &[DVec3], dst: &[DVec3]) -> Option<(DMat3, DVec3)> {
    let n = src.len() as f64;
    let cs = src.iter().fold(DVec3::ZERO, |a, &p| a + p) / n;
    let cd = dst.iter().fold(DVec3::ZERO, |a, &p| a + p) / n;

    let mut h = Matrix3::<f64>::zeros();
    for (s, d) in src.iter().zip(dst) {
        let ds = *d - cd;
        let ss = *s - cs;
        h += Vector3::new(ds.x, ds.y, ds.z) * Vector3::new(ss.x, ss.y, ss.z).transpose();
    }

    let r = nearest_rotation(&from_na(&h))?;
    Some((r, cd - r * cs))
}

const NUM_CONTROL_POINTS: usize = 4;
const MAX_ITERATIONS: usize = 10;
pub(crate) const PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];
const NUM_PAIRS: usize = PAIRS.len();

/// Solves `A x = b` for a 4x4 symmetric positive-definite `A`.
///
/// Returns `None` if `A` is not positive-definite.
#[inline]
pub(crate) fn solve_4x4_cholesky(a: &Matrix4<f64>, b: &Vector4<f64>) -> Option<Vector4<f64>> {
    a.cholesky().map(|chol| chol.solve(b))
}

/// Refines the EPnP betas with Gauss-Newton so that the control point distances match `rho`.
pub(crate) fn gauss_newton(beta_init: [f64; 4], null4: &DMatrix<f64>, rho: &[f64; 6]) -> [f64; 4] {
    const DAMPING: f64 = 1e-12;
    const STOP_EPS: f64 = 1e-12;

    let mut bet = Vector4::from(beta_init);
    let rho_vec = SVector::<f64, NUM_PAIRS>::from_row_slice(rho);

    for _ in 0..MAX_ITERATIONS {
        let mut vs = [Vector3::zeros(); NUM_CONTROL_POINTS];
        for (i, v) in vs.iter_mut().enumerate() {
            let m: Matrix3x4<f64> = null4.fixed_view::<3, 4>(i * 3, 0).into();
            *v = m * bet;
        }

        let mut f = SVector::<f64, NUM_PAIRS>::zeros();
        let mut j = SMatrix::<f64, NUM_PAIRS, NUM_CONTROL_POINTS>::zeros();

        for (r, &(a, b)) in PAIRS.iter().enumerate() {
            let diff = vs[a] - vs[b];
            f[r] = diff.norm_squared() - rho_vec[r];

            let rows_a = null4.fixed_rows::<3>(a * 3);
            let rows_b = null4.fixed_rows::<3>(b * 3);
            for c in 0..NUM_CONTROL_POINTS {
                let d_col = rows_a.column(c) - rows_b.column(c);
                j[(r, c)] = 2.0 * diff.dot(&d_col);
            }
        }

        let mut a = j.transpose() * j;
        for d in 0..NUM_CONTROL_POINTS {
            a[(d, d)] += DAMPING;
        }
        let b = j.transpose() * f;

        match solve_4x4_cholesky(&a, &b) {
            Some(delta) => {
                bet -= delta;
                if delta.norm() < STOP_EPS {
                    break;
                }
            }
            None => break,
        }
    }

    bet.into()
}
