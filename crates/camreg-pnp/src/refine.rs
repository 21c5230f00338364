//! Levenberg–Marquardt pose refinement for PnP solutions.

use crate::ops::{check_correspondences, intrinsics_as_vectors, rvec_to_rotation};
use crate::types::PnPError;
use glam::DVec3;
use nalgebra::{Matrix6, Vector6};

/// Parameters controlling the LM pose refinement.
#[derive(Debug, Clone)]
pub struct LMParams {
    /// Maximum number of LM iterations.
    pub max_iters: usize,
    /// Convergence threshold on the relative decrease of the squared reprojection error.
    pub eps: f64,
    /// Initial damping factor (lambda).
    pub lambda_init: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_mul: f64,
}

impl Default for LMParams {
    fn default() -> Self {
        Self {
            max_iters: 30,
            eps: 1e-12,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
        }
    }
}

/// Refine a pose (rvec, t) with Levenberg–Marquardt to minimize pixel reprojection error.
///
/// - `world`: World points (N,3)
/// - `image`: Pixel points (N,2)
/// - `k`: Intrinsics 3x3
/// - `rvec`: Initial axis-angle rotation (input/output)
/// - `t`: Initial translation (input/output)
///
/// Returns `(rmse, num_iters, converged)` and writes the refined `rvec` and `t` in place.
pub fn refine_pose_lm(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    rvec: &mut [f64; 3],
    t: &mut [f64; 3],
    params: &LMParams,
) -> Result<(f64, usize, bool), PnPError> {
    check_correspondences(world, image, 3)?;
    let n = world.len();

    let (intr_x, intr_y) = intrinsics_as_vectors(k);

    // writes residuals into `out`, returns their squared sum
    let project_all = |x: &Vector6<f64>, out: &mut [f64]| -> f64 {
        let r_mat = rvec_to_rotation(&[x[0], x[1], x[2]]);
        let t_vec = DVec3::new(x[3], x[4], x[5]);

        let mut sum_sq = 0.0;
        for (i, (pw, uv)) in world.iter().zip(image).enumerate() {
            let pc = r_mat * DVec3::from_array(*pw) + t_vec;
            let inv_z = 1.0 / pc.z;
            let du = intr_x.dot(pc) * inv_z - uv[0];
            let dv = intr_y.dot(pc) * inv_z - uv[1];
            out[2 * i] = du;
            out[2 * i + 1] = dv;
            sum_sq += du.mul_add(du, dv * dv);
        }
        sum_sq
    };

    let mut x = Vector6::new(rvec[0], rvec[1], rvec[2], t[0], t[1], t[2]);
    let mut residuals = vec![0.0; 2 * n];
    let mut residuals_p = vec![0.0; 2 * n];
    let mut residuals_m = vec![0.0; 2 * n];
    let mut jac = vec![[0.0f64; 6]; 2 * n];

    let mut lambda = params.lambda_init;
    let mut err_sq = project_all(&x, &mut residuals);
    if !err_sq.is_finite() {
        return Err(PnPError::SolverDivergence(
            "initial pose projects to non-finite residuals".to_string(),
        ));
    }

    let mut iters = 0;
    let mut converged = false;

    while iters < params.max_iters {
        iters += 1;

        const H_ROT: f64 = 1e-6;
        let h_trans = 1e-6 * x.fixed_rows::<3>(3).amax().max(1.0);

        // central differences
        for c in 0..6 {
            let h = if c < 3 { H_ROT } else { h_trans };
            let mut x_plus = x;
            let mut x_minus = x;
            x_plus[c] += h;
            x_minus[c] -= h;
            project_all(&x_plus, &mut residuals_p);
            project_all(&x_minus, &mut residuals_m);
            for (row, (p, m)) in jac.iter_mut().zip(residuals_p.iter().zip(&residuals_m)) {
                row[c] = (p - m) / (2.0 * h);
            }
        }

        // (JᵀJ + λI) δ = -Jᵀr
        let mut a = Matrix6::<f64>::zeros();
        let mut b = Vector6::<f64>::zeros();
        for (row, &r) in jac.iter().zip(&residuals) {
            let j = Vector6::from_row_slice(row);
            a += j * j.transpose();
            b += j * r;
        }
        for d in 0..6 {
            a[(d, d)] += lambda;
        }

        let Some(delta) = a.lu().solve(&-b) else {
            lambda *= params.lambda_mul;
            continue;
        };

        let x_new = x + delta;
        let err_sq_new = project_all(&x_new, &mut residuals_p);
        if err_sq_new.is_finite() && err_sq_new < err_sq {
            let decrease = err_sq - err_sq_new;
            x = x_new;
            residuals.copy_from_slice(&residuals_p);
            err_sq = err_sq_new;
            lambda = (lambda / params.lambda_mul).max(1e-15);
            if decrease <= params.eps * err_sq.max(1e-12) {
                converged = true;
                break;
            }
        } else {
            lambda *= params.lambda_mul;
            if lambda > 1e12 {
                converged = true;
                break;
            }
        }
    }

    rvec.copy_from_slice(&[x[0], x[1], x[2]]);
    t.copy_from_slice(&[x[3], x[4], x[5]]);

    let rmse = (err_sq / n as f64).sqrt();
    Ok((rmse, iters, converged))
}
