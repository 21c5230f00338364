//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf
//! Reference: https://github.com/opencv/opencv/blob/4.x/modules/calib3d/src/epnp.cpp

use crate::ops::{
    check_correspondences, from_na, gauss_newton, kabsch, principal_axes, reprojection_rmse,
    rotation_to_array, rotation_to_rvec, to_na, PAIRS,
};
use crate::types::{NumericTol, PnPError, PnPResult, PnPSolver};
use glam::{DMat3, DVec3};
use nalgebra::{DMatrix, DVector, SymmetricEigen, Vector4};

/// Marker type representing the Efficient PnP algorithm.
pub struct EPnP;

impl PnPSolver for EPnP {
    type Param = EPnPParams;

    fn solve(
        world: &[[f64; 3]],
        image: &[[f64; 2]],
        k: &[[f64; 3]; 3],
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        solve_epnp(world, image, k, params)
    }
}

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone, Default)]
pub struct EPnPParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
}

/// Solve Perspective-n-Point with EPnP.
///
/// # Arguments
/// * `world` – 3-D coordinates in the world frame, shape *(N,3)* with `N≥4`.
/// * `image` – Corresponding pixel coordinates, shape *(N,2)*.
/// * `k` – Camera intrinsics matrix.
///
/// The rotation and translation of the result map world points into the camera frame.
pub fn solve_epnp(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    params: &EPnPParams,
) -> Result<PnPResult, PnPError> {
    check_correspondences(world, image, 4)?;

    let cw = select_control_points(world);
    let alphas = compute_barycentric(world, &cw, params.tol.eps);

    let m = build_m(&alphas, image, k);
    let null4 = null_space4(&m);

    let l = build_l6x10(&null4);
    let rho = rho_ctrlpts(&cw);
    let rho_vec = DVector::<f64>::from_column_slice(&rho);

    let mut best: Option<(f64, DMat3, DVec3)> = None;
    let candidates = [
        estimate_beta(&[0, 1, 3, 6], &l, &rho_vec, params.tol.svd),
        estimate_beta(&[0, 1, 2], &l, &rho_vec, params.tol.svd),
        estimate_beta(&[0, 1, 2, 3, 4], &l, &rho_vec, params.tol.svd),
    ];

    for beta in candidates.into_iter().flatten() {
        let beta = gauss_newton(beta, &null4, &rho);
        let Some((r, t)) = pose_from_betas(&beta, &null4, world, &alphas) else {
            continue;
        };
        let err = reprojection_rmse(world, image, k, &r, &t);
        if err.is_finite() && best.as_ref().map_or(true, |(e, _, _)| err < *e) {
            best = Some((err, r, t));
        }
    }

    let (err, r, t) =
        best.ok_or_else(|| PnPError::SolverDivergence("no EPnP candidate pose".to_string()))?;

    Ok(PnPResult {
        rotation: rotation_to_array(&r),
        translation: t.to_array(),
        rvec: rotation_to_rvec(&r),
        reproj_rmse: Some(err),
        num_iterations: None,
        converged: Some(true),
    })
}

/// Centroid plus one control point along each principal axis, scaled by its spread.
fn select_control_points(world: &[[f64; 3]]) -> [DVec3; 4] {
    let (c, values, axes) = principal_axes(world);
    [
        c,
        c + values[0].sqrt() * axes[0],
        c + values[1].sqrt() * axes[1],
        c + values[2].sqrt() * axes[2],
    ]
}

/// Barycentric coordinates of the world points with respect to the control points.
///
/// If the control-point tetrahedron is flat (determinant below `eps`) a Moore–Penrose
/// pseudo-inverse replaces the inverse.
fn compute_barycentric(world: &[[f64; 3]], cw: &[DVec3; 4], eps: f64) -> Vec<[f64; 4]> {
    let b = DMat3::from_cols(cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]);

    let b_inv = if b.determinant().abs() > eps {
        b.inverse()
    } else {
        match to_na(&b).pseudo_inverse(eps) {
            Ok(p) => from_na(&p),
            Err(_) => DMat3::ZERO,
        }
    };

    world
        .iter()
        .map(|p| {
            let lamb = b_inv * (DVec3::from_array(*p) - cw[0]);
            [1.0 - (lamb.x + lamb.y + lamb.z), lamb.x, lamb.y, lamb.z]
        })
        .collect()
}

/// Construct the 2N×12 design matrix **M** used by EPnP.
fn build_m(alphas: &[[f64; 4]], image: &[[f64; 2]], k: &[[f64; 3]; 3]) -> DMatrix<f64> {
    let (fu, fv, uc, vc) = (k[0][0], k[1][1], k[0][2], k[1][2]);
    let mut m = DMatrix::<f64>::zeros(2 * alphas.len(), 12);

    for (i, (a, uv)) in alphas.iter().zip(image).enumerate() {
        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[(2 * i, base)] = alpha * fu;
            m[(2 * i, base + 2)] = alpha * (uc - uv[0]);
            m[(2 * i + 1, base + 1)] = alpha * fv;
            m[(2 * i + 1, base + 2)] = alpha * (vc - uv[1]);
        }
    }
    m
}

/// Eigenvectors of `MᵀM` for its four smallest eigenvalues, as the columns of a 12×4 matrix.
///
/// Column 0 belongs to the smallest eigenvalue. Working on `MᵀM` keeps this valid when
/// `M` has fewer rows than columns.
fn null_space4(m: &DMatrix<f64>) -> DMatrix<f64> {
    let eig = SymmetricEigen::new(m.transpose() * m);

    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));

    let mut null4 = DMatrix::<f64>::zeros(12, 4);
    for (c, &idx) in order.iter().take(4).enumerate() {
        null4.set_column(c, &eig.eigenvectors.column(idx));
    }
    null4
}

/// Control point blocks of null-space column `c`.
fn column_blocks(null4: &DMatrix<f64>, c: usize) -> [DVec3; 4] {
    let col = null4.column(c);
    [0, 1, 2, 3].map(|i| DVec3::new(col[3 * i], col[3 * i + 1], col[3 * i + 2]))
}

/// Build the 6×10 matrix **L** relating the quadratic beta terms to control point distances.
///
/// Column layout: `b00 b01 b11 b02 b12 b22 b03 b13 b23 b33`.
fn build_l6x10(null4: &DMatrix<f64>) -> [[f64; 10]; 6] {
    let v: [[DVec3; 4]; 4] = [0, 1, 2, 3].map(|c| column_blocks(null4, c));

    let mut l = [[0.0; 10]; 6];
    for (row, &(a, b)) in l.iter_mut().zip(PAIRS.iter()) {
        let dv = [0, 1, 2, 3].map(|i| v[i][a] - v[i][b]);
        *row = [
            dv[0].dot(dv[0]),
            2.0 * dv[0].dot(dv[1]),
            dv[1].dot(dv[1]),
            2.0 * dv[0].dot(dv[2]),
            2.0 * dv[1].dot(dv[2]),
            dv[2].dot(dv[2]),
            2.0 * dv[0].dot(dv[3]),
            2.0 * dv[1].dot(dv[3]),
            2.0 * dv[2].dot(dv[3]),
            dv[3].dot(dv[3]),
        ];
    }
    l
}

/// Squared distances between control point pairs.
fn rho_ctrlpts(cw: &[DVec3; 4]) -> [f64; 6] {
    PAIRS.map(|(a, b)| cw[a].distance_squared(cw[b]))
}

/// Solve for a beta vector given a column subset of the 6×10 L matrix.
fn estimate_beta(cols: &[usize], l: &[[f64; 10]; 6], rho: &DVector<f64>, tol_svd: f64) -> Option<[f64; 4]> {
    let l_sub = DMatrix::<f64>::from_fn(6, cols.len(), |r, c| l[r][cols[c]]);
    let x = l_sub.svd(true, true).solve(rho, tol_svd).ok()?;

    let beta = match cols.len() {
        4 => {
            let b0 = x[0].abs().sqrt();
            if b0 == 0.0 {
                return None;
            }
            let s = if x[0] < 0.0 { -1.0 } else { 1.0 };
            [b0, s * x[1] / b0, s * x[2] / b0, s * x[3] / b0]
        }
        3 | 5 => {
            let (mut b0, b1) = if x[0] < 0.0 {
                ((-x[0]).sqrt(), if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 })
            } else {
                (x[0].sqrt(), if x[2] > 0.0 { x[2].sqrt() } else { 0.0 })
            };
            if x[1] < 0.0 {
                b0 = -b0;
            }
            let b2 = if cols.len() == 5 && b0 != 0.0 { x[3] / b0 } else { 0.0 };
            [b0, b1, b2, 0.0]
        }
        _ => return None,
    };

    beta.iter().all(|b| b.is_finite()).then_some(beta)
}

/// Pose from a set of betas: camera-frame control points, sign fix, then rigid alignment
/// of every world point with its camera-frame reconstruction.
fn pose_from_betas(
    betas: &[f64; 4],
    null4: &DMatrix<f64>,
    world: &[[f64; 3]],
    alphas: &[[f64; 4]],
) -> Option<(DMat3, DVec3)> {
    let flat = null4 * Vector4::from_column_slice(betas);
    let mut cc = [0, 1, 2, 3].map(|i| DVec3::new(flat[3 * i], flat[3 * i + 1], flat[3 * i + 2]));

    let to_camera =
        |cc: &[DVec3; 4], a: &[f64; 4]| a[0] * cc[0] + a[1] * cc[1] + a[2] * cc[2] + a[3] * cc[3];

    if to_camera(&cc, &alphas[0]).z < 0.0 {
        for p in &mut cc {
            *p = -*p;
        }
    }

    let pw: Vec<DVec3> = world.iter().map(|p| DVec3::from_array(*p)).collect();
    let pc: Vec<DVec3> = alphas.iter().map(|a| to_camera(&cc, a)).collect();

    let (r, t) = kabsch(&pw, &pc)?;
    (r.is_finite() && t.is_finite()).then_some((r, t))
}
