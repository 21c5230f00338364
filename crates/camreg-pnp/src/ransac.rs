//! RANSAC-based robust wrapper for the PnP solvers.

use crate::ops::{
    check_correspondences, intrinsics_as_vectors, pose_to_rt, project_sq_error, rotation_to_array,
    rotation_to_rvec, rvec_to_rotation,
};
use crate::refine::{refine_pose_lm, LMParams};
use crate::types::{PnPError, PnPResult, RigidTransform};
use crate::{solve_pnp, PnPMethod};
use glam::DVec3;
use rand::{rngs::StdRng, SeedableRng};

/// Parameters for RANSAC over PnP.
#[derive(Debug, Clone)]
pub struct RansacParams {
    /// Maximum number of sampled hypotheses.
    pub max_iterations: usize,
    /// Pixel error threshold to classify an observation as an inlier.
    pub reproj_threshold_px: f64,
    /// Desired probability that at least one sample set is outlier-free.
    pub confidence: f64,
    /// Optional fixed seed for reproducible sampling.
    pub random_seed: Option<u64>,
    /// Whether to refine the winner with Levenberg–Marquardt on its inliers.
    pub refine: bool,
    /// Pose scored before any sample is drawn, typically the previous accepted solution.
    pub initial_guess: Option<RigidTransform>,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            reproj_threshold_px: 8.0,
            confidence: 0.99,
            random_seed: None,
            refine: true,
            initial_guess: None,
        }
    }
}

/// RANSAC result for PnP.
#[derive(Debug, Clone)]
pub struct PnPRansacResult {
    /// Best pose found, refined if requested. `reproj_rmse` is computed over the inliers.
    pub pose: PnPResult,
    /// Indices of inlier correspondences, ascending.
    pub inliers: Vec<usize>,
    /// Mean reprojection error, in pixels, over the inliers.
    pub mean_inlier_error: f64,
    /// Number of sampled hypotheses evaluated.
    pub iterations: usize,
    /// True if no sampled hypothesis beat the initial guess.
    pub initial_guess_kept: bool,
}

/// Solve PnP robustly with RANSAC around a base PnP method.
///
/// - Minimal sample size is 5 (4 when only 4 points are available).
/// - The initial guess, if any, is scored first; a sampled hypothesis replaces the
///   current best only with strictly more inliers.
/// - Scoring uses the Euclidean pixel reprojection error, an observation is an inlier
///   when its error is at most `reproj_threshold_px`.
/// - Iterations adapt from the best inlier ratio and the desired confidence.
///
/// Fails with [`PnPError::SolverDivergence`] if no hypothesis is numerically valid.
pub fn solve_pnp_ransac(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    base: PnPMethod,
    params: &RansacParams,
) -> Result<PnPRansacResult, PnPError> {
    check_correspondences(world, image, 4)?;
    let n = world.len();
    let sample_size: usize = if n == 4 { 4 } else { 5 };

    let mut rng: StdRng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut best: Option<(RigidTransform, Vec<usize>)> = None;
    let mut initial_guess_kept = false;
    let mut required_iters = params.max_iterations;

    if let Some(guess) = params.initial_guess.filter(RigidTransform::is_finite) {
        let inliers = classify_inliers(world, image, k, &guess, params.reproj_threshold_px);
        log::trace!("ransac: initial guess has {} inliers", inliers.len());
        required_iters = update_num_iters(params, inliers.len(), n, sample_size, required_iters);
        best = Some((guess, inliers));
        initial_guess_kept = true;
    }

    let mut w_min: Vec<[f64; 3]> = Vec::with_capacity(sample_size);
    let mut i_min: Vec<[f64; 2]> = Vec::with_capacity(sample_size);
    let mut iter = 0;

    while iter < required_iters {
        iter += 1;

        let sample = rand::seq::index::sample(&mut rng, n, sample_size);
        w_min.clear();
        i_min.clear();
        for idx in sample.iter() {
            w_min.push(world[idx]);
            i_min.push(image[idx]);
        }

        let pose_min = match solve_pnp(&w_min, &i_min, k, base.clone()) {
            Ok(p) => p.transform(),
            Err(e) => {
                log::trace!("ransac: iteration {iter} minimal solve failed: {e}");
                continue;
            }
        };
        if !pose_min.is_finite() || !all_positive_depths(&pose_min, &w_min) {
            continue;
        }

        let inliers = classify_inliers(world, image, k, &pose_min, params.reproj_threshold_px);
        if best.as_ref().map_or(true, |(_, b)| inliers.len() > b.len()) {
            required_iters =
                update_num_iters(params, inliers.len(), n, sample_size, required_iters);
            best = Some((pose_min, inliers));
            initial_guess_kept = false;
        }
    }

    let (mut pose, mut inliers) = best.ok_or_else(|| {
        PnPError::SolverDivergence(format!("no valid hypothesis in {iter} iterations"))
    })?;

    let mut lm_stats = None;
    if params.refine && inliers.len() >= 4 {
        let (w_in, i_in) = gather(world, image, &inliers);
        let (r, t) = pose_to_rt(&pose.rotation, &pose.translation);
        let mut rvec = rotation_to_rvec(&r);
        let mut tvec = t.to_array();

        match refine_pose_lm(&w_in, &i_in, k, &mut rvec, &mut tvec, &LMParams::default()) {
            Ok((_, iters, converged)) => {
                let refined = RigidTransform {
                    rotation: rotation_to_array(&rvec_to_rotation(&rvec)),
                    translation: tvec,
                };
                let refined_inliers =
                    classify_inliers(world, image, k, &refined, params.reproj_threshold_px);
                if refined.is_finite() && refined_inliers.len() >= inliers.len() {
                    pose = refined;
                    inliers = refined_inliers;
                    lm_stats = Some((iters, converged));
                }
            }
            Err(e) => log::debug!("ransac: refinement skipped: {e}"),
        }
    }

    let errors = inlier_errors(world, image, k, &pose, &inliers);
    let count = errors.len().max(1) as f64;
    let mean_inlier_error = errors.iter().sum::<f64>() / count;
    let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / count).sqrt();

    log::debug!(
        "ransac: {} of {} inliers after {} iterations (initial guess kept: {})",
        inliers.len(),
        n,
        iter,
        initial_guess_kept
    );

    let (r, _) = pose_to_rt(&pose.rotation, &pose.translation);
    Ok(PnPRansacResult {
        pose: PnPResult {
            rotation: pose.rotation,
            translation: pose.translation,
            rvec: rotation_to_rvec(&r),
            reproj_rmse: Some(rmse),
            num_iterations: lm_stats.map(|(i, _)| i),
            converged: lm_stats.map(|(_, c)| c),
        },
        inliers,
        mean_inlier_error,
        iterations: iter,
        initial_guess_kept,
    })
}

/// Number of iterations needed to reach the configured confidence with the given inlier
/// count, capped by `current`.
fn update_num_iters(
    params: &RansacParams,
    num_inliers: usize,
    n: usize,
    sample_size: usize,
    current: usize,
) -> usize {
    let w = num_inliers as f64 / n as f64;
    let p = params.confidence.clamp(0.0, 1.0);

    let num = (1.0 - p).max(f64::MIN_POSITIVE);
    let denom = 1.0 - w.powi(sample_size as i32);
    if denom < f64::MIN_POSITIVE {
        return 0;
    }
    let (num, denom) = (num.ln(), denom.ln());
    if denom >= 0.0 || -num >= current as f64 * -denom {
        current
    } else {
        ((num / denom).round() as usize).min(current)
    }
}

fn gather(world: &[[f64; 3]], image: &[[f64; 2]], idx: &[usize]) -> (Vec<[f64; 3]>, Vec<[f64; 2]>) {
    idx.iter().map(|&i| (world[i], image[i])).unzip()
}

fn all_positive_depths(pose: &RigidTransform, world: &[[f64; 3]]) -> bool {
    let (r, t) = pose_to_rt(&pose.rotation, &pose.translation);
    world.iter().all(|pw| (r * DVec3::from_array(*pw) + t).z > 0.0)
}

fn classify_inliers(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    pose: &RigidTransform,
    thresh_px: f64,
) -> Vec<usize> {
    let (r, t) = pose_to_rt(&pose.rotation, &pose.translation);
    let (ix, iy) = intrinsics_as_vectors(k);
    let thresh_sq = thresh_px * thresh_px;

    world
        .iter()
        .zip(image)
        .enumerate()
        .filter_map(|(idx, (pw, uv))| {
            project_sq_error(pw, uv, &r, &t, &ix, &iy, true)
                .filter(|&e| e <= thresh_sq)
                .map(|_| idx)
        })
        .collect()
}

fn inlier_errors(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    pose: &RigidTransform,
    inliers: &[usize],
) -> Vec<f64> {
    let (r, t) = pose_to_rt(&pose.rotation, &pose.translation);
    let (ix, iy) = intrinsics_as_vectors(k);
    inliers
        .iter()
        .filter_map(|&i| project_sq_error(&world[i], &image[i], &r, &t, &ix, &iy, true))
        .map(f64::sqrt)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_num_iters() {
        let params = RansacParams::default();
        // all inliers: nothing left to sample
        assert_eq!(update_num_iters(&params, 10, 10, 5, 100), 0);
        // no inliers: keep the cap
        assert_eq!(update_num_iters(&params, 0, 10, 5, 100), 100);
        // half inliers, s = 5: log(0.01) / log(1 - 1/32) ≈ 145, capped
        assert_eq!(update_num_iters(&params, 5, 10, 5, 100), 100);
        assert_eq!(update_num_iters(&params, 5, 10, 5, 1000), 145);
        // 90% inliers: log(0.01) / log(1 - 0.9^5) ≈ 5.16
        assert_eq!(update_num_iters(&params, 9, 10, 5, 1000), 5);
    }

    #[test]
    fn test_classify_inliers_threshold_is_inclusive() {
        let k = [[100.0, 0.0, 0.0], [0.0, 100.0, 0.0], [0.0, 0.0, 1.0]];
        let pose = RigidTransform {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        };
        let world = [[0.0, 0.0, 1.0], [0.0, 0.0, 1.0], [0.0, 0.0, -1.0]];
        let image = [[2.0, 0.0], [2.5, 0.0], [0.0, 0.0]];
        assert_eq!(classify_inliers(&world, &image, &k, &pose, 2.0), vec![0]);
    }
}
