use camreg_features::{Keypoint, Match};
use rayon::prelude::*;

use crate::depth::ResolvedMatch;
use crate::{CameraIntrinsics, DepthError};

/// Index-aligned 3D-2D correspondences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correspondences {
    /// Points in the fixed camera frame, meters.
    pub object_points: Vec<[f64; 3]>,
    /// Pixels of the same points in the mobile image.
    pub image_points: Vec<[f64; 2]>,
    /// The match each correspondence comes from.
    pub matches: Vec<Match>,
    /// Depth sample, millimeters, each point was reconstructed from.
    pub depths_mm: Vec<u16>,
}

impl Correspondences {
    /// Number of correspondences.
    pub fn len(&self) -> usize {
        self.object_points.len()
    }

    /// Returns true if there are no correspondences.
    pub fn is_empty(&self) -> bool {
        self.object_points.is_empty()
    }
}

/// Back-projects resolved matches into the fixed camera frame.
///
/// For each match the fixed keypoint `(u, v)` and its depth `d` (millimeters) give
/// `X = (u - cx) Z / fx`, `Y = (v - cy) Z / fy`, `Z = d / 1000`, paired with the mobile
/// keypoint pixel. Output order follows `resolved`.
///
/// # Errors
///
/// [`DepthError::InvalidMatchIndex`] if a match does not index into the keypoints, or
/// [`DepthError::InvalidIntrinsics`] for a degenerate camera.
pub fn reconstruct(
    resolved: &[ResolvedMatch],
    mobile_keypoints: &[Keypoint],
    fixed_keypoints: &[Keypoint],
    fixed_intrinsics: &CameraIntrinsics,
) -> Result<Correspondences, DepthError> {
    fixed_intrinsics.validate()?;

    let pairs = resolved
        .par_iter()
        .map(|r| {
            let mobile = mobile_keypoints.get(r.m.query_idx).ok_or(
                DepthError::InvalidMatchIndex {
                    side: "query",
                    index: r.m.query_idx,
                    len: mobile_keypoints.len(),
                },
            )?;
            let fixed = fixed_keypoints
                .get(r.m.train_idx)
                .ok_or(DepthError::InvalidMatchIndex {
                    side: "train",
                    index: r.m.train_idx,
                    len: fixed_keypoints.len(),
                })?;

            let z = r.depth_mm as f64 / 1000.0;
            let p = fixed_intrinsics.backproject(fixed.x as f64, fixed.y as f64, z);
            Ok((p.to_array(), [mobile.x as f64, mobile.y as f64]))
        })
        .collect::<Result<Vec<_>, DepthError>>()?;

    let (object_points, image_points) = pairs.into_iter().unzip();
    Ok(Correspondences {
        object_points,
        image_points,
        matches: resolved.iter().map(|r| r.m).collect(),
        depths_mm: resolved.iter().map(|r| r.depth_mm).collect(),
    })
}
