use camreg_3d::Pose;
use serde::{Deserialize, Serialize};

use crate::config::EstimatorConfig;

/// Why a candidate pose was not accepted.
///
/// Rejections are a normal outcome of tracking and carry positive status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Rejection {
    /// Too few usable matches survived filtering and depth resolution.
    #[error("not enough matches")]
    NotEnoughMatches,
    /// Too few inliers, or the solver found no pose.
    #[error("not enough inliers")]
    NotEnoughInliers,
    /// Mean reprojection error above the discard threshold.
    #[error("reprojection error too high")]
    ReprojectionErrorTooHigh,
    /// Device above the maximum height.
    #[error("pose above maximum height")]
    HeightAboveMax,
    /// Device below the minimum height.
    #[error("pose below minimum height")]
    HeightBelowMin,
    /// Device optical axis too far from the fixed camera one.
    #[error("orientation differs too much from the fixed camera")]
    OrientationMismatch,
}

impl Rejection {
    /// Positive status code of the rejection.
    pub fn code(&self) -> i32 {
        match self {
            Rejection::NotEnoughMatches => 1,
            Rejection::NotEnoughInliers => 2,
            Rejection::ReprojectionErrorTooHigh => 3,
            Rejection::HeightAboveMax => 4,
            Rejection::HeightBelowMin => 5,
            Rejection::OrientationMismatch => 6,
        }
    }
}

/// Acceptance gates applied, in order, to every candidate pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gates {
    min_matches: usize,
    max_reprojection_error: f64,
    min_height: f64,
    max_height: f64,
    max_orientation_deg: f64,
}

impl Gates {
    /// Gates for a configuration.
    pub fn new(config: &EstimatorConfig) -> Self {
        Self {
            min_matches: config.min_matches(),
            max_reprojection_error: config.reprojection_error_discard_threshold,
            min_height: config.min_pose_height,
            max_height: config.max_pose_height,
            max_orientation_deg: config.phone_orientation_difference_threshold_deg,
        }
    }

    /// Checks the number of usable correspondences.
    pub fn check_matches(&self, matches: usize) -> Result<(), Rejection> {
        if matches < self.min_matches {
            return Err(Rejection::NotEnoughMatches);
        }
        Ok(())
    }

    /// Checks the number of solver inliers.
    pub fn check_inliers(&self, inliers: usize) -> Result<(), Rejection> {
        if inliers < self.min_matches {
            return Err(Rejection::NotEnoughInliers);
        }
        Ok(())
    }

    /// Checks the mean reprojection error, a non finite error is rejected.
    pub fn check_reprojection(&self, mean_error: f64) -> Result<(), Rejection> {
        if !(mean_error <= self.max_reprojection_error) {
            return Err(Rejection::ReprojectionErrorTooHigh);
        }
        Ok(())
    }

    /// Checks the height of the device in the world frame.
    pub fn check_height(&self, world_from_camera: &Pose) -> Result<(), Rejection> {
        let z = world_from_camera.height();
        if z > self.max_height {
            return Err(Rejection::HeightAboveMax);
        }
        if z < self.min_height {
            return Err(Rejection::HeightBelowMin);
        }
        Ok(())
    }

    /// Checks the device optical axis against the fixed camera one, both in the fixed frame.
    pub fn check_orientation(&self, fixed_from_camera: &Pose) -> Result<(), Rejection> {
        if fixed_from_camera.angle_from_z_axis_deg() > self.max_orientation_deg {
            return Err(Rejection::OrientationMismatch);
        }
        Ok(())
    }
}
