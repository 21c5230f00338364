use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::DepthError;

/// Intrinsic parameters of a pinhole camera, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Horizontal focal length.
    pub fx: f64,
    /// Vertical focal length.
    pub fy: f64,
    /// Principal point column.
    pub cx: f64,
    /// Principal point row.
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Creates new intrinsics.
    pub const fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Builds intrinsics from a row-major 3x3 camera matrix.
    pub fn from_matrix(k: &[[f64; 3]; 3]) -> Self {
        Self::new(k[0][0], k[1][1], k[0][2], k[1][2])
    }

    /// Returns the row-major 3x3 camera matrix.
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Checks that both focal lengths are finite and positive.
    pub fn validate(&self) -> Result<(), DepthError> {
        let ok = |f: f64| f.is_finite() && f > 0.0;
        if ok(self.fx) && ok(self.fy) && self.cx.is_finite() && self.cy.is_finite() {
            Ok(())
        } else {
            Err(DepthError::InvalidIntrinsics {
                fx: self.fx,
                fy: self.fy,
            })
        }
    }

    /// Back-projects pixel `(u, v)` at depth `z` (meters) into the camera frame.
    #[inline]
    pub fn backproject(&self, u: f64, v: f64, z: f64) -> DVec3 {
        DVec3::new((u - self.cx) * z / self.fx, (v - self.cy) * z / self.fy, z)
    }

    /// Projects a camera frame point to pixels, `None` if it is not in front of the camera.
    #[inline]
    pub fn project(&self, p: DVec3) -> Option<[f64; 2]> {
        if p.z <= f64::EPSILON {
            return None;
        }
        Some([
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ])
    }
}
