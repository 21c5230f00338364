use glam::{DMat3, DQuat, DVec3};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// A rigid transform `p' = R p + t`.
///
/// A pose named `a_from_b` maps points expressed in frame `b` into frame `a`; the same value,
/// read as a placement, is the pose of frame `b` inside frame `a`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Unit quaternion rotation.
    pub rotation: DQuat,
    /// Translation, in meters.
    pub translation: DVec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    /// The identity transform.
    pub const IDENTITY: Pose = Pose {
        rotation: DQuat::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Creates a pose, normalizing the rotation.
    pub fn new(rotation: DQuat, translation: DVec3) -> Self {
        Self {
            rotation: rotation.normalize(),
            translation,
        }
    }

    /// Creates a pose from a row-major rotation matrix and a translation.
    pub fn from_rotation_matrix(r: &[[f64; 3]; 3], t: &[f64; 3]) -> Self {
        let m = DMat3::from_cols_array_2d(r).transpose();
        Self::new(DQuat::from_mat3(&m), DVec3::from_array(*t))
    }

    /// Creates a pose from a Rodrigues vector (axis times angle in radians) and a translation.
    pub fn from_rvec(rvec: &[f64; 3], t: &[f64; 3]) -> Self {
        Self::new(
            DQuat::from_scaled_axis(DVec3::from_array(*rvec)),
            DVec3::from_array(*t),
        )
    }

    /// Row-major rotation matrix.
    pub fn rotation_matrix(&self) -> [[f64; 3]; 3] {
        DMat3::from_quat(self.rotation).transpose().to_cols_array_2d()
    }

    /// Rodrigues vector of the rotation.
    pub fn rvec(&self) -> [f64; 3] {
        self.rotation.to_scaled_axis().to_array()
    }

    /// The inverse transform.
    pub fn inverse(&self) -> Pose {
        let rotation = self.rotation.inverse();
        Pose {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Applies the transform to a point.
    #[inline]
    pub fn transform_point(&self, p: DVec3) -> DVec3 {
        self.rotation * p + self.translation
    }

    /// Height of the placement, the z component of the translation.
    #[inline]
    pub fn height(&self) -> f64 {
        self.translation.z
    }

    /// Direction of the local z axis (the optical axis for camera frames) in the parent frame.
    #[inline]
    pub fn z_axis(&self) -> DVec3 {
        self.rotation * DVec3::Z
    }

    /// Angle in degrees between the local z axis and the parent z axis.
    pub fn angle_from_z_axis_deg(&self) -> f64 {
        self.z_axis().dot(DVec3::Z).clamp(-1.0, 1.0).acos().to_degrees()
    }

    /// Returns true if every component is finite.
    pub fn is_finite(&self) -> bool {
        self.rotation.is_finite() && self.translation.is_finite()
    }
}

impl Mul for Pose {
    type Output = Pose;

    /// Composition: `(a * b).transform_point(p) == a.transform_point(b.transform_point(p))`.
    fn mul(self, rhs: Pose) -> Pose {
        Pose {
            rotation: (self.rotation * rhs.rotation).normalize(),
            translation: self.rotation * rhs.translation + self.translation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_pose() -> Pose {
        Pose::from_rvec(&[0.1, -0.3, 0.2], &[0.5, -1.0, 2.0])
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let pose = sample_pose();
        let id = pose * pose.inverse();
        let p = DVec3::new(1.0, 2.0, 3.0);
        let q = id.transform_point(p);
        assert_relative_eq!(q.x, p.x, epsilon = 1e-12);
        assert_relative_eq!(q.y, p.y, epsilon = 1e-12);
        assert_relative_eq!(q.z, p.z, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_and_rvec_roundtrip() {
        let pose = sample_pose();
        let back = Pose::from_rotation_matrix(&pose.rotation_matrix(), &pose.translation.to_array());
        assert!(back.rotation.abs_diff_eq(pose.rotation, 1e-12));

        let rvec = pose.rvec();
        assert_relative_eq!(rvec[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(rvec[1], -0.3, epsilon = 1e-12);
        assert_relative_eq!(rvec[2], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_matrix_is_row_major() {
        let pose = Pose::from_rvec(&[0.0, 0.0, std::f64::consts::FRAC_PI_2], &[0.0; 3]);
        let r = pose.rotation_matrix();
        // x maps to y
        assert_relative_eq!(r[1][0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(r[0][1], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_angle_from_z_axis() {
        assert_relative_eq!(Pose::IDENTITY.angle_from_z_axis_deg(), 0.0);
        let tilted = Pose::from_rvec(&[30f64.to_radians(), 0.0, 0.0], &[0.0; 3]);
        assert_relative_eq!(tilted.angle_from_z_axis_deg(), 30.0, epsilon = 1e-9);
        let yaw = Pose::from_rvec(&[0.0, 0.0, 1.0], &[0.0, 0.0, 1.2]);
        assert_relative_eq!(yaw.angle_from_z_axis_deg(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(yaw.height(), 1.2);
    }
}
