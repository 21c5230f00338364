#![allow(dead_code)]

use camreg::k3d::{CameraIntrinsics, Pose};
use camreg::features::{Descriptor, Keypoint};
use camreg::image::DepthMap;
use camreg::{FixedObservation, Frame};
use glam::{DQuat, DVec3};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub const WIDTH: usize = 640;
pub const HEIGHT: usize = 480;

/// Synthetic observation of textured points by both cameras.
pub struct Scene {
    pub fixed_k: CameraIntrinsics,
    pub mobile_k: CameraIntrinsics,
    pub fixed_keypoints: Vec<Keypoint>,
    pub fixed_descriptors: Vec<Descriptor>,
    pub mobile_keypoints: Vec<Keypoint>,
    pub mobile_descriptors: Vec<Descriptor>,
    pub depth: DepthMap,
    pub fixed_from_camera: Pose,
}

impl Scene {
    pub fn frame<'a>(&'a self, depth: &'a mut DepthMap) -> Frame<'a> {
        Frame {
            mobile_keypoints: &self.mobile_keypoints,
            mobile_descriptors: &self.mobile_descriptors,
            mobile_intrinsics: self.mobile_k,
            mobile_image_size: [WIDTH, HEIGHT].into(),
            fixed: FixedObservation::Features {
                keypoints: &self.fixed_keypoints,
                descriptors: &self.fixed_descriptors,
            },
            fixed_depth: depth,
            fixed_intrinsics: self.fixed_k,
            fixed_frame_id: "fixed_camera",
            timestamp_ns: 1_000,
        }
    }
}

/// Device placement in the fixed frame, yawed by `theta_deg` and `dist` meters away from the
/// scene center.
pub fn looking_at(theta_deg: f64, dist: f64) -> Pose {
    let rotation = DQuat::from_rotation_y(theta_deg.to_radians());
    let center = DVec3::new(0.0, 0.0, 2.2);
    Pose::new(rotation, center - rotation * DVec3::Z * dist)
}

pub const FIXED_K: CameraIntrinsics = CameraIntrinsics::new(600.0, 600.0, 320.0, 240.0);
pub const DEVICE_K: CameraIntrinsics = CameraIntrinsics::new(620.0, 615.0, 318.0, 242.0);

/// Builds a scene from fixed pixels and their depth in millimeters.
pub fn scene_from_pixels(
    rng: &mut StdRng,
    pixels: &[(usize, usize, u16)],
    fixed_from_camera: Pose,
    noise_px: f64,
) -> Scene {
    scene_with_intrinsics(rng, pixels, fixed_from_camera, noise_px, FIXED_K, DEVICE_K)
}

/// Same as [`scene_from_pixels`] with the camera models given.
pub fn scene_with_intrinsics(
    rng: &mut StdRng,
    pixels: &[(usize, usize, u16)],
    fixed_from_camera: Pose,
    noise_px: f64,
    fixed_k: CameraIntrinsics,
    mobile_k: CameraIntrinsics,
) -> Scene {
    let camera_from_fixed = fixed_from_camera.inverse();
    let mut depth = DepthMap::from_size_val([WIDTH, HEIGHT].into(), 0).expect("valid depth");

    let mut scene = Scene {
        fixed_k,
        mobile_k,
        fixed_keypoints: Vec::new(),
        fixed_descriptors: Vec::new(),
        mobile_keypoints: Vec::new(),
        mobile_descriptors: Vec::new(),
        depth: depth.clone(),
        fixed_from_camera,
    };

    for &(u, v, d) in pixels {
        depth.set_pixel(u, v, d).expect("inside");
        let p = fixed_k.backproject(u as f64, v as f64, d as f64 / 1000.0);
        let [x, y] = mobile_k
            .project(camera_from_fixed.transform_point(p))
            .expect("in front of the device");
        let (dx, dy) = if noise_px > 0.0 {
            (
                rng.random_range(-noise_px..noise_px),
                rng.random_range(-noise_px..noise_px),
            )
        } else {
            (0.0, 0.0)
        };
        let descriptor = Descriptor(rng.random());

        scene.fixed_keypoints.push(Keypoint::new(u as f32, v as f32));
        scene.fixed_descriptors.push(descriptor);
        scene
            .mobile_keypoints
            .push(Keypoint::new((x + dx) as f32, (y + dy) as f32));
        scene.mobile_descriptors.push(descriptor);
    }
    scene.depth = depth;
    scene
}

/// Grid of points between 1.8 m and 2.6 m in front of the fixed camera.
pub fn grid_scene(seed: u64, fixed_from_camera: Pose, noise_px: f64) -> Scene {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pixels = Vec::new();
    for v in (120..=360).step_by(40) {
        for u in (160..=480).step_by(40) {
            pixels.push((u, v, rng.random_range(1800..2600u16)));
        }
    }
    scene_from_pixels(&mut rng, &pixels, fixed_from_camera, noise_px)
}

pub fn translation_error(a: &Pose, b: &Pose) -> f64 {
    (a.translation - b.translation).length()
}

pub fn rotation_error(a: &Pose, b: &Pose) -> f64 {
    a.rotation.angle_between(b.rotation)
}
