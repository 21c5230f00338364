use argh::FromArgs;
use std::path::PathBuf;

use camreg::features::{Descriptor, Keypoint};
use camreg::image::DepthMap;
use camreg::k3d::{CameraIntrinsics, Pose};
use camreg::{outcome_code, Estimator, EstimatorConfig, FixedObservation, Frame};
use glam::{DQuat, DVec3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;

#[derive(FromArgs)]
/// Registers an AR device against a fixed RGB-D camera
struct Args {
    /// path to a JSON estimator configuration
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// path to a recorded JSON frame, a synthetic sequence is used otherwise
    #[argh(option, short = 'f')]
    frame: Option<PathBuf>,

    /// number of synthetic frames
    #[argh(option, short = 'n', default = "20")]
    num_frames: usize,

    /// pixel noise of the synthetic device keypoints
    #[argh(option, default = "0.5")]
    noise_px: f64,

    /// seed of the synthetic scene
    #[argh(option, default = "0")]
    seed: u64,
}

/// A recorded frame.
#[derive(Deserialize)]
struct FrameFile {
    mobile_keypoints: Vec<Keypoint>,
    mobile_descriptors: Vec<Descriptor>,
    mobile_intrinsics: CameraIntrinsics,
    mobile_width: usize,
    mobile_height: usize,
    fixed_keypoints: Vec<Keypoint>,
    fixed_descriptors: Vec<Descriptor>,
    fixed_intrinsics: CameraIntrinsics,
    depth_width: usize,
    depth_height: usize,
    depth_mm: Vec<u16>,
    #[serde(default)]
    timestamp_ns: u64,
}

/// Textured points seen by the fixed camera, with their depth.
struct SyntheticScene {
    fixed_k: CameraIntrinsics,
    mobile_k: CameraIntrinsics,
    fixed_keypoints: Vec<Keypoint>,
    descriptors: Vec<Descriptor>,
    points: Vec<DVec3>,
    depth: DepthMap,
}

impl SyntheticScene {
    fn new(rng: &mut StdRng) -> Result<Self, Box<dyn std::error::Error>> {
        let fixed_k = CameraIntrinsics::new(525.0, 525.0, 319.5, 239.5);
        let mobile_k = CameraIntrinsics::new(600.0, 600.0, 320.0, 240.0);
        let mut depth = DepthMap::from_size_val([640, 480].into(), 0)?;

        let mut fixed_keypoints = Vec::new();
        let mut descriptors = Vec::new();
        let mut points = Vec::new();
        for v in (60..=420).step_by(30) {
            for u in (80..=560).step_by(30) {
                // a back wall with a box in front of it
                let d: u16 = if (240..=400).contains(&u) && (180..=330).contains(&v) {
                    rng.random_range(1800..1900)
                } else {
                    rng.random_range(3000..3200)
                };
                depth.set_pixel(u, v, d)?;
                fixed_keypoints.push(Keypoint::new(u as f32, v as f32));
                descriptors.push(Descriptor(rng.random()));
                points.push(fixed_k.backproject(u as f64, v as f64, d as f64 / 1000.0));
            }
        }

        // sensor dropouts
        for _ in 0..depth.width() * depth.height() / 20 {
            let x = rng.random_range(0..depth.width());
            let y = rng.random_range(0..depth.height());
            depth.set_pixel(x, y, 0)?;
        }

        Ok(Self {
            fixed_k,
            mobile_k,
            fixed_keypoints,
            descriptors,
            points,
            depth,
        })
    }

    /// Device keypoints seen from `fixed_from_camera`.
    fn observe(
        &self,
        fixed_from_camera: &Pose,
        noise_px: f64,
        rng: &mut StdRng,
    ) -> (Vec<Keypoint>, Vec<Descriptor>) {
        let camera_from_fixed = fixed_from_camera.inverse();
        self.points
            .iter()
            .zip(&self.descriptors)
            .filter_map(|(p, d)| {
                let [u, v] = self.mobile_k.project(camera_from_fixed.transform_point(*p))?;
                if !(0.0..640.0).contains(&u) || !(0.0..480.0).contains(&v) {
                    return None;
                }
                let (du, dv) = if noise_px > 0.0 {
                    (
                        rng.random_range(-noise_px..noise_px),
                        rng.random_range(-noise_px..noise_px),
                    )
                } else {
                    (0.0, 0.0)
                };
                Some((Keypoint::new((u + du) as f32, (v + dv) as f32), *d))
            })
            .unzip()
    }
}

fn run_recorded(estimator: &mut Estimator, path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let recorded: FrameFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let fixed_frame_id = estimator.fixed_camera_name().to_string();
    let mut depth = DepthMap::new(
        [recorded.depth_width, recorded.depth_height].into(),
        recorded.depth_mm,
    )?;
    let result = estimator.update(Frame {
        mobile_keypoints: &recorded.mobile_keypoints,
        mobile_descriptors: &recorded.mobile_descriptors,
        mobile_intrinsics: recorded.mobile_intrinsics,
        mobile_image_size: [recorded.mobile_width, recorded.mobile_height].into(),
        fixed: FixedObservation::Features {
            keypoints: &recorded.fixed_keypoints,
            descriptors: &recorded.fixed_descriptors,
        },
        fixed_depth: &mut depth,
        fixed_intrinsics: recorded.fixed_intrinsics,
        fixed_frame_id: &fixed_frame_id,
        timestamp_ns: recorded.timestamp_ns,
    });

    println!("status: {}", outcome_code(&result));
    if let Some(estimate) = result?.estimate() {
        println!("{}", serde_json::to_string_pretty(estimate)?);
    }
    Ok(())
}

fn run_synthetic(estimator: &mut Estimator, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let scene = SyntheticScene::new(&mut rng)?;
    let fixed_frame_id = estimator.fixed_camera_name().to_string();

    let mut accepted = 0;
    for i in 0..args.num_frames {
        // the device walks sideways across the room while panning towards the box
        let s = i as f64 / args.num_frames.max(1) as f64;
        let truth = Pose::new(
            DQuat::from_rotation_y((-20.0 + 40.0 * s).to_radians()),
            DVec3::new(-0.6 + 1.2 * s, 0.1, 0.3),
        );
        let (mobile_keypoints, mobile_descriptors) = scene.observe(&truth, args.noise_px, &mut rng);

        let mut depth = scene.depth.clone();
        let result = estimator.update(Frame {
            mobile_keypoints: &mobile_keypoints,
            mobile_descriptors: &mobile_descriptors,
            mobile_intrinsics: scene.mobile_k,
            mobile_image_size: [640, 480].into(),
            fixed: FixedObservation::Features {
                keypoints: &scene.fixed_keypoints,
                descriptors: &scene.descriptors,
            },
            fixed_depth: &mut depth,
            fixed_intrinsics: scene.fixed_k,
            fixed_frame_id: &fixed_frame_id,
            timestamp_ns: i as u64 * 33_333_333,
        });

        let code = outcome_code(&result);
        match result?.estimate() {
            Some(estimate) => {
                accepted += 1;
                let error = (estimate.fixed_from_camera.translation - truth.translation).length();
                println!(
                    "frame {i:3}: accepted, {:3} inliers, {:.3} px, position error {:.4} m",
                    estimate.inlier_count, estimate.mean_reprojection_error, error
                );
            }
            None => println!("frame {i:3}: rejected with status {code}"),
        }
    }
    println!("{accepted} of {} frames accepted", args.num_frames);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let config = match &args.config {
        Some(path) => EstimatorConfig::from_json_file(path)?,
        None => EstimatorConfig {
            random_seed: Some(args.seed),
            ..Default::default()
        },
    };
    log::info!("configuration: {}", serde_json::to_string(&config)?);

    let mut estimator = Estimator::new("device", "fixed_camera", Pose::IDENTITY, config, None)?;

    match args.frame.clone() {
        Some(path) => run_recorded(&mut estimator, path),
        None => run_synthetic(&mut estimator, &args),
    }
}
