mod common;

use std::error::Error;
use std::sync::Arc;

use camreg::features::{Descriptor, Keypoint};
use camreg::image::{DepthMap, GrayImage};
use camreg::k3d::Pose;
use camreg::{
    outcome_code, Estimator, EstimatorConfig, EstimatorError, FeatureMemory, FixedObservation,
    InMemoryFeatureMemory, Outcome, Rejection, ReprojectionScope,
};
use common::{
    grid_scene, looking_at, rotation_error, scene_from_pixels, scene_with_intrinsics,
    translation_error, FIXED_K,
};
use glam::{DQuat, DVec3};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

fn seeded_config() -> EstimatorConfig {
    EstimatorConfig {
        random_seed: Some(42),
        ..Default::default()
    }
}

fn estimator(config: EstimatorConfig) -> Result<Estimator, EstimatorError> {
    Estimator::new("phone", "fixed_camera", Pose::IDENTITY, config, None)
}

#[test]
fn square_in_front_of_the_camera() -> Result<(), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(0);
    let pixels = [
        (220, 140, 2000),
        (420, 140, 2000),
        (420, 340, 2000),
        (220, 340, 2000),
    ];
    // both cameras share the same model and placement
    let scene = scene_with_intrinsics(&mut rng, &pixels, Pose::IDENTITY, 0.0, FIXED_K, FIXED_K);
    assert_eq!(scene.mobile_keypoints, scene.fixed_keypoints);
    let mut est = estimator(seeded_config())?;

    let mut depth = scene.depth.clone();
    let outcome = est.update(scene.frame(&mut depth))?;
    assert_eq!(outcome.code(), 0);

    let estimate = outcome.estimate().ok_or("pose not accepted")?;
    assert!(estimate.fixed_from_camera.translation.length() < 1e-3);
    assert!(rotation_error(&estimate.fixed_from_camera, &Pose::IDENTITY) < 1e-3);
    assert_eq!(estimate.match_count, 4);
    assert_eq!(estimate.inlier_count, 4);
    assert_eq!(estimate.world_frame_id, "world");
    assert_eq!(estimate.fixed_frame_id, "fixed_camera");
    assert_eq!(estimate.timestamp_ns, 1_000);
    assert_eq!(estimate.reprojection_scope, ReprojectionScope::Inliers);
    assert!(est.has_estimate());
    assert_eq!(est.last_match_count(), Some(4));
    Ok(())
}

#[test]
fn recovers_the_device_pose() -> Result<(), Box<dyn Error>> {
    for (seed, theta) in [(1, 0.0), (2, 15.0), (3, -25.0)] {
        let truth = looking_at(theta, 2.0);
        let scene = grid_scene(seed, truth, 0.0);
        let mut est = estimator(seeded_config())?;

        let mut depth = scene.depth.clone();
        let outcome = est.update(scene.frame(&mut depth))?;
        let estimate = outcome.estimate().ok_or("pose not accepted")?;

        assert!(translation_error(&estimate.fixed_from_camera, &truth) < 1e-3);
        assert!(rotation_error(&estimate.fixed_from_camera, &truth) < 1e-3);
        assert!(estimate.mean_reprojection_error < 0.01);
        assert!(estimate.inlier_count >= 4);
        assert!(estimate.inlier_count <= estimate.match_count);
    }
    Ok(())
}

#[test]
fn world_pose_composes_the_fixed_placement() -> Result<(), Box<dyn Error>> {
    let truth = looking_at(10.0, 2.0);
    let scene = grid_scene(4, truth, 0.5);
    let world_from_fixed = Pose::new(DQuat::from_rotation_z(0.3), DVec3::new(1.0, -2.0, 1.0));
    let mut est = Estimator::new("phone", "fixed_camera", world_from_fixed, seeded_config(), None)?;

    let mut depth = scene.depth.clone();
    let outcome = est.update(scene.frame(&mut depth))?;
    let estimate = outcome.estimate().ok_or("pose not accepted")?;

    let expected = world_from_fixed * estimate.fixed_from_camera;
    assert!(translation_error(&estimate.world_from_camera, &expected) < 1e-9);
    assert!((estimate.world_from_camera.height() - (1.0 + truth.translation.z)).abs() < 0.02);
    Ok(())
}

#[test]
fn too_few_correspondences() -> Result<(), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(5);
    let pixels = [(200, 200, 2000), (300, 200, 2100), (250, 300, 1900)];
    let scene = scene_from_pixels(&mut rng, &pixels, looking_at(0.0, 2.0), 0.0);
    let mut est = estimator(seeded_config())?;

    let mut depth = scene.depth.clone();
    let outcome = est.update(scene.frame(&mut depth))?;
    assert_eq!(outcome, Outcome::Rejected(Rejection::NotEnoughMatches));
    assert_eq!(est.last_diagnostics().correspondences, 3);
    assert_eq!(est.last_diagnostics().code, 1);
    assert!(!est.has_estimate());
    Ok(())
}

#[test]
fn no_depth_means_no_matches() -> Result<(), Box<dyn Error>> {
    let scene = grid_scene(6, looking_at(0.0, 2.0), 0.0);
    let mut est = estimator(seeded_config())?;

    let mut depth = DepthMap::from_size_val(scene.depth.size(), 0)?;
    let outcome = est.update(scene.frame(&mut depth))?;
    assert_eq!(outcome.code(), 1);
    assert!(est.last_diagnostics().filtered_matches > 0);
    assert_eq!(est.last_diagnostics().correspondences, 0);
    Ok(())
}

#[test]
fn missing_depth_is_repaired() -> Result<(), Box<dyn Error>> {
    let truth = looking_at(5.0, 2.0);
    let scene = grid_scene(7, truth, 0.0);
    let mut est = estimator(seeded_config())?;

    // knock out one reading, a neighbour one pixel away keeps the surface
    let kp = scene.fixed_keypoints[10];
    let (x, y) = (kp.x as usize, kp.y as usize);
    let value = scene.depth.get_pixel(x, y)?;
    let mut depth = scene.depth.clone();
    depth.set_pixel(x, y, 0)?;
    depth.set_pixel(x + 1, y, value)?;

    let outcome = est.update(scene.frame(&mut depth))?;
    assert!(outcome.is_accepted());
    assert_eq!(est.last_diagnostics().repaired_depths, 1);
    assert_eq!(depth.get_pixel(x, y)?, value);
    Ok(())
}

#[test]
fn outliers_leave_too_few_inliers() -> Result<(), Box<dyn Error>> {
    let mut scene = grid_scene(8, looking_at(0.0, 2.0), 0.0);
    // shuffle all but eight device keypoints, they stay apart so every match survives filtering
    let mut rng = StdRng::seed_from_u64(80);
    scene.mobile_keypoints[8..].shuffle(&mut rng);
    let n = scene.mobile_keypoints.len();
    let mut est = estimator(EstimatorConfig {
        minimum_matches_number: 20,
        ..seeded_config()
    })?;

    let mut depth = scene.depth.clone();
    let outcome = est.update(scene.frame(&mut depth))?;
    let diagnostics = est.last_diagnostics();
    assert_eq!(diagnostics.filtered_matches, n);
    assert_eq!(diagnostics.correspondences, n);
    assert!(diagnostics.correspondences >= 20);
    assert!(diagnostics.inliers.len() < 20);
    assert_eq!(outcome, Outcome::Rejected(Rejection::NotEnoughInliers));
    assert_eq!(diagnostics.code, 2);
    assert!(!est.has_estimate());
    Ok(())
}

#[test]
fn noisy_frame_rejected_on_reprojection_error() -> Result<(), Box<dyn Error>> {
    let scene = grid_scene(9, looking_at(0.0, 2.0), 2.0);
    let mut est = estimator(EstimatorConfig {
        reprojection_error_discard_threshold: 0.1,
        ..seeded_config()
    })?;

    let mut depth = scene.depth.clone();
    let outcome = est.update(scene.frame(&mut depth))?;
    assert_eq!(outcome.code(), 3);

    let mut lenient = estimator(seeded_config())?;
    let mut depth = scene.depth.clone();
    let outcome = lenient.update(scene.frame(&mut depth))?;
    let estimate = outcome.estimate().ok_or("pose not accepted")?;
    assert!(estimate.mean_reprojection_error > 0.1);
    assert!(estimate.mean_reprojection_error < 2.0);
    Ok(())
}

#[test]
fn height_gates() -> Result<(), Box<dyn Error>> {
    // device sits 0.2 m along the fixed z axis, fixed camera 1 m up
    let scene = grid_scene(10, looking_at(0.0, 2.0), 0.0);
    let world_from_fixed = Pose::new(DQuat::IDENTITY, DVec3::new(0.0, 0.0, 1.0));
    let cases = [
        (0.0, 1.0, 4),
        (1.5, 3.0, 5),
        (1.0, 1.5, 0),
    ];
    for (min, max, code) in cases {
        let config = EstimatorConfig {
            min_pose_height: min,
            max_pose_height: max,
            ..seeded_config()
        };
        let mut est = Estimator::new("phone", "fixed_camera", world_from_fixed, config, None)?;
        let mut depth = scene.depth.clone();
        let result = est.update(scene.frame(&mut depth));
        assert_eq!(outcome_code(&result), code, "bounds [{min}, {max}]");
    }
    Ok(())
}

#[test]
fn orientation_gate() -> Result<(), Box<dyn Error>> {
    for (theta, code) in [(20.0, 0), (60.0, 6)] {
        let scene = grid_scene(11, looking_at(theta, 2.0), 0.0);
        let mut est = estimator(seeded_config())?;
        let mut depth = scene.depth.clone();
        let outcome = est.update(scene.frame(&mut depth))?;
        assert_eq!(outcome.code(), code, "yaw {theta}");
    }
    Ok(())
}

#[test]
fn rejection_keeps_previous_state() -> Result<(), Box<dyn Error>> {
    let good = grid_scene(12, looking_at(5.0, 2.0), 0.0);
    let far = grid_scene(13, looking_at(60.0, 2.0), 0.0);
    let mut est = estimator(seeded_config())?;

    let mut depth = good.depth.clone();
    assert!(est.update(good.frame(&mut depth))?.is_accepted());
    let before = est.last_estimate().cloned();

    let mut depth = far.depth.clone();
    assert_eq!(est.update(far.frame(&mut depth))?.code(), 6);
    assert_eq!(est.last_estimate().cloned(), before);
    assert_eq!(est.last_diagnostics().code, 6);
    Ok(())
}

#[test]
fn same_seed_same_estimate() -> Result<(), Box<dyn Error>> {
    let scene = grid_scene(14, looking_at(-10.0, 2.0), 1.0);
    let run = || -> Result<Outcome, EstimatorError> {
        let mut est = estimator(seeded_config())?;
        let mut depth = scene.depth.clone();
        est.update(scene.frame(&mut depth))
    };
    assert_eq!(run()?, run()?);
    Ok(())
}

#[test]
fn warm_start_from_last_pose() -> Result<(), Box<dyn Error>> {
    let truth = looking_at(8.0, 2.0);
    let scene = grid_scene(15, truth, 0.0);
    let mut est = estimator(seeded_config())?;

    let mut depth = scene.depth.clone();
    let first = est.update(scene.frame(&mut depth))?;
    assert!(first.is_accepted());
    assert!(est.last_diagnostics().ransac_iterations > 0);

    // every correspondence agrees with the previous pose, no sampling needed
    let mut depth = scene.depth.clone();
    let second = est.update(scene.frame(&mut depth))?;
    assert_eq!(est.last_diagnostics().ransac_iterations, 0);
    let warm = second.estimate().ok_or("pose not accepted")?;
    assert!(translation_error(&warm.fixed_from_camera, &truth) < 1e-3);

    // a fresh estimator solves the same frame from scratch and lands on the same pose
    let mut cold_est = estimator(seeded_config())?;
    let mut depth = scene.depth.clone();
    let cold_outcome = cold_est.update(scene.frame(&mut depth))?;
    let cold = cold_outcome.estimate().ok_or("pose not accepted")?;
    assert!(cold_est.last_diagnostics().ransac_iterations > 0);
    assert_eq!(warm.inlier_count, cold.inlier_count);
    assert!(translation_error(&warm.fixed_from_camera, &cold.fixed_from_camera) < 1e-6);
    assert!(rotation_error(&warm.fixed_from_camera, &cold.fixed_from_camera) < 1e-6);

    est.reset();
    let mut depth = scene.depth.clone();
    est.update(scene.frame(&mut depth))?;
    assert!(est.last_diagnostics().ransac_iterations > 0);
    Ok(())
}

#[test]
fn remembered_features_keep_tracking() -> Result<(), Box<dyn Error>> {
    let truth = looking_at(5.0, 2.0);
    let scene = grid_scene(16, truth, 0.0);
    let memory = Arc::new(InMemoryFeatureMemory::default());
    let config = EstimatorConfig {
        enable_features_memory: true,
        ..seeded_config()
    };
    let mut est = Estimator::new(
        "phone",
        "fixed_camera",
        Pose::IDENTITY,
        config.clone(),
        Some(memory.clone() as Arc<dyn FeatureMemory>),
    )?;

    let mut depth = scene.depth.clone();
    let first = est.update(scene.frame(&mut depth))?;
    let inliers = first.estimate().ok_or("pose not accepted")?.inlier_count;
    assert_eq!(memory.len(), inliers);

    // stored on the fixed side, with where the device saw them from
    for feature in memory.features() {
        let i = scene
            .fixed_descriptors
            .iter()
            .position(|d| *d == feature.descriptor)
            .ok_or("unknown descriptor")?;
        assert_eq!(feature.keypoint, scene.fixed_keypoints[i]);
        assert!((feature.observer_distance - feature.observer_direction.length()).abs() < 1e-12);
        assert!(feature.observer_distance > 1.0);
    }

    // a second device sharing the store, the fixed camera reports nothing this time
    let mut other = Estimator::new(
        "tablet",
        "fixed_camera",
        Pose::IDENTITY,
        config,
        Some(memory.clone() as Arc<dyn FeatureMemory>),
    )?;
    let empty_kps: Vec<Keypoint> = Vec::new();
    let empty_desc: Vec<Descriptor> = Vec::new();
    let mut depth = scene.depth.clone();
    let mut frame = scene.frame(&mut depth);
    frame.fixed = FixedObservation::Features {
        keypoints: &empty_kps,
        descriptors: &empty_desc,
    };
    let outcome = other.update(frame)?;
    let estimate = outcome.estimate().ok_or("pose not accepted")?;
    assert!(translation_error(&estimate.fixed_from_camera, &truth) < 1e-3);
    assert_eq!(other.last_diagnostics().memory_features, inliers);

    // something moved in front of every remembered point
    let mut depth = DepthMap::from_size_val(scene.depth.size(), 500)?;
    let mut frame = scene.frame(&mut depth);
    frame.fixed = FixedObservation::Features {
        keypoints: &empty_kps,
        descriptors: &empty_desc,
    };
    assert_eq!(other.update(frame)?.code(), 1);
    assert!(memory.is_empty());
    Ok(())
}

#[test]
fn memory_is_off_by_default() -> Result<(), Box<dyn Error>> {
    let memory: Arc<dyn FeatureMemory> = Arc::new(InMemoryFeatureMemory::default());
    let est = Estimator::new(
        "phone",
        "fixed_camera",
        Pose::IDENTITY,
        seeded_config(),
        Some(memory),
    )?;
    assert!(est.memory().is_none());
    Ok(())
}

#[test]
fn malformed_frames_are_errors() -> Result<(), Box<dyn Error>> {
    let scene = grid_scene(17, looking_at(0.0, 2.0), 0.0);
    let mut est = estimator(seeded_config())?;

    let mut depth = scene.depth.clone();
    let mut frame = scene.frame(&mut depth);
    frame.mobile_descriptors = &scene.mobile_descriptors[1..];
    let result = est.update(frame);
    assert!(matches!(result, Err(EstimatorError::InvalidInput(_))));
    assert_eq!(outcome_code(&result), -1);

    let mut depth = scene.depth.clone();
    let mut frame = scene.frame(&mut depth);
    frame.fixed_intrinsics.fx = 0.0;
    assert_eq!(outcome_code(&est.update(frame)), -1);

    let mut depth = scene.depth.clone();
    let mut frame = scene.frame(&mut depth);
    frame.mobile_image_size = [0, 480].into();
    assert_eq!(outcome_code(&est.update(frame)), -1);

    // fixed image and depth disagree on the size
    let image = GrayImage::from_size_val([320, 240].into(), 128)?;
    let mut depth = scene.depth.clone();
    let mut frame = scene.frame(&mut depth);
    frame.fixed = FixedObservation::Image(&image);
    assert_eq!(outcome_code(&est.update(frame)), -1);
    assert_eq!(est.last_diagnostics().code, -1);
    Ok(())
}

#[test]
fn flat_fixed_image_has_nothing_to_match() -> Result<(), Box<dyn Error>> {
    let scene = grid_scene(18, looking_at(0.0, 2.0), 0.0);
    let mut est = estimator(seeded_config())?;
    let image = GrayImage::from_size_val(scene.depth.size(), 128)?;

    let mut depth = scene.depth.clone();
    let mut frame = scene.frame(&mut depth);
    frame.fixed = FixedObservation::Image(&image);
    assert_eq!(est.update(frame)?, Outcome::Rejected(Rejection::NotEnoughMatches));
    assert_eq!(est.last_diagnostics().fixed_features, 0);
    Ok(())
}

#[test]
fn invalid_config_is_refused() {
    let config = EstimatorConfig {
        pnp_confidence: 1.5,
        ..Default::default()
    };
    assert!(matches!(
        estimator(config),
        Err(EstimatorError::Config(_))
    ));
}
