use std::sync::Arc;
use std::time::Instant;

use camreg_3d::depth::resolve_match_depths;
use camreg_3d::reconstruct::{reconstruct, Correspondences};
use camreg_3d::{CameraIntrinsics, DepthError, Pose};
use camreg_features::{
    filter_matches, match_descriptors, Descriptor, FeatureError, Keypoint, OrbDetector,
};
use camreg_image::{DepthMap, GrayImage, ImageSize};
use camreg_pnp::{
    reprojection_errors, solve_pnp_ransac, PnPError, PnPMethod, RansacParams, RigidTransform,
};
use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::config::{EstimatorConfig, ReprojectionScope};
use crate::error::EstimatorError;
use crate::memory::{FeatureMemory, InMemoryFeatureMemory, StoredFeature};
use crate::validate::{Gates, Rejection};

/// Frame id of world frame poses.
pub const WORLD_FRAME_ID: &str = "world";

/// What the fixed camera contributes to a frame.
#[derive(Clone, Copy, Debug)]
pub enum FixedObservation<'a> {
    /// Raw grayscale image, ORB features are extracted from it.
    Image(&'a GrayImage),
    /// Features extracted upstream.
    Features {
        /// Keypoints in the fixed image.
        keypoints: &'a [Keypoint],
        /// One descriptor per keypoint.
        descriptors: &'a [Descriptor],
    },
}

/// A synchronized pair of observations, one from the device and one from the fixed camera.
#[derive(Debug)]
pub struct Frame<'a> {
    /// Keypoints detected by the device.
    pub mobile_keypoints: &'a [Keypoint],
    /// One descriptor per device keypoint.
    pub mobile_descriptors: &'a [Descriptor],
    /// Intrinsics of the device camera.
    pub mobile_intrinsics: CameraIntrinsics,
    /// Size of the device image the keypoints come from.
    pub mobile_image_size: ImageSize,
    /// Fixed camera image or features.
    pub fixed: FixedObservation<'a>,
    /// Depth registered to the fixed image, millimeters, zero where unknown.
    ///
    /// Readings repaired while resolving matches are written back.
    pub fixed_depth: &'a mut DepthMap,
    /// Intrinsics of the fixed camera.
    pub fixed_intrinsics: CameraIntrinsics,
    /// Frame id of the fixed camera.
    pub fixed_frame_id: &'a str,
    /// Capture time, nanoseconds.
    pub timestamp_ns: u64,
}

/// An accepted device pose.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    /// Device camera placement in the world frame.
    pub world_from_camera: Pose,
    /// Device camera placement in the fixed camera frame.
    pub fixed_from_camera: Pose,
    /// Frame id of `world_from_camera`.
    pub world_frame_id: String,
    /// Frame id of `fixed_from_camera`.
    pub fixed_frame_id: String,
    /// Capture time of the frame, nanoseconds.
    pub timestamp_ns: u64,
    /// Correspondences handed to the solver.
    pub match_count: usize,
    /// Solver inliers.
    pub inlier_count: usize,
    /// Mean pixel reprojection error.
    pub mean_reprojection_error: f64,
    /// Correspondences `mean_reprojection_error` is computed over.
    pub reprojection_scope: ReprojectionScope,
}

/// Result of a processed frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// The pose passed every gate.
    Accepted(PoseEstimate),
    /// The frame was processed but no pose was accepted.
    Rejected(Rejection),
}

impl Outcome {
    /// Status code, `0` when accepted, the rejection code otherwise.
    pub fn code(&self) -> i32 {
        match self {
            Outcome::Accepted(_) => 0,
            Outcome::Rejected(r) => r.code(),
        }
    }

    /// The accepted estimate, if any.
    pub fn estimate(&self) -> Option<&PoseEstimate> {
        match self {
            Outcome::Accepted(e) => Some(e),
            Outcome::Rejected(_) => None,
        }
    }

    /// Returns true if the pose was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }
}

/// Status code of an update: `0` accepted, positive for a rejection, negative for an error.
pub fn outcome_code(result: &Result<Outcome, EstimatorError>) -> i32 {
    match result {
        Ok(outcome) => outcome.code(),
        Err(err) => err.code(),
    }
}

/// What happened to the last frame.
///
/// Counts are always kept, pixel lists only with `debug_visualization`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameDiagnostics {
    /// Status code of the frame.
    pub code: i32,
    /// Size of the device image.
    pub mobile_image_size: Option<ImageSize>,
    /// Features on the fixed side, before adding remembered ones.
    pub fixed_features: usize,
    /// Remembered features added to the fixed side.
    pub memory_features: usize,
    /// Matches before filtering.
    pub raw_matches: usize,
    /// Matches after filtering.
    pub filtered_matches: usize,
    /// Correspondences with a usable depth.
    pub correspondences: usize,
    /// Depth readings filled in by the repair.
    pub repaired_depths: usize,
    /// Hypotheses evaluated by RANSAC.
    pub ransac_iterations: usize,
    /// Indices of the solver inliers among the correspondences.
    pub inliers: Vec<usize>,
    /// Device and fixed pixel of each correspondence.
    pub matched_pixels: Vec<([f64; 2], [f64; 2])>,
    /// Observed device pixel and reprojected pixel of each inlier.
    pub reprojections: Vec<([f64; 2], [f64; 2])>,
}

/// Why processing stopped early.
enum Halt {
    Rejected(Rejection),
    Failed(EstimatorError),
}

impl From<Rejection> for Halt {
    fn from(r: Rejection) -> Self {
        Halt::Rejected(r)
    }
}

impl From<EstimatorError> for Halt {
    fn from(e: EstimatorError) -> Self {
        Halt::Failed(e)
    }
}

impl From<FeatureError> for Halt {
    fn from(e: FeatureError) -> Self {
        Halt::Failed(e.into())
    }
}

impl From<DepthError> for Halt {
    fn from(e: DepthError) -> Self {
        Halt::Failed(e.into())
    }
}

fn rigid_transform(pose: &Pose) -> RigidTransform {
    RigidTransform {
        rotation: pose.rotation_matrix(),
        translation: pose.translation.to_array(),
    }
}

/// Pose estimator of one AR device against one fixed camera.
///
/// Each call to [`Estimator::update`] matches the device features against the fixed camera,
/// lifts the matches to 3D with the fixed depth, solves PnP with RANSAC and accepts the pose
/// only if it passes every gate. The last accepted pose seeds the next solve.
pub struct Estimator {
    device_id: String,
    fixed_camera_name: String,
    world_from_fixed: Pose,
    config: EstimatorConfig,
    gates: Gates,
    orb: OrbDetector,
    memory: Option<Arc<dyn FeatureMemory>>,
    last_estimate: Option<PoseEstimate>,
    diagnostics: FrameDiagnostics,
}

impl Estimator {
    /// Creates an estimator.
    ///
    /// # Arguments
    ///
    /// * `device_id` - Name of the tracked device.
    /// * `fixed_camera_name` - Name of the fixed camera.
    /// * `world_from_fixed` - Placement of the fixed camera in the world.
    /// * `config` - Estimator configuration.
    /// * `memory` - Shared feature store. Ignored unless `enable_features_memory` is set, in
    ///   which case a private [`InMemoryFeatureMemory`] is created when none is given.
    ///
    /// # Errors
    ///
    /// If the configuration does not validate or `world_from_fixed` is not finite.
    pub fn new(
        device_id: impl Into<String>,
        fixed_camera_name: impl Into<String>,
        world_from_fixed: Pose,
        config: EstimatorConfig,
        memory: Option<Arc<dyn FeatureMemory>>,
    ) -> Result<Self, EstimatorError> {
        config.validate()?;
        if !world_from_fixed.is_finite() {
            return Err(EstimatorError::InvalidInput(
                "fixed camera placement is not finite".into(),
            ));
        }
        let orb = OrbDetector::new(
            config.orb_max_points,
            config.orb_scale_factor,
            config.orb_levels_number,
        )?;
        let memory = if config.enable_features_memory {
            Some(memory.unwrap_or_else(|| {
                Arc::new(InMemoryFeatureMemory::new(config.feature_memory)) as Arc<dyn FeatureMemory>
            }))
        } else {
            None
        };

        Ok(Self {
            device_id: device_id.into(),
            fixed_camera_name: fixed_camera_name.into(),
            world_from_fixed,
            gates: Gates::new(&config),
            config,
            orb,
            memory,
            last_estimate: None,
            diagnostics: FrameDiagnostics::default(),
        })
    }

    /// Processes a frame.
    ///
    /// Returns the accepted pose or the reason it was rejected. Only accepted poses update
    /// the estimator state and the feature memory.
    ///
    /// # Errors
    ///
    /// Malformed frames and solver input errors, see [`EstimatorError`].
    pub fn update(&mut self, frame: Frame<'_>) -> Result<Outcome, EstimatorError> {
        let start = Instant::now();
        let mut diagnostics = FrameDiagnostics::default();

        let result = match self.estimate(frame, &mut diagnostics) {
            Ok(estimate) => Ok(Outcome::Accepted(estimate)),
            Err(Halt::Rejected(rejection)) => Ok(Outcome::Rejected(rejection)),
            Err(Halt::Failed(err)) => Err(err),
        };
        diagnostics.code = outcome_code(&result);
        self.diagnostics = diagnostics;

        match &result {
            Ok(Outcome::Accepted(estimate)) => {
                log::info!(
                    "{}: pose accepted, {} inliers of {}, error {:.3} px, height {:.3} m in {:?}",
                    self.device_id,
                    estimate.inlier_count,
                    estimate.match_count,
                    estimate.mean_reprojection_error,
                    estimate.world_from_camera.height(),
                    start.elapsed()
                );
                self.last_estimate = Some(estimate.clone());
            }
            Ok(Outcome::Rejected(rejection)) => {
                log::debug!("{}: frame rejected, {rejection}", self.device_id)
            }
            Err(err) => log::warn!("{}: frame failed, {err}", self.device_id),
        }
        result
    }

    fn estimate(
        &self,
        frame: Frame<'_>,
        diagnostics: &mut FrameDiagnostics,
    ) -> Result<PoseEstimate, Halt> {
        let Frame {
            mobile_keypoints,
            mobile_descriptors,
            mobile_intrinsics,
            mobile_image_size,
            fixed,
            fixed_depth,
            fixed_intrinsics,
            fixed_frame_id,
            timestamp_ns,
        } = frame;

        if mobile_keypoints.len() != mobile_descriptors.len() {
            return Err(EstimatorError::InvalidInput(format!(
                "{} device keypoints but {} descriptors",
                mobile_keypoints.len(),
                mobile_descriptors.len()
            ))
            .into());
        }
        if mobile_image_size.width == 0 || mobile_image_size.height == 0 {
            return Err(EstimatorError::InvalidInput("empty device image".into()).into());
        }
        mobile_intrinsics.validate()?;
        fixed_intrinsics.validate()?;
        diagnostics.mobile_image_size = Some(mobile_image_size);

        let t = Instant::now();
        let (mut fixed_keypoints, mut fixed_descriptors) = match fixed {
            FixedObservation::Image(image) => {
                if image.size() != fixed_depth.size() {
                    return Err(EstimatorError::InvalidInput(format!(
                        "fixed image is {}x{} but depth is {}x{}",
                        image.width(),
                        image.height(),
                        fixed_depth.width(),
                        fixed_depth.height()
                    ))
                    .into());
                }
                match self.orb.detect_and_compute(image) {
                    Ok(features) => features,
                    Err(FeatureError::NoKeypoints { .. }) => (Vec::new(), Vec::new()),
                    Err(err) => return Err(EstimatorError::FeatureExtraction(err).into()),
                }
            }
            FixedObservation::Features {
                keypoints,
                descriptors,
            } => {
                if keypoints.len() != descriptors.len() {
                    return Err(EstimatorError::InvalidInput(format!(
                        "{} fixed keypoints but {} descriptors",
                        keypoints.len(),
                        descriptors.len()
                    ))
                    .into());
                }
                (keypoints.to_vec(), descriptors.to_vec())
            }
        };
        diagnostics.fixed_features = fixed_keypoints.len();
        log::debug!("-- fixed features: {} in {:?}", fixed_keypoints.len(), t.elapsed());

        if let Some(memory) = &self.memory {
            memory.remove_non_background_features(fixed_depth);
            for feature in memory.features() {
                fixed_keypoints.push(feature.keypoint);
                fixed_descriptors.push(feature.descriptor);
            }
            diagnostics.memory_features = fixed_keypoints.len() - diagnostics.fixed_features;
        }

        let t = Instant::now();
        let raw = match match_descriptors(mobile_descriptors, &fixed_descriptors) {
            Ok(raw) => raw,
            Err(FeatureError::InsufficientFeatures { query, reference }) => {
                log::debug!("nothing to match: {query} device, {reference} fixed features");
                return Err(Rejection::NotEnoughMatches.into());
            }
            Err(err) => return Err(err.into()),
        };
        let filtered = filter_matches(
            &raw,
            mobile_keypoints,
            &fixed_keypoints,
            &self.config.filter_params(),
        )?;
        let resolved = resolve_match_depths(
            &filtered,
            &fixed_keypoints,
            fixed_depth,
            &self.config.depth_repair.params(),
        )?;
        let correspondences =
            reconstruct(&resolved, mobile_keypoints, &fixed_keypoints, &fixed_intrinsics)?;
        log::debug!("-- matches in {:?}", t.elapsed());

        diagnostics.raw_matches = raw.len();
        diagnostics.filtered_matches = filtered.len();
        diagnostics.correspondences = correspondences.len();
        diagnostics.repaired_depths = resolved.iter().filter(|r| r.repaired).count();
        if self.config.debug_visualization {
            diagnostics.matched_pixels = correspondences
                .matches
                .iter()
                .zip(&correspondences.image_points)
                .map(|(m, &mobile)| {
                    let f = &fixed_keypoints[m.train_idx];
                    (mobile, [f.x as f64, f.y as f64])
                })
                .collect();
        }

        self.gates.check_matches(correspondences.len())?;

        let t = Instant::now();
        let k = mobile_intrinsics.matrix();
        let params = RansacParams {
            max_iterations: self.config.pnp_iterations,
            reproj_threshold_px: self.config.pnp_reprojection_error,
            confidence: self.config.pnp_confidence,
            random_seed: self.config.random_seed,
            refine: true,
            initial_guess: self
                .last_estimate
                .as_ref()
                .map(|e| rigid_transform(&e.fixed_from_camera.inverse())),
        };
        let ransac = match solve_pnp_ransac(
            &correspondences.object_points,
            &correspondences.image_points,
            &k,
            PnPMethod::Auto,
            &params,
        ) {
            Ok(ransac) => ransac,
            Err(PnPError::SolverDivergence(msg)) | Err(PnPError::SvdFailed(msg)) => {
                log::debug!("pnp found no pose: {msg}");
                return Err(Rejection::NotEnoughInliers.into());
            }
            Err(err) => return Err(EstimatorError::from(err).into()),
        };
        log::debug!(
            "-- pnp: {} inliers after {} iterations in {:?}",
            ransac.inliers.len(),
            ransac.iterations,
            t.elapsed()
        );
        diagnostics.ransac_iterations = ransac.iterations;
        diagnostics.inliers = ransac.inliers.clone();

        self.gates.check_inliers(ransac.inliers.len())?;

        let camera_from_fixed =
            Pose::from_rotation_matrix(&ransac.pose.rotation, &ransac.pose.translation);
        let errors = reprojection_errors(
            &correspondences.object_points,
            &correspondences.image_points,
            &k,
            &ransac.pose.transform(),
        );
        let mean_error = match self.config.reprojection_scope {
            ReprojectionScope::Inliers => {
                ransac.inliers.iter().map(|&i| errors[i]).sum::<f64>()
                    / ransac.inliers.len() as f64
            }
            ReprojectionScope::Correspondences => {
                errors.iter().sum::<f64>() / errors.len() as f64
            }
        };
        if self.config.debug_visualization {
            diagnostics.reprojections = ransac
                .inliers
                .iter()
                .filter_map(|&i| {
                    let p = DVec3::from_array(correspondences.object_points[i]);
                    let projected = mobile_intrinsics.project(camera_from_fixed.transform_point(p))?;
                    Some((correspondences.image_points[i], projected))
                })
                .collect();
        }

        self.gates.check_reprojection(mean_error)?;

        let fixed_from_camera = camera_from_fixed.inverse();
        let world_from_camera = self.world_from_fixed * fixed_from_camera;
        self.gates.check_height(&world_from_camera)?;
        self.gates.check_orientation(&fixed_from_camera)?;

        if let Some(memory) = &self.memory {
            remember_inliers(
                memory.as_ref(),
                &correspondences,
                &ransac.inliers,
                &fixed_keypoints,
                &fixed_descriptors,
                fixed_from_camera.translation,
            );
        }

        Ok(PoseEstimate {
            world_from_camera,
            fixed_from_camera,
            world_frame_id: WORLD_FRAME_ID.to_string(),
            fixed_frame_id: fixed_frame_id.to_string(),
            timestamp_ns,
            match_count: correspondences.len(),
            inlier_count: ransac.inliers.len(),
            mean_reprojection_error: mean_error,
            reprojection_scope: self.config.reprojection_scope,
        })
    }

    /// Last accepted estimate.
    pub fn last_estimate(&self) -> Option<&PoseEstimate> {
        self.last_estimate.as_ref()
    }

    /// Returns true once a pose has been accepted.
    pub fn has_estimate(&self) -> bool {
        self.last_estimate.is_some()
    }

    /// Correspondences behind the last accepted estimate.
    pub fn last_match_count(&self) -> Option<usize> {
        self.last_estimate.as_ref().map(|e| e.match_count)
    }

    /// Mean reprojection error of the last accepted estimate, pixels.
    pub fn last_reprojection_error(&self) -> Option<f64> {
        self.last_estimate.as_ref().map(|e| e.mean_reprojection_error)
    }

    /// Diagnostics of the last processed frame, accepted or not.
    pub fn last_diagnostics(&self) -> &FrameDiagnostics {
        &self.diagnostics
    }

    /// Forgets the last accepted estimate, the next solve starts cold.
    pub fn reset(&mut self) {
        self.last_estimate = None;
    }

    /// Name of the tracked device.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Name of the fixed camera.
    pub fn fixed_camera_name(&self) -> &str {
        &self.fixed_camera_name
    }

    /// Placement of the fixed camera in the world.
    pub fn world_from_fixed(&self) -> Pose {
        self.world_from_fixed
    }

    /// The configuration.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// The feature store, when feature memory is enabled.
    pub fn memory(&self) -> Option<&Arc<dyn FeatureMemory>> {
        self.memory.as_ref()
    }
}

/// Stores the fixed side of every inlier with where it was observed from.
fn remember_inliers(
    memory: &dyn FeatureMemory,
    correspondences: &Correspondences,
    inliers: &[usize],
    fixed_keypoints: &[Keypoint],
    fixed_descriptors: &[Descriptor],
    observer: DVec3,
) {
    for &i in inliers {
        let m = correspondences.matches[i];
        let point = DVec3::from_array(correspondences.object_points[i]);
        let direction = point - observer;
        memory.save_feature(StoredFeature {
            keypoint: fixed_keypoints[m.train_idx],
            descriptor: fixed_descriptors[m.train_idx],
            observer_distance: direction.length(),
            observer_direction: direction,
            depth_mm: correspondences.depths_mm[i],
        });
    }
    log::debug!("feature memory: saved {} features", inliers.len());
}
