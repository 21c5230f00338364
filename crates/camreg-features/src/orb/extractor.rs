use camreg_image::GrayImage;
use rayon::prelude::*;

use super::pattern::{BRIEF_PATTERN, PATTERN_LEN};
use super::pyramid::{build_pyramid, gaussian_blur};
use crate::fast::{fast_corners, FastCorner};
use crate::{Descriptor, FeatureError, Keypoint, DESCRIPTOR_BYTES};

/// Distance to the level border below which no keypoint is kept.
const EDGE_THRESHOLD: usize = 20;
/// Diameter of the patch used for orientation and description.
const PATCH_SIZE: usize = 31;
const HALF_PATCH: i32 = 15;
const HARRIS_BLOCK: i32 = 7;
const DESCRIPTOR_SIGMA: f32 = 2.0;

/// ORB detector and descriptor extractor.
///
/// Detects FAST-9 corners on an image pyramid, ranks them by Harris response with a
/// geometric per-level quota, orients them by intensity centroid and describes them with
/// rotated BRIEF.
#[derive(Clone, Debug, PartialEq)]
pub struct OrbDetector {
    /// Maximum number of keypoints over all levels.
    pub max_points: usize,
    /// Ratio between consecutive pyramid levels, greater than 1.
    pub scale_factor: f32,
    /// Number of pyramid levels.
    pub levels: usize,
    /// FAST threshold tried first on every level.
    pub fast_threshold: u8,
    /// Lower FAST threshold used when a level does not fill its quota.
    pub min_fast_threshold: u8,
    /// Harris detector free parameter.
    pub harris_k: f32,
}

impl Default for OrbDetector {
    fn default() -> Self {
        Self {
            max_points: 500,
            scale_factor: 1.2,
            levels: 8,
            fast_threshold: 20,
            min_fast_threshold: 7,
            harris_k: 0.04,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    x: usize,
    y: usize,
    response: f32,
}

impl OrbDetector {
    /// Create a detector with the given density parameters.
    ///
    /// # Errors
    ///
    /// [`FeatureError::InvalidParameter`] if `max_points` or `levels` is zero or
    /// `scale_factor` is not greater than one.
    pub fn new(max_points: usize, scale_factor: f32, levels: usize) -> Result<Self, FeatureError> {
        if max_points == 0 {
            return Err(FeatureError::InvalidParameter {
                name: "max_points",
                reason: "must be positive".to_string(),
            });
        }
        if scale_factor.is_nan() || scale_factor <= 1.0 {
            return Err(FeatureError::InvalidParameter {
                name: "scale_factor",
                reason: format!("must be greater than 1, got {scale_factor}"),
            });
        }
        if levels == 0 {
            return Err(FeatureError::InvalidParameter {
                name: "levels",
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            max_points,
            scale_factor,
            levels,
            ..Default::default()
        })
    }

    /// Geometric split of `max_points` over the pyramid levels.
    fn features_per_level(&self, nlevels: usize) -> Vec<usize> {
        let mut features_per_level = vec![0usize; nlevels];
        let factor = 1.0f32 / self.scale_factor;
        let mut n_desired =
            self.max_points as f32 * (1.0 - factor) / (1.0 - factor.powi(nlevels as i32));

        let mut sum = 0usize;
        for item in features_per_level.iter_mut().take(nlevels - 1) {
            let n = (n_desired.round().max(0.0) as usize).min(self.max_points - sum);
            *item = n;
            sum += n;
            n_desired *= factor;
        }
        features_per_level[nlevels - 1] = self.max_points.saturating_sub(sum);

        features_per_level
    }

    fn detect_level(&self, level: &GrayImage, quota: usize) -> Vec<Candidate> {
        if quota == 0 {
            return Vec::new();
        }

        let mut corners = fast_corners(level, self.fast_threshold, 9, EDGE_THRESHOLD);
        if corners.len() < quota && self.min_fast_threshold < self.fast_threshold {
            let low = fast_corners(level, self.min_fast_threshold, 9, EDGE_THRESHOLD);
            let extra: Vec<FastCorner> = low
                .into_iter()
                .filter(|c| {
                    !corners
                        .iter()
                        .any(|k| k.x.abs_diff(c.x) <= 3 && k.y.abs_diff(c.y) <= 3)
                })
                .collect();
            corners.extend(extra);
        }

        let mut candidates: Vec<Candidate> = corners
            .iter()
            .map(|c| Candidate {
                x: c.x,
                y: c.y,
                response: harris_response(level, c.x, c.y, self.harris_k),
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.response
                .total_cmp(&a.response)
                .then_with(|| a.y.cmp(&b.y))
                .then_with(|| a.x.cmp(&b.x))
        });
        candidates.truncate(quota);
        candidates
    }

    /// Detect keypoints and compute their descriptors.
    ///
    /// Keypoints are returned in full resolution pixel coordinates together with their
    /// index-aligned descriptors.
    ///
    /// # Errors
    ///
    /// [`FeatureError::NoKeypoints`] if nothing is detected on any level.
    pub fn detect_and_compute(
        &self,
        img: &GrayImage,
    ) -> Result<(Vec<Keypoint>, Vec<Descriptor>), FeatureError> {
        let pyramid = build_pyramid(img, self.levels, self.scale_factor, 2 * EDGE_THRESHOLD + 1)?;
        let quotas = self.features_per_level(pyramid.len());

        let per_level = pyramid
            .par_iter()
            .zip(quotas.par_iter())
            .enumerate()
            .map(|(octave, (level, &quota))| -> Result<_, FeatureError> {
                let candidates = self.detect_level(level, quota);
                if candidates.is_empty() {
                    return Ok((Vec::<Keypoint>::new(), Vec::<Descriptor>::new()));
                }

                let smoothed = gaussian_blur(level, DESCRIPTOR_SIGMA)?;
                let scale = self.scale_factor.powi(octave as i32);

                let mut keypoints = Vec::with_capacity(candidates.len());
                let mut descriptors = Vec::with_capacity(candidates.len());
                for c in candidates {
                    let angle = intensity_centroid_angle(level, c.x, c.y);
                    descriptors.push(rotated_brief(&smoothed, c.x, c.y, angle));
                    keypoints.push(Keypoint {
                        x: c.x as f32 * scale,
                        y: c.y as f32 * scale,
                        size: PATCH_SIZE as f32 * scale,
                        angle,
                        response: c.response,
                        octave: octave as i32,
                        class_id: -1,
                    });
                }
                Ok((keypoints, descriptors))
            })
            .collect::<Result<Vec<_>, FeatureError>>()?;

        let (keypoints, descriptors): (Vec<Keypoint>, Vec<Descriptor>) = per_level
            .into_iter()
            .flat_map(|(k, d)| k.into_iter().zip(d))
            .unzip();

        if keypoints.is_empty() {
            return Err(FeatureError::NoKeypoints {
                width: img.width(),
                height: img.height(),
            });
        }

        log::debug!(
            "orb: {} keypoints over {} levels",
            keypoints.len(),
            pyramid.len()
        );

        Ok((keypoints, descriptors))
    }
}

/// Harris corner response over a 7x7 block of Sobel gradients.
fn harris_response(img: &GrayImage, x: usize, y: usize, k: f32) -> f32 {
    let data = img.as_slice();
    let w = img.width() as i32;
    let px = |xx: i32, yy: i32| data[(yy * w + xx) as usize] as f32;

    let (cx, cy) = (x as i32, y as i32);
    let r = HARRIS_BLOCK / 2;
    let (mut a, mut b, mut c) = (0f32, 0f32, 0f32);
    for yy in cy - r..=cy + r {
        for xx in cx - r..=cx + r {
            let dx = (px(xx + 1, yy - 1) + 2.0 * px(xx + 1, yy) + px(xx + 1, yy + 1))
                - (px(xx - 1, yy - 1) + 2.0 * px(xx - 1, yy) + px(xx - 1, yy + 1));
            let dy = (px(xx - 1, yy + 1) + 2.0 * px(xx, yy + 1) + px(xx + 1, yy + 1))
                - (px(xx - 1, yy - 1) + 2.0 * px(xx, yy - 1) + px(xx + 1, yy - 1));
            a += dx * dx;
            b += dy * dy;
            c += dx * dy;
        }
    }

    let norm = 1.0 / (4.0 * HARRIS_BLOCK as f32 * 255.0);
    let (a, b, c) = (a * norm * norm, b * norm * norm, c * norm * norm);
    a * b - c * c - k * (a + b) * (a + b)
}

/// Orientation in degrees, `[0, 360)`, of the intensity centroid over a circular patch.
fn intensity_centroid_angle(img: &GrayImage, x: usize, y: usize) -> f32 {
    let data = img.as_slice();
    let w = img.width() as i32;
    let (cx, cy) = (x as i32, y as i32);
    let radius2 = HALF_PATCH * HALF_PATCH;

    let mut m01 = 0f32;
    let mut m10 = 0f32;
    for dy in -HALF_PATCH..=HALF_PATCH {
        let mut row_sum = 0f32;
        for dx in -HALF_PATCH..=HALF_PATCH {
            if dx * dx + dy * dy > radius2 {
                continue;
            }
            let v = data[((cy + dy) * w + cx + dx) as usize] as f32;
            m10 += v * dx as f32;
            row_sum += v;
        }
        m01 += row_sum * dy as f32;
    }

    let angle = m01.atan2(m10).to_degrees();
    if angle < 0.0 {
        angle + 360.0
    } else {
        angle
    }
}

/// Rotated BRIEF descriptor, bit `i` set when the first sample of test `i` is darker.
fn rotated_brief(smoothed: &GrayImage, x: usize, y: usize, angle_deg: f32) -> Descriptor {
    let data = smoothed.as_slice();
    let w = smoothed.width() as i32;
    let (cx, cy) = (x as i32, y as i32);
    let (sin_a, cos_a) = angle_deg.to_radians().sin_cos();

    let sample = |px: i8, py: i8| {
        let (px, py) = (px as f32, py as f32);
        let rx = (px * cos_a - py * sin_a).round() as i32;
        let ry = (px * sin_a + py * cos_a).round() as i32;
        data[((cy + ry) * w + cx + rx) as usize]
    };

    let mut bytes = [0u8; DESCRIPTOR_BYTES];
    for (j, test) in BRIEF_PATTERN.iter().enumerate().take(PATTERN_LEN) {
        if sample(test[0], test[1]) < sample(test[2], test[3]) {
            bytes[j / 8] |= 1 << (j % 8);
        }
    }
    Descriptor(bytes)
}
