use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use camreg_3d::depth::keypoint_pixel;
use camreg_features::{Descriptor, Keypoint};
use camreg_image::DepthMap;
use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::config::FeatureMemoryConfig;

/// A fixed camera feature remembered from a validated estimate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredFeature {
    /// Keypoint in the fixed image.
    pub keypoint: Keypoint,
    /// Descriptor of the keypoint.
    pub descriptor: Descriptor,
    /// Distance, meters, from the device that observed the point.
    pub observer_distance: f64,
    /// Vector from the observing device to the point, fixed camera frame.
    pub observer_direction: DVec3,
    /// Depth of the keypoint pixel at the time of the observation, millimeters.
    pub depth_mm: u16,
}

/// Store of remembered fixed camera features.
///
/// Implementations are shared between estimators, so every method takes `&self`.
pub trait FeatureMemory: Send + Sync {
    /// Snapshot of the stored features, oldest first.
    fn features(&self) -> Vec<StoredFeature>;

    /// Stores a feature.
    fn save_feature(&self, feature: StoredFeature);

    /// Drops features whose pixel is now covered by something closer than what was seen.
    fn remove_non_background_features(&self, depth: &DepthMap);

    /// Number of stored features.
    fn len(&self) -> usize {
        self.features().len()
    }

    /// Returns true if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded in-process [`FeatureMemory`].
///
/// Saving a feature replaces the stored ones within `dedup_radius_px` of its keypoint, and the
/// oldest entries are evicted beyond `capacity`.
#[derive(Debug, Default)]
pub struct InMemoryFeatureMemory {
    config: FeatureMemoryConfig,
    entries: RwLock<VecDeque<StoredFeature>>,
}

impl InMemoryFeatureMemory {
    /// Creates an empty store.
    pub fn new(config: FeatureMemoryConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(VecDeque::new()),
        }
    }

    /// Removes every stored feature.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl FeatureMemory for InMemoryFeatureMemory {
    fn features(&self) -> Vec<StoredFeature> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn save_feature(&self, feature: StoredFeature) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let radius = self.config.dedup_radius_px;
        entries.retain(|f| f.keypoint.distance_to(&feature.keypoint) > radius);
        entries.push_back(feature);
        while entries.len() > self.config.capacity {
            entries.pop_front();
        }
    }

    fn remove_non_background_features(&self, depth: &DepthMap) {
        let tolerance = self.config.background_tolerance_mm as u32;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|f| {
            let (x, y) = keypoint_pixel(&f.keypoint, depth);
            if !depth.contains(x, y) {
                return true;
            }
            match depth.get_pixel(x as usize, y as usize) {
                Ok(0) | Err(_) => true,
                Ok(current) => current as u32 + tolerance >= f.depth_mm as u32,
            }
        });
        if entries.len() != before {
            log::debug!(
                "feature memory: culled {} of {} features",
                before - entries.len(),
                before
            );
        }
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
