use serde::{Deserialize, Serialize};

/// Number of bytes in a binary descriptor (256 bits).
pub const DESCRIPTOR_BYTES: usize = 32;

/// A detected image feature.
///
/// Coordinates are in pixels of the full resolution image, `angle` is in degrees and
/// `class_id` is `-1` when the keypoint is not attached to a track.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// Column of the keypoint center.
    pub x: f32,
    /// Row of the keypoint center.
    pub y: f32,
    /// Diameter of the meaningful neighbourhood.
    #[serde(default)]
    pub size: f32,
    /// Dominant orientation in degrees, `[0, 360)`.
    #[serde(default)]
    pub angle: f32,
    /// Detector response, higher is stronger.
    #[serde(default)]
    pub response: f32,
    /// Pyramid level the keypoint was detected on.
    #[serde(default)]
    pub octave: i32,
    /// Track identifier, `-1` if none.
    #[serde(default = "no_class")]
    pub class_id: i32,
}

fn no_class() -> i32 {
    -1
}

impl Keypoint {
    /// Create a keypoint at `(x, y)` with default attributes.
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            size: 31.0,
            angle: 0.0,
            response: 0.0,
            octave: 0,
            class_id: -1,
        }
    }

    /// Euclidean pixel distance to another keypoint.
    #[inline]
    pub fn distance_to(&self, other: &Keypoint) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A 256-bit binary descriptor compared with the Hamming distance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor(pub [u8; DESCRIPTOR_BYTES]);

impl Descriptor {
    /// Number of differing bits between two descriptors, in `[0, 256]`.
    #[inline]
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(&a, &b)| (a ^ b).count_ones())
            .sum()
    }

    /// Value of bit `i`, least significant bit of each byte first.
    #[inline]
    pub fn bit(&self, i: usize) -> bool {
        self.0[i / 8] & (1 << (i % 8)) != 0
    }
}

impl Default for Descriptor {
    fn default() -> Self {
        Self([0; DESCRIPTOR_BYTES])
    }
}

impl From<[u8; DESCRIPTOR_BYTES]> for Descriptor {
    fn from(bytes: [u8; DESCRIPTOR_BYTES]) -> Self {
        Self(bytes)
    }
}

/// A descriptor correspondence between the mobile (query) and fixed (train) sets.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Index into the mobile keypoints.
    pub query_idx: usize,
    /// Index into the fixed keypoints.
    pub train_idx: usize,
    /// Descriptor distance.
    pub distance: f32,
}

impl Match {
    /// Create a new match.
    pub fn new(query_idx: usize, train_idx: usize, distance: f32) -> Self {
        Self {
            query_idx,
            train_idx,
            distance,
        }
    }
}
