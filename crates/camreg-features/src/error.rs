use camreg_image::ImageError;

/// Errors raised while extracting, matching or filtering features.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FeatureError {
    /// One of the descriptor sets handed to the matcher is empty.
    #[error("Cannot match {query} query descriptors against {reference} reference descriptors")]
    InsufficientFeatures {
        /// Number of query (mobile) descriptors.
        query: usize,
        /// Number of reference (fixed) descriptors.
        reference: usize,
    },

    /// A match refers to a keypoint that does not exist.
    #[error("Match index {index} is out of range for {side} keypoints of length {len}")]
    InvalidMatchIndex {
        /// Which side of the match is invalid, `"query"` or `"train"`.
        side: &'static str,
        /// The offending index.
        index: usize,
        /// Number of keypoints on that side.
        len: usize,
    },

    /// Keypoints and descriptors are not index aligned.
    #[error("Got {keypoints} keypoints but {descriptors} descriptors")]
    MismatchedLengths {
        /// Number of keypoints.
        keypoints: usize,
        /// Number of descriptors.
        descriptors: usize,
    },

    /// The detector found nothing in the image.
    #[error("No keypoints detected in a {width}x{height} image")]
    NoKeypoints {
        /// Image width.
        width: usize,
        /// Image height.
        height: usize,
    },

    /// A detector parameter is out of range.
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Underlying image error.
    #[error(transparent)]
    Image(#[from] ImageError),
}
