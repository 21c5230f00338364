use camreg_image::ImageError;

/// Errors raised while resolving depth or reconstructing 3D points.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DepthError {
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

    /// Intrinsics with a non positive or non finite focal length.
    #[error("Invalid intrinsics: fx={fx}, fy={fy}")]
    InvalidIntrinsics {
        /// Horizontal focal length.
        fx: f64,
        /// Vertical focal length.
        fy: f64,
    },

    /// Underlying image error.
    #[error(transparent)]
    Image(#[from] ImageError),
}
