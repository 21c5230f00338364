use camreg_3d::DepthError;
use camreg_features::FeatureError;
use camreg_pnp::PnPError;

use crate::config::ConfigError;

/// Errors of the estimator, as opposed to rejected frames.
///
/// Each variant maps to a negative status code with [`EstimatorError::code`].
#[derive(thiserror::Error, Debug)]
pub enum EstimatorError {
    /// The frame or the estimator setup is malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Feature extraction on the fixed image failed.
    #[error("Feature extraction failed: {0}")]
    FeatureExtraction(FeatureError),

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

    /// The pose solver refused its input.
    #[error("Pose solver input error: {0}")]
    Solver(PnPError),
}

impl EstimatorError {
    /// Negative status code of the error.
    pub fn code(&self) -> i32 {
        match self {
            EstimatorError::InvalidInput(_) | EstimatorError::Config(_) => -1,
            EstimatorError::FeatureExtraction(_) => -2,
            EstimatorError::InvalidMatchIndex { .. } => -3,
            EstimatorError::Solver(_) => -4,
        }
    }
}

impl From<FeatureError> for EstimatorError {
    fn from(err: FeatureError) -> Self {
        match err {
            FeatureError::InvalidMatchIndex { side, index, len } => {
                EstimatorError::InvalidMatchIndex { side, index, len }
            }
            FeatureError::MismatchedLengths { .. } => EstimatorError::InvalidInput(err.to_string()),
            other => EstimatorError::FeatureExtraction(other),
        }
    }
}

impl From<DepthError> for EstimatorError {
    fn from(err: DepthError) -> Self {
        match err {
            DepthError::InvalidMatchIndex { side, index, len } => {
                EstimatorError::InvalidMatchIndex { side, index, len }
            }
            other => EstimatorError::InvalidInput(other.to_string()),
        }
    }
}

impl From<PnPError> for EstimatorError {
    fn from(err: PnPError) -> Self {
        EstimatorError::Solver(err)
    }
}
