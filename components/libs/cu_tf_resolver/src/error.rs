use crate::time::RosTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Malformed frame tree: {0}")]
    MalformedTree(String),

    #[error("No path found from frame '{from}' to frame '{to}'")]
    NoPathFound { from: String, to: String },

    #[error("Empty path requested for frame '{0}', identity must be handled by the caller")]
    EmptyPath(String),

    #[error("Edge '{edge}' has no sample at or before {time}")]
    NoSampleAtOrBeforeTime { edge: String, time: RosTime },

    #[error("Transform from frame '{from}' to frame '{to}' not available yet")]
    TransformUnavailable { from: String, to: String },

    #[error("No recorded data for edge '{0}'")]
    EdgeNotRecorded(String),

    #[error("A time aligned lookup needs an explicit time")]
    TimeRequired,

    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransformError {
    /// Per query failures the extraction loops skip instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransformError::NoPathFound { .. }
                | TransformError::TransformUnavailable { .. }
                | TransformError::NoSampleAtOrBeforeTime { .. }
                | TransformError::EdgeNotRecorded(_)
        )
    }
}

pub type TransformResult<T> = Result<T, TransformError>;
