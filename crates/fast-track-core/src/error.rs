use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{field} must be between 1 and 10 (got {value})")]
    RatingOutOfRange { field: &'static str, value: u8 },
    #[error("body metric needs a weight or a body fat percentage")]
    EmptyBodyMetric,
    #[error("invalid body metric: {0}")]
    InvalidBodyMetric(&'static str),
    #[error("target duration must be between 0 and 8760 hours (got {0})")]
    InvalidTargetDuration(f64),
    #[error("invalid session data format")]
    InvalidSessionData,
    #[error("failed to parse import file: {0}")]
    Import(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
