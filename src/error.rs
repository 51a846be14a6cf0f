use thiserror::Error;

/// Failures raised at the scaler boundary.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("feature width mismatch: expected {expected}, got {actual}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("invalid scaler: {0}")]
    InvalidScaler(String),
}

/// Everything that can abort a single ingest or forecast request.
///
/// None of these leave a mark on stored entity history: a failed request can
/// simply be retried once more data has arrived.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("insufficient history: need {required} samples, have {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("model inference failed: {0}")]
    ModelInference(String),

    #[error("invalid timestamp {value:?}: {reason}")]
    TimestampParse { value: String, reason: String },

    #[error("forecast horizon must be at least one step")]
    InvalidHorizon,

    #[error("forecast horizon of {requested} steps exceeds the limit of {max}")]
    HorizonTooLong { requested: usize, max: usize },
}

impl ForecastError {
    pub fn timestamp_parse(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TimestampParse {
            value: value.into(),
            reason: reason.into(),
        }
    }
}
