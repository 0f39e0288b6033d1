//! Engine error taxonomy

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Too few candles or training samples. Recoverable: callers retry
    /// once more data has accumulated.
    #[error("insufficient data: need {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Classifier used before any state was loaded or initialized
    #[error("classifier not initialized")]
    NotInitialized,

    /// Advisory response could not be parsed. Swallowed at the engine
    /// boundary and treated as "no advisory".
    #[error("unparseable advisory response: {0}")]
    Parse(String),

    /// No matching candle found for a pending prediction. The record
    /// stays PENDING and is retried on the next learning cycle.
    #[error("validation gap for prediction {prediction_id}: {reason}")]
    ValidationGap { prediction_id: i64, reason: String },

    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Db(#[from] persistence::DbError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
