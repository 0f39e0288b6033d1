//! CandleCast Engine — continuous-learning ensemble prediction
//!
//! Turns a rolling candle window into a directional signal and keeps
//! improving itself. Provides:
//! - Feature extraction and candlestick pattern detection
//! - A trainable softmax classifier with checkpointing
//! - Historical-similarity voting and fixed-weight ensemble blending
//! - An optional external advisory adjustment
//! - The validate-and-retrain learning cycle

pub mod advisory;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod historical;
pub mod learning;
pub mod patterns;
pub mod types;

// Re-exports for convenience
pub use advisory::{AdvisoryAnalysis, AdvisoryRequest, AdvisoryService, HttpAdvisoryClient, RiskLevel};
pub use classifier::{Classifier, Inference, SoftmaxClassifier, TrainSettings, TrainingStats};
pub use config::EngineConfig;
pub use engine::{EngineStats, PredictionEngine, PredictionResult};
pub use ensemble::CombinedPrediction;
pub use error::{EngineError, EngineResult};
pub use features::{FeatureVector, CANDLE_HISTORY_LENGTH, FEATURE_LEN};
pub use historical::{HistoricalMatcher, HistoricalVote};
pub use learning::{run_learning_loop, LearningEvent, LearningStats, LearningSystem};
pub use patterns::{detect, Pattern};
pub use types::{Candle, Direction};
