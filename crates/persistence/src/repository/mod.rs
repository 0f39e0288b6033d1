//! Repository implementations for database operations

pub mod candles;
pub mod predictions;

pub use candles::{CandleRepository, CandleRow};
pub use predictions::{
    NewPrediction, PendingPrediction, PerformanceSummary, PredictionRepository, SimilarOutcome,
    StorageStats,
};
