//! Engine configuration
//!
//! One explicit config object constructed at startup and passed into the
//! engine and learning system. Defaults mirror the tuned production values;
//! individual knobs can be overridden from the environment.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Candles required in the analysis window
    pub candle_history_length: usize,

    // Training
    pub training_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Trailing fraction of the training set held out for validation
    pub validation_split: f64,
    /// New weights are persisted only above this held-out accuracy
    pub model_save_accuracy_bar: f64,
    /// Validated predictions required before a retrain is triggered
    pub retrain_threshold: u32,
    /// Minimum samples a retrain needs to proceed
    pub min_training_samples: usize,
    /// Most-recent validated records pulled per retrain
    pub training_data_limit: i64,

    // Prediction
    pub min_confidence_threshold: f64,
    pub ensemble_ml_weight: f64,
    pub ensemble_historical_weight: f64,
    pub top_k_similar_patterns: i64,

    // Validation
    pub validation_delay: Duration,
    /// Price deltas below this are classified NEUTRAL
    pub outcome_epsilon: f64,

    // Learning cycle
    pub learning_cycle_interval: Duration,
    pub advisory_timeout: Duration,

    /// Classifier checkpoint path
    pub model_path: std::path::PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            candle_history_length: 20,
            training_epochs: 10,
            batch_size: 32,
            learning_rate: 0.05,
            validation_split: 0.2,
            model_save_accuracy_bar: 0.5,
            retrain_threshold: 50,
            min_training_samples: 50,
            training_data_limit: 1000,
            min_confidence_threshold: 0.65,
            ensemble_ml_weight: 0.6,
            ensemble_historical_weight: 0.4,
            top_k_similar_patterns: 10,
            validation_delay: Duration::from_secs(5 * 60),
            outcome_epsilon: 1e-5,
            learning_cycle_interval: Duration::from_secs(60),
            advisory_timeout: Duration::from_secs(10),
            model_path: std::path::PathBuf::from("data/model.json"),
        }
    }
}

impl EngineConfig {
    /// Apply environment overrides (unset or unparseable vars keep defaults)
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(path) = std::env::var_os("CANDLECAST_MODEL_PATH") {
            cfg.model_path = path.into();
        }
        if let Ok(v) = std::env::var("CANDLECAST_RETRAIN_THRESHOLD") {
            if let Ok(n) = v.parse() {
                cfg.retrain_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("CANDLECAST_MIN_CONFIDENCE") {
            if let Ok(t) = v.parse() {
                cfg.min_confidence_threshold = t;
            }
        }
        if let Ok(v) = std::env::var("CANDLECAST_VALIDATION_DELAY_SECS") {
            if let Ok(secs) = v.parse() {
                cfg.validation_delay = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("CANDLECAST_LEARNING_INTERVAL_SECS") {
            if let Ok(secs) = v.parse() {
                cfg.learning_cycle_interval = Duration::from_secs(secs);
            }
        }

        cfg
    }
}
