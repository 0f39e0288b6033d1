//! Continuous learning: validation and retraining
//!
//! A single periodic driver owns the validate-then-retrain sequence; serving
//! never waits on it. Validated outcomes accumulate in a counter and a
//! retrain fires once the threshold is reached, consuming the most recent
//! validated records as the training set.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use persistence::repository::{CandleRepository, PendingPrediction, PredictionRepository};
use persistence::SqlitePool;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::classifier::{Classifier, TrainSettings, TrainingStats};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::Direction;

/// Candles fetched per validation pass to locate outcomes
const VALIDATION_CANDLE_WINDOW: i64 = 50;

/// A reference candle must sit within a minute of the prediction timestamp
const REFERENCE_TOLERANCE_MS: i64 = 60_000;

/// Published to observers when the learning cycle does something noteworthy
#[derive(Debug, Clone, Serialize)]
pub enum LearningEvent {
    RetrainCompleted {
        version: u32,
        accuracy: f64,
        samples: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningStats {
    pub validations_since_retrain: u32,
    pub retrain_threshold: u32,
    pub ready_for_retrain: bool,
}

pub struct LearningSystem {
    pool: SqlitePool,
    classifier: Arc<dyn Classifier>,
    config: EngineConfig,
    validations_since_retrain: AtomicU32,
    events: broadcast::Sender<LearningEvent>,
}

impl LearningSystem {
    pub fn new(pool: SqlitePool, classifier: Arc<dyn Classifier>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            pool,
            classifier,
            config,
            validations_since_retrain: AtomicU32::new(0),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LearningEvent> {
        self.events.subscribe()
    }

    /// Validate all PENDING predictions old enough to have an observable
    /// outcome. Records without a locatable candle pair stay PENDING and are
    /// retried next cycle. Returns the number validated.
    pub async fn validate_pending(&self) -> EngineResult<usize> {
        let now = Utc::now().timestamp_millis();
        let cutoff = now - self.config.validation_delay.as_millis() as i64;

        let predictions = PredictionRepository::new(&self.pool)
            .unvalidated_older_than(cutoff)
            .await?;
        if predictions.is_empty() {
            debug!("no predictions to validate");
            return Ok(0);
        }

        let candles = CandleRepository::new(&self.pool)
            .recent(VALIDATION_CANDLE_WINDOW)
            .await?;

        let mut validated = 0;
        for prediction in &predictions {
            match self.validate_one(prediction, &candles).await {
                Ok(()) => validated += 1,
                Err(EngineError::ValidationGap { prediction_id, reason }) => {
                    debug!(prediction_id, reason, "validation gap, retrying next cycle");
                }
                Err(e) => {
                    error!(prediction_id = prediction.id, error = %e, "validation failed");
                }
            }
        }

        if validated > 0 {
            info!(validated, pending = predictions.len() - validated, "validated predictions");
        }
        Ok(validated)
    }

    async fn validate_one(
        &self,
        prediction: &PendingPrediction,
        candles: &[persistence::repository::CandleRow],
    ) -> EngineResult<()> {
        let target = prediction.timestamp + self.config.validation_delay.as_millis() as i64;

        // Validation candle: whichever is closest to prediction time + delay
        let validation = candles
            .iter()
            .min_by_key(|c| (c.timestamp - target).abs())
            .ok_or_else(|| EngineError::ValidationGap {
                prediction_id: prediction.id,
                reason: "no candles in window".to_string(),
            })?;

        // Reference candle: must sit within a minute of the prediction itself
        let reference = candles
            .iter()
            .find(|c| (c.timestamp - prediction.timestamp).abs() < REFERENCE_TOLERANCE_MS)
            .ok_or_else(|| EngineError::ValidationGap {
                prediction_id: prediction.id,
                reason: "no reference candle near prediction time".to_string(),
            })?;

        let delta = validation.close - reference.close;
        let outcome = if delta.abs() < self.config.outcome_epsilon {
            Direction::Neutral
        } else if delta > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        };

        let predicted = Direction::from_str(&prediction.prediction)
            .map_err(EngineError::Parse)?;
        let was_correct = predicted == outcome;

        let transitioned = PredictionRepository::new(&self.pool)
            .mark_validated(
                prediction.id,
                was_correct,
                outcome.as_str(),
                Utc::now().timestamp_millis(),
            )
            .await?;
        if transitioned {
            self.validations_since_retrain.fetch_add(1, Ordering::SeqCst);
        }

        info!(
            prediction_id = prediction.id,
            predicted = %predicted,
            actual = %outcome,
            correct = was_correct,
            "prediction validated"
        );
        Ok(())
    }

    pub fn should_retrain(&self) -> bool {
        self.validations_since_retrain.load(Ordering::SeqCst) >= self.config.retrain_threshold
    }

    /// Retrain on the most recent validated records. Too few samples is a
    /// recoverable failure that leaves the counter untouched; once training
    /// consumes the data, the counter resets whatever the save outcome.
    pub async fn retrain(&self) -> EngineResult<TrainingStats> {
        info!("starting retrain");

        let (x, y) = PredictionRepository::new(&self.pool)
            .training_data(self.config.training_data_limit)
            .await?;

        if x.len() < self.config.min_training_samples {
            return Err(EngineError::InsufficientData {
                needed: self.config.min_training_samples,
                got: x.len(),
            });
        }

        // The accumulated set is consumed from here on
        self.validations_since_retrain.store(0, Ordering::SeqCst);

        let settings = TrainSettings {
            epochs: self.config.training_epochs,
            batch_size: self.config.batch_size,
            learning_rate: self.config.learning_rate,
            validation_split: self.config.validation_split,
            save_accuracy_bar: self.config.model_save_accuracy_bar,
        };
        let stats = self.classifier.train(&x, &y, &settings)?;

        info!(
            accuracy = format!("{:.4}", stats.final_accuracy),
            samples = stats.samples,
            saved = stats.saved,
            version = self.classifier.version(),
            "retrain finished"
        );

        let _ = self.events.send(LearningEvent::RetrainCompleted {
            version: self.classifier.version(),
            accuracy: stats.final_accuracy,
            samples: stats.samples,
        });

        Ok(stats)
    }

    /// One full learning cycle, as driven by the periodic timer
    pub async fn validate_and_maybe_retrain(&self) {
        if let Err(e) = self.validate_pending().await {
            error!(error = %e, "validation pass failed");
        }

        if self.should_retrain() {
            match self.retrain().await {
                Ok(_) => {}
                Err(EngineError::InsufficientData { needed, got }) => {
                    warn!(needed, got, "retrain skipped, not enough training data");
                }
                Err(e) => error!(error = %e, "retrain failed"),
            }
        }
    }

    pub fn stats(&self) -> LearningStats {
        let count = self.validations_since_retrain.load(Ordering::SeqCst);
        LearningStats {
            validations_since_retrain: count,
            retrain_threshold: self.config.retrain_threshold,
            ready_for_retrain: count >= self.config.retrain_threshold,
        }
    }
}

/// Periodic driver for the learning cycle. Single task, strictly sequential
/// cycles; ticks that fire while a cycle is still running are skipped rather
/// than queued.
pub async fn run_learning_loop(system: Arc<LearningSystem>) {
    let mut interval = tokio::time::interval(system.config.learning_cycle_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(
        interval_secs = system.config.learning_cycle_interval.as_secs(),
        "learning loop started"
    );

    loop {
        interval.tick().await;
        system.validate_and_maybe_retrain().await;
    }
}
