//! Prediction engine orchestrator
//!
//! Sequences the full pipeline per candle batch: features and patterns,
//! classifier inference, historical vote, ensemble blend, optional advisory
//! adjustment, then persists the resulting prediction record. Any internal
//! failure is logged and surfaces as `None`; a failed prediction never takes
//! down the serving loop.

use std::sync::Arc;

use chrono::Utc;
use persistence::repository::{PredictionRepository, StorageStats};
use persistence::SqlitePool;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::advisory::{AdvisoryAnalysis, AdvisoryRequest, AdvisoryService};
use crate::classifier::Classifier;
use crate::config::EngineConfig;
use crate::ensemble;
use crate::error::EngineResult;
use crate::features::FeatureVector;
use crate::historical::HistoricalMatcher;
use crate::patterns;
use crate::types::{Candle, Direction};

/// A fully assembled prediction, as stored and as returned to callers
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    pub id: i64,
    pub timestamp: i64,
    pub predicted: Direction,
    pub confidence: f64,
    pub probabilities: [f64; 3],
    pub ml_predicted: Direction,
    pub ml_confidence: f64,
    pub historical_predicted: Direction,
    pub historical_confidence: f64,
    pub historical_sample_size: usize,
    pub patterns: Vec<String>,
    pub candles_analyzed: usize,
    pub meets_threshold: bool,
    pub manipulation_warning: bool,
    pub advisory: Option<AdvisoryAnalysis>,
}

/// Engine-level counters exposed over the service surface
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub classifier_version: u32,
    pub classifier_accuracy: f64,
    pub storage: StorageStats,
}

pub struct PredictionEngine {
    pool: SqlitePool,
    classifier: Arc<dyn Classifier>,
    matcher: HistoricalMatcher,
    advisory: Option<Arc<dyn AdvisoryService>>,
    config: EngineConfig,
}

impl PredictionEngine {
    pub fn new(
        pool: SqlitePool,
        classifier: Arc<dyn Classifier>,
        advisory: Option<Arc<dyn AdvisoryService>>,
        config: EngineConfig,
    ) -> Self {
        let matcher = HistoricalMatcher::new(pool.clone(), config.top_k_similar_patterns);
        Self {
            pool,
            classifier,
            matcher,
            advisory,
            config,
        }
    }

    /// Run the full pipeline on a candle batch. Returns `None` when there is
    /// not enough data or any stage fails.
    pub async fn predict(&self, candles: &[Candle]) -> Option<PredictionResult> {
        if candles.len() < self.config.candle_history_length {
            warn!(
                got = candles.len(),
                needed = self.config.candle_history_length,
                "not enough candles for a prediction"
            );
            return None;
        }

        match self.predict_inner(candles).await {
            Ok(result) => {
                info!(
                    prediction = %result.predicted,
                    confidence = format!("{:.2}", result.confidence),
                    patterns = ?result.patterns,
                    meets_threshold = result.meets_threshold,
                    "prediction emitted"
                );
                Some(result)
            }
            Err(e) => {
                error!(error = %e, "prediction failed");
                None
            }
        }
    }

    async fn predict_inner(&self, candles: &[Candle]) -> EngineResult<PredictionResult> {
        let features = FeatureVector::extract(candles)?;
        let detected = patterns::detect(candles);

        let feature_array = features.to_array();
        let inference = self.classifier.infer(&feature_array)?;
        let vote = self.matcher.vote(&detected).await?;

        let combined = ensemble::combine(
            &inference,
            &vote,
            self.config.ensemble_ml_weight,
            self.config.ensemble_historical_weight,
        );

        let mut confidence = combined.confidence;
        let mut manipulation_warning = false;
        let mut advisory_analysis = None;

        // Advisory opinion is only worth the call once the ensemble is
        // already confident on its own.
        if confidence >= self.config.min_confidence_threshold {
            if let Some(service) = &self.advisory {
                if service.is_ready() {
                    let performance = self.recent_performance().await.ok();
                    let request =
                        AdvisoryRequest::build(&features, &detected, candles, performance);
                    if let Some(analysis) = service.analyze(&request).await {
                        let (adjusted, warning) = ensemble::apply_advisory(confidence, &analysis);
                        confidence = adjusted;
                        manipulation_warning = warning;
                        advisory_analysis = Some(analysis);
                    }
                }
            }
        }

        let timestamp = Utc::now().timestamp_millis();
        let pattern_names: Vec<String> = detected.iter().map(|p| p.as_str().to_string()).collect();

        let repo = PredictionRepository::new(&self.pool);
        let id = repo
            .store(&persistence::repository::NewPrediction {
                timestamp,
                prediction: combined.predicted.as_str().to_string(),
                confidence,
                features: serde_json::to_string(&feature_array)?,
                patterns: serde_json::to_string(&pattern_names)?,
                method: "ensemble".to_string(),
                advisory: advisory_analysis
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                manipulation_warning,
            })
            .await?;

        Ok(PredictionResult {
            id,
            timestamp,
            predicted: combined.predicted,
            confidence,
            probabilities: combined.probabilities,
            ml_predicted: combined.ml_predicted,
            ml_confidence: combined.ml_confidence,
            historical_predicted: combined.historical_predicted,
            historical_confidence: combined.historical_confidence,
            historical_sample_size: combined.historical_sample_size,
            patterns: pattern_names,
            candles_analyzed: candles.len(),
            meets_threshold: confidence >= self.config.min_confidence_threshold,
            manipulation_warning,
            advisory: advisory_analysis,
        })
    }

    async fn recent_performance(
        &self,
    ) -> EngineResult<persistence::repository::PerformanceSummary> {
        let since = Utc::now().timestamp_millis() - 7 * 24 * 3600 * 1000;
        let repo = PredictionRepository::new(&self.pool);
        Ok(repo.recent_performance(since).await?)
    }

    pub async fn stats(&self) -> EngineResult<EngineStats> {
        let repo = PredictionRepository::new(&self.pool);
        Ok(EngineStats {
            classifier_version: self.classifier.version(),
            classifier_accuracy: self.classifier.accuracy(),
            storage: repo.stats().await?,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::SoftmaxClassifier;
    use crate::features::FEATURE_LEN;
    use async_trait::async_trait;
    use persistence::Database;

    fn rising_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                timestamp: i as i64 * 60_000,
                open: 100.0 + i as f64,
                high: 101.5 + i as f64,
                low: 99.5 + i as f64,
                close: 101.0 + i as f64,
            })
            .collect()
    }

    fn engine_with(
        db: &Database,
        advisory: Option<Arc<dyn AdvisoryService>>,
    ) -> PredictionEngine {
        let classifier = Arc::new(SoftmaxClassifier::new(FEATURE_LEN, "unused.json"));
        PredictionEngine::new(db.pool_clone(), classifier, advisory, EngineConfig::default())
    }

    #[tokio::test]
    async fn test_too_few_candles_is_soft_none() {
        let db = Database::in_memory().await.unwrap();
        let engine = engine_with(&db, None);
        assert!(engine.predict(&rising_candles(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_prediction_is_stored() {
        let db = Database::in_memory().await.unwrap();
        let engine = engine_with(&db, None);

        let result = engine.predict(&rising_candles(20)).await.unwrap();
        assert_eq!(result.candles_analyzed, 20);
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
        assert!(result.patterns.contains(&"three_white_soldiers".to_string()));
        assert!(result.advisory.is_none());

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.storage.total_predictions, 1);
        assert_eq!(stats.classifier_version, 1);
    }

    #[tokio::test]
    async fn test_untrained_ensemble_probabilities_sum_to_one() {
        let db = Database::in_memory().await.unwrap();
        let engine = engine_with(&db, None);
        let result = engine.predict(&rising_candles(25)).await.unwrap();
        let sum: f64 = result.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    struct FixedAdvisory {
        manipulation: bool,
    }

    #[async_trait]
    impl AdvisoryService for FixedAdvisory {
        fn is_ready(&self) -> bool {
            true
        }

        async fn analyze(&self, _request: &AdvisoryRequest) -> Option<AdvisoryAnalysis> {
            Some(AdvisoryAnalysis {
                prediction: Direction::Up,
                confidence: 0.9,
                reasoning: "test".to_string(),
                manipulation_detected: self.manipulation,
                manipulation_reason: None,
                risk_level: crate::advisory::RiskLevel::Low,
            })
        }
    }

    #[tokio::test]
    async fn test_advisory_skipped_below_threshold() {
        let db = Database::in_memory().await.unwrap();
        // untrained classifier plus abstaining history keeps confidence
        // well under the 0.65 threshold, so the advisory is never consulted
        let engine = engine_with(&db, Some(Arc::new(FixedAdvisory { manipulation: false })));
        let result = engine.predict(&rising_candles(20)).await.unwrap();
        assert!(result.confidence < 0.65);
        assert!(result.advisory.is_none());
        assert!(!result.manipulation_warning);
    }

    #[tokio::test]
    async fn test_advisory_adjusts_confident_prediction() {
        let db = Database::in_memory().await.unwrap();
        let mut config = EngineConfig::default();
        config.min_confidence_threshold = 0.3;
        let classifier = Arc::new(SoftmaxClassifier::new(FEATURE_LEN, "unused.json"));
        let engine = PredictionEngine::new(
            db.pool_clone(),
            classifier,
            Some(Arc::new(FixedAdvisory { manipulation: true })),
            config,
        );

        let result = engine.predict(&rising_candles(20)).await.unwrap();
        assert!(result.advisory.is_some());
        assert!(result.manipulation_warning);
        // the class is untouched, only confidence is halved
        assert!(result.confidence < 0.3);
    }
}
