//! Prediction ledger repository
//!
//! Stores every emitted prediction with its flattened feature array so the
//! learning system can validate outcomes later and rebuild training matrices
//! without re-extracting features.

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A prediction to be stored (PENDING until validated)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrediction {
    pub timestamp: i64,
    pub prediction: String,
    pub confidence: f64,
    /// Flattened feature array as JSON
    pub features: String,
    /// Detected pattern tags as JSON
    pub patterns: String,
    pub method: String,
    pub advisory: Option<String>,
    pub manipulation_warning: bool,
}

/// A PENDING prediction awaiting validation
#[derive(Debug, Clone, FromRow)]
pub struct PendingPrediction {
    pub id: i64,
    pub timestamp: i64,
    pub prediction: String,
    pub confidence: f64,
}

/// Validated outcome of a past prediction with a matching pattern tag
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SimilarOutcome {
    pub prediction: String,
    pub confidence: f64,
    pub actual_outcome: String,
}

/// Recent win/loss summary
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub total: i64,
    pub correct: i64,
    pub win_rate: f64,
    /// Last 10 results, newest first, as a W/L string
    pub last_10: String,
}

/// Overall storage counters
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub total_candles: i64,
    pub total_predictions: i64,
    pub validated_predictions: i64,
    pub win_rate: f64,
}

/// Repository for the prediction ledger
pub struct PredictionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PredictionRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a new prediction, returning its row id
    pub async fn store(&self, record: &NewPrediction) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO predictions (
                timestamp, prediction, confidence, features, patterns,
                method, advisory, manipulation_warning
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.timestamp)
        .bind(&record.prediction)
        .bind(record.confidence)
        .bind(&record.features)
        .bind(&record.patterns)
        .bind(&record.method)
        .bind(&record.advisory)
        .bind(record.manipulation_warning)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// PENDING predictions older than the cutoff timestamp, oldest first
    pub async fn unvalidated_older_than(&self, cutoff: i64) -> DbResult<Vec<PendingPrediction>> {
        let rows = sqlx::query_as::<_, PendingPrediction>(
            r#"
            SELECT id, timestamp, prediction, confidence
            FROM predictions
            WHERE validated = 0 AND timestamp < ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Transition a prediction to validated. The `validated = 0` guard makes
    /// the transition idempotent; a second call is a no-op.
    pub async fn mark_validated(
        &self,
        id: i64,
        was_correct: bool,
        outcome: &str,
        validation_timestamp: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE predictions
            SET validated = 1, was_correct = ?, actual_outcome = ?,
                validation_timestamp = ?
            WHERE id = ? AND validated = 0
            "#,
        )
        .bind(was_correct)
        .bind(outcome)
        .bind(validation_timestamp)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Validated predictions whose pattern list contains the given tag,
    /// newest first
    pub async fn similar_patterns(&self, tag: &str, limit: i64) -> DbResult<Vec<SimilarOutcome>> {
        let rows = sqlx::query_as::<_, SimilarOutcome>(
            r#"
            SELECT prediction, confidence, actual_outcome
            FROM predictions
            WHERE validated = 1 AND actual_outcome IS NOT NULL AND patterns LIKE ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(format!("%{tag}%"))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Win/loss summary over the trailing window
    pub async fn recent_performance(&self, since: i64) -> DbResult<PerformanceSummary> {
        let row: (i64, Option<i64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   SUM(CASE WHEN was_correct = 1 THEN 1 ELSE 0 END)
            FROM predictions
            WHERE validated = 1 AND timestamp > ?
            "#,
        )
        .bind(since)
        .fetch_one(self.pool)
        .await?;

        let total = row.0;
        let correct = row.1.unwrap_or(0);
        let win_rate = if total > 0 {
            correct as f64 / total as f64
        } else {
            0.0
        };

        let last: Vec<(bool,)> = sqlx::query_as(
            r#"
            SELECT was_correct
            FROM predictions
            WHERE validated = 1
            ORDER BY timestamp DESC
            LIMIT 10
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        let last_10: String = last
            .iter()
            .map(|(correct,)| if *correct { 'W' } else { 'L' })
            .collect();

        Ok(PerformanceSummary {
            total,
            correct,
            win_rate,
            last_10,
        })
    }

    /// Most-recent validated rows as a training matrix. Labels map
    /// UP -> 0, DOWN -> 1, anything else -> 2.
    pub async fn training_data(&self, limit: i64) -> DbResult<(Vec<Vec<f64>>, Vec<usize>)> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT features, actual_outcome
            FROM predictions
            WHERE validated = 1 AND actual_outcome IS NOT NULL
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        let mut x = Vec::with_capacity(rows.len());
        let mut y = Vec::with_capacity(rows.len());

        for (features, outcome) in rows {
            let array: Vec<f64> = serde_json::from_str(&features)
                .map_err(|e| DbError::Query(format!("corrupt feature array: {e}")))?;
            x.push(array);
            y.push(match outcome.as_str() {
                "UP" => 0,
                "DOWN" => 1,
                _ => 2,
            });
        }

        Ok((x, y))
    }

    pub async fn stats(&self) -> DbResult<StorageStats> {
        let candles: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM candles")
            .fetch_one(self.pool)
            .await?;
        let predictions: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM predictions")
            .fetch_one(self.pool)
            .await?;
        let validated: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM predictions WHERE validated = 1")
                .fetch_one(self.pool)
                .await?;
        let win_rate: (Option<f64>,) = sqlx::query_as(
            r#"
            SELECT AVG(CASE WHEN was_correct = 1 THEN 1.0 ELSE 0.0 END)
            FROM predictions WHERE validated = 1
            "#,
        )
        .fetch_one(self.pool)
        .await?;

        Ok(StorageStats {
            total_candles: candles.0,
            total_predictions: predictions.0,
            validated_predictions: validated.0,
            win_rate: win_rate.0.unwrap_or(0.0),
        })
    }
}
