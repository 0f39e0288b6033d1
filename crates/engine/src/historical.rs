//! Historical similarity vote
//!
//! Looks up past validated predictions that carried the same leading pattern
//! tag and turns their realized outcomes into a coarse directional vote.

use persistence::repository::PredictionRepository;
use persistence::SqlitePool;
use serde::Serialize;
use tracing::debug;

use crate::error::EngineResult;
use crate::patterns::Pattern;
use crate::types::Direction;

/// Matches below this count are treated as noise, not a vote
const MIN_SAMPLE_SIZE: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct HistoricalVote {
    pub predicted: Direction,
    pub confidence: f64,
    pub sample_size: usize,
}

impl HistoricalVote {
    /// Low-confidence default when history has nothing to say
    fn abstain() -> Self {
        Self {
            predicted: Direction::Neutral,
            confidence: 0.5,
            sample_size: 0,
        }
    }
}

pub struct HistoricalMatcher {
    pool: SqlitePool,
    top_k: i64,
}

impl HistoricalMatcher {
    pub fn new(pool: SqlitePool, top_k: i64) -> Self {
        Self { pool, top_k }
    }

    /// Vote from the outcomes of similar past patterns. Queries validated
    /// predictions sharing the first detected tag, most recent first.
    pub async fn vote(&self, patterns: &[Pattern]) -> EngineResult<HistoricalVote> {
        let Some(first) = patterns.first() else {
            return Ok(HistoricalVote::abstain());
        };

        let repo = PredictionRepository::new(&self.pool);
        let matches = repo.similar_patterns(first.as_str(), self.top_k).await?;

        if matches.len() < MIN_SAMPLE_SIZE {
            debug!(tag = first.as_str(), matches = matches.len(), "too few historical matches");
            return Ok(HistoricalVote::abstain());
        }

        let total = matches.len();
        let up = matches.iter().filter(|m| m.actual_outcome == "UP").count();
        let down = matches.iter().filter(|m| m.actual_outcome == "DOWN").count();

        let vote = if up > down {
            HistoricalVote {
                predicted: Direction::Up,
                confidence: up as f64 / total as f64,
                sample_size: total,
            }
        } else if down > up {
            HistoricalVote {
                predicted: Direction::Down,
                confidence: down as f64 / total as f64,
                sample_size: total,
            }
        } else {
            HistoricalVote {
                predicted: Direction::Neutral,
                confidence: 0.5,
                sample_size: total,
            }
        };

        debug!(
            tag = first.as_str(),
            vote = %vote.predicted,
            confidence = vote.confidence,
            samples = vote.sample_size,
            "historical vote"
        );

        Ok(vote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::repository::NewPrediction;
    use persistence::Database;

    async fn seed(db: &Database, patterns: &str, outcome: &str, count: usize) {
        let repo = PredictionRepository::new(db.pool());
        for i in 0..count {
            let id = repo
                .store(&NewPrediction {
                    timestamp: i as i64 * 1_000,
                    prediction: "UP".to_string(),
                    confidence: 0.7,
                    features: "[]".to_string(),
                    patterns: patterns.to_string(),
                    method: "ensemble".to_string(),
                    advisory: None,
                    manipulation_warning: false,
                })
                .await
                .unwrap();
            repo.mark_validated(id, outcome == "UP", outcome, 999_000)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_no_patterns_abstains() {
        let db = Database::in_memory().await.unwrap();
        let matcher = HistoricalMatcher::new(db.pool_clone(), 10);
        let vote = matcher.vote(&[]).await.unwrap();
        assert_eq!(vote.predicted, Direction::Neutral);
        assert_eq!(vote.confidence, 0.5);
        assert_eq!(vote.sample_size, 0);
    }

    #[tokio::test]
    async fn test_too_few_matches_abstains() {
        let db = Database::in_memory().await.unwrap();
        seed(&db, "[\"hammer\"]", "UP", 2).await;
        let matcher = HistoricalMatcher::new(db.pool_clone(), 10);
        let vote = matcher.vote(&[Pattern::Hammer]).await.unwrap();
        assert_eq!(vote.predicted, Direction::Neutral);
        assert_eq!(vote.sample_size, 0);
    }

    #[tokio::test]
    async fn test_majority_up_vote() {
        let db = Database::in_memory().await.unwrap();
        seed(&db, "[\"hammer\"]", "UP", 4).await;
        seed(&db, "[\"hammer\"]", "DOWN", 1).await;
        let matcher = HistoricalMatcher::new(db.pool_clone(), 10);
        let vote = matcher.vote(&[Pattern::Hammer]).await.unwrap();
        assert_eq!(vote.predicted, Direction::Up);
        assert!((vote.confidence - 0.8).abs() < 1e-9);
        assert_eq!(vote.sample_size, 5);
    }

    #[tokio::test]
    async fn test_tie_is_neutral() {
        let db = Database::in_memory().await.unwrap();
        seed(&db, "[\"doji\"]", "UP", 2).await;
        seed(&db, "[\"doji\"]", "DOWN", 2).await;
        let matcher = HistoricalMatcher::new(db.pool_clone(), 10);
        let vote = matcher.vote(&[Pattern::Doji]).await.unwrap();
        assert_eq!(vote.predicted, Direction::Neutral);
        assert_eq!(vote.confidence, 0.5);
        assert_eq!(vote.sample_size, 4);
    }

    #[tokio::test]
    async fn test_top_k_bounds_the_query() {
        let db = Database::in_memory().await.unwrap();
        seed(&db, "[\"doji\"]", "UP", 8).await;
        let matcher = HistoricalMatcher::new(db.pool_clone(), 5);
        let vote = matcher.vote(&[Pattern::Doji]).await.unwrap();
        assert_eq!(vote.sample_size, 5);
    }
}
