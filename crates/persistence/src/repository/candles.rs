//! Candle stream repository

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A stored OHLC candle
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandleRow {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Repository for the raw candle stream
pub struct CandleRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CandleRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a batch of candles
    pub async fn store_batch(&self, candles: &[CandleRow]) -> DbResult<()> {
        for candle in candles {
            sqlx::query(
                r#"
                INSERT INTO candles (timestamp, open, high, low, close)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(candle.timestamp)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .execute(self.pool)
            .await?;
        }
        Ok(())
    }

    /// Most recent `count` candles, ordered oldest to newest
    pub async fn recent(&self, count: i64) -> DbResult<Vec<CandleRow>> {
        let mut rows = sqlx::query_as::<_, CandleRow>(
            r#"
            SELECT timestamp, open, high, low, close
            FROM candles
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(count)
        .fetch_all(self.pool)
        .await?;

        rows.reverse();
        Ok(rows)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM candles")
            .fetch_one(self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn candle(ts: i64, close: f64) -> CandleRow {
        CandleRow {
            timestamp: ts,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
        }
    }

    #[tokio::test]
    async fn test_store_and_recent_order() {
        let db = Database::in_memory().await.unwrap();
        let repo = CandleRepository::new(db.pool());

        let batch: Vec<CandleRow> = (0..5).map(|i| candle(i * 60_000, 100.0 + i as f64)).collect();
        repo.store_batch(&batch).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 5);

        let recent = repo.recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        // oldest first within the window
        assert_eq!(recent[0].timestamp, 120_000);
        assert_eq!(recent[2].timestamp, 240_000);
        assert!(recent[0].timestamp < recent[1].timestamp);
    }

    #[tokio::test]
    async fn test_recent_on_empty_table() {
        let db = Database::in_memory().await.unwrap();
        let repo = CandleRepository::new(db.pool());
        assert!(repo.recent(20).await.unwrap().is_empty());
    }
}
