//! Database schema definitions

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Raw OHLC candle stream, append-only
CREATE TABLE IF NOT EXISTS candles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Prediction ledger. Rows start PENDING (validated = 0), transition to
-- validated exactly once, and validated rows feed retraining.
CREATE TABLE IF NOT EXISTS predictions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    prediction TEXT NOT NULL,
    confidence REAL NOT NULL,
    features TEXT NOT NULL,
    patterns TEXT,
    method TEXT DEFAULT 'ensemble',
    advisory TEXT,
    manipulation_warning INTEGER DEFAULT 0,
    validated INTEGER DEFAULT 0,
    was_correct INTEGER,
    actual_outcome TEXT,
    validation_timestamp INTEGER,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_candles_timestamp ON candles(timestamp);
CREATE INDEX IF NOT EXISTS idx_predictions_timestamp ON predictions(timestamp);
CREATE INDEX IF NOT EXISTS idx_predictions_validated ON predictions(validated)
"#;
