//! Core types shared across the prediction engine

use serde::{Deserialize, Serialize};

/// A single OHLC price candle. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// Absolute body size |close - open|
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Full high-low range
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Upper shadow: distance from the body top to the high
    pub fn upper_shadow(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    /// Lower shadow: distance from the low to the body bottom
    pub fn lower_shadow(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Directional class of a prediction or realized outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

impl Direction {
    /// Class index used by the classifier (UP=0, DOWN=1, NEUTRAL=2)
    pub fn class_index(self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Neutral => 2,
        }
    }

    pub fn from_class_index(idx: usize) -> Self {
        match idx {
            0 => Direction::Up,
            1 => Direction::Down,
            _ => Direction::Neutral,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Neutral => "NEUTRAL",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(Direction::Up),
            "DOWN" => Ok(Direction::Down),
            "NEUTRAL" => Ok(Direction::Neutral),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_anatomy() {
        let c = Candle {
            timestamp: 0,
            open: 1.0,
            high: 1.5,
            low: 0.8,
            close: 1.2,
        };
        assert!((c.body() - 0.2).abs() < 1e-12);
        assert!((c.range() - 0.7).abs() < 1e-12);
        assert!((c.upper_shadow() - 0.3).abs() < 1e-12);
        assert!((c.lower_shadow() - 0.2).abs() < 1e-12);
        assert!(c.is_bullish());
        assert!(!c.is_bearish());
    }

    #[test]
    fn test_direction_roundtrip() {
        for d in [Direction::Up, Direction::Down, Direction::Neutral] {
            assert_eq!(Direction::from_class_index(d.class_index()), d);
            assert_eq!(d.as_str().parse::<Direction>().unwrap(), d);
        }
    }
}
