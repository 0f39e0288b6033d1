//! Feature extraction from candle windows
//!
//! Turns the trailing 20-candle window into a fixed-schema feature vector
//! the classifier consumes. The numeric layout of `to_array` is part of the
//! model contract: stored prediction rows feed retraining, so the order and
//! length must stay stable across versions.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::Candle;

/// Candles required in the analysis window
pub const CANDLE_HISTORY_LENGTH: usize = 20;

/// Length of the flattened feature array (16 scalars + 4 series tails of 5)
pub const FEATURE_LEN: usize = 36;

// ============================================================================
// Feature Vector
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    // Per-candle series over the full window
    pub body_ratios: Vec<f64>,
    pub body_directions: Vec<f64>,
    pub upper_wick_ratios: Vec<f64>,
    pub lower_wick_ratios: Vec<f64>,

    // Body and wick aggregates
    pub avg_body_ratio: f64,
    pub avg_upper_wick: f64,
    pub avg_lower_wick: f64,

    // Least-squares close slopes over 5, 10 and 20 candles
    pub short_term_slope: f64,
    pub medium_term_slope: f64,
    pub long_term_slope: f64,

    // Volatility
    pub atr: f64,
    pub volatility_ratio: f64,

    // Streaks and swing structure
    pub consecutive_bullish: f64,
    pub consecutive_bearish: f64,
    pub higher_highs: f64,
    pub lower_lows: f64,

    // Support and resistance relative to the last close
    pub near_resistance: f64,
    pub near_support: f64,
    pub dist_to_resistance: f64,
    pub dist_to_support: f64,
}

impl FeatureVector {
    /// Extract features from the trailing window. Requires at least
    /// [`CANDLE_HISTORY_LENGTH`] candles; only the last window is used.
    pub fn extract(candles: &[Candle]) -> EngineResult<Self> {
        if candles.len() < CANDLE_HISTORY_LENGTH {
            return Err(EngineError::InsufficientData {
                needed: CANDLE_HISTORY_LENGTH,
                got: candles.len(),
            });
        }
        let window = &candles[candles.len() - CANDLE_HISTORY_LENGTH..];

        let mut body_ratios = Vec::with_capacity(window.len());
        let mut body_directions = Vec::with_capacity(window.len());
        let mut upper_wick_ratios = Vec::with_capacity(window.len());
        let mut lower_wick_ratios = Vec::with_capacity(window.len());

        for c in window {
            let range = c.range();
            if range > 0.0 {
                body_ratios.push(c.body() / range);
                upper_wick_ratios.push(c.upper_shadow() / range);
                lower_wick_ratios.push(c.lower_shadow() / range);
            } else {
                body_ratios.push(0.0);
                upper_wick_ratios.push(0.0);
                lower_wick_ratios.push(0.0);
            }
            body_directions.push(if c.is_bullish() { 1.0 } else { -1.0 });
        }

        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();

        // True ranges over consecutive pairs
        let mut true_ranges = Vec::with_capacity(window.len() - 1);
        for pair in window.windows(2) {
            let prev_close = pair[0].close;
            let c = &pair[1];
            let tr = (c.high - c.low)
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs());
            true_ranges.push(tr);
        }
        let atr = mean(&true_ranges);
        let volatility_ratio = if true_ranges.len() > 5 {
            let recent = mean(&true_ranges[true_ranges.len() - 5..]);
            if atr > 0.0 {
                recent / atr
            } else {
                1.0
            }
        } else {
            1.0
        };

        // Longest bullish and bearish runs in the window
        let mut consecutive_bullish = 0u32;
        let mut consecutive_bearish = 0u32;
        let mut bull_streak = 0u32;
        let mut bear_streak = 0u32;
        for c in window {
            if c.is_bullish() {
                bull_streak += 1;
                bear_streak = 0;
            } else {
                bear_streak += 1;
                bull_streak = 0;
            }
            consecutive_bullish = consecutive_bullish.max(bull_streak);
            consecutive_bearish = consecutive_bearish.max(bear_streak);
        }

        let higher_highs = window
            .windows(2)
            .filter(|p| p[1].high > p[0].high)
            .count();
        let lower_lows = window.windows(2).filter(|p| p[1].low < p[0].low).count();

        // Support and resistance from the last 10 candles
        let tail = &window[window.len() - 10..];
        let recent_high = tail.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let recent_low = tail.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let current_price = closes[closes.len() - 1];

        let dist_to_resistance = if recent_high > 0.0 {
            (recent_high - current_price) / recent_high
        } else {
            0.0
        };
        let dist_to_support = if recent_low > 0.0 {
            (current_price - recent_low) / recent_low
        } else {
            0.0
        };

        Ok(Self {
            avg_body_ratio: mean(&body_ratios),
            avg_upper_wick: mean(&upper_wick_ratios),
            avg_lower_wick: mean(&lower_wick_ratios),
            short_term_slope: slope(&closes[closes.len() - 5..]),
            medium_term_slope: slope(&closes[closes.len() - 10..]),
            long_term_slope: slope(&closes),
            atr,
            volatility_ratio,
            consecutive_bullish: consecutive_bullish as f64,
            consecutive_bearish: consecutive_bearish as f64,
            higher_highs: higher_highs as f64,
            lower_lows: lower_lows as f64,
            near_resistance: if dist_to_resistance < 0.02 { 1.0 } else { 0.0 },
            near_support: if dist_to_support < 0.02 { 1.0 } else { 0.0 },
            dist_to_resistance,
            dist_to_support,
            body_ratios,
            body_directions,
            upper_wick_ratios,
            lower_wick_ratios,
        })
    }

    /// Flatten into the classifier input layout: 16 scalars followed by the
    /// last 5 entries of each per-candle series.
    pub fn to_array(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(FEATURE_LEN);
        out.extend_from_slice(&[
            self.avg_body_ratio,
            self.avg_upper_wick,
            self.avg_lower_wick,
            self.short_term_slope,
            self.medium_term_slope,
            self.long_term_slope,
            self.atr,
            self.volatility_ratio,
            self.consecutive_bullish,
            self.consecutive_bearish,
            self.higher_highs,
            self.lower_lows,
            self.near_resistance,
            self.near_support,
            self.dist_to_resistance,
            self.dist_to_support,
        ]);
        for series in [
            &self.body_ratios,
            &self.body_directions,
            &self.upper_wick_ratios,
            &self.lower_wick_ratios,
        ] {
            out.extend_from_slice(&series[series.len() - 5..]);
        }
        out
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Least-squares slope of y over x = 0..n
fn slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                timestamp: i as i64 * 60_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
            })
            .collect()
    }

    #[test]
    fn test_rejects_short_window() {
        let err = FeatureVector::extract(&flat_candles(19)).unwrap_err();
        match err {
            EngineError::InsufficientData { needed, got } => {
                assert_eq!(needed, 20);
                assert_eq!(got, 19);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_array_layout_is_stable() {
        let fv = FeatureVector::extract(&flat_candles(25)).unwrap();
        let arr = fv.to_array();
        assert_eq!(arr.len(), FEATURE_LEN);
        assert!((arr[0] - fv.avg_body_ratio).abs() < 1e-12);
        assert!((arr[15] - fv.dist_to_support).abs() < 1e-12);
        // series tails start at index 16
        assert!((arr[16] - fv.body_ratios[15]).abs() < 1e-12);
        assert!((arr[21] - fv.body_directions[15]).abs() < 1e-12);
    }

    #[test]
    fn test_flat_market_features() {
        let fv = FeatureVector::extract(&flat_candles(20)).unwrap();
        // identical candles: zero slopes, constant ATR, max bullish streak
        assert!(fv.short_term_slope.abs() < 1e-9);
        assert!(fv.long_term_slope.abs() < 1e-9);
        assert!((fv.atr - 2.0).abs() < 1e-9);
        assert!((fv.volatility_ratio - 1.0).abs() < 1e-9);
        assert_eq!(fv.consecutive_bullish as u32, 20);
        assert_eq!(fv.consecutive_bearish as u32, 0);
        assert_eq!(fv.higher_highs as u32, 0);
    }

    #[test]
    fn test_trend_slopes() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| Candle {
                timestamp: i as i64 * 60_000,
                open: 100.0 + i as f64,
                high: 101.5 + i as f64,
                low: 99.5 + i as f64,
                close: 101.0 + i as f64,
            })
            .collect();
        let fv = FeatureVector::extract(&candles).unwrap();
        // closes rise by 1.0 per candle
        assert!((fv.short_term_slope - 1.0).abs() < 1e-9);
        assert!((fv.medium_term_slope - 1.0).abs() < 1e-9);
        assert!((fv.long_term_slope - 1.0).abs() < 1e-9);
        assert_eq!(fv.higher_highs as u32, 19);
        assert_eq!(fv.lower_lows as u32, 0);
    }

    #[test]
    fn test_zero_range_candles_do_not_divide_by_zero() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| Candle {
                timestamp: i as i64 * 60_000,
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
            })
            .collect();
        let fv = FeatureVector::extract(&candles).unwrap();
        assert_eq!(fv.avg_body_ratio, 0.0);
        assert_eq!(fv.avg_upper_wick, 0.0);
        assert!((fv.volatility_ratio - 1.0).abs() < 1e-12);
        assert!(fv.to_array().iter().all(|v| v.is_finite()));
    }
}
