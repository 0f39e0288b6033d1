//! Candlestick pattern detection
//!
//! Classic single, double and triple candle formations detected on the tail
//! of the analysis window. Detected names feed the stored prediction record
//! and the historical similarity lookup.

use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    Hammer,
    InvertedHammer,
    Doji,
    DragonflyDoji,
    GravestoneDoji,
    BullishEngulfing,
    BearishEngulfing,
    BullishHarami,
    BearishHarami,
    MorningStar,
    EveningStar,
    ThreeWhiteSoldiers,
    ThreeBlackCrows,
}

impl Pattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Pattern::Hammer => "hammer",
            Pattern::InvertedHammer => "inverted_hammer",
            Pattern::Doji => "doji",
            Pattern::DragonflyDoji => "dragonfly_doji",
            Pattern::GravestoneDoji => "gravestone_doji",
            Pattern::BullishEngulfing => "bullish_engulfing",
            Pattern::BearishEngulfing => "bearish_engulfing",
            Pattern::BullishHarami => "bullish_harami",
            Pattern::BearishHarami => "bearish_harami",
            Pattern::MorningStar => "morning_star",
            Pattern::EveningStar => "evening_star",
            Pattern::ThreeWhiteSoldiers => "three_white_soldiers",
            Pattern::ThreeBlackCrows => "three_black_crows",
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect all patterns present on the tail of the sequence. Returns the
/// patterns in a fixed order; fewer than 3 candles yields no matches.
pub fn detect(candles: &[Candle]) -> Vec<Pattern> {
    let mut found = Vec::new();
    if candles.len() < 3 {
        return found;
    }

    let last = &candles[candles.len() - 1];
    if is_hammer(last) {
        found.push(Pattern::Hammer);
    }
    if is_inverted_hammer(last) {
        found.push(Pattern::InvertedHammer);
    }
    if is_doji(last) {
        found.push(Pattern::Doji);
    }
    if is_dragonfly_doji(last) {
        found.push(Pattern::DragonflyDoji);
    }
    if is_gravestone_doji(last) {
        found.push(Pattern::GravestoneDoji);
    }

    let pair = &candles[candles.len() - 2..];
    if is_bullish_engulfing(&pair[0], &pair[1]) {
        found.push(Pattern::BullishEngulfing);
    }
    if is_bearish_engulfing(&pair[0], &pair[1]) {
        found.push(Pattern::BearishEngulfing);
    }
    if is_bullish_harami(&pair[0], &pair[1]) {
        found.push(Pattern::BullishHarami);
    }
    if is_bearish_harami(&pair[0], &pair[1]) {
        found.push(Pattern::BearishHarami);
    }

    let triple = &candles[candles.len() - 3..];
    if is_morning_star(&triple[0], &triple[1], &triple[2]) {
        found.push(Pattern::MorningStar);
    }
    if is_evening_star(&triple[0], &triple[1], &triple[2]) {
        found.push(Pattern::EveningStar);
    }
    if is_three_white_soldiers(triple) {
        found.push(Pattern::ThreeWhiteSoldiers);
    }
    if is_three_black_crows(triple) {
        found.push(Pattern::ThreeBlackCrows);
    }

    found
}

// ----------------------------------------------------------------------------
// Single candle patterns
// ----------------------------------------------------------------------------

/// Long lower shadow, small body near the top
pub fn is_hammer(c: &Candle) -> bool {
    let range = c.range();
    if range == 0.0 {
        return false;
    }
    c.lower_shadow() > c.body() * 2.0
        && c.upper_shadow() < c.body() * 0.3
        && c.body() < range * 0.3
}

/// Long upper shadow, small body near the bottom
pub fn is_inverted_hammer(c: &Candle) -> bool {
    let range = c.range();
    if range == 0.0 {
        return false;
    }
    c.upper_shadow() > c.body() * 2.0
        && c.lower_shadow() < c.body() * 0.3
        && c.body() < range * 0.3
}

/// Body under 10% of the range
pub fn is_doji(c: &Candle) -> bool {
    let range = c.range();
    range > 0.0 && c.body() / range < 0.1
}

pub fn is_dragonfly_doji(c: &Candle) -> bool {
    let range = c.range();
    if range == 0.0 {
        return false;
    }
    c.body() / range < 0.1
        && c.lower_shadow() > range * 0.6
        && c.upper_shadow() < range * 0.1
}

pub fn is_gravestone_doji(c: &Candle) -> bool {
    let range = c.range();
    if range == 0.0 {
        return false;
    }
    c.body() / range < 0.1
        && c.upper_shadow() > range * 0.6
        && c.lower_shadow() < range * 0.1
}

// ----------------------------------------------------------------------------
// Two candle patterns
// ----------------------------------------------------------------------------

pub fn is_bullish_engulfing(prev: &Candle, curr: &Candle) -> bool {
    prev.is_bearish() && curr.is_bullish() && curr.open < prev.close && curr.close > prev.open
}

pub fn is_bearish_engulfing(prev: &Candle, curr: &Candle) -> bool {
    prev.is_bullish() && curr.is_bearish() && curr.open > prev.close && curr.close < prev.open
}

/// Small bullish body contained inside the previous bearish body
pub fn is_bullish_harami(prev: &Candle, curr: &Candle) -> bool {
    prev.is_bearish() && curr.is_bullish() && curr.open > prev.close && curr.close < prev.open
}

/// Small bearish body contained inside the previous bullish body
pub fn is_bearish_harami(prev: &Candle, curr: &Candle) -> bool {
    prev.is_bullish() && curr.is_bearish() && curr.open < prev.close && curr.close > prev.open
}

// ----------------------------------------------------------------------------
// Three candle patterns
// ----------------------------------------------------------------------------

/// Bearish, small middle body, bullish
pub fn is_morning_star(first: &Candle, second: &Candle, third: &Candle) -> bool {
    first.is_bearish() && second.body() < first.body() * 0.5 && third.is_bullish()
}

/// Bullish, small middle body, bearish
pub fn is_evening_star(first: &Candle, second: &Candle, third: &Candle) -> bool {
    first.is_bullish() && second.body() < first.body() * 0.5 && third.is_bearish()
}

/// Three bullish candles with strictly rising closes
pub fn is_three_white_soldiers(candles: &[Candle]) -> bool {
    candles.len() >= 3
        && candles.iter().all(|c| c.is_bullish())
        && candles.windows(2).all(|p| p[1].close > p[0].close)
}

/// Three bearish candles with strictly falling closes
pub fn is_three_black_crows(candles: &[Candle]) -> bool {
    candles.len() >= 3
        && candles.iter().all(|c| c.is_bearish())
        && candles.windows(2).all(|p| p[1].close < p[0].close)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: 0,
            open,
            high,
            low,
            close,
        }
    }

    #[test]
    fn test_hammer() {
        // small body at top, long lower shadow
        let c = candle(100.0, 100.35, 96.0, 100.3);
        assert!(is_hammer(&c));
        assert!(!is_inverted_hammer(&c));
    }

    #[test]
    fn test_inverted_hammer() {
        let c = candle(100.0, 104.0, 99.95, 100.3);
        assert!(is_inverted_hammer(&c));
        assert!(!is_hammer(&c));
    }

    #[test]
    fn test_doji_variants() {
        let plain = candle(100.0, 101.0, 99.0, 100.05);
        assert!(is_doji(&plain));
        assert!(!is_dragonfly_doji(&plain));
        assert!(!is_gravestone_doji(&plain));

        // long lower shadow, tiny upper
        let dragonfly = candle(100.0, 100.05, 98.0, 100.01);
        assert!(is_dragonfly_doji(&dragonfly));

        // long upper shadow, tiny lower
        let gravestone = candle(100.0, 102.0, 99.95, 100.01);
        assert!(is_gravestone_doji(&gravestone));
    }

    #[test]
    fn test_zero_range_matches_nothing() {
        let flat = candle(100.0, 100.0, 100.0, 100.0);
        assert!(!is_doji(&flat));
        assert!(!is_hammer(&flat));
        assert!(!is_dragonfly_doji(&flat));
        assert!(!is_gravestone_doji(&flat));
    }

    #[test]
    fn test_engulfing() {
        let prev = candle(101.0, 101.5, 99.5, 100.0);
        let curr = candle(99.8, 102.0, 99.5, 101.5);
        assert!(is_bullish_engulfing(&prev, &curr));
        assert!(!is_bearish_engulfing(&prev, &curr));

        let prev = candle(100.0, 101.5, 99.5, 101.0);
        let curr = candle(101.2, 101.5, 99.0, 99.5);
        assert!(is_bearish_engulfing(&prev, &curr));
    }

    #[test]
    fn test_harami() {
        // big bearish, then small bullish inside its body
        let prev = candle(102.0, 102.5, 98.0, 98.5);
        let curr = candle(99.5, 101.5, 99.0, 101.0);
        assert!(is_bullish_harami(&prev, &curr));

        let prev = candle(98.5, 102.5, 98.0, 102.0);
        let curr = candle(101.0, 101.5, 99.0, 99.5);
        assert!(is_bearish_harami(&prev, &curr));
    }

    #[test]
    fn test_star_patterns() {
        let first = candle(102.0, 102.5, 99.5, 100.0);
        let second = candle(99.8, 100.2, 99.5, 100.0);
        let third = candle(100.2, 102.5, 100.0, 102.0);
        assert!(is_morning_star(&first, &second, &third));

        let first = candle(100.0, 102.5, 99.5, 102.0);
        let second = candle(102.1, 102.5, 101.8, 102.2);
        let third = candle(102.0, 102.2, 99.5, 100.0);
        assert!(is_evening_star(&first, &second, &third));
    }

    #[test]
    fn test_soldiers_and_crows() {
        let up = [
            candle(100.0, 101.5, 99.5, 101.0),
            candle(101.0, 102.5, 100.5, 102.0),
            candle(102.0, 103.5, 101.5, 103.0),
        ];
        assert!(is_three_white_soldiers(&up));
        assert!(!is_three_black_crows(&up));

        let down = [
            candle(103.0, 103.5, 101.5, 102.0),
            candle(102.0, 102.5, 100.5, 101.0),
            candle(101.0, 101.5, 99.5, 100.0),
        ];
        assert!(is_three_black_crows(&down));
    }

    #[test]
    fn test_detect_requires_three_candles() {
        let c = candle(100.0, 101.0, 99.0, 100.05);
        assert!(detect(&[c, c]).is_empty());
    }

    #[test]
    fn test_detect_collects_overlapping_patterns() {
        let first = candle(100.0, 101.5, 99.5, 101.0);
        let second = candle(101.0, 102.5, 100.5, 102.0);
        // last candle is both bullish and the close of a soldiers run
        let third = candle(102.0, 103.5, 101.5, 103.0);
        let found = detect(&[first, second, third]);
        assert!(found.contains(&Pattern::ThreeWhiteSoldiers));
    }
}
