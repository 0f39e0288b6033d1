//! Fixed-weight ensemble of classifier and historical vote
//!
//! Pure functions, no IO. The classifier distribution and the expanded
//! historical vote are blended per class; the advisory adjustment only ever
//! moves the confidence, never the class.

use serde::Serialize;

use crate::advisory::AdvisoryAnalysis;
use crate::classifier::Inference;
use crate::historical::HistoricalVote;
use crate::types::Direction;

#[derive(Debug, Clone, Serialize)]
pub struct CombinedPrediction {
    pub predicted: Direction,
    pub confidence: f64,
    /// Blended distribution over [UP, DOWN, NEUTRAL]
    pub probabilities: [f64; 3],
    pub ml_predicted: Direction,
    pub ml_confidence: f64,
    pub historical_predicted: Direction,
    pub historical_confidence: f64,
    pub historical_sample_size: usize,
}

/// Expand the coarse vote into a 3-way distribution: the voted class keeps
/// its confidence, the other two split the remainder evenly. A NEUTRAL vote
/// keeps the low-information prior.
fn expand_vote(vote: &HistoricalVote) -> [f64; 3] {
    match vote.predicted {
        Direction::Up => {
            let rest = (1.0 - vote.confidence) / 2.0;
            [vote.confidence, rest, rest]
        }
        Direction::Down => {
            let rest = (1.0 - vote.confidence) / 2.0;
            [rest, vote.confidence, rest]
        }
        Direction::Neutral => [0.33, 0.33, 0.34],
    }
}

/// Blend the two signal sources with fixed weights (must sum to 1)
pub fn combine(
    ml: &Inference,
    vote: &HistoricalVote,
    w_ml: f64,
    w_hist: f64,
) -> CombinedPrediction {
    let hist_probs = expand_vote(vote);

    let mut probabilities = [0.0; 3];
    for c in 0..3 {
        probabilities[c] = ml.probabilities[c] * w_ml + hist_probs[c] * w_hist;
    }

    let mut best = 0;
    for c in 1..3 {
        if probabilities[c] > probabilities[best] {
            best = c;
        }
    }

    CombinedPrediction {
        predicted: Direction::from_class_index(best),
        confidence: probabilities[best],
        probabilities,
        ml_predicted: ml.predicted,
        ml_confidence: ml.confidence,
        historical_predicted: vote.predicted,
        historical_confidence: vote.confidence,
        historical_sample_size: vote.sample_size,
    }
}

/// Apply the advisory confidence adjustment. Returns the adjusted confidence
/// and whether a manipulation warning was raised. The predicted class is
/// never changed.
pub fn apply_advisory(confidence: f64, advisory: &AdvisoryAnalysis) -> (f64, bool) {
    let mut adjusted = confidence * 0.8 + advisory.confidence * 0.2;
    let mut warning = false;
    if advisory.manipulation_detected {
        adjusted *= 0.5;
        warning = true;
    }
    (adjusted, warning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::RiskLevel;

    fn inference(probs: [f64; 3]) -> Inference {
        let mut best = 0;
        for c in 1..3 {
            if probs[c] > probs[best] {
                best = c;
            }
        }
        Inference {
            probabilities: probs,
            predicted: Direction::from_class_index(best),
            confidence: probs[best],
        }
    }

    fn vote(predicted: Direction, confidence: f64, sample_size: usize) -> HistoricalVote {
        HistoricalVote {
            predicted,
            confidence,
            sample_size,
        }
    }

    fn analysis(confidence: f64, manipulation: bool) -> AdvisoryAnalysis {
        AdvisoryAnalysis {
            prediction: Direction::Up,
            confidence,
            reasoning: String::new(),
            manipulation_detected: manipulation,
            manipulation_reason: None,
            risk_level: RiskLevel::Low,
        }
    }

    #[test]
    fn test_combined_distribution_sums_to_one() {
        let ml = inference([0.5, 0.3, 0.2]);
        let cases = [
            vote(Direction::Up, 0.8, 5),
            vote(Direction::Down, 0.6, 4),
            vote(Direction::Neutral, 0.5, 0),
        ];
        for v in cases {
            let combined = combine(&ml, &v, 0.6, 0.4);
            let sum: f64 = combined.probabilities.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6, "sum {sum}");
        }
    }

    #[test]
    fn test_agreeing_sources_reinforce() {
        let ml = inference([0.7, 0.2, 0.1]);
        let combined = combine(&ml, &vote(Direction::Up, 0.8, 10), 0.6, 0.4);
        assert_eq!(combined.predicted, Direction::Up);
        // 0.7 * 0.6 + 0.8 * 0.4
        assert!((combined.confidence - 0.74).abs() < 1e-9);
    }

    #[test]
    fn test_strong_history_can_flip_weak_ml() {
        let ml = inference([0.4, 0.35, 0.25]);
        let combined = combine(&ml, &vote(Direction::Down, 0.9, 10), 0.6, 0.4);
        // UP: 0.4*0.6 + 0.05*0.4 = 0.26; DOWN: 0.35*0.6 + 0.9*0.4 = 0.57
        assert_eq!(combined.predicted, Direction::Down);
        assert!((combined.confidence - 0.57).abs() < 1e-9);
        assert_eq!(combined.ml_predicted, Direction::Up);
    }

    #[test]
    fn test_neutral_vote_keeps_prior() {
        let ml = inference([0.6, 0.25, 0.15]);
        let combined = combine(&ml, &vote(Direction::Neutral, 0.5, 0), 0.6, 0.4);
        // UP: 0.6*0.6 + 0.33*0.4 = 0.492
        assert!((combined.probabilities[0] - 0.492).abs() < 1e-9);
        assert_eq!(combined.predicted, Direction::Up);
    }

    #[test]
    fn test_advisory_blends_confidence() {
        let (adjusted, warning) = apply_advisory(0.7, &analysis(0.9, false));
        assert!((adjusted - (0.7 * 0.8 + 0.9 * 0.2)).abs() < 1e-9);
        assert!(!warning);
    }

    #[test]
    fn test_manipulation_halves_confidence() {
        let (adjusted, warning) = apply_advisory(0.7, &analysis(0.9, true));
        assert!((adjusted - (0.7 * 0.8 + 0.9 * 0.2) * 0.5).abs() < 1e-9);
        assert!(warning);
    }
}
