use crate::embedding::tokenize;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use troupe_core::{TroupeError, TroupeResult};

/// Tolerance when checking that weights sum to one.
const WEIGHT_SUM_EPSILON: f32 = 1e-6;

/// Sentences longer than this many words start to lose clarity.
const CLEAR_SENTENCE_WORDS: f32 = 30.0;

/// Sub-metrics a quality score is derived from. Each is clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub completeness: f32,
    pub relevance: f32,
    pub clarity: f32,
    pub accuracy: f32,
}

impl QualityMetrics {
    /// Metrics from explicit sub-scores, each clamped to `[0, 1]`.
    pub fn new(completeness: f32, relevance: f32, clarity: f32, accuracy: f32) -> Self {
        Self {
            completeness: clamp_unit(completeness),
            relevance: clamp_unit(relevance),
            clarity: clamp_unit(clarity),
            accuracy: clamp_unit(accuracy),
        }
    }

    /// All four metrics set to `value`.
    pub fn uniform(value: f32) -> Self {
        Self::new(value, value, value, value)
    }

    /// Heuristic assessment of an accepted task output.
    ///
    /// - completeness: output length relative to the expected-output description
    /// - relevance: share of the task description's terms found in the output
    /// - clarity: penalises very long sentences
    /// - accuracy: `1 / attempts`, so outputs accepted on the first try score highest
    pub fn assess(output: &str, description: &str, expected_output: &str, attempts: u32) -> Self {
        let output_words = output.split_whitespace().count() as f32;
        let expected_words = expected_output.split_whitespace().count().max(1) as f32;
        let completeness = (output_words / expected_words).min(1.0);

        let described: HashSet<String> = tokenize(description)
            .into_iter()
            .filter(|t| t.len() > 3)
            .collect();
        let relevance = if described.is_empty() {
            1.0
        } else {
            let present: HashSet<String> = tokenize(output).into_iter().collect();
            described.iter().filter(|t| present.contains(*t)).count() as f32
                / described.len() as f32
        };

        let sentences = output
            .split(['.', '!', '?', '\n'])
            .filter(|s| !s.trim().is_empty())
            .count()
            .max(1) as f32;
        let avg_sentence = output_words / sentences;
        let clarity = if avg_sentence <= CLEAR_SENTENCE_WORDS {
            1.0
        } else {
            CLEAR_SENTENCE_WORDS / avg_sentence
        };

        let accuracy = 1.0 / attempts.max(1) as f32;

        Self::new(completeness, relevance, clarity, accuracy)
    }
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self::uniform(0.0)
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Weight vector combining [`QualityMetrics`] into a single score.
///
/// Weights must be non-negative and sum to 1.0. The default weighs all four
/// metrics equally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub completeness: f32,
    pub relevance: f32,
    pub clarity: f32,
    pub accuracy: f32,
}

impl QualityWeights {
    /// Build a validated weight vector.
    pub fn new(completeness: f32, relevance: f32, clarity: f32, accuracy: f32) -> TroupeResult<Self> {
        let weights = Self {
            completeness,
            relevance,
            clarity,
            accuracy,
        };
        weights.validate()?;
        Ok(weights)
    }

    /// Weights must be non-negative and sum to 1.0.
    pub fn validate(&self) -> TroupeResult<()> {
        let all = [self.completeness, self.relevance, self.clarity, self.accuracy];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(TroupeError::Config(format!(
                "quality weights must be finite and non-negative, got {all:?}"
            )));
        }
        let sum: f32 = all.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(TroupeError::Config(format!(
                "quality weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }

    /// Weighted score of `metrics`, in `[0, 1]`.
    pub fn score(&self, metrics: &QualityMetrics) -> f32 {
        let raw = self.completeness * metrics.completeness
            + self.relevance * metrics.relevance
            + self.clarity * metrics.clarity
            + self.accuracy * metrics.accuracy;
        clamp_unit(raw)
    }
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: 0.25,
            relevance: 0.25,
            clarity: 0.25,
            accuracy: 0.25,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_are_equal() {
        let w = QualityWeights::default();
        assert!(w.validate().is_ok());
        let m = QualityMetrics::new(1.0, 0.0, 1.0, 0.0);
        assert!((w.score(&m) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        assert!(QualityWeights::new(0.4, 0.4, 0.1, 0.1).is_ok());
        assert!(matches!(
            QualityWeights::new(0.5, 0.5, 0.5, 0.0),
            Err(TroupeError::Config(_))
        ));
        assert!(QualityWeights::new(1.2, -0.2, 0.0, 0.0).is_err());
        assert!(QualityWeights::new(f32::NAN, 0.5, 0.5, 0.0).is_err());
    }

    #[test]
    fn test_custom_weights_change_score() {
        let m = QualityMetrics::new(1.0, 0.0, 0.0, 0.0);
        let w = QualityWeights::new(0.7, 0.1, 0.1, 0.1).unwrap();
        assert!((w.score(&m) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_metrics_are_clamped() {
        let m = QualityMetrics::new(2.0, -1.0, f32::NAN, 0.5);
        assert_eq!(m.completeness, 1.0);
        assert_eq!(m.relevance, 0.0);
        assert_eq!(m.clarity, 0.0);
        assert_eq!(m.accuracy, 0.5);
    }

    #[test]
    fn test_assess_first_try_relevant_output() {
        let m = QualityMetrics::assess(
            "Rust ownership prevents data races. Borrowing rules are checked at compile time.",
            "rust ownership and borrowing rules",
            "two sentences",
            1,
        );
        assert_eq!(m.completeness, 1.0);
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.clarity, 1.0);
        assert_eq!(m.relevance, 1.0);
    }

    #[test]
    fn test_assess_penalises_retries_and_irrelevance() {
        let m = QualityMetrics::assess("bananas", "Explain rust ownership", "a long essay of ten words please ok", 4);
        assert!((m.accuracy - 0.25).abs() < 1e-6);
        assert_eq!(m.relevance, 0.0);
        assert!(m.completeness < 0.2);
    }
}
