use crate::quality::QualityWeights;
use serde::{Deserialize, Serialize};
use std::path::Path;
use troupe_core::{TroupeError, TroupeResult};

/// Configuration for [`crate::MemoryContextBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of memory items in one context block.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Items scoring below this are left out of context (never deleted).
    #[serde(default)]
    pub min_quality: f32,
    /// How many recent short-term items are considered.
    #[serde(default = "default_short_term_limit")]
    pub short_term_limit: usize,
    /// Upper bound on the rendered block, in characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Token Jaccard similarity at or above which two texts are duplicates.
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,
    #[serde(default)]
    pub weights: QualityWeights,
}

fn default_max_items() -> usize {
    8
}

fn default_short_term_limit() -> usize {
    4
}

fn default_max_chars() -> usize {
    4000
}

fn default_dedup_threshold() -> f32 {
    0.9
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            min_quality: 0.0,
            short_term_limit: default_short_term_limit(),
            max_chars: default_max_chars(),
            dedup_threshold: default_dedup_threshold(),
            weights: QualityWeights::default(),
        }
    }
}

impl MemoryConfig {
    /// Check ranges and the weight vector.
    pub fn validate(&self) -> TroupeResult<()> {
        if !(0.0..=1.0).contains(&self.min_quality) {
            return Err(TroupeError::Config(format!(
                "min_quality must be within [0, 1], got {}",
                self.min_quality
            )));
        }
        if !(self.dedup_threshold > 0.0 && self.dedup_threshold <= 1.0) {
            return Err(TroupeError::Config(format!(
                "dedup_threshold must be within (0, 1], got {}",
                self.dedup_threshold
            )));
        }
        if self.max_chars == 0 {
            return Err(TroupeError::Config("max_chars must be > 0".to_string()));
        }
        self.weights.validate()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> TroupeResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| TroupeError::Config(format!("invalid memory config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> TroupeResult<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read_to_string(path).await.map_err(|e| {
            TroupeError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&data)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = MemoryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_items, 8);
        assert_eq!(config.min_quality, 0.0);
    }

    #[test]
    fn test_from_toml_with_partial_fields() {
        let config = MemoryConfig::from_toml_str(
            r#"
            min_quality = 0.6
            max_items = 3

            [weights]
            completeness = 0.4
            relevance = 0.4
            clarity = 0.1
            accuracy = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(config.max_items, 3);
        assert_eq!(config.short_term_limit, 4);
        assert!((config.weights.completeness - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(MemoryConfig::from_toml_str("min_quality = 1.5").is_err());
        assert!(MemoryConfig::from_toml_str("dedup_threshold = 0.0").is_err());
        assert!(MemoryConfig::from_toml_str("max_chars = 0").is_err());
        let bad_weights = r#"
            [weights]
            completeness = 0.5
            relevance = 0.5
            clarity = 0.5
            accuracy = 0.5
        "#;
        assert!(matches!(
            MemoryConfig::from_toml_str(bad_weights),
            Err(TroupeError::Config(_))
        ));
    }
}
