use anyhow::{ensure, Result};

use crate::strategies::RecencyConfig;

/// Configuration for hybrid search behavior and ranking weights.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Weight of the vector similarity score; pairs with `fts_weight`.
    pub vector_weight: f64,
    /// Weight of the full-text rank score.
    pub fts_weight: f64,

    /// Minimum cosine similarity for a vector hit to count.
    pub vector_similarity_threshold: f64,
    /// Minimum ts_rank for an FTS hit to count.
    pub fts_rank_threshold: f64,

    pub max_results: usize,
    pub max_fts_results: i64,
    pub max_vector_results: i64,

    pub enable_query_expansion: bool,
    pub enable_phrase_matching: bool,
    pub enable_exact_substring_boost: bool,
    pub enable_recency_boost: bool,
    pub enable_quality_cutoff: bool,

    /// Multiplier applied when all query terms appear contiguously.
    pub phrase_boost: f64,
    /// Multiplier applied when the raw query is a substring of the content.
    pub exact_substring_boost: f64,
    /// Score drop relative to the top score that truncates the tail.
    pub quality_cutoff_ratio: f64,

    pub recency: RecencyConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            fts_weight: 0.4,
            vector_similarity_threshold: 0.2,
            fts_rank_threshold: 0.01,
            max_results: 50,
            max_fts_results: 100,
            max_vector_results: 100,
            enable_query_expansion: true,
            enable_phrase_matching: false,
            enable_exact_substring_boost: false,
            enable_recency_boost: false,
            enable_quality_cutoff: false,
            phrase_boost: 1.5,
            exact_substring_boost: 1.5,
            quality_cutoff_ratio: 0.5,
            recency: RecencyConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Weights must describe a convex combination.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (self.vector_weight + self.fts_weight - 1.0).abs() <= 0.01,
            "vector_weight + fts_weight must equal 1.0 (got {} + {})",
            self.vector_weight,
            self.fts_weight
        );
        ensure!(
            (0.0..=1.0).contains(&self.vector_similarity_threshold),
            "vector_similarity_threshold must be within [0, 1]"
        );
        ensure!(
            self.fts_rank_threshold >= 0.0,
            "fts_rank_threshold must be non-negative"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SearchConfig::default().validate().unwrap();
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let config = SearchConfig {
            vector_weight: 0.8,
            fts_weight: 0.4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let config = SearchConfig {
            vector_similarity_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
