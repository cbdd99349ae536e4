//! Named search strategies.
//!
//! A strategy is a `SearchConfig` plus a retrieval mode, registered under a
//! stable name so callers (and the evaluation harness) can swap ranking
//! behavior without touching code.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;

use crate::config::SearchConfig;

/// Recency decay functions for score boosting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecencyDecay {
    None,
    /// `exp(-age_days / half_life)`
    Exponential,
    /// `1 / (1 + ln(1 + age_days))`
    Logarithmic,
    /// Tiered: full / 0.75 / 0.5 / 0.25 by age bands.
    LinearWindow,
}

#[derive(Debug, Clone)]
pub struct RecencyConfig {
    pub decay: RecencyDecay,
    pub half_life_days: f64,
    pub full_boost_days: i64,
    pub half_boost_days: i64,
    pub quarter_boost_days: i64,
    /// Share of the final score contributed by recency.
    pub recency_weight: f64,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            decay: RecencyDecay::None,
            half_life_days: 180.0,
            full_boost_days: 30,
            half_boost_days: 90,
            quarter_boost_days: 365,
            recency_weight: 0.2,
        }
    }
}

impl RecencyConfig {
    /// Recency score in [0, 1]; 1 = most recent. Future timestamps clamp to
    /// age zero.
    pub fn recency_score(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        if self.decay == RecencyDecay::None {
            return 1.0;
        }
        let age_days = (now - created_at).num_days().max(0) as f64;
        match self.decay {
            RecencyDecay::None => 1.0,
            RecencyDecay::Exponential => (-age_days / self.half_life_days).exp(),
            RecencyDecay::Logarithmic => 1.0 / (1.0 + (1.0 + age_days).ln()),
            RecencyDecay::LinearWindow => {
                if age_days <= self.full_boost_days as f64 {
                    1.0
                } else if age_days <= self.half_boost_days as f64 {
                    0.75
                } else if age_days <= self.quarter_boost_days as f64 {
                    0.5
                } else {
                    0.25
                }
            }
        }
    }
}

/// Which retrievals a strategy issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Hybrid,
    FtsOnly,
    VectorOnly,
}

#[derive(Debug, Clone)]
pub struct SearchStrategy {
    pub name: &'static str,
    pub description: &'static str,
    pub mode: SearchMode,
    pub config: SearchConfig,
}

static STRATEGIES: Lazy<Vec<SearchStrategy>> = Lazy::new(|| {
    vec![
        SearchStrategy {
            name: "baseline",
            description: "Default hybrid weights (0.6 vector / 0.4 FTS)",
            mode: SearchMode::Hybrid,
            config: SearchConfig::default(),
        },
        SearchStrategy {
            name: "fts_heavy",
            description: "Lexical-leaning hybrid (0.3 vector / 0.7 FTS)",
            mode: SearchMode::Hybrid,
            config: SearchConfig {
                vector_weight: 0.3,
                fts_weight: 0.7,
                ..SearchConfig::default()
            },
        },
        SearchStrategy {
            name: "vector_heavy",
            description: "Semantic-leaning hybrid (0.8 vector / 0.2 FTS)",
            mode: SearchMode::Hybrid,
            config: SearchConfig {
                vector_weight: 0.8,
                fts_weight: 0.2,
                ..SearchConfig::default()
            },
        },
        SearchStrategy {
            name: "high_recall",
            description: "Lowered thresholds and wider candidate pools",
            mode: SearchMode::Hybrid,
            config: SearchConfig {
                vector_similarity_threshold: 0.1,
                fts_rank_threshold: 0.001,
                max_fts_results: 200,
                max_vector_results: 200,
                ..SearchConfig::default()
            },
        },
        SearchStrategy {
            name: "recency_boost",
            description: "Hybrid blended with exponential recency decay",
            mode: SearchMode::Hybrid,
            config: SearchConfig {
                enable_recency_boost: true,
                recency: RecencyConfig {
                    decay: RecencyDecay::Exponential,
                    ..RecencyConfig::default()
                },
                ..SearchConfig::default()
            },
        },
        SearchStrategy {
            name: "recency_exact",
            description: "Recency decay plus exact-substring boost",
            mode: SearchMode::Hybrid,
            config: SearchConfig {
                enable_recency_boost: true,
                enable_exact_substring_boost: true,
                recency: RecencyConfig {
                    decay: RecencyDecay::Exponential,
                    ..RecencyConfig::default()
                },
                ..SearchConfig::default()
            },
        },
        SearchStrategy {
            name: "fts_only",
            description: "Full-text search alone",
            mode: SearchMode::FtsOnly,
            config: SearchConfig {
                vector_weight: 0.0,
                fts_weight: 1.0,
                ..SearchConfig::default()
            },
        },
        SearchStrategy {
            name: "vector_only",
            description: "Vector similarity alone",
            mode: SearchMode::VectorOnly,
            config: SearchConfig {
                vector_weight: 1.0,
                fts_weight: 0.0,
                ..SearchConfig::default()
            },
        },
    ]
});

/// Look up a strategy; unknown names are rejected here, before any query
/// runs.
pub fn strategy_by_name(name: &str) -> Result<&'static SearchStrategy> {
    STRATEGIES
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| {
            anyhow!(
                "unknown search strategy '{}'; available: {}",
                name,
                strategy_names().join(", ")
            )
        })
}

pub fn strategy_names() -> Vec<&'static str> {
    STRATEGIES.iter().map(|s| s.name).collect()
}

pub fn all_strategies() -> &'static [SearchStrategy] {
    STRATEGIES.as_slice()
}
