//! recall-search - hybrid retrieval over the archive
//!
//! Three layers: the hybrid [`SearchService`] (full-text + vector fusion
//! with optional boosts), a registry of named [`SearchStrategy`]s with an IR
//! evaluation harness, and [`ContextualRetrieval`], which expands matched
//! messages into complete conversational windows for RAG consumers.

pub mod config;
pub mod context;
pub mod eval;
pub mod service;
pub mod strategies;

pub use config::SearchConfig;
pub use context::{ContextualRetrieval, FormattedWindow, RetrievalParams, WindowMetadata};
pub use service::{SearchMeta, SearchResult, SearchService, SearchSource};
pub use strategies::{strategy_by_name, strategy_names, RecencyConfig, RecencyDecay, SearchStrategy};
