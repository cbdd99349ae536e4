//! Hybrid search: full-text and vector retrieval fused into one ranking.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use pgvector::Vector;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use recall_embed::Embedder;
use recall_store::{FtsHit, UnitOfWork, VectorHit};

use crate::config::SearchConfig;
use crate::strategies::{SearchMode, SearchStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSource {
    Hybrid,
    Fts,
    Vector,
    Similar,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub conversation_title: String,

    pub combined_score: f64,
    pub vector_score: Option<f64>,
    pub fts_score: Option<f64>,
    pub similarity: Option<f64>,
    pub fts_rank: Option<f64>,
    pub distance: Option<f64>,
    pub source: SearchSource,
}

/// Diagnostics about one search call.
#[derive(Debug, Clone, Default)]
pub struct SearchMeta {
    pub fts_candidates: usize,
    pub vector_candidates: usize,
    pub fused_candidates: usize,
    pub truncated_by_cutoff: bool,
    pub expanded_query: Option<String>,
}

pub struct SearchService {
    pool: PgPool,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(pool: PgPool, embedder: Arc<dyn Embedder>, config: SearchConfig) -> Self {
        Self {
            pool,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Hybrid search over messages.
    ///
    /// Runs FTS and vector retrieval in one unit of work, fuses scores per
    /// message, applies the configured boosts, and returns at most `limit`
    /// results plus diagnostics. An empty query returns no results.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        conversation_id: Option<Uuid>,
        config_override: Option<&SearchConfig>,
    ) -> Result<(Vec<SearchResult>, SearchMeta)> {
        let config = config_override.unwrap_or(&self.config);
        config.validate()?;
        let limit = limit.unwrap_or(config.max_results);
        let mut meta = SearchMeta::default();

        if query.trim().is_empty() {
            return Ok((Vec::new(), meta));
        }

        let effective_query = if config.enable_query_expansion {
            let expanded = expand_query(query);
            if expanded != query {
                meta.expanded_query = Some(expanded.clone());
            }
            expanded
        } else {
            query.to_owned()
        };

        // Query vector is computed from the raw query; expansion only
        // widens the lexical side.
        let query_vector = match self.embedder.embed(query).await {
            Ok(vector) => Some(Vector::from(vector)),
            Err(err) => {
                warn!(error = %err, "query embedding failed; degrading to FTS only");
                None
            }
        };

        let mut uow = UnitOfWork::begin(&self.pool).await?;

        let fts_hits: Vec<FtsHit> = uow
            .messages()
            .search_full_text(&effective_query, config.max_fts_results, conversation_id)
            .await?
            .into_iter()
            .filter(|hit| hit.rank >= config.fts_rank_threshold)
            .collect();

        let vector_hits: Vec<VectorHit> = match &query_vector {
            Some(vector) => uow
                .embeddings()
                .search_similar(
                    vector,
                    config.max_vector_results,
                    1.0 - config.vector_similarity_threshold,
                    conversation_id,
                )
                .await?
                .into_iter()
                .filter(|hit| hit.similarity >= config.vector_similarity_threshold)
                .collect(),
            None => Vec::new(),
        };

        uow.commit().await?;

        meta.fts_candidates = fts_hits.len();
        meta.vector_candidates = vector_hits.len();

        let mut results = fuse_results(&fts_hits, &vector_hits, config);
        meta.fused_candidates = results.len();

        apply_boosts(&mut results, query, config, Utc::now());
        results.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if config.enable_quality_cutoff {
            let before = results.len();
            let keep = quality_cutoff_len(
                &results.iter().map(|r| r.combined_score).collect::<Vec<_>>(),
                config.quality_cutoff_ratio,
            );
            results.truncate(keep);
            meta.truncated_by_cutoff = results.len() < before;
        }

        results.truncate(limit);
        info!(
            fts = meta.fts_candidates,
            vector = meta.vector_candidates,
            returned = results.len(),
            "hybrid search complete"
        );
        Ok((results, meta))
    }

    pub async fn search_fts_only(
        &self,
        query: &str,
        limit: Option<usize>,
        conversation_id: Option<Uuid>,
    ) -> Result<Vec<SearchResult>> {
        let limit = limit.unwrap_or(self.config.max_results);
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let hits = uow
            .messages()
            .search_full_text(query, limit as i64, conversation_id)
            .await?;
        uow.commit().await?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let score = normalize_fts_rank(hit.rank);
                SearchResult {
                    message_id: hit.message_id,
                    conversation_id: hit.conversation_id,
                    role: hit.role,
                    content: hit.content,
                    created_at: hit.created_at,
                    conversation_title: hit.conversation_title,
                    combined_score: score,
                    vector_score: None,
                    fts_score: Some(score),
                    similarity: None,
                    fts_rank: Some(hit.rank),
                    distance: None,
                    source: SearchSource::Fts,
                }
            })
            .collect())
    }

    pub async fn search_vector_only(
        &self,
        query: &str,
        limit: Option<usize>,
        conversation_id: Option<Uuid>,
    ) -> Result<Vec<SearchResult>> {
        let limit = limit.unwrap_or(self.config.max_results);
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = match self.embedder.embed(query).await {
            Ok(vector) => Vector::from(vector),
            Err(err) => {
                // Degrade rather than fail; lexical search still works.
                warn!(error = %err, "embedding failed; falling back to FTS");
                return self.search_fts_only(query, Some(limit), conversation_id).await;
            }
        };

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let hits = uow
            .embeddings()
            .search_similar(
                &vector,
                limit as i64,
                1.0 - self.config.vector_similarity_threshold,
                conversation_id,
            )
            .await?;
        uow.commit().await?;

        Ok(hits.into_iter().map(vector_hit_to_result).collect())
    }

    /// Find messages similar to an existing message by its stored vector.
    pub async fn search_similar_to_message(
        &self,
        message_id: Uuid,
        limit: Option<usize>,
        conversation_id: Option<Uuid>,
    ) -> Result<Vec<SearchResult>> {
        let limit = limit.unwrap_or(self.config.max_results);

        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let Some(embedding) = uow.embeddings().get_by_message_id(message_id).await? else {
            debug!(%message_id, "no embedding for source message");
            uow.commit().await?;
            return Ok(Vec::new());
        };

        // +1 because the source message matches itself at distance zero.
        let hits = uow
            .embeddings()
            .search_similar(
                &embedding.embedding,
                limit as i64 + 1,
                1.0 - self.config.vector_similarity_threshold,
                conversation_id,
            )
            .await?;
        uow.commit().await?;

        Ok(hits
            .into_iter()
            .filter(|hit| hit.message_id != message_id)
            .take(limit)
            .map(|hit| SearchResult {
                source: SearchSource::Similar,
                ..vector_hit_to_result(hit)
            })
            .collect())
    }

    /// Run a named strategy: its mode picks the retrieval path and its
    /// config drives ranking.
    pub async fn run_strategy(
        &self,
        strategy: &SearchStrategy,
        query: &str,
        limit: Option<usize>,
        conversation_id: Option<Uuid>,
    ) -> Result<Vec<SearchResult>> {
        match strategy.mode {
            SearchMode::Hybrid => {
                let (results, _) = self
                    .search(query, limit, conversation_id, Some(&strategy.config))
                    .await?;
                Ok(results)
            }
            SearchMode::FtsOnly => self.search_fts_only(query, limit, conversation_id).await,
            SearchMode::VectorOnly => self.search_vector_only(query, limit, conversation_id).await,
        }
    }
}

fn vector_hit_to_result(hit: VectorHit) -> SearchResult {
    SearchResult {
        message_id: hit.message_id,
        conversation_id: hit.conversation_id,
        role: hit.role,
        content: hit.content,
        created_at: hit.created_at,
        conversation_title: hit.conversation_title,
        combined_score: hit.similarity.max(0.0),
        vector_score: Some(hit.similarity),
        fts_score: None,
        similarity: Some(hit.similarity),
        fts_rank: None,
        distance: Some(hit.distance),
        source: SearchSource::Vector,
    }
}

/// Normalize a ts_rank to [0, 1]: `min(1, log2(1 + rank))`. ts_rank usually
/// stays below 1 but can exceed it on long documents.
pub fn normalize_fts_rank(rank: f64) -> f64 {
    if rank <= 0.0 {
        return 0.0;
    }
    (1.0 + rank).log2().min(1.0)
}

/// Fuse FTS and vector hits by message id into combined-score results.
pub fn fuse_results(
    fts_hits: &[FtsHit],
    vector_hits: &[VectorHit],
    config: &SearchConfig,
) -> Vec<SearchResult> {
    let fts_by_id: HashMap<Uuid, &FtsHit> = fts_hits.iter().map(|h| (h.message_id, h)).collect();
    let vector_by_id: HashMap<Uuid, &VectorHit> =
        vector_hits.iter().map(|h| (h.message_id, h)).collect();

    let mut ids: Vec<Uuid> = fts_by_id.keys().copied().collect();
    for id in vector_by_id.keys() {
        if !fts_by_id.contains_key(id) {
            ids.push(*id);
        }
    }

    ids.into_iter()
        .map(|id| {
            let fts = fts_by_id.get(&id);
            let vector = vector_by_id.get(&id);

            let fts_norm = fts.map(|h| normalize_fts_rank(h.rank)).unwrap_or(0.0);
            let vec_norm = vector.map(|h| h.similarity.max(0.0)).unwrap_or(0.0);
            let combined = config.fts_weight * fts_norm + config.vector_weight * vec_norm;

            // Prefer the vector row for content fields when both matched;
            // they are identical in practice.
            let (role, content, created_at, conversation_id, title) = match (vector, fts) {
                (Some(v), _) => (
                    v.role.clone(),
                    v.content.clone(),
                    v.created_at,
                    v.conversation_id,
                    v.conversation_title.clone(),
                ),
                (None, Some(f)) => (
                    f.role.clone(),
                    f.content.clone(),
                    f.created_at,
                    f.conversation_id,
                    f.conversation_title.clone(),
                ),
                (None, None) => unreachable!("id came from one of the maps"),
            };

            SearchResult {
                message_id: id,
                conversation_id,
                role,
                content,
                created_at,
                conversation_title: title,
                combined_score: combined,
                vector_score: vector.map(|_| vec_norm),
                fts_score: fts.map(|_| fts_norm),
                similarity: vector.map(|h| h.similarity),
                fts_rank: fts.map(|h| h.rank),
                distance: vector.map(|h| h.distance),
                source: SearchSource::Hybrid,
            }
        })
        .collect()
}

/// Apply the enabled post-fusion boosts in place.
pub fn apply_boosts(
    results: &mut [SearchResult],
    query: &str,
    config: &SearchConfig,
    now: DateTime<Utc>,
) {
    let query_lower = query.to_lowercase();
    let phrase = query_lower.split_whitespace().collect::<Vec<_>>().join(" ");

    for result in results.iter_mut() {
        let content_lower = result.content.to_lowercase();

        if config.enable_phrase_matching && !phrase.is_empty() {
            let content_phrase = content_lower.split_whitespace().collect::<Vec<_>>().join(" ");
            if content_phrase.contains(&phrase) {
                result.combined_score *= config.phrase_boost;
            }
        }

        if config.enable_exact_substring_boost && content_lower.contains(&query_lower) {
            result.combined_score *= config.exact_substring_boost;
        }

        if config.enable_recency_boost {
            let recency = config.recency.recency_score(result.created_at, now);
            let weight = config.recency.recency_weight;
            result.combined_score = (1.0 - weight) * result.combined_score + weight * recency;
        }
    }
}

/// How many results to keep before the score curve falls off a cliff: the
/// first gap larger than `ratio * top_score` truncates the tail.
pub fn quality_cutoff_len(scores: &[f64], ratio: f64) -> usize {
    let Some(&top) = scores.first() else {
        return 0;
    };
    if top <= 0.0 {
        return scores.len();
    }
    for i in 1..scores.len() {
        let drop = (scores[i - 1] - scores[i]) / top;
        if drop > ratio {
            return i;
        }
    }
    scores.len()
}

/// Static synonym map for query expansion; terms are OR-joined so the FTS
/// side matches any variant.
static SYNONYMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("search", "find"),
        ("message", "text"),
        ("conversation", "chat"),
        ("database", "db"),
        ("postgresql", "postgres"),
        ("embedding", "vector"),
    ])
});

/// Expand a query with one synonym per known term, OR-joined in websearch
/// syntax. Queries without known terms pass through unchanged.
pub fn expand_query(query: &str) -> String {
    let mut terms = Vec::new();
    let mut expanded = false;
    for word in query.split_whitespace() {
        terms.push(word.to_owned());
        if let Some(synonym) = SYNONYMS.get(word.to_lowercase().as_str()) {
            terms.push((*synonym).to_owned());
            expanded = true;
        }
    }
    if expanded {
        terms.join(" OR ")
    } else {
        query.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::strategies::{RecencyConfig, RecencyDecay};

    fn fts_hit(id: Uuid, rank: f64, content: &str) -> FtsHit {
        FtsHit {
            message_id: id,
            conversation_id: Uuid::nil(),
            role: "user".into(),
            content: content.into(),
            created_at: Utc::now(),
            conversation_title: "t".into(),
            rank,
        }
    }

    fn vector_hit(id: Uuid, similarity: f64, content: &str) -> VectorHit {
        VectorHit {
            message_id: id,
            conversation_id: Uuid::nil(),
            role: "user".into(),
            content: content.into(),
            created_at: Utc::now(),
            conversation_title: "t".into(),
            distance: 1.0 - similarity,
            similarity,
        }
    }

    #[test]
    fn normalize_fts_rank_bounds() {
        assert_eq!(normalize_fts_rank(0.0), 0.0);
        assert_eq!(normalize_fts_rank(-1.0), 0.0);
        assert!((normalize_fts_rank(1.0) - 1.0).abs() < 1e-12);
        assert_eq!(normalize_fts_rank(10.0), 1.0);
        assert!(normalize_fts_rank(0.1) > 0.0 && normalize_fts_rank(0.1) < 1.0);
    }

    #[test]
    fn fusion_weights_both_sides() {
        let id = Uuid::new_v4();
        let config = SearchConfig::default();
        let results = fuse_results(
            &[fts_hit(id, 1.0, "both")],
            &[vector_hit(id, 0.5, "both")],
            &config,
        );
        assert_eq!(results.len(), 1);
        let expected = 0.4 * 1.0 + 0.6 * 0.5;
        assert!((results[0].combined_score - expected).abs() < 1e-9);
        assert!(results[0].fts_score.is_some());
        assert!(results[0].vector_score.is_some());
    }

    #[test]
    fn fusion_unions_disjoint_hits() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let config = SearchConfig::default();
        let results = fuse_results(
            &[fts_hit(a, 0.5, "only fts")],
            &[vector_hit(b, 0.9, "only vector")],
            &config,
        );
        assert_eq!(results.len(), 2);
        let only_fts = results.iter().find(|r| r.message_id == a).unwrap();
        assert!(only_fts.vector_score.is_none());
        let only_vec = results.iter().find(|r| r.message_id == b).unwrap();
        assert!(only_vec.fts_score.is_none());
        assert!((only_vec.combined_score - 0.6 * 0.9).abs() < 1e-9);
    }

    #[test]
    fn phrase_boost_multiplies_matching_results() {
        let id = Uuid::new_v4();
        let config = SearchConfig {
            enable_phrase_matching: true,
            phrase_boost: 2.0,
            ..Default::default()
        };
        let mut results = fuse_results(
            &[fts_hit(id, 1.0, "PostgreSQL vector search is great")],
            &[],
            &config,
        );
        let before = results[0].combined_score;
        apply_boosts(&mut results, "vector search", &config, Utc::now());
        assert!((results[0].combined_score - before * 2.0).abs() < 1e-9);
    }

    #[test]
    fn phrase_boost_skips_non_contiguous_terms() {
        let id = Uuid::new_v4();
        let config = SearchConfig {
            enable_phrase_matching: true,
            phrase_boost: 2.0,
            ..Default::default()
        };
        let mut results = fuse_results(
            &[fts_hit(id, 1.0, "vector databases make search fast")],
            &[],
            &config,
        );
        let before = results[0].combined_score;
        apply_boosts(&mut results, "vector search", &config, Utc::now());
        assert_eq!(results[0].combined_score, before);
    }

    #[test]
    fn exact_substring_boost_is_case_insensitive() {
        let id = Uuid::new_v4();
        let config = SearchConfig {
            enable_exact_substring_boost: true,
            exact_substring_boost: 1.5,
            ..Default::default()
        };
        let mut results = fuse_results(&[fts_hit(id, 1.0, "Try Vector Search today")], &[], &config);
        let before = results[0].combined_score;
        apply_boosts(&mut results, "vector search", &config, Utc::now());
        assert!((results[0].combined_score - before * 1.5).abs() < 1e-9);
    }

    #[test]
    fn recency_boost_prefers_newer_content() {
        let old_id = Uuid::new_v4();
        let new_id = Uuid::new_v4();
        let now = Utc::now();
        let config = SearchConfig {
            enable_recency_boost: true,
            recency: RecencyConfig {
                decay: RecencyDecay::Exponential,
                half_life_days: 30.0,
                recency_weight: 0.5,
                ..RecencyConfig::default()
            },
            ..Default::default()
        };

        let mut old_hit = fts_hit(old_id, 1.0, "same score");
        old_hit.created_at = now - Duration::days(365);
        let mut new_hit = fts_hit(new_id, 1.0, "same score");
        new_hit.created_at = now;

        let mut results = fuse_results(&[old_hit, new_hit], &[], &config);
        apply_boosts(&mut results, "same score", &config, now);
        let old_score = results.iter().find(|r| r.message_id == old_id).unwrap().combined_score;
        let new_score = results.iter().find(|r| r.message_id == new_id).unwrap().combined_score;
        assert!(new_score > old_score);
    }

    #[test]
    fn quality_cutoff_truncates_at_cliff() {
        let scores = [1.0, 0.95, 0.9, 0.2, 0.15];
        assert_eq!(quality_cutoff_len(&scores, 0.5), 3);
        // Gentle slope keeps everything.
        let gentle = [1.0, 0.9, 0.8, 0.7];
        assert_eq!(quality_cutoff_len(&gentle, 0.5), 4);
        assert_eq!(quality_cutoff_len(&[], 0.5), 0);
    }

    #[test]
    fn expansion_adds_or_terms_only_for_known_words() {
        assert_eq!(expand_query("vector search"), "vector OR search OR find");
        assert_eq!(expand_query("postgresql tips"), "postgresql OR postgres OR tips");
        assert_eq!(expand_query("nothing special"), "nothing special");
    }
}
