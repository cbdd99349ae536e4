//! IR evaluation harness for search strategies.
//!
//! Runs labeled cases through a strategy and reports the standard ranking
//! metrics, so strategy changes can be compared on real data instead of
//! vibes.

use std::collections::HashSet;

use anyhow::Result;
use uuid::Uuid;

use crate::service::SearchService;
use crate::strategies::SearchStrategy;

/// One labeled case: a query and the message ids that count as relevant.
#[derive(Debug, Clone)]
pub struct EvalCase {
    pub query: String,
    pub relevant: HashSet<Uuid>,
}

impl EvalCase {
    pub fn new(query: impl Into<String>, relevant: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            query: query.into(),
            relevant: relevant.into_iter().collect(),
        }
    }
}

/// Averaged metrics for a strategy over a case set.
#[derive(Debug, Clone)]
pub struct EvalReport {
    pub strategy: String,
    pub k: usize,
    pub cases: usize,
    pub mrr: f64,
    pub hit_at_k: f64,
    pub recall_at_k: f64,
    pub precision_at_k: f64,
    pub ndcg_at_k: f64,
}

/// Reciprocal rank of the first relevant result, 0 when none appears.
pub fn reciprocal_rank(ranked: &[Uuid], relevant: &HashSet<Uuid>) -> f64 {
    ranked
        .iter()
        .position(|id| relevant.contains(id))
        .map(|pos| 1.0 / (pos as f64 + 1.0))
        .unwrap_or(0.0)
}

/// 1 when any of the top k is relevant.
pub fn hit_at_k(ranked: &[Uuid], relevant: &HashSet<Uuid>, k: usize) -> f64 {
    if ranked.iter().take(k).any(|id| relevant.contains(id)) {
        1.0
    } else {
        0.0
    }
}

/// Share of relevant items found in the top k.
pub fn recall_at_k(ranked: &[Uuid], relevant: &HashSet<Uuid>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let found = ranked
        .iter()
        .take(k)
        .filter(|id| relevant.contains(id))
        .count();
    found as f64 / relevant.len() as f64
}

/// Share of the top k that is relevant.
pub fn precision_at_k(ranked: &[Uuid], relevant: &HashSet<Uuid>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let considered = ranked.len().min(k);
    if considered == 0 {
        return 0.0;
    }
    let found = ranked
        .iter()
        .take(k)
        .filter(|id| relevant.contains(id))
        .count();
    found as f64 / considered as f64
}

/// Binary-relevance NDCG@k.
pub fn ndcg_at_k(ranked: &[Uuid], relevant: &HashSet<Uuid>, k: usize) -> f64 {
    let dcg: f64 = ranked
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, id)| relevant.contains(*id))
        .map(|(i, _)| 1.0 / ((i as f64 + 2.0).log2()))
        .sum();

    let ideal_hits = relevant.len().min(k);
    let idcg: f64 = (0..ideal_hits).map(|i| 1.0 / ((i as f64 + 2.0).log2())).sum();
    if idcg == 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

/// Run every case through the strategy and average the metrics.
pub async fn evaluate_strategy(
    service: &SearchService,
    strategy: &SearchStrategy,
    cases: &[EvalCase],
    k: usize,
) -> Result<EvalReport> {
    let mut mrr = 0.0;
    let mut hit = 0.0;
    let mut recall = 0.0;
    let mut precision = 0.0;
    let mut ndcg = 0.0;

    for case in cases {
        let results = service
            .run_strategy(strategy, &case.query, Some(k.max(10)), None)
            .await?;
        let ranked: Vec<Uuid> = results.iter().map(|r| r.message_id).collect();

        mrr += reciprocal_rank(&ranked, &case.relevant);
        hit += hit_at_k(&ranked, &case.relevant, k);
        recall += recall_at_k(&ranked, &case.relevant, k);
        precision += precision_at_k(&ranked, &case.relevant, k);
        ndcg += ndcg_at_k(&ranked, &case.relevant, k);
    }

    let n = cases.len().max(1) as f64;
    Ok(EvalReport {
        strategy: strategy.name.to_owned(),
        k,
        cases: cases.len(),
        mrr: mrr / n,
        hit_at_k: hit / n,
        recall_at_k: recall / n,
        precision_at_k: precision / n,
        ndcg_at_k: ndcg / n,
    })
}
