//! Contextual retrieval: expand search matches into conversational windows.
//!
//! A bare matched message is rarely enough context for RAG. This module
//! loads the surrounding messages, adapts the window so user/assistant
//! turns stay complete, merges overlapping windows, scores them with
//! proximity decay, trims to a token budget without ever dropping the
//! match, and formats the result with optional context markers.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use recall_store::{MessageRow, UnitOfWork};

use crate::service::SearchService;

#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub top_k_windows: usize,
    /// Messages before/after the match, unless overridden asymmetrically.
    pub context_window: usize,
    pub adaptive_context: bool,
    pub asymmetric_before: Option<usize>,
    pub asymmetric_after: Option<usize>,
    pub deduplicate: bool,
    pub max_tokens: Option<usize>,
    pub rerank: bool,
    pub include_markers: bool,
    pub proximity_decay_lambda: f64,
    pub apply_recency_bonus: bool,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k_windows: 8,
            context_window: 3,
            adaptive_context: true,
            asymmetric_before: None,
            asymmetric_after: None,
            deduplicate: true,
            max_tokens: None,
            rerank: true,
            include_markers: true,
            proximity_decay_lambda: 0.3,
            apply_recency_bonus: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WindowMessage {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_primary_match: bool,
    pub distance_from_match: usize,
}

#[derive(Debug, Clone)]
pub struct ContextWindow {
    pub conversation_id: Uuid,
    pub conversation_title: String,
    pub matched_message_id: Uuid,
    pub messages: Vec<WindowMessage>,
    pub match_position: usize,
    pub base_score: f64,
    pub aggregated_score: f64,
    pub window_id: String,
}

#[derive(Debug, Clone)]
pub struct WindowMetadata {
    pub conversation_id: Uuid,
    pub window_id: String,
    pub matched_message_id: Uuid,
    pub conversation_title: String,
    pub window_size: usize,
    pub match_position: usize,
    pub before_count: usize,
    pub after_count: usize,
    pub base_score: f64,
    pub aggregated_score: f64,
    pub roles: Vec<String>,
    pub token_estimate: usize,
    pub retrieval_params: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct FormattedWindow {
    pub content: String,
    pub metadata: WindowMetadata,
}

pub struct ContextualRetrieval {
    pool: PgPool,
    search: Arc<SearchService>,
}

impl ContextualRetrieval {
    pub fn new(pool: PgPool, search: Arc<SearchService>) -> Self {
        Self { pool, search }
    }

    /// Retrieve ranked context windows for a query.
    ///
    /// Per-window failures are logged and dropped; the call only fails when
    /// the underlying search does.
    pub async fn retrieve_with_context(
        &self,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<Vec<FormattedWindow>> {
        // Over-fetch so deduplication still leaves enough windows.
        let (results, _) = self
            .search
            .search(query, Some(params.top_k_windows * 3), None, None)
            .await?;
        if results.is_empty() {
            info!("no search results for contextual retrieval");
            return Ok(Vec::new());
        }
        debug!(matches = results.len(), "expanding context windows");

        let window_before = params.asymmetric_before.unwrap_or(params.context_window);
        let window_after = params.asymmetric_after.unwrap_or(params.context_window);

        // Request-scoped cache: conversation id -> (title, ordered messages).
        let mut cache: HashMap<Uuid, (String, Vec<MessageRow>)> = HashMap::new();
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let mut windows = Vec::new();

        for result in &results {
            if !cache.contains_key(&result.conversation_id) {
                let messages = uow
                    .messages()
                    .get_by_conversation(result.conversation_id)
                    .await?;
                let title = uow
                    .conversations()
                    .get_by_id(result.conversation_id)
                    .await?
                    .map(|c| c.title)
                    .unwrap_or_else(|| "Unknown".to_owned());
                cache.insert(result.conversation_id, (title, messages));
            }
            let (title, messages) = &cache[&result.conversation_id];

            match build_window(
                messages,
                result.message_id,
                window_before,
                window_after,
                params.adaptive_context,
            ) {
                Ok(mut window) => {
                    window.conversation_id = result.conversation_id;
                    window.conversation_title = title.clone();
                    window.base_score = result.combined_score;
                    windows.push(window);
                }
                Err(err) => {
                    warn!(message_id = %result.message_id, error = %err, "failed to build window");
                }
            }
        }
        uow.commit().await?;

        if params.deduplicate {
            windows = merge_windows(windows);
        }

        let now = Utc::now();
        for window in &mut windows {
            score_window(window, params.proximity_decay_lambda, params.apply_recency_bonus, now);
        }

        if params.rerank {
            windows.sort_by(|a, b| {
                b.aggregated_score
                    .partial_cmp(&a.aggregated_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        if let Some(max_tokens) = params.max_tokens {
            for window in &mut windows {
                apply_token_budget(window, max_tokens, true);
            }
        }

        windows.truncate(params.top_k_windows);

        let retrieval_params = json!({
            "query": query,
            "top_k_windows": params.top_k_windows,
            "context_window": params.context_window,
            "adaptive_context": params.adaptive_context,
            "deduplicate": params.deduplicate,
        });
        let formatted: Vec<FormattedWindow> = windows
            .iter()
            .map(|w| format_window(w, params.include_markers, retrieval_params.clone()))
            .collect();

        info!(windows = formatted.len(), "contextual retrieval complete");
        Ok(formatted)
    }
}

/// Rough token estimate: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Expand before/after so a matched user message keeps its assistant reply
/// and a matched assistant message keeps its user prompt.
pub fn adaptive_window_size(
    messages: &[MessageRow],
    match_idx: usize,
    max_before: usize,
    max_after: usize,
) -> (usize, usize) {
    let mut before = max_before;
    let mut after = max_after;

    match messages[match_idx].role.as_str() {
        "user" => {
            if match_idx + 1 < messages.len()
                && messages[match_idx + 1].role == "assistant"
                && after < 1
            {
                after = 1;
            }
        }
        "assistant" => {
            if match_idx > 0 && messages[match_idx - 1].role == "user" && before < 1 {
                before = 1;
            }
        }
        _ => {}
    }

    (before, after)
}

/// Slice a context window out of a conversation, clipped to its bounds.
pub fn build_window(
    messages: &[MessageRow],
    match_message_id: Uuid,
    window_before: usize,
    window_after: usize,
    adaptive: bool,
) -> Result<ContextWindow> {
    if messages.is_empty() {
        return Err(anyhow!("conversation has no messages"));
    }
    let match_idx = messages
        .iter()
        .position(|m| m.id == match_message_id)
        .ok_or_else(|| anyhow!("message {match_message_id} not found in conversation"))?;

    let (before, after) = if adaptive {
        adaptive_window_size(messages, match_idx, window_before, window_after)
    } else {
        (window_before, window_after)
    };

    let start = match_idx.saturating_sub(before);
    let end = (match_idx + after + 1).min(messages.len());

    let window_messages: Vec<WindowMessage> = messages[start..end]
        .iter()
        .enumerate()
        .map(|(offset, m)| {
            let idx = start + offset;
            WindowMessage {
                id: m.id,
                role: m.role.clone(),
                content: m.content.clone(),
                created_at: m.created_at,
                is_primary_match: idx == match_idx,
                distance_from_match: match_idx.abs_diff(idx),
            }
        })
        .collect();

    let conversation_id = messages[match_idx].conversation_id;
    Ok(ContextWindow {
        conversation_id,
        conversation_title: String::new(),
        matched_message_id: match_message_id,
        messages: window_messages,
        match_position: match_idx - start,
        base_score: 0.0,
        aggregated_score: 0.0,
        window_id: format!("{conversation_id}:{match_message_id}"),
    })
}

/// Merge overlapping windows of the same conversation into one window with
/// the union of their messages.
pub fn merge_windows(windows: Vec<ContextWindow>) -> Vec<ContextWindow> {
    let mut by_conversation: HashMap<Uuid, Vec<ContextWindow>> = HashMap::new();
    let mut order: Vec<Uuid> = Vec::new();
    for window in windows {
        if !by_conversation.contains_key(&window.conversation_id) {
            order.push(window.conversation_id);
        }
        by_conversation
            .entry(window.conversation_id)
            .or_default()
            .push(window);
    }

    let mut merged = Vec::new();
    for conv_id in order {
        let mut conv_windows = by_conversation.remove(&conv_id).unwrap_or_default();
        if conv_windows.len() == 1 {
            merged.push(conv_windows.pop().unwrap());
            continue;
        }

        conv_windows.sort_by_key(|w| w.messages.first().map(|m| m.id).unwrap_or(Uuid::nil()));

        let mut iter = conv_windows.into_iter();
        let mut current = iter.next().unwrap();
        for next in iter {
            let current_ids: std::collections::HashSet<Uuid> =
                current.messages.iter().map(|m| m.id).collect();
            let overlaps = next.messages.iter().any(|m| current_ids.contains(&m.id));

            if overlaps {
                let mut union = current.messages.clone();
                union.extend(
                    next.messages
                        .iter()
                        .filter(|m| !current_ids.contains(&m.id))
                        .cloned(),
                );
                union.sort_by_key(|m| (m.created_at, m.id));

                let match_id = current.matched_message_id;
                let match_position = union
                    .iter()
                    .position(|m| m.id == match_id)
                    .unwrap_or(0);
                // Distances and the primary flag are relative to the kept
                // match; recompute them over the union.
                for (idx, message) in union.iter_mut().enumerate() {
                    message.is_primary_match = message.id == match_id;
                    message.distance_from_match = match_position.abs_diff(idx);
                }

                current = ContextWindow {
                    conversation_id: current.conversation_id,
                    conversation_title: current.conversation_title.clone(),
                    matched_message_id: match_id,
                    messages: union,
                    match_position,
                    base_score: current.base_score.max(next.base_score),
                    aggregated_score: 0.0,
                    window_id: format!("{}:merged", current.conversation_id),
                };
            } else {
                merged.push(current);
                current = next;
            }
        }
        merged.push(current);
    }

    merged
}

/// Score a window: proximity-decayed mean of the base score, plus an
/// optional recency bonus decaying over 90 days.
pub fn score_window(
    window: &mut ContextWindow,
    proximity_decay_lambda: f64,
    apply_recency_bonus: bool,
    now: DateTime<Utc>,
) {
    if window.messages.is_empty() {
        window.aggregated_score = window.base_score;
        return;
    }

    let weighted_sum: f64 = window
        .messages
        .iter()
        .map(|m| window.base_score * (-proximity_decay_lambda * m.distance_from_match as f64).exp())
        .sum();
    let mut aggregated = weighted_sum / window.messages.len() as f64;

    if apply_recency_bonus {
        if let Some(matched) = window.messages.iter().find(|m| m.is_primary_match) {
            let age_days = (now - matched.created_at).num_days().max(0) as f64;
            aggregated += 0.05 * (-age_days / 90.0).exp();
        }
    }

    window.aggregated_score = aggregated;
}

/// Trim a window to a token budget, removing from the edge farther from the
/// match. The matched message is never dropped. With `preserve_turns`, a
/// leading assistant or trailing user message left orphaned by trimming is
/// also removed (unless it is the match).
pub fn apply_token_budget(window: &mut ContextWindow, max_tokens: usize, preserve_turns: bool) {
    let mut total: usize = window.messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    if total <= max_tokens {
        return;
    }

    let mut match_idx = window.match_position;
    let messages = &mut window.messages;

    while total > max_tokens && messages.len() > 1 {
        if messages[0].is_primary_match {
            let removed = messages.pop().expect("len > 1");
            total -= estimate_tokens(&removed.content);
        } else if messages.last().map(|m| m.is_primary_match).unwrap_or(false) {
            let removed = messages.remove(0);
            total -= estimate_tokens(&removed.content);
            match_idx = match_idx.saturating_sub(1);
        } else {
            let dist_start = match_idx;
            let dist_end = messages.len() - 1 - match_idx;
            if dist_start >= dist_end {
                let removed = messages.remove(0);
                total -= estimate_tokens(&removed.content);
                match_idx = match_idx.saturating_sub(1);
            } else {
                let removed = messages.pop().expect("len > 1");
                total -= estimate_tokens(&removed.content);
            }
        }
    }

    if preserve_turns && messages.len() > 1 {
        if messages[0].role == "assistant" && !messages[0].is_primary_match {
            messages.remove(0);
            match_idx = match_idx.saturating_sub(1);
        }
        if messages.len() > 1
            && messages.last().map(|m| m.role == "user" && !m.is_primary_match).unwrap_or(false)
        {
            messages.pop();
        }
    }

    window.match_position = match_idx;
}

fn role_label(role: &str) -> String {
    match role {
        "user" => "You".to_owned(),
        "assistant" => "Assistant".to_owned(),
        "system" => "System".to_owned(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        }
    }
}

/// Render a window into display text plus metadata.
pub fn format_window(
    window: &ContextWindow,
    include_markers: bool,
    retrieval_params: serde_json::Value,
) -> FormattedWindow {
    let mut parts = Vec::new();

    if include_markers {
        parts.push("[CTX_START]".to_owned());
    }
    for message in &window.messages {
        if message.is_primary_match && include_markers {
            parts.push("[MATCH_START]".to_owned());
        }
        parts.push(format!(
            "**{}** *(on {})*:\n{}",
            role_label(&message.role),
            message.created_at.format("%Y-%m-%d %H:%M:%S"),
            message.content
        ));
        if message.is_primary_match && include_markers {
            parts.push("[MATCH_END]".to_owned());
        }
    }
    if include_markers {
        parts.push("[CTX_END]".to_owned());
    }

    let content = parts.join("\n\n");
    let roles: Vec<String> = window.messages.iter().map(|m| m.role.clone()).collect();
    let token_estimate = estimate_tokens(&content);

    FormattedWindow {
        metadata: WindowMetadata {
            conversation_id: window.conversation_id,
            window_id: window.window_id.clone(),
            matched_message_id: window.matched_message_id,
            conversation_title: window.conversation_title.clone(),
            window_size: window.messages.len(),
            match_position: window.match_position,
            before_count: window.match_position,
            after_count: window.messages.len().saturating_sub(window.match_position + 1),
            base_score: window.base_score,
            aggregated_score: window.aggregated_score,
            roles,
            token_estimate,
            retrieval_params,
        },
        content,
    }
}
