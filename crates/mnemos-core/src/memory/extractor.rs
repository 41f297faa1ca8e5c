//! Candidate fact extraction via LLM.
//!
//! `MemoryExtractor` sends recent conversation plus the current exchange to
//! the model in one prompt and parses the reply into `CandidateFact`s.
//!
//! Extraction never aborts the pipeline: provider errors and unparseable
//! output are retried, then reported as a soft warning alongside an empty
//! fact list. It has no storage side effects.

use std::collections::HashSet;
use std::fmt::Write as _;

use chrono::Utc;
use serde::Deserialize;

use mnemos_types::config::MemoryConfig;
use mnemos_types::conversation::ConversationTurn;
use mnemos_types::error::MemoryError;
use mnemos_types::llm::{CompletionRequest, Message};
use mnemos_types::memory::{CandidateFact, DEFAULT_CATEGORY, FactProvenance};

use crate::llm::box_provider::BoxLlmProvider;

use super::calls::complete_parsed;
use super::llm_json::parse_payload;

/// System prompt for the extraction call.
pub(crate) const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a memory extraction engine for a long-term AI assistant.

Extract ONLY stable, user-specific facts that should be remembered across conversations: preferences, identity, relationships, locations, work, habits, and goals.

Do NOT extract:
- transient states (mood, temporary plans, one-time actions)
- conversational fluff or greetings
- questions
- suggestions made by the assistant
- anything not stated or directly implied by the user

Each memory must be one atomic, standalone factual statement about the user.

Return JSON only, in exactly this shape:
{"memories": [{"content": "The user is vegetarian", "type": "dietary_preference", "confidence": 0.95}]}

"type" is a short snake_case category. "confidence" is between 0.0 and 1.0.
If nothing should be stored, return: {"memories": []}"#;

/// Reply shape: `{"memories": [...]}`.
#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    memories: Vec<RawFact>,
}

/// One fact as returned by the LLM before normalization.
#[derive(Debug, Deserialize)]
struct RawFact {
    #[serde(alias = "fact")]
    content: String,
    #[serde(default, rename = "type", alias = "category")]
    kind: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Result of one extraction pass.
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    /// Normalized candidates in the order the model listed them.
    pub facts: Vec<CandidateFact>,
    /// Set when extraction failed softly and `facts` is empty because of it.
    pub warning: Option<MemoryError>,
}

/// Stateless utility for turning conversation into candidate facts.
pub struct MemoryExtractor;

impl MemoryExtractor {
    /// Extract candidate facts from the current exchange, using up to
    /// `config.recent_turns` prior turns as context.
    ///
    /// `recent` is ordered oldest to newest. A blank current user message
    /// yields no facts and no LLM call.
    #[tracing::instrument(
        name = "extract_candidates",
        skip(llm, config, recent, current),
        fields(recent_turns = recent.len())
    )]
    pub async fn extract(
        llm: &BoxLlmProvider,
        config: &MemoryConfig,
        recent: &[ConversationTurn],
        current: &ConversationTurn,
    ) -> ExtractionOutcome {
        if current.user.trim().is_empty() {
            tracing::debug!("Current user message is blank; nothing to extract");
            return ExtractionOutcome::default();
        }

        let request = CompletionRequest {
            model: config.model.clone(),
            messages: vec![Message::user(render_conversation(
                recent,
                current,
                config.recent_turns,
            ))],
            system: Some(
                config
                    .extraction_instructions
                    .clone()
                    .unwrap_or_else(|| EXTRACTION_SYSTEM_PROMPT.to_string()),
            ),
            max_tokens: config.extraction_max_tokens,
            temperature: Some(0.0),
        };

        let raw_facts = match complete_parsed(
            llm,
            &request,
            config.llm_max_attempts,
            config.call_timeout_ms,
            parse_extraction,
        )
        .await
        {
            Ok(facts) => facts,
            Err(e) => {
                tracing::warn!(error = %e, "Memory extraction failed; continuing with no candidates");
                return ExtractionOutcome {
                    facts: Vec::new(),
                    warning: Some(e),
                };
            }
        };

        let facts = normalize(raw_facts, recent.len(), config.min_fact_confidence);
        tracing::debug!(count = facts.len(), "Extracted candidate facts");
        ExtractionOutcome {
            facts,
            warning: None,
        }
    }
}

/// Accept `{"memories": [...]}` or a bare array.
fn parse_extraction(raw: &str) -> Result<Vec<RawFact>, String> {
    let body = super::llm_json::strip_code_fences(raw);
    if body.starts_with('[') {
        return parse_payload::<Vec<RawFact>>(body);
    }
    parse_payload::<RawExtraction>(body).map(|r| r.memories)
}

/// Lay out history oldest-first, then the current exchange.
fn render_conversation(
    recent: &[ConversationTurn],
    current: &ConversationTurn,
    window: usize,
) -> String {
    let mut out = String::new();

    let mut history: Vec<(usize, &ConversationTurn)> = recent
        .iter()
        .enumerate()
        .filter(|(_, turn)| !turn.is_blank())
        .collect();
    let start = history.len().saturating_sub(window);
    history.drain(..start);
    if !history.is_empty() {
        out.push_str("Recent conversation (oldest first):\n");
        for (index, turn) in history {
            push_turn(&mut out, index, turn);
        }
        out.push('\n');
    }

    out.push_str("Current exchange:\n");
    push_turn(&mut out, recent.len(), current);
    out.push_str("\nExtract the new long-term memories about the user from this conversation.");
    out
}

fn push_turn(out: &mut String, index: usize, turn: &ConversationTurn) {
    if !turn.user.trim().is_empty() {
        let _ = writeln!(out, "[turn {index}] User: {}", turn.user.trim());
    }
    if !turn.assistant.trim().is_empty() {
        let _ = writeln!(out, "[turn {index}] Assistant: {}", turn.assistant.trim());
    }
}

fn normalize(raw: Vec<RawFact>, turn_index: usize, min_confidence: f32) -> Vec<CandidateFact> {
    let extracted_at = Utc::now();
    let mut seen = HashSet::new();

    raw.into_iter()
        .filter_map(|fact| {
            let content = fact.content.trim();
            if content.is_empty() {
                return None;
            }
            if !seen.insert(content.to_lowercase()) {
                tracing::debug!(content, "Dropping duplicate candidate");
                return None;
            }

            let confidence = fact.confidence.unwrap_or(1.0).clamp(0.0, 1.0) as f32;
            if confidence < min_confidence {
                tracing::debug!(content, confidence, "Dropping low-confidence candidate");
                return None;
            }

            let category = fact
                .kind
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_lowercase)
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

            Some(CandidateFact {
                content: content.to_string(),
                category,
                confidence,
                provenance: FactProvenance {
                    turn_index,
                    extracted_at,
                },
            })
        })
        .collect()
}
