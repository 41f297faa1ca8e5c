//! Candidate reconciliation against existing memories.
//!
//! For each candidate the reconciler embeds the content, searches the user's
//! existing vectors, and when a neighbor scores at or above the similarity
//! threshold asks the LLM whether the candidate adds, updates, deletes, or
//! duplicates that neighbor. It reads both stores but never writes.

use std::fmt::Write as _;

use futures_util::future::join_all;
use serde::Deserialize;
use uuid::Uuid;

use mnemos_types::config::{AdjudicationLabel, AdjudicationLabels, MemoryConfig};
use mnemos_types::error::MemoryError;
use mnemos_types::llm::{CompletionRequest, Message};
use mnemos_types::memory::{CandidateFact, Memory, MemoryFilter, MemoryOperation, VectorHit};

use crate::llm::box_provider::BoxLlmProvider;

use super::box_embedder::BoxEmbedder;
use super::box_metadata::BoxMetadataStore;
use super::box_vector::BoxVectorStore;
use super::calls::{complete_parsed, embed_one, with_timeout};
use super::llm_json::{parse_payload, strip_code_fences};

/// System prompt for the adjudication call. `{add}` style placeholders are
/// filled from the configured label set.
const ADJUDICATION_SYSTEM_PROMPT: &str = r#"You are a memory management engine for a long-term AI assistant.

You are given a candidate memory and the most similar memory already stored for the same user. Choose exactly one operation:
- {add}: the candidate is a distinct fact that should be stored alongside the existing one
- {update}: the candidate describes the same attribute as the existing memory but is more specific, more recent, or more accurate; it replaces the existing memory
- {delete}: the candidate clearly contradicts the existing memory, which should be removed
- {none}: the candidate is semantically equivalent to the existing memory or adds nothing new

Prefer {update} over {add} when both describe the same real-world attribute. Prefer {none} over {add} when the information is redundant. Choose {delete} only for a clear contradiction.

Return JSON only: {"operation": "<one of the operations above>", "confidence": 0.0-1.0}"#;

/// Reply shape for adjudication.
#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(alias = "event", alias = "action", alias = "decision")]
    operation: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// The reconciler's verdict on one candidate.
#[derive(Debug)]
pub struct Reconciliation {
    pub candidate: CandidateFact,
    /// Embedding of `candidate.content`; empty when embedding failed.
    pub embedding: Vec<f32>,
    pub operation: MemoryOperation,
    /// The existing memory offered to the LLM, with its similarity score.
    pub neighbor: Option<(Memory, f32)>,
    /// Above-threshold vector hits with no metadata record.
    pub orphans: Vec<Uuid>,
    /// Soft failure that forced the operation to `Skip`, or a consistency
    /// problem noticed along the way.
    pub warning: Option<MemoryError>,
}

impl Reconciliation {
    fn skipped(candidate: CandidateFact, embedding: Vec<f32>, warning: MemoryError) -> Self {
        Self {
            candidate,
            embedding,
            operation: MemoryOperation::Skip,
            neighbor: None,
            orphans: Vec::new(),
            warning: Some(warning),
        }
    }
}

/// Read-only decision maker over the configured ports.
pub struct MemoryReconciler<'a> {
    pub llm: &'a BoxLlmProvider,
    pub embedder: &'a BoxEmbedder,
    pub metadata: &'a BoxMetadataStore,
    pub vectors: &'a BoxVectorStore,
    pub config: &'a MemoryConfig,
}

impl MemoryReconciler<'_> {
    /// Reconcile every candidate for `user_id`, concurrently.
    ///
    /// Output order matches input order. One candidate's failure never
    /// affects another's result.
    #[tracing::instrument(
        name = "reconcile_candidates",
        skip(self, candidates),
        fields(user_id = %user_id, candidate_count = candidates.len())
    )]
    pub async fn reconcile_all(
        &self,
        user_id: &str,
        candidates: Vec<CandidateFact>,
    ) -> Vec<Reconciliation> {
        join_all(
            candidates
                .into_iter()
                .map(|candidate| self.reconcile(user_id, candidate)),
        )
        .await
    }

    /// Decide what to do with a single candidate.
    pub async fn reconcile(&self, user_id: &str, candidate: CandidateFact) -> Reconciliation {
        let timeout_ms = self.config.call_timeout_ms;

        let embedding = match embed_one(self.embedder, &candidate.content, timeout_ms).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, content = %candidate.content, "Failed to embed candidate; skipping");
                return Reconciliation::skipped(candidate, Vec::new(), e);
            }
        };

        let filter = MemoryFilter::for_user(user_id);
        let hits = match with_timeout(
            "vector search",
            timeout_ms,
            self.vectors
                .search(&embedding, self.config.neighbor_top_k, &filter),
        )
        .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "Neighbor search failed; skipping candidate");
                return Reconciliation::skipped(candidate, embedding, e);
            }
        };

        let (neighbor, orphans, warning) = match self.closest_neighbor(user_id, &hits).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "Neighbor hydration failed; skipping candidate");
                return Reconciliation::skipped(candidate, embedding, e);
            }
        };

        let Some((existing, score)) = neighbor else {
            tracing::debug!(content = %candidate.content, "No neighbor above threshold; adding");
            return Reconciliation {
                candidate,
                embedding,
                operation: MemoryOperation::Add,
                neighbor: None,
                orphans,
                warning,
            };
        };

        let (operation, adjudication_warning) = match self.adjudicate(&candidate, &existing).await {
            Ok(label) => (to_operation(label, existing.id), None),
            Err(e) => {
                tracing::warn!(error = %e, neighbor_id = %existing.id, "Adjudication failed; treating as duplicate");
                (MemoryOperation::Skip, Some(e))
            }
        };
        tracing::debug!(
            content = %candidate.content,
            neighbor_id = %existing.id,
            score,
            operation = %operation,
            "Reconciled candidate"
        );

        Reconciliation {
            candidate,
            embedding,
            operation,
            neighbor: Some((existing, score)),
            orphans,
            warning: adjudication_warning.or(warning),
        }
    }

    /// Walk above-threshold hits closest-first and return the first one with
    /// a metadata record owned by `user_id`.
    async fn closest_neighbor(
        &self,
        user_id: &str,
        hits: &[VectorHit],
    ) -> Result<(Option<(Memory, f32)>, Vec<Uuid>, Option<MemoryError>), MemoryError> {
        let threshold = self.config.similarity_threshold;
        let mut candidates: Vec<VectorHit> =
            hits.iter().copied().filter(|h| h.score >= threshold).collect();
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut orphans = Vec::new();
        let mut warning = None;
        for hit in candidates {
            let record = with_timeout(
                "metadata get",
                self.config.call_timeout_ms,
                self.metadata.get(&hit.id),
            )
            .await?;
            match record {
                Some(memory) if memory.user_id == user_id => {
                    return Ok((Some((memory, hit.score)), orphans, warning));
                }
                Some(memory) => {
                    tracing::warn!(
                        memory_id = %hit.id,
                        owner = %memory.user_id,
                        "Vector payload and record disagree on owner; ignoring neighbor"
                    );
                    warning = Some(MemoryError::Consistency {
                        id: hit.id,
                        detail: format!("vector filed under '{user_id}' but record belongs to '{}'", memory.user_id),
                    });
                }
                None => {
                    tracing::warn!(memory_id = %hit.id, "Vector has no metadata record");
                    warning = Some(MemoryError::Consistency {
                        id: hit.id,
                        detail: "vector present without metadata record".to_string(),
                    });
                    orphans.push(hit.id);
                }
            }
        }
        Ok((None, orphans, warning))
    }

    async fn adjudicate(
        &self,
        candidate: &CandidateFact,
        existing: &Memory,
    ) -> Result<AdjudicationLabel, MemoryError> {
        let labels = &self.config.labels;
        let system = match &self.config.adjudication_instructions {
            Some(custom) => custom.clone(),
            None => render_system_prompt(labels),
        };

        let mut prompt = String::new();
        let _ = writeln!(prompt, "Existing memory:");
        let _ = writeln!(prompt, "- id: {}", existing.id);
        let _ = writeln!(prompt, "- content: {}", existing.content);
        let _ = writeln!(prompt, "- type: {}", existing.category);
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "Candidate memory:");
        let _ = writeln!(prompt, "- content: {}", candidate.content);
        let _ = writeln!(prompt, "- type: {}", candidate.category);

        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: vec![Message::user(prompt)],
            system: Some(system),
            max_tokens: self.config.adjudication_max_tokens,
            temperature: Some(0.0),
        };

        complete_parsed(
            self.llm,
            &request,
            self.config.llm_max_attempts,
            self.config.call_timeout_ms,
            |raw| parse_decision(raw, labels),
        )
        .await
    }
}

fn render_system_prompt(labels: &AdjudicationLabels) -> String {
    ADJUDICATION_SYSTEM_PROMPT
        .replace("{add}", labels.primary(AdjudicationLabel::Add))
        .replace("{update}", labels.primary(AdjudicationLabel::Update))
        .replace("{delete}", labels.primary(AdjudicationLabel::Delete))
        .replace("{none}", labels.primary(AdjudicationLabel::None))
}

/// Accept `{"operation": LABEL, ...}` or a bare label word.
fn parse_decision(raw: &str, labels: &AdjudicationLabels) -> Result<AdjudicationLabel, String> {
    let body = strip_code_fences(raw);
    let word = match parse_payload::<RawDecision>(body) {
        Ok(decision) => {
            if let Some(confidence) = decision.confidence {
                tracing::trace!(confidence, "Adjudication confidence");
            }
            decision.operation
        }
        Err(_) => body
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c.is_whitespace())
            .to_string(),
    };
    labels
        .resolve(&word)
        .ok_or_else(|| format!("unrecognized adjudication label: '{word}'"))
}

fn to_operation(label: AdjudicationLabel, target_id: Uuid) -> MemoryOperation {
    match label {
        AdjudicationLabel::Add => MemoryOperation::Add,
        AdjudicationLabel::Update => MemoryOperation::Update { target_id },
        AdjudicationLabel::Delete => MemoryOperation::Delete { target_id },
        AdjudicationLabel::None => MemoryOperation::Skip,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use mnemos_types::llm::LlmError;
    use mnemos_types::memory::FactProvenance;

    use super::*;
    use crate::testing::{
        RecordingMetadataStore, RecordingVectorStore, ScriptedLlm, TableEmbedder, seed_both,
    };

    const ITALIAN: [f32; 3] = [1.0, 0.0, 0.0];
    // cos(ITALIAN, ITALIAN_FOOD) = 0.92
    const ITALIAN_FOOD: [f32; 3] = [0.92, 0.391_918_36, 0.0];
    const VEGETARIAN: [f32; 3] = [0.0, 0.0, 1.0];

    fn candidate(content: &str) -> CandidateFact {
        CandidateFact {
            content: content.to_string(),
            category: "food".to_string(),
            confidence: 0.9,
            provenance: FactProvenance {
                turn_index: 0,
                extracted_at: Utc::now(),
            },
        }
    }

    fn embedder() -> BoxEmbedder {
        BoxEmbedder::new(
            TableEmbedder::new(3)
                .with("I like Italian cuisine", ITALIAN.to_vec())
                .with("I love Italian food", ITALIAN_FOOD.to_vec())
                .with("I am vegetarian", VEGETARIAN.to_vec()),
        )
    }

    struct Fixture {
        llm: BoxLlmProvider,
        calls: std::sync::Arc<std::sync::Mutex<Vec<CompletionRequest>>>,
        embedder: BoxEmbedder,
        metadata_handle: RecordingMetadataStore,
        vectors_handle: RecordingVectorStore,
        metadata: BoxMetadataStore,
        vectors: BoxVectorStore,
        config: MemoryConfig,
        existing: Memory,
    }

    impl Fixture {
        fn new(llm: ScriptedLlm) -> Self {
            let calls = llm.call_log();
            let metadata_handle = RecordingMetadataStore::default();
            let vectors_handle = RecordingVectorStore::new(3);
            let existing = Memory::new("u1", "I like Italian cuisine", "food", ITALIAN.to_vec());
            seed_both(&metadata_handle, &vectors_handle, &existing);
            Self {
                llm: BoxLlmProvider::new(llm),
                calls,
                embedder: embedder(),
                metadata: BoxMetadataStore::new(metadata_handle.clone()),
                vectors: BoxVectorStore::new(vectors_handle.clone()),
                metadata_handle,
                vectors_handle,
                config: MemoryConfig::default(),
                existing,
            }
        }

        fn reconciler(&self) -> MemoryReconciler<'_> {
            MemoryReconciler {
                llm: &self.llm,
                embedder: &self.embedder,
                metadata: &self.metadata,
                vectors: &self.vectors,
                config: &self.config,
            }
        }
    }

    #[test]
    fn test_parse_decision_shapes() {
        let labels = AdjudicationLabels::default();
        assert_eq!(
            parse_decision(r#"{"operation": "UPDATE", "confidence": 0.8}"#, &labels).unwrap(),
            AdjudicationLabel::Update
        );
        assert_eq!(
            parse_decision("```json\n{\"event\": \"noop\"}\n```", &labels).unwrap(),
            AdjudicationLabel::None
        );
        assert_eq!(parse_decision("DELETE.", &labels).unwrap(), AdjudicationLabel::Delete);
        assert_eq!(parse_decision(" \"add\" ", &labels).unwrap(), AdjudicationLabel::Add);
        assert!(parse_decision("I think you should merge them", &labels).is_err());
    }

    #[test]
    fn test_system_prompt_uses_configured_labels() {
        let labels = AdjudicationLabels {
            update: vec!["REPLACE".into()],
            ..AdjudicationLabels::default()
        };
        let prompt = render_system_prompt(&labels);
        assert!(prompt.contains("- REPLACE:"));
        assert!(prompt.contains("- NONE:"));
        assert!(!prompt.contains("{update}"));
    }

    #[tokio::test]
    async fn test_no_neighbor_above_threshold_is_add_without_llm() {
        let fixture = Fixture::new(ScriptedLlm::queue(vec![]));
        let result = fixture.reconciler().reconcile("u1", candidate("I am vegetarian")).await;

        assert_eq!(result.operation, MemoryOperation::Add);
        assert!(result.neighbor.is_none());
        assert!(result.warning.is_none());
        assert_eq!(result.embedding, VEGETARIAN.to_vec());
        assert!(fixture.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_targets_closest_neighbor() {
        let fixture = Fixture::new(ScriptedLlm::queue(vec![Ok(
            r#"{"operation": "UPDATE", "confidence": 0.9}"#.into(),
        )]));
        let result = fixture
            .reconciler()
            .reconcile("u1", candidate("I love Italian food"))
            .await;

        assert_eq!(
            result.operation,
            MemoryOperation::Update {
                target_id: fixture.existing.id
            }
        );
        let (neighbor, score) = result.neighbor.unwrap();
        assert_eq!(neighbor.id, fixture.existing.id);
        assert!((score - 0.92).abs() < 1e-3);

        let calls = fixture.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let prompt = &calls[0].messages[0].content;
        assert!(prompt.contains("I like Italian cuisine"));
        assert!(prompt.contains("I love Italian food"));
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let mut fixture = Fixture::new(ScriptedLlm::queue(vec![Ok("NONE".into())]));
        fixture.config.similarity_threshold = 1.0;
        let result = fixture
            .reconciler()
            .reconcile("u1", candidate("I like Italian cuisine"))
            .await;
        assert_eq!(result.operation, MemoryOperation::Skip);
        assert!(result.neighbor.is_some());
    }

    #[tokio::test]
    async fn test_other_users_memories_are_invisible() {
        let fixture = Fixture::new(ScriptedLlm::queue(vec![]));
        let result = fixture
            .reconciler()
            .reconcile("u2", candidate("I love Italian food"))
            .await;
        assert_eq!(result.operation, MemoryOperation::Add);
        assert!(fixture.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_adjudication_is_skip_with_warning() {
        let fixture = Fixture::new(ScriptedLlm::new(|_| Ok("maybe?".into())));
        let result = fixture
            .reconciler()
            .reconcile("u1", candidate("I love Italian food"))
            .await;
        assert_eq!(result.operation, MemoryOperation::Skip);
        assert!(matches!(result.warning, Some(MemoryError::Parse(_))));
        // Retried up to the configured attempt count.
        assert_eq!(fixture.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_provider_failure_is_skip_with_warning() {
        let fixture = Fixture::new(ScriptedLlm::new(|_| {
            Err(LlmError::Provider {
                message: "503".into(),
            })
        }));
        let result = fixture
            .reconciler()
            .reconcile("u1", candidate("I love Italian food"))
            .await;
        assert_eq!(result.operation, MemoryOperation::Skip);
        assert!(matches!(result.warning, Some(MemoryError::Provider(_))));
    }

    #[tokio::test]
    async fn test_orphan_vector_is_reported_and_passed_over() {
        let fixture = Fixture::new(ScriptedLlm::queue(vec![]));
        let orphan = Memory::new("u1", "I adore pasta", "food", ITALIAN_FOOD.to_vec());
        fixture.vectors_handle.seed(orphan.vector_record());
        // Remove the only real neighbor's record too, leaving nothing to offer.
        let _ = fixture.metadata.delete(&fixture.existing.id).await;

        let result = fixture
            .reconciler()
            .reconcile("u1", candidate("I love Italian food"))
            .await;

        assert_eq!(result.operation, MemoryOperation::Add);
        assert!(result.orphans.contains(&orphan.id));
        assert!(result.orphans.contains(&fixture.existing.id));
        assert!(matches!(result.warning, Some(MemoryError::Consistency { .. })));
        assert!(fixture.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embed_failure_is_skip() {
        let fixture = Fixture::new(ScriptedLlm::queue(vec![]));
        let result = fixture
            .reconciler()
            .reconcile("u1", candidate("text with no embedding"))
            .await;
        assert_eq!(result.operation, MemoryOperation::Skip);
        assert!(result.embedding.is_empty());
        assert!(matches!(result.warning, Some(MemoryError::Provider(_))));
    }

    #[tokio::test]
    async fn test_search_failure_is_skip() {
        let fixture = Fixture::new(ScriptedLlm::queue(vec![]));
        fixture.vectors_handle.fail_searches(true);
        let result = fixture
            .reconciler()
            .reconcile("u1", candidate("I am vegetarian"))
            .await;
        assert_eq!(result.operation, MemoryOperation::Skip);
        assert!(matches!(result.warning, Some(MemoryError::Storage(_))));
    }

    #[tokio::test]
    async fn test_reconcile_all_preserves_order() {
        let fixture = Fixture::new(ScriptedLlm::new(|_| Ok("NONE".into())));
        let results = fixture
            .reconciler()
            .reconcile_all(
                "u1",
                vec![candidate("I am vegetarian"), candidate("I love Italian food")],
            )
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].candidate.content, "I am vegetarian");
        assert_eq!(results[0].operation, MemoryOperation::Add);
        assert_eq!(results[1].operation, MemoryOperation::Skip);
        assert!(fixture.metadata_handle.puts() == 0 && fixture.vectors_handle.upserts() == 0);
    }
}
