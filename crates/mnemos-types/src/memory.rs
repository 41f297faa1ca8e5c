//! Memory types for Mnemos.
//!
//! These types model a user's long-term memory: durable facts extracted from
//! conversation, the transient candidates produced by extraction, and the
//! operations the reconciler decides on.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category assigned when the extractor does not supply one.
pub const DEFAULT_CATEGORY: &str = "general";

/// Open key/value metadata attached to a memory.
pub type MemoryMetadata = HashMap<String, serde_json::Value>;

/// A single durable memory owned by one user.
///
/// `embedding` is always the embedding of the current `content`; the
/// orchestrator recomputes it whenever `content` changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub user_id: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: MemoryMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Create a fresh memory with a new time-ordered id.
    pub fn new(
        user_id: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            content: content.into(),
            category: category.into(),
            embedding,
            metadata: MemoryMetadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace content, category and embedding in place.
    ///
    /// `id` and `created_at` are kept. `updated_at` always moves forward, even
    /// when the wall clock has not advanced since the previous write.
    pub fn revise(&mut self, content: impl Into<String>, category: impl Into<String>, embedding: Vec<f32>) {
        self.content = content.into();
        self.category = category.into();
        self.embedding = embedding;
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }

    /// The vector-store view of this memory.
    pub fn vector_record(&self) -> VectorRecord {
        VectorRecord {
            id: self.id,
            user_id: self.user_id.clone(),
            category: self.category.clone(),
            vector: self.embedding.clone(),
        }
    }
}

/// Where a candidate fact came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactProvenance {
    /// Index of the source turn; recent history occupies `0..n`, the current
    /// turn is `n`.
    pub turn_index: usize,
    pub extracted_at: DateTime<Utc>,
}

/// A fact proposed by the extractor, not yet reconciled or stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFact {
    pub content: String,
    pub category: String,
    /// Extractor's confidence in `[0, 1]`.
    pub confidence: f32,
    pub provenance: FactProvenance,
}

impl CandidateFact {
    /// Metadata recorded on the memory this candidate produces.
    pub fn provenance_metadata(&self) -> MemoryMetadata {
        let mut metadata = MemoryMetadata::new();
        metadata.insert("source".to_string(), serde_json::json!("conversation"));
        metadata.insert(
            "source_turn".to_string(),
            serde_json::json!(self.provenance.turn_index),
        );
        metadata.insert(
            "extracted_at".to_string(),
            serde_json::json!(self.provenance.extracted_at.to_rfc3339()),
        );
        metadata.insert("confidence".to_string(), serde_json::json!(self.confidence));
        metadata
    }
}

/// What to do with one candidate fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum MemoryOperation {
    /// Store as a new memory.
    Add,
    /// Replace the content of an existing memory.
    Update { target_id: Uuid },
    /// Remove an existing memory that the candidate contradicts.
    Delete { target_id: Uuid },
    /// Duplicate or not worth storing.
    Skip,
}

impl MemoryOperation {
    pub fn target_id(&self) -> Option<Uuid> {
        match self {
            MemoryOperation::Update { target_id } | MemoryOperation::Delete { target_id } => {
                Some(*target_id)
            }
            MemoryOperation::Add | MemoryOperation::Skip => None,
        }
    }

    /// Whether applying this operation touches either store.
    pub fn is_write(&self) -> bool {
        !matches!(self, MemoryOperation::Skip)
    }
}

impl fmt::Display for MemoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryOperation::Add => write!(f, "add"),
            MemoryOperation::Update { target_id } => write!(f, "update({target_id})"),
            MemoryOperation::Delete { target_id } => write!(f, "delete({target_id})"),
            MemoryOperation::Skip => write!(f, "skip"),
        }
    }
}

/// Scope for store lookups and searches.
///
/// Every pipeline read sets `user_id`; `category` narrows further.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryFilter {
    pub user_id: Option<String>,
    pub category: Option<String>,
}

impl MemoryFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Check a record's scope fields against this filter.
    pub fn matches(&self, user_id: &str, category: &str) -> bool {
        self.user_id.as_deref().is_none_or(|u| u == user_id)
            && self.category.as_deref().is_none_or(|c| c == category)
    }
}

/// A vector plus the payload fields the vector store filters on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: Uuid,
    pub user_id: String,
    pub category: String,
    pub vector: Vec<f32>,
}

/// One nearest-neighbor result. `score` is cosine similarity, higher is closer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: Uuid,
    pub score: f32,
}

/// A hydrated retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedMemory {
    pub memory: Memory,
    pub score: f32,
}

/// Disagreement between the metadata store and the vector store for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub user_id: String,
    /// Ids present in the vector store with no metadata record.
    pub orphan_vectors: Vec<Uuid>,
    /// Ids present in the metadata store with no vector.
    pub orphan_records: Vec<Uuid>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.orphan_vectors.is_empty() && self.orphan_records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_memory_timestamps_match() {
        let memory = Memory::new("speaker_a_0", "I am vegetarian", "preference", vec![1.0, 0.0]);
        assert_eq!(memory.created_at, memory.updated_at);
        assert_eq!(memory.user_id, "speaker_a_0");
        assert!(memory.metadata.is_empty());
    }

    #[test]
    fn test_revise_keeps_identity_and_advances_updated_at() {
        let mut memory = Memory::new("u1", "I like Italian cuisine", "preference", vec![1.0, 0.0]);
        let id = memory.id;
        let created = memory.created_at;
        // Push updated_at into the future so the wall clock cannot catch up.
        memory.updated_at = Utc::now() + Duration::hours(1);
        let before = memory.updated_at;

        memory.revise("I love Italian food", "preference", vec![0.0, 1.0]);

        assert_eq!(memory.id, id);
        assert_eq!(memory.created_at, created);
        assert_eq!(memory.content, "I love Italian food");
        assert_eq!(memory.embedding, vec![0.0, 1.0]);
        assert!(memory.updated_at > before);
    }

    #[test]
    fn test_operation_serde_is_tagged() {
        let id = Uuid::now_v7();
        let op = MemoryOperation::Update { target_id: id };
        let json = serde_json::to_value(op).unwrap();
        assert_eq!(json["operation"], "update");
        assert_eq!(json["target_id"], id.to_string());

        let skip: MemoryOperation = serde_json::from_str(r#"{"operation":"skip"}"#).unwrap();
        assert_eq!(skip, MemoryOperation::Skip);
    }

    #[test]
    fn test_operation_target_id() {
        let id = Uuid::now_v7();
        assert_eq!(MemoryOperation::Delete { target_id: id }.target_id(), Some(id));
        assert_eq!(MemoryOperation::Add.target_id(), None);
        assert!(!MemoryOperation::Skip.is_write());
        assert!(MemoryOperation::Add.is_write());
    }

    #[test]
    fn test_filter_matches() {
        let filter = MemoryFilter::for_user("u1");
        assert!(filter.matches("u1", "food"));
        assert!(!filter.matches("u2", "food"));

        let filter = filter.with_category("food");
        assert!(filter.matches("u1", "food"));
        assert!(!filter.matches("u1", "work"));

        assert!(MemoryFilter::default().matches("anyone", "anything"));
    }

    #[test]
    fn test_provenance_metadata() {
        let fact = CandidateFact {
            content: "Lives in Lisbon".to_string(),
            category: "location".to_string(),
            confidence: 0.9,
            provenance: FactProvenance {
                turn_index: 3,
                extracted_at: Utc::now(),
            },
        };
        let metadata = fact.provenance_metadata();
        assert_eq!(metadata["source_turn"], 3);
        assert_eq!(metadata["source"], "conversation");
        assert!(metadata.contains_key("extracted_at"));
    }

    #[test]
    fn test_consistency_report() {
        let mut report = ConsistencyReport::default();
        assert!(report.is_consistent());
        report.orphan_vectors.push(Uuid::now_v7());
        assert!(!report.is_consistent());
    }
}
