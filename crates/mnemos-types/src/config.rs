//! Configuration types for Mnemos.
//!
//! `MnemosConfig` represents the top-level `config.toml`. The `[memory]` table
//! tunes the pipeline; the `[storage]` table selects and locates the
//! backends. All fields have defaults, so an empty file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MnemosConfig {
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Tuning for extraction, reconciliation and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Minimum cosine similarity for an existing memory to count as a
    /// neighbor of a candidate (inclusive).
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Number of nearest neighbors fetched per candidate.
    #[serde(default = "default_neighbor_top_k")]
    pub neighbor_top_k: usize,

    /// How many prior turns the extractor sees.
    #[serde(default = "default_recent_turns")]
    pub recent_turns: usize,

    /// Attempts per LLM call (extraction and adjudication).
    #[serde(default = "default_llm_max_attempts")]
    pub llm_max_attempts: u32,

    /// Attempts per vector-store write before rolling back.
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,

    /// Timeout applied to every external call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Candidates below this confidence are discarded.
    #[serde(default)]
    pub min_fact_confidence: f32,

    /// Model passed to the LLM provider. Empty selects the provider default.
    #[serde(default)]
    pub model: String,

    #[serde(default = "default_extraction_max_tokens")]
    pub extraction_max_tokens: u32,

    #[serde(default = "default_adjudication_max_tokens")]
    pub adjudication_max_tokens: u32,

    /// Replacement system instruction for fact extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_instructions: Option<String>,

    /// Replacement system instruction for duplicate/update adjudication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjudication_instructions: Option<String>,

    /// Words accepted from the adjudication model for each decision.
    #[serde(default)]
    pub labels: AdjudicationLabels,
}

fn default_similarity_threshold() -> f32 {
    0.85
}

fn default_neighbor_top_k() -> usize {
    5
}

fn default_recent_turns() -> usize {
    10
}

fn default_llm_max_attempts() -> u32 {
    3
}

fn default_write_attempts() -> u32 {
    2
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_extraction_max_tokens() -> u32 {
    2048
}

fn default_adjudication_max_tokens() -> u32 {
    256
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            neighbor_top_k: default_neighbor_top_k(),
            recent_turns: default_recent_turns(),
            llm_max_attempts: default_llm_max_attempts(),
            write_attempts: default_write_attempts(),
            call_timeout_ms: default_call_timeout_ms(),
            min_fact_confidence: 0.0,
            model: String::new(),
            extraction_max_tokens: default_extraction_max_tokens(),
            adjudication_max_tokens: default_adjudication_max_tokens(),
            extraction_instructions: None,
            adjudication_instructions: None,
            labels: AdjudicationLabels::default(),
        }
    }
}

impl MemoryConfig {
    /// Clamp out-of-range values into something the pipeline can run with.
    pub fn sanitized(mut self) -> Self {
        if !self.similarity_threshold.is_finite() {
            self.similarity_threshold = default_similarity_threshold();
        }
        self.similarity_threshold = self.similarity_threshold.clamp(-1.0, 1.0);
        if !self.min_fact_confidence.is_finite() {
            self.min_fact_confidence = 0.0;
        }
        self.min_fact_confidence = self.min_fact_confidence.clamp(0.0, 1.0);
        self.neighbor_top_k = self.neighbor_top_k.max(1);
        self.llm_max_attempts = self.llm_max_attempts.max(1);
        self.write_attempts = self.write_attempts.max(1);
        self.call_timeout_ms = self.call_timeout_ms.max(1);
        self.extraction_max_tokens = self.extraction_max_tokens.max(1);
        self.adjudication_max_tokens = self.adjudication_max_tokens.max(1);
        self
    }
}

/// A decision the adjudication model can reach about a candidate and its
/// closest existing neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjudicationLabel {
    Add,
    Update,
    Delete,
    None,
}

/// Accepted spellings per decision, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjudicationLabels {
    #[serde(default = "default_add_labels")]
    pub add: Vec<String>,
    #[serde(default = "default_update_labels")]
    pub update: Vec<String>,
    #[serde(default = "default_delete_labels")]
    pub delete: Vec<String>,
    #[serde(default = "default_none_labels")]
    pub none: Vec<String>,
}

fn default_add_labels() -> Vec<String> {
    vec!["ADD".to_string()]
}

fn default_update_labels() -> Vec<String> {
    vec!["UPDATE".to_string()]
}

fn default_delete_labels() -> Vec<String> {
    vec!["DELETE".to_string()]
}

fn default_none_labels() -> Vec<String> {
    vec!["NONE".to_string(), "NOOP".to_string(), "SKIP".to_string()]
}

impl Default for AdjudicationLabels {
    fn default() -> Self {
        Self {
            add: default_add_labels(),
            update: default_update_labels(),
            delete: default_delete_labels(),
            none: default_none_labels(),
        }
    }
}

impl AdjudicationLabels {
    /// Map a model-produced word to a decision.
    pub fn resolve(&self, word: &str) -> Option<AdjudicationLabel> {
        let word = word.trim();
        let hit = |set: &[String]| set.iter().any(|l| l.eq_ignore_ascii_case(word));
        if hit(&self.none) {
            Some(AdjudicationLabel::None)
        } else if hit(&self.update) {
            Some(AdjudicationLabel::Update)
        } else if hit(&self.delete) {
            Some(AdjudicationLabel::Delete)
        } else if hit(&self.add) {
            Some(AdjudicationLabel::Add)
        } else {
            None
        }
    }

    /// The primary spelling of each decision, for prompt text.
    pub fn primary(&self, label: AdjudicationLabel) -> &str {
        let set = match label {
            AdjudicationLabel::Add => &self.add,
            AdjudicationLabel::Update => &self.update,
            AdjudicationLabel::Delete => &self.delete,
            AdjudicationLabel::None => &self.none,
        };
        set.first().map(String::as_str).unwrap_or(match label {
            AdjudicationLabel::Add => "ADD",
            AdjudicationLabel::Update => "UPDATE",
            AdjudicationLabel::Delete => "DELETE",
            AdjudicationLabel::None => "NONE",
        })
    }
}

/// Which vector index backs the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Brute-force cosine index, optionally snapshotted to JSON.
    #[default]
    Flat,
    /// Embedded LanceDB table.
    Lance,
}

/// Storage backend locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file for memory records, relative to the data dir.
    #[serde(default = "default_database_file")]
    pub database_file: String,

    #[serde(default)]
    pub vector_backend: VectorBackend,

    /// Vector index location, relative to the data dir.
    #[serde(default = "default_vector_path")]
    pub vector_path: PathBuf,

    /// Embedding width shared by the embedder and the vector store.
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

fn default_database_file() -> String {
    "mnemos.db".to_string()
}

fn default_vector_path() -> PathBuf {
    PathBuf::from("vectors")
}

fn default_embedding_dimension() -> usize {
    384
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            vector_backend: VectorBackend::default(),
            vector_path: default_vector_path(),
            embedding_dimension: default_embedding_dimension(),
        }
    }
}
