use thiserror::Error;
use uuid::Uuid;

use std::fmt;

use crate::llm::LlmError;

/// Errors from repository operations (used by store port definitions in mnemos-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from embedding providers.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding count mismatch: sent {expected} texts, got {actual} vectors")]
    CountMismatch { expected: usize, actual: usize },
}

/// The two stores a memory lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Metadata,
    Vector,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Metadata => write!(f, "metadata store"),
            StoreKind::Vector => write!(f, "vector store"),
        }
    }
}

/// Errors surfaced by the memory pipeline.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// LLM or embedding provider failed. Retryable.
    #[error("provider error: {0}")]
    Provider(String),

    /// An external call did not finish in time. Retryable.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Provider output could not be interpreted.
    #[error("parse error: {0}")]
    Parse(String),

    /// The metadata store and the vector store disagree about `id`.
    #[error("stores disagree about memory {id}: {detail}")]
    Consistency { id: Uuid, detail: String },

    /// One store accepted a write and the other did not.
    #[error(
        "partial write for memory {id}: {written} written, {failed} failed ({reason}); rolled back: {rolled_back}"
    )]
    PartialWrite {
        id: Uuid,
        written: StoreKind,
        failed: StoreKind,
        rolled_back: bool,
        reason: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MemoryError {
    /// Whether the failed operation may succeed if attempted again.
    pub fn is_transient(&self) -> bool {
        match self {
            MemoryError::Provider(_) | MemoryError::Timeout { .. } => true,
            MemoryError::Storage(RepositoryError::Connection) => true,
            _ => false,
        }
    }
}

impl From<LlmError> for MemoryError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Deserialization(msg) => MemoryError::Parse(msg),
            other => MemoryError::Provider(other.to_string()),
        }
    }
}

impl From<EmbedError> for MemoryError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Provider(msg) => MemoryError::Provider(msg),
            other => MemoryError::Configuration(other.to_string()),
        }
    }
}
