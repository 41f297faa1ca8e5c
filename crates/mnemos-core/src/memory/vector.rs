//! Vector store trait.
//!
//! Defines the interface for nearest-neighbor search over memory embeddings.
//! Implementations (flat cosine index, LanceDB) live in mnemos-infra.

use mnemos_types::error::RepositoryError;
use mnemos_types::memory::{MemoryFilter, VectorHit, VectorRecord};
use uuid::Uuid;

/// Trait for vector-indexed memory storage with similarity search.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait VectorStore: Send + Sync {
    /// Insert or replace the vector stored under `record.id`.
    fn upsert(
        &self,
        record: &VectorRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete one vector. Returns whether a vector was removed.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Top-k nearest neighbors of `query` that match `filter`.
    ///
    /// Scores are cosine similarity in `[-1, 1]`, sorted descending.
    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &MemoryFilter,
    ) -> impl std::future::Future<Output = Result<Vec<VectorHit>, RepositoryError>> + Send;

    /// Ids of every vector owned by `user_id`.
    fn ids_for_user(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send;

    /// Delete every vector owned by `user_id`. Returns the count removed.
    fn delete_all_for_user(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Width of the stored vectors.
    fn dimension(&self) -> usize;
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or a zero-magnitude input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
