//! Semantic retrieval of stored memories.
//!
//! Embeds the query, asks the vector store for the top-k hits, and hydrates
//! each hit from the metadata store. Hits whose record is missing or no longer
//! matches the filter are dropped and reported; a failing store fails the call.

use std::cmp::Ordering;

use uuid::Uuid;

use mnemos_types::error::MemoryError;
use mnemos_types::memory::{MemoryFilter, RetrievedMemory};

use super::box_embedder::BoxEmbedder;
use super::box_metadata::BoxMetadataStore;
use super::box_vector::BoxVectorStore;
use super::calls::{embed_one, with_timeout};

/// Ranked results plus the hits that had to be dropped.
#[derive(Debug, Default)]
pub struct RetrievalReport {
    pub memories: Vec<RetrievedMemory>,
    pub dropped: Vec<Uuid>,
}

pub struct Retriever<'a> {
    pub embedder: &'a BoxEmbedder,
    pub metadata: &'a BoxMetadataStore,
    pub vectors: &'a BoxVectorStore,
    pub timeout_ms: u64,
}

impl Retriever<'_> {
    /// Up to `top_k` memories most similar to `query`, best first.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<RetrievedMemory>, MemoryError> {
        self.retrieve_with_report(query, top_k, filter)
            .await
            .map(|report| report.memories)
    }

    /// Like [`Self::retrieve`], also listing hits dropped during hydration.
    ///
    /// Results are ordered by descending score, ties broken by the most
    /// recent `updated_at`.
    #[tracing::instrument(
        name = "retrieve_memories",
        skip(self, query, filter),
        fields(user_id = ?filter.user_id)
    )]
    pub async fn retrieve_with_report(
        &self,
        query: &str,
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<RetrievalReport, MemoryError> {
        if top_k == 0 {
            return Err(MemoryError::InvalidInput("top_k must be at least 1".into()));
        }
        if query.trim().is_empty() {
            return Err(MemoryError::InvalidInput("query must not be blank".into()));
        }

        let embedding = embed_one(self.embedder, query, self.timeout_ms).await?;
        let hits = with_timeout(
            "vector search",
            self.timeout_ms,
            self.vectors.search(&embedding, top_k, filter),
        )
        .await?;

        let mut report = RetrievalReport::default();
        for hit in hits {
            let record = with_timeout("metadata get", self.timeout_ms, self.metadata.get(&hit.id)).await;
            match record {
                Ok(Some(memory)) if filter.matches(&memory.user_id, &memory.category) => {
                    report.memories.push(RetrievedMemory {
                        memory,
                        score: hit.score,
                    });
                }
                Ok(Some(memory)) => {
                    tracing::warn!(
                        memory_id = %hit.id,
                        owner = %memory.user_id,
                        "Hydrated record falls outside the filter; dropping hit"
                    );
                    report.dropped.push(hit.id);
                }
                Ok(None) => {
                    tracing::warn!(memory_id = %hit.id, "Vector hit has no metadata record; dropping hit");
                    report.dropped.push(hit.id);
                }
                Err(e) => {
                    tracing::warn!(memory_id = %hit.id, error = %e, "Failed to hydrate hit");
                    return Err(e);
                }
            }
        }

        report.memories.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.memory.updated_at.cmp(&a.memory.updated_at))
        });
        report.memories.truncate(top_k);

        tracing::debug!(
            returned = report.memories.len(),
            dropped = report.dropped.len(),
            "Retrieval complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use mnemos_types::error::RepositoryError;
    use mnemos_types::memory::Memory;

    use super::*;
    use crate::testing::{RecordingMetadataStore, RecordingVectorStore, TableEmbedder, seed_both};

    struct Fixture {
        embedder: BoxEmbedder,
        metadata_handle: RecordingMetadataStore,
        vectors_handle: RecordingVectorStore,
        metadata: BoxMetadataStore,
        vectors: BoxVectorStore,
    }

    impl Fixture {
        fn new() -> Self {
            let metadata_handle = RecordingMetadataStore::default();
            let vectors_handle = RecordingVectorStore::new(2);
            Self {
                embedder: BoxEmbedder::new(
                    TableEmbedder::new(2)
                        .with("food", vec![1.0, 0.0])
                        .with("work", vec![0.0, 1.0]),
                ),
                metadata: BoxMetadataStore::new(metadata_handle.clone()),
                vectors: BoxVectorStore::new(vectors_handle.clone()),
                metadata_handle,
                vectors_handle,
            }
        }

        fn retriever(&self) -> Retriever<'_> {
            Retriever {
                embedder: &self.embedder,
                metadata: &self.metadata,
                vectors: &self.vectors,
                timeout_ms: 1_000,
            }
        }

        fn store(&self, user: &str, content: &str, category: &str, vector: Vec<f32>) -> Memory {
            let memory = Memory::new(user, content, category, vector);
            seed_both(&self.metadata_handle, &self.vectors_handle, &memory);
            memory
        }
    }

    #[tokio::test]
    async fn test_rejects_zero_top_k_and_blank_query() {
        let fixture = Fixture::new();
        let filter = MemoryFilter::for_user("u1");
        assert!(matches!(
            fixture.retriever().retrieve("food", 0, &filter).await,
            Err(MemoryError::InvalidInput(_))
        ));
        assert!(matches!(
            fixture.retriever().retrieve("   ", 3, &filter).await,
            Err(MemoryError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_results_sorted_and_limited() {
        let fixture = Fixture::new();
        let pasta = fixture.store("u1", "Loves pasta", "food", vec![1.0, 0.1]);
        fixture.store("u1", "Is a nurse", "work", vec![0.0, 1.0]);
        let sushi = fixture.store("u1", "Likes sushi", "food", vec![1.0, 0.5]);

        let results = fixture
            .retriever()
            .retrieve("food", 2, &MemoryFilter::for_user("u1"))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory.id, pasta.id);
        assert_eq!(results[1].memory.id, sushi.id);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_top_k_above_count_returns_everything() {
        let fixture = Fixture::new();
        fixture.store("u1", "Loves pasta", "food", vec![1.0, 0.1]);
        fixture.store("u1", "Is a nurse", "work", vec![0.0, 1.0]);

        let results = fixture
            .retriever()
            .retrieve("food", 50, &MemoryFilter::for_user("u1"))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_ties_prefer_recently_updated() {
        let fixture = Fixture::new();
        let mut older = Memory::new("u1", "Likes pizza", "food", vec![1.0, 0.0]);
        older.updated_at = older.updated_at - Duration::days(2);
        seed_both(&fixture.metadata_handle, &fixture.vectors_handle, &older);
        let newer = fixture.store("u1", "Likes pizza a lot", "food", vec![1.0, 0.0]);

        let results = fixture
            .retriever()
            .retrieve("food", 5, &MemoryFilter::for_user("u1"))
            .await
            .unwrap();
        assert_eq!(results[0].memory.id, newer.id);
        assert_eq!(results[1].memory.id, older.id);
    }

    #[tokio::test]
    async fn test_missing_records_are_dropped_and_reported() {
        let fixture = Fixture::new();
        let kept = fixture.store("u1", "Loves pasta", "food", vec![1.0, 0.0]);
        let orphan = Memory::new("u1", "Ghost", "food", vec![1.0, 0.2]);
        fixture.vectors_handle.seed(orphan.vector_record());

        let report = fixture
            .retriever()
            .retrieve_with_report("food", 5, &MemoryFilter::for_user("u1"))
            .await
            .unwrap();

        assert_eq!(report.memories.len(), 1);
        assert_eq!(report.memories[0].memory.id, kept.id);
        assert_eq!(report.dropped, vec![orphan.id]);
    }

    #[tokio::test]
    async fn test_filter_scopes_user_and_category() {
        let fixture = Fixture::new();
        fixture.store("u1", "Loves pasta", "food", vec![1.0, 0.0]);
        fixture.store("u2", "Loves pizza", "food", vec![1.0, 0.0]);
        fixture.store("u1", "Is a nurse", "work", vec![0.7, 0.7]);

        let results = fixture
            .retriever()
            .retrieve("food", 10, &MemoryFilter::for_user("u1").with_category("food"))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.content, "Loves pasta");
    }

    #[tokio::test]
    async fn test_search_failure_propagates() {
        let fixture = Fixture::new();
        fixture.vectors_handle.fail_searches(true);
        let result = fixture
            .retriever()
            .retrieve("food", 3, &MemoryFilter::for_user("u1"))
            .await;
        assert!(matches!(result, Err(MemoryError::Storage(_))));
    }

    #[tokio::test]
    async fn test_unreachable_metadata_store_fails_the_call() {
        let fixture = Fixture::new();
        fixture.store("u1", "Loves pasta", "food", vec![1.0, 0.0]);
        fixture.store("u1", "Likes sushi", "food", vec![1.0, 0.3]);
        fixture.store("u1", "Is a nurse", "work", vec![0.0, 1.0]);
        fixture.metadata_handle.fail_gets(true);

        let result = fixture
            .retriever()
            .retrieve("food", 3, &MemoryFilter::for_user("u1"))
            .await;
        assert!(matches!(
            result,
            Err(MemoryError::Storage(RepositoryError::Connection))
        ));
    }

    #[tokio::test]
    async fn test_embed_failure_propagates_as_provider_error() {
        let fixture = Fixture::new();
        let result = fixture
            .retriever()
            .retrieve("unknown query", 3, &MemoryFilter::for_user("u1"))
            .await;
        assert!(matches!(result, Err(MemoryError::Provider(_))));
    }
}
