//! MemoryService -- the write and read entry points of the memory pipeline.
//!
//! `add_memory` sequences extraction, reconciliation, and the per-candidate
//! writes to the metadata store and the vector store. The metadata store is
//! the source of truth: each candidate writes its record first and its vector
//! second, and a vector write that still fails after retries rolls the record
//! back. A candidate's write therefore lands in both stores or in neither;
//! the one exception (a failed rollback) is returned as an error.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use mnemos_types::config::MemoryConfig;
use mnemos_types::conversation::ConversationTurn;
use mnemos_types::error::{MemoryError, StoreKind};
use mnemos_types::memory::{
    CandidateFact, ConsistencyReport, Memory, MemoryFilter, MemoryOperation, RetrievedMemory,
};

use crate::llm::box_provider::BoxLlmProvider;

use super::box_embedder::BoxEmbedder;
use super::box_metadata::BoxMetadataStore;
use super::box_vector::BoxVectorStore;
use super::calls::{embed_one, retry_store_call, with_timeout};
use super::extractor::MemoryExtractor;
use super::reconciler::{MemoryReconciler, Reconciliation};
use super::retriever::Retriever;

/// What one `add_memory` call did.
#[derive(Debug, Default)]
pub struct AddMemoryReport {
    /// Memories created (ADD) or revised (UPDATE), in candidate order.
    pub stored: Vec<Memory>,
    /// Memories removed by DELETE decisions.
    pub deleted: Vec<Uuid>,
    /// Candidates that changed nothing.
    pub skipped: usize,
    /// Orphan vectors removed while reconciling.
    pub repaired: Vec<Uuid>,
    /// Soft failures: extraction, adjudication, and rolled-back writes.
    pub warnings: Vec<MemoryError>,
}

enum Applied {
    Stored(Memory),
    Deleted(Uuid),
    Unchanged,
}

/// Orchestrates extraction, reconciliation, writes, and retrieval over the
/// injected ports. Cheap to share behind an `Arc`; holds no mutable state.
pub struct MemoryService {
    llm: Arc<BoxLlmProvider>,
    embedder: Arc<BoxEmbedder>,
    metadata: Arc<BoxMetadataStore>,
    vectors: Arc<BoxVectorStore>,
    config: MemoryConfig,
}

impl MemoryService {
    /// Build a service. The embedder and the vector store must agree on the
    /// vector width.
    pub fn new(
        llm: Arc<BoxLlmProvider>,
        embedder: Arc<BoxEmbedder>,
        metadata: Arc<BoxMetadataStore>,
        vectors: Arc<BoxVectorStore>,
        config: MemoryConfig,
    ) -> Result<Self, MemoryError> {
        if embedder.dimension() != vectors.dimension() {
            return Err(MemoryError::InvalidInput(format!(
                "embedder '{}' produces {}-d vectors but the vector store holds {}-d vectors",
                embedder.model_name(),
                embedder.dimension(),
                vectors.dimension()
            )));
        }
        Ok(Self {
            llm,
            embedder,
            metadata,
            vectors,
            config: config.sanitized(),
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
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

    fn retriever(&self) -> Retriever<'_> {
        Retriever {
            embedder: &self.embedder,
            metadata: &self.metadata,
            vectors: &self.vectors,
            timeout_ms: self.config.call_timeout_ms,
        }
    }

    /// Extract, reconcile, and store memories from one exchange.
    ///
    /// Returns the memories written by ADD and UPDATE decisions. DELETE
    /// decisions take effect but are not part of the result.
    pub async fn add_memory(
        &self,
        recent: &[ConversationTurn],
        user_message: &str,
        assistant_message: &str,
        user_id: &str,
    ) -> Result<Vec<Memory>, MemoryError> {
        self.add_memory_with_report(recent, user_message, assistant_message, user_id)
            .await
            .map(|report| report.stored)
    }

    /// Like [`Self::add_memory`], with the full account of what happened.
    ///
    /// Soft failures are collected in `warnings`. The call fails only on
    /// invalid input or when a write could be neither completed nor rolled
    /// back; in that case every other candidate has still been applied.
    #[tracing::instrument(
        name = "add_memory",
        skip(self, recent, user_message, assistant_message),
        fields(user_id = %user_id, recent_turns = recent.len())
    )]
    pub async fn add_memory_with_report(
        &self,
        recent: &[ConversationTurn],
        user_message: &str,
        assistant_message: &str,
        user_id: &str,
    ) -> Result<AddMemoryReport, MemoryError> {
        validate_user_id(user_id)?;

        let mut report = AddMemoryReport::default();
        let current = ConversationTurn::new(user_message, assistant_message);
        let extraction = MemoryExtractor::extract(&self.llm, &self.config, recent, &current).await;
        report.warnings.extend(extraction.warning);
        if extraction.facts.is_empty() {
            return Ok(report);
        }

        let reconciliations = self.reconciler().reconcile_all(user_id, extraction.facts).await;
        self.remove_orphans(&reconciliations, &mut report).await;

        let mut unrecoverable = None;
        for reconciliation in reconciliations {
            let Reconciliation {
                candidate,
                embedding,
                operation,
                warning,
                ..
            } = reconciliation;
            report.warnings.extend(warning);

            match self.apply(user_id, &candidate, embedding, operation).await {
                Ok(Applied::Stored(memory)) => report.stored.push(memory),
                Ok(Applied::Deleted(id)) => report.deleted.push(id),
                Ok(Applied::Unchanged) => report.skipped += 1,
                Err(e @ MemoryError::PartialWrite { rolled_back: false, .. }) => {
                    tracing::error!(error = %e, "Write left the stores inconsistent");
                    if unrecoverable.is_none() {
                        unrecoverable = Some(e);
                    } else {
                        report.warnings.push(e);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, content = %candidate.content, "Candidate write failed");
                    report.warnings.push(e);
                }
            }
        }

        tracing::info!(
            stored = report.stored.len(),
            deleted = report.deleted.len(),
            skipped = report.skipped,
            repaired = report.repaired.len(),
            warnings = report.warnings.len(),
            "Memory update complete"
        );

        match unrecoverable {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Up to `top_k` memories most similar to `query` within `filter`.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<RetrievedMemory>, MemoryError> {
        self.retriever().retrieve(query, top_k, filter).await
    }

    /// Remove every memory owned by `user_id` from both stores.
    ///
    /// Returns the number of records removed. Running it again is a no-op.
    #[tracing::instrument(name = "delete_all_for_user", skip(self), fields(user_id = %user_id))]
    pub async fn delete_all_for_user(&self, user_id: &str) -> Result<u64, MemoryError> {
        validate_user_id(user_id)?;
        let timeout_ms = self.config.call_timeout_ms;

        let vectors = with_timeout(
            "vector delete_all",
            timeout_ms,
            self.vectors.delete_all_for_user(user_id),
        )
        .await?;
        let records = with_timeout(
            "metadata delete_all",
            timeout_ms,
            self.metadata.delete_all_for_user(user_id),
        )
        .await?;

        if vectors != records {
            tracing::warn!(vectors, records, "Store counts differed while deleting user memories");
        }
        tracing::info!(records, "Deleted all memories for user");
        Ok(records)
    }

    /// A user's memories, oldest first, optionally narrowed to one category.
    pub async fn memories_for_user(
        &self,
        user_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<Memory>, MemoryError> {
        validate_user_id(user_id)?;
        let mut filter = MemoryFilter::for_user(user_id);
        if let Some(category) = category {
            filter = filter.with_category(category);
        }
        with_timeout("metadata find", self.config.call_timeout_ms, self.metadata.find(&filter)).await
    }

    /// Compare the two stores for `user_id` without changing anything.
    pub async fn audit_consistency(&self, user_id: &str) -> Result<ConsistencyReport, MemoryError> {
        validate_user_id(user_id)?;
        let (_, report) = self.scan(user_id).await?;
        Ok(report)
    }

    /// Bring the two stores back into agreement for `user_id`.
    ///
    /// Orphan vectors are deleted. Records without a vector are re-indexed,
    /// re-embedding their content when the stored embedding is unusable.
    /// Returns what was found before repair.
    #[tracing::instrument(name = "repair_consistency", skip(self), fields(user_id = %user_id))]
    pub async fn repair_consistency(&self, user_id: &str) -> Result<ConsistencyReport, MemoryError> {
        validate_user_id(user_id)?;
        let (records, report) = self.scan(user_id).await?;
        let timeout_ms = self.config.call_timeout_ms;
        let attempts = self.config.write_attempts;

        for id in &report.orphan_vectors {
            let vectors = &*self.vectors;
            retry_store_call("vector delete", attempts, timeout_ms, move || vectors.delete(id)).await?;
            tracing::info!(memory_id = %id, "Removed orphan vector");
        }

        let orphan_records: HashSet<Uuid> = report.orphan_records.iter().copied().collect();
        for mut memory in records.into_iter().filter(|m| orphan_records.contains(&m.id)) {
            if memory.embedding.len() != self.embedder.dimension() {
                memory.embedding = embed_one(&self.embedder, &memory.content, timeout_ms).await?;
                with_timeout("metadata put", timeout_ms, self.metadata.put(&memory)).await?;
            }
            let record = memory.vector_record();
            let vectors = &*self.vectors;
            let record_ref = &record;
            retry_store_call("vector upsert", attempts, timeout_ms, move || {
                vectors.upsert(record_ref)
            })
            .await?;
            tracing::info!(memory_id = %memory.id, "Re-indexed memory");
        }

        Ok(report)
    }

    /// Load a user's records and vector ids and diff them.
    async fn scan(&self, user_id: &str) -> Result<(Vec<Memory>, ConsistencyReport), MemoryError> {
        let timeout_ms = self.config.call_timeout_ms;
        let records = with_timeout(
            "metadata find",
            timeout_ms,
            self.metadata.find(&MemoryFilter::for_user(user_id)),
        )
        .await?;
        let vector_ids: HashSet<Uuid> =
            with_timeout("vector ids", timeout_ms, self.vectors.ids_for_user(user_id))
                .await?
                .into_iter()
                .collect();
        let record_ids: HashSet<Uuid> = records.iter().map(|m| m.id).collect();

        let mut orphan_vectors: Vec<Uuid> = vector_ids.difference(&record_ids).copied().collect();
        let mut orphan_records: Vec<Uuid> = record_ids.difference(&vector_ids).copied().collect();
        orphan_vectors.sort();
        orphan_records.sort();

        Ok((
            records,
            ConsistencyReport {
                user_id: user_id.to_string(),
                orphan_vectors,
                orphan_records,
            },
        ))
    }

    /// Delete vectors that reconciliation found without a record.
    async fn remove_orphans(&self, reconciliations: &[Reconciliation], report: &mut AddMemoryReport) {
        let mut orphans: Vec<Uuid> = reconciliations
            .iter()
            .flat_map(|r| r.orphans.iter().copied())
            .collect();
        orphans.sort();
        orphans.dedup();

        let timeout_ms = self.config.call_timeout_ms;
        for id in orphans {
            // Re-check: the record may have been written since the search.
            match with_timeout("metadata get", timeout_ms, self.metadata.get(&id)).await {
                Ok(None) => {}
                Ok(Some(_)) => continue,
                Err(e) => {
                    report.warnings.push(e);
                    continue;
                }
            }
            match with_timeout("vector delete", timeout_ms, self.vectors.delete(&id)).await {
                Ok(_) => {
                    tracing::info!(memory_id = %id, "Removed orphan vector");
                    report.repaired.push(id);
                }
                Err(e) => {
                    tracing::warn!(memory_id = %id, error = %e, "Failed to remove orphan vector");
                    report.warnings.push(e);
                }
            }
        }
    }

    async fn apply(
        &self,
        user_id: &str,
        candidate: &CandidateFact,
        embedding: Vec<f32>,
        operation: MemoryOperation,
    ) -> Result<Applied, MemoryError> {
        match operation {
            MemoryOperation::Skip => Ok(Applied::Unchanged),
            MemoryOperation::Add => self.apply_add(user_id, candidate, embedding).await.map(Applied::Stored),
            MemoryOperation::Update { target_id } => self
                .apply_update(user_id, candidate, embedding, target_id)
                .await
                .map(Applied::Stored),
            MemoryOperation::Delete { target_id } => self.apply_delete(user_id, target_id).await,
        }
    }

    async fn apply_add(
        &self,
        user_id: &str,
        candidate: &CandidateFact,
        embedding: Vec<f32>,
    ) -> Result<Memory, MemoryError> {
        let mut memory = Memory::new(
            user_id,
            candidate.content.clone(),
            candidate.category.clone(),
            embedding,
        );
        memory.metadata = candidate.provenance_metadata();

        self.put_record(&memory).await?;
        if let Err(e) = self.upsert_vector(&memory).await {
            let rolled_back = self.rollback_remove(&memory.id).await;
            return Err(partial_write(memory.id, rolled_back, &e));
        }

        tracing::debug!(memory_id = %memory.id, "Added memory");
        Ok(memory)
    }

    async fn apply_update(
        &self,
        user_id: &str,
        candidate: &CandidateFact,
        embedding: Vec<f32>,
        target_id: Uuid,
    ) -> Result<Memory, MemoryError> {
        let Some(previous) = self.get_record(&target_id).await? else {
            tracing::warn!(
                target_id = %target_id,
                "Update target no longer exists; storing candidate as a new memory"
            );
            return self.apply_add(user_id, candidate, embedding).await;
        };
        ensure_owner(&previous, user_id)?;

        let mut updated = previous.clone();
        updated.revise(candidate.content.clone(), candidate.category.clone(), embedding);
        updated.metadata.extend(candidate.provenance_metadata());

        self.put_record(&updated).await?;
        if let Err(e) = self.upsert_vector(&updated).await {
            let rolled_back = self.rollback_restore(&previous).await;
            return Err(partial_write(updated.id, rolled_back, &e));
        }

        tracing::debug!(memory_id = %updated.id, "Updated memory");
        Ok(updated)
    }

    async fn apply_delete(&self, user_id: &str, target_id: Uuid) -> Result<Applied, MemoryError> {
        let Some(previous) = self.get_record(&target_id).await? else {
            tracing::debug!(target_id = %target_id, "Delete target already gone");
            return Ok(Applied::Unchanged);
        };
        ensure_owner(&previous, user_id)?;

        with_timeout(
            "metadata delete",
            self.config.call_timeout_ms,
            self.metadata.delete(&target_id),
        )
        .await?;

        let vectors = &*self.vectors;
        let id = &target_id;
        let removed = retry_store_call(
            "vector delete",
            self.config.write_attempts,
            self.config.call_timeout_ms,
            move || vectors.delete(id),
        )
        .await;
        if let Err(e) = removed {
            let rolled_back = self.rollback_restore(&previous).await;
            return Err(partial_write(target_id, rolled_back, &e));
        }

        tracing::debug!(memory_id = %target_id, "Deleted memory");
        Ok(Applied::Deleted(target_id))
    }

    async fn get_record(&self, id: &Uuid) -> Result<Option<Memory>, MemoryError> {
        with_timeout("metadata get", self.config.call_timeout_ms, self.metadata.get(id)).await
    }

    async fn put_record(&self, memory: &Memory) -> Result<(), MemoryError> {
        with_timeout("metadata put", self.config.call_timeout_ms, self.metadata.put(memory)).await
    }

    async fn upsert_vector(&self, memory: &Memory) -> Result<(), MemoryError> {
        let record = memory.vector_record();
        let vectors = &*self.vectors;
        let record = &record;
        retry_store_call(
            "vector upsert",
            self.config.write_attempts,
            self.config.call_timeout_ms,
            move || vectors.upsert(record),
        )
        .await
    }

    /// Undo a record insert. Returns whether the undo succeeded.
    async fn rollback_remove(&self, id: &Uuid) -> bool {
        let metadata = &*self.metadata;
        let result = retry_store_call(
            "metadata rollback",
            self.config.write_attempts,
            self.config.call_timeout_ms,
            move || metadata.delete(id),
        )
        .await;
        log_rollback(id, result.map(|_| ()))
    }

    /// Put back a record's previous version. Returns whether the undo succeeded.
    async fn rollback_restore(&self, previous: &Memory) -> bool {
        let metadata = &*self.metadata;
        let result = retry_store_call(
            "metadata rollback",
            self.config.write_attempts,
            self.config.call_timeout_ms,
            move || metadata.put(previous),
        )
        .await;
        log_rollback(&previous.id, result)
    }
}

fn log_rollback(id: &Uuid, result: Result<(), MemoryError>) -> bool {
    match result {
        Ok(()) => {
            tracing::warn!(memory_id = %id, "Vector write failed; metadata write rolled back");
            true
        }
        Err(e) => {
            tracing::error!(memory_id = %id, error = %e, "Rollback of metadata write failed");
            false
        }
    }
}

fn partial_write(id: Uuid, rolled_back: bool, cause: &MemoryError) -> MemoryError {
    MemoryError::PartialWrite {
        id,
        written: StoreKind::Metadata,
        failed: StoreKind::Vector,
        rolled_back,
        reason: cause.to_string(),
    }
}

fn validate_user_id(user_id: &str) -> Result<(), MemoryError> {
    if user_id.trim().is_empty() {
        return Err(MemoryError::InvalidInput("user_id must not be empty".into()));
    }
    Ok(())
}

fn ensure_owner(memory: &Memory, user_id: &str) -> Result<(), MemoryError> {
    if memory.user_id != user_id {
        return Err(MemoryError::Consistency {
            id: memory.id,
            detail: format!(
                "target belongs to '{}', not '{user_id}'",
                memory.user_id
            ),
        });
    }
    Ok(())
}
