//! DashMap-backed metadata store.
//!
//! Nothing survives the process. Used where the SQLite file would be
//! overhead: unit-style pipeline tests and throwaway sessions.

use dashmap::DashMap;
use uuid::Uuid;

use mnemos_core::memory::metadata::{MetadataStore, require_user_scope};
use mnemos_types::error::RepositoryError;
use mnemos_types::memory::{Memory, MemoryFilter};

/// Concurrent in-memory implementation of `MetadataStore`.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: DashMap<Uuid, Memory>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all users.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    async fn get(&self, id: &Uuid) -> Result<Option<Memory>, RepositoryError> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, memory: &Memory) -> Result<(), RepositoryError> {
        self.records.insert(memory.id, memory.clone());
        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.records.remove(id).is_some())
    }

    async fn find(&self, filter: &MemoryFilter) -> Result<Vec<Memory>, RepositoryError> {
        require_user_scope(filter)?;
        let mut found: Vec<Memory> = self
            .records
            .iter()
            .filter(|entry| filter.matches(&entry.user_id, &entry.category))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn delete_all_for_user(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let mut removed = 0u64;
        self.records.retain(|_, memory| {
            let keep = memory.user_id != user_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
