//! Metadata store trait.
//!
//! The metadata store is the source of truth for memory records. Every
//! lookup is scoped by `user_id`; `find` rejects an unscoped filter.
//! Implementations (SQLite, in-process) live in mnemos-infra.

use mnemos_types::error::RepositoryError;
use mnemos_types::memory::{Memory, MemoryFilter};
use uuid::Uuid;

/// Trait for durable, id-keyed memory record storage.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait MetadataStore: Send + Sync {
    /// Fetch one record by id.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Memory>, RepositoryError>> + Send;

    /// Insert or replace the record stored under `memory.id`.
    fn put(
        &self,
        memory: &Memory,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete one record. Returns whether a record was removed.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// List records matching `filter`, oldest first.
    ///
    /// `filter.user_id` must be set.
    fn find(
        &self,
        filter: &MemoryFilter,
    ) -> impl std::future::Future<Output = Result<Vec<Memory>, RepositoryError>> + Send;

    /// Delete every record owned by `user_id`. Returns the count removed.
    fn delete_all_for_user(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}

/// Reject filters without a user scope.
pub fn require_user_scope(filter: &MemoryFilter) -> Result<&str, RepositoryError> {
    match filter.user_id.as_deref() {
        Some(user_id) if !user_id.trim().is_empty() => Ok(user_id),
        _ => Err(RepositoryError::Query(
            "metadata lookups must be scoped to a user_id".to_string(),
        )),
    }
}
