//! BoxMetadataStore -- object-safe dynamic dispatch wrapper for MetadataStore.

use std::future::Future;
use std::pin::Pin;

use mnemos_types::error::RepositoryError;
use mnemos_types::memory::{Memory, MemoryFilter};
use uuid::Uuid;

use super::metadata::MetadataStore;

/// Object-safe version of [`MetadataStore`] with boxed futures.
pub trait MetadataStoreDyn: Send + Sync {
    fn get_boxed<'a>(
        &'a self,
        id: &'a Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Memory>, RepositoryError>> + Send + 'a>>;

    fn put_boxed<'a>(
        &'a self,
        memory: &'a Memory,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>>;

    fn delete_boxed<'a>(
        &'a self,
        id: &'a Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<bool, RepositoryError>> + Send + 'a>>;

    fn find_boxed<'a>(
        &'a self,
        filter: &'a MemoryFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Memory>, RepositoryError>> + Send + 'a>>;

    fn delete_all_for_user_boxed<'a>(
        &'a self,
        user_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, RepositoryError>> + Send + 'a>>;
}

/// Blanket implementation: any `MetadataStore` automatically implements `MetadataStoreDyn`.
impl<T: MetadataStore> MetadataStoreDyn for T {
    fn get_boxed<'a>(
        &'a self,
        id: &'a Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Memory>, RepositoryError>> + Send + 'a>> {
        Box::pin(self.get(id))
    }

    fn put_boxed<'a>(
        &'a self,
        memory: &'a Memory,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>> {
        Box::pin(self.put(memory))
    }

    fn delete_boxed<'a>(
        &'a self,
        id: &'a Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<bool, RepositoryError>> + Send + 'a>> {
        Box::pin(self.delete(id))
    }

    fn find_boxed<'a>(
        &'a self,
        filter: &'a MemoryFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Memory>, RepositoryError>> + Send + 'a>> {
        Box::pin(self.find(filter))
    }

    fn delete_all_for_user_boxed<'a>(
        &'a self,
        user_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, RepositoryError>> + Send + 'a>> {
        Box::pin(self.delete_all_for_user(user_id))
    }
}

/// Type-erased metadata store for runtime backend selection.
pub struct BoxMetadataStore {
    inner: Box<dyn MetadataStoreDyn + Send + Sync>,
}

impl BoxMetadataStore {
    /// Wrap a concrete `MetadataStore` in a type-erased box.
    pub fn new<T: MetadataStore + 'static>(store: T) -> Self {
        Self {
            inner: Box::new(store),
        }
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<Memory>, RepositoryError> {
        self.inner.get_boxed(id).await
    }

    pub async fn put(&self, memory: &Memory) -> Result<(), RepositoryError> {
        self.inner.put_boxed(memory).await
    }

    pub async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        self.inner.delete_boxed(id).await
    }

    pub async fn find(&self, filter: &MemoryFilter) -> Result<Vec<Memory>, RepositoryError> {
        self.inner.find_boxed(filter).await
    }

    pub async fn delete_all_for_user(&self, user_id: &str) -> Result<u64, RepositoryError> {
        self.inner.delete_all_for_user_boxed(user_id).await
    }
}
