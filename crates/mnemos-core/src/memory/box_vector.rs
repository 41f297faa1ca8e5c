//! BoxVectorStore -- object-safe dynamic dispatch wrapper for VectorStore.

use std::future::Future;
use std::pin::Pin;

use mnemos_types::error::RepositoryError;
use mnemos_types::memory::{MemoryFilter, VectorHit, VectorRecord};
use uuid::Uuid;

use super::vector::VectorStore;

/// Object-safe version of [`VectorStore`] with boxed futures.
pub trait VectorStoreDyn: Send + Sync {
    fn upsert_boxed<'a>(
        &'a self,
        record: &'a VectorRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>>;

    fn delete_boxed<'a>(
        &'a self,
        id: &'a Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<bool, RepositoryError>> + Send + 'a>>;

    fn search_boxed<'a>(
        &'a self,
        query: &'a [f32],
        top_k: usize,
        filter: &'a MemoryFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<VectorHit>, RepositoryError>> + Send + 'a>>;

    fn ids_for_user_boxed<'a>(
        &'a self,
        user_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send + 'a>>;

    fn delete_all_for_user_boxed<'a>(
        &'a self,
        user_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, RepositoryError>> + Send + 'a>>;

    fn dimension_dyn(&self) -> usize;
}

/// Blanket implementation: any `VectorStore` automatically implements `VectorStoreDyn`.
impl<T: VectorStore> VectorStoreDyn for T {
    fn upsert_boxed<'a>(
        &'a self,
        record: &'a VectorRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>> {
        Box::pin(self.upsert(record))
    }

    fn delete_boxed<'a>(
        &'a self,
        id: &'a Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<bool, RepositoryError>> + Send + 'a>> {
        Box::pin(self.delete(id))
    }

    fn search_boxed<'a>(
        &'a self,
        query: &'a [f32],
        top_k: usize,
        filter: &'a MemoryFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<VectorHit>, RepositoryError>> + Send + 'a>> {
        Box::pin(self.search(query, top_k, filter))
    }

    fn ids_for_user_boxed<'a>(
        &'a self,
        user_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send + 'a>> {
        Box::pin(self.ids_for_user(user_id))
    }

    fn delete_all_for_user_boxed<'a>(
        &'a self,
        user_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, RepositoryError>> + Send + 'a>> {
        Box::pin(self.delete_all_for_user(user_id))
    }

    fn dimension_dyn(&self) -> usize {
        self.dimension()
    }
}

/// Type-erased vector store for runtime backend selection.
pub struct BoxVectorStore {
    inner: Box<dyn VectorStoreDyn + Send + Sync>,
}

impl BoxVectorStore {
    /// Wrap a concrete `VectorStore` in a type-erased box.
    pub fn new<T: VectorStore + 'static>(store: T) -> Self {
        Self {
            inner: Box::new(store),
        }
    }

    pub async fn upsert(&self, record: &VectorRecord) -> Result<(), RepositoryError> {
        self.inner.upsert_boxed(record).await
    }

    pub async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        self.inner.delete_boxed(id).await
    }

    pub async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<VectorHit>, RepositoryError> {
        self.inner.search_boxed(query, top_k, filter).await
    }

    pub async fn ids_for_user(&self, user_id: &str) -> Result<Vec<Uuid>, RepositoryError> {
        self.inner.ids_for_user_boxed(user_id).await
    }

    pub async fn delete_all_for_user(&self, user_id: &str) -> Result<u64, RepositoryError> {
        self.inner.delete_all_for_user_boxed(user_id).await
    }

    /// Width of the stored vectors.
    pub fn dimension(&self) -> usize {
        self.inner.dimension_dyn()
    }
}
