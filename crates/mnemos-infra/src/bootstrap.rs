//! Wiring: open the configured stores and assemble a `MemoryService`.

use std::path::Path;
use std::sync::Arc;

use mnemos_core::llm::box_provider::BoxLlmProvider;
use mnemos_core::memory::box_embedder::BoxEmbedder;
use mnemos_core::memory::box_metadata::BoxMetadataStore;
use mnemos_core::memory::box_vector::BoxVectorStore;
use mnemos_core::memory::service::MemoryService;
use mnemos_types::config::{MnemosConfig, StorageConfig, VectorBackend};
use mnemos_types::error::{MemoryError, RepositoryError};

use crate::sqlite::metadata::SqliteMetadataStore;
use crate::sqlite::pool::{DatabasePool, database_url};
use crate::vector::flat::FlatVectorIndex;

/// The two stores a service writes to.
pub struct Stores {
    pub metadata: BoxMetadataStore,
    pub vectors: BoxVectorStore,
}

/// Open the SQLite metadata store and the configured vector index under `data_dir`.
pub async fn open_stores(data_dir: &Path, storage: &StorageConfig) -> Result<Stores, MemoryError> {
    tokio::fs::create_dir_all(data_dir).await.map_err(|e| {
        MemoryError::Configuration(format!("cannot create {}: {e}", data_dir.display()))
    })?;

    let url = database_url(data_dir, &storage.database_file);
    let pool = DatabasePool::new(&url).await.map_err(|e| {
        tracing::error!(url = %url, "Failed to open metadata database: {e}");
        RepositoryError::Connection
    })?;
    let metadata = BoxMetadataStore::new(SqliteMetadataStore::new(pool));

    let vector_dir = data_dir.join(&storage.vector_path);
    let vectors = match storage.vector_backend {
        VectorBackend::Flat => BoxVectorStore::new(
            FlatVectorIndex::open(&vector_dir, storage.embedding_dimension).await?,
        ),
        VectorBackend::Lance => open_lance(&vector_dir, storage.embedding_dimension).await?,
    };

    tracing::info!(
        data_dir = %data_dir.display(),
        backend = ?storage.vector_backend,
        dimension = storage.embedding_dimension,
        "Opened memory stores"
    );
    Ok(Stores { metadata, vectors })
}

#[cfg(feature = "lance")]
async fn open_lance(dir: &Path, dimension: usize) -> Result<BoxVectorStore, MemoryError> {
    let index = crate::vector::lance::LanceVectorIndex::open(dir, dimension).await?;
    Ok(BoxVectorStore::new(index))
}

#[cfg(not(feature = "lance"))]
async fn open_lance(_dir: &Path, _dimension: usize) -> Result<BoxVectorStore, MemoryError> {
    Err(MemoryError::Configuration(
        "vector_backend = \"lance\" requires the 'lance' feature".to_string(),
    ))
}

/// Open the configured stores and build a service around `llm` and `embedder`.
pub async fn open_service(
    data_dir: &Path,
    config: &MnemosConfig,
    llm: BoxLlmProvider,
    embedder: BoxEmbedder,
) -> Result<MemoryService, MemoryError> {
    let stores = open_stores(data_dir, &config.storage).await?;
    MemoryService::new(
        Arc::new(llm),
        Arc::new(embedder),
        Arc::new(stores.metadata),
        Arc::new(stores.vectors),
        config.memory.clone(),
    )
}
