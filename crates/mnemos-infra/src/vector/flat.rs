//! Brute-force cosine vector index.
//!
//! Every search scores every vector that passes the filter, which is fine
//! for the few thousand memories a single deployment holds per user. The
//! index can be snapshotted to a JSON file after every mutation so it
//! survives restarts without a database.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use mnemos_core::memory::vector::{VectorStore, cosine_similarity};
use mnemos_types::error::RepositoryError;
use mnemos_types::memory::{MemoryFilter, VectorHit, VectorRecord};

/// File name of the snapshot inside the vector directory.
pub const SNAPSHOT_FILE: &str = "flat_index.json";

/// In-memory cosine index with an optional JSON snapshot.
pub struct FlatVectorIndex {
    dimension: usize,
    vectors: DashMap<Uuid, VectorRecord>,
    snapshot: Option<PathBuf>,
    /// Serializes mutate-then-snapshot sequences. A failed snapshot undoes
    /// the mutation so memory and disk never disagree.
    write_lock: Mutex<()>,
}

impl FlatVectorIndex {
    /// A purely in-memory index.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: DashMap::new(),
            snapshot: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Open an index persisted under `dir`, loading the snapshot if present.
    ///
    /// Creates the directory if it does not exist. A snapshot holding vectors
    /// of another width is rejected rather than silently mixed.
    pub async fn open(dir: &Path, dimension: usize) -> Result<Self, RepositoryError> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            RepositoryError::Query(format!("failed to create {}: {e}", dir.display()))
        })?;
        let path = dir.join(SNAPSHOT_FILE);

        let vectors = DashMap::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let records: Vec<VectorRecord> = serde_json::from_str(&content).map_err(|e| {
                    RepositoryError::Query(format!("corrupt snapshot {}: {e}", path.display()))
                })?;
                for record in records {
                    if record.vector.len() != dimension {
                        return Err(RepositoryError::Conflict(format!(
                            "snapshot {} holds {}-d vectors, expected {dimension}",
                            path.display(),
                            record.vector.len()
                        )));
                    }
                    vectors.insert(record.id, record);
                }
                tracing::debug!(count = vectors.len(), path = %path.display(), "Loaded vector snapshot");
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(RepositoryError::Query(format!(
                    "failed to read {}: {err}",
                    path.display()
                )));
            }
        }

        Ok(Self {
            dimension,
            vectors,
            snapshot: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    /// Number of indexed vectors across all users.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    fn check_dimension(&self, len: usize) -> Result<(), RepositoryError> {
        if len != self.dimension {
            return Err(RepositoryError::Query(format!(
                "vector has {len} dimensions, index expects {}",
                self.dimension
            )));
        }
        Ok(())
    }

    /// Write the whole index to the snapshot file, if one is configured.
    ///
    /// Writes to a sibling temp file and renames it over the snapshot.
    async fn persist(&self) -> Result<(), RepositoryError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        let mut records: Vec<VectorRecord> =
            self.vectors.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by_key(|record| record.id);
        let body = serde_json::to_string(&records)
            .map_err(|e| RepositoryError::Query(format!("failed to encode snapshot: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(|e| {
            RepositoryError::Query(format!("failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            RepositoryError::Query(format!("failed to replace {}: {e}", path.display()))
        })?;
        Ok(())
    }
}

impl VectorStore for FlatVectorIndex {
    async fn upsert(&self, record: &VectorRecord) -> Result<(), RepositoryError> {
        self.check_dimension(record.vector.len())?;
        let _guard = self.write_lock.lock().await;
        let previous = self.vectors.insert(record.id, record.clone());
        if let Err(e) = self.persist().await {
            match previous {
                Some(previous) => {
                    self.vectors.insert(record.id, previous);
                }
                None => {
                    self.vectors.remove(&record.id);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let Some((_, removed)) = self.vectors.remove(id) else {
            return Ok(false);
        };
        if let Err(e) = self.persist().await {
            self.vectors.insert(removed.id, removed);
            return Err(e);
        }
        Ok(true)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<VectorHit>, RepositoryError> {
        self.check_dimension(query.len())?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<VectorHit> = self
            .vectors
            .iter()
            .filter(|entry| filter.matches(&entry.user_id, &entry.category))
            .map(|entry| VectorHit {
                id: entry.id,
                score: cosine_similarity(query, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn ids_for_user(&self, user_id: &str) -> Result<Vec<Uuid>, RepositoryError> {
        let mut ids: Vec<Uuid> = self
            .vectors
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_all_for_user(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let ids: Vec<Uuid> = self
            .vectors
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.id)
            .collect();
        let removed: Vec<VectorRecord> = ids
            .iter()
            .filter_map(|id| self.vectors.remove(id).map(|(_, record)| record))
            .collect();
        if removed.is_empty() {
            return Ok(0);
        }
        if let Err(e) = self.persist().await {
            for record in removed {
                self.vectors.insert(record.id, record);
            }
            return Err(e);
        }
        Ok(removed.len() as u64)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
