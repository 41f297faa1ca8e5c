//! LanceDB-backed vector index.
//!
//! All users share one `memory_vectors` table; `user_id` and `category`
//! are stored next to the vector and pushed down as SQL predicates.
//!
//! Arrow versions MUST match lancedb's transitive dependency (57.3 for lancedb 0.26).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures_util::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use uuid::Uuid;

use mnemos_core::memory::vector::VectorStore;
use mnemos_types::error::RepositoryError;
use mnemos_types::memory::{MemoryFilter, VectorHit, VectorRecord};

/// Name of the shared vector table.
pub const TABLE_NAME: &str = "memory_vectors";

/// Arrow schema for the vector table at the given embedding width.
pub fn memory_vector_schema(dimension: usize) -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("user_id", DataType::Utf8, false),
        Field::new("category", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            false,
        ),
    ])
}

/// Vector index stored in an embedded LanceDB database.
pub struct LanceVectorIndex {
    table: lancedb::Table,
    dimension: usize,
    base_path: PathBuf,
}

impl LanceVectorIndex {
    /// Open or create the index at `base_path`.
    ///
    /// Creates the directory and the table if needed. An existing table with
    /// a different vector width is rejected.
    pub async fn open(base_path: &Path, dimension: usize) -> Result<Self, RepositoryError> {
        std::fs::create_dir_all(base_path).map_err(|e| {
            RepositoryError::Query(format!("failed to create {}: {e}", base_path.display()))
        })?;

        let uri = base_path.to_str().ok_or_else(|| {
            RepositoryError::Query(format!(
                "path contains invalid UTF-8: {}",
                base_path.display()
            ))
        })?;

        let db = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|_| RepositoryError::Connection)?;

        let schema = Arc::new(memory_vector_schema(dimension));
        let table = match db.open_table(TABLE_NAME).execute().await {
            Ok(table) => table,
            Err(lancedb::Error::TableNotFound { .. }) => db
                .create_empty_table(TABLE_NAME, schema.clone())
                .execute()
                .await
                .map_err(|e| RepositoryError::Query(format!("failed to create table: {e}")))?,
            Err(e) => return Err(RepositoryError::Query(format!("failed to open table: {e}"))),
        };

        let existing = table
            .schema()
            .await
            .map_err(|e| RepositoryError::Query(format!("failed to read table schema: {e}")))?;
        let existing_vector = existing.field_with_name("vector").map(|f| f.data_type().clone());
        let expected_vector = schema.field_with_name("vector").map(|f| f.data_type().clone());
        if existing_vector.ok() != expected_vector.ok() {
            return Err(RepositoryError::Conflict(format!(
                "table {TABLE_NAME} at {} was created for another embedding width (expected {dimension})",
                base_path.display()
            )));
        }

        Ok(Self {
            table,
            dimension,
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn build_record_batch(&self, record: &VectorRecord) -> Result<RecordBatch, RepositoryError> {
        let schema = Arc::new(memory_vector_schema(self.dimension));

        let values = Float32Array::from(record.vector.clone());
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array =
            FixedSizeListArray::try_new(field, self.dimension as i32, Arc::new(values), None)
                .map_err(|e| RepositoryError::Query(format!("invalid vector: {e}")))?;

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![record.id.to_string()])),
                Arc::new(StringArray::from(vec![record.user_id.clone()])),
                Arc::new(StringArray::from(vec![record.category.clone()])),
                Arc::new(vector_array),
            ],
        )
        .map_err(|e| RepositoryError::Query(format!("failed to build record batch: {e}")))
    }

    async fn count_matching(&self, predicate: &str) -> Result<usize, RepositoryError> {
        self.table
            .count_rows(Some(predicate.to_string()))
            .await
            .map_err(|e| RepositoryError::Query(format!("vector count failed: {e}")))
    }

    /// Ids of every row matching a SQL predicate.
    ///
    /// Plain queries are capped by default, so the limit is set to the
    /// matching row count.
    async fn ids_matching(&self, predicate: String) -> Result<Vec<Uuid>, RepositoryError> {
        let total = self.count_matching(&predicate).await?;
        if total == 0 {
            return Ok(Vec::new());
        }
        let results = self
            .table
            .query()
            .only_if(predicate)
            .select(Select::columns(&["id"]))
            .limit(total)
            .execute()
            .await
            .map_err(|e| RepositoryError::Query(format!("vector query failed: {e}")))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| RepositoryError::Query(format!("failed to collect results: {e}")))?;

        let mut ids = Vec::new();
        for batch in &batches {
            ids.extend(ids_in_batch(batch)?.into_iter().map(|(_, id)| id));
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete_where(&self, predicate: &str) -> Result<(), RepositoryError> {
        self.table
            .delete(predicate)
            .await
            .map_err(|e| RepositoryError::Query(format!("vector delete failed: {e}")))?;
        Ok(())
    }
}

/// Quote a string literal for a LanceDB SQL predicate.
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn filter_predicate(filter: &MemoryFilter) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(user_id) = &filter.user_id {
        clauses.push(format!("user_id = {}", sql_literal(user_id)));
    }
    if let Some(category) = &filter.category {
        clauses.push(format!("category = {}", sql_literal(category)));
    }
    (!clauses.is_empty()).then(|| clauses.join(" AND "))
}

/// Parsed ids paired with their row index; rows with a bad id are skipped.
fn ids_in_batch(batch: &RecordBatch) -> Result<Vec<(usize, Uuid)>, RepositoryError> {
    if batch.num_rows() == 0 {
        return Ok(Vec::new());
    }
    let id_col = batch
        .column_by_name("id")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| RepositoryError::Query("id column missing from result".to_string()))?;

    let mut ids = Vec::with_capacity(id_col.len());
    for i in 0..id_col.len() {
        match Uuid::parse_str(id_col.value(i)) {
            Ok(id) => ids.push((i, id)),
            Err(e) => tracing::warn!(raw = id_col.value(i), "Skipping vector row with bad id: {e}"),
        }
    }
    Ok(ids)
}

impl VectorStore for LanceVectorIndex {
    async fn upsert(&self, record: &VectorRecord) -> Result<(), RepositoryError> {
        if record.vector.len() != self.dimension {
            return Err(RepositoryError::Query(format!(
                "vector has {} dimensions, index expects {}",
                record.vector.len(),
                self.dimension
            )));
        }

        let batch = self.build_record_batch(record)?;
        let schema = batch.schema();

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        // Replace-or-insert in a single commit.
        let mut merge = self.table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| RepositoryError::Query(format!("failed to upsert vector: {e}")))?;

        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let predicate = format!("id = '{id}'");
        let existed = self.count_matching(&predicate).await? > 0;
        if existed {
            self.delete_where(&predicate).await?;
        }
        Ok(existed)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<VectorHit>, RepositoryError> {
        if query.len() != self.dimension {
            return Err(RepositoryError::Query(format!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.dimension
            )));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut search = self
            .table
            .vector_search(query)
            .map_err(|e| RepositoryError::Query(format!("vector search setup failed: {e}")))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(top_k);
        if let Some(predicate) = filter_predicate(filter) {
            search = search.only_if(predicate);
        }

        let results = search
            .execute()
            .await
            .map_err(|e| RepositoryError::Query(format!("vector search failed: {e}")))?;
        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| RepositoryError::Query(format!("failed to collect results: {e}")))?;

        let mut hits = Vec::new();
        for batch in &batches {
            let ids = ids_in_batch(batch)?;
            // The _distance column is added by LanceDB vector search
            let distance_col = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| RepositoryError::Query("_distance column missing".to_string()))?;

            for (row, id) in ids {
                hits.push(VectorHit {
                    id,
                    score: 1.0 - distance_col.value(row),
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn ids_for_user(&self, user_id: &str) -> Result<Vec<Uuid>, RepositoryError> {
        self.ids_matching(format!("user_id = {}", sql_literal(user_id)))
            .await
    }

    async fn delete_all_for_user(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let predicate = format!("user_id = {}", sql_literal(user_id));
        let count = self.count_matching(&predicate).await? as u64;
        if count > 0 {
            self.delete_where(&predicate).await?;
        }
        Ok(count)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
