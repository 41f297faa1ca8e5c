//! The memory pipeline.
//!
//! Ports (`Embedder`, `MetadataStore`, `VectorStore`) and their `Box*`
//! wrappers, plus the pipeline stages built on them:
//! - `MemoryExtractor`: conversation -> candidate facts
//! - `MemoryReconciler`: candidate -> ADD / UPDATE / DELETE / skip
//! - `MemoryService`: orchestrates writes across both stores
//! - `Retriever`: query -> ranked memories

pub mod box_embedder;
pub mod box_metadata;
pub mod box_vector;
pub(crate) mod calls;
pub mod embedder;
pub mod extractor;
pub(crate) mod llm_json;
pub mod metadata;
pub mod reconciler;
pub mod retriever;
pub mod service;
pub mod vector;
