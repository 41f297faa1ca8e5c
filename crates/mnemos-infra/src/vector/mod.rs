//! Vector index adapters for memory embeddings.
//!
//! The flat cosine index is always available; the LanceDB table is behind
//! the `lance` feature.

pub mod flat;
#[cfg(feature = "lance")]
pub mod lance;
