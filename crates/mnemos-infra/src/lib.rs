//! Infrastructure layer for Mnemos.
//!
//! Contains implementations of the store and embedder ports defined in
//! `mnemos-core`: SQLite and in-process metadata stores, the flat cosine
//! vector index, the LanceDB vector table (feature `lance`), the fastembed
//! local embedder (feature `local-embeddings`), and the `config.toml` loader.

pub mod bootstrap;
pub mod config;
#[cfg(feature = "local-embeddings")]
pub mod embed;
pub mod inmem;
pub mod sqlite;
pub mod vector;
