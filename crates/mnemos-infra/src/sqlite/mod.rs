//! SQLite storage layer.
//!
//! The metadata store backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod metadata;
pub mod pool;
