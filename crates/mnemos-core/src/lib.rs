//! Memory pipeline logic and capability port definitions for Mnemos.
//!
//! This crate defines the "ports" (LLM, embedder, metadata store, vector
//! store) that the infrastructure layer implements, and the pipeline built on
//! them: extraction, reconciliation, the `MemoryService` orchestrator, and
//! retrieval. It depends only on `mnemos-types` -- never on `mnemos-infra` or
//! any database/IO crate.

pub mod llm;
pub mod memory;

#[cfg(test)]
pub(crate) mod testing;
