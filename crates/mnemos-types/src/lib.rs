//! Shared domain types for Mnemos.
//!
//! This crate contains the core domain types used across the memory pipeline:
//! Memory, CandidateFact, MemoryOperation, the LLM request/response shapes,
//! configuration, and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod memory;
