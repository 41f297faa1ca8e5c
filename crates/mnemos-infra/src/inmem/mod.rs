//! In-process stores for tests, demos and ephemeral sessions.

pub mod metadata;
