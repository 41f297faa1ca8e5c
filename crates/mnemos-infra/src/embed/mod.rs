//! Local embedding models.

pub mod fastembed;
