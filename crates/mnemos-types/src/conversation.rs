//! Conversation turn types consumed by the memory extractor.

use serde::{Deserialize, Serialize};

/// One user/assistant exchange.
///
/// Recent history is passed to the pipeline oldest-first; the current turn is
/// passed separately and always treated as the newest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

impl ConversationTurn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }

    /// True when both sides are empty or whitespace-only.
    pub fn is_blank(&self) -> bool {
        self.user.trim().is_empty() && self.assistant.trim().is_empty()
    }
}
