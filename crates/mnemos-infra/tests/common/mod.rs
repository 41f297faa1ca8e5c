//! Shared doubles for the end-to-end pipeline tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use mnemos_core::llm::provider::LlmProvider;
use mnemos_core::memory::embedder::Embedder;
use mnemos_types::error::EmbedError;
use mnemos_types::llm::{CompletionRequest, CompletionResponse, LlmError, Usage};

pub const DIM: usize = 4;

/// LLM that answers extraction and adjudication prompts from two queues.
#[derive(Default)]
pub struct QueuedLlm {
    extractions: Mutex<VecDeque<String>>,
    decisions: Mutex<VecDeque<String>>,
    adjudication_prompts: Arc<Mutex<Vec<String>>>,
}

impl QueuedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extraction(self, reply: &str) -> Self {
        self.extractions.lock().unwrap().push_back(reply.to_string());
        self
    }

    pub fn decision(self, reply: &str) -> Self {
        self.decisions.lock().unwrap().push_back(reply.to_string());
        self
    }

    /// Handle on the adjudication prompts, readable after the LLM is boxed.
    pub fn adjudication_prompts(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.adjudication_prompts)
    }
}

fn is_extraction(request: &CompletionRequest) -> bool {
    request
        .system
        .as_deref()
        .is_some_and(|s| s.starts_with("You are a memory extraction engine"))
}

impl LlmProvider for QueuedLlm {
    fn name(&self) -> &str {
        "queued"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let reply = if is_extraction(request) {
            self.extractions.lock().unwrap().pop_front()
        } else {
            if let Some(message) = request.messages.first() {
                self.adjudication_prompts.lock().unwrap().push(message.content.clone());
            }
            self.decisions.lock().unwrap().pop_front()
        };
        let content = reply.ok_or_else(|| LlmError::Provider {
            message: "no scripted reply left".to_string(),
        })?;
        Ok(CompletionResponse {
            id: "queued".to_string(),
            content,
            model: "queued".to_string(),
            usage: Usage::default(),
        })
    }
}

/// Embedder returning fixed vectors per text, `[0, 0, 0, 1]` otherwise.
pub struct FixedEmbedder {
    table: HashMap<String, Vec<f32>>,
}

impl FixedEmbedder {
    pub fn new(entries: &[(&str, [f32; DIM])]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.to_vec()))
                .collect(),
        }
    }
}

impl Embedder for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|text| {
                self.table
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0, 0.0, 0.0, 1.0])
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

pub const LIKES_ITALIAN: &str = "The user likes Italian food";
pub const LOVES_PASTA: &str = "The user loves Italian food, especially pasta";
pub const EATS_MEAT: &str = "The user eats meat";
pub const VEGETARIAN: &str = "The user is vegetarian";
pub const FOOD_QUERY: &str = "What food does the user like?";

/// Vectors chosen so that the pairs that should meet clear the 0.85 threshold.
pub fn food_embedder() -> FixedEmbedder {
    FixedEmbedder::new(&[
        (LIKES_ITALIAN, [1.0, 0.0, 0.0, 0.0]),
        (LOVES_PASTA, [0.92, 0.391_918_36, 0.0, 0.0]),
        (FOOD_QUERY, [0.95, 0.312_249_9, 0.0, 0.0]),
        (EATS_MEAT, [0.0, 0.0, 1.0, 0.0]),
        (VEGETARIAN, [0.0, 0.0, 0.95, 0.312_249_9]),
    ])
}

pub fn extraction_of(facts: &[(&str, &str)]) -> String {
    let memories: Vec<serde_json::Value> = facts
        .iter()
        .map(|(content, kind)| serde_json::json!({"content": content, "type": kind, "confidence": 0.9}))
        .collect();
    serde_json::json!({ "memories": memories }).to_string()
}
