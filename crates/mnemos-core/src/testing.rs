//! Hand-written port doubles for unit tests.
//!
//! Stores are cheap `Clone` handles over shared state so a test can keep one
//! copy for inspection after boxing the other into the service.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mnemos_types::error::{EmbedError, RepositoryError};
use mnemos_types::llm::{CompletionRequest, CompletionResponse, LlmError, Usage};
use mnemos_types::memory::{Memory, MemoryFilter, VectorHit, VectorRecord};
use uuid::Uuid;

use crate::llm::provider::LlmProvider;
use crate::memory::embedder::Embedder;
use crate::memory::extractor::EXTRACTION_SYSTEM_PROMPT;
use crate::memory::metadata::{MetadataStore, require_user_scope};
use crate::memory::vector::{VectorStore, cosine_similarity};

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync>;

/// LLM double driven by a closure. Every request is recorded.
pub struct ScriptedLlm {
    responder: Responder,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedLlm {
    pub fn new(
        responder: impl Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replies in order; fails once the queue is empty.
    pub fn queue(responses: Vec<Result<String, LlmError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::new(move |_| {
            queue.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(LlmError::Provider {
                    message: "script exhausted".into(),
                })
            })
        })
    }

    /// Fixed reply for extraction requests, `adjudicate` for everything else.
    pub fn routed(
        extraction: impl Into<String>,
        adjudicate: impl Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        let extraction = extraction.into();
        Self::new(move |request| {
            if is_extraction(request) {
                Ok(extraction.clone())
            } else {
                adjudicate(request)
            }
        })
    }

    pub fn call_log(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        self.calls.clone()
    }
}

pub fn is_extraction(request: &CompletionRequest) -> bool {
    request.system.as_deref() == Some(EXTRACTION_SYSTEM_PROMPT)
}

impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.lock().unwrap().push(request.clone());
        let content = (self.responder)(request)?;
        Ok(CompletionResponse {
            id: format!("scripted-{}", Uuid::now_v7()),
            content,
            model: "scripted".into(),
            usage: Usage::default(),
        })
    }
}

/// Embedder double backed by a text -> vector table.
pub struct TableEmbedder {
    dimension: usize,
    table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            table: HashMap::new(),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.table.insert(text.to_string(), vector);
        self
    }
}

impl Embedder for TableEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts
            .iter()
            .map(|text| {
                self.table
                    .get(text)
                    .cloned()
                    .ok_or_else(|| EmbedError::Provider(format!("no embedding for '{text}'")))
            })
            .collect()
    }

    fn model_name(&self) -> &str {
        "table"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Consume one pending injected fault, if any.
fn take_fault(pending: &AtomicUsize) -> bool {
    pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected() -> RepositoryError {
    RepositoryError::Query("injected failure".into())
}

#[derive(Default)]
pub struct MetadataState {
    records: Mutex<HashMap<Uuid, Memory>>,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    fail_puts: AtomicUsize,
    fail_deletes: AtomicUsize,
    fail_gets: AtomicBool,
}

/// Metadata store double that counts writes and can fail on demand.
#[derive(Clone, Default)]
pub struct RecordingMetadataStore {
    state: Arc<MetadataState>,
}

impl RecordingMetadataStore {
    /// Seed a record without counting it as a write.
    pub fn seed(&self, memory: Memory) {
        self.state.records.lock().unwrap().insert(memory.id, memory);
    }

    pub fn record(&self, id: &Uuid) -> Option<Memory> {
        self.state.records.lock().unwrap().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Memory> {
        self.state.records.lock().unwrap().values().cloned().collect()
    }

    pub fn puts(&self) -> usize {
        self.state.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.state.deletes.load(Ordering::SeqCst)
    }

    pub fn fail_next_puts(&self, n: usize) {
        self.state.fail_puts.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_deletes(&self, n: usize) {
        self.state.fail_deletes.store(n, Ordering::SeqCst);
    }

    /// Make every `get` fail as if the store were unreachable.
    pub fn fail_gets(&self, failing: bool) {
        self.state.fail_gets.store(failing, Ordering::SeqCst);
    }
}

impl MetadataStore for RecordingMetadataStore {
    async fn get(&self, id: &Uuid) -> Result<Option<Memory>, RepositoryError> {
        if self.state.fail_gets.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        Ok(self.record(id))
    }

    async fn put(&self, memory: &Memory) -> Result<(), RepositoryError> {
        if take_fault(&self.state.fail_puts) {
            return Err(injected());
        }
        self.state.puts.fetch_add(1, Ordering::SeqCst);
        self.state
            .records
            .lock()
            .unwrap()
            .insert(memory.id, memory.clone());
        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        if take_fault(&self.state.fail_deletes) {
            return Err(injected());
        }
        self.state.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.records.lock().unwrap().remove(id).is_some())
    }

    async fn find(&self, filter: &MemoryFilter) -> Result<Vec<Memory>, RepositoryError> {
        require_user_scope(filter)?;
        let mut found: Vec<Memory> = self
            .state
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|m| filter.matches(&m.user_id, &m.category))
            .cloned()
            .collect();
        found.sort_by_key(|m| (m.created_at, m.id));
        Ok(found)
    }

    async fn delete_all_for_user(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let mut records = self.state.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, m| m.user_id != user_id);
        Ok((before - records.len()) as u64)
    }
}

pub struct VectorState {
    dimension: usize,
    records: Mutex<HashMap<Uuid, VectorRecord>>,
    upserts: AtomicUsize,
    fail_upserts: AtomicUsize,
    fail_deletes: AtomicUsize,
    fail_searches: AtomicBool,
}

/// Brute-force cosine vector store double with write counters.
#[derive(Clone)]
pub struct RecordingVectorStore {
    state: Arc<VectorState>,
}

impl RecordingVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            state: Arc::new(VectorState {
                dimension,
                records: Mutex::new(HashMap::new()),
                upserts: AtomicUsize::new(0),
                fail_upserts: AtomicUsize::new(0),
                fail_deletes: AtomicUsize::new(0),
                fail_searches: AtomicBool::new(false),
            }),
        }
    }

    pub fn seed(&self, record: VectorRecord) {
        self.state.records.lock().unwrap().insert(record.id, record);
    }

    pub fn record(&self, id: &Uuid) -> Option<VectorRecord> {
        self.state.records.lock().unwrap().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.state.records.lock().unwrap().keys().copied().collect()
    }

    pub fn upserts(&self) -> usize {
        self.state.upserts.load(Ordering::SeqCst)
    }

    pub fn fail_next_upserts(&self, n: usize) {
        self.state.fail_upserts.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_deletes(&self, n: usize) {
        self.state.fail_deletes.store(n, Ordering::SeqCst);
    }

    pub fn fail_searches(&self, failing: bool) {
        self.state.fail_searches.store(failing, Ordering::SeqCst);
    }
}

impl VectorStore for RecordingVectorStore {
    async fn upsert(&self, record: &VectorRecord) -> Result<(), RepositoryError> {
        if take_fault(&self.state.fail_upserts) {
            return Err(injected());
        }
        self.state.upserts.fetch_add(1, Ordering::SeqCst);
        self.state
            .records
            .lock()
            .unwrap()
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        if take_fault(&self.state.fail_deletes) {
            return Err(injected());
        }
        Ok(self.state.records.lock().unwrap().remove(id).is_some())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<VectorHit>, RepositoryError> {
        if self.state.fail_searches.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        let mut hits: Vec<VectorHit> = self
            .state
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| filter.matches(&r.user_id, &r.category))
            .map(|r| VectorHit {
                id: r.id,
                score: cosine_similarity(query, &r.vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn ids_for_user(&self, user_id: &str) -> Result<Vec<Uuid>, RepositoryError> {
        Ok(self
            .state
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.id)
            .collect())
    }

    async fn delete_all_for_user(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let mut records = self.state.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, r| r.user_id != user_id);
        Ok((before - records.len()) as u64)
    }

    fn dimension(&self) -> usize {
        self.state.dimension
    }
}

/// Store `memory` in both doubles, as a completed ADD would.
pub fn seed_both(metadata: &RecordingMetadataStore, vectors: &RecordingVectorStore, memory: &Memory) {
    metadata.seed(memory.clone());
    vectors.seed(memory.vector_record());
}
