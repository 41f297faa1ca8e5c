//! Deadline and retry wrappers for calls that leave the process.
//!
//! Every provider and store call made by the pipeline goes through
//! [`with_timeout`]; an expired deadline surfaces as `MemoryError::Timeout`.

use std::future::Future;
use std::time::Duration;

use mnemos_types::error::{EmbedError, MemoryError, RepositoryError};
use mnemos_types::llm::CompletionRequest;

use crate::llm::box_provider::BoxLlmProvider;

use super::box_embedder::BoxEmbedder;

/// Run `call` under a deadline of `timeout_ms`.
pub(crate) async fn with_timeout<T, E, F>(
    operation: &str,
    timeout_ms: u64,
    call: F,
) -> Result<T, MemoryError>
where
    F: Future<Output = Result<T, E>>,
    MemoryError: From<E>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
        Ok(result) => result.map_err(MemoryError::from),
        Err(_) => Err(MemoryError::Timeout {
            operation: operation.to_string(),
            timeout_ms,
        }),
    }
}

/// Embed `texts`, checking the count and width of the returned vectors.
pub(crate) async fn embed_texts(
    embedder: &BoxEmbedder,
    texts: &[String],
    timeout_ms: u64,
) -> Result<Vec<Vec<f32>>, MemoryError> {
    let vectors = with_timeout("embed", timeout_ms, embedder.embed(texts)).await?;
    if vectors.len() != texts.len() {
        return Err(EmbedError::CountMismatch {
            expected: texts.len(),
            actual: vectors.len(),
        }
        .into());
    }
    let expected = embedder.dimension();
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return Err(EmbedError::DimensionMismatch {
            expected,
            actual: bad.len(),
        }
        .into());
    }
    Ok(vectors)
}

/// Embed a single text.
pub(crate) async fn embed_one(
    embedder: &BoxEmbedder,
    text: &str,
    timeout_ms: u64,
) -> Result<Vec<f32>, MemoryError> {
    let mut vectors = embed_texts(embedder, &[text.to_string()], timeout_ms).await?;
    vectors.pop().ok_or_else(|| {
        MemoryError::from(EmbedError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    })
}

/// Send `request` and parse the reply, retrying on transient provider
/// errors and on unparseable output.
///
/// Returns the last error once `max_attempts` is exhausted.
pub(crate) async fn complete_parsed<T, P>(
    llm: &BoxLlmProvider,
    request: &CompletionRequest,
    max_attempts: u32,
    timeout_ms: u64,
    parse: P,
) -> Result<T, MemoryError>
where
    P: Fn(&str) -> Result<T, String>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match with_timeout("llm completion", timeout_ms, llm.complete(request)).await {
            Ok(response) => parse(&response.content).map_err(|reason| {
                tracing::warn!(
                    attempt,
                    content_preview = preview(&response.content),
                    "Unparseable LLM output"
                );
                MemoryError::Parse(reason)
            }),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && (e.is_transient() || matches!(e, MemoryError::Parse(_))) => {
                tracing::debug!(provider = llm.name(), attempt, error = %e, "Retrying LLM call");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run a store call under a deadline, retrying up to `attempts` times.
pub(crate) async fn retry_store_call<T, F, Fut>(
    operation: &str,
    attempts: u32,
    timeout_ms: u64,
    mut call: F,
) -> Result<T, MemoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RepositoryError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match with_timeout(operation, timeout_ms, call()).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(operation, attempt, error = %e, "Store call failed; retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// First 200 bytes of `text`, cut on a char boundary.
pub(crate) fn preview(text: &str) -> &str {
    let mut end = text.len().min(200);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
