//! Lenient decoding of JSON returned by a language model.
//!
//! Models wrap JSON in Markdown fences or surround it with prose often enough
//! that both extraction and adjudication need the same unwrapping.

use serde::de::DeserializeOwned;

/// Remove a surrounding Markdown code fence, with or without a language tag.
pub(crate) fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Decode `raw` as `T`, falling back to the outermost `{...}` or `[...]`
/// span when the payload is surrounded by other text.
pub(crate) fn parse_payload<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let body = strip_code_fences(raw);
    let first_error = match serde_json::from_str::<T>(body) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (body.find(open), body.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<T>(&body[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }
    Err(first_error)
}
