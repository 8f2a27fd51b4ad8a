//! Defensive parsing of raw model output.
//!
//! Model completions are untyped text. Parsing is a two-stage contract:
//!
//! 1. [`extract_json_object`] slices from the first `{` to the last `}`.
//! 2. The candidate is decoded with `serde_json` into the target type,
//!    which rejects unknown enum values and non-list fields.
//!
//! Callers treat every [`ResponseParseError`] as a signal to fall back,
//! never as a fatal error.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::ResponseParseError;
use crate::models::{SynthesisResult, Verdict};

const MAX_LOGGED_RESPONSE: usize = 2048;

/// Slice the outermost `{ ... }` candidate out of `raw`.
pub fn extract_json_object(raw: &str) -> Result<&str, ResponseParseError> {
    let start = raw.find('{').ok_or(ResponseParseError::NoJsonObject)?;
    let end = raw.rfind('}').ok_or(ResponseParseError::NoJsonObject)?;
    if end < start {
        return Err(ResponseParseError::NoJsonObject);
    }
    Ok(&raw[start..=end])
}

/// Parse a reviewer completion into a [`Verdict`].
pub fn parse_verdict(raw: &str) -> Result<Verdict, ResponseParseError> {
    parse_object(raw, "verdict")
}

/// Parse a synthesis completion into a [`SynthesisResult`].
pub fn parse_synthesis(raw: &str) -> Result<SynthesisResult, ResponseParseError> {
    parse_object(raw, "synthesis")
}

fn parse_object<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T, ResponseParseError> {
    let candidate = extract_json_object(raw).inspect_err(|_| {
        warn!(what, response_len = raw.len(), "no JSON object in model response");
    })?;

    serde_json::from_str::<T>(candidate).map_err(|e| {
        let err = if e.is_data() {
            ResponseParseError::Schema(e.to_string())
        } else {
            ResponseParseError::Malformed(e.to_string())
        };
        warn!(what, error = %err, response = %truncate(candidate), "unusable model response");
        err
    })
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_LOGGED_RESPONSE {
        return s.to_string();
    }
    let mut cut = MAX_LOGGED_RESPONSE;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...(truncated)", &s[..cut])
}
