//! Pluggable text frame decoding.
//!
//! Inbound binary frames always pass through as raw bytes. Inbound text
//! frames run through a [`DecodePolicy`]: a strategy function that either
//! produces a structured value or declines, in which case the text passes
//! through unchanged. The default policy attempts JSON decoding only when
//! the trimmed text is syntactically bracketed as an object or array, so
//! plain text never pays a full parse.
//!
//! Hosts can swap the policy (or disable decoding entirely with
//! [`passthrough`]) when building the pool.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;

// ============================================================================
// DecodePolicy
// ============================================================================

/// Strategy function applied to inbound text frames.
///
/// Returns `Some(value)` to deliver a structured payload, or `None` to
/// deliver the text unchanged.
pub type DecodePolicy = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

/// Returns the default policy: opportunistic JSON decoding.
#[must_use]
pub fn opportunistic_json() -> DecodePolicy {
    Arc::new(decode_bracketed)
}

/// Returns a policy that never decodes; all text passes through.
#[must_use]
pub fn passthrough() -> DecodePolicy {
    Arc::new(|_| None)
}

/// Attempts JSON decoding when the trimmed text is bracketed.
fn decode_bracketed(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let bracketed = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));

    if !bracketed {
        return None;
    }

    serde_json::from_str(trimmed).ok()
}

// ============================================================================
// Tests
// ============================================================================
