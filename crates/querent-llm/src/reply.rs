//! Structured model replies.
//!
//! The model is asked for a single JSON object, but real replies arrive with
//! markdown fences, stray prose, or missing fields. Everything here folds
//! those cases into `QuerentError::MalformedReply` so the pipeline's
//! transport fallbacks apply.

use serde::Deserialize;

use querent_types::{QuerentError, Result};

/// Parse a model reply into a JSON value, tolerating markdown code fences
/// around the object.
pub fn extract_json(content: &str) -> Result<serde_json::Value> {
    let mut text = content.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    }
    if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();

    serde_json::from_str(text)
        .map_err(|e| QuerentError::MalformedReply(format!("invalid JSON in model reply: {e}")))
}

// ---------------------------------------------------------------------------
// Reply shapes
// ---------------------------------------------------------------------------

/// Output of the SQL generation exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct SqlDraft {
    pub sql: String,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Output of the repair exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct RepairDraft {
    pub sql: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Output of the answer exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerDraft {
    pub answer: String,
}

fn from_value<T: serde::de::DeserializeOwned>(value: &serde_json::Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| QuerentError::MalformedReply(format!("unexpected reply shape: {e}")))
}

impl SqlDraft {
    pub fn from_reply(value: &serde_json::Value) -> Result<Self> {
        from_value(value)
    }
}

impl RepairDraft {
    pub fn from_reply(value: &serde_json::Value) -> Result<Self> {
        from_value(value)
    }
}

impl AnswerDraft {
    pub fn from_reply(value: &serde_json::Value) -> Result<Self> {
        from_value(value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
