use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use querent_types::Result;

// ---------------------------------------------------------------------------
// PromptKind
// ---------------------------------------------------------------------------

/// Which of the three exchanges with the model a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    SqlGeneration,
    SqlRepair,
    AnswerGeneration,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::SqlGeneration => "sql_generation",
            PromptKind::SqlRepair => "sql_repair",
            PromptKind::AnswerGeneration => "answer_generation",
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// One fully-built exchange with the text model.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub kind: PromptKind,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Hard deadline for the whole call; overrun is a transport failure.
    pub deadline: Duration,
}

// ---------------------------------------------------------------------------
// TextGeneration
// ---------------------------------------------------------------------------

/// Capability to turn a prompt into a parsed JSON object.
///
/// Implementations must return within `prompt.deadline` or fail with
/// `QuerentError::RequestTimeout`, and must map malformed model output to
/// `QuerentError::MalformedReply` rather than panicking. Handles must be safe
/// for concurrent independent calls.
#[async_trait]
pub trait TextGeneration: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<serde_json::Value>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
