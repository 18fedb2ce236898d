//! Text generation for the Querent pipeline.
//!
//! The pipeline talks to the model exclusively through the [`TextGeneration`]
//! port: one structured prompt in, one parsed JSON object out, bounded by a
//! deadline. Everything that can go wrong on the wire — network failure,
//! timeout, an unparseable reply — surfaces as a transport-class
//! `QuerentError`, never a panic, so the caller's fallback paths apply
//! uniformly.

pub mod deepseek;
pub mod port;
pub mod prompt;
pub mod reply;

pub use deepseek::DeepSeekAdapter;
pub use port::{Prompt, PromptKind, TextGeneration};
pub use prompt::{
    answer_generation, failure_explanation, sql_generation, sql_repair, ANSWER_SAMPLE_ROWS,
};
pub use reply::{extract_json, AnswerDraft, RepairDraft, SqlDraft};
