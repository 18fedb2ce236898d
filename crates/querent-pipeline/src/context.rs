use std::sync::Arc;

use querent_types::{AskReport, Row, SchemaSnapshot};

// ---------------------------------------------------------------------------
// PipelineContext
// ---------------------------------------------------------------------------

/// The mutable record threaded through every stage of one request.
///
/// One instance exists per request; the orchestrator owns it exclusively for
/// the request's lifetime and it is consumed by [`into_report`]
/// (PipelineContext::into_report) at the end. Field contracts:
///
/// - `question` — immutable once set, never empty
/// - `schema` — read-only snapshot shared with other requests
/// - `generated_sql` — written by generation and repair; overwritten on each
///   repair attempt
/// - `sql_explanation` — advisory only, never validated
/// - `validated_sql` — written once, by validation, on acceptance
/// - `sql_error` — cleared when generation/repair produce a fresh candidate,
///   set by validation rejection or execution failure
/// - `result_columns` / `result_rows` — empty until execution succeeds
/// - `final_answer` — set exactly once, by the answer stage, on every path
/// - `repair_count` — only ever incremented, never beyond [`MAX_REPAIRS`]
///   (crate::MAX_REPAIRS)
#[derive(Debug)]
pub struct PipelineContext {
    pub question: String,
    pub schema: Arc<SchemaSnapshot>,
    pub generated_sql: Option<String>,
    pub sql_explanation: Option<String>,
    pub validated_sql: Option<String>,
    pub sql_error: Option<String>,
    pub result_columns: Vec<String>,
    pub result_rows: Vec<Row>,
    pub final_answer: Option<String>,
    pub repair_count: u32,
}

impl PipelineContext {
    pub fn new(question: impl Into<String>, schema: Arc<SchemaSnapshot>) -> Self {
        Self {
            question: question.into(),
            schema,
            generated_sql: None,
            sql_explanation: None,
            validated_sql: None,
            sql_error: None,
            result_columns: Vec::new(),
            result_rows: Vec::new(),
            final_answer: None,
            repair_count: 0,
        }
    }

    /// Project the finished context into the caller-facing report.
    ///
    /// `error` is surfaced only when the run ended with no usable rows; an
    /// answer-stage hiccup after a successful execution does not turn a good
    /// result into an error.
    pub fn into_report(self) -> AskReport {
        let error = if self.result_rows.is_empty() {
            self.sql_error
        } else {
            None
        };
        AskReport {
            answer_text: self.final_answer.unwrap_or_default(),
            sql: self.validated_sql.unwrap_or_default(),
            columns: self.result_columns,
            rows: self.result_rows,
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
