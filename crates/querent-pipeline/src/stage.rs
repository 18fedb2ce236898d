//! The five pipeline stages.
//!
//! Every stage mutates the [`PipelineContext`] and returns nothing: failures
//! are absorbed into `sql_error` (or into a fallback answer) so that no stage
//! can abort the run. The orchestrator decides what runs next via the pure
//! transition function in [`crate::state`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use querent_guard::{SafetyValidator, Verdict};
use querent_llm::{
    answer_generation, failure_explanation, sql_generation, sql_repair, AnswerDraft, RepairDraft,
    SqlDraft, TextGeneration,
};
use querent_store::QueryExecution;

use crate::context::PipelineContext;
use crate::state::MAX_REPAIRS;

/// Last-resort answer text when every richer fallback produced nothing.
pub const GENERIC_ANSWER: &str =
    "I wasn't able to answer that question. Please try rephrasing it.";

// ---------------------------------------------------------------------------
// Stage trait
// ---------------------------------------------------------------------------

/// One unit of pipeline work.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the stage. Implementations must absorb their own failures into
    /// the context instead of returning them.
    async fn run(&self, ctx: &mut PipelineContext);
}

// ---------------------------------------------------------------------------
// GenerateStage
// ---------------------------------------------------------------------------

/// Drafts SQL for the question. A transport failure leaves `generated_sql`
/// empty and records the cause; validation then rejects deterministically and
/// routes into repair rather than crashing the request.
pub struct GenerateStage {
    port: Arc<dyn TextGeneration>,
    deadline: Duration,
}

impl GenerateStage {
    pub fn new(port: Arc<dyn TextGeneration>, deadline: Duration) -> Self {
        Self { port, deadline }
    }
}

#[async_trait]
impl Stage for GenerateStage {
    fn name(&self) -> &'static str {
        "generate"
    }

    async fn run(&self, ctx: &mut PipelineContext) {
        ctx.sql_error = None;

        let prompt = sql_generation(&ctx.question, &ctx.schema, self.deadline);
        let draft = self
            .port
            .generate(&prompt)
            .await
            .and_then(|reply| SqlDraft::from_reply(&reply));

        match draft {
            Ok(draft) => {
                tracing::info!(
                    confidence = draft.confidence,
                    sql = %draft.sql,
                    "SQL drafted"
                );
                ctx.generated_sql = Some(draft.sql);
                ctx.sql_explanation = draft.explanation;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SQL generation failed");
                ctx.generated_sql = None;
                ctx.sql_error = Some(format!("generation_failed: {e}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ValidateStage
// ---------------------------------------------------------------------------

/// Applies the static safety policy to the latest candidate. Pure and
/// synchronous: no external call, retried at zero cost after each repair.
pub struct ValidateStage {
    validator: SafetyValidator,
}

impl ValidateStage {
    pub fn new() -> Self {
        Self {
            validator: SafetyValidator::new(),
        }
    }
}

impl Default for ValidateStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for ValidateStage {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn run(&self, ctx: &mut PipelineContext) {
        let candidate = ctx.generated_sql.clone().unwrap_or_default();
        let tables = ctx.schema.table_names();

        match self.validator.validate(&candidate, &tables) {
            Verdict::Accept { sql } => {
                tracing::info!(sql = %sql, "SQL accepted");
                ctx.validated_sql = Some(sql);
                ctx.sql_error = None;
            }
            Verdict::Reject { reason, detail } => {
                tracing::warn!(reason = %reason, detail = %detail, "SQL rejected");
                ctx.sql_error = Some(format!("{reason}: {detail}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RepairStage
// ---------------------------------------------------------------------------

/// Asks the model to fix the failing statement. An attempt is consumed even
/// on transport failure, so a dead backend cannot produce an endless loop.
pub struct RepairStage {
    port: Arc<dyn TextGeneration>,
    deadline: Duration,
}

impl RepairStage {
    pub fn new(port: Arc<dyn TextGeneration>, deadline: Duration) -> Self {
        Self { port, deadline }
    }
}

#[async_trait]
impl Stage for RepairStage {
    fn name(&self) -> &'static str {
        "repair"
    }

    async fn run(&self, ctx: &mut PipelineContext) {
        let previous = ctx.generated_sql.clone().unwrap_or_default();
        let error = ctx.sql_error.clone().unwrap_or_default();

        ctx.repair_count += 1;
        tracing::info!(
            attempt = ctx.repair_count,
            max = MAX_REPAIRS,
            error = %error,
            "repairing SQL"
        );

        let prompt = sql_repair(&ctx.question, &ctx.schema, &previous, &error, self.deadline);
        let draft = self
            .port
            .generate(&prompt)
            .await
            .and_then(|reply| RepairDraft::from_reply(&reply));

        match draft {
            Ok(draft) => {
                tracing::info!(sql = %draft.sql, "SQL repaired");
                ctx.generated_sql = Some(draft.sql);
                if draft.explanation.is_some() {
                    ctx.sql_explanation = draft.explanation;
                }
                ctx.sql_error = None;
            }
            Err(e) => {
                // The attempt is spent; the old error stands and validation
                // will route forward once the budget runs out.
                tracing::warn!(error = %e, "SQL repair failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ExecuteStage
// ---------------------------------------------------------------------------

/// Runs the accepted statement. Raw model output never reaches the engine:
/// with no `validated_sql` the stage records a no-op failure and returns.
pub struct ExecuteStage {
    engine: Arc<dyn QueryExecution>,
}

impl ExecuteStage {
    pub fn new(engine: Arc<dyn QueryExecution>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Stage for ExecuteStage {
    fn name(&self) -> &'static str {
        "execute"
    }

    async fn run(&self, ctx: &mut PipelineContext) {
        let Some(sql) = ctx.validated_sql.clone() else {
            if ctx.sql_error.is_none() {
                ctx.sql_error = Some("no validated SQL to execute".into());
            }
            tracing::warn!("skipping execution: no validated SQL");
            return;
        };

        match self.engine.execute(&sql).await {
            Ok(result) => {
                tracing::info!(
                    columns = result.columns.len(),
                    rows = result.rows.len(),
                    "query executed"
                );
                ctx.result_columns = result.columns;
                ctx.result_rows = result.rows;
                ctx.sql_error = None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "query execution failed");
                ctx.sql_error = Some(e.to_string());
                ctx.result_columns.clear();
                ctx.result_rows.clear();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AnswerStage
// ---------------------------------------------------------------------------

/// Produces `final_answer` on every path. The fallback chain is
/// model-generated text, then a template embedding the error, then a template
/// from the result counts, then a fixed generic string — the context never
/// leaves this stage without an answer.
pub struct AnswerStage {
    port: Arc<dyn TextGeneration>,
    deadline: Duration,
}

impl AnswerStage {
    pub fn new(port: Arc<dyn TextGeneration>, deadline: Duration) -> Self {
        Self { port, deadline }
    }

    async fn draft(&self, prompt: &querent_llm::Prompt) -> Option<String> {
        match self
            .port
            .generate(prompt)
            .await
            .and_then(|reply| AnswerDraft::from_reply(&reply))
        {
            Ok(draft) if !draft.answer.trim().is_empty() => Some(draft.answer),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "answer generation failed");
                None
            }
        }
    }
}

#[async_trait]
impl Stage for AnswerStage {
    fn name(&self) -> &'static str {
        "answer"
    }

    async fn run(&self, ctx: &mut PipelineContext) {
        let answer = if ctx.sql_error.is_some() && ctx.result_rows.is_empty() {
            let error = ctx.sql_error.clone().unwrap_or_default();
            let prompt = failure_explanation(&ctx.question, &error, self.deadline);
            match self.draft(&prompt).await {
                Some(text) => text,
                None => format!(
                    "I couldn't answer that question. The query pipeline failed with: {error}"
                ),
            }
        } else {
            let sql = ctx.validated_sql.clone().unwrap_or_default();
            let prompt = answer_generation(
                &ctx.question,
                &sql,
                &ctx.result_columns,
                &ctx.result_rows,
                self.deadline,
            );
            match self.draft(&prompt).await {
                Some(text) => text,
                None if ctx.result_rows.is_empty() => {
                    "The query ran successfully but returned no rows.".to_string()
                }
                None => format!(
                    "The query returned {} row(s) across {} column(s): {}.",
                    ctx.result_rows.len(),
                    ctx.result_columns.len(),
                    ctx.result_columns.join(", ")
                ),
            }
        };

        ctx.final_answer = if answer.trim().is_empty() {
            Some(GENERIC_ANSWER.to_string())
        } else {
            Some(answer)
        };
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use querent_llm::{Prompt, PromptKind};
    use querent_store::QueryResult;
    use querent_types::{
        ColumnInfo, QuerentError, Result, Row, SchemaSnapshot, TableSchema,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn schema() -> Arc<SchemaSnapshot> {
        Arc::new(SchemaSnapshot::single(TableSchema {
            table: "nyc_311".into(),
            total_rows: 100,
            columns: vec![ColumnInfo {
                name: "complaint_type".into(),
                data_type: "TEXT".into(),
            }],
        }))
    }

    fn ctx() -> PipelineContext {
        PipelineContext::new("Top 10 complaint types", schema())
    }

    fn deadline() -> Duration {
        Duration::from_secs(5)
    }

    /// Replays queued replies and records the prompt kinds it saw.
    struct ScriptedPort {
        replies: Mutex<VecDeque<Result<serde_json::Value>>>,
        kinds: Mutex<Vec<PromptKind>>,
    }

    impl ScriptedPort {
        fn new(replies: Vec<Result<serde_json::Value>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                kinds: Mutex::new(Vec::new()),
            })
        }

        fn seen_kinds(&self) -> Vec<PromptKind> {
            self.kinds.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGeneration for ScriptedPort {
        async fn generate(&self, prompt: &Prompt) -> Result<serde_json::Value> {
            self.kinds.lock().unwrap().push(prompt.kind);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(QuerentError::Other("script exhausted".into())))
        }
    }

    fn timeout_err() -> QuerentError {
        QuerentError::RequestTimeout {
            provider: "deepseek".into(),
            timeout_ms: 5000,
        }
    }

    /// Engine double that counts calls.
    struct CountingEngine {
        calls: AtomicUsize,
        reply: std::result::Result<QueryResult, String>,
    }

    impl CountingEngine {
        fn ok(columns: Vec<&str>, rows: Vec<Row>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: Ok(QueryResult {
                    columns: columns.into_iter().map(String::from).collect(),
                    rows,
                }),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: Err(message.to_string()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryExecution for CountingEngine {
        async fn execute(&self, _sql: &str) -> Result<QueryResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(result) => Ok(result.clone()),
                Err(msg) => Err(QuerentError::Execution(msg.clone())),
            }
        }
    }

    fn one_row() -> Row {
        let mut row = Row::new();
        row.insert("complaint_type".into(), serde_json::json!("Noise"));
        row
    }

    // --- GenerateStage ---

    #[tokio::test]
    async fn generate_stores_draft_and_explanation() {
        let port = ScriptedPort::new(vec![Ok(serde_json::json!({
            "sql": "SELECT complaint_type FROM nyc_311",
            "explanation": "lists complaint types",
            "confidence": 0.9,
        }))]);
        let stage = GenerateStage::new(port.clone(), deadline());
        let mut c = ctx();
        stage.run(&mut c).await;

        assert_eq!(
            c.generated_sql.as_deref(),
            Some("SELECT complaint_type FROM nyc_311")
        );
        assert_eq!(c.sql_explanation.as_deref(), Some("lists complaint types"));
        assert!(c.sql_error.is_none());
        assert_eq!(port.seen_kinds(), vec![PromptKind::SqlGeneration]);
    }

    #[tokio::test]
    async fn generate_absorbs_transport_failure() {
        let port = ScriptedPort::new(vec![Err(timeout_err())]);
        let stage = GenerateStage::new(port, deadline());
        let mut c = ctx();
        stage.run(&mut c).await;

        assert!(c.generated_sql.is_none());
        let err = c.sql_error.unwrap();
        assert!(err.starts_with("generation_failed:"), "got: {err}");
    }

    #[tokio::test]
    async fn generate_clears_stale_error() {
        let port = ScriptedPort::new(vec![Ok(serde_json::json!({ "sql": "SELECT 1" }))]);
        let stage = GenerateStage::new(port, deadline());
        let mut c = ctx();
        c.sql_error = Some("stale".into());
        stage.run(&mut c).await;
        assert!(c.sql_error.is_none());
    }

    #[tokio::test]
    async fn generate_treats_malformed_reply_as_failure() {
        let port = ScriptedPort::new(vec![Ok(serde_json::json!({ "not_sql": true }))]);
        let stage = GenerateStage::new(port, deadline());
        let mut c = ctx();
        stage.run(&mut c).await;
        assert!(c.generated_sql.is_none());
        assert!(c.sql_error.is_some());
    }

    // --- ValidateStage ---

    #[tokio::test]
    async fn validate_accepts_and_normalizes() {
        let stage = ValidateStage::new();
        let mut c = ctx();
        c.generated_sql = Some("SELECT complaint_type FROM nyc_311".into());
        c.sql_error = Some("previous".into());
        stage.run(&mut c).await;

        assert_eq!(
            c.validated_sql.as_deref(),
            Some("SELECT complaint_type FROM nyc_311 LIMIT 1000")
        );
        assert!(c.sql_error.is_none());
    }

    #[tokio::test]
    async fn validate_rejects_with_reason_code() {
        let stage = ValidateStage::new();
        let mut c = ctx();
        c.generated_sql = Some("DROP TABLE nyc_311".into());
        stage.run(&mut c).await;

        assert!(c.validated_sql.is_none());
        assert!(c
            .sql_error
            .as_deref()
            .unwrap()
            .starts_with("REJECT_NOT_READ_ONLY"));
    }

    #[tokio::test]
    async fn validate_rejects_empty_candidate() {
        let stage = ValidateStage::new();
        let mut c = ctx();
        stage.run(&mut c).await;
        assert!(c.sql_error.is_some());
    }

    // --- RepairStage ---

    #[tokio::test]
    async fn repair_replaces_sql_and_consumes_attempt() {
        let port = ScriptedPort::new(vec![Ok(serde_json::json!({
            "sql": "SELECT complaint_type FROM nyc_311 LIMIT 10",
            "explanation": "made it read-only",
        }))]);
        let stage = RepairStage::new(port.clone(), deadline());
        let mut c = ctx();
        c.generated_sql = Some("DROP TABLE nyc_311".into());
        c.sql_error = Some("REJECT_NOT_READ_ONLY: statement must begin with SELECT or WITH".into());
        stage.run(&mut c).await;

        assert_eq!(c.repair_count, 1);
        assert!(c.sql_error.is_none());
        assert_eq!(
            c.generated_sql.as_deref(),
            Some("SELECT complaint_type FROM nyc_311 LIMIT 10")
        );
        assert_eq!(port.seen_kinds(), vec![PromptKind::SqlRepair]);
    }

    #[tokio::test]
    async fn repair_consumes_attempt_on_transport_failure() {
        let port = ScriptedPort::new(vec![Err(timeout_err())]);
        let stage = RepairStage::new(port, deadline());
        let mut c = ctx();
        c.generated_sql = Some("DROP TABLE nyc_311".into());
        c.sql_error = Some("REJECT_NOT_READ_ONLY: bad".into());
        stage.run(&mut c).await;

        assert_eq!(c.repair_count, 1);
        // The old error stands so validation can route forward.
        assert_eq!(c.sql_error.as_deref(), Some("REJECT_NOT_READ_ONLY: bad"));
        assert_eq!(c.generated_sql.as_deref(), Some("DROP TABLE nyc_311"));
    }

    // --- ExecuteStage ---

    #[tokio::test]
    async fn execute_runs_validated_sql() {
        let engine = CountingEngine::ok(vec!["complaint_type"], vec![one_row()]);
        let stage = ExecuteStage::new(engine.clone());
        let mut c = ctx();
        c.validated_sql = Some("SELECT complaint_type FROM nyc_311 LIMIT 1000".into());
        stage.run(&mut c).await;

        assert_eq!(engine.calls(), 1);
        assert_eq!(c.result_columns, vec!["complaint_type"]);
        assert_eq!(c.result_rows.len(), 1);
        assert!(c.sql_error.is_none());
    }

    #[tokio::test]
    async fn execute_short_circuits_without_validated_sql() {
        let engine = CountingEngine::ok(vec![], vec![]);
        let stage = ExecuteStage::new(engine.clone());
        let mut c = ctx();
        c.sql_error = Some("REJECT_FORBIDDEN_KEYWORD: forbidden keyword: DROP".into());
        stage.run(&mut c).await;

        // The engine is never called and the meaningful error is preserved.
        assert_eq!(engine.calls(), 0);
        assert_eq!(
            c.sql_error.as_deref(),
            Some("REJECT_FORBIDDEN_KEYWORD: forbidden keyword: DROP")
        );
    }

    #[tokio::test]
    async fn execute_short_circuit_records_a_reason_when_none_exists() {
        let engine = CountingEngine::ok(vec![], vec![]);
        let stage = ExecuteStage::new(engine.clone());
        let mut c = ctx();
        stage.run(&mut c).await;
        assert_eq!(engine.calls(), 0);
        assert_eq!(c.sql_error.as_deref(), Some("no validated SQL to execute"));
    }

    #[tokio::test]
    async fn execute_absorbs_engine_failure() {
        let engine = CountingEngine::failing("no such column: typo_column");
        let stage = ExecuteStage::new(engine);
        let mut c = ctx();
        c.validated_sql = Some("SELECT typo_column FROM nyc_311 LIMIT 10".into());
        stage.run(&mut c).await;

        assert!(c.result_rows.is_empty());
        assert!(c.sql_error.as_deref().unwrap().contains("typo_column"));
    }

    // --- AnswerStage ---

    #[tokio::test]
    async fn answer_uses_model_on_success_path() {
        let port = ScriptedPort::new(vec![Ok(serde_json::json!({
            "answer": "Noise complaints dominate the results.",
        }))]);
        let stage = AnswerStage::new(port.clone(), deadline());
        let mut c = ctx();
        c.validated_sql = Some("SELECT complaint_type FROM nyc_311 LIMIT 1000".into());
        c.result_columns = vec!["complaint_type".into()];
        c.result_rows = vec![one_row()];
        stage.run(&mut c).await;

        assert_eq!(
            c.final_answer.as_deref(),
            Some("Noise complaints dominate the results.")
        );
        assert_eq!(port.seen_kinds(), vec![PromptKind::AnswerGeneration]);
    }

    #[tokio::test]
    async fn answer_falls_back_to_counts_on_transport_failure() {
        let port = ScriptedPort::new(vec![Err(timeout_err())]);
        let stage = AnswerStage::new(port, deadline());
        let mut c = ctx();
        c.validated_sql = Some("SELECT complaint_type FROM nyc_311 LIMIT 1000".into());
        c.result_columns = vec!["complaint_type".into()];
        c.result_rows = vec![one_row()];
        stage.run(&mut c).await;

        let answer = c.final_answer.unwrap();
        assert!(answer.contains("1 row(s)"), "got: {answer}");
        assert!(answer.contains("complaint_type"));
    }

    #[tokio::test]
    async fn answer_explains_errors_via_model() {
        let port = ScriptedPort::new(vec![Ok(serde_json::json!({
            "answer": "Sorry, that query referenced a table I don't know.",
        }))]);
        let stage = AnswerStage::new(port, deadline());
        let mut c = ctx();
        c.sql_error = Some("REJECT_UNKNOWN_TABLE: unknown table: users".into());
        stage.run(&mut c).await;

        assert_eq!(
            c.final_answer.as_deref(),
            Some("Sorry, that query referenced a table I don't know.")
        );
    }

    #[tokio::test]
    async fn answer_templates_error_when_model_unreachable() {
        let port = ScriptedPort::new(vec![Err(timeout_err())]);
        let stage = AnswerStage::new(port, deadline());
        let mut c = ctx();
        c.sql_error = Some("REJECT_LIMIT_EXCEEDED: LIMIT 5000 exceeds maximum of 1000".into());
        stage.run(&mut c).await;

        let answer = c.final_answer.unwrap();
        assert!(answer.contains("REJECT_LIMIT_EXCEEDED"), "got: {answer}");
    }

    #[tokio::test]
    async fn answer_never_leaves_final_answer_empty() {
        // The model "succeeds" but returns a blank answer.
        let port = ScriptedPort::new(vec![Ok(serde_json::json!({ "answer": "   " }))]);
        let stage = AnswerStage::new(port, deadline());
        let mut c = ctx();
        c.validated_sql = Some("SELECT 1 LIMIT 1".into());
        stage.run(&mut c).await;

        let answer = c.final_answer.unwrap();
        assert!(!answer.trim().is_empty());
    }

    #[tokio::test]
    async fn answer_reports_empty_result_sets() {
        let port = ScriptedPort::new(vec![Err(timeout_err())]);
        let stage = AnswerStage::new(port, deadline());
        let mut c = ctx();
        c.validated_sql = Some("SELECT complaint_type FROM nyc_311 WHERE 1 = 0 LIMIT 10".into());
        stage.run(&mut c).await;

        let answer = c.final_answer.unwrap();
        assert!(answer.contains("no rows"), "got: {answer}");
    }
}
