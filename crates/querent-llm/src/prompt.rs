//! Prompt construction for the three model exchanges.
//!
//! Every prompt instructs the model to answer with a single JSON object; the
//! adapters parse that object before it reaches the pipeline. Schema context
//! is embedded as pretty-printed JSON so column names and types survive
//! verbatim.

use std::time::Duration;

use querent_types::{Row, SchemaSnapshot};

use crate::port::{Prompt, PromptKind};

/// How many result rows the answer prompt may carry. Full result sets are
/// bounded elsewhere at 1000 rows; the prompt takes a sample to keep its
/// size predictable.
pub const ANSWER_SAMPLE_ROWS: usize = 50;

const GENERATION_TEMPERATURE: f32 = 0.1;
const ANSWER_TEMPERATURE: f32 = 0.3;

fn table_list(schema: &SchemaSnapshot) -> String {
    schema
        .table_names()
        .iter()
        .map(|t| format!("`{t}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn schema_json(schema: &SchemaSnapshot) -> String {
    serde_json::to_string_pretty(schema).unwrap_or_else(|_| "{}".to_string())
}

// ---------------------------------------------------------------------------
// sql_generation
// ---------------------------------------------------------------------------

/// Build the SQL generation prompt for a question over `schema`.
pub fn sql_generation(question: &str, schema: &SchemaSnapshot, deadline: Duration) -> Prompt {
    let system = format!(
        "You are a SQL generator for an analytical database with the table(s) {tables}.\n\
         \n\
         Your task:\n\
         1. You will receive the table schema and a natural-language question.\n\
         2. You must output a single SQL query as JSON.\n\
         \n\
         Constraints:\n\
         - Use only the tables listed above.\n\
         - Use only columns that exist in the provided schema.\n\
         - Use only SELECT or WITH queries (CTEs).\n\
         - Always include a LIMIT clause of at most 1000.\n\
         - Never perform DDL/DML (no INSERT/UPDATE/DELETE/ALTER/DROP/etc.).\n\
         - For aggregations, use appropriate GROUP BY clauses.\n\
         - When filtering on derived columns, handle NULL values explicitly.\n\
         \n\
         Output format (JSON):\n\
         {{\n  \"sql\": \"SELECT ...\",\n  \"explanation\": \"Brief explanation of what the query does\",\n  \"confidence\": 0.0\n}}",
        tables = table_list(schema),
    );

    let user = format!(
        "Schema:\n{schema}\n\nQuestion: {question}\n\n\
         Generate a SQL query to answer this question. Return only valid JSON.",
        schema = schema_json(schema),
    );

    Prompt {
        kind: PromptKind::SqlGeneration,
        system,
        user,
        temperature: GENERATION_TEMPERATURE,
        deadline,
    }
}

// ---------------------------------------------------------------------------
// sql_repair
// ---------------------------------------------------------------------------

/// Build the repair prompt: same constraints as generation, plus the failing
/// statement and the reason it was refused.
pub fn sql_repair(
    question: &str,
    schema: &SchemaSnapshot,
    previous_sql: &str,
    error: &str,
    deadline: Duration,
) -> Prompt {
    let system = format!(
        "You are a SQL repair assistant for an analytical database with the table(s) {tables}.\n\
         \n\
         Your task:\n\
         1. You receive a schema, a natural-language question, a previous invalid SQL query, and an error message.\n\
         2. You must output a corrected SQL query that fixes the error.\n\
         \n\
         Constraints (same as SQL generation):\n\
         - Use only the tables listed above.\n\
         - Use only columns that exist in the provided schema.\n\
         - Use only SELECT or WITH queries.\n\
         - Always include a LIMIT clause of at most 1000.\n\
         - Never perform DDL/DML.\n\
         - Fix the specific error mentioned.\n\
         \n\
         Output format (JSON):\n\
         {{\n  \"sql\": \"SELECT ...\",\n  \"explanation\": \"What was fixed and why\"\n}}",
        tables = table_list(schema),
    );

    let user = format!(
        "Schema:\n{schema}\n\nQuestion: {question}\n\n\
         Previous SQL (had error):\n{previous_sql}\n\nError: {error}\n\n\
         Generate a corrected SQL query. Return only valid JSON.",
        schema = schema_json(schema),
    );

    Prompt {
        kind: PromptKind::SqlRepair,
        system,
        user,
        temperature: GENERATION_TEMPERATURE,
        deadline,
    }
}

// ---------------------------------------------------------------------------
// answer_generation
// ---------------------------------------------------------------------------

/// Build the answer prompt from the question, the executed SQL, and a bounded
/// sample of the result rows.
pub fn answer_generation(
    question: &str,
    sql: &str,
    columns: &[String],
    rows: &[Row],
    deadline: Duration,
) -> Prompt {
    let system = "You are a data analyst assistant.\n\
         \n\
         Your task:\n\
         1. You receive a user's question, the SQL query used to answer it, and the resulting table.\n\
         2. You must provide a clear, concise answer in 2-4 sentences.\n\
         \n\
         Guidelines:\n\
         - Describe the answer using only information from the result table.\n\
         - Do not invent counts or values not present in the results.\n\
         - If the result is a single scalar/row, state it explicitly.\n\
         - If there are many rows, summarize the key patterns (top groups, trends, percentages).\n\
         - Use specific numbers from the results.\n\
         - Be conversational but precise.\n\
         \n\
         Output format (JSON):\n\
         {\n  \"answer\": \"Your answer here...\"\n}"
        .to_string();

    let sample = &rows[..rows.len().min(ANSWER_SAMPLE_ROWS)];
    let sample_json =
        serde_json::to_string_pretty(sample).unwrap_or_else(|_| "[]".to_string());

    let user = format!(
        "Question: {question}\n\nSQL Query:\n{sql}\n\n\
         Result Table:\nColumns: {columns}\nTotal Rows: {total}\n\n\
         Sample Rows (first {sample_len}):\n{sample_json}\n\n\
         Generate a clear answer to the question based on these results. Return only valid JSON.",
        columns = columns.join(", "),
        total = rows.len(),
        sample_len = sample.len(),
    );

    Prompt {
        kind: PromptKind::AnswerGeneration,
        system,
        user,
        temperature: ANSWER_TEMPERATURE,
        deadline,
    }
}

// ---------------------------------------------------------------------------
// failure_explanation
// ---------------------------------------------------------------------------

/// Build the prompt used when the pipeline has no results: ask the model to
/// explain the failure to the user in plain language.
pub fn failure_explanation(question: &str, error: &str, deadline: Duration) -> Prompt {
    let system = "You are a data analyst assistant.\n\
         \n\
         A user asked a question about a dataset, but the query pipeline could not produce results.\n\
         Apologize briefly, explain in one or two plain-language sentences what went wrong, and\n\
         suggest how the user might rephrase the question. Do not invent any data.\n\
         \n\
         Output format (JSON):\n\
         {\n  \"answer\": \"Your answer here...\"\n}"
        .to_string();

    let user = format!(
        "Question: {question}\n\nFailure: {error}\n\nReturn only valid JSON."
    );

    Prompt {
        kind: PromptKind::AnswerGeneration,
        system,
        user,
        temperature: ANSWER_TEMPERATURE,
        deadline,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
