//! Shared types for the Querent analytics agent.
//!
//! This crate provides the foundational types used across all other Querent
//! crates:
//! - `QuerentError` — unified error taxonomy (generation transport, safety
//!   rejection, query execution)
//! - `RejectReason` — the stable reason codes produced by the safety validator
//! - `SchemaSnapshot` — read-only description of the queryable tables
//! - `AskReport` — the caller-facing result of one pipeline run

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RejectReason
// ---------------------------------------------------------------------------

/// Why the safety validator refused a statement. The wire codes are stable:
/// they appear in repair prompts and in the `error` field of [`AskReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    #[serde(rename = "REJECT_NOT_READ_ONLY")]
    NotReadOnly,
    #[serde(rename = "REJECT_FORBIDDEN_KEYWORD")]
    ForbiddenKeyword,
    #[serde(rename = "REJECT_UNKNOWN_TABLE")]
    UnknownTable,
    #[serde(rename = "REJECT_LIMIT_EXCEEDED")]
    LimitExceeded,
}

impl RejectReason {
    /// The stable wire code for this reason.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::NotReadOnly => "REJECT_NOT_READ_ONLY",
            RejectReason::ForbiddenKeyword => "REJECT_FORBIDDEN_KEYWORD",
            RejectReason::UnknownTable => "REJECT_UNKNOWN_TABLE",
            RejectReason::LimitExceeded => "REJECT_LIMIT_EXCEEDED",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// QuerentError
// ---------------------------------------------------------------------------

/// Unified error type for all Querent subsystems.
#[derive(Debug, thiserror::Error)]
pub enum QuerentError {
    // === Text generation transport ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    #[error("Authentication failed for provider {provider}")]
    Auth { provider: String },

    #[error("Model reply could not be parsed: {0}")]
    MalformedReply(String),

    // === Safety validation ===
    #[error("SQL rejected ({reason})")]
    Rejected { reason: RejectReason, detail: String },

    // === Query engine ===
    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("Query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    #[error("Table '{table}' does not exist; run the loader first")]
    MissingTable { table: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl QuerentError {
    /// Returns `true` for failures of the text-generation call itself —
    /// network, timeout, auth, or an unparseable reply. These all follow the
    /// same degraded path through the pipeline.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            QuerentError::Provider { .. }
                | QuerentError::RequestTimeout { .. }
                | QuerentError::Auth { .. }
                | QuerentError::MalformedReply(_)
        )
    }

    /// Maps the error to an HTTP status code for server mode.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            QuerentError::Provider { status, .. } => Some(*status),
            QuerentError::Auth { .. } => Some(401),
            QuerentError::RequestTimeout { .. } | QuerentError::QueryTimeout { .. } => Some(504),
            QuerentError::Rejected { .. } => Some(400),
            QuerentError::MissingTable { .. } => Some(503),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, QuerentError>`.
pub type Result<T> = std::result::Result<T, QuerentError>;

// ---------------------------------------------------------------------------
// Schema snapshot
// ---------------------------------------------------------------------------

/// One column of a queryable table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// The introspected shape of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub total_rows: u64,
    pub columns: Vec<ColumnInfo>,
}

/// Read-only description of every table a query may reference. Loaded once
/// and shared across requests; the pipeline never mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    /// Snapshot containing a single table.
    pub fn single(table: TableSchema) -> Self {
        Self {
            tables: vec![table],
        }
    }

    /// Names of every known table, in snapshot order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.table.as_str()).collect()
    }

    /// Case-insensitive table membership test.
    pub fn contains_table(&self, name: &str) -> bool {
        self.tables
            .iter()
            .any(|t| t.table.eq_ignore_ascii_case(name))
    }
}

// ---------------------------------------------------------------------------
// AskReport — the caller-facing contract
// ---------------------------------------------------------------------------

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// What one pipeline run hands back to the caller (HTTP layer or CLI).
///
/// `error` is populated only when an unresolved failure survived to the end
/// of the run with no usable rows; `sql` reflects the validated statement if
/// one was ever accepted, else it is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskReport {
    pub answer_text: String,
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
