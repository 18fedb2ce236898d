use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};

use querent_types::{QuerentError, Result, Row};

/// Default wall-clock budget for one query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// QueryExecution port
// ---------------------------------------------------------------------------

/// The result of one executed query: column names in projection order plus
/// one JSON mapping per row.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Capability to run an already-vetted, read-only statement.
///
/// Callers are responsible for passing only statements that went through the
/// safety validator; implementations still defend themselves (the SQLite
/// engine opens its connection read-only). Handles must be safe for
/// concurrent independent calls.
#[async_trait]
pub trait QueryExecution: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult>;
}

// ---------------------------------------------------------------------------
// SqliteEngine
// ---------------------------------------------------------------------------

/// File-backed SQLite engine. Each call opens its own read-only connection,
/// which keeps the handle trivially shareable across request tasks.
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    db_path: PathBuf,
    timeout: Duration,
}

impl SqliteEngine {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl QueryExecution for SqliteEngine {
    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        let path = self.db_path.clone();
        let statement = sql.to_string();

        // SQLite work is synchronous; isolate it on the blocking pool and
        // bound it. On timeout the blocking task finishes on its own and the
        // result is discarded.
        let task = tokio::task::spawn_blocking(move || run_query(&path, &statement));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined.map_err(|e| {
                QuerentError::Execution(format!("query task failed: {e}"))
            })?,
            Err(_) => Err(QuerentError::QueryTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Blocking query path
// ---------------------------------------------------------------------------

pub(crate) fn open_read_only(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(exec_err)
}

fn run_query(path: &Path, sql: &str) -> Result<QueryResult> {
    let conn = open_read_only(path)?;
    let mut stmt = conn.prepare(sql).map_err(exec_err)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = Vec::new();
    let mut raw = stmt.query([]).map_err(exec_err)?;
    while let Some(r) = raw.next().map_err(exec_err)? {
        let mut row = Row::new();
        for (i, name) in columns.iter().enumerate() {
            let value = r.get_ref(i).map_err(exec_err)?;
            row.insert(name.clone(), value_to_json(value));
        }
        rows.push(row);
    }

    tracing::debug!(
        columns = columns.len(),
        rows = rows.len(),
        "query executed"
    );
    Ok(QueryResult { columns, rows })
}

fn value_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

pub(crate) fn exec_err(e: rusqlite::Error) -> QuerentError {
    QuerentError::Execution(e.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE nyc_311 (complaint_type TEXT, borough TEXT, time_to_close_days INTEGER);
             INSERT INTO nyc_311 VALUES ('Noise', 'QUEENS', 3);
             INSERT INTO nyc_311 VALUES ('Noise', 'BRONX', 1);
             INSERT INTO nyc_311 VALUES ('Heat', 'QUEENS', NULL);",
        )
        .unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn executes_select_with_columns_in_order() {
        let (_dir, path) = seeded_db();
        let engine = SqliteEngine::new(&path);

        let result = engine
            .execute(
                "SELECT complaint_type, COUNT(*) AS n FROM nyc_311 \
                 GROUP BY complaint_type ORDER BY n DESC LIMIT 1000",
            )
            .await
            .unwrap();

        assert_eq!(result.columns, vec!["complaint_type", "n"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0]["complaint_type"], "Noise");
        assert_eq!(result.rows[0]["n"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn null_values_become_json_null() {
        let (_dir, path) = seeded_db();
        let engine = SqliteEngine::new(&path);

        let result = engine
            .execute("SELECT time_to_close_days FROM nyc_311 WHERE complaint_type = 'Heat' LIMIT 1")
            .await
            .unwrap();
        assert_eq!(result.rows[0]["time_to_close_days"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn limit_bounds_row_count() {
        let (_dir, path) = seeded_db();
        let engine = SqliteEngine::new(&path);

        let result = engine
            .execute("SELECT * FROM nyc_311 LIMIT 2")
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 2);
    }

    #[tokio::test]
    async fn connection_is_read_only() {
        let (_dir, path) = seeded_db();
        let engine = SqliteEngine::new(&path);

        let err = engine
            .execute("INSERT INTO nyc_311 VALUES ('X', 'Y', 0)")
            .await
            .unwrap_err();
        assert!(matches!(err, QuerentError::Execution(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn engine_error_carries_message() {
        let (_dir, path) = seeded_db();
        let engine = SqliteEngine::new(&path);

        let err = engine
            .execute("SELECT missing_column FROM nyc_311 LIMIT 1")
            .await
            .unwrap_err();
        match err {
            QuerentError::Execution(msg) => assert!(msg.contains("missing_column")),
            other => panic!("expected Execution, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_queries_are_independent() {
        let (_dir, path) = seeded_db();
        let engine = std::sync::Arc::new(SqliteEngine::new(&path));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .execute("SELECT COUNT(*) AS n FROM nyc_311 LIMIT 1")
                    .await
            }));
        }
        for h in handles {
            let result = h.await.unwrap().unwrap();
            assert_eq!(result.rows[0]["n"], serde_json::json!(3));
        }
    }
}
