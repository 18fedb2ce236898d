//! Schema introspection and the per-process cache.
//!
//! The pipeline reads the schema on every request but the table only changes
//! when the loader runs, so introspection happens once and is cached behind
//! an async lock. [`SchemaCache::clear`] resets it after an ETL run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use querent_types::{ColumnInfo, QuerentError, Result, SchemaSnapshot, TableSchema};

use crate::engine::{exec_err, open_read_only};

/// Introspect one table: column names and declared types from
/// `PRAGMA table_info`, plus the total row count.
pub fn introspect(db_path: &Path, table: &str) -> Result<TableSchema> {
    let conn = open_read_only(db_path)?;

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info('{table}')"))
        .map_err(exec_err)?;
    let columns: Vec<ColumnInfo> = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get::<_, String>(1)?,
                data_type: row.get::<_, String>(2)?.to_uppercase(),
            })
        })
        .map_err(exec_err)?
        .collect::<std::result::Result<_, _>>()
        .map_err(exec_err)?;

    if columns.is_empty() {
        return Err(QuerentError::MissingTable {
            table: table.to_string(),
        });
    }

    let total_rows: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
            row.get(0)
        })
        .map_err(exec_err)?;

    tracing::info!(
        table,
        columns = columns.len(),
        total_rows,
        "schema introspected"
    );

    Ok(TableSchema {
        table: table.to_string(),
        total_rows: total_rows.max(0) as u64,
        columns,
    })
}

// ---------------------------------------------------------------------------
// SchemaCache
// ---------------------------------------------------------------------------

/// Lazily-introspected, process-wide schema snapshot.
pub struct SchemaCache {
    db_path: PathBuf,
    table: String,
    cached: tokio::sync::RwLock<Option<Arc<SchemaSnapshot>>>,
}

impl SchemaCache {
    pub fn new(db_path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            table: table.into(),
            cached: tokio::sync::RwLock::new(None),
        }
    }

    /// The current snapshot, introspecting on first use. Concurrent first
    /// callers may both introspect; the last write wins, which is harmless
    /// because the result is identical.
    pub async fn current(&self) -> Result<Arc<SchemaSnapshot>> {
        if let Some(snapshot) = self.cached.read().await.as_ref() {
            return Ok(snapshot.clone());
        }

        let path = self.db_path.clone();
        let table = self.table.clone();
        let schema = tokio::task::spawn_blocking(move || introspect(&path, &table))
            .await
            .map_err(|e| QuerentError::Other(format!("introspection task failed: {e}")))??;

        let snapshot = Arc::new(SchemaSnapshot::single(schema));
        *self.cached.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Drop the cached snapshot so the next request re-introspects.
    pub async fn clear(&self) {
        *self.cached.write().await = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn seeded_db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE nyc_311 (complaint_type TEXT, created_ts TEXT, time_to_close_days INTEGER);
             INSERT INTO nyc_311 VALUES ('Noise', '2024-01-01 10:00:00', 2);
             INSERT INTO nyc_311 VALUES ('Heat', '2024-01-02 11:00:00', 5);",
        )
        .unwrap();
        (dir, path)
    }

    #[test]
    fn introspects_columns_and_row_count() {
        let (_dir, path) = seeded_db();
        let schema = introspect(&path, "nyc_311").unwrap();

        assert_eq!(schema.table, "nyc_311");
        assert_eq!(schema.total_rows, 2);
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["complaint_type", "created_ts", "time_to_close_days"]);
        assert_eq!(schema.columns[0].data_type, "TEXT");
        assert_eq!(schema.columns[2].data_type, "INTEGER");
    }

    #[test]
    fn missing_table_is_a_dedicated_error() {
        let (_dir, path) = seeded_db();
        let err = introspect(&path, "users").unwrap_err();
        assert!(matches!(err, QuerentError::MissingTable { table } if table == "users"));
    }

    #[tokio::test]
    async fn cache_returns_same_snapshot_until_cleared() {
        let (_dir, path) = seeded_db();
        let cache = SchemaCache::new(&path, "nyc_311");

        let first = cache.current().await.unwrap();
        let second = cache.current().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        cache.clear().await;
        let third = cache.current().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }

    #[tokio::test]
    async fn cache_surfaces_missing_table() {
        let (_dir, path) = seeded_db();
        let cache = SchemaCache::new(&path, "absent");
        let err = cache.current().await.unwrap_err();
        assert!(matches!(err, QuerentError::MissingTable { .. }));
    }
}
