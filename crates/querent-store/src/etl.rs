//! One-time CSV loader.
//!
//! Builds the queryable table from a raw service-request CSV export: every
//! source column is kept as TEXT under a sanitized snake_case name, and a
//! handful of derived columns are added on the way in:
//!
//! - `created_ts` / `closed_ts` — parsed from `%m/%d/%Y %I:%M:%S %p`
//! - `time_to_close_days` — whole days between the two, NULL if either is
//!   missing or unparseable
//! - `geocoded` — 1 when both coordinates are present and non-zero
//! - `zip_code` — zero-padded to five digits
//!
//! Re-running the loader drops and re-creates the table.

use std::path::Path;

use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::Connection;

use querent_types::{QuerentError, Result};

use crate::engine::exec_err;

const SOURCE_TS_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";
const STORED_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What a completed load produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub table: String,
    pub rows: u64,
    pub columns: usize,
}

// ---------------------------------------------------------------------------
// Column planning
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SourceColumns {
    created: Option<usize>,
    closed: Option<usize>,
    zip: Option<usize>,
    latitude: Option<usize>,
    longitude: Option<usize>,
}

fn sanitize_header(raw: &str, index: usize) -> String {
    let mut name = String::new();
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            name.push(ch.to_ascii_lowercase());
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }
    let name = name.trim_matches('_').to_string();
    if name.is_empty() {
        format!("column_{index}")
    } else if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("c_{name}")
    } else {
        name
    }
}

fn dedupe(mut names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    for name in names.iter_mut() {
        if !seen.insert(name.clone()) {
            let mut n = 2;
            while !seen.insert(format!("{name}_{n}")) {
                n += 1;
            }
            *name = format!("{name}_{n}");
        }
    }
    names
}

fn locate_source_columns(names: &[String]) -> SourceColumns {
    let mut found = SourceColumns::default();
    for (i, name) in names.iter().enumerate() {
        if found.created.is_none() && name.contains("created") && name.contains("date") {
            found.created = Some(i);
        }
        if found.closed.is_none() && name.contains("closed") && name.contains("date") {
            found.closed = Some(i);
        }
        if found.zip.is_none() && name.contains("zip") {
            found.zip = Some(i);
        }
        if found.latitude.is_none() && name.contains("latitude") {
            found.latitude = Some(i);
        }
        if found.longitude.is_none() && name.contains("longitude") {
            found.longitude = Some(i);
        }
    }
    found
}

// ---------------------------------------------------------------------------
// Row transforms
// ---------------------------------------------------------------------------

fn parse_ts(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), SOURCE_TS_FORMAT).ok()
}

fn coordinate(record: &csv::StringRecord, idx: Option<usize>) -> Option<f64> {
    idx.and_then(|i| record.get(i))
        .and_then(|s| s.trim().parse::<f64>().ok())
}

fn zip_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::Text(format!("{trimmed:0>5}"))
    }
}

fn text_or_null(raw: &str) -> Value {
    if raw.is_empty() {
        Value::Null
    } else {
        Value::Text(raw.to_string())
    }
}

// ---------------------------------------------------------------------------
// load_csv
// ---------------------------------------------------------------------------

/// Load `csv_path` into `table` inside the database at `db_path`, replacing
/// any previous contents of that table.
pub fn load_csv(csv_path: &Path, db_path: &Path, table: &str) -> Result<LoadSummary> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(csv_path)
        .map_err(|e| QuerentError::Other(format!("cannot open CSV {}: {e}", csv_path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| QuerentError::Other(format!("cannot read CSV header: {e}")))?
        .clone();
    if headers.is_empty() {
        return Err(QuerentError::Other("CSV has no header row".into()));
    }

    let raw_names: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| sanitize_header(h, i))
        .collect();
    let raw_names = dedupe(raw_names);
    let source = locate_source_columns(&raw_names);

    tracing::info!(
        csv = %csv_path.display(),
        columns = raw_names.len(),
        created = ?source.created.map(|i| &raw_names[i]),
        closed = ?source.closed.map(|i| &raw_names[i]),
        zip = ?source.zip.map(|i| &raw_names[i]),
        "loading CSV"
    );

    // Derived columns, in a fixed order after the raw ones.
    let mut derived: Vec<(&str, &str)> = Vec::new();
    if source.created.is_some() {
        derived.push(("created_ts", "TEXT"));
    }
    if source.closed.is_some() {
        derived.push(("closed_ts", "TEXT"));
    }
    if source.created.is_some() && source.closed.is_some() {
        derived.push(("time_to_close_days", "INTEGER"));
    }
    if source.latitude.is_some() || source.longitude.is_some() {
        derived.push(("geocoded", "INTEGER"));
    }
    if source.zip.is_some() {
        derived.push(("zip_code", "TEXT"));
    }

    let mut column_defs: Vec<String> = raw_names
        .iter()
        .map(|n| format!("\"{n}\" TEXT"))
        .collect();
    column_defs.extend(derived.iter().map(|(n, t)| format!("\"{n}\" {t}")));

    let all_names: Vec<String> = raw_names
        .iter()
        .cloned()
        .chain(derived.iter().map(|(n, _)| n.to_string()))
        .collect();
    let placeholders = vec!["?"; all_names.len()].join(", ");
    let insert_sql = format!(
        "INSERT INTO \"{table}\" ({}) VALUES ({placeholders})",
        all_names
            .iter()
            .map(|n| format!("\"{n}\""))
            .collect::<Vec<_>>()
            .join(", "),
    );

    let mut conn = Connection::open(db_path).map_err(exec_err)?;
    conn.execute(&format!("DROP TABLE IF EXISTS \"{table}\""), [])
        .map_err(exec_err)?;
    conn.execute(
        &format!("CREATE TABLE \"{table}\" ({})", column_defs.join(", ")),
        [],
    )
    .map_err(exec_err)?;

    let mut rows: u64 = 0;
    let tx = conn.transaction().map_err(exec_err)?;
    {
        let mut stmt = tx.prepare(&insert_sql).map_err(exec_err)?;
        for record in reader.records() {
            let record =
                record.map_err(|e| QuerentError::Other(format!("CSV record error: {e}")))?;

            let mut values: Vec<Value> = (0..raw_names.len())
                .map(|i| text_or_null(record.get(i).unwrap_or("")))
                .collect();

            let created = source
                .created
                .and_then(|i| record.get(i))
                .and_then(parse_ts);
            let closed = source.closed.and_then(|i| record.get(i)).and_then(parse_ts);

            if source.created.is_some() {
                values.push(match created {
                    Some(ts) => Value::Text(ts.format(STORED_TS_FORMAT).to_string()),
                    None => Value::Null,
                });
            }
            if source.closed.is_some() {
                values.push(match closed {
                    Some(ts) => Value::Text(ts.format(STORED_TS_FORMAT).to_string()),
                    None => Value::Null,
                });
            }
            if source.created.is_some() && source.closed.is_some() {
                values.push(match (created, closed) {
                    (Some(c), Some(d)) => Value::Integer((d - c).num_days()),
                    _ => Value::Null,
                });
            }
            if source.latitude.is_some() || source.longitude.is_some() {
                let lat = coordinate(&record, source.latitude);
                let lon = coordinate(&record, source.longitude);
                let geocoded = matches!((lat, lon), (Some(a), Some(b)) if a != 0.0 && b != 0.0);
                values.push(Value::Integer(geocoded as i64));
            }
            if let Some(zip_idx) = source.zip {
                values.push(zip_value(record.get(zip_idx).unwrap_or("")));
            }

            stmt.execute(rusqlite::params_from_iter(values))
                .map_err(exec_err)?;
            rows += 1;
        }
    }
    tx.commit().map_err(exec_err)?;

    tracing::info!(table, rows, columns = all_names.len(), "load complete");
    Ok(LoadSummary {
        table: table.to_string(),
        rows,
        columns: all_names.len(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
