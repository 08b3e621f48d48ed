//! Row counts and sample rows for the serving store tables.

use std::fmt;

use duckdb::Connection;

use crate::{DbError, tables};

/// Tables a finished store is expected to hold, in report order.
pub const STORE_TABLES: &[&str] = &[
    tables::LOCALITIES,
    tables::TAXONOMY,
    tables::HOTSPOT_POPULARITY,
    tables::LOCALITIES_HOTSPOTS,
];

/// Summary of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    /// Table name.
    pub table: String,
    /// Number of rows, or `None` if the table does not exist.
    pub row_count: Option<u64>,
    /// First row as `(column, value)` pairs rendered as text.
    pub sample: Vec<(String, Option<String>)>,
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(count) = self.row_count else {
            return write!(f, "{}: missing", self.table);
        };

        write!(f, "{}: {count} rows", self.table)?;

        if !self.sample.is_empty() {
            let sample = self
                .sample
                .iter()
                .map(|(column, value)| format!("{column}={}", value.as_deref().unwrap_or("NULL")))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "\n  sample: {sample}")?;
        }

        Ok(())
    }
}

/// Collects [`TableStats`] for each of `table_names`.
///
/// Missing tables are reported with no row count rather than failing.
///
/// # Errors
///
/// Returns [`DbError`] if a query against an existing table fails.
pub fn table_stats(conn: &Connection, table_names: &[&str]) -> Result<Vec<TableStats>, DbError> {
    table_names
        .iter()
        .map(|&table| -> Result<TableStats, DbError> {
            if !crate::table_exists(conn, table)? {
                return Ok(TableStats {
                    table: table.to_string(),
                    row_count: None,
                    sample: Vec::new(),
                });
            }

            Ok(TableStats {
                table: table.to_string(),
                row_count: Some(crate::count_rows(conn, table)?),
                sample: sample_row(conn, table)?,
            })
        })
        .collect()
}

fn sample_row(conn: &Connection, table: &str) -> Result<Vec<(String, Option<String>)>, DbError> {
    let columns = crate::column_names(conn, table)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT CAST(COLUMNS(*) AS VARCHAR) FROM {table} LIMIT 1"
    ))?;
    let mut rows = stmt.query([])?;

    let Some(row) = rows.next()? else {
        return Ok(Vec::new());
    };

    columns
        .into_iter()
        .enumerate()
        .map(|(i, column)| -> Result<_, DbError> {
            Ok((column, row.get::<_, Option<String>>(i)?))
        })
        .collect()
}
