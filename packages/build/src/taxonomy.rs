//! Taxonomy loader.

use std::path::Path;

use birdseye_database::tables;
use duckdb::Connection;

use crate::BuildError;
use crate::config::path_literal;

/// Loads the taxonomy CSV verbatim into `taxonomy`.
///
/// # Errors
///
/// Returns [`BuildError::EmptyTable`] if the file has no data rows, or a
/// database error if it cannot be read.
pub fn build(conn: &Connection, csv: &Path) -> Result<u64, BuildError> {
    conn.execute_batch(&format!(
        "CREATE OR REPLACE TABLE {} AS SELECT * FROM read_csv_auto({}, header = true)",
        tables::TAXONOMY,
        path_literal(csv)
    ))?;

    let rows = birdseye_database::count_rows(conn, tables::TAXONOMY)?;
    if rows == 0 {
        return Err(BuildError::EmptyTable {
            table: tables::TAXONOMY.to_string(),
        });
    }

    Ok(rows)
}
