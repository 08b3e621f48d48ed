//! The `_meta` key/value table describing a build.

use duckdb::Connection;

use crate::DbError;

/// RFC 3339 timestamp of the build that produced the store.
pub const BUILT_AT: &str = "built_at";
/// Reference date (`YYYY-MM-DD`) the time windows were computed from.
pub const AS_OF: &str = "as_of";
/// Raw input the store was built from.
pub const INPUT: &str = "input";
/// Whether the spatial index was created: [`INDEX_BUILT`] or
/// [`INDEX_SKIPPED`].
pub const SPATIAL_INDEX: &str = "spatial_index";
/// Layout version of the serving table.
pub const SCHEMA_VERSION: &str = "schema_version";

/// Every key a build writes, in report order.
pub const KEYS: &[&str] = &[BUILT_AT, AS_OF, INPUT, SPATIAL_INDEX, SCHEMA_VERSION];

/// [`SPATIAL_INDEX`] value when the index exists.
pub const INDEX_BUILT: &str = "built";
/// [`SPATIAL_INDEX`] value when the build ran with indexes skipped.
pub const INDEX_SKIPPED: &str = "skipped";

/// Current serving table layout.
pub const CURRENT_SCHEMA_VERSION: &str = "1";

/// Creates the `_meta` table if it does not exist.
///
/// # Errors
///
/// Returns [`DbError`] if the DDL fails.
pub fn create_table(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Gets a metadata value.
///
/// Returns `Ok(None)` when the key is absent or the store predates the
/// `_meta` table.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails for any other reason.
pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, DbError> {
    if !crate::table_exists(conn, crate::tables::META)? {
        return Ok(None);
    }

    let mut stmt = conn.prepare("SELECT value FROM _meta WHERE key = ?")?;
    match stmt.query_row([key], |row| row.get(0)) {
        Ok(v) => Ok(Some(v)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

/// Sets a metadata value, replacing any previous one.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO _meta (key, value) VALUES (?, ?)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        duckdb::params![key, value],
    )?;
    Ok(())
}

/// Build facts recorded once the serving table is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    /// Reference date of the time windows.
    pub as_of: chrono::NaiveDate,
    /// Raw input description (usually its path).
    pub input: String,
    /// Whether the spatial index was created.
    pub spatial_index_built: bool,
}

/// Writes every `_meta` key for a finished build, stamping `built_at`
/// with the current time.
///
/// # Errors
///
/// Returns [`DbError`] if any write fails.
pub fn record_build(conn: &Connection, record: &BuildRecord) -> Result<(), DbError> {
    create_table(conn)?;

    set_meta(conn, BUILT_AT, &chrono::Utc::now().to_rfc3339())?;
    set_meta(conn, AS_OF, &record.as_of.format("%Y-%m-%d").to_string())?;
    set_meta(conn, INPUT, &record.input)?;
    set_meta(
        conn,
        SPATIAL_INDEX,
        if record.spatial_index_built {
            INDEX_BUILT
        } else {
            INDEX_SKIPPED
        },
    )?;
    set_meta(conn, SCHEMA_VERSION, CURRENT_SCHEMA_VERSION)?;

    Ok(())
}
