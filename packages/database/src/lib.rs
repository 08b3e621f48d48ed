#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` store access for the birdseye hotspot pipeline.
//!
//! The serving store is a single `DuckDB` file holding the `localities`,
//! `taxonomy`, `hotspot_popularity`, and `localities_hotspots` tables plus
//! a `_meta` key/value table describing the build. This crate owns the
//! table names, connection setup, and catalog introspection; the SQL that
//! fills the tables lives in `birdseye_build`.

pub mod meta;
pub mod paths;
pub mod stats;

use std::path::Path;

use duckdb::{AccessMode, Config, Connection};

/// Canonical table names in the serving store.
pub mod tables {
    /// Temporary view over the raw observation input (build time only).
    pub const RAW_OBSERVATIONS: &str = "raw_observations";
    /// Deduplicated hotspot localities with geometry.
    pub const LOCALITIES: &str = "localities";
    /// External species taxonomy, loaded verbatim.
    pub const TAXONOMY: &str = "taxonomy";
    /// Average weekly checklists per locality and month.
    pub const HOTSPOT_POPULARITY: &str = "hotspot_popularity";
    /// Richness intermediate, dropped once merged.
    pub const HOTSPOT_RICHNESS: &str = "hotspot_richness";
    /// Denormalized serving table read by the query path.
    pub const LOCALITIES_HOTSPOTS: &str = "localities_hotspots";
    /// Build metadata.
    pub const META: &str = "_meta";
}

/// Name of the spatial cell index on the serving table.
pub const SPATIAL_INDEX_NAME: &str = "idx_localities_hotspots_cell";

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store file does not exist.
    #[error("Store not found at {path}")]
    NotFound {
        /// Path that was looked up.
        path: String,
    },
}

/// `DuckDB` session settings applied to build connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuckDbSettings {
    /// Worker threads `DuckDB` may use.
    pub threads: u32,
    /// Memory limit string understood by `DuckDB` (e.g. `"4GB"`).
    pub memory_limit: String,
}

impl Default for DuckDbSettings {
    fn default() -> Self {
        Self {
            threads: 4,
            memory_limit: "4GB".to_string(),
        }
    }
}

impl DuckDbSettings {
    /// Reads `BIRDSEYE_DUCKDB_THREADS` and `BIRDSEYE_DUCKDB_MEMORY`,
    /// falling back to the defaults for anything unset or malformed.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let threads = std::env::var("BIRDSEYE_DUCKDB_THREADS")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|&t| t > 0)
            .unwrap_or(defaults.threads);

        let memory_limit = std::env::var("BIRDSEYE_DUCKDB_MEMORY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| is_valid_memory_limit(v))
            .unwrap_or(defaults.memory_limit);

        Self {
            threads,
            memory_limit,
        }
    }

    /// Applies the settings to an open connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if `DuckDB` rejects a setting.
    pub fn apply(&self, conn: &Connection) -> Result<(), DbError> {
        let memory_limit = if is_valid_memory_limit(&self.memory_limit) {
            self.memory_limit.as_str()
        } else {
            log::warn!(
                "Ignoring malformed memory limit {:?}, using 4GB",
                self.memory_limit
            );
            "4GB"
        };

        conn.execute_batch(&format!(
            "SET threads = {}; SET memory_limit = '{memory_limit}';",
            self.threads
        ))?;
        Ok(())
    }
}

/// Memory limits are spliced into SQL, so only digits, letters, dots and
/// spaces are accepted.
fn is_valid_memory_limit(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == ' ')
}

/// Opens (or creates) a store for writing and applies `settings`.
///
/// # Errors
///
/// Returns [`DbError`] if the parent directory cannot be created or the
/// connection fails.
pub fn open_for_build(path: &Path, settings: &DuckDbSettings) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;
    settings.apply(&conn)?;

    Ok(conn)
}

/// Opens an existing store read-only.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the file does not exist, or a `DuckDB`
/// error if it cannot be opened.
pub fn open_read_only(path: &Path) -> Result<Connection, DbError> {
    if !path.exists() {
        return Err(DbError::NotFound {
            path: path.display().to_string(),
        });
    }

    let conn = Connection::open_with_flags(
        path,
        Config::default().access_mode(AccessMode::ReadOnly)?,
    )?;

    Ok(conn)
}

/// Returns whether a persistent table named `table` exists in the
/// connection's default database.
///
/// # Errors
///
/// Returns [`DbError`] if the catalog query fails.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, DbError> {
    let count: i64 = conn
        .prepare(
            "SELECT COUNT(*) FROM duckdb_tables()
             WHERE database_name = current_database() AND table_name = ?",
        )?
        .query_row([table], |row| row.get(0))?;
    Ok(count > 0)
}

/// Returns the column names of any table, view, or temporary view.
///
/// # Errors
///
/// Returns [`DbError`] if the relation does not exist.
pub fn column_names(conn: &Connection, relation: &str) -> Result<Vec<String>, DbError> {
    let mut stmt = conn.prepare(&format!("DESCRIBE SELECT * FROM {relation}"))?;
    let mut rows = stmt.query([])?;
    let mut names = Vec::new();

    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        names.push(name);
    }

    Ok(names)
}

/// Returns the number of rows in `relation`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn count_rows(conn: &Connection, relation: &str) -> Result<u64, DbError> {
    let count: i64 = conn
        .prepare(&format!("SELECT COUNT(*) FROM {relation}"))?
        .query_row([], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Returns the names of all indexes defined on `table`.
///
/// # Errors
///
/// Returns [`DbError`] if the catalog query fails.
pub fn index_names(conn: &Connection, table: &str) -> Result<Vec<String>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT index_name FROM duckdb_indexes()
         WHERE database_name = current_database() AND table_name = ?
         ORDER BY index_name",
    )?;
    let mut rows = stmt.query([table])?;
    let mut names = Vec::new();

    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        names.push(name);
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn introspects_tables_and_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE localities_hotspots (month INTEGER, cell_lat INTEGER, cell_lng INTEGER);
             INSERT INTO localities_hotspots VALUES (1, 43, -80), (2, 44, -79);
             CREATE INDEX idx_localities_hotspots_cell
                 ON localities_hotspots (month, cell_lat, cell_lng);
             CREATE TEMP VIEW raw_observations AS SELECT 1 AS locality_id;",
        )
        .unwrap();

        assert!(table_exists(&conn, tables::LOCALITIES_HOTSPOTS).unwrap());
        assert!(!table_exists(&conn, tables::LOCALITIES).unwrap());
        assert_eq!(count_rows(&conn, tables::LOCALITIES_HOTSPOTS).unwrap(), 2);
        assert_eq!(
            index_names(&conn, tables::LOCALITIES_HOTSPOTS).unwrap(),
            vec![SPATIAL_INDEX_NAME.to_string()]
        );
        assert_eq!(
            column_names(&conn, tables::RAW_OBSERVATIONS).unwrap(),
            vec!["locality_id".to_string()]
        );
    }

    #[test]
    fn read_only_open_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.duckdb");
        assert!(matches!(
            open_read_only(&missing),
            Err(DbError::NotFound { .. })
        ));
    }

    #[test]
    fn memory_limit_validation() {
        assert!(is_valid_memory_limit("512MB"));
        assert!(is_valid_memory_limit("1.5 GB"));
        assert!(!is_valid_memory_limit("1GB'; DROP TABLE x; --"));
        assert!(!is_valid_memory_limit(""));
    }

    #[test]
    fn settings_apply_to_connection() {
        let conn = Connection::open_in_memory().unwrap();
        let settings = DuckDbSettings {
            threads: 2,
            memory_limit: "256MB".to_string(),
        };
        settings.apply(&conn).unwrap();
        let threads: i64 = conn
            .query_row("SELECT current_setting('threads')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(threads, 2);
    }
}
