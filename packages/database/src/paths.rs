#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for serving stores.

use std::path::{Path, PathBuf};

/// File name used when no output path is given.
pub const DEFAULT_OUTPUT_FILE_NAME: &str = "parsed_ebd.duckdb";

/// Suffix appended to the output path while a build is in progress.
const BUILDING_SUFFIX: &str = ".building";

/// Environment variable naming the serving store to query.
pub const DB_PATH_ENV: &str = "BIRDSEYE_DB_PATH";

/// Returns the serving store path from [`DB_PATH_ENV`], if set and
/// non-empty.
#[must_use]
pub fn db_path_from_env() -> Option<PathBuf> {
    std::env::var_os(DB_PATH_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Returns the default output path: [`DEFAULT_OUTPUT_FILE_NAME`] next to
/// the raw input.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    input.parent().map_or_else(
        || PathBuf::from(DEFAULT_OUTPUT_FILE_NAME),
        |dir| dir.join(DEFAULT_OUTPUT_FILE_NAME),
    )
}

/// Returns the staging path a build writes to before it is swapped over
/// `output`.
#[must_use]
pub fn building_path(output: &Path) -> PathBuf {
    append_suffix(output, BUILDING_SUFFIX)
}

/// Returns the write-ahead log path `DuckDB` uses for `db`.
#[must_use]
pub fn wal_path(db: &Path) -> PathBuf {
    append_suffix(db, ".wal")
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Removes a `DuckDB` file and its write-ahead log, ignoring files that do
/// not exist.
///
/// # Errors
///
/// Returns an I/O error if an existing file cannot be removed.
pub fn remove_db_files(db: &Path) -> std::io::Result<()> {
    for path in [db.to_path_buf(), wal_path(db)] {
        match std::fs::remove_file(&path) {
            Ok(()) => log::debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_output_path(Path::new("/data/ebd/ebd_sorted.duckdb")),
            PathBuf::from("/data/ebd/parsed_ebd.duckdb")
        );
        assert_eq!(
            default_output_path(Path::new("ebd.csv")),
            PathBuf::from("parsed_ebd.duckdb")
        );
    }

    #[test]
    fn staging_and_wal_paths_append_suffix() {
        let output = Path::new("/srv/hotspots.duckdb");
        assert_eq!(
            building_path(output),
            PathBuf::from("/srv/hotspots.duckdb.building")
        );
        assert_eq!(
            wal_path(output),
            PathBuf::from("/srv/hotspots.duckdb.wal")
        );
    }

    #[test]
    fn remove_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("store.duckdb");
        std::fs::write(&db, b"x").unwrap();

        remove_db_files(&db).unwrap();
        assert!(!db.exists());
        remove_db_files(&db).unwrap();
    }
}
