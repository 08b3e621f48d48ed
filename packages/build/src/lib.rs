#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch build of the hotspot serving store.
//!
//! Turns a raw observation export into a compact `DuckDB` file with four
//! tables: `localities`, `taxonomy`, `hotspot_popularity`, and the
//! denormalised `localities_hotspots` serving table read by the query
//! service. Stages run strictly in order on one connection:
//!
//! | Stage | Output |
//! |-------|--------|
//! | attach input | `raw_observations` view |
//! | validate schema | required columns present |
//! | localities | `localities` (2-year window) |
//! | taxonomy | `taxonomy` |
//! | popularity | `hotspot_popularity` (5-year window) |
//! | richness | `hotspot_richness` (5-year window, dropped after merge) |
//! | merge | `localities_hotspots` |
//! | spatial index | `idx_localities_hotspots_cell` |
//! | metadata | `_meta` |
//!
//! [`run`] writes into `<output>.building` and renames it over the output
//! only after every stage succeeded, so a reader of the previous store
//! never sees a half-built file. A failed build deletes the staging file.

pub mod config;
pub mod localities;
pub mod popularity;
pub mod progress;
pub mod richness;
pub mod serving;
pub mod source;
pub mod taxonomy;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use birdseye_database::meta::{self, BuildRecord};
use birdseye_database::stats::{STORE_TABLES, TableStats};
use birdseye_database::{DbError, paths};
use duckdb::Connection;
use strum_macros::{AsRefStr, Display};

pub use config::{BuildConfig, InputFormat, TimeWindows};
pub use localities::LocalityStats;
pub use progress::{NullProgress, ProgressCallback, null_progress};

/// A step of the batch build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum BuildStage {
    /// Expose the raw input as `raw_observations`.
    AttachInput,
    /// Check the raw input's columns.
    ValidateSchema,
    /// Build `localities`.
    Localities,
    /// Load `taxonomy`.
    Taxonomy,
    /// Build `hotspot_popularity`.
    Popularity,
    /// Build `hotspot_richness`.
    Richness,
    /// Build `localities_hotspots` and drop the richness intermediate.
    Merge,
    /// Create the spatial index (or record that it was skipped).
    SpatialIndex,
    /// Write `_meta`.
    Metadata,
}

impl BuildStage {
    /// Every stage in execution order.
    pub const ALL: &[Self] = &[
        Self::AttachInput,
        Self::ValidateSchema,
        Self::Localities,
        Self::Taxonomy,
        Self::Popularity,
        Self::Richness,
        Self::Merge,
        Self::SpatialIndex,
        Self::Metadata,
    ];
}

/// Errors that abort a build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Missing or unusable inputs or options.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The raw input lacks columns the stages read.
    #[error("{relation} is missing required columns: {}", .missing.join(", "))]
    SchemaMismatch {
        /// Relation that was checked.
        relation: String,
        /// Missing column names.
        missing: Vec<String>,
    },

    /// A table that must not be empty came out empty.
    #[error("Table {table} is empty")]
    EmptyTable {
        /// Table name.
        table: String,
    },

    /// Store access failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// `DuckDB` rejected a statement.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stage failed; wraps the underlying error.
    #[error("Stage {stage} failed after {:.1}s: {source}", .elapsed.as_secs_f64())]
    Stage {
        /// The failing stage.
        stage: BuildStage,
        /// Time spent in the stage before it failed.
        elapsed: Duration,
        /// Underlying error.
        source: Box<Self>,
    },
}

impl BuildError {
    /// The stage that failed, if the error came from a stage.
    #[must_use]
    pub const fn stage(&self) -> Option<BuildStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Result of a completed build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Location of the finished store.
    pub output: PathBuf,
    /// Wall-clock build time.
    pub elapsed: Duration,
    /// Locality extractor counts.
    pub localities: LocalityStats,
    /// Rows in `localities_hotspots`.
    pub serving_rows: u64,
    /// Whether the spatial index was created.
    pub spatial_index_built: bool,
    /// Row counts and sample rows of the store tables.
    pub tables: Vec<TableStats>,
}

/// Counts gathered while building tables on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Locality extractor counts.
    pub localities: LocalityStats,
    /// Rows in `localities_hotspots`.
    pub serving_rows: u64,
    /// Whether the spatial index was created.
    pub spatial_index_built: bool,
}

/// SQL expression deriving the dense locality key from `column`.
///
/// Mirrors [`birdseye_hotspot_models::parse_locality_key`]: one non-digit
/// prefix character followed by an optionally signed integer, else `NULL`.
#[must_use]
pub fn locality_key_sql(column: &str) -> String {
    format!(
        "CASE WHEN regexp_matches(CAST({column} AS VARCHAR), '^[^0-9][+-]?[0-9]+$') \
         THEN TRY_CAST(substr(CAST({column} AS VARCHAR), 2) AS BIGINT) END"
    )
}

/// Runs the whole build and swaps the result into `config.output`.
///
/// # Errors
///
/// Returns [`BuildError::Configuration`] before touching any file if the
/// inputs are unusable, [`BuildError::Stage`] if a stage fails, or an I/O
/// error if the finished store cannot be moved into place. On failure the
/// previous store at `config.output`, if any, is left untouched.
pub fn run(
    config: &BuildConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<BuildReport, BuildError> {
    config.validate()?;

    let start = Instant::now();
    let staging = paths::building_path(&config.output);

    log::info!(
        "Building {} from {} (as of {}, indexes {})",
        config.output.display(),
        config.input.display(),
        config.as_of,
        if config.skip_indexes { "skipped" } else { "on" }
    );

    paths::remove_db_files(&staging)?;

    let (outcome, tables) = match build_into(&staging, config, progress.as_ref()) {
        Ok(built) => built,
        Err(e) => {
            if let Err(cleanup) = paths::remove_db_files(&staging) {
                log::warn!(
                    "Could not remove partial store {}: {cleanup}",
                    staging.display()
                );
            }
            progress.finish_and_clear();
            return Err(e);
        }
    };

    swap_into_place(&staging, &config.output)?;

    let elapsed = start.elapsed();
    progress.finish(format!("Built in {:.1}s", elapsed.as_secs_f64()));
    log::info!(
        "Build complete in {:.1}s: {} ({} serving rows)",
        elapsed.as_secs_f64(),
        config.output.display(),
        outcome.serving_rows
    );

    Ok(BuildReport {
        output: config.output.clone(),
        elapsed,
        localities: outcome.localities,
        serving_rows: outcome.serving_rows,
        spatial_index_built: outcome.spatial_index_built,
        tables,
    })
}

fn build_into(
    path: &Path,
    config: &BuildConfig,
    progress: &dyn ProgressCallback,
) -> Result<(BuildOutcome, Vec<TableStats>), BuildError> {
    let conn = birdseye_database::open_for_build(path, &config.duckdb)?;

    let outcome = build_tables(&conn, config, progress)?;
    let tables = birdseye_database::stats::table_stats(&conn, STORE_TABLES)?;
    for table in &tables {
        log::info!("{table}");
    }

    conn.execute_batch("CHECKPOINT")?;

    Ok((outcome, tables))
}

/// Replaces `output` with the finished staging store.
///
/// A stale write-ahead log next to `output` belongs to the previous store
/// and must not be replayed against the new one.
fn swap_into_place(staging: &Path, output: &Path) -> Result<(), BuildError> {
    let output_wal = paths::wal_path(output);
    match std::fs::remove_file(&output_wal) {
        Ok(()) => log::debug!("Removed stale {}", output_wal.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    std::fs::rename(staging, output)?;
    Ok(())
}

/// Attaches the configured input and runs every stage on `conn`.
///
/// # Errors
///
/// Returns [`BuildError::Stage`] wrapping the first failure.
pub fn build_tables(
    conn: &Connection,
    config: &BuildConfig,
    progress: &dyn ProgressCallback,
) -> Result<BuildOutcome, BuildError> {
    progress.set_total(BuildStage::ALL.len() as u64);
    progress.set_position(0);

    let format = run_stage(BuildStage::AttachInput, progress, || {
        source::attach_input(conn, config)
    })?;

    let outcome = run_stage(BuildStage::ValidateSchema, progress, || {
        source::validate_schema(conn)
    })
    .and_then(|()| build_from_raw(conn, config, progress));

    if let Err(e) = source::detach_input(conn, format) {
        log::warn!("Could not detach raw input: {e}");
    }

    outcome
}

/// Runs the stages after input validation against an existing
/// `raw_observations` relation.
///
/// # Errors
///
/// Returns [`BuildError::Stage`] wrapping the first failure.
pub fn build_from_raw(
    conn: &Connection,
    config: &BuildConfig,
    progress: &dyn ProgressCallback,
) -> Result<BuildOutcome, BuildError> {
    let windows = config.windows();

    let localities = run_stage(BuildStage::Localities, progress, || {
        let stats = localities::build(conn, windows.locality_cutoff())?;
        log::info!(
            "localities: {} rows ({} malformed ids, {} duplicate keys)",
            stats.inserted,
            stats.malformed,
            stats.duplicates
        );
        Ok(stats)
    })?;

    run_stage(BuildStage::Taxonomy, progress, || {
        let rows = taxonomy::build(conn, &config.taxonomy)?;
        log::info!("taxonomy: {rows} rows");
        Ok(())
    })?;

    run_stage(BuildStage::Popularity, progress, || {
        let rows = popularity::build(conn, windows.aggregate_cutoff())?;
        log::info!("hotspot_popularity: {rows} rows");
        Ok(())
    })?;

    run_stage(BuildStage::Richness, progress, || {
        let rows = richness::build(conn, windows.aggregate_cutoff())?;
        log::info!("hotspot_richness: {rows} rows");
        Ok(())
    })?;

    let serving_rows = run_stage(BuildStage::Merge, progress, || {
        let rows = serving::build(conn)?;
        log::info!("localities_hotspots: {rows} rows");
        Ok(rows)
    })?;

    let spatial_index_built = run_stage(BuildStage::SpatialIndex, progress, || {
        if config.skip_indexes {
            log::info!("Skipping spatial index creation");
            return Ok(false);
        }
        serving::create_index(conn)?;
        Ok(true)
    })?;

    run_stage(BuildStage::Metadata, progress, || {
        meta::record_build(
            conn,
            &BuildRecord {
                as_of: config.as_of,
                input: config.input.display().to_string(),
                spatial_index_built,
            },
        )?;
        Ok(())
    })?;

    Ok(BuildOutcome {
        localities,
        serving_rows,
        spatial_index_built,
    })
}

/// Runs one stage, logging its duration and wrapping any failure with the
/// stage identity and elapsed time.
fn run_stage<T>(
    stage: BuildStage,
    progress: &dyn ProgressCallback,
    f: impl FnOnce() -> Result<T, BuildError>,
) -> Result<T, BuildError> {
    log::info!("[{stage}] starting");
    progress.set_message(stage.to_string());

    let start = Instant::now();
    match f() {
        Ok(value) => {
            log::info!(
                "[{stage}] done in {:.2}s",
                start.elapsed().as_secs_f64()
            );
            progress.inc(1);
            Ok(value)
        }
        Err(e) => {
            let elapsed = start.elapsed();
            log::error!(
                "[{stage}] failed after {:.2}s: {e}",
                elapsed.as_secs_f64()
            );
            Err(BuildError::Stage {
                stage,
                elapsed,
                source: Box::new(e),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    const RAW_COLUMNS: &str = "observation_date DATE, locality VARCHAR, locality_id VARCHAR,
        locality_type VARCHAR, latitude DOUBLE, longitude DOUBLE, category VARCHAR,
        common_name VARCHAR, sampling_event_identifier VARCHAR, protocol_name VARCHAR,
        effort_distance_km DOUBLE";

    /// Two hotspots 5 km apart with May checklists in a single week, a
    /// personal location, and a malformed identifier.
    const RAW_ROWS: &str = "
        ('2024-05-06', 'Lakeshore', 'L100', 'H', 43.650, -79.380, 'species', 'Mallard', 'S1', 'Stationary', NULL),
        ('2024-05-06', 'Lakeshore', 'L100', 'H', 43.650, -79.380, 'species', 'Robin', 'S1', 'Stationary', NULL),
        ('2024-05-07', 'Lakeshore', 'L100', 'H', 43.650, -79.380, 'species', 'Mallard', 'S2', 'Traveling', 1.2),
        ('2024-05-08', 'Lakeshore', 'L100', 'H', 43.650, -79.380, 'species', 'Mallard', 'S3', 'Traveling', 3.0),
        ('2024-05-09', 'Lakeshore', 'L100', 'H', 43.650, -79.380, 'species', 'Mallard', 'S4', 'Stationary', NULL),
        ('2024-05-07', 'Ravine', 'L200', 'H', 43.695, -79.380, 'species', 'Wren', 'S5', 'Stationary', NULL),
        ('2024-05-08', 'Ravine', 'L200', 'H', 43.695, -79.380, 'species', 'Wren', 'S6', 'Incidental', NULL),
        ('2024-05-08', 'Backyard', 'L300', 'P', 43.660, -79.390, 'species', 'Robin', 'S7', 'Stationary', NULL),
        ('2024-05-09', 'Bad id', 'XYZ', 'H', 43.700, -79.390, 'species', 'Robin', 'S8', 'Stationary', NULL)";

    fn write_taxonomy(dir: &Path) -> PathBuf {
        let path = dir.join("taxonomy.csv");
        std::fs::write(
            &path,
            "TAXON_ORDER,CATEGORY,PRIMARY_COM_NAME\n1,species,Mallard\n2,species,Robin\n3,species,Wren\n",
        )
        .unwrap();
        path
    }

    fn write_duckdb_input(dir: &Path) -> PathBuf {
        let path = dir.join("ebd.duckdb");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(&format!(
            "CREATE TABLE ebd_sorted ({RAW_COLUMNS}); INSERT INTO ebd_sorted VALUES {RAW_ROWS};"
        ))
        .unwrap();
        path
    }

    fn config(dir: &Path) -> BuildConfig {
        let mut config = BuildConfig::new(write_duckdb_input(dir), write_taxonomy(dir));
        config.as_of = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        config.duckdb.threads = 1;
        config
    }

    fn serving_rows(path: &Path) -> Vec<(String, i32, f64, Option<i64>)> {
        let conn = birdseye_database::open_read_only(path).unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT locality_id, month, avg_weekly_checklists, common_species_count
                 FROM localities_hotspots ORDER BY month, locality_id",
            )
            .unwrap();
        stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
    }

    #[test]
    fn key_sql_matches_parser() {
        let conn = Connection::open_in_memory().unwrap();
        let ids = ["L109516", "L1", "L", "LL12", "L12a", "109516", "L+7", "", "X-3"];

        for id in ids {
            let from_sql: Option<i64> = conn
                .query_row(
                    &format!("SELECT {} FROM (SELECT CAST(? AS VARCHAR) AS id)", locality_key_sql("id")),
                    [id],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(
                from_sql,
                birdseye_hotspot_models::parse_locality_key(id).ok(),
                "id {id:?}"
            );
        }
    }

    #[test]
    fn builds_serving_table_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BuildConfig::new(dir.path().join("raw.duckdb"), write_taxonomy(dir.path()));
        config.as_of = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "CREATE TEMP TABLE raw_observations ({RAW_COLUMNS});
             INSERT INTO raw_observations VALUES {RAW_ROWS};"
        ))
        .unwrap();

        let outcome = build_from_raw(&conn, &config, &NullProgress).unwrap();
        assert_eq!(outcome.localities.inserted, 2);
        assert_eq!(outcome.localities.malformed, 1);
        assert_eq!(outcome.serving_rows, 2);
        assert!(outcome.spatial_index_built);

        let bad: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM localities_hotspots
                 WHERE month NOT BETWEEN 1 AND 12 OR locality_type <> 'H'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(bad, 0);

        // One May week: L100 has four checklists, L200 two.
        let (avg, common, total): (f64, i64, i64) = conn
            .query_row(
                "SELECT avg_weekly_checklists, common_species_count, total_checklists
                 FROM localities_hotspots WHERE locality_id = 'L100'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert!((avg - 4.0).abs() < 1e-12);
        assert_eq!(common, 2);
        assert_eq!(total, 4);

        assert!(!birdseye_database::table_exists(&conn, "hotspot_richness").unwrap());
        assert_eq!(
            meta::get_meta(&conn, meta::SPATIAL_INDEX).unwrap().as_deref(),
            Some(meta::INDEX_BUILT)
        );
    }

    #[test]
    fn run_swaps_finished_store_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let report = run(&config, &null_progress()).unwrap();
        assert_eq!(report.output, dir.path().join("parsed_ebd.duckdb"));
        assert_eq!(report.serving_rows, 2);
        assert!(report.output.exists());
        assert!(!paths::building_path(&report.output).exists());
        assert_eq!(report.tables.len(), STORE_TABLES.len());
        assert!(report.tables.iter().all(|t| t.row_count.is_some()));

        let conn = birdseye_database::open_read_only(&report.output).unwrap();
        assert_eq!(
            meta::get_meta(&conn, meta::AS_OF).unwrap().as_deref(),
            Some("2024-06-01")
        );
        assert_eq!(
            birdseye_database::index_names(&conn, "localities_hotspots").unwrap(),
            vec![birdseye_database::SPATIAL_INDEX_NAME.to_string()]
        );
    }

    #[test]
    fn rebuild_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        run(&config, &null_progress()).unwrap();
        let first = serving_rows(&config.output);
        run(&config, &null_progress()).unwrap();
        let second = serving_rows(&config.output);

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn skipped_index_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.skip_indexes = true;

        let report = run(&config, &null_progress()).unwrap();
        assert!(!report.spatial_index_built);

        let conn = birdseye_database::open_read_only(&report.output).unwrap();
        assert!(
            birdseye_database::index_names(&conn, "localities_hotspots")
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            meta::get_meta(&conn, meta::SPATIAL_INDEX).unwrap().as_deref(),
            Some(meta::INDEX_SKIPPED)
        );
    }

    #[test]
    fn failed_stage_keeps_previous_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        run(&config, &null_progress()).unwrap();
        let before = serving_rows(&config.output);

        // Drop a required column from the input.
        {
            let conn = Connection::open(&config.input).unwrap();
            conn.execute_batch("ALTER TABLE ebd_sorted DROP COLUMN protocol_name")
                .unwrap();
        }

        let err = run(&config, &null_progress()).unwrap_err();
        assert_eq!(err.stage(), Some(BuildStage::ValidateSchema));
        assert!(err.to_string().contains("protocol_name"));
        assert!(!paths::building_path(&config.output).exists());
        assert_eq!(serving_rows(&config.output), before);
    }

    #[test]
    fn missing_input_fails_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let config = BuildConfig::new(dir.path().join("nope.duckdb"), write_taxonomy(dir.path()));

        let err = run(&config, &null_progress()).unwrap_err();
        assert!(matches!(err, BuildError::Configuration(_)));
        assert!(err.stage().is_none());
        assert!(!config.output.exists());
    }
}
