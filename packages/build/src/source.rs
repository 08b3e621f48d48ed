//! Exposes the raw observation input as the `raw_observations` view and
//! checks that it carries the columns the stages read.

use birdseye_database::tables;
use duckdb::Connection;

use crate::BuildError;
use crate::config::{BuildConfig, InputFormat, path_literal};

/// Catalog alias for an attached `DuckDB` input.
const INPUT_ALIAS: &str = "raw_input";

/// Columns every stage together depends on.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "observation_date",
    "locality",
    "locality_id",
    "locality_type",
    "latitude",
    "longitude",
    "category",
    "common_name",
    "sampling_event_identifier",
    "protocol_name",
    "effort_distance_km",
];

/// Creates the `raw_observations` temporary view over the configured
/// input.
///
/// `DuckDB` inputs are attached read-only. Delimited text is read with
/// header names normalised to `snake_case`.
///
/// # Errors
///
/// Returns [`BuildError::Configuration`] if a `DuckDB` input lacks the
/// source table, or a database error if the input cannot be read.
pub fn attach_input(conn: &Connection, config: &BuildConfig) -> Result<InputFormat, BuildError> {
    let format = InputFormat::detect(&config.input)?;
    let path = path_literal(&config.input);

    log::info!("Reading {format} input {}", config.input.display());

    let relation = match format {
        InputFormat::DuckDb => {
            conn.execute_batch(&format!(
                "ATTACH {path} AS {INPUT_ALIAS} (READ_ONLY)"
            ))?;

            let found: i64 = conn
                .prepare(
                    "SELECT COUNT(*) FROM duckdb_tables()
                     WHERE database_name = ? AND table_name = ?",
                )?
                .query_row([INPUT_ALIAS, config.source_table.as_str()], |row| {
                    row.get(0)
                })?;

            if found == 0 {
                return Err(BuildError::Configuration(format!(
                    "Table {} not found in {}",
                    config.source_table,
                    config.input.display()
                )));
            }

            format!("{INPUT_ALIAS}.{}", config.source_table)
        }
        InputFormat::Csv => format!("read_csv_auto({path}, header = true, normalize_names = true)"),
        InputFormat::Parquet => format!("read_parquet({path})"),
    };

    conn.execute_batch(&format!(
        "CREATE OR REPLACE TEMP VIEW {} AS SELECT * FROM {relation}",
        tables::RAW_OBSERVATIONS
    ))?;

    Ok(format)
}

/// Drops the view and detaches a `DuckDB` input so the output file holds
/// no reference to it.
///
/// # Errors
///
/// Returns a database error if the cleanup statements fail.
pub fn detach_input(conn: &Connection, format: InputFormat) -> Result<(), BuildError> {
    conn.execute_batch(&format!(
        "DROP VIEW IF EXISTS {}",
        tables::RAW_OBSERVATIONS
    ))?;

    if format == InputFormat::DuckDb {
        conn.execute_batch(&format!("DETACH {INPUT_ALIAS}"))?;
    }

    Ok(())
}

/// Fails with [`BuildError::SchemaMismatch`] listing every required column
/// the raw input lacks.
///
/// # Errors
///
/// Returns [`BuildError::SchemaMismatch`] or a database error.
pub fn validate_schema(conn: &Connection) -> Result<(), BuildError> {
    let present = birdseye_database::column_names(conn, tables::RAW_OBSERVATIONS)?;

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !present.iter().any(|c| c.eq_ignore_ascii_case(required)))
        .map(|c| (*c).to_string())
        .collect();

    if missing.is_empty() {
        log::debug!("Raw input has all {} required columns", REQUIRED_COLUMNS.len());
        Ok(())
    } else {
        Err(BuildError::SchemaMismatch {
            relation: tables::RAW_OBSERVATIONS.to_string(),
            missing,
        })
    }
}
