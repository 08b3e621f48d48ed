//! Richness estimator.
//!
//! For each locality and month, every species is classified by the share
//! of that locality/month's checklists it appears on. Only stationary and
//! traveling checklists under 10 km count, and a checklist shared by
//! several observers is counted once. The thresholds and the normal
//! quantile come from [`birdseye_hotspot_models::richness`] so the SQL
//! here and [`RichnessClass::classify`] agree on every boundary.
//!
//! [`RichnessClass::classify`]: birdseye_hotspot_models::RichnessClass::classify

use birdseye_database::tables;
use birdseye_hotspot_models::richness::{COMMON_MIN_PERCENT, UNCOMMON_MIN_PERCENT, Z_95};
use chrono::NaiveDate;
use duckdb::Connection;

use crate::config::date_literal;
use crate::{BuildError, locality_key_sql};

/// Taxonomic category that counts towards richness.
pub const SPECIES_CATEGORY: &str = "species";

/// Protocols whose checklists count towards richness.
pub const PROTOCOLS: &[&str] = &["Stationary", "Traveling"];

/// Checklists covering this distance or more are excluded.
pub const MAX_EFFORT_DISTANCE_KM: f64 = 10.0;

/// Rebuilds `hotspot_richness` from observations after `cutoff`.
///
/// A missing effort distance counts as zero.
///
/// # Errors
///
/// Returns a database error if the aggregation fails.
pub fn build(conn: &Connection, cutoff: NaiveDate) -> Result<u64, BuildError> {
    let protocols = PROTOCOLS
        .iter()
        .map(|p| format!("'{p}'"))
        .collect::<Vec<_>>()
        .join(", ");

    conn.execute_batch(&format!(
        "CREATE OR REPLACE TABLE hotspot_richness AS
         WITH detections AS (
             SELECT DISTINCT
                 month(CAST(observation_date AS DATE)) AS month,
                 {key} AS locality_id_int,
                 sampling_event_identifier,
                 common_name
             FROM {raw}
             WHERE category = '{category}'
               AND protocol_name IN ({protocols})
               AND COALESCE(TRY_CAST(effort_distance_km AS DOUBLE), 0) < {max_distance}
               AND CAST(observation_date AS DATE) > {cutoff}
         ),
         totals AS (
             SELECT
                 locality_id_int,
                 month,
                 COUNT(DISTINCT sampling_event_identifier) AS total_checklists
             FROM detections
             WHERE locality_id_int IS NOT NULL
             GROUP BY locality_id_int, month
         ),
         appearances AS (
             SELECT
                 locality_id_int,
                 month,
                 common_name,
                 COUNT(*) AS checklists_with_species
             FROM detections
             WHERE locality_id_int IS NOT NULL
             GROUP BY locality_id_int, month, common_name
         ),
         counts AS (
             SELECT
                 t.locality_id_int,
                 t.month,
                 t.total_checklists,
                 CAST(COUNT(*) FILTER (
                     WHERE a.checklists_with_species * 100 >= t.total_checklists * {common}
                 ) AS BIGINT) AS common_species_count,
                 CAST(COUNT(*) FILTER (
                     WHERE a.checklists_with_species * 100 >= t.total_checklists * {uncommon}
                       AND a.checklists_with_species * 100 < t.total_checklists * {common}
                 ) AS BIGINT) AS uncommon_species_count
             FROM totals t
             JOIN appearances a
               ON a.locality_id_int = t.locality_id_int AND a.month = t.month
             GROUP BY t.locality_id_int, t.month, t.total_checklists
         )
         SELECT
             locality_id_int,
             CAST(month AS INTEGER) AS month,
             common_species_count,
             uncommon_species_count,
             common_species_count + uncommon_species_count AS common_and_uncommon_species_count,
             CAST(total_checklists AS BIGINT) AS total_checklists,
             sqrt(common_species_count) / total_checklists AS standard_error,
             common_species_count - {z} * sqrt(common_species_count) AS ci_lower,
             common_species_count + {z} * sqrt(common_species_count) AS ci_upper
         FROM counts
         WHERE total_checklists > 0
         ORDER BY standard_error ASC, locality_id_int, month",
        key = locality_key_sql("locality_id"),
        raw = tables::RAW_OBSERVATIONS,
        category = SPECIES_CATEGORY,
        max_distance = sql_double(MAX_EFFORT_DISTANCE_KM),
        cutoff = date_literal(cutoff),
        common = COMMON_MIN_PERCENT,
        uncommon = UNCOMMON_MIN_PERCENT,
        z = sql_double(Z_95),
    ))?;

    Ok(birdseye_database::count_rows(
        conn,
        tables::HOTSPOT_RICHNESS,
    )?)
}

/// Renders a float as a `DOUBLE` literal so arithmetic stays in floating
/// point rather than `DECIMAL`.
fn sql_double(value: f64) -> String {
    format!("CAST({value:?} AS DOUBLE)")
}
