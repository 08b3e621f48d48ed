//! Merged serving table and its spatial index.

use birdseye_database::{SPATIAL_INDEX_NAME, tables};
use birdseye_hotspot_models::LocalityType;
use duckdb::Connection;

use crate::BuildError;

/// Joins localities, popularity, and richness into `localities_hotspots`,
/// then drops the richness intermediate.
///
/// Localities without any popularity row are left out. Richness columns
/// are `NULL` where no estimate exists. `cell_lat`/`cell_lng` are the
/// 1-degree grid cell of the point and back the spatial index.
///
/// # Errors
///
/// Returns a database error if the join or the drop fails.
pub fn build(conn: &Connection) -> Result<u64, BuildError> {
    conn.execute_batch(&format!(
        "CREATE OR REPLACE TABLE localities_hotspots AS
         SELECT
             l.locality_id,
             l.locality_name,
             l.latitude,
             l.longitude,
             l.locality_type,
             l.geometry,
             p.month,
             p.avg_weekly_checklists,
             r.common_species_count,
             r.uncommon_species_count,
             r.common_and_uncommon_species_count,
             r.standard_error,
             r.total_checklists,
             r.ci_lower,
             r.ci_upper,
             CAST(FLOOR(l.latitude) AS INTEGER) AS cell_lat,
             CAST(FLOOR(l.longitude) AS INTEGER) AS cell_lng
         FROM localities l
         JOIN hotspot_popularity p
           ON p.locality_id_int = l.locality_id_int
         LEFT JOIN hotspot_richness r
           ON r.locality_id_int = p.locality_id_int AND r.month = p.month
         WHERE l.locality_type = '{hotspot}'
         ORDER BY p.month, l.locality_id;

         DROP TABLE IF EXISTS {richness};",
        hotspot = LocalityType::HOTSPOT_CODE,
        richness = tables::HOTSPOT_RICHNESS,
    ))?;

    Ok(birdseye_database::count_rows(
        conn,
        tables::LOCALITIES_HOTSPOTS,
    )?)
}

/// Creates the grid-cell index on `localities_hotspots`.
///
/// # Errors
///
/// Returns a database error if index creation fails.
pub fn create_index(conn: &Connection) -> Result<(), BuildError> {
    conn.execute_batch(&format!(
        "CREATE INDEX {SPATIAL_INDEX_NAME} ON {} (month, cell_lat, cell_lng)",
        tables::LOCALITIES_HOTSPOTS
    ))?;
    Ok(())
}
