//! Locality extractor: deduplicated hotspots seen in the last two years.

use std::collections::BTreeSet;

use birdseye_database::tables;
use birdseye_hotspot_models::{Locality, LocalityType, parse_locality_key};
use chrono::NaiveDate;
use duckdb::Connection;

use crate::BuildError;
use crate::config::date_literal;

/// Rows inserted per transaction.
const CHUNK_SIZE: usize = 5_000;

/// Malformed identifiers logged individually before switching to a
/// summary count.
const MAX_LOGGED_REJECTS: u64 = 20;

/// Outcome of the locality stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalityStats {
    /// Rows written to `localities`.
    pub inserted: u64,
    /// Rows whose identifier had no numeric key.
    pub malformed: u64,
    /// Rows dropped because another row already claimed the same key.
    pub duplicates: u64,
}

/// Rebuilds the `localities` table from `raw_observations`.
///
/// Keeps hotspot rows with both coordinates observed strictly after
/// `cutoff`. Each dense key appears once; when the raw data carries
/// several names or positions for one identifier, the first in
/// `(locality_id, locality_name, latitude, longitude)` order wins.
///
/// # Errors
///
/// Returns a database error if reading candidates or inserting rows fails.
pub fn build(conn: &Connection, cutoff: NaiveDate) -> Result<LocalityStats, BuildError> {
    let candidates = load_candidates(conn, cutoff)?;
    log::info!("Found {} distinct hotspot candidates", candidates.len());

    let mut stats = LocalityStats::default();
    let mut seen = BTreeSet::new();
    let mut localities = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let key = match parse_locality_key(&candidate.locality_id) {
            Ok(key) => key,
            Err(e) => {
                stats.malformed += 1;
                if stats.malformed <= MAX_LOGGED_REJECTS {
                    log::warn!("Skipping locality: {e}");
                }
                continue;
            }
        };

        if !seen.insert(key) {
            stats.duplicates += 1;
            log::debug!(
                "Locality {} repeats key {key}, keeping the first row",
                candidate.locality_id
            );
            continue;
        }

        localities.push(Locality {
            locality_id_int: key,
            ..candidate
        });
    }

    if stats.malformed > 0 {
        log::warn!(
            "Skipped {} localities with malformed identifiers",
            stats.malformed
        );
    }

    create_table(conn)?;
    stats.inserted = insert(conn, &localities)?;

    Ok(stats)
}

fn load_candidates(conn: &Connection, cutoff: NaiveDate) -> Result<Vec<Locality>, BuildError> {
    let sql = format!(
        "SELECT DISTINCT
             CAST(locality_id AS VARCHAR) AS locality_id,
             CAST(locality AS VARCHAR) AS locality_name,
             CAST(locality_type AS VARCHAR) AS locality_type,
             CAST(latitude AS DOUBLE) AS latitude,
             CAST(longitude AS DOUBLE) AS longitude
         FROM {raw}
         WHERE locality_type = '{hotspot}'
           AND locality_id IS NOT NULL
           AND latitude IS NOT NULL
           AND longitude IS NOT NULL
           AND CAST(observation_date AS DATE) > {cutoff}
         ORDER BY locality_id, locality_name, latitude, longitude",
        raw = tables::RAW_OBSERVATIONS,
        hotspot = LocalityType::HOTSPOT_CODE,
        cutoff = date_literal(cutoff),
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut candidates = Vec::new();

    while let Some(row) = rows.next()? {
        candidates.push(Locality {
            locality_id: row.get(0)?,
            locality_id_int: 0,
            locality_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            locality_type: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
        });
    }

    Ok(candidates)
}

fn create_table(conn: &Connection) -> Result<(), BuildError> {
    conn.execute_batch(
        "CREATE OR REPLACE TABLE localities (
            locality_id VARCHAR NOT NULL,
            locality_id_int BIGINT NOT NULL,
            locality_name VARCHAR NOT NULL,
            locality_type VARCHAR NOT NULL,
            latitude DOUBLE NOT NULL,
            longitude DOUBLE NOT NULL,
            geometry VARCHAR NOT NULL
        )",
    )?;
    Ok(())
}

fn insert(conn: &Connection, localities: &[Locality]) -> Result<u64, BuildError> {
    let mut inserted = 0u64;

    for chunk in localities.chunks(CHUNK_SIZE) {
        conn.execute_batch("BEGIN TRANSACTION")?;

        let result = (|| -> Result<(), BuildError> {
            let mut stmt = conn.prepare(
                "INSERT INTO localities
                     (locality_id, locality_id_int, locality_name, locality_type,
                      latitude, longitude, geometry)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )?;

            for locality in chunk {
                stmt.execute(duckdb::params![
                    locality.locality_id,
                    locality.locality_id_int,
                    locality.locality_name,
                    locality.locality_type,
                    locality.latitude,
                    locality.longitude,
                    birdseye_spatial::point_geojson(locality.latitude, locality.longitude),
                ])?;
            }
            Ok(())
        })();

        if let Err(e) = result {
            conn.execute_batch("ROLLBACK").ok();
            return Err(e);
        }

        conn.execute_batch("COMMIT")?;
        inserted += chunk.len() as u64;
    }

    Ok(inserted)
}
