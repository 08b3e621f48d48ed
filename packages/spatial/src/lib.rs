#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! In-memory spatial index for hotspot radius queries.
//!
//! Loads the `localities_hotspots` serving table from `DuckDB`, builds one
//! R-tree per calendar month, and answers "everything within R km of this
//! point" by prefiltering on spherical bounding boxes and confirming each
//! candidate with the haversine distance.

pub mod distance;
pub mod geometry;

use std::collections::BTreeMap;

use birdseye_hotspot_models::{HotspotSummary, RichnessEstimate};
use rstar::{AABB, RTree, RTreeObject};

pub use distance::{EARTH_RADIUS_KM, haversine_km, radius_envelopes};
pub use geometry::{parse_point_geojson, point_geojson};

/// Errors raised while loading serving rows into the index.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// A row's geometry column is not a valid point.
    #[error("Invalid geometry for locality {locality_id}")]
    InvalidGeometry {
        /// Locality whose geometry failed to decode.
        locality_id: String,
    },

    /// A row's month is outside 1-12.
    #[error("Invalid month {month} for locality {locality_id}")]
    InvalidMonth {
        /// Locality the row belongs to.
        locality_id: String,
        /// Stored month value.
        month: i32,
    },
}

/// A serving row stored in the R-tree at its geometry's coordinates.
struct HotspotEntry {
    position: [f64; 2],
    summary: HotspotSummary,
}

impl RTreeObject for HotspotEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

/// A hotspot within the query radius and its distance from the center.
#[derive(Debug, Clone, Copy)]
pub struct RadiusMatch<'a> {
    /// The matching serving row.
    pub summary: &'a HotspotSummary,
    /// Great-circle distance from the query center in kilometers.
    pub distance_km: f64,
}

/// Per-month R-trees over the serving table.
#[derive(Default)]
pub struct HotspotIndex {
    months: BTreeMap<u32, RTree<HotspotEntry>>,
    len: usize,
}

impl std::fmt::Debug for HotspotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotspotIndex")
            .field("months", &self.months.len())
            .field("len", &self.len)
            .finish()
    }
}

const LOAD_QUERY: &str = "SELECT locality_id, locality_name, locality_type, \
     latitude, longitude, geometry, month, avg_weekly_checklists, \
     common_species_count, uncommon_species_count, common_and_uncommon_species_count, \
     total_checklists, standard_error, ci_lower, ci_upper \
     FROM localities_hotspots";

impl HotspotIndex {
    /// Builds the index from `(geometry point, row)` pairs.
    ///
    /// The point is `[lng, lat]`.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = ([f64; 2], HotspotSummary)>) -> Self {
        let mut by_month: BTreeMap<u32, Vec<HotspotEntry>> = BTreeMap::new();

        for (position, summary) in entries {
            by_month
                .entry(summary.month)
                .or_default()
                .push(HotspotEntry { position, summary });
        }

        let len = by_month.values().map(Vec::len).sum();
        let months = by_month
            .into_iter()
            .map(|(month, entries)| (month, RTree::bulk_load(entries)))
            .collect();

        Self { months, len }
    }

    /// Builds the index from rows whose own latitude/longitude are the
    /// indexed position.
    #[must_use]
    pub fn from_summaries(summaries: impl IntoIterator<Item = HotspotSummary>) -> Self {
        Self::from_entries(
            summaries
                .into_iter()
                .map(|s| ([s.longitude, s.latitude], s)),
        )
    }

    /// Loads every row of `localities_hotspots` and builds the index.
    ///
    /// Rows are positioned by their `geometry` column.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the query fails or a row carries an
    /// undecodable geometry or an out-of-range month.
    pub fn load(conn: &duckdb::Connection) -> Result<Self, SpatialError> {
        let mut stmt = conn.prepare(LOAD_QUERY)?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();

        while let Some(row) = rows.next()? {
            let locality_id: String = row.get(0)?;
            let geometry: Option<String> = row.get(5)?;
            let month: i32 = row.get(6)?;

            let Some(point) = geometry.as_deref().and_then(parse_point_geojson) else {
                return Err(SpatialError::InvalidGeometry { locality_id });
            };

            let Some(month) = u32::try_from(month).ok().filter(|m| (1..=12).contains(m)) else {
                return Err(SpatialError::InvalidMonth { locality_id, month });
            };

            let total_checklists: Option<i64> = row.get(11)?;
            let richness = match total_checklists {
                Some(total_checklists) if total_checklists > 0 => Some(RichnessEstimate {
                    common_species_count: row.get(8)?,
                    uncommon_species_count: row.get(9)?,
                    common_and_uncommon_species_count: row.get(10)?,
                    total_checklists,
                    standard_error: row.get(12)?,
                    ci_lower: row.get(13)?,
                    ci_upper: row.get(14)?,
                }),
                _ => None,
            };

            let summary = HotspotSummary {
                locality_id,
                locality_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                locality_type: row.get(2)?,
                latitude: row.get(3)?,
                longitude: row.get(4)?,
                month,
                avg_weekly_checklists: row.get(7)?,
                richness,
            };

            entries.push(([point.x(), point.y()], summary));
        }

        let index = Self::from_entries(entries);
        log::info!(
            "Loaded {} hotspot rows across {} months into spatial index",
            index.len(),
            index.months.len()
        );

        Ok(index)
    }

    /// Total number of indexed rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the index holds no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns every row for `month` whose great-circle distance from
    /// `(lat, lon)` is at most `radius_km`, in no particular order.
    #[must_use]
    pub fn within_radius(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        month: u32,
    ) -> Vec<RadiusMatch<'_>> {
        let Some(tree) = self.months.get(&month) else {
            return Vec::new();
        };

        let mut matches = Vec::new();

        for envelope in radius_envelopes(lat, lon, radius_km) {
            for entry in tree.locate_in_envelope_intersecting(&envelope) {
                let [entry_lon, entry_lat] = entry.position;
                let distance_km = haversine_km(lat, lon, entry_lat, entry_lon);

                if distance_km <= radius_km {
                    matches.push(RadiusMatch {
                        summary: &entry.summary,
                        distance_km,
                    });
                }
            }
        }

        matches
    }
}

#[cfg(test)]
mod tests {
    use duckdb::Connection;

    use super::*;

    fn summary(id: &str, lat: f64, lon: f64, month: u32) -> HotspotSummary {
        HotspotSummary {
            locality_id: id.to_string(),
            locality_name: format!("{id} park"),
            locality_type: "H".to_string(),
            latitude: lat,
            longitude: lon,
            month,
            avg_weekly_checklists: 2.0,
            richness: None,
        }
    }

    #[test]
    fn radius_is_exact_not_boxed() {
        // The second point sits inside the bounding box corner but ~13 km
        // from the center.
        let index = HotspotIndex::from_summaries([
            summary("L1", 43.65, -79.38, 5),
            summary("L2", 43.73, -79.27, 5),
        ]);

        let ids: Vec<_> = index
            .within_radius(43.65, -79.38, 10.0, 5)
            .into_iter()
            .map(|m| m.summary.locality_id.as_str())
            .collect();
        assert_eq!(ids, vec!["L1"]);
    }

    #[test]
    fn months_are_separate() {
        let index = HotspotIndex::from_summaries([
            summary("L1", 43.65, -79.38, 5),
            summary("L1", 43.65, -79.38, 6),
        ]);

        assert_eq!(index.len(), 2);
        assert_eq!(index.within_radius(43.65, -79.38, 1.0, 6).len(), 1);
        assert!(index.within_radius(43.65, -79.38, 1.0, 7).is_empty());
    }

    #[test]
    fn finds_across_antimeridian() {
        let index = HotspotIndex::from_summaries([summary("L1", 0.0, -179.95, 1)]);
        let matches = index.within_radius(0.0, 179.95, 20.0, 1);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].distance_km < 12.0);
    }

    fn serving_table(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE localities_hotspots (
                locality_id VARCHAR, locality_name VARCHAR, locality_type VARCHAR,
                latitude DOUBLE, longitude DOUBLE, geometry VARCHAR, month INTEGER,
                avg_weekly_checklists DOUBLE,
                common_species_count BIGINT, uncommon_species_count BIGINT,
                common_and_uncommon_species_count BIGINT, total_checklists BIGINT,
                standard_error DOUBLE, ci_lower DOUBLE, ci_upper DOUBLE
            );",
        )
        .unwrap();
    }

    #[test]
    fn loads_rows_from_duckdb() {
        let conn = Connection::open_in_memory().unwrap();
        serving_table(&conn);
        conn.execute(
            "INSERT INTO localities_hotspots VALUES
                ('L1', 'Marsh', 'H', 43.65, -79.38, ?, 5, 3.5, 4, 2, 6, 10, 0.2, 0.08, 7.92),
                ('L2', 'Woods', 'H', 43.70, -79.40, ?, 5, 1.5, NULL, NULL, NULL, NULL, NULL, NULL, NULL)",
            duckdb::params![point_geojson(43.65, -79.38), point_geojson(43.70, -79.40)],
        )
        .unwrap();

        let index = HotspotIndex::load(&conn).unwrap();
        assert_eq!(index.len(), 2);

        let mut matches = index.within_radius(43.65, -79.38, 10.0, 5);
        matches.sort_by(|a, b| a.summary.locality_id.cmp(&b.summary.locality_id));
        assert_eq!(matches.len(), 2);
        assert_eq!(
            matches[0]
                .summary
                .richness
                .as_ref()
                .map(|r| r.common_species_count),
            Some(4)
        );
        assert!(matches[1].summary.richness.is_none());
    }

    #[test]
    fn rejects_bad_geometry() {
        let conn = Connection::open_in_memory().unwrap();
        serving_table(&conn);
        conn.execute_batch(
            "INSERT INTO localities_hotspots VALUES
                ('L1', 'Marsh', 'H', 43.65, -79.38, 'garbage', 5, 3.5,
                 NULL, NULL, NULL, NULL, NULL, NULL, NULL)",
        )
        .unwrap();

        assert!(matches!(
            HotspotIndex::load(&conn),
            Err(SpatialError::InvalidGeometry { .. })
        ));
    }
}
