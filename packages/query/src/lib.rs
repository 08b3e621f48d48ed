#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ranked hotspot queries over a built serving store.
//!
//! [`HotspotQueryService::open`] checks the store (serving table present,
//! spatial index present unless the build skipped it, every geometry
//! decodable), then loads `localities_hotspots` into an immutable
//! in-memory snapshot. Queries never touch the database afterwards, so any
//! number of threads can query concurrently. [`HotspotQueryService::reload`]
//! swaps in a snapshot of a rebuilt store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use birdseye_database::{DbError, SPATIAL_INDEX_NAME, meta, tables};
use birdseye_hotspot_models::{
    HotspotQuery, InvalidQuery, MIN_AVG_WEEKLY_CHECKLISTS, PopularHotspotResult,
};
use birdseye_spatial::{HotspotIndex, SpatialError};

/// Errors returned by the query service.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Query parameters out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] InvalidQuery),

    /// The store is missing, incomplete, or corrupt.
    #[error("Hotspot store at {path} is not built: {reason}")]
    NotBuilt {
        /// Store path.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The store exists but could not be read.
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

/// The loaded serving table.
#[derive(Debug)]
struct Snapshot {
    index: HotspotIndex,
}

/// Answers ranked-hotspot radius queries from an in-memory snapshot of a
/// serving store.
#[derive(Debug)]
pub struct HotspotQueryService {
    path: PathBuf,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl HotspotQueryService {
    /// Verifies and loads the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotBuilt`] if the store or its serving table
    /// or spatial index is missing, or a row cannot be decoded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueryError> {
        let path = path.into();
        let snapshot = load_snapshot(&path)?;

        Ok(Self {
            path,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Store path this service reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows in the current snapshot.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.current().index.len()
    }

    /// Reloads the store from disk and swaps the snapshot in.
    ///
    /// In-flight queries finish against the snapshot they started with.
    /// If loading fails the current snapshot stays in place.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::open`].
    pub fn reload(&self) -> Result<(), QueryError> {
        let snapshot = Arc::new(load_snapshot(&self.path)?);

        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;

        log::info!("Reloaded hotspot store {}", self.path.display());
        Ok(())
    }

    /// Returns hotspots within `query.radius_km` of the center for
    /// `query.month`, busiest first.
    ///
    /// Rows with fewer than [`MIN_AVG_WEEKLY_CHECKLISTS`] are dropped. Ties
    /// on `avg_weekly_checklists` are ordered by locality id. No match is
    /// an empty list, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidArgument`] for out-of-range parameters.
    pub fn query(&self, query: &HotspotQuery) -> Result<Vec<PopularHotspotResult>, QueryError> {
        query.validate()?;

        let snapshot = self.current();

        let mut results: Vec<PopularHotspotResult> = snapshot
            .index
            .within_radius(
                query.latitude,
                query.longitude,
                query.radius_km,
                query.month,
            )
            .into_iter()
            .filter(|m| m.summary.avg_weekly_checklists >= MIN_AVG_WEEKLY_CHECKLISTS)
            .map(|m| PopularHotspotResult::from_summary(m.summary, m.distance_km))
            .collect();

        results.sort_by(|a, b| {
            b.avg_weekly_checklists
                .total_cmp(&a.avg_weekly_checklists)
                .then_with(|| a.locality_id.cmp(&b.locality_id))
        });

        if let Some(limit) = query.limit {
            results.truncate(limit);
        }

        log::debug!(
            "{} hotspots within {} km of ({}, {}) in month {}",
            results.len(),
            query.radius_km,
            query.latitude,
            query.longitude,
            query.month
        );

        Ok(results)
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(
            &self
                .snapshot
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

fn not_built(path: &Path, reason: impl Into<String>) -> QueryError {
    QueryError::NotBuilt {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

fn load_snapshot(path: &Path) -> Result<Snapshot, QueryError> {
    let conn = match birdseye_database::open_read_only(path) {
        Ok(conn) => conn,
        Err(DbError::NotFound { .. }) => return Err(not_built(path, "file does not exist")),
        Err(e) => return Err(e.into()),
    };

    if !birdseye_database::table_exists(&conn, tables::LOCALITIES_HOTSPOTS)? {
        return Err(not_built(
            path,
            format!("table {} is missing", tables::LOCALITIES_HOTSPOTS),
        ));
    }

    let rows = birdseye_database::count_rows(&conn, tables::LOCALITIES_HOTSPOTS)?;
    log::info!("{}: {rows} rows", tables::LOCALITIES_HOTSPOTS);

    let indexes = birdseye_database::index_names(&conn, tables::LOCALITIES_HOTSPOTS)?;
    for index in &indexes {
        log::info!("{} index: {index}", tables::LOCALITIES_HOTSPOTS);
    }

    let has_index = indexes.iter().any(|i| i == SPATIAL_INDEX_NAME);
    match meta::get_meta(&conn, meta::SPATIAL_INDEX)?.as_deref() {
        Some(meta::INDEX_SKIPPED) => {
            log::info!("Store was built without a spatial index");
        }
        Some(meta::INDEX_BUILT) | None if !has_index => {
            return Err(not_built(
                path,
                format!("spatial index {SPATIAL_INDEX_NAME} is missing"),
            ));
        }
        Some(meta::INDEX_BUILT) | None => {}
        Some(other) => {
            return Err(not_built(
                path,
                format!("unrecognised spatial index state {other:?}"),
            ));
        }
    }

    let index = HotspotIndex::load(&conn).map_err(|e| match e {
        SpatialError::DuckDb(e) => not_built(path, format!("serving table unreadable: {e}")),
        e => not_built(path, e.to_string()),
    })?;

    Ok(Snapshot { index })
}
