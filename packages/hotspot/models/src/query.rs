//! Online query parameters and response records.

use serde::{Deserialize, Serialize};

use crate::HotspotSummary;

/// Rows below this many weekly checklists are treated as single-visit
/// noise and never returned.
pub const MIN_AVG_WEEKLY_CHECKLISTS: f64 = 1.0;

/// A ranked-hotspot search around a point for one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HotspotQuery {
    /// Center latitude, -90 to 90.
    pub latitude: f64,
    /// Center longitude, -180 to 180.
    pub longitude: f64,
    /// Search radius in kilometers, strictly positive.
    pub radius_km: f64,
    /// Calendar month, 1-12.
    pub month: u32,
    /// Maximum number of results (`None` = all matches).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Rejected query parameters.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum InvalidQuery {
    /// Latitude outside -90..=90 or not finite.
    #[error("latitude {0} is outside -90..=90")]
    Latitude(f64),
    /// Longitude outside -180..=180 or not finite.
    #[error("longitude {0} is outside -180..=180")]
    Longitude(f64),
    /// Radius not strictly positive or not finite.
    #[error("radius {0} km must be a positive number")]
    Radius(f64),
    /// Month outside 1..=12.
    #[error("month {0} is outside 1..=12")]
    Month(u32),
}

impl HotspotQuery {
    /// Creates an uncapped query.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, radius_km: f64, month: u32) -> Self {
        Self {
            latitude,
            longitude,
            radius_km,
            month,
            limit: None,
        }
    }

    /// Caps the number of returned rows.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Checks every parameter range.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvalidQuery`] found, in the order latitude,
    /// longitude, radius, month.
    pub fn validate(&self) -> Result<(), InvalidQuery> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(InvalidQuery::Latitude(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(InvalidQuery::Longitude(self.longitude));
        }
        if !self.radius_km.is_finite() || self.radius_km <= 0.0 {
            return Err(InvalidQuery::Radius(self.radius_km));
        }
        if !(1..=12).contains(&self.month) {
            return Err(InvalidQuery::Month(self.month));
        }
        Ok(())
    }
}

/// One ranked hotspot returned by a query.
///
/// Field names are snake case to stay compatible with existing consumers
/// of the JSON output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularHotspotResult {
    /// String identifier.
    pub locality_id: String,
    /// Display name.
    pub locality_name: String,
    /// Raw locality type code.
    pub locality_type: String,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Average weekly checklists for the queried month.
    pub avg_weekly_checklists: f64,
    /// Common species count, if a richness estimate exists.
    pub common_species_count: Option<i64>,
    /// Uncommon species count, if a richness estimate exists.
    pub uncommon_species_count: Option<i64>,
    /// Common plus uncommon, if a richness estimate exists.
    pub common_and_uncommon_species_count: Option<i64>,
    /// Standard error of the common count, if a richness estimate exists.
    pub standard_error: Option<f64>,
    /// Great-circle distance from the query center.
    pub distance_km: f64,
}

impl PopularHotspotResult {
    /// Builds a response record from a serving row and its distance.
    #[must_use]
    pub fn from_summary(summary: &HotspotSummary, distance_km: f64) -> Self {
        let richness = summary.richness.as_ref();

        Self {
            locality_id: summary.locality_id.clone(),
            locality_name: summary.locality_name.clone(),
            locality_type: summary.locality_type.clone(),
            latitude: summary.latitude,
            longitude: summary.longitude,
            avg_weekly_checklists: summary.avg_weekly_checklists,
            common_species_count: richness.map(|r| r.common_species_count),
            uncommon_species_count: richness.map(|r| r.uncommon_species_count),
            common_and_uncommon_species_count: richness
                .map(|r| r.common_and_uncommon_species_count),
            standard_error: richness.map(|r| r.standard_error),
            distance_km,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RichnessEstimate;

    #[test]
    fn accepts_boundary_values() {
        assert!(HotspotQuery::new(90.0, 180.0, 0.001, 12).validate().is_ok());
        assert!(HotspotQuery::new(-90.0, -180.0, 50.0, 1).validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range() {
        assert_eq!(
            HotspotQuery::new(91.0, 0.0, 1.0, 1).validate(),
            Err(InvalidQuery::Latitude(91.0))
        );
        assert_eq!(
            HotspotQuery::new(0.0, -180.5, 1.0, 1).validate(),
            Err(InvalidQuery::Longitude(-180.5))
        );
        assert_eq!(
            HotspotQuery::new(0.0, 0.0, 0.0, 1).validate(),
            Err(InvalidQuery::Radius(0.0))
        );
        assert_eq!(
            HotspotQuery::new(0.0, 0.0, 1.0, 13).validate(),
            Err(InvalidQuery::Month(13))
        );
        assert_eq!(
            HotspotQuery::new(0.0, 0.0, 1.0, 0).validate(),
            Err(InvalidQuery::Month(0))
        );
    }

    #[test]
    fn rejects_non_finite() {
        assert!(HotspotQuery::new(f64::NAN, 0.0, 1.0, 1).validate().is_err());
        assert!(
            HotspotQuery::new(0.0, 0.0, f64::INFINITY, 1)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn result_serializes_with_null_richness() {
        let summary = HotspotSummary {
            locality_id: "L123".to_string(),
            locality_name: "Test Park".to_string(),
            locality_type: "H".to_string(),
            latitude: 43.6532,
            longitude: -79.3832,
            month: 5,
            avg_weekly_checklists: 15.5,
            richness: None,
        };

        let json = serde_json::to_value(PopularHotspotResult::from_summary(&summary, 0.0)).unwrap();
        assert_eq!(json["locality_id"], "L123");
        assert_eq!(json["avg_weekly_checklists"], 15.5);
        assert!(json["common_species_count"].is_null());
        assert!(json["standard_error"].is_null());
    }

    #[test]
    fn result_carries_richness() {
        let summary = HotspotSummary {
            locality_id: "L9".to_string(),
            locality_name: "Marsh".to_string(),
            locality_type: "H".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            month: 1,
            avg_weekly_checklists: 2.0,
            richness: RichnessEstimate::from_counts(9, 3, 36),
        };

        let result = PopularHotspotResult::from_summary(&summary, 1.5);
        assert_eq!(result.common_species_count, Some(9));
        assert_eq!(result.common_and_uncommon_species_count, Some(12));
        assert_eq!(result.distance_km, 1.5);
    }
}
