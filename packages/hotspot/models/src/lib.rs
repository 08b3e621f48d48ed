#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Locality, richness, and hotspot query types.
//!
//! These are the shapes shared by the batch build (`birdseye_build`), the
//! online query path (`birdseye_query`), and the spatial index
//! (`birdseye_spatial`). Nothing in here touches the database.

pub mod query;
pub mod richness;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use query::{HotspotQuery, InvalidQuery, MIN_AVG_WEEKLY_CHECKLISTS, PopularHotspotResult};
pub use richness::{RichnessClass, RichnessEstimate};

/// Location type code as it appears in the raw observation export.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum LocalityType {
    /// Publicly cataloged birding location.
    #[strum(serialize = "H")]
    #[serde(rename = "H")]
    Hotspot,
    /// Private location created by a single observer.
    #[strum(serialize = "P")]
    #[serde(rename = "P")]
    Personal,
    /// Town-level location.
    #[strum(serialize = "T")]
    #[serde(rename = "T")]
    Town,
    /// Postal code centroid.
    #[strum(serialize = "PC")]
    #[serde(rename = "PC")]
    PostalCode,
    /// County centroid.
    #[strum(serialize = "C")]
    #[serde(rename = "C")]
    County,
    /// State centroid.
    #[strum(serialize = "S")]
    #[serde(rename = "S")]
    State,
}

impl LocalityType {
    /// The raw code stored in the `locality_type` column for hotspots.
    pub const HOTSPOT_CODE: &'static str = "H";
}

/// Error returned when a locality identifier has no usable numeric suffix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocalityKeyError {
    /// The identifier was empty.
    #[error("empty locality identifier")]
    Empty,

    /// The identifier does not start with a non-digit prefix character.
    #[error("locality identifier {id:?} has no prefix")]
    MissingPrefix {
        /// The offending identifier.
        id: String,
    },

    /// The part after the prefix is not an integer.
    #[error("locality identifier {id:?} has a non-numeric suffix")]
    InvalidSuffix {
        /// The offending identifier.
        id: String,
    },
}

/// Parses the dense integer key out of a locality identifier.
///
/// Identifiers look like `L123456`: one non-digit prefix character followed
/// by a number. The number is used as the join key between the locality,
/// popularity and richness tables.
///
/// # Errors
///
/// Returns [`LocalityKeyError`] if the identifier is empty, starts with a
/// digit, or the remainder does not parse as an integer.
pub fn parse_locality_key(id: &str) -> Result<i64, LocalityKeyError> {
    let mut chars = id.chars();
    let Some(prefix) = chars.next() else {
        return Err(LocalityKeyError::Empty);
    };

    if prefix.is_ascii_digit() {
        return Err(LocalityKeyError::MissingPrefix { id: id.to_string() });
    }

    chars
        .as_str()
        .parse::<i64>()
        .map_err(|_| LocalityKeyError::InvalidSuffix { id: id.to_string() })
}

/// A hotspot row in the `localities` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locality {
    /// String identifier (e.g. `L109516`).
    pub locality_id: String,
    /// Dense integer key parsed from `locality_id`.
    pub locality_id_int: i64,
    /// Display name.
    pub locality_name: String,
    /// Raw locality type code.
    pub locality_type: String,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
}

/// One row of the `localities_hotspots` serving table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotSummary {
    /// String identifier.
    pub locality_id: String,
    /// Display name.
    pub locality_name: String,
    /// Raw locality type code (always the hotspot code in a built store).
    pub locality_type: String,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Calendar month, 1-12.
    pub month: u32,
    /// Distinct checklists divided by the dataset-wide week count.
    pub avg_weekly_checklists: f64,
    /// Richness estimate, absent when no qualifying checklists exist.
    pub richness: Option<RichnessEstimate>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn parses_standard_identifier() {
        assert_eq!(parse_locality_key("L109516"), Ok(109_516));
        assert_eq!(parse_locality_key("L1"), Ok(1));
    }

    #[test]
    fn rejects_missing_prefix() {
        assert_eq!(
            parse_locality_key("109516"),
            Err(LocalityKeyError::MissingPrefix {
                id: "109516".to_string()
            })
        );
    }

    #[test]
    fn rejects_bad_suffix() {
        assert!(matches!(
            parse_locality_key("L"),
            Err(LocalityKeyError::InvalidSuffix { .. })
        ));
        assert!(matches!(
            parse_locality_key("LL12"),
            Err(LocalityKeyError::InvalidSuffix { .. })
        ));
        assert!(matches!(
            parse_locality_key("L12a"),
            Err(LocalityKeyError::InvalidSuffix { .. })
        ));
        assert_eq!(parse_locality_key(""), Err(LocalityKeyError::Empty));
    }

    #[test]
    fn locality_type_codes() {
        assert_eq!(LocalityType::Hotspot.as_ref(), LocalityType::HOTSPOT_CODE);
        assert_eq!(LocalityType::from_str("P"), Ok(LocalityType::Personal));
        assert_eq!(LocalityType::from_str("PC"), Ok(LocalityType::PostalCode));
        assert!(LocalityType::from_str("X").is_err());
    }
}
