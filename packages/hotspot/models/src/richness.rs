//! Checklist-frequency classification and richness statistics.
//!
//! A species is "common" at a locality in a month when it appears on at
//! least [`COMMON_MIN_PERCENT`] percent of that locality's checklists for
//! the month, and "uncommon" from [`UNCOMMON_MIN_PERCENT`] up to (but not
//! including) the common threshold. Anything rarer is left out of both
//! counts.
//!
//! The same thresholds are rendered into the build SQL, so the Rust and
//! SQL sides cannot drift apart.

use serde::{Deserialize, Serialize};

/// Lowest checklist frequency (percent, inclusive) for a common species.
pub const COMMON_MIN_PERCENT: u64 = 6;

/// Lowest checklist frequency (percent, inclusive) for an uncommon species.
pub const UNCOMMON_MIN_PERCENT: u64 = 1;

/// Two-sided 95% normal quantile.
pub const Z_95: f64 = 1.96;

/// Frequency class of a species at one locality in one month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RichnessClass {
    /// Appears on at least 6% of checklists.
    Common,
    /// Appears on 1% up to 6% of checklists.
    Uncommon,
}

impl RichnessClass {
    /// Classifies a species seen on `appearances` of `total_checklists`.
    ///
    /// Returns `None` when the species is too rare to report, or when
    /// there are no checklists at all. Uses integer arithmetic so that
    /// exact boundary frequencies land in the documented class.
    #[must_use]
    pub const fn classify(appearances: u64, total_checklists: u64) -> Option<Self> {
        if total_checklists == 0 {
            return None;
        }

        let scaled = appearances.saturating_mul(100);

        if scaled >= total_checklists.saturating_mul(COMMON_MIN_PERCENT) {
            Some(Self::Common)
        } else if scaled >= total_checklists.saturating_mul(UNCOMMON_MIN_PERCENT) {
            Some(Self::Uncommon)
        } else {
            None
        }
    }
}

/// Richness statistics for one locality in one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichnessEstimate {
    /// Species classified [`RichnessClass::Common`].
    pub common_species_count: i64,
    /// Species classified [`RichnessClass::Uncommon`].
    pub uncommon_species_count: i64,
    /// Sum of the two counts above.
    pub common_and_uncommon_species_count: i64,
    /// Qualifying checklists the frequencies were computed from.
    pub total_checklists: i64,
    /// `sqrt(common) / total_checklists`.
    pub standard_error: f64,
    /// `common - 1.96 * sqrt(common)`.
    pub ci_lower: f64,
    /// `common + 1.96 * sqrt(common)`.
    pub ci_upper: f64,
}

impl RichnessEstimate {
    /// Derives the statistics from the raw class counts.
    ///
    /// Returns `None` if `total_checklists` is not positive; an estimate
    /// over zero checklists does not exist.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_counts(common: i64, uncommon: i64, total_checklists: i64) -> Option<Self> {
        if total_checklists <= 0 {
            return None;
        }

        let root = (common as f64).sqrt();

        Some(Self {
            common_species_count: common,
            uncommon_species_count: uncommon,
            common_and_uncommon_species_count: common + uncommon,
            total_checklists,
            standard_error: root / total_checklists as f64,
            ci_lower: Z_95.mul_add(-root, common as f64),
            ci_upper: Z_95.mul_add(root, common as f64),
        })
    }
}
