//! Build inputs, time windows, and input format detection.

use std::path::{Path, PathBuf};

use birdseye_database::DuckDbSettings;
use chrono::{Months, NaiveDate};
use strum_macros::Display;

use crate::BuildError;

/// Table read from a `DuckDB` input when none is named.
pub const DEFAULT_SOURCE_TABLE: &str = "ebd_sorted";

/// Trailing window for the locality extractor.
pub const LOCALITY_WINDOW_YEARS: u32 = 2;

/// Trailing window for popularity and richness.
pub const AGGREGATE_WINDOW_YEARS: u32 = 5;

/// On-disk format of the raw observation input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum InputFormat {
    /// A `DuckDB` database file containing the observation table.
    #[strum(serialize = "duckdb")]
    DuckDb,
    /// Delimited text, optionally gzip-compressed.
    #[strum(serialize = "csv")]
    Csv,
    /// Apache Parquet.
    #[strum(serialize = "parquet")]
    Parquet,
}

impl InputFormat {
    /// Infers the format from the file name.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Configuration`] for unrecognised extensions.
    pub fn detect(path: &Path) -> Result<Self, BuildError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let name = name.strip_suffix(".gz").unwrap_or(&name);

        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match extension {
            "duckdb" | "db" => Ok(Self::DuckDb),
            "csv" | "tsv" | "txt" => Ok(Self::Csv),
            "parquet" => Ok(Self::Parquet),
            _ => Err(BuildError::Configuration(format!(
                "Cannot tell the format of {} (expected .duckdb, .db, .csv, .tsv, .txt or .parquet)",
                path.display()
            ))),
        }
    }
}

/// Everything a build needs.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Raw observation input.
    pub input: PathBuf,
    /// Taxonomy CSV.
    pub taxonomy: PathBuf,
    /// Final serving store location.
    pub output: PathBuf,
    /// Skip creating the spatial index.
    pub skip_indexes: bool,
    /// Reference date the trailing windows are measured back from.
    pub as_of: NaiveDate,
    /// Table to read when the input is a `DuckDB` file.
    pub source_table: String,
    /// `DuckDB` session settings.
    pub duckdb: DuckDbSettings,
}

impl BuildConfig {
    /// Creates a config with the default output path (next to the input),
    /// today's date, and settings from the environment.
    #[must_use]
    pub fn new(input: impl Into<PathBuf>, taxonomy: impl Into<PathBuf>) -> Self {
        let input = input.into();
        let output = birdseye_database::paths::default_output_path(&input);

        Self {
            input,
            taxonomy: taxonomy.into(),
            output,
            skip_indexes: false,
            as_of: chrono::Local::now().date_naive(),
            source_table: DEFAULT_SOURCE_TABLE.to_string(),
            duckdb: DuckDbSettings::from_env(),
        }
    }

    /// Checks that both inputs exist and the names are usable.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Configuration`] describing the first problem.
    pub fn validate(&self) -> Result<(), BuildError> {
        if !self.input.is_file() {
            return Err(BuildError::Configuration(format!(
                "Input dataset not found: {}",
                self.input.display()
            )));
        }

        if !self.taxonomy.is_file() {
            return Err(BuildError::Configuration(format!(
                "Taxonomy CSV not found: {}",
                self.taxonomy.display()
            )));
        }

        if !is_identifier(&self.source_table) {
            return Err(BuildError::Configuration(format!(
                "Invalid source table name: {:?}",
                self.source_table
            )));
        }

        if self.output == self.input {
            return Err(BuildError::Configuration(
                "Output path must differ from the input path".to_string(),
            ));
        }

        InputFormat::detect(&self.input)?;

        Ok(())
    }

    /// Time windows anchored at [`Self::as_of`].
    #[must_use]
    pub const fn windows(&self) -> TimeWindows {
        TimeWindows { as_of: self.as_of }
    }
}

/// Trailing date windows for the build stages.
///
/// A row is inside a window when its observation date is strictly after
/// the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindows {
    /// Reference date.
    pub as_of: NaiveDate,
}

impl TimeWindows {
    /// Cutoff `years` before the reference date. February 29 maps to
    /// February 28 in non-leap years.
    #[must_use]
    pub fn cutoff(&self, years: u32) -> NaiveDate {
        self.as_of
            .checked_sub_months(Months::new(years.saturating_mul(12)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Cutoff for the locality extractor.
    #[must_use]
    pub fn locality_cutoff(&self) -> NaiveDate {
        self.cutoff(LOCALITY_WINDOW_YEARS)
    }

    /// Cutoff for popularity and richness.
    #[must_use]
    pub fn aggregate_cutoff(&self) -> NaiveDate {
        self.cutoff(AGGREGATE_WINDOW_YEARS)
    }
}

/// SQL date literal for `date`.
pub(crate) fn date_literal(date: NaiveDate) -> String {
    format!("DATE '{}'", date.format("%Y-%m-%d"))
}

/// SQL string literal for a filesystem path.
pub(crate) fn path_literal(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_formats() {
        assert_eq!(
            InputFormat::detect(Path::new("/data/ebd_sorted.duckdb")).unwrap(),
            InputFormat::DuckDb
        );
        assert_eq!(
            InputFormat::detect(Path::new("ebd_relMay-2024.txt.gz")).unwrap(),
            InputFormat::Csv
        );
        assert_eq!(
            InputFormat::detect(Path::new("obs.PARQUET")).unwrap(),
            InputFormat::Parquet
        );
        assert!(matches!(
            InputFormat::detect(Path::new("obs.xlsx")),
            Err(BuildError::Configuration(_))
        ));
    }

    #[test]
    fn cutoffs_follow_as_of() {
        let windows = TimeWindows {
            as_of: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
        };
        assert_eq!(
            windows.locality_cutoff(),
            NaiveDate::from_ymd_opt(2022, 2, 28).unwrap()
        );
        assert_eq!(
            windows.aggregate_cutoff(),
            NaiveDate::from_ymd_opt(2019, 2, 28).unwrap()
        );
    }

    #[test]
    fn missing_inputs_are_configuration_errors() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ebd.duckdb");
        let taxonomy = dir.path().join("taxonomy.csv");

        let config = BuildConfig::new(&input, &taxonomy);
        assert_eq!(config.output, dir.path().join("parsed_ebd.duckdb"));
        assert!(matches!(
            config.validate(),
            Err(BuildError::Configuration(msg)) if msg.contains("Input dataset")
        ));

        std::fs::write(&input, b"").unwrap();
        assert!(matches!(
            config.validate(),
            Err(BuildError::Configuration(msg)) if msg.contains("Taxonomy")
        ));
    }

    #[test]
    fn rejects_unsafe_table_names() {
        assert!(is_identifier("ebd_sorted"));
        assert!(!is_identifier("ebd; DROP TABLE x"));
        assert!(!is_identifier("1ebd"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn quotes_paths() {
        assert_eq!(path_literal(Path::new("/tmp/o'brien.csv")), "'/tmp/o''brien.csv'");
    }
}
