//! Interactive menu used when `birdseye` runs without a subcommand.
//!
//! Prompts with `dialoguer` for the same inputs the subcommands take, then
//! runs the chosen action.

use std::path::PathBuf;

use birdseye_build::BuildConfig;
use birdseye_cli_utils::MultiProgress;
use birdseye_database::paths;
use birdseye_hotspot_models::HotspotQuery;
use chrono::Datelike as _;
use dialoguer::{Confirm, Input, Select};

use crate::output::OutputFormat;

enum Action {
    Build,
    Query,
    Stats,
}

impl Action {
    const ALL: &[Self] = &[Self::Build, Self::Query, Self::Stats];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Build => "Build serving store",
            Self::Query => "Find popular hotspots",
            Self::Stats => "Show store statistics",
        }
    }
}

/// Runs the interactive menu.
///
/// # Errors
///
/// Returns an error if a prompt fails or the chosen action fails.
pub fn run(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    println!("Birdseye Hotspot Toolchain");
    println!();

    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match Action::ALL[idx] {
        Action::Build => build(multi),
        Action::Query => query(multi),
        Action::Stats => crate::run_stats(&prompt_db_path()?),
    }
}

fn build(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    let input: String = Input::new()
        .with_prompt("Raw observation export (DuckDB, CSV, or Parquet)")
        .interact_text()?;

    let taxonomy: String = Input::new()
        .with_prompt("Taxonomy CSV")
        .interact_text()?;

    let mut config = BuildConfig::new(input.trim(), taxonomy.trim());

    let output: String = Input::new()
        .with_prompt("Output store")
        .default(config.output.display().to_string())
        .interact_text()?;
    config.output = PathBuf::from(output.trim());

    let as_of: String = Input::new()
        .with_prompt("Reference date (YYYY-MM-DD)")
        .default(config.as_of.to_string())
        .interact_text()?;
    config.as_of = as_of
        .trim()
        .parse()
        .map_err(|e| format!("Invalid date '{as_of}': {e}"))?;

    config.skip_indexes = !Confirm::new()
        .with_prompt("Create spatial index?")
        .default(true)
        .interact()?;

    crate::run_build(multi, &config)
}

fn query(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    let db = prompt_db_path()?;

    let latitude: f64 = Input::new().with_prompt("Latitude").interact_text()?;
    let longitude: f64 = Input::new().with_prompt("Longitude").interact_text()?;

    let radius_km: f64 = Input::new()
        .with_prompt("Radius (km)")
        .default(10.0)
        .interact_text()?;

    let month: u32 = Input::new()
        .with_prompt("Month (1-12)")
        .default(chrono::Local::now().month())
        .validate_with(|m: &u32| {
            if (1..=12).contains(m) {
                Ok(())
            } else {
                Err("month must be between 1 and 12")
            }
        })
        .interact_text()?;

    let limit_str: String = Input::new()
        .with_prompt("Result limit (leave empty for all)")
        .allow_empty(true)
        .interact_text()?;

    let limit: Option<usize> = if limit_str.trim().is_empty() {
        None
    } else {
        Some(
            limit_str
                .trim()
                .parse()
                .map_err(|e| format!("Invalid limit '{limit_str}': {e}"))?,
        )
    };

    let format_labels: Vec<&str> = OutputFormat::ALL.iter().map(|f| f.label()).collect();
    let format_idx = Select::new()
        .with_prompt("Output format")
        .items(&format_labels)
        .default(0)
        .interact()?;

    let query = HotspotQuery {
        latitude,
        longitude,
        radius_km,
        month,
        limit,
    };

    crate::run_query(multi, &db, &query, OutputFormat::ALL[format_idx])
}

fn prompt_db_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut input = Input::<String>::new().with_prompt("Serving store");
    if let Some(path) = paths::db_path_from_env() {
        input = input.default(path.display().to_string());
    }

    let path: String = input.interact_text()?;
    Ok(PathBuf::from(path.trim()))
}
