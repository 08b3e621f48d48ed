#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the birdseye toolchain.
//!
//! `birdseye build` turns a raw observation export into the serving store,
//! `birdseye query` ranks hotspots around a point, and `birdseye stats`
//! prints what a store holds. Without a subcommand an interactive menu
//! asks for the same inputs.
//!
//! Uses `indicatif-log-bridge` (via [`birdseye_cli_utils::init_logger`])
//! so log lines and progress bars never fight for the terminal.

mod interactive;
mod output;

use std::path::{Path, PathBuf};

use birdseye_build::BuildConfig;
use birdseye_cli_utils::{IndicatifProgress, MultiProgress};
use birdseye_database::{meta, paths, stats};
use birdseye_hotspot_models::HotspotQuery;
use birdseye_query::HotspotQueryService;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "birdseye", about = "Bird hotspot popularity and richness tool")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the serving store from a raw observation export
    Build(BuildArgs),
    /// Rank hotspots within a radius of a point for one month
    Query(QueryArgs),
    /// Print row counts, sample rows, and build metadata of a store
    Stats(StatsArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Raw observation export (`DuckDB`, CSV, or Parquet)
    input: PathBuf,

    /// Taxonomy CSV
    taxonomy: PathBuf,

    /// Output store [default: `parsed_ebd.duckdb` next to the input]
    #[arg(long)]
    output: Option<PathBuf>,

    /// Skip creating the spatial index
    #[arg(long)]
    skip_indexes: bool,

    /// Reference date for the 2- and 5-year windows [default: today]
    #[arg(long, value_name = "YYYY-MM-DD")]
    as_of: Option<NaiveDate>,

    /// Observation table inside a `DuckDB` input
    #[arg(long, default_value = birdseye_build::config::DEFAULT_SOURCE_TABLE)]
    source_table: String,
}

impl BuildArgs {
    fn into_config(self) -> BuildConfig {
        let mut config = BuildConfig::new(self.input, self.taxonomy);

        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(as_of) = self.as_of {
            config.as_of = as_of;
        }
        config.skip_indexes = self.skip_indexes;
        config.source_table = self.source_table;

        config
    }
}

#[derive(Args)]
struct QueryArgs {
    /// Serving store [default: `$BIRDSEYE_DB_PATH`]
    #[arg(long)]
    db: Option<PathBuf>,

    /// Center latitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,

    /// Center longitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    lon: f64,

    /// Search radius in kilometres
    #[arg(long)]
    radius: f64,

    /// Month of year (1-12)
    #[arg(long)]
    month: u32,

    /// Maximum number of results
    #[arg(long)]
    limit: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,
}

impl QueryArgs {
    const fn query(&self) -> HotspotQuery {
        HotspotQuery {
            latitude: self.lat,
            longitude: self.lon,
            radius_km: self.radius,
            month: self.month,
            limit: self.limit,
        }
    }
}

#[derive(Args)]
struct StatsArgs {
    /// Serving store [default: `$BIRDSEYE_DB_PATH`]
    #[arg(long)]
    db: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = birdseye_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Build(args)) => run_build(&multi, &args.into_config())?,
        Some(Commands::Query(args)) => {
            let db = resolve_db_path(args.db.clone())?;
            run_query(&multi, &db, &args.query(), args.format)?;
        }
        Some(Commands::Stats(args)) => run_stats(&resolve_db_path(args.db)?)?,
        None => interactive::run(&multi)?,
    }

    Ok(())
}

/// Picks the store path from the flag, falling back to
/// [`paths::DB_PATH_ENV`].
fn resolve_db_path(flag: Option<PathBuf>) -> Result<PathBuf, String> {
    flag.or_else(paths::db_path_from_env).ok_or_else(|| {
        format!(
            "No serving store given: pass --db or set {}",
            paths::DB_PATH_ENV
        )
    })
}

/// Builds the store and prints a summary plus per-table statistics.
pub(crate) fn run_build(
    multi: &MultiProgress,
    config: &BuildConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let progress = IndicatifProgress::stages_bar(multi, "Building serving store");

    let report = birdseye_build::run(config, &progress).inspect_err(|e| {
        log::error!("Build failed: {e}");
    })?;

    println!("{}", output::build_summary(&report));
    for table in &report.tables {
        println!("{table}");
    }

    Ok(())
}

/// Opens the store, runs one query, and prints the results.
pub(crate) fn run_query(
    multi: &MultiProgress,
    db: &Path,
    query: &HotspotQuery,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let loading = IndicatifProgress::spinner(multi, &format!("Loading {}", db.display()));
    let service = HotspotQueryService::open(db);
    loading.finish_and_clear();

    let results = service?.query(query)?;
    println!("{}", output::render(&results, format)?);

    Ok(())
}

/// Prints table statistics and build metadata for the store at `db`.
pub(crate) fn run_stats(db: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let conn = birdseye_database::open_read_only(db)?;

    for table in stats::table_stats(&conn, stats::STORE_TABLES)? {
        println!("{table}");
    }

    for &key in meta::KEYS {
        let value = meta::get_meta(&conn, key)?;
        println!("{key}: {}", value.as_deref().unwrap_or("-"));
    }

    Ok(())
}
