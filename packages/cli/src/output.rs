//! Rendering of query results and build reports.

use std::fmt::Write as _;

use birdseye_build::BuildReport;
use birdseye_hotspot_models::PopularHotspotResult;
use clap::ValueEnum;

/// How query results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON array.
    Json,
    /// Aligned text table.
    Table,
}

impl OutputFormat {
    pub const ALL: &[Self] = &[Self::Json, Self::Table];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::Table => "Table",
        }
    }
}

/// Renders `results` in `format`.
///
/// # Errors
///
/// Returns a `serde_json` error if JSON serialization fails.
pub fn render(
    results: &[PopularHotspotResult],
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(results),
        OutputFormat::Table => Ok(render_table(results)),
    }
}

const HEADERS: [&str; 7] = [
    "LOCALITY", "NAME", "AVG/WEEK", "COMMON", "UNCOMMON", "STD ERR", "KM",
];

/// Columns right-aligned in the table.
const NUMERIC: [bool; 7] = [false, false, true, true, true, true, true];

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn render_table(results: &[PopularHotspotResult]) -> String {
    if results.is_empty() {
        return "No hotspots found".to_string();
    }

    let rows: Vec<[String; 7]> = results
        .iter()
        .map(|r| {
            [
                r.locality_id.clone(),
                r.locality_name.clone(),
                format!("{:.2}", r.avg_weekly_checklists),
                optional(r.common_species_count),
                optional(r.uncommon_species_count),
                optional(r.standard_error.map(|se| format!("{se:.4}"))),
                format!("{:.2}", r.distance_km),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    write_row(&mut out, &HEADERS.map(str::to_string), &widths);
    for row in &rows {
        out.push('\n');
        write_row(&mut out, row, &widths);
    }
    out
}

fn write_row(out: &mut String, cells: &[String; 7], widths: &[usize; 7]) {
    let line = cells
        .iter()
        .zip(widths)
        .zip(NUMERIC)
        .map(|((cell, &width), numeric)| {
            let pad = " ".repeat(width - cell.chars().count());
            if numeric {
                format!("{pad}{cell}")
            } else {
                format!("{cell}{pad}")
            }
        })
        .collect::<Vec<_>>()
        .join("  ");

    out.push_str(line.trim_end());
}

/// One-line summary of a finished build.
#[must_use]
pub fn build_summary(report: &BuildReport) -> String {
    let mut out = format!(
        "Built {} in {:.1}s: {} localities, {} serving rows, spatial index {}",
        report.output.display(),
        report.elapsed.as_secs_f64(),
        report.localities.inserted,
        report.serving_rows,
        if report.spatial_index_built {
            "built"
        } else {
            "skipped"
        },
    );

    if report.localities.malformed > 0 || report.localities.duplicates > 0 {
        let _ = write!(
            out,
            " ({} malformed and {} duplicate locality ids skipped)",
            report.localities.malformed, report.localities.duplicates
        );
    }

    out
}
