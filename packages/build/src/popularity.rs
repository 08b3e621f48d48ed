//! Weekly popularity aggregator.
//!
//! `avg_weekly_checklists` for a locality and month is the number of
//! distinct checklists submitted there in that calendar month (across
//! every year of the window) divided by the number of distinct weeks that
//! month has *anywhere in the dataset*. The denominator is shared by all
//! localities, so a site visited once in a busy month gets a very small
//! average. Consumers have relied on this normalisation, so it stays.

use birdseye_database::tables;
use chrono::NaiveDate;
use duckdb::Connection;

use crate::config::date_literal;
use crate::{BuildError, locality_key_sql};

/// Rebuilds `hotspot_popularity` from observations after `cutoff`.
///
/// Only (locality, month) pairs with at least one checklist get a row.
///
/// # Errors
///
/// Returns a database error if the aggregation fails.
pub fn build(conn: &Connection, cutoff: NaiveDate) -> Result<u64, BuildError> {
    conn.execute_batch(&format!(
        "CREATE OR REPLACE TABLE hotspot_popularity AS
         WITH windowed AS (
             SELECT
                 {key} AS locality_id_int,
                 CAST(observation_date AS DATE) AS obs_date,
                 sampling_event_identifier
             FROM {raw}
             WHERE CAST(observation_date AS DATE) > {cutoff}
         ),
         weeks_per_month AS (
             SELECT
                 month(obs_date) AS month,
                 COUNT(DISTINCT date_trunc('week', obs_date)) AS week_count
             FROM windowed
             GROUP BY month(obs_date)
         ),
         checklists_per_month AS (
             SELECT
                 locality_id_int,
                 month(obs_date) AS month,
                 COUNT(DISTINCT sampling_event_identifier) AS checklist_count
             FROM windowed
             WHERE locality_id_int IS NOT NULL
             GROUP BY locality_id_int, month(obs_date)
         )
         SELECT
             c.locality_id_int,
             CAST(c.month AS INTEGER) AS month,
             CAST(c.checklist_count AS DOUBLE) / w.week_count AS avg_weekly_checklists
         FROM checklists_per_month c
         JOIN weeks_per_month w ON c.month = w.month
         WHERE c.checklist_count > 0
         ORDER BY c.locality_id_int, c.month",
        key = locality_key_sql("locality_id"),
        raw = tables::RAW_OBSERVATIONS,
        cutoff = date_literal(cutoff),
    ))?;

    Ok(birdseye_database::count_rows(
        conn,
        tables::HOTSPOT_POPULARITY,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divides_by_dataset_wide_weeks() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TEMP TABLE raw_observations (
                observation_date DATE, locality_id VARCHAR, sampling_event_identifier VARCHAR
            );
            INSERT INTO raw_observations VALUES
                -- L1: three checklists in May, one of them with two rows
                ('2024-05-06', 'L1', 'S1'),
                ('2024-05-06', 'L1', 'S1'),
                ('2024-05-07', 'L1', 'S2'),
                ('2024-05-14', 'L1', 'S3'),
                -- L2 adds a third and fourth May week to the dataset
                ('2024-05-21', 'L2', 'S4'),
                ('2023-05-29', 'L2', 'S5'),
                -- June, single week
                ('2024-06-03', 'L1', 'S6'),
                -- malformed id, still counts towards the week total
                ('2024-06-10', '99', 'S7'),
                -- outside the window
                ('2010-05-03', 'L1', 'S8');",
        )
        .unwrap();

        let rows = build(&conn, NaiveDate::from_ymd_opt(2019, 6, 1).unwrap()).unwrap();
        assert_eq!(rows, 3);

        let avg = |key: i64, month: i32| -> f64 {
            conn.query_row(
                "SELECT avg_weekly_checklists FROM hotspot_popularity
                 WHERE locality_id_int = ? AND month = ?",
                duckdb::params![key, month],
                |row| row.get(0),
            )
            .unwrap()
        };

        // May has four distinct weeks: 2024-05-06, 05-13, 05-20, 2023-05-29.
        assert!((avg(1, 5) - 3.0 / 4.0).abs() < 1e-12);
        assert!((avg(2, 5) - 2.0 / 4.0).abs() < 1e-12);
        // June has two distinct weeks: 06-03 and 06-10.
        assert!((avg(1, 6) - 1.0 / 2.0).abs() < 1e-12);
    }
}
