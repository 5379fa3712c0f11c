use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::PlayerGameStat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub pipeline_name: String,
    pub last_run_at: String,
    pub last_game_date: Option<String>,
    pub updated_at: String,
}

/// `20251105` -> `"2025-11-05"`. Anything that is not an 8-digit valid
/// calendar date decodes to `None`.
pub fn decode_date_key(date_key: i64) -> Option<String> {
    if !(10_000_000..=99_999_999).contains(&date_key) {
        return None;
    }
    let year = i32::try_from(date_key / 10_000).ok()?;
    let month = u32::try_from(date_key / 100 % 100).ok()?;
    let day = u32::try_from(date_key % 100).ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// Latest game date across loaded facts, or `None` when no row carries a
/// decodable date key. Undecodable keys are skipped.
pub fn latest_game_date(rows: &[PlayerGameStat]) -> Option<String> {
    rows.iter()
        .filter_map(|r| r.date_key.and_then(decode_date_key))
        .max()
}

pub struct RunStateTracker;

impl RunStateTracker {
    /// Upserts the pipeline's row. `last_run_at` is always bumped; the game
    /// date is stored as given, including `None`.
    pub fn record(
        conn: &Connection,
        pipeline_name: &str,
        last_game_date: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO meta_run_state (pipeline_name, last_run_at, last_game_date, updated_at)
            VALUES (?1, ?2, ?3, ?2)
            ON CONFLICT(pipeline_name) DO UPDATE SET
                last_run_at = excluded.last_run_at,
                last_game_date = excluded.last_game_date,
                updated_at = excluded.updated_at
            "#,
            params![pipeline_name, now, last_game_date],
        )
        .context("upsert meta_run_state")?;
        log::info!(
            "updated run state for {pipeline_name} (last game date {})",
            last_game_date.unwrap_or("n/a")
        );
        Ok(())
    }

    pub fn load(conn: &Connection, pipeline_name: &str) -> Result<Option<RunState>> {
        conn.query_row(
            "SELECT pipeline_name, last_run_at, last_game_date, updated_at
             FROM meta_run_state WHERE pipeline_name = ?1",
            params![pipeline_name],
            |row| {
                Ok(RunState {
                    pipeline_name: row.get(0)?,
                    last_run_at: row.get(1)?,
                    last_game_date: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        )
        .optional()
        .context("load meta_run_state")
    }
}
