//! Coerces intermediate snapshots into the exact row shapes the warehouse
//! staging tables take.
//!
//! Keys are canonicalised to strings and rows without them are dropped.
//! Nullable text gets a sentinel, integer columns fall back to zero, and
//! anything outside the staging shape is ignored.

use serde::Serialize;

use crate::dimension;
use crate::error::Warning;
use crate::models::{PlayerGameStat, StatLine};
use crate::snapshot::{RowRef, Table, Value};

pub const UNKNOWN_POSITION: &str = "UNK";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingReport {
    pub table: String,
    pub rows_in: usize,
    pub rows_out: usize,
    pub dropped_missing_key: usize,
    /// Cells that were null or unparseable and took their column default.
    pub coerced_to_default: usize,
}

impl StagingReport {
    fn new(table: &str, rows_in: usize) -> Self {
        Self {
            table: table.to_string(),
            rows_in,
            rows_out: 0,
            dropped_missing_key: 0,
            coerced_to_default: 0,
        }
    }

    pub fn warning(&self) -> Option<Warning> {
        (self.dropped_missing_key > 0).then(|| Warning::RowValidation {
            table: self.table.clone(),
            dropped: self.dropped_missing_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPlayer {
    pub player_id: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub position: String,
    pub birth_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInjury {
    pub player_id: String,
    pub season: i64,
    pub week: i64,
    pub injury_type: String,
    pub status: String,
}

/// Canonical string form of a key cell: trimmed, integral numbers without a
/// decimal point. Null and blank values are missing.
pub fn canonical_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Str(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Float(v) if !v.is_finite() => None,
        other => Some(other.to_string()),
    }
}

fn int_or_zero(value: &Value, report: &mut StagingReport) -> i64 {
    match value.as_i64() {
        Some(v) => v,
        None => {
            report.coerced_to_default += 1;
            0
        }
    }
}

fn text_or(row: &RowRef<'_>, column: &str, default: &str, report: &mut StagingReport) -> String {
    match row.text(column) {
        Some(v) => v,
        None => {
            report.coerced_to_default += 1;
            default.to_string()
        }
    }
}

pub fn prepare_players(table: &Table) -> (Vec<StagedPlayer>, StagingReport) {
    let mut report = StagingReport::new("stg_players", table.len());
    let mut out = Vec::with_capacity(table.len());

    for row in table.rows() {
        let Some(player_id) = canonical_key(row.get("player_id")) else {
            report.dropped_missing_key += 1;
            continue;
        };
        let first_name = text_or(&row, "first_name", "", &mut report);
        let last_name = text_or(&row, "last_name", "", &mut report);
        let full_name = row.text("full_name").unwrap_or_else(|| {
            let first = (!first_name.is_empty()).then_some(first_name.as_str());
            let last = (!last_name.is_empty()).then_some(last_name.as_str());
            dimension::full_name(first, last).unwrap_or_default()
        });
        let position = text_or(&row, "position", UNKNOWN_POSITION, &mut report);

        out.push(StagedPlayer {
            player_id,
            first_name,
            last_name,
            full_name,
            position,
            birth_date: row.text("birth_date"),
        });
    }

    report.rows_out = out.len();
    (out, report)
}

pub fn prepare_player_games(table: &Table) -> (Vec<PlayerGameStat>, StagingReport) {
    let mut report = StagingReport::new("stg_player_game", table.len());
    let mut out = Vec::with_capacity(table.len());
    let has_total = table.has_column("total_tds");
    let has_points = table.has_column("fantasy_points");

    for row in table.rows() {
        let (Some(game_id), Some(player_id)) = (
            canonical_key(row.get("game_id")),
            canonical_key(row.get("player_id")),
        ) else {
            report.dropped_missing_key += 1;
            continue;
        };

        let mut stats = StatLine::default();
        for (column, slot) in stats.slots_mut() {
            if column == "total_tds" && !has_total {
                continue;
            }
            *slot = int_or_zero(row.get(column), &mut report);
        }
        if !has_total {
            stats.total_tds = stats.sum_tds();
        }

        let fantasy_points = if has_points {
            row.get("fantasy_points").as_f64().unwrap_or_else(|| {
                report.coerced_to_default += 1;
                0.0
            })
        } else {
            stats.fantasy_points()
        };

        let date_cell = row.get("date_key");
        let date_key = date_cell.as_i64();
        if date_key.is_none() && !date_cell.is_null() {
            report.coerced_to_default += 1;
        }

        out.push(PlayerGameStat {
            game_id,
            player_id,
            team_id: canonical_key(row.get("team_id")),
            opponent_team_id: canonical_key(row.get("opponent_team_id")),
            date_key,
            stats,
            fantasy_points,
        });
    }

    report.rows_out = out.len();
    (out, report)
}

pub fn prepare_injuries(table: &Table) -> (Vec<StagedInjury>, StagingReport) {
    let mut report = StagingReport::new("stg_player_injury", table.len());
    let mut out = Vec::with_capacity(table.len());

    for row in table.rows() {
        let Some(player_id) = canonical_key(row.get("player_id")) else {
            report.dropped_missing_key += 1;
            continue;
        };
        out.push(StagedInjury {
            player_id,
            season: int_or_zero(row.get("season"), &mut report),
            week: int_or_zero(row.get("week"), &mut report),
            injury_type: text_or(&row, "injury_type", "", &mut report),
            status: text_or(&row, "status", "", &mut report),
        });
    }

    report.rows_out = out.len();
    (out, report)
}
