//! Typed records for every entity that crosses a stage boundary, and the
//! mappings between them and snapshot tables.

use crate::snapshot::{Table, Value};

/// One play as seen from the play-by-play snapshot. Role attribution lives in
/// the separate `*_player_id` columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayEvent {
    pub game_id: Option<String>,
    pub game_date: Option<String>,
    pub posteam: Option<String>,
    pub defteam: Option<String>,
    pub passer_player_id: Option<String>,
    pub rusher_player_id: Option<String>,
    pub receiver_player_id: Option<String>,
    pub fumbled_player_id: Option<String>,
    pub pass_attempt: bool,
    pub complete_pass: bool,
    pub passing_yards: i64,
    pub pass_touchdown: bool,
    pub interception: bool,
    pub rush_attempt: bool,
    pub rushing_yards: i64,
    pub rush_touchdown: bool,
    pub receiving_yards: i64,
    pub fumble: bool,
}

impl PlayEvent {
    pub fn from_table(table: &Table) -> Vec<PlayEvent> {
        table
            .rows()
            .map(|row| PlayEvent {
                game_id: row.text("game_id"),
                game_date: row.text("game_date"),
                posteam: row.text("posteam"),
                defteam: row.text("defteam"),
                passer_player_id: row.text("passer_player_id"),
                rusher_player_id: row.text("rusher_player_id"),
                receiver_player_id: row.text("receiver_player_id"),
                fumbled_player_id: row.text("fumbled_1_player_id"),
                pass_attempt: row.flag("pass_attempt"),
                complete_pass: row.flag("complete_pass"),
                passing_yards: row.int("passing_yards"),
                pass_touchdown: row.flag("pass_touchdown"),
                interception: row.flag("interception"),
                rush_attempt: row.flag("rush_attempt"),
                rushing_yards: row.int("rushing_yards"),
                rush_touchdown: row.flag("rush_touchdown"),
                receiving_yards: row.int("receiving_yards"),
                fumble: row.flag("fumble"),
            })
            .collect()
    }
}

/// A roster snapshot row. The same player usually appears many times per season.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterEntry {
    pub player_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub position: Option<String>,
    pub birth_date: Option<String>,
}

impl RosterEntry {
    pub fn from_table(table: &Table) -> Vec<RosterEntry> {
        table
            .rows()
            .map(|row| RosterEntry {
                player_id: row.text("player_id"),
                first_name: row.text("first_name"),
                last_name: row.text("last_name"),
                position: row.text("position"),
                birth_date: row.text("birth_date"),
            })
            .collect()
    }
}

pub const PLAYER_COLUMNS: [&str; 6] = [
    "player_id",
    "first_name",
    "last_name",
    "full_name",
    "position",
    "birth_date",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub player_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub position: Option<String>,
    pub birth_date: Option<String>,
}

impl Player {
    pub fn to_table(players: &[Player]) -> Table {
        let mut table = Table::new(PLAYER_COLUMNS);
        for p in players {
            table.push_row(vec![
                Value::from(p.player_id.as_str()),
                Value::from(p.first_name.clone()),
                Value::from(p.last_name.clone()),
                Value::from(p.full_name.clone()),
                Value::from(p.position.clone()),
                Value::from(p.birth_date.clone()),
            ]);
        }
        table
    }
}

/// Per-category counts for one player in one game. Never null: absent categories are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatLine {
    pub pass_attempts: i64,
    pub completions: i64,
    pub pass_yards: i64,
    pub pass_tds: i64,
    pub interceptions: i64,
    pub rush_attempts: i64,
    pub rush_yards: i64,
    pub rush_tds: i64,
    pub receptions: i64,
    pub rec_yards: i64,
    pub rec_tds: i64,
    pub total_tds: i64,
    pub fumbles: i64,
}

pub const STAT_COLUMNS: [&str; 13] = [
    "pass_attempts",
    "completions",
    "pass_yards",
    "pass_tds",
    "interceptions",
    "rush_attempts",
    "rush_yards",
    "rush_tds",
    "receptions",
    "rec_yards",
    "rec_tds",
    "total_tds",
    "fumbles",
];

impl StatLine {
    /// Values in [`STAT_COLUMNS`] order.
    pub fn values(&self) -> [i64; 13] {
        [
            self.pass_attempts,
            self.completions,
            self.pass_yards,
            self.pass_tds,
            self.interceptions,
            self.rush_attempts,
            self.rush_yards,
            self.rush_tds,
            self.receptions,
            self.rec_yards,
            self.rec_tds,
            self.total_tds,
            self.fumbles,
        ]
    }

    /// Mutable slots in [`STAT_COLUMNS`] order.
    pub fn slots_mut(&mut self) -> [(&'static str, &mut i64); 13] {
        [
            ("pass_attempts", &mut self.pass_attempts),
            ("completions", &mut self.completions),
            ("pass_yards", &mut self.pass_yards),
            ("pass_tds", &mut self.pass_tds),
            ("interceptions", &mut self.interceptions),
            ("rush_attempts", &mut self.rush_attempts),
            ("rush_yards", &mut self.rush_yards),
            ("rush_tds", &mut self.rush_tds),
            ("receptions", &mut self.receptions),
            ("rec_yards", &mut self.rec_yards),
            ("rec_tds", &mut self.rec_tds),
            ("total_tds", &mut self.total_tds),
            ("fumbles", &mut self.fumbles),
        ]
    }

    /// Sum of every `*_tds` category column. No overlap detection: a passing
    /// touchdown caught by a receiver counts once per role.
    pub fn sum_tds(&self) -> i64 {
        STAT_COLUMNS
            .iter()
            .zip(self.values())
            .filter(|(name, _)| name.ends_with("_tds") && **name != "total_tds")
            .map(|(_, v)| v)
            .sum()
    }

    /// PPR fantasy scoring.
    pub fn fantasy_points(&self) -> f64 {
        let points = self.pass_yards as f64 * 0.04 + self.pass_tds as f64 * 4.0
            - self.interceptions as f64 * 2.0
            + self.rush_yards as f64 * 0.1
            + self.rush_tds as f64 * 6.0
            + self.receptions as f64
            + self.rec_yards as f64 * 0.1
            + self.rec_tds as f64 * 6.0
            - self.fumbles as f64 * 2.0;
        (points * 100.0).round() / 100.0
    }
}

pub const PLAYER_GAME_KEY_COLUMNS: [&str; 5] =
    ["game_id", "player_id", "team_id", "opponent_team_id", "date_key"];

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerGameStat {
    pub game_id: String,
    pub player_id: String,
    pub team_id: Option<String>,
    pub opponent_team_id: Option<String>,
    /// `YYYYMMDD`.
    pub date_key: Option<i64>,
    pub stats: StatLine,
    pub fantasy_points: f64,
}

impl PlayerGameStat {
    pub fn columns() -> Vec<&'static str> {
        PLAYER_GAME_KEY_COLUMNS
            .iter()
            .chain(STAT_COLUMNS.iter())
            .chain(std::iter::once(&"fantasy_points"))
            .copied()
            .collect()
    }

    pub fn to_table(rows: &[PlayerGameStat]) -> Table {
        let mut table = Table::new(Self::columns());
        for r in rows {
            let mut values = vec![
                Value::from(r.game_id.as_str()),
                Value::from(r.player_id.as_str()),
                Value::from(r.team_id.clone()),
                Value::from(r.opponent_team_id.clone()),
                Value::from(r.date_key),
            ];
            values.extend(r.stats.values().into_iter().map(Value::Int));
            values.push(Value::Float(r.fantasy_points));
            table.push_row(values);
        }
        table
    }
}

pub const INJURY_COLUMNS: [&str; 5] = ["player_id", "season", "week", "injury_type", "status"];

/// Injury report row. Fields are optional because the source snapshot may omit columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjuryRecord {
    pub player_id: Option<String>,
    pub season: Option<i64>,
    pub week: Option<i64>,
    pub injury_type: Option<String>,
    pub status: Option<String>,
}

impl InjuryRecord {
    fn value(&self, column: &str) -> Value {
        match column {
            "player_id" => Value::from(self.player_id.clone()),
            "season" => Value::from(self.season),
            "week" => Value::from(self.week),
            "injury_type" => Value::from(self.injury_type.clone()),
            "status" => Value::from(self.status.clone()),
            _ => Value::Null,
        }
    }

    /// Writes only `columns`, which must be a subset of [`INJURY_COLUMNS`].
    pub fn to_table(rows: &[InjuryRecord], columns: &[String]) -> Table {
        let mut table = Table::new(columns.iter().cloned());
        for r in rows {
            table.push_row(columns.iter().map(|c| r.value(c)).collect());
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_tds_counts_every_category() {
        let stats = StatLine {
            pass_tds: 1,
            rush_tds: 2,
            rec_tds: 1,
            total_tds: 99,
            ..StatLine::default()
        };
        assert_eq!(stats.sum_tds(), 4);
    }

    #[test]
    fn slots_follow_column_order() {
        let mut stats = StatLine::default();
        for (idx, (name, slot)) in stats.slots_mut().into_iter().enumerate() {
            assert_eq!(name, STAT_COLUMNS[idx]);
            *slot = idx as i64;
        }
        assert_eq!(stats.values(), std::array::from_fn(|i| i as i64));
    }

    #[test]
    fn fantasy_points_ppr() {
        let stats = StatLine {
            pass_yards: 250,
            pass_tds: 2,
            interceptions: 1,
            receptions: 3,
            rec_yards: 40,
            ..StatLine::default()
        };
        assert_eq!(stats.fantasy_points(), 10.0 + 8.0 - 2.0 + 3.0 + 4.0);
    }

    #[test]
    fn play_events_from_partial_table() {
        let mut table = Table::new(["game_id", "passer_player_id", "pass_attempt", "passing_yards"]);
        table.push_row(vec!["G1".into(), "p1".into(), Value::Float(1.0), Value::Float(12.0)]);
        let events = PlayEvent::from_table(&table);
        assert_eq!(events.len(), 1);
        assert!(events[0].pass_attempt);
        assert_eq!(events[0].passing_yards, 12);
        assert!(events[0].rusher_player_id.is_none());
        assert!(!events[0].rush_attempt);
    }
}
