use std::path::PathBuf;

use rusqlite::Connection;
use tempfile::TempDir;

use gridiron_dw::error::{EtlError, Warning};
use gridiron_dw::pipeline::{self, PBP_PIPELINE};
use gridiron_dw::run_state::RunStateTracker;
use gridiron_dw::snapshot::{
    SnapshotKind, SnapshotStore, Table, Value, read_snapshot, write_snapshot,
};
use gridiron_dw::warehouse::{Warehouse, WarehouseLocation};

const SEASON: i32 = 2025;

struct Fixture {
    dir: TempDir,
    store: SnapshotStore,
    location: WarehouseLocation,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("raw"), dir.path().join("transformed"));
        std::fs::create_dir_all(&store.raw_dir).expect("raw dir");
        let location = WarehouseLocation::File(dir.path().join("dw.sqlite"));
        Self {
            dir,
            store,
            location,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join("dw.sqlite")
    }

    fn write_raw(&self, kind: SnapshotKind, table: &Table) {
        self.write_raw_for(kind, SEASON, table);
    }

    fn write_raw_for(&self, kind: SnapshotKind, season: i32, table: &Table) {
        write_snapshot(&self.store.path(kind, season), table).expect("write raw snapshot");
    }

    /// Creates the warehouse up front and installs an aborting trigger on `table`.
    fn reject_inserts_into(&self, table: &str) {
        let dw = Warehouse::open(&self.location).expect("create warehouse");
        dw.connection()
            .execute_batch(&format!(
                "CREATE TRIGGER reject_{table} BEFORE INSERT ON {table}
                 BEGIN SELECT RAISE(ABORT, '{table} rejected'); END;"
            ))
            .expect("install trigger");
    }

    fn with_all_raw(self) -> Self {
        self.write_raw(SnapshotKind::Rosters, &roster());
        self.write_raw(SnapshotKind::PlayByPlay, &pbp());
        self.write_raw(SnapshotKind::Injuries, &injuries());
        self
    }

    fn conn(&self) -> Connection {
        Connection::open(self.db_path()).expect("open warehouse")
    }
}

fn roster() -> Table {
    let mut table = Table::new(["season", "player_id", "first_name", "last_name", "position", "birth_date"]);
    for week in 1..=3 {
        table.push_row(vec![
            Value::Int(2025),
            "p1".into(),
            "Patrick".into(),
            "Mahomes".into(),
            if week == 1 { "QB".into() } else { "WR".into() },
            "1995-09-17".into(),
        ]);
    }
    table.push_row(vec![
        Value::Int(2025),
        "p2".into(),
        "Isiah".into(),
        "Pacheco".into(),
        Value::Null,
        Value::Null,
    ]);
    table
}

fn pbp() -> Table {
    let mut table = Table::new([
        "game_id",
        "game_date",
        "posteam",
        "defteam",
        "passer_player_id",
        "rusher_player_id",
        "receiver_player_id",
        "pass_attempt",
        "complete_pass",
        "passing_yards",
        "pass_touchdown",
        "rush_attempt",
        "rushing_yards",
        "receiving_yards",
    ]);
    table.push_row(vec![
        "2025_01_KC_LAC".into(),
        "2025-09-05".into(),
        "KC".into(),
        "LAC".into(),
        "p1".into(),
        Value::Null,
        "p3".into(),
        Value::Float(1.0),
        Value::Float(1.0),
        Value::Float(35.0),
        Value::Float(1.0),
        Value::Float(0.0),
        Value::Null,
        Value::Float(35.0),
    ]);
    table.push_row(vec![
        "2025_02_KC_PHI".into(),
        "2025-09-14".into(),
        "KC".into(),
        "PHI".into(),
        Value::Null,
        "p2".into(),
        Value::Null,
        Value::Float(0.0),
        Value::Float(0.0),
        Value::Null,
        Value::Float(0.0),
        Value::Float(1.0),
        Value::Float(8.0),
        Value::Null,
    ]);
    table
}

fn injuries() -> Table {
    let mut table = Table::new(["season", "week", "player_id", "injury_type", "status", "team"]);
    table.push_row(vec![
        Value::Int(2025),
        Value::Int(2),
        "p2".into(),
        "Ankle".into(),
        "Questionable".into(),
        "KC".into(),
    ]);
    table.push_row(vec![
        Value::Int(2025),
        Value::Int(2),
        "p2".into(),
        "Ankle".into(),
        "Out".into(),
        "KC".into(),
    ]);
    table
}

fn dump(conn: &Connection, sql: &str) -> Vec<String> {
    let mut stmt = conn.prepare(sql).expect("prepare dump");
    let columns = stmt.column_count();
    let rows = stmt
        .query_map([], |row| {
            let mut cells = Vec::with_capacity(columns);
            for idx in 0..columns {
                let value: rusqlite::types::Value = row.get(idx)?;
                cells.push(format!("{value:?}"));
            }
            Ok(cells.join("|"))
        })
        .expect("query dump");
    rows.map(|r| r.expect("row")).collect()
}

fn last_run(conn: &Connection) -> (String, String) {
    conn.query_row(
        "SELECT status, summary_json FROM etl_runs ORDER BY run_id DESC LIMIT 1",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .expect("etl run row")
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .expect("count")
}

#[test]
fn missing_intermediate_snapshot_exits_2_without_touching_warehouse() {
    let fx = Fixture::new();
    let err = pipeline::run_load(&fx.store, &fx.location, Some(SEASON), false).unwrap_err();
    assert!(matches!(err, EtlError::MissingInput { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(!fx.db_path().exists());
}

#[test]
fn missing_fact_snapshot_is_fatal_even_with_players_present() {
    let fx = Fixture::new().with_all_raw();
    pipeline::run_transform(&fx.store, SEASON).expect("transform");
    std::fs::remove_file(fx.store.path(SnapshotKind::FactPlayerGame, SEASON)).expect("remove");

    let err = pipeline::run_load(&fx.store, &fx.location, Some(SEASON), true).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(!fx.db_path().exists());
}

#[test]
fn full_season_lands_in_warehouse() {
    let fx = Fixture::new().with_all_raw();
    let (transform, load) =
        pipeline::run_season(&fx.store, &fx.location, SEASON, false).expect("run");

    assert_eq!(transform.players, 2);
    assert_eq!(transform.player_games, 3);
    assert_eq!(transform.injuries, Some(2));
    assert!(transform.warnings.is_empty());
    assert!(load.injuries_loaded);
    assert_eq!(load.last_game_date.as_deref(), Some("2025-09-14"));

    let conn = fx.conn();
    assert_eq!(count(&conn, "dim_player"), 2);
    assert_eq!(count(&conn, "fact_player_game"), 3);
    assert_eq!(count(&conn, "fact_player_injury"), 2);

    let (position, full_name): (String, String) = conn
        .query_row(
            "SELECT position, full_name FROM dim_player WHERE player_id = 'p1'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("p1");
    assert_eq!(position, "QB");
    assert_eq!(full_name, "Patrick Mahomes");

    let position: String = conn
        .query_row("SELECT position FROM dim_player WHERE player_id = 'p2'", [], |r| r.get(0))
        .expect("p2");
    assert_eq!(position, "UNK");

    let (pass_tds, rec_tds, total_tds): (i64, i64, i64) = conn
        .query_row(
            "SELECT pass_tds, rec_tds, total_tds FROM fact_player_game WHERE player_id = 'p3'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .expect("p3");
    assert_eq!((pass_tds, rec_tds, total_tds), (0, 1, 1));

    let duplicates: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM (SELECT game_id, player_id FROM fact_player_game
             GROUP BY game_id, player_id HAVING COUNT(*) > 1)",
            [],
            |r| r.get(0),
        )
        .expect("dup check");
    assert_eq!(duplicates, 0);

    let state = RunStateTracker::load(&conn, PBP_PIPELINE)
        .expect("load state")
        .expect("state row");
    assert_eq!(state.last_game_date.as_deref(), Some("2025-09-14"));
}

#[test]
fn second_load_changes_nothing() {
    let fx = Fixture::new().with_all_raw();
    pipeline::run_season(&fx.store, &fx.location, SEASON, false).expect("first run");

    let snapshot = |conn: &Connection| {
        (
            dump(conn, "SELECT * FROM dim_player ORDER BY player_id"),
            dump(conn, "SELECT * FROM fact_player_game ORDER BY game_id, player_id"),
            dump(conn, "SELECT * FROM fact_player_injury ORDER BY rowid"),
        )
    };
    let before = snapshot(&fx.conn());

    let load = pipeline::run_load(&fx.store, &fx.location, Some(SEASON), false).expect("second load");
    assert!(load.merges.iter().all(|m| m.affected == 0), "{:?}", load.merges);
    assert_eq!(snapshot(&fx.conn()), before);
}

#[test]
fn missing_injury_snapshot_degrades_to_warning() {
    let fx = Fixture::new();
    fx.write_raw(SnapshotKind::Rosters, &roster());
    fx.write_raw(SnapshotKind::PlayByPlay, &pbp());

    let (transform, load) =
        pipeline::run_season(&fx.store, &fx.location, SEASON, false).expect("run");
    assert_eq!(transform.injuries, None);
    assert!(matches!(
        transform.warnings.as_slice(),
        [Warning::OptionalStage { .. }]
    ));
    assert!(!load.injuries_loaded);
    assert!(
        load.warnings
            .iter()
            .any(|w| matches!(w, Warning::OptionalStage { .. }))
    );
    assert_eq!(count(&fx.conn(), "fact_player_game"), 3);
}

#[test]
fn skip_injuries_leaves_injury_table_alone() {
    let fx = Fixture::new().with_all_raw();
    let (_, load) = pipeline::run_season(&fx.store, &fx.location, SEASON, true).expect("run");
    assert!(!load.injuries_loaded);
    assert!(load.warnings.is_empty());
    assert_eq!(count(&fx.conn(), "fact_player_injury"), 0);
}

#[test]
fn injury_snapshot_without_status_still_loads() {
    let fx = Fixture::new();
    fx.write_raw(SnapshotKind::Rosters, &roster());
    fx.write_raw(SnapshotKind::PlayByPlay, &pbp());
    let mut partial = Table::new(["player_id", "season", "week", "injury_type"]);
    partial.push_row(vec!["p1".into(), Value::Int(2025), Value::Int(4), "Hand".into()]);
    fx.write_raw(SnapshotKind::Injuries, &partial);

    let (transform, load) =
        pipeline::run_season(&fx.store, &fx.location, SEASON, false).expect("run");
    assert_eq!(
        transform.warnings,
        vec![Warning::DroppedColumns {
            table: "fact_player_injury".to_string(),
            columns: vec!["status".to_string()],
        }]
    );
    assert!(load.injuries_loaded);

    let status: String = fx
        .conn()
        .query_row("SELECT status FROM fact_player_injury", [], |r| r.get(0))
        .expect("injury row");
    assert_eq!(status, "");
}

#[test]
fn keyless_fact_rows_are_dropped_and_reported() {
    let fx = Fixture::new();
    std::fs::create_dir_all(&fx.store.transformed_dir).expect("dir");
    let mut players = Table::new(["player_id", "first_name", "last_name"]);
    players.push_row(vec!["p1".into(), "A".into(), "B".into()]);
    write_snapshot(&fx.store.path(SnapshotKind::DimPlayers, SEASON), &players).expect("players");

    let mut facts = Table::new(["game_id", "player_id", "pass_yards", "date_key"]);
    facts.push_row(vec!["G1".into(), "p1".into(), Value::Int(100), Value::Int(20251105)]);
    facts.push_row(vec!["G1".into(), Value::Null, Value::Int(5), Value::Int(20251105)]);
    write_snapshot(&fx.store.path(SnapshotKind::FactPlayerGame, SEASON), &facts).expect("facts");

    let load = pipeline::run_load(&fx.store, &fx.location, None, true).expect("load");
    assert_eq!(load.last_game_date.as_deref(), Some("2025-11-05"));
    assert!(load.warnings.contains(&Warning::RowValidation {
        table: "stg_player_game".to_string(),
        dropped: 1,
    }));
    assert_eq!(count(&fx.conn(), "fact_player_game"), 1);
}

#[test]
fn facts_without_date_key_leave_last_game_date_unset() {
    let fx = Fixture::new();
    std::fs::create_dir_all(&fx.store.transformed_dir).expect("dir");
    let mut players = Table::new(["player_id"]);
    players.push_row(vec!["p1".into()]);
    write_snapshot(&fx.store.path(SnapshotKind::DimPlayers, SEASON), &players).expect("players");
    let mut facts = Table::new(["game_id", "player_id", "rush_yards"]);
    facts.push_row(vec!["G1".into(), "p1".into(), Value::Int(3)]);
    write_snapshot(&fx.store.path(SnapshotKind::FactPlayerGame, SEASON), &facts).expect("facts");

    let load = pipeline::run_load(&fx.store, &fx.location, None, true).expect("load");
    assert_eq!(load.last_game_date, None);
    let state = RunStateTracker::load(&fx.conn(), PBP_PIPELINE)
        .expect("state")
        .expect("row");
    assert_eq!(state.last_game_date, None);
}

#[test]
fn failed_transform_keeps_previous_intermediates_together() {
    let fx = Fixture::new();
    fx.write_raw_for(SnapshotKind::Rosters, 2024, &roster());
    fx.write_raw_for(SnapshotKind::PlayByPlay, 2024, &pbp());
    pipeline::run_transform(&fx.store, 2024).expect("transform 2024");

    let mut next_roster = Table::new(["player_id", "first_name", "last_name"]);
    next_roster.push_row(vec!["rookie".into(), "New".into(), "Guy".into()]);
    fx.write_raw_for(SnapshotKind::Rosters, 2025, &next_roster);

    let err = pipeline::run_transform(&fx.store, 2025).unwrap_err();
    assert!(matches!(err, EtlError::MissingInput { .. }));
    assert_eq!(err.exit_code(), 2);

    let players = read_snapshot(&fx.store.path(SnapshotKind::DimPlayers, 2025)).expect("players");
    let ids = players
        .rows()
        .filter_map(|row| row.text("player_id"))
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["p1".to_string(), "p2".to_string()]);
}

#[test]
fn unopenable_warehouse_exits_3() {
    let mut fx = Fixture::new().with_all_raw();
    pipeline::run_transform(&fx.store, SEASON).expect("transform");
    let not_a_file = fx.dir.path().join("dw_dir");
    std::fs::create_dir_all(&not_a_file).expect("dir");
    fx.location = WarehouseLocation::File(not_a_file);

    let err = pipeline::run_load(&fx.store, &fx.location, Some(SEASON), true).unwrap_err();
    assert!(matches!(err, EtlError::Store(_)));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn failed_fact_merge_keeps_players_and_marks_run_failed() {
    let fx = Fixture::new().with_all_raw();
    pipeline::run_transform(&fx.store, SEASON).expect("transform");
    fx.reject_inserts_into("fact_player_game");

    let err = pipeline::run_load(&fx.store, &fx.location, Some(SEASON), false).unwrap_err();
    assert!(matches!(err, EtlError::Store(_)));
    assert_eq!(err.exit_code(), 3);

    let conn = fx.conn();
    assert_eq!(count(&conn, "dim_player"), 2);
    assert_eq!(count(&conn, "fact_player_game"), 0);
    assert_eq!(count(&conn, "fact_player_injury"), 0);

    let (status, summary_json) = last_run(&conn);
    assert_eq!(status, "failed");
    let summary: serde_json::Value = serde_json::from_str(&summary_json).expect("json");
    let reason = summary["error"].as_str().expect("error field");
    assert!(reason.contains("fact_player_game rejected"), "{reason}");
}

#[test]
fn run_state_failure_marks_run_failed() {
    let fx = Fixture::new().with_all_raw();
    pipeline::run_transform(&fx.store, SEASON).expect("transform");
    fx.reject_inserts_into("meta_run_state");

    let err = pipeline::run_load(&fx.store, &fx.location, Some(SEASON), true).unwrap_err();
    assert_eq!(err.exit_code(), 3);

    let conn = fx.conn();
    assert_eq!(count(&conn, "fact_player_game"), 3);
    assert_eq!(last_run(&conn).0, "failed");
}

#[test]
fn malformed_injury_snapshot_degrades_to_warning() {
    let fx = Fixture::new().with_all_raw();
    pipeline::run_transform(&fx.store, SEASON).expect("transform");
    std::fs::write(
        fx.store.path(SnapshotKind::FactPlayerInjury, SEASON),
        b"not a parquet file",
    )
    .expect("overwrite injuries");

    let load = pipeline::run_load(&fx.store, &fx.location, Some(SEASON), false).expect("load");
    assert!(!load.injuries_loaded);
    assert!(
        load.warnings
            .iter()
            .any(|w| matches!(w, Warning::OptionalStage { stage, .. } if stage == "injuries"))
    );

    let conn = fx.conn();
    assert_eq!(count(&conn, "fact_player_game"), 3);
    assert_eq!(count(&conn, "fact_player_injury"), 0);
    assert_eq!(last_run(&conn).0, "ok");
}
