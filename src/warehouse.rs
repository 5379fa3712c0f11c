//! Warehouse schema and the merge engine.
//!
//! Every table merge runs in its own transaction. The staging table is
//! replaced and filled, the merge statement runs against the production
//! table, the staging table is dropped, and the transaction commits. A failure
//! rolls back only the table being merged; tables merged earlier in the same
//! run stay committed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::Serialize;

use crate::models::{PLAYER_COLUMNS, PlayerGameStat};
use crate::staging::{StagedInjury, StagedPlayer};

/// Where the warehouse lives, parsed from a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseLocation {
    Memory,
    File(PathBuf),
}

impl WarehouseLocation {
    /// Accepts `sqlite::memory:`, `:memory:`, `sqlite://<path>`, `sqlite:<path>` or a bare path.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(anyhow!("empty warehouse connection string"));
        }
        if matches!(url, "sqlite::memory:" | ":memory:" | "sqlite://:memory:") {
            return Ok(WarehouseLocation::Memory);
        }
        if let Some((scheme, _)) = url.split_once("://")
            && scheme != "sqlite"
        {
            return Err(anyhow!("unsupported warehouse scheme {scheme:?}"));
        }
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        if path.is_empty() {
            return Err(anyhow!("warehouse connection string has no path"));
        }
        Ok(WarehouseLocation::File(PathBuf::from(path)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergePolicy {
    /// Insert new keys, overwrite non-key columns of existing keys.
    Upsert,
    /// Insert rows not already present verbatim. Never updates.
    InsertIfAbsent,
}

/// Static description of one production table and its staging twin.
struct MergeTarget {
    table: &'static str,
    staging: &'static str,
    key: &'static [&'static str],
    /// Staged columns with their SQL types, key columns included.
    columns: Vec<(&'static str, &'static str)>,
    policy: MergePolicy,
}

impl MergeTarget {
    fn players() -> Self {
        Self {
            table: "dim_player",
            staging: "stg_players",
            key: &["player_id"],
            columns: PLAYER_COLUMNS.iter().map(|c| (*c, "TEXT")).collect(),
            policy: MergePolicy::Upsert,
        }
    }

    fn player_games() -> Self {
        let columns = PlayerGameStat::columns()
            .into_iter()
            .map(|c| {
                let ty = match c {
                    "game_id" | "player_id" | "team_id" | "opponent_team_id" => "TEXT",
                    "fantasy_points" => "REAL",
                    _ => "INTEGER",
                };
                (c, ty)
            })
            .collect();
        Self {
            table: "fact_player_game",
            staging: "stg_player_game",
            key: &["game_id", "player_id"],
            columns,
            policy: MergePolicy::Upsert,
        }
    }

    fn injuries() -> Self {
        Self {
            table: "fact_player_injury",
            staging: "stg_player_injury",
            key: &["player_id", "season", "week"],
            columns: vec![
                ("player_id", "TEXT"),
                ("season", "INTEGER"),
                ("week", "INTEGER"),
                ("injury_type", "TEXT"),
                ("status", "TEXT"),
            ],
            policy: MergePolicy::InsertIfAbsent,
        }
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|(c, _)| *c)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn staging_ddl(&self) -> String {
        let cols = self
            .columns
            .iter()
            .map(|(c, ty)| format!("{c} {ty}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "DROP TABLE IF EXISTS {staging}; CREATE TABLE {staging} ({cols});",
            staging = self.staging
        )
    }

    fn staging_insert_sql(&self) -> String {
        let placeholders = (1..=self.columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.staging,
            self.column_list()
        )
    }

    /// Merge statement. For upserts `?1` is the modification timestamp.
    fn merge_sql(&self) -> String {
        let cols = self.column_list();
        match self.policy {
            MergePolicy::Upsert => {
                let non_key = self
                    .columns
                    .iter()
                    .map(|(c, _)| *c)
                    .filter(|c| !self.key.contains(c))
                    .collect::<Vec<_>>();
                let assignments = non_key
                    .iter()
                    .map(|c| format!("{c} = excluded.{c}"))
                    .chain(std::iter::once("updated_at = excluded.updated_at".to_string()))
                    .collect::<Vec<_>>()
                    .join(",\n    ");
                let changed = non_key
                    .iter()
                    .map(|c| format!("{table}.{c} IS NOT excluded.{c}", table = self.table))
                    .collect::<Vec<_>>()
                    .join("\n    OR ");
                format!(
                    "INSERT INTO {table} ({cols}, updated_at)\n\
                     SELECT {cols}, ?1 FROM {staging} WHERE true\n\
                     ON CONFLICT({key}) DO UPDATE SET\n    {assignments}\n\
                     WHERE {changed}",
                    table = self.table,
                    staging = self.staging,
                    key = self.key.join(", "),
                )
            }
            MergePolicy::InsertIfAbsent => {
                let same = self
                    .columns
                    .iter()
                    .map(|(c, _)| format!("f.{c} IS s.{c}"))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let select = self
                    .columns
                    .iter()
                    .map(|(c, _)| format!("s.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "INSERT INTO {table} ({cols})\n\
                     SELECT {select} FROM {staging} s\n\
                     WHERE NOT EXISTS (SELECT 1 FROM {table} f WHERE {same})",
                    table = self.table,
                    staging = self.staging,
                )
            }
        }
    }
}

/// A row that can be written into a staging table, in the target's column order.
pub trait StagingRow {
    fn sql_values(&self) -> Vec<SqlValue>;
}

fn text(v: &str) -> SqlValue {
    SqlValue::Text(v.to_string())
}

fn opt_text(v: &Option<String>) -> SqlValue {
    v.as_deref().map(text).unwrap_or(SqlValue::Null)
}

impl StagingRow for StagedPlayer {
    fn sql_values(&self) -> Vec<SqlValue> {
        vec![
            text(&self.player_id),
            text(&self.first_name),
            text(&self.last_name),
            text(&self.full_name),
            text(&self.position),
            opt_text(&self.birth_date),
        ]
    }
}

impl StagingRow for PlayerGameStat {
    fn sql_values(&self) -> Vec<SqlValue> {
        let mut values = vec![
            text(&self.game_id),
            text(&self.player_id),
            opt_text(&self.team_id),
            opt_text(&self.opponent_team_id),
            self.date_key.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
        ];
        values.extend(self.stats.values().into_iter().map(SqlValue::Integer));
        values.push(SqlValue::Real(self.fantasy_points));
        values
    }
}

impl StagingRow for StagedInjury {
    fn sql_values(&self) -> Vec<SqlValue> {
        vec![
            text(&self.player_id),
            SqlValue::Integer(self.season),
            SqlValue::Integer(self.week),
            text(&self.injury_type),
            text(&self.status),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub table: String,
    pub staged: usize,
    /// Rows inserted or changed in the production table.
    pub affected: usize,
}

pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    pub fn open(location: &WarehouseLocation) -> Result<Self> {
        let conn = match location {
            WarehouseLocation::Memory => {
                Connection::open_in_memory().context("open in-memory warehouse")?
            }
            WarehouseLocation::File(path) => open_file(path)?,
        };
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn merge_players(&mut self, rows: &[StagedPlayer]) -> Result<MergeReport> {
        self.merge(&MergeTarget::players(), rows)
    }

    pub fn merge_player_games(&mut self, rows: &[PlayerGameStat]) -> Result<MergeReport> {
        self.merge(&MergeTarget::player_games(), rows)
    }

    pub fn merge_injuries(&mut self, rows: &[StagedInjury]) -> Result<MergeReport> {
        self.merge(&MergeTarget::injuries(), rows)
    }

    fn merge<R: StagingRow>(&mut self, target: &MergeTarget, rows: &[R]) -> Result<MergeReport> {
        let tx = self
            .conn
            .transaction()
            .with_context(|| format!("begin merge transaction for {}", target.table))?;

        tx.execute_batch(&target.staging_ddl())
            .with_context(|| format!("replace staging table {}", target.staging))?;
        {
            let mut stmt = tx
                .prepare(&target.staging_insert_sql())
                .with_context(|| format!("prepare insert into {}", target.staging))?;
            for row in rows {
                stmt.execute(params_from_iter(row.sql_values()))
                    .with_context(|| format!("write staging row into {}", target.staging))?;
            }
        }
        log::info!("wrote {} rows to staging table {}", rows.len(), target.staging);

        let sql = target.merge_sql();
        let affected = match target.policy {
            MergePolicy::Upsert => tx.execute(&sql, params![Utc::now().to_rfc3339()]),
            MergePolicy::InsertIfAbsent => tx.execute(&sql, []),
        }
        .with_context(|| format!("merge {} into {}", target.staging, target.table))?;

        tx.execute_batch(&format!("DROP TABLE {};", target.staging))
            .with_context(|| format!("drop staging table {}", target.staging))?;
        tx.commit()
            .with_context(|| format!("commit merge for {}", target.table))?;
        log::info!(
            "merged {} from {}: {} row(s) affected",
            target.table,
            target.staging,
            affected
        );

        Ok(MergeReport {
            table: target.table.to_string(),
            staged: rows.len(),
            affected,
        })
    }

    /// Opens an `etl_runs` audit row and returns its id.
    pub fn begin_run(&self, pipeline_name: &str, season: Option<i32>) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO etl_runs(pipeline_name, season, started_at, finished_at, status, summary_json)
                 VALUES (?1, ?2, ?3, NULL, 'running', '{}')",
                params![pipeline_name, season, Utc::now().to_rfc3339()],
            )
            .context("insert etl run")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish_run(&self, run_id: i64, status: &str, summary_json: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE etl_runs SET finished_at = ?1, status = ?2, summary_json = ?3 WHERE run_id = ?4",
                params![Utc::now().to_rfc3339(), status, summary_json, run_id],
            )
            .context("update etl run")?;
        Ok(())
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })
            .with_context(|| format!("count rows in {table}"))?;
        Ok(count as usize)
    }

    pub fn last_run_status(&self, pipeline_name: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT status FROM etl_runs WHERE pipeline_name = ?1 ORDER BY run_id DESC LIMIT 1",
                params![pipeline_name],
                |row| row.get(0),
            )
            .optional()
            .context("query last etl run")
    }
}

fn open_file(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create warehouse dir {}", parent.display()))?;
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")
        .context("enable WAL journal")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS dim_player (
            player_id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            full_name TEXT NOT NULL DEFAULT '',
            position TEXT NOT NULL DEFAULT 'UNK',
            birth_date TEXT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fact_player_game (
            game_id TEXT NOT NULL,
            player_id TEXT NOT NULL,
            team_id TEXT NULL,
            opponent_team_id TEXT NULL,
            date_key INTEGER NULL,
            pass_attempts INTEGER NOT NULL DEFAULT 0,
            completions INTEGER NOT NULL DEFAULT 0,
            pass_yards INTEGER NOT NULL DEFAULT 0,
            pass_tds INTEGER NOT NULL DEFAULT 0,
            interceptions INTEGER NOT NULL DEFAULT 0,
            rush_attempts INTEGER NOT NULL DEFAULT 0,
            rush_yards INTEGER NOT NULL DEFAULT 0,
            rush_tds INTEGER NOT NULL DEFAULT 0,
            receptions INTEGER NOT NULL DEFAULT 0,
            rec_yards INTEGER NOT NULL DEFAULT 0,
            rec_tds INTEGER NOT NULL DEFAULT 0,
            total_tds INTEGER NOT NULL DEFAULT 0,
            fumbles INTEGER NOT NULL DEFAULT 0,
            fantasy_points REAL NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (game_id, player_id)
        );
        CREATE INDEX IF NOT EXISTS idx_fact_player_game_player ON fact_player_game(player_id);
        CREATE INDEX IF NOT EXISTS idx_fact_player_game_date ON fact_player_game(date_key);

        CREATE TABLE IF NOT EXISTS fact_player_injury (
            player_id TEXT NOT NULL,
            season INTEGER NOT NULL,
            week INTEGER NOT NULL,
            injury_type TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_fact_player_injury_key
            ON fact_player_injury(player_id, season, week);

        CREATE TABLE IF NOT EXISTS meta_run_state (
            pipeline_name TEXT PRIMARY KEY,
            last_run_at TEXT NOT NULL,
            last_game_date TEXT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS etl_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            pipeline_name TEXT NOT NULL,
            season INTEGER NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            status TEXT NOT NULL,
            summary_json TEXT NOT NULL
        );
        "#,
    )
    .context("create warehouse schema")?;
    Ok(())
}
