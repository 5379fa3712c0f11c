//! Stage orchestration: raw snapshots to intermediate snapshots (transform),
//! and intermediate snapshots into the warehouse (load).
//!
//! Stages run strictly in sequence and each fully materialises its output
//! before the next starts. Fatal failures surface as [`EtlError`]; injury
//! problems degrade to warnings and the rest of the run completes.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::aggregate::aggregate_player_games;
use crate::dimension::build_player_dimension;
use crate::error::{EtlError, Warning};
use crate::injury::project_injuries;
use crate::models::{PlayEvent, Player, PlayerGameStat, RosterEntry};
use crate::run_state::{RunStateTracker, latest_game_date};
use crate::snapshot::{SnapshotKind, SnapshotStore};
use crate::staging::{self, StagedPlayer, StagingReport};
use crate::warehouse::{MergeReport, Warehouse, WarehouseLocation};

/// Run-state name the player-game load records under.
pub const PBP_PIPELINE: &str = "pbp";

const INJURY_STAGE: &str = "injuries";

#[derive(Debug, Clone, Serialize)]
pub struct TransformSummary {
    pub season: i32,
    pub players: usize,
    pub player_games: usize,
    pub injuries: Option<usize>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub season: Option<i32>,
    pub staging: Vec<StagingReport>,
    pub merges: Vec<MergeReport>,
    pub last_game_date: Option<String>,
    pub injuries_loaded: bool,
    pub warnings: Vec<Warning>,
}

/// Builds the intermediate snapshots for one season.
///
/// Both required raw snapshots are read before anything is written, so a
/// missing or unreadable input leaves the previous intermediates untouched
/// rather than mixing seasons.
pub fn run_transform(store: &SnapshotStore, season: i32) -> Result<TransformSummary, EtlError> {
    log::info!("transforming season {season}");
    let mut warnings = Vec::new();

    let roster = store.read(SnapshotKind::Rosters, season)?;
    let pbp = store.read(SnapshotKind::PlayByPlay, season)?;

    let players = build_player_dimension(&RosterEntry::from_table(&roster));
    log::info!(
        "player dimension: {} roster rows -> {} players",
        roster.len(),
        players.len()
    );
    let facts = aggregate_player_games(&PlayEvent::from_table(&pbp));
    log::info!(
        "player-game facts: {} play rows -> {} rows",
        pbp.len(),
        facts.len()
    );

    store.write(SnapshotKind::DimPlayers, season, &Player::to_table(&players))?;
    store.write(
        SnapshotKind::FactPlayerGame,
        season,
        &PlayerGameStat::to_table(&facts),
    )?;

    let injuries = match transform_injuries(store, season, &mut warnings) {
        Ok(count) => Some(count),
        Err(err) => {
            let warning = Warning::OptionalStage {
                stage: INJURY_STAGE.to_string(),
                reason: err.to_string(),
            };
            log::warn!("{warning}");
            warnings.push(warning);
            // A stale injury snapshot from an earlier season must not get loaded.
            let stale = store.path(SnapshotKind::FactPlayerInjury, season);
            if stale.exists()
                && let Err(err) = std::fs::remove_file(&stale)
            {
                log::warn!("could not remove stale {}: {err}", stale.display());
            }
            None
        }
    };

    Ok(TransformSummary {
        season,
        players: players.len(),
        player_games: facts.len(),
        injuries,
        warnings,
    })
}

fn transform_injuries(
    store: &SnapshotStore,
    season: i32,
    warnings: &mut Vec<Warning>,
) -> Result<usize, EtlError> {
    let raw = store.read(SnapshotKind::Injuries, season)?;
    let projection = project_injuries(&raw);
    if !projection.dropped_columns.is_empty() {
        warnings.push(Warning::DroppedColumns {
            table: SnapshotKind::FactPlayerInjury.label().to_string(),
            columns: projection.dropped_columns.clone(),
        });
    }
    store.write(SnapshotKind::FactPlayerInjury, season, &projection.to_table())?;
    Ok(projection.records.len())
}

/// Loads the intermediate snapshots into the warehouse.
///
/// Required snapshots are checked before the warehouse is opened, so a missing
/// file never leaves a partial mutation behind. Table merges commit one at a
/// time; a failure in a later table does not undo an earlier one.
pub fn run_load(
    store: &SnapshotStore,
    location: &WarehouseLocation,
    season: Option<i32>,
    skip_injuries: bool,
) -> Result<LoadSummary, EtlError> {
    let key_season = season.unwrap_or_default();
    store.ensure(SnapshotKind::DimPlayers, key_season)?;
    store.ensure(SnapshotKind::FactPlayerGame, key_season)?;

    let players_table = store.read(SnapshotKind::DimPlayers, key_season)?;
    let facts_table = store.read(SnapshotKind::FactPlayerGame, key_season)?;

    let mut warnings = Vec::new();
    let (players, players_report) = staging::prepare_players(&players_table);
    let (facts, facts_report) = staging::prepare_player_games(&facts_table);
    for report in [&players_report, &facts_report] {
        if let Some(warning) = report.warning() {
            log::warn!("{warning}");
            warnings.push(warning);
        }
    }
    let mut summary = LoadSummary {
        season,
        staging: vec![players_report, facts_report],
        merges: Vec::new(),
        last_game_date: latest_game_date(&facts),
        injuries_loaded: false,
        warnings,
    };

    let mut dw = Warehouse::open(location).map_err(EtlError::Store)?;
    let run_id = dw
        .begin_run(PBP_PIPELINE, season)
        .map_err(EtlError::Store)?;

    let merged = merge_tables(
        store,
        key_season,
        &mut dw,
        &players,
        &facts,
        skip_injuries,
        &mut summary,
    );
    if let Err(err) = merged {
        return Err(fail_run(&dw, run_id, err));
    }

    let summary_json = serde_json::to_string(&summary).unwrap_or_else(|_| "{}".to_string());
    if let Err(err) = dw.finish_run(run_id, "ok", &summary_json) {
        return Err(fail_run(&dw, run_id, err));
    }
    log::info!("load complete");
    Ok(summary)
}

/// Merges every table and records run state. Only the core tables and the run
/// state are fatal; injury problems land in `summary.warnings`.
fn merge_tables(
    store: &SnapshotStore,
    season: i32,
    dw: &mut Warehouse,
    players: &[StagedPlayer],
    facts: &[PlayerGameStat],
    skip_injuries: bool,
    summary: &mut LoadSummary,
) -> Result<()> {
    summary.merges.push(dw.merge_players(players)?);
    summary.merges.push(dw.merge_player_games(facts)?);

    if skip_injuries {
        log::info!("skipping injury load");
    } else {
        match load_injuries(store, season, dw) {
            Ok((report, merge)) => {
                if let Some(warning) = report.warning() {
                    log::warn!("{warning}");
                    summary.warnings.push(warning);
                }
                summary.staging.push(report);
                summary.merges.push(merge);
                summary.injuries_loaded = true;
            }
            Err(err) => {
                let warning = Warning::OptionalStage {
                    stage: INJURY_STAGE.to_string(),
                    reason: format!("{err:#}"),
                };
                log::warn!("{warning}");
                summary.warnings.push(warning);
            }
        }
    }

    RunStateTracker::record(
        dw.connection(),
        PBP_PIPELINE,
        summary.last_game_date.as_deref(),
    )
}

/// Marks the audit row failed and wraps the cause as a store error.
fn fail_run(dw: &Warehouse, run_id: i64, err: anyhow::Error) -> EtlError {
    let failure = serde_json::json!({ "error": format!("{err:#}") }).to_string();
    if let Err(audit_err) = dw.finish_run(run_id, "failed", &failure) {
        log::warn!("could not record failed run: {audit_err:#}");
    }
    EtlError::Store(err)
}

fn load_injuries(
    store: &SnapshotStore,
    season: i32,
    dw: &mut Warehouse,
) -> Result<(StagingReport, MergeReport)> {
    let table = store.read(SnapshotKind::FactPlayerInjury, season)?;
    let (rows, report) = staging::prepare_injuries(&table);
    let merge = dw.merge_injuries(&rows).context("merge injuries")?;
    Ok((report, merge))
}

/// Transform followed by load for one season.
pub fn run_season(
    store: &SnapshotStore,
    location: &WarehouseLocation,
    season: i32,
    skip_injuries: bool,
) -> Result<(TransformSummary, LoadSummary), EtlError> {
    let transform = run_transform(store, season)?;
    let load = run_load(store, location, Some(season), skip_injuries)?;
    Ok((transform, load))
}
