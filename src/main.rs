use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use gridiron_dw::config::EtlConfig;
use gridiron_dw::error::EtlError;
use gridiron_dw::pipeline::{self, LoadSummary, TransformSummary};

#[derive(Debug, Parser)]
#[command(name = "gridiron_dw", about = "Season play-by-play to warehouse loader")]
struct Cli {
    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct PathArgs {
    /// Warehouse connection string (overrides GRIDIRON_DB_URL / DB_URL)
    #[arg(long = "db", global = true)]
    db_url: Option<String>,

    /// Directory holding raw season snapshots
    #[arg(long, global = true)]
    raw_dir: Option<PathBuf>,

    /// Directory holding intermediate snapshots
    #[arg(long, global = true)]
    transformed_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the dimension and fact snapshots for a season
    Transform {
        #[arg(long)]
        season: i32,
    },
    /// Merge the intermediate snapshots into the warehouse
    Load {
        #[arg(long)]
        season: Option<i32>,
        #[arg(long)]
        skip_injuries: bool,
    },
    /// Transform then load
    Run {
        #[arg(long)]
        season: i32,
        #[arg(long)]
        skip_injuries: bool,
    },
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run(cli: Cli) -> Result<(), EtlError> {
    let mut config = EtlConfig::from_env();
    if let Some(db_url) = cli.paths.db_url {
        config.db_url = db_url;
    }
    if let Some(raw_dir) = cli.paths.raw_dir {
        config.raw_dir = raw_dir;
    }
    if let Some(transformed_dir) = cli.paths.transformed_dir {
        config.transformed_dir = transformed_dir;
    }
    let store = config.snapshot_store();

    match cli.command {
        Command::Transform { season } => {
            let summary = pipeline::run_transform(&store, season)?;
            report_transform(&summary);
        }
        Command::Load {
            season,
            skip_injuries,
        } => {
            let location = config.warehouse_location()?;
            let summary = pipeline::run_load(&store, &location, season, skip_injuries)?;
            report_load(&summary);
        }
        Command::Run {
            season,
            skip_injuries,
        } => {
            let location = config.warehouse_location()?;
            let (transform, load) =
                pipeline::run_season(&store, &location, season, skip_injuries)?;
            report_transform(&transform);
            report_load(&load);
        }
    }
    Ok(())
}

fn report_transform(summary: &TransformSummary) {
    log::info!(
        "season {}: players={} player_games={} injuries={}",
        summary.season,
        summary.players,
        summary.player_games,
        summary
            .injuries
            .map(|n| n.to_string())
            .unwrap_or_else(|| "skipped".to_string())
    );
    report_warnings(summary.warnings.iter().map(ToString::to_string));
}

fn report_load(summary: &LoadSummary) {
    for staged in &summary.staging {
        log::info!(
            "{}: {} in, {} staged, {} dropped, {} defaulted",
            staged.table,
            staged.rows_in,
            staged.rows_out,
            staged.dropped_missing_key,
            staged.coerced_to_default
        );
    }
    for merge in &summary.merges {
        log::info!("{}: {} staged, {} affected", merge.table, merge.staged, merge.affected);
    }
    log::info!(
        "last game date: {}",
        summary.last_game_date.as_deref().unwrap_or("n/a")
    );
    report_warnings(summary.warnings.iter().map(ToString::to_string));
}

fn report_warnings(warnings: impl Iterator<Item = String>) {
    let warnings = warnings.collect::<Vec<_>>();
    if warnings.is_empty() {
        return;
    }
    log::warn!("{} warning(s):", warnings.len());
    for warning in warnings.iter().take(8) {
        log::warn!(" - {warning}");
    }
}
