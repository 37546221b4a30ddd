//! Taskbridge CLI
//!
//! Operator entry point for transfer runs, offline reconciliation and
//! the ledger query surface.
//!
//! Usage:
//!   taskbridge run --config bridge.json --mode rehearsal --candidates staged.json
//!   taskbridge reconcile --config bridge.json --mode rehearsal
//!   taskbridge history --config bridge.json --limit 50
//!   taskbridge stats --config bridge.json
//!   taskbridge probe --config bridge.json --mode rehearsal

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use taskbridge::{
    assemble, BridgeConfig, HoursBackend, Mode, OfflineReconciler, RetryPolicy,
    SqliteHoursBackend, StagedRecord, TransferLedger, VerificationClient, WebDriverEngine,
};

#[derive(Parser)]
#[command(name = "taskbridge")]
#[command(about = "Attendance-to-ERP transfer bridge")]
#[command(
    long_about = "Drives staged attendance records into the legacy task-register form, verifies committed hours against the target backing store, and keeps a deduplicating transfer ledger."
)]
struct Cli {
    /// Path to the bridge configuration file (JSON)
    #[arg(short, long, global = true, default_value = "bridge.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Post into the test period and test backing store
    Rehearsal,
    /// Post as-is into the live system
    Production,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Rehearsal => Mode::Rehearsal,
            ModeArg::Production => Mode::Production,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Transfer staged candidates into the ERP form
    Run {
        #[arg(short, long, value_enum, default_value = "rehearsal")]
        mode: ModeArg,
        /// JSON file holding the ordered candidate list
        #[arg(long)]
        candidates: PathBuf,
    },
    /// Retry queued unverified transfers against the backing store
    Reconcile {
        #[arg(short, long, value_enum, default_value = "rehearsal")]
        mode: ModeArg,
    },
    /// Show ledgered transfers, newest first
    History {
        #[arg(long, default_value = "50")]
        limit: u32,
        #[arg(long, default_value = "0")]
        offset: u32,
    },
    /// Show aggregate ledger statistics
    Stats,
    /// Check which backing-store profiles currently answer
    Probe {
        #[arg(short, long, value_enum, default_value = "rehearsal")]
        mode: ModeArg,
    },
}

fn init_logging() -> Result<()> {
    let log_level = env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    Ok(())
}

fn load_config(path: &PathBuf) -> Result<BridgeConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn load_candidates(path: &PathBuf) -> Result<Vec<StagedRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading candidates {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing candidates {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run { mode, candidates } => {
            let candidates = load_candidates(&candidates)?;
            info!("starting run with {} candidates", candidates.len());

            let ctx = config.context(mode.into());
            let engine = WebDriverEngine::connect(&config.webdriver_url).await?;
            let handles = assemble(ctx, engine, Arc::new(SqliteHoursBackend))?;

            let cancel = handles.cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("cancellation requested; finishing the current entry");
                    cancel.cancel();
                }
            });

            let summary = handles.run.execute(candidates).await?;
            handles.session.close().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Reconcile { mode } => {
            let ctx = config.context(mode.into());
            let ledger = Arc::new(TransferLedger::open(&ctx.ledger_path)?);
            let verifier = VerificationClient::new(
                Arc::new(SqliteHoursBackend),
                ctx.profiles.clone(),
                RetryPolicy::default(),
            );
            let summary = OfflineReconciler::new(ledger, verifier)
                .process_queue()
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::History { limit, offset } => {
            let ledger = TransferLedger::open(&config.ledger_path)?;
            let rows = ledger.history(limit, offset)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Stats => {
            let ledger = TransferLedger::open(&config.ledger_path)?;
            let stats = ledger.statistics()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Probe { mode } => {
            let ctx = config.context(mode.into());
            let backend = SqliteHoursBackend;
            for profile in &ctx.profiles {
                match backend.fetch_hours(profile, "PROBE", "1970-01-01").await {
                    Ok(_) => println!("{}: reachable", profile.name),
                    Err(e) => println!("{}: unreachable ({e})", profile.name),
                }
            }
        }
    }

    Ok(())
}
