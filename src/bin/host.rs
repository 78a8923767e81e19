//! Host binary for tidal schedules.

use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tidal::EngineConfig;
use tidal::scheduler::{
    RegistryEvent, ScheduleDocument, ScheduleEvent, ScheduleRegistry, resolve_session,
};
use tidal::time::format_ms;
use tokio::sync::mpsc;
use tracing::{info, trace, warn};
use tracing_subscriber::EnvFilter;

/// Tidal: hierarchical task scheduler.
#[derive(Parser)]
#[command(name = "tidal-host", version, about)]
struct Cli {
    /// Path to TOML engine configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Validate a schedule document and print when its next session starts.
    Check {
        /// Path to the JSON schedule document.
        document: PathBuf,
    },

    /// Run a schedule document until it finishes or Ctrl+C is pressed.
    Run {
        /// Path to the JSON schedule document.
        document: PathBuf,

        /// Identifier reported with every event.
        #[arg(long, default_value_t = 1)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tidal=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Check { document } => check(&document),
        Command::Run { document, id } => run(&document, id, config).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    if let Some(path) = path {
        return Ok(EngineConfig::from_file(path)?);
    }
    let default_path = EngineConfig::default_config_path();
    if default_path.exists() {
        info!("using config {}", default_path.display());
        return Ok(EngineConfig::from_file(&default_path)?);
    }
    Ok(EngineConfig::default())
}

fn check(path: &Path) -> anyhow::Result<()> {
    let spec = ScheduleDocument::load(path)?.into_spec();
    spec.validate()?;

    match resolve_session(&spec, Local::now().naive_local()) {
        Ok(resolution) => println!(
            "next {} session in {}",
            resolution.pattern.kind(),
            format_ms(resolution.ms_until_session)
        ),
        Err(e) => println!("{e}"),
    }
    Ok(())
}

async fn run(path: &Path, id: i64, config: EngineConfig) -> anyhow::Result<()> {
    let spec = ScheduleDocument::load(path)?.into_spec();
    spec.validate()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let registry = ScheduleRegistry::new(config, tx)?;
    if !registry.add(id, spec) {
        anyhow::bail!("schedule {id} is already registered");
    }
    registry.start(id);
    let reactor = registry.run();

    println!("Running schedule {id}. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(RegistryEvent { id, event }) = event else {
                    warn!("registry event channel closed");
                    break;
                };
                if report(id, &event) {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    info!("received Ctrl+C, shutting down...");
                }
                registry.stop(id);
                break;
            }
        }
    }

    reactor.abort();
    Ok(())
}

/// Log one event. Returns `true` once the schedule is done.
fn report(id: i64, event: &ScheduleEvent) -> bool {
    match event {
        ScheduleEvent::Triggered { task } => {
            println!("[{id}] {task}");
            false
        }
        ScheduleEvent::Finished { reason } => {
            println!("[{id}] finished: {reason}");
            true
        }
        ScheduleEvent::Stopped => true,
        ScheduleEvent::TimeToNextSession {
            ms_left, label, ..
        } => {
            trace!("[{id}] next {label} session in {}", format_ms(*ms_left));
            false
        }
        ScheduleEvent::TimeToNextTrigger { ms_left, .. } => {
            trace!("[{id}] next trigger in {}", format_ms(*ms_left));
            false
        }
        ScheduleEvent::TimeLeftInSession { ms_left, .. } => {
            trace!("[{id}] session ends in {}", format_ms(*ms_left));
            false
        }
        ScheduleEvent::Started | ScheduleEvent::Paused => {
            info!("[{id}] {event:?}");
            false
        }
    }
}
