use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fejkur_engine::adapters::{
    ConsoleNarrator, DirectoryFrameSource, HttpDetector, HttpNarrator, HttpReasoning,
};
use fejkur_engine::conditions::{ConditionRegistry, DOORS_CLOSED, ESCAPE_GESTURE};
use fejkur_engine::config::EngineConfig;
use fejkur_engine::ports::Narrator;
use fejkur_engine::{Engine, TaskCatalog, TickTrigger};

/// Tick-driven orchestration engine for the wardrobe escape room.
#[derive(Debug, Parser)]
#[command(name = "fejkur-engine", version)]
struct Cli {
    /// Path to a TOML config overlaying the environment defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a task catalog (TOML). Defaults to the built-in set.
    #[arg(long)]
    tasks: Option<PathBuf>,

    /// Single-step mode: run one tick per line read from stdin instead
    /// of running on the timer.
    #[arg(long)]
    step: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    info!(
        tick_ms = config.tick_interval_ms,
        frames_dir = %config.frames_dir.display(),
        "Starting engine"
    );

    let catalog = match &cli.tasks {
        Some(path) => TaskCatalog::load(path)?,
        None => TaskCatalog::builtin(),
    };
    info!(tasks = catalog.len(), "Task catalog loaded");

    // Hardware signals arrive as marker files dropped by the sensor bridge.
    let mut conditions = ConditionRegistry::new();
    conditions.file_flag(DOORS_CLOSED, config.signals_dir.join("doors_closed"));
    conditions.file_flag(ESCAPE_GESTURE, config.signals_dir.join("escape_gesture"));

    let frames = Box::new(DirectoryFrameSource::new(config.frames_dir.clone()));
    let detector = Box::new(HttpDetector::new(config.detector.clone()));
    let reasoning = Box::new(HttpReasoning::new(config.reasoning.clone()));
    let narrator: Box<dyn Narrator> = match &config.narrator {
        Some(endpoint) => Box::new(HttpNarrator::new(endpoint.clone())),
        None => Box::new(ConsoleNarrator),
    };

    let mut engine = Engine::new(
        config, catalog, conditions, frames, detector, reasoning, narrator,
    );

    let trigger = if cli.step {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut lines = stdin.lines();
            while let Ok(Some(_)) = lines.next_line().await {
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
        info!("Single-step mode: press enter to advance a tick");
        TickTrigger::Manual(rx)
    } else {
        TickTrigger::Interval
    };

    engine.run(trigger).await;
    Ok(())
}
