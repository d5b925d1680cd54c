mod terminal;

use anyhow::{Context, Result};
use std::io;
use tracing_subscriber::EnvFilter;

use state_coordinator_backend::{CoordinatorConfig, Engine};
use terminal::TerminalHost;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,state_coordinator_backend=debug")),
        )
        .init();

    tracing::info!("State coordinator starting...");

    let config = CoordinatorConfig::load();
    tracing::info!("States directory: {}", config.states_dir);

    let (event_tx, event_rx) = flume::unbounded();
    let rt = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let engine = rt
        .block_on(Engine::init(&config, event_tx))
        .context("failed to initialize state engine")?;

    let mut host = TerminalHost::new(engine, event_rx);
    let stdin = io::stdin();
    host.run(stdin.lock(), &mut io::stdout())
}
