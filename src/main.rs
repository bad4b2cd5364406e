mod board;
mod command;
mod config;
mod executor;
mod format;
mod history;
mod interpret;
mod llm;
mod platform;
mod poller;
mod tracker;
mod trigger;
mod workflow;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::board::{BoardRenderer, MermaidRenderer};
use crate::config::Config;
use crate::executor::ChainExecutor;
use crate::history::HistoryStore;
use crate::interpret::LlmInterpreter;
use crate::llm::LlmClient;
use crate::platform::signal::SignalClient;
use crate::poller::{Poller, PollerHandle};
use crate::tracker::LatticeCli;
use crate::trigger::TriggerDetector;
use crate::workflow::Workflow;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lattice_bot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Signal API: {}", config.signal.api_url);
    info!("  Phone: {}", config.signal.phone_number);
    info!("  Groups: {}", config.signal.groups.len());
    info!("  Triggers: {:?}", config.signal.trigger_prefixes);
    info!("  Project: {}", config.lattice.project_root.display());
    info!("  Actor: {}", config.lattice.actor);
    info!("  Model: {} via {}", config.llm.model, config.llm.provider);
    info!(
        "  Board: {}",
        if config.board.enabled { config.board.renderer.as_str() } else { "disabled" }
    );

    let poller = build_poller(&config)?;
    let handle = poller.handle();

    info!("{} is starting...", config.bot.name);
    let worker = tokio::spawn(poller.run());

    wait_for_shutdown(handle).await;
    worker.await.context("Poll loop task failed")?;

    info!("{} stopped", config.bot.name);
    Ok(())
}

fn build_poller(config: &Config) -> Result<Poller> {
    let transport = Arc::new(SignalClient::new(
        &config.signal.api_url,
        &config.signal.phone_number,
    ));

    let cli = Arc::new(LatticeCli::new(
        &config.lattice.binary,
        config.lattice.project_root.clone(),
    ));
    let renderer: Option<Arc<dyn BoardRenderer>> = if config.board.enabled {
        Some(Arc::new(MermaidRenderer::new(
            &config.board.renderer,
            Duration::from_secs(config.board.timeout_secs),
        )))
    } else {
        None
    };
    let executor = ChainExecutor::new(cli, renderer, &config.lattice.actor);

    let llm = LlmClient::new(config.llm.clone())?;
    let detector = TriggerDetector::new(config.signal.trigger_prefixes.clone());
    let first_prefix = detector
        .prefixes()
        .first()
        .cloned()
        .unwrap_or_default();

    let workflow = Workflow::new(
        Arc::new(LlmInterpreter::new(llm)),
        executor,
        config.help_text().map(str::to_string),
        &first_prefix,
    );

    Ok(Poller::new(
        transport,
        Arc::new(workflow),
        detector,
        HistoryStore::new(config.signal.max_history_messages),
        config.signal.groups.clone(),
        Duration::from_millis(config.signal.poll_interval_ms),
    ))
}

/// Block until Ctrl-C (or SIGTERM on unix), then ask the poll loop to stop.
async fn wait_for_shutdown(handle: PollerHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown requested, finishing the current cycle");
    handle.stop();
}
