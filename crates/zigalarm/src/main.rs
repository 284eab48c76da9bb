use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zigalarm::Config;
use zigalarm::Engine;
use zigalarm::Host;
use zigalarm::Registry;
use zigalarm::alarm::RestoreStore;
use zigalarm::api;
use zigalarm::config::panel_entity_id;

/// Home alarm panel daemon
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "zigalarm.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets())
        .init();

    info!("zigalarm {} starting", env!("CARGO_PKG_VERSION"));
    info!("Loaded config from: {}", args.config.display());

    let mut engine = Engine::new();
    engine.register_integrations_from_config(&config);
    let engine = Arc::new(engine);

    // Subscribe before any panel starts so no transition goes unpersisted
    let events = engine.events();

    let engine_task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };

    let store = config.restore.as_ref().map(|restore| {
        RestoreStore::load(&restore.path).unwrap_or_else(|e| {
            warn!("Ignoring persisted states: {}", e);
            RestoreStore::empty(&restore.path)
        })
    });

    let registry = Registry::new();
    let host: Arc<dyn Host> = engine.clone();
    for (key, panel) in &config.panels {
        let entity_id = panel_entity_id(key);
        let restored = store
            .as_ref()
            .map(|store| store.state_for(&entity_id))
            .unwrap_or_default();
        info!("Starting panel {} ({})", entity_id, panel.name);
        registry.start(&entity_id, panel.clone(), host.clone(), restored);
    }

    if let Some(store) = store {
        info!("Persisting panel states to {}", store.path().display());
        tokio::spawn(store.follow(events));
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let api_task = config.api.clone().map(|api_config| {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) =
                api::serve(&api_config.listen, api_config.port, registry, shutdown_rx).await
            {
                error!("HTTP API server failed: {:#}", e);
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutting down");

    registry.stop_all().await;
    let _ = shutdown_tx.send(());
    if let Some(task) = api_task {
        let _ = task.await;
    }
    engine_task.abort();

    info!("zigalarm stopped");
    Ok(())
}
