//! Ticket sync daemon
//!
//! Usage: `ticket-sync [config.toml]`. Without a file, configuration comes
//! from defaults plus `TICKET_SYNC_*` environment variables.

use anyhow::Context;
use std::sync::Arc;
use ticket_ledger::{MemoryStore, Storage, StorageBackend, TicketStore};
use ticket_sync::{
    ChainEventReader, Config, JsonRpcProvider, LogFormat, Metrics, ReaderConfig,
    ReconciliationEngine, SyncService, TicketQueryHandler, TracingReporter,
};
use tracing::{info, warn};

fn load_config() -> anyhow::Result<Config> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let mut config = Config::from_file(&path)
                .with_context(|| format!("loading configuration from {}", path))?;
            config.apply_env().context("reading TICKET_SYNC_* overrides")?;
            config
        }
        None => Config::from_env().context("reading TICKET_SYNC_* configuration")?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn run<S: TicketStore + 'static>(config: Config, store: Arc<S>) -> anyhow::Result<()> {
    let metrics = Metrics::new().context("registering metrics")?;
    let provider = Arc::new(JsonRpcProvider::new(&config.provider)?);
    let reader = ChainEventReader::new(
        provider,
        ReaderConfig::from_provider_config(&config.provider, config.contract_address()?),
        metrics.clone(),
    );
    let engine = Arc::new(ReconciliationEngine::new(
        store,
        reader,
        config.sync.clone(),
        Arc::new(TracingReporter),
        metrics.clone(),
    ));

    let query = TicketQueryHandler::new(Arc::clone(engine.store()));
    match query.sync_status()? {
        Some(cursor) => info!(block = cursor.last_confirmed_block, "Resuming sync"),
        None => info!(start_block = config.sync.start_block, "No cursor yet, syncing from start"),
    }

    let (service, shutdown) = SyncService::new(engine);
    let task = tokio::spawn(service.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.shutdown();
    task.await.context("sync loop panicked")?;

    match metrics.render() {
        Ok(text) => info!(metrics = %text, "Final metrics"),
        Err(e) => warn!(error = %e, "Failed to render metrics"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(config.log_format);

    info!(
        service = %config.service_name,
        endpoint = %config.provider.endpoint,
        contract = %config.provider.contract_address,
        "Starting ticket sync"
    );

    match config.storage.backend {
        StorageBackend::Rocksdb => {
            let store = Storage::open(&config.storage)
                .with_context(|| {
                    format!("opening ledger at {}", config.storage.data_dir.display())
                })?;
            info!(tickets = store.approximate_ticket_count()?, "Opened ledger");
            run(config, Arc::new(store)).await?;
        }
        StorageBackend::Memory => {
            run(config, Arc::new(MemoryStore::new())).await?;
        }
    }

    info!("Ticket sync stopped");
    Ok(())
}
