use std::{
    process,
    sync::{Arc, OnceLock},
    time::Duration,
};

use tracing::{error, info};
use wattline::{
    config::{collection::StoreBackend, Config},
    core::{
        accounting::EnergyAccountant,
        clock::{Clock, SystemClock},
        coordinator::Coordinator,
        publisher::LogPublisher,
        scheduler::Scheduler,
    },
    logger::LoggerManager,
    print_error,
    source::SimulatedFleet,
    store::{FileStore, MemoryStore, StateStore},
};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config();
    let logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });

    info!("Starting wattline version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    info!(
        interval_secs = cfg.collection.interval_secs,
        precision_wh = cfg.accounting.precision_wh,
        max_interval_secs = cfg.accounting.max_interval_secs,
        gap_policy = ?cfg.accounting.gap_policy,
        "Collection pipeline configured"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn StateStore> = match cfg.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory state store (totals reset on restart)");
            Arc::new(MemoryStore::new(clock.clone()))
        }
        StoreBackend::File => {
            info!("Using file state store at {}", cfg.store.path);
            let file_store = FileStore::open(&cfg.store.path, clock.clone())
                .await
                .unwrap_or_else(|e| {
                    error!("Failed to open state store: {}", e);
                    process::exit(1);
                });
            Arc::new(file_store)
        }
    };

    let source = Arc::new(SimulatedFleet::from_config(&cfg.source, clock.clone()));
    info!(
        devices = cfg.source.device_count,
        "Device snapshot source ready"
    );

    let accountant = Arc::new(EnergyAccountant::new(
        store,
        clock.clone(),
        cfg.accounting.clone(),
    ));

    let coordinator = Coordinator::builder()
        .source(source)
        .accountant(accountant.clone())
        .build()
        .unwrap_or_else(|e| {
            error!("Failed to wire collection coordinator: {}", e);
            process::exit(1);
        });

    let scheduler = Scheduler::new(
        Arc::new(coordinator),
        Arc::new(LogPublisher),
        clock,
        Duration::from_secs(cfg.collection.interval_secs),
    );

    info!("Starting collection scheduler...");
    scheduler.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C — initiating graceful shutdown...");

    scheduler.stop().await;

    if let Some(stats) = accountant.statistics() {
        info!(
            samples = stats.samples,
            gaps_discarded = stats.gaps_discarded,
            gaps_capped = stats.gaps_capped,
            negatives_zeroed = stats.negatives_zeroed,
            "Accounting statistics at shutdown"
        );
    }

    info!("Shutdown complete");
    Ok(())
}
