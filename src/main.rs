use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use solsniper::config::EngineConfig;
use solsniper::core::lock_store::BuyLockStore;
use solsniper::enrich::{
    DexScreenerClient, EnrichmentPipeline, MetadataCache, PoolInfoProvider, PriceProvider,
    RiskProvider, RpcPoolInfo, RugcheckClient, SolscanClient, TokenMetaProvider,
    TopHoldersProvider,
};
use solsniper::ingest::PoolWatcher;
use solsniper::orchestrator::Engine;
use solsniper::position::{MonitorRegistry, PositionMonitor, PositionStore};
use solsniper::strike::{BundleRelay, ExecutionCoordinator, HttpSwapClient, SwapRouter};
use solsniper::transport::NotificationBus;
use solsniper::users::{InMemoryUserDirectory, UserDirectory};

const POOL_EVENT_BUFFER: usize = 256;

struct ServiceOrchestrator {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<Result<()>>>,
}

impl ServiceOrchestrator {
    fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    async fn start_all_services(&mut self, config: EngineConfig) -> Result<()> {
        info!("🚀 Starting sniper services");

        let store = PositionStore::connect(&config.db_path).await?;
        let users: Arc<dyn UserDirectory> =
            Arc::new(InMemoryUserDirectory::load(&config.users_path)?);
        let bus = Arc::new(NotificationBus::default());
        let locks = Arc::new(BuyLockStore::new(Duration::from_secs(config.lock_ttl_secs)));

        // Metadata providers
        let price: Arc<dyn PriceProvider> = Arc::new(DexScreenerClient::new(&config.providers)?);
        let solscan = Arc::new(SolscanClient::new(&config.providers)?);
        let risk: Arc<dyn RiskProvider> = Arc::new(RugcheckClient::new(&config.providers)?);
        let pool_info: Arc<dyn PoolInfoProvider> = Arc::new(RpcPoolInfo::new(&config.rpc_url));
        let cache = Arc::new(MetadataCache::new(
            config.enrich.cache_fresh_secs,
            config.enrich.cache_ttl_secs,
        ));
        let pipeline = Arc::new(EnrichmentPipeline::new(
            cache,
            Arc::clone(&price),
            Arc::clone(&solscan) as Arc<dyn TokenMetaProvider>,
            risk,
            solscan as Arc<dyn TopHoldersProvider>,
            pool_info,
        ));

        // Execution stack
        let router: Arc<dyn SwapRouter> = Arc::new(HttpSwapClient::new(&config.router)?);
        let relay = Arc::new(BundleRelay::new(config.relay.clone())?);
        let executor = Arc::new(
            ExecutionCoordinator::new(
                router,
                Some(relay),
                locks,
                store.clone(),
                Arc::clone(&bus),
            )
            .with_max_attempts(config.router.max_attempts),
        );

        let monitor = Arc::new(
            PositionMonitor::new(store.clone(), Arc::clone(&price), Arc::clone(&executor))
                .with_poll_interval(
                    Duration::from_secs(config.monitor.poll_secs),
                    Duration::from_secs(config.monitor.error_poll_secs),
                ),
        );
        let registry = Arc::new(MonitorRegistry::new());

        let (event_tx, event_rx) = mpsc::channel(POOL_EVENT_BUFFER);

        // Feed watcher
        let watcher = PoolWatcher::new(config.feed.clone(), event_tx);
        let mut watcher_shutdown = self.shutdown_tx.subscribe();
        let watcher_task = tokio::spawn(async move {
            info!("📡 Ledger feed watcher starting");
            tokio::select! {
                result = watcher.run() => {
                    match &result {
                        Ok(()) => info!("Feed watcher finished"),
                        Err(e) => error!("Feed watcher error: {}", e),
                    }
                    result
                }
                _ = watcher_shutdown.recv() => {
                    info!("🛑 Feed watcher shutting down gracefully");
                    Ok(())
                }
            }
        });
        self.tasks.push(watcher_task);

        // Engine
        let engine = Arc::new(Engine::new(
            pipeline, users, executor, monitor, registry, store, bus,
        ));
        let engine_shutdown = self.shutdown_tx.subscribe();
        let engine_task = tokio::spawn(async move {
            info!("🎯 Trade lifecycle engine starting");
            let result = engine.run(event_rx, engine_shutdown).await;
            match &result {
                Ok(()) => info!("Engine finished"),
                Err(e) => error!("Engine error: {}", e),
            }
            result
        });
        self.tasks.push(engine_task);

        info!("✅ All {} services started", self.tasks.len());
        Ok(())
    }

    async fn shutdown_all(&mut self) -> Result<()> {
        info!("🛑 Shutting down all services");
        let _ = self.shutdown_tx.send(());
        debug!("Shutdown signal sent");

        for (i, task) in self.tasks.drain(..).enumerate() {
            match task.await {
                Ok(Ok(())) => info!("✅ Service {} shut down cleanly", i + 1),
                Ok(Err(e)) => warn!("⚠️  Service {} error during shutdown: {}", i + 1, e),
                Err(e) => error!("❌ Service {} task failed: {}", i + 1, e),
            }
        }

        info!("✅ All services shut down");
        Ok(())
    }
}

fn init_tracing() -> Result<()> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true)
        .compact();

    tracing_subscriber::registry()
        .with(console_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!("🎯 Solsniper - Event-Driven Trade Lifecycle Engine");
    info!("==================================================");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "solsniper.json".to_string());
    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    let mut orchestrator = ServiceOrchestrator::new();
    orchestrator.start_all_services(config).await?;

    info!("📊 Watching the feed; press Ctrl+C to shut down");
    match signal::ctrl_c().await {
        Ok(()) => info!("🛑 Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    orchestrator.shutdown_all().await?;
    info!("👋 Shutdown complete");
    Ok(())
}
