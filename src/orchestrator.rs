/// Event fan-out: one pool event in, one enrichment, N user decisions.
///
/// The engine enriches each pool exactly once and then evaluates every
/// active user's rules against the shared record. Buys for different
/// users run concurrently; each fill spawns a monitor task that owns the
/// position until exit. On startup, open positions left over from a
/// previous run are re-adopted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::core::error::ExecutionError;
use crate::core::types::{NotificationEvent, PoolEvent, TokenRecord, UserConfig};
use crate::enrich::EnrichmentPipeline;
use crate::position::{MonitorRegistry, PositionMonitor, PositionStore};
use crate::scout::{evaluate, FilterOutcome};
use crate::strike::ExecutionCoordinator;
use crate::transport::NotificationBus;
use crate::users::UserDirectory;

/// Upper bound on one pool's enrichment; past this the filters run on
/// whatever the providers managed to deliver.
const ENRICH_DEADLINE: Duration = Duration::from_secs(45);

pub struct Engine {
    pipeline: Arc<EnrichmentPipeline>,
    users: Arc<dyn UserDirectory>,
    executor: Arc<ExecutionCoordinator>,
    monitor: Arc<PositionMonitor>,
    registry: Arc<MonitorRegistry>,
    store: PositionStore,
    bus: Arc<NotificationBus>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("active_monitors", &self.registry.active_count())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        pipeline: Arc<EnrichmentPipeline>,
        users: Arc<dyn UserDirectory>,
        executor: Arc<ExecutionCoordinator>,
        monitor: Arc<PositionMonitor>,
        registry: Arc<MonitorRegistry>,
        store: PositionStore,
        bus: Arc<NotificationBus>,
    ) -> Self {
        Self {
            pipeline,
            users,
            executor,
            monitor,
            registry,
            store,
            bus,
        }
    }

    /// Main loop: drain pool events until the feed closes or shutdown
    /// fires. Each event is processed on its own task so a slow
    /// enrichment never stalls the feed channel.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<PoolEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        self.resume_open_positions().await?;

        loop {
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => {
                        let engine = Arc::clone(&self);
                        tokio::spawn(async move {
                            engine.process_pool_event(event).await;
                        });
                    }
                    None => {
                        warn!("Pool event channel closed, engine stopping");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    info!("🛑 Engine shutting down gracefully");
                    break;
                }
            }
        }

        self.registry.stop_all();
        Ok(())
    }

    /// Re-adopt positions that were open when the process last stopped.
    ///
    /// Claims taken by a seller that died mid-flight are handed back
    /// first, so a crash between `claim_close` and settlement never
    /// strands a position.
    #[instrument(skip(self))]
    pub async fn resume_open_positions(&self) -> Result<()> {
        let recovered = self.store.release_stale_claims().await?;
        if recovered > 0 {
            warn!(count = recovered, "Recovered positions stuck mid-close");
        }

        let open = self.store.list_open().await?;
        if open.is_empty() {
            return Ok(());
        }

        info!(count = open.len(), "Resuming open positions");
        for position in open {
            match self.users.user(&position.wallet).await? {
                Some(user) => {
                    self.registry
                        .spawn(Arc::clone(&self.monitor), position.id, user);
                }
                None => {
                    warn!(
                        position_id = position.id,
                        wallet = %position.wallet,
                        "Open position has no user in the roster, left unmonitored"
                    );
                }
            }
        }
        Ok(())
    }

    /// Enrich once, then fan out to every active user concurrently.
    #[instrument(skip(self, event), fields(mint = %event.token_mint(), pool = %event.pool_address))]
    pub async fn process_pool_event(&self, event: PoolEvent) {
        info!(
            mint = %event.token_mint(),
            signature = %event.signature,
            "🆕 New pool detected"
        );
        self.bus.broadcast(&NotificationEvent::NewPool {
            mint: event.token_mint().to_string(),
            pool_address: event.pool_address.clone(),
            signature: event.signature.clone(),
        });

        let record = self.pipeline.enrich(&event, ENRICH_DEADLINE).await;

        let users = match self.users.active_users().await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "User roster unavailable, pool skipped");
                return;
            }
        };
        if users.is_empty() {
            debug!("No active users, pool ignored");
            return;
        }

        let decisions = users
            .into_iter()
            .map(|user| self.decide_and_buy(user, &record));
        join_all(decisions).await;
    }

    async fn decide_and_buy(&self, user: UserConfig, record: &TokenRecord) {
        match evaluate(record, &user, Utc::now()) {
            FilterOutcome::Reject { rule } => {
                debug!(wallet = %user.wallet, mint = %record.mint, rule, "Filter rejected");
            }
            FilterOutcome::Pass => {
                info!(wallet = %user.wallet, mint = %record.mint, "✅ Filters passed, buying");
                match self.executor.buy(&user, record).await {
                    Ok(Some(position)) => {
                        self.registry
                            .spawn(Arc::clone(&self.monitor), position.id, user);
                    }
                    Ok(None) => {}
                    Err(ExecutionError::LockContended { .. }) => {
                        debug!(wallet = %user.wallet, mint = %record.mint, "Buy already in flight");
                    }
                    Err(e) => {
                        warn!(wallet = %user.wallet, mint = %record.mint, error = %e, "Buy failed");
                    }
                }
            }
        }
    }
}
