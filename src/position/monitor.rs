/// Exit-rule evaluation and per-position watch loops.
///
/// One monitor task runs per open position. Each tick it re-reads the
/// position from the ledger (another actor may have closed it), fetches
/// a fresh price, ratchets the peak, and evaluates the exit rules. The
/// `claim_close` flip in the store guarantees only one winner sells even
/// if a manual close races the monitor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument, warn};

use crate::core::constants::{MONITOR_ERROR_POLL_SECS, MONITOR_POLL_SECS};
use crate::core::types::{CloseReason, Position, PositionStatus, UserConfig};
use crate::enrich::providers::PriceProvider;
use crate::position::store::PositionStore;
use crate::strike::ExecutionCoordinator;

/// Decide whether `position` should exit at `current_price`.
///
/// Rules fire in priority order: timeout, trailing stop (once the price
/// has been above entry), take-profit, stop-loss. A trailing exit is
/// reported as `TrailingStop` even when the price is also below the
/// plain stop level.
pub fn evaluate_exit(
    position: &Position,
    current_price: f64,
    now: DateTime<Utc>,
) -> Option<CloseReason> {
    if let Some(timeout_secs) = position.timeout_secs {
        if position.age_secs(now) >= timeout_secs {
            return Some(CloseReason::Timeout);
        }
    }

    if let Some(trailing_pct) = position.trailing_stop_pct {
        // The trailing stop arms only after the position has been in
        // profit; before that the plain stop-loss governs.
        let armed = position.peak_price > position.entry_price;
        if armed && position.drawdown_from_peak_pct(current_price) >= trailing_pct {
            return Some(CloseReason::TrailingStop);
        }
    }

    let pnl = position.pnl_pct(current_price);
    if pnl >= position.take_profit_pct {
        return Some(CloseReason::TakeProfit);
    }
    if pnl <= -position.stop_loss_pct {
        return Some(CloseReason::StopLoss);
    }

    None
}

pub struct PositionMonitor {
    store: PositionStore,
    prices: Arc<dyn PriceProvider>,
    executor: Arc<ExecutionCoordinator>,
    poll_interval: Duration,
    error_poll_interval: Duration,
}

impl std::fmt::Debug for PositionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionMonitor")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl PositionMonitor {
    pub fn new(
        store: PositionStore,
        prices: Arc<dyn PriceProvider>,
        executor: Arc<ExecutionCoordinator>,
    ) -> Self {
        Self {
            store,
            prices,
            executor,
            poll_interval: Duration::from_secs(MONITOR_POLL_SECS),
            error_poll_interval: Duration::from_secs(MONITOR_ERROR_POLL_SECS),
        }
    }

    pub fn with_poll_interval(mut self, poll: Duration, error_poll: Duration) -> Self {
        self.poll_interval = poll;
        self.error_poll_interval = error_poll;
        self
    }

    /// Watch one position until it exits or the stop signal fires.
    #[instrument(skip(self, user, stop), fields(wallet = %user.wallet))]
    pub async fn watch(&self, position_id: i64, user: UserConfig, mut stop: watch::Receiver<bool>) {
        info!(position_id, "👀 Monitoring position");

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!(position_id, "Monitor stopped");
                        return;
                    }
                }
                done = self.tick(position_id, &user) => {
                    match done {
                        TickOutcome::Settled => return,
                        TickOutcome::KeepWatching => sleep(self.poll_interval).await,
                        TickOutcome::Degraded => sleep(self.error_poll_interval).await,
                    }
                }
            }
        }
    }

    async fn tick(&self, position_id: i64, user: &UserConfig) -> TickOutcome {
        let position = match self.store.get(position_id).await {
            Ok(Some(position)) => position,
            Ok(None) => {
                warn!(position_id, "Position vanished from ledger, stopping monitor");
                return TickOutcome::Settled;
            }
            Err(e) => {
                error!(position_id, error = %e, "Ledger read failed");
                return TickOutcome::Degraded;
            }
        };

        if position.status != PositionStatus::Open {
            debug!(position_id, status = position.status.as_str(), "Position no longer open");
            return TickOutcome::Settled;
        }

        let snapshot = match self.prices.price(&position.mint).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(position_id, mint = %position.mint, "No price quote this tick");
                return TickOutcome::Degraded;
            }
            Err(e) => {
                warn!(position_id, mint = %position.mint, error = %e, "Price fetch failed");
                return TickOutcome::Degraded;
            }
        };

        let current_price = snapshot.price_usd;
        if current_price > position.peak_price {
            if let Err(e) = self.store.update_peak(position.id, current_price).await {
                warn!(position_id, error = %e, "Peak update failed");
            }
        }

        // Evaluate against the ratcheted peak, not the stale row
        let mut live = position;
        live.peak_price = live.peak_price.max(current_price);

        let Some(reason) = evaluate_exit(&live, current_price, Utc::now()) else {
            return TickOutcome::KeepWatching;
        };

        match self.store.claim_close(live.id).await {
            Ok(true) => {}
            Ok(false) => {
                // Someone else (manual close, another tick) got there first
                debug!(position_id, "Close already claimed elsewhere");
                return TickOutcome::Settled;
            }
            Err(e) => {
                error!(position_id, error = %e, "Close claim failed");
                return TickOutcome::Degraded;
            }
        }

        info!(
            position_id,
            mint = %live.mint,
            reason = reason.as_str(),
            pnl_pct = format!("{:.2}", live.pnl_pct(current_price)),
            "🎯 Exit triggered"
        );

        match self
            .executor
            .sell(user, &live, reason, current_price, snapshot.liquidity_usd)
            .await
        {
            Ok(_) => TickOutcome::Settled,
            Err(e) => {
                // Claim was released by the executor; retry next tick
                warn!(position_id, error = %e, "Exit sell failed, will retry");
                TickOutcome::Degraded
            }
        }
    }
}

enum TickOutcome {
    Settled,
    KeepWatching,
    Degraded,
}

/// Handle on the monitor tasks currently running, keyed by position id.
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    stops: DashMap<i64, watch::Sender<bool>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a monitor task for `position_id`. A second spawn for the
    /// same id replaces the first, which is told to stop.
    pub fn spawn(&self, monitor: Arc<PositionMonitor>, position_id: i64, user: UserConfig) {
        let (stop_tx, stop_rx) = watch::channel(false);
        if let Some(previous) = self.stops.insert(position_id, stop_tx) {
            let _ = previous.send(true);
        }

        let stops_len = self.stops.len();
        debug!(position_id, active_monitors = stops_len, "Monitor spawned");

        tokio::spawn(async move {
            monitor.watch(position_id, user, stop_rx).await;
        });
    }

    pub fn stop(&self, position_id: i64) {
        if let Some((_, stop_tx)) = self.stops.remove(&position_id) {
            let _ = stop_tx.send(true);
        }
    }

    pub fn stop_all(&self) {
        let ids: Vec<i64> = self.stops.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.stop(id);
        }
    }

    pub fn active_count(&self) -> usize {
        self.stops.len()
    }
}
