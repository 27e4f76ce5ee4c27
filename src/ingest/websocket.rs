use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::FeedConfig;
use crate::core::constants::RAYDIUM_AMM_PROGRAM;
use crate::core::types::PoolEvent;
use crate::ingest::dex_parsers::{parse_block_for_pools, SignatureWindow};
use crate::util::{BackoffPolicy, Growth};

/// JSON-RPC request for feed subscriptions
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

/// JSON-RPC response from the feed
#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

/// Subscription notification pushed by the feed
#[derive(Debug, Deserialize)]
pub struct FeedNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: FeedNotificationParams,
}

#[derive(Debug, Deserialize)]
pub struct FeedNotificationParams {
    pub subscription: u64,
    pub result: Value,
}

/// Watches the ledger feed for AMM pool initializations and emits one
/// `PoolEvent` per new pool on the output channel.
///
/// Subscribes to confirmed blocks mentioning the AMM program and runs
/// every transaction through the pool-creation parser. Reconnects with
/// exponential backoff; the dedup window spans reconnects so replayed
/// blocks never re-emit a pool.
pub struct PoolWatcher {
    config: FeedConfig,
    event_tx: mpsc::Sender<PoolEvent>,
    dedup: Arc<SignatureWindow>,
    request_id: AtomicU64,
    blocks_seen: AtomicU64,
    pools_emitted: AtomicU64,
}

impl std::fmt::Debug for PoolWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolWatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PoolWatcher {
    pub fn new(config: FeedConfig, event_tx: mpsc::Sender<PoolEvent>) -> Self {
        let dedup = Arc::new(SignatureWindow::new(
            config.dedup_capacity,
            Duration::from_secs(config.dedup_ttl_secs),
        ));
        Self {
            config,
            event_tx,
            dedup,
            request_id: AtomicU64::new(1),
            blocks_seen: AtomicU64::new(0),
            pools_emitted: AtomicU64::new(0),
        }
    }

    /// Connection loop. Runs until the event channel closes.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting pool watcher on {}", self.config.url);

        let policy = BackoffPolicy {
            max_attempts: u32::MAX,
            base_delay: Duration::from_secs(self.config.reconnect_base_secs),
            max_delay: Duration::from_secs(self.config.reconnect_max_secs),
            growth: Growth::Exponential,
            jitter: true,
        };
        let mut consecutive_failures: u32 = 0;

        loop {
            match self.connect_and_stream().await {
                Ok(()) => {
                    warn!("Feed connection closed, reconnecting");
                    consecutive_failures = 0;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(error = %e, consecutive_failures, "Feed connection failed");
                }
            }

            if self.event_tx.is_closed() {
                info!("Pool event channel closed, watcher stopping");
                return Ok(());
            }

            let delay = policy.delay_for(consecutive_failures.max(1));
            info!("Reconnecting to feed in {:?}", delay);
            sleep(delay).await;
        }
    }

    /// One connection lifetime: subscribe, then pump notifications
    /// until the stream ends.
    #[instrument(skip(self))]
    async fn connect_and_stream(&self) -> Result<()> {
        Url::parse(&self.config.url).context("Failed to parse feed URL")?;

        let (ws_stream, response) =
            timeout(Duration::from_secs(30), connect_async(self.config.url.as_str()))
            .await
            .context("Feed connection timeout")?
            .context("Failed to connect to feed")?;

        info!(
            "Connected to feed {} (HTTP {})",
            self.config.url,
            response.status()
        );

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // Subscribe to confirmed blocks that mention the AMM program
        let request_id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let subscribe = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: request_id,
            method: "blockSubscribe".to_string(),
            params: serde_json::json!([
                { "mentionsAccountOrProgram": RAYDIUM_AMM_PROGRAM },
                {
                    "commitment": "confirmed",
                    "encoding": "json",
                    "transactionDetails": "full",
                    "showRewards": false,
                    "maxSupportedTransactionVersion": 0
                }
            ]),
        };
        let message =
            serde_json::to_string(&subscribe).context("Failed to serialize subscription")?;
        ws_sender
            .send(Message::Text(message))
            .await
            .context("Failed to send block subscription")?;
        info!("📡 Sent AMM block subscription request (id={})", request_id);

        let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
        heartbeat.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if ws_sender.send(Message::Ping(vec![])).await.is_err() {
                        warn!("Heartbeat ping failed, dropping connection");
                        return Ok(());
                    }
                }
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_message(&text).await {
                                warn!(error = %e, "Failed to handle feed message");
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Feed closed: {:?}", frame);
                            return Ok(());
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Binary(data))) => {
                            warn!("Unexpected binary feed message: {} bytes", data.len());
                        }
                        Some(Ok(Message::Frame(_))) => {
                            debug!("Raw frame message ignored");
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Feed receive error");
                            return Ok(());
                        }
                        None => {
                            debug!("Feed stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&self, message: &str) -> Result<()> {
        // Subscription confirmations and errors come back as plain responses
        if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(message) {
            if let Some(id) = response.id {
                if let Some(result) = response.result {
                    info!("Subscription confirmed: request_id={}, subscription={}", id, result);
                } else if let Some(error) = response.error {
                    error!(
                        "Feed rejected request {}: {} - {}",
                        id, error.code, error.message
                    );
                }
                return Ok(());
            }
        }

        let notification: FeedNotification = match serde_json::from_str(message) {
            Ok(n) => n,
            Err(_) => {
                warn!("Unrecognized feed message");
                return Ok(());
            }
        };

        if notification.method != "blockNotification" {
            debug!("Ignoring notification method {}", notification.method);
            return Ok(());
        }

        let block = match notification
            .params
            .result
            .get("value")
            .and_then(|v| v.get("block"))
        {
            Some(block) => block,
            None => return Ok(()),
        };

        let seen = self.blocks_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % 500 == 0 {
            info!(
                blocks_seen = seen,
                pools_emitted = self.pools_emitted.load(Ordering::Relaxed),
                dedup_window = self.dedup.len(),
                "Feed statistics"
            );
        }

        for event in parse_block_for_pools(block, &self.dedup) {
            info!(
                signature = %event.signature,
                pool = %event.pool_address,
                mint = %event.token_mint(),
                "🎯 New pool event"
            );
            self.pools_emitted.fetch_add(1, Ordering::Relaxed);
            if self.event_tx.send(event).await.is_err() {
                anyhow::bail!("Pool event channel closed");
            }
        }

        Ok(())
    }
}
