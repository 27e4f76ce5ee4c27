/// Buy and sell coordination.
///
/// The coordinator owns the full order lifecycle: take the buy lock,
/// quote, sign, submit (direct or through the bundle relay), persist the
/// fill, and notify. The buy lock is released on every exit path; the
/// position row's status column guards sells instead.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::core::constants::{LAMPORTS_PER_SOL, WSOL_MINT};
use crate::core::error::ExecutionError;
use crate::core::lock_store::BuyLockStore;
use crate::core::types::{
    CloseReason, NotificationEvent, Position, TokenRecord, TradeSide, UserConfig,
};
use crate::position::{NewPosition, PositionStore};
use crate::strike::dex_client::{slippage_for_attempt, OrderRequest, SwapReceipt, SwapRouter};
use crate::strike::relay::BundleRelay;
use crate::strike::wallet::WalletSigner;
use crate::transport::NotificationBus;
use crate::util::BackoffPolicy;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub struct ExecutionCoordinator {
    router: Arc<dyn SwapRouter>,
    relay: Option<Arc<BundleRelay>>,
    locks: Arc<BuyLockStore>,
    store: PositionStore,
    bus: Arc<NotificationBus>,
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl ExecutionCoordinator {
    pub fn new(
        router: Arc<dyn SwapRouter>,
        relay: Option<Arc<BundleRelay>>,
        locks: Arc<BuyLockStore>,
        store: PositionStore,
        bus: Arc<NotificationBus>,
    ) -> Self {
        Self {
            router,
            relay,
            locks,
            store,
            bus,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::transient(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Buy `record.mint` for `user`.
    ///
    /// Returns `Ok(None)` when the user already holds a live position in
    /// the token; concurrent attempts for the same (wallet, mint) lose
    /// the buy lock and get `LockContended`.
    #[instrument(skip(self, user, record), fields(wallet = %user.wallet, mint = %record.mint))]
    pub async fn buy(
        &self,
        user: &UserConfig,
        record: &TokenRecord,
    ) -> Result<Option<Position>, ExecutionError> {
        let lock = self.locks.acquire(&user.wallet, &record.mint)?;
        let result = self.buy_locked(user, record).await;
        self.locks.release(&user.wallet, &record.mint, lock);

        match &result {
            Ok(Some(position)) => {
                info!(
                    wallet = %user.wallet,
                    mint = %record.mint,
                    position_id = position.id,
                    "✨ Buy filled"
                );
                self.bus.notify(
                    &user.wallet,
                    NotificationEvent::TradeUpdate {
                        wallet: user.wallet.clone(),
                        mint: record.mint.clone(),
                        side: TradeSide::Buy,
                        status: "filled".into(),
                        signature: position.buy_signature.clone(),
                        detail: None,
                    },
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!(wallet = %user.wallet, mint = %record.mint, error = %e, "Buy failed");
                self.bus.notify(
                    &user.wallet,
                    NotificationEvent::TradeUpdate {
                        wallet: user.wallet.clone(),
                        mint: record.mint.clone(),
                        side: TradeSide::Buy,
                        status: "failed".into(),
                        signature: None,
                        detail: Some(e.to_string()),
                    },
                );
            }
        }
        result
    }

    async fn buy_locked(
        &self,
        user: &UserConfig,
        record: &TokenRecord,
    ) -> Result<Option<Position>, ExecutionError> {
        let existing = self
            .store
            .live_position_for(&user.wallet, &record.mint)
            .await
            .map_err(|e| ExecutionError::Persistence(e.to_string()))?;
        if let Some(position) = existing {
            info!(
                wallet = %user.wallet,
                mint = %record.mint,
                position_id = position.id,
                "Already holding, buy skipped"
            );
            return Ok(None);
        }

        let entry_price = record
            .price_usd
            .ok_or_else(|| ExecutionError::IncompleteMetadata {
                mint: record.mint.clone(),
                missing: "price_usd".into(),
            })?;

        let signer = WalletSigner::from_base58(&user.private_key_b58)
            .map_err(|e| ExecutionError::Signing(e.to_string()))?;
        let lamports = (user.buy_amount_sol * LAMPORTS_PER_SOL as f64) as u64;

        let receipt = self
            .swap_with_retries(
                user,
                &signer,
                TradeSide::Buy,
                &OrderRequest {
                    input_mint: WSOL_MINT.to_string(),
                    output_mint: record.mint.clone(),
                    amount: lamports,
                    slippage_bps: user.buy_slippage_bps,
                    taker: signer.pubkey().to_string(),
                },
                record.liquidity_usd,
            )
            .await?;

        let position = self
            .store
            .open(NewPosition {
                wallet: user.wallet.clone(),
                mint: record.mint.clone(),
                entry_price,
                quantity: receipt.out_amount,
                sol_spent: user.buy_amount_sol,
                take_profit_pct: user.take_profit_pct,
                stop_loss_pct: user.stop_loss_pct,
                trailing_stop_pct: user.trailing_stop_pct,
                timeout_secs: user.timeout_secs.map(|secs| secs as i64),
                buy_signature: Some(receipt.signature),
            })
            .await
            .map_err(|e| ExecutionError::Persistence(e.to_string()))?;

        Ok(Some(position))
    }

    /// Sell out of a claimed position. The caller must have won
    /// `claim_close` first; on failure the claim is handed back so the
    /// monitor can retry on a later tick.
    #[instrument(skip(self, user, position), fields(wallet = %position.wallet, mint = %position.mint, position_id = position.id))]
    pub async fn sell(
        &self,
        user: &UserConfig,
        position: &Position,
        reason: CloseReason,
        current_price: f64,
        liquidity_usd: Option<f64>,
    ) -> Result<String, ExecutionError> {
        let result = self
            .sell_claimed(user, position, reason, current_price, liquidity_usd)
            .await;

        if let Err(e) = &result {
            warn!(position_id = position.id, error = %e, "Sell failed, claim released");
            if let Err(release_err) = self.store.release_claim(position.id).await {
                warn!(position_id = position.id, error = %release_err, "Claim release failed");
            }
            self.bus.notify(
                &position.wallet,
                NotificationEvent::TradeUpdate {
                    wallet: position.wallet.clone(),
                    mint: position.mint.clone(),
                    side: TradeSide::Sell,
                    status: "failed".into(),
                    signature: None,
                    detail: Some(e.to_string()),
                },
            );
        }
        result
    }

    async fn sell_claimed(
        &self,
        user: &UserConfig,
        position: &Position,
        reason: CloseReason,
        current_price: f64,
        liquidity_usd: Option<f64>,
    ) -> Result<String, ExecutionError> {
        let signer = WalletSigner::from_base58(&user.private_key_b58)
            .map_err(|e| ExecutionError::Signing(e.to_string()))?;

        let receipt = self
            .swap_with_retries(
                user,
                &signer,
                TradeSide::Sell,
                &OrderRequest {
                    input_mint: position.mint.clone(),
                    output_mint: WSOL_MINT.to_string(),
                    amount: position.quantity,
                    slippage_bps: user.sell_slippage_bps,
                    taker: signer.pubkey().to_string(),
                },
                liquidity_usd,
            )
            .await?;

        let pnl_pct = position.pnl_pct(current_price);
        self.store
            .mark_closed(position.id, reason, Some(&receipt.signature), Some(pnl_pct))
            .await
            .map_err(|e| ExecutionError::Persistence(e.to_string()))?;

        info!(
            position_id = position.id,
            reason = reason.as_str(),
            pnl_pct = format!("{pnl_pct:.2}"),
            signature = %receipt.signature,
            "✅ Position closed"
        );
        self.bus.notify(
            &position.wallet,
            NotificationEvent::PositionClosed {
                wallet: position.wallet.clone(),
                mint: position.mint.clone(),
                reason,
                pnl_pct,
            },
        );

        Ok(receipt.signature)
    }

    /// Quote-sign-submit with per-attempt slippage widening. Every retry
    /// requests a fresh order so the blockhash and quote are current.
    async fn swap_with_retries(
        &self,
        user: &UserConfig,
        signer: &WalletSigner,
        side: TradeSide,
        base_request: &OrderRequest,
        liquidity_usd: Option<f64>,
    ) -> Result<SwapReceipt, ExecutionError> {
        let mut attempt = 1;
        loop {
            let mut request = base_request.clone();
            request.slippage_bps =
                slippage_for_attempt(base_request.slippage_bps, attempt, side, liquidity_usd);

            info!(
                side = %side,
                attempt,
                slippage_bps = request.slippage_bps,
                amount = request.amount,
                "🎯 Swap attempt"
            );

            let outcome = self.attempt_swap(user, signer, &request).await;
            match outcome {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        side = %side,
                        attempt,
                        error = %e,
                        "Swap attempt failed, retrying in {:?}", delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_swap(
        &self,
        user: &UserConfig,
        signer: &WalletSigner,
        request: &OrderRequest,
    ) -> Result<SwapReceipt, ExecutionError> {
        let order = self.router.create_order(request).await?;
        if order.out_amount == 0 {
            return Err(ExecutionError::InsufficientLiquidity {
                mint: request.output_mint.clone(),
            });
        }

        let (signed_b64, _signature) = signer.sign_order_transaction(&order.transaction_b64)?;

        match (&self.relay, user.use_bundle_relay) {
            (Some(relay), true) => {
                let signature = relay.submit_with_tip(&signed_b64, signer).await?;
                Ok(SwapReceipt {
                    signature,
                    in_amount: order.in_amount,
                    out_amount: order.out_amount,
                })
            }
            _ => {
                self.router
                    .execute_order(&signed_b64, &order.request_id)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use solana_sdk::message::Message;
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::{Keypair, Signer as _};
    use solana_sdk::transaction::Transaction;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use crate::core::types::PositionStatus;
    use crate::strike::dex_client::SwapOrder;
    use crate::util::Growth;

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            growth: Growth::Exponential,
            jitter: false,
        }
    }

    struct MockRouter {
        payer: Pubkey,
        out_amount: u64,
        fail_executes: AtomicU32,
        fail_with_retryable: bool,
        orders: AtomicU32,
        executes: AtomicU32,
        seen_slippage: Mutex<Vec<u16>>,
    }

    impl MockRouter {
        fn new(payer: Pubkey, out_amount: u64) -> Self {
            Self {
                payer,
                out_amount,
                fail_executes: AtomicU32::new(0),
                fail_with_retryable: true,
                orders: AtomicU32::new(0),
                executes: AtomicU32::new(0),
                seen_slippage: Mutex::new(Vec::new()),
            }
        }

        fn failing_first(mut self, count: u32, retryable: bool) -> Self {
            self.fail_executes = AtomicU32::new(count);
            self.fail_with_retryable = retryable;
            self
        }
    }

    #[async_trait]
    impl SwapRouter for MockRouter {
        async fn create_order(&self, request: &OrderRequest) -> Result<SwapOrder, ExecutionError> {
            self.orders.fetch_add(1, Ordering::SeqCst);
            self.seen_slippage.lock().unwrap().push(request.slippage_bps);
            let tx = Transaction::new_unsigned(Message::new(&[], Some(&self.payer)));
            Ok(SwapOrder {
                request_id: "req-1".into(),
                transaction_b64: base64::encode(bincode::serialize(&tx).unwrap()),
                in_amount: request.amount,
                out_amount: self.out_amount,
            })
        }

        async fn execute_order(
            &self,
            _signed_transaction_b64: &str,
            _request_id: &str,
        ) -> Result<SwapReceipt, ExecutionError> {
            self.executes.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_executes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_executes.fetch_sub(1, Ordering::SeqCst);
                return Err(if self.fail_with_retryable {
                    ExecutionError::SlippageExceeded("mock slippage".into())
                } else {
                    ExecutionError::Unknown("mock hard failure".into())
                });
            }
            Ok(SwapReceipt {
                signature: "mocksig".into(),
                in_amount: 0,
                out_amount: self.out_amount,
            })
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        coordinator: ExecutionCoordinator,
        router: Arc<MockRouter>,
        locks: Arc<BuyLockStore>,
        store: PositionStore,
        user: UserConfig,
    }

    /// Wallet and mock router share one keypair so the mock's unsigned
    /// transactions are payable by the test user.
    async fn harness_with(builder: impl FnOnce(Pubkey) -> MockRouter) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.db");
        let store = PositionStore::connect(path.to_str().unwrap()).await.unwrap();
        let locks = Arc::new(BuyLockStore::default());
        let bus = Arc::new(NotificationBus::default());

        let keypair = Keypair::new();
        let user = UserConfig::standard(
            keypair.pubkey().to_string(),
            bs58::encode(keypair.to_bytes()).into_string(),
        );

        let router = Arc::new(builder(keypair.pubkey()));
        let coordinator = ExecutionCoordinator::new(
            Arc::clone(&router) as Arc<dyn SwapRouter>,
            None,
            Arc::clone(&locks),
            store.clone(),
            bus,
        )
        .with_backoff(fast_backoff());

        Harness {
            _dir: dir,
            coordinator,
            router,
            locks,
            store,
            user,
        }
    }

    fn record(mint: &str) -> TokenRecord {
        let mut record = TokenRecord::new(mint);
        record.price_usd = Some(0.001);
        record.liquidity_usd = Some(10_000.0);
        record
    }

    fn open_request(wallet: &str) -> NewPosition {
        NewPosition {
            wallet: wallet.into(),
            mint: "MintAAA".into(),
            entry_price: 0.001,
            quantity: 5_000,
            sol_spent: 0.1,
            take_profit_pct: 50.0,
            stop_loss_pct: 20.0,
            trailing_stop_pct: None,
            timeout_secs: None,
            buy_signature: None,
        }
    }

    #[tokio::test]
    async fn successful_buy_opens_position_and_releases_lock() {
        let h = harness_with(|payer| MockRouter::new(payer, 5_000)).await;

        let position = h
            .coordinator
            .buy(&h.user, &record("MintAAA"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.quantity, 5_000);
        assert_eq!(position.buy_signature.as_deref(), Some("mocksig"));
        assert!(!h.locks.is_locked(&h.user.wallet, "MintAAA"));
        assert!(h
            .store
            .live_position_for(&h.user.wallet, "MintAAA")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn existing_position_skips_rebuy() {
        let h = harness_with(|payer| MockRouter::new(payer, 5_000)).await;

        let first = h.coordinator.buy(&h.user, &record("MintAAA")).await.unwrap();
        assert!(first.is_some());

        let second = h.coordinator.buy(&h.user, &record("MintAAA")).await.unwrap();
        assert!(second.is_none());
        assert_eq!(h.router.orders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_output_quote_is_insufficient_liquidity() {
        let h = harness_with(|payer| MockRouter::new(payer, 0)).await;

        let err = h.coordinator.buy(&h.user, &record("MintAAA")).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InsufficientLiquidity { .. }));
        // Never reached submission, and the lock is free again
        assert_eq!(h.router.executes.load(Ordering::SeqCst), 0);
        assert!(!h.locks.is_locked(&h.user.wallet, "MintAAA"));
    }

    #[tokio::test]
    async fn missing_price_refuses_to_buy() {
        let h = harness_with(|payer| MockRouter::new(payer, 5_000)).await;
        let mut unpriced = record("MintAAA");
        unpriced.price_usd = None;

        let err = h.coordinator.buy(&h.user, &unpriced).await.unwrap_err();
        assert!(matches!(err, ExecutionError::IncompleteMetadata { .. }));
        assert_eq!(h.router.orders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retry_widens_slippage_then_fills() {
        let h = harness_with(|payer| MockRouter::new(payer, 5_000).failing_first(1, true)).await;

        let position = h.coordinator.buy(&h.user, &record("MintAAA")).await.unwrap();
        assert!(position.is_some());

        // Thin pool buy: 100 bps, then widened to 150 on the retry
        let seen = h.router.seen_slippage.lock().unwrap().clone();
        assert_eq!(seen, vec![100, 150]);
        assert_eq!(h.router.executes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_wait_out_the_backoff_delay() {
        let h = harness_with(|payer| MockRouter::new(payer, 5_000).failing_first(2, true)).await;

        let started = Instant::now();
        let position = h.coordinator.buy(&h.user, &record("MintAAA")).await.unwrap();
        assert!(position.is_some());

        // Two retries: 20ms after the first failure, 40ms after the second
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(h.router.executes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hard_failure_does_not_retry_and_frees_lock() {
        let h = harness_with(|payer| MockRouter::new(payer, 5_000).failing_first(3, false)).await;

        let err = h.coordinator.buy(&h.user, &record("MintAAA")).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Unknown(_)));
        assert_eq!(h.router.executes.load(Ordering::SeqCst), 1);
        assert!(!h.locks.is_locked(&h.user.wallet, "MintAAA"));
        assert!(h
            .store
            .live_position_for(&h.user.wallet, "MintAAA")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn concurrent_buys_open_exactly_one_position() {
        let h = harness_with(|payer| MockRouter::new(payer, 5_000)).await;

        let coordinator = Arc::new(h.coordinator);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            let user = h.user.clone();
            handles.push(tokio::spawn(async move {
                coordinator.buy(&user, &record("MintAAA")).await
            }));
        }

        let mut filled = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(Some(_)) => filled += 1,
                Ok(None) => {}
                Err(ExecutionError::LockContended { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(filled, 1);
        assert!(h
            .store
            .live_position_for(&h.user.wallet, "MintAAA")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn sell_settles_claimed_position() {
        let h = harness_with(|payer| MockRouter::new(payer, 99)).await;

        let position = h.store.open(open_request(&h.user.wallet)).await.unwrap();
        assert!(h.store.claim_close(position.id).await.unwrap());

        let signature = h
            .coordinator
            .sell(&h.user, &position, CloseReason::TakeProfit, 0.0016, Some(10_000.0))
            .await
            .unwrap();
        assert_eq!(signature, "mocksig");

        let closed = h.store.get(position.id).await.unwrap().unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.close_reason, Some(CloseReason::TakeProfit));
        assert_eq!(closed.sell_signature.as_deref(), Some("mocksig"));
        // Entry 0.001, exit 0.0016: 60% locked in
        let realized = closed.realized_pnl_pct.unwrap();
        assert!((realized - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_sell_releases_claim() {
        let h = harness_with(|payer| MockRouter::new(payer, 99).failing_first(9, false)).await;

        let position = h.store.open(open_request(&h.user.wallet)).await.unwrap();
        assert!(h.store.claim_close(position.id).await.unwrap());

        let err = h
            .coordinator
            .sell(&h.user, &position, CloseReason::StopLoss, 0.0007, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Unknown(_)));

        // Claim handed back, a later tick can try again
        let reopened = h.store.get(position.id).await.unwrap().unwrap();
        assert_eq!(reopened.status, PositionStatus::Open);
        assert!(h.store.claim_close(position.id).await.unwrap());
    }
}
