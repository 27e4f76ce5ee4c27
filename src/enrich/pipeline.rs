/// Enrichment fan-out.
///
/// Assembles a `TokenRecord` for a pool event from the price, metadata,
/// risk, holder, and pool-depth providers. Runs at most once per mint
/// at a time (single-flight through the cache's guard); concurrent
/// callers wait and read the cached result.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{PoolEvent, TokenRecord};
use crate::enrich::cache::MetadataCache;
use crate::enrich::providers::{
    PoolInfoProvider, PriceProvider, RiskProvider, TokenMetaProvider, TopHoldersProvider,
};
use crate::util::{retry_with_backoff, BackoffPolicy};

const TOP_HOLDERS_LIMIT: usize = 10;

/// Cut a provider fetch off at the caller's deadline; whatever it had
/// not delivered by then counts as a failure.
async fn bounded<T>(deadline: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("provider exceeded the {deadline:?} deadline")),
    }
}

pub struct EnrichmentPipeline {
    cache: Arc<MetadataCache>,
    price: Arc<dyn PriceProvider>,
    meta: Arc<dyn TokenMetaProvider>,
    risk: Arc<dyn RiskProvider>,
    holders: Arc<dyn TopHoldersProvider>,
    pool_info: Arc<dyn PoolInfoProvider>,
    /// Slow cadence for tokens not yet listed on the aggregator
    price_policy: BackoffPolicy,
    /// Quick retries for ordinary provider flakiness
    provider_policy: BackoffPolicy,
}

impl EnrichmentPipeline {
    pub fn new(
        cache: Arc<MetadataCache>,
        price: Arc<dyn PriceProvider>,
        meta: Arc<dyn TokenMetaProvider>,
        risk: Arc<dyn RiskProvider>,
        holders: Arc<dyn TopHoldersProvider>,
        pool_info: Arc<dyn PoolInfoProvider>,
    ) -> Self {
        Self {
            cache,
            price,
            meta,
            risk,
            holders,
            pool_info,
            price_policy: BackoffPolicy::price_listing(),
            provider_policy: BackoffPolicy::transient(),
        }
    }

    pub fn with_price_policy(mut self, policy: BackoffPolicy) -> Self {
        self.price_policy = policy;
        self
    }

    pub fn with_provider_policy(mut self, policy: BackoffPolicy) -> Self {
        self.provider_policy = policy;
        self
    }

    /// Assemble (or reuse) the token record for a pool event, spending
    /// at most `deadline` on any one provider.
    ///
    /// Never fails: a provider that stays down or runs past the
    /// deadline leaves its fields `None` and the record marked
    /// incomplete, which downstream filters treat as a rejection.
    #[instrument(skip(self, pool, deadline), fields(mint = %pool.token_mint()))]
    pub async fn enrich(&self, pool: &PoolEvent, deadline: Duration) -> TokenRecord {
        let mint = pool.token_mint().to_string();

        if let Some(hit) = self.cache.get_fresh(&mint) {
            return hit;
        }

        let guard = self.cache.flight_guard(&mint);
        let _held = guard.lock().await;

        // A concurrent enricher may have filled the cache while we waited
        if let Some(hit) = self.cache.get_fresh(&mint) {
            debug!(mint, "Record fetched by concurrent enricher");
            return hit;
        }

        let record = self.fetch_record(pool, &mint, deadline).await;
        self.cache.insert(record.clone());
        drop(_held);
        self.cache.clear_flight_guard(&mint);

        record
    }

    async fn fetch_record(&self, pool: &PoolEvent, mint: &str, deadline: Duration) -> TokenRecord {
        let price_fut = bounded(
            deadline,
            retry_with_backoff(
                &self.price_policy,
                "price_lookup",
                || async {
                    match self.price.price(mint).await {
                        Ok(Some(snapshot)) => Ok(snapshot),
                        Ok(None) => Err(anyhow!("token {mint} not listed yet")),
                        Err(e) => Err(e),
                    }
                },
                |_| true,
            ),
        );

        let meta_fut = bounded(
            deadline,
            retry_with_backoff(
                &self.provider_policy,
                "token_meta",
                || self.meta.meta(mint),
                |_| true,
            ),
        );

        let risk_fut = bounded(
            deadline,
            retry_with_backoff(
                &self.provider_policy,
                "risk_report",
                || self.risk.risk(mint),
                |_| true,
            ),
        );

        let holders_fut = bounded(
            deadline,
            retry_with_backoff(
                &self.provider_policy,
                "top_holders",
                || self.holders.top_holders(mint, TOP_HOLDERS_LIMIT),
                |_| true,
            ),
        );

        let pool_size_fut = bounded(deadline, self.pool_info.pool_size_sol(&pool.quote_vault));

        let (price, meta, risk, holders, pool_size) =
            tokio::join!(price_fut, meta_fut, risk_fut, holders_fut, pool_size_fut);

        let mut record = TokenRecord::new(mint);
        let mut missing: Vec<&str> = Vec::new();

        match price {
            Ok(snapshot) => {
                record.price_usd = Some(snapshot.price_usd);
                record.liquidity_usd = snapshot.liquidity_usd;
                record.market_cap_usd = snapshot.market_cap_usd;
                record.has_socials = snapshot.has_socials;
                if record.created_at.is_none() {
                    record.created_at = snapshot.pair_created_at;
                }
            }
            Err(e) => {
                warn!(mint = %record.mint, error = %e, "Price provider gave up");
                missing.push("price");
            }
        }

        match meta {
            Ok(meta) => {
                record.name = meta.name;
                record.symbol = meta.symbol;
                record.holder_count = meta.holder_count;
                record.mint_authority_renounced = meta.mint_authority_renounced;
                record.freeze_authority_revoked = meta.freeze_authority_revoked;
                record.immutable_metadata = meta.immutable_metadata;
                // The chain's creation time beats the aggregator's pair time
                if meta.created_at.is_some() {
                    record.created_at = meta.created_at;
                }
            }
            Err(e) => {
                warn!(mint = %record.mint, error = %e, "Metadata provider gave up");
                missing.push("meta");
            }
        }

        match risk {
            Ok(report) => {
                record.risk_score = Some(report.score);
                record.moon_score = report.moon_score;
                if record.liquidity_burnt.is_none() {
                    record.liquidity_burnt = report.liquidity_burnt;
                }
            }
            Err(e) => {
                warn!(mint = %record.mint, error = %e, "Risk provider gave up");
                missing.push("risk");
            }
        }

        match holders {
            Ok(stakes) => {
                record.top10_holder_pct = Some(stakes.iter().map(|s| s.pct).sum());
            }
            Err(e) => {
                // Optional field, only premium filters read it
                debug!(mint = %record.mint, error = %e, "Holder provider unavailable");
            }
        }

        match pool_size {
            Ok(sol) => record.pool_size_sol = Some(sol),
            Err(e) => {
                debug!(mint = %record.mint, error = %e, "Pool depth unavailable");
            }
        }

        record.complete = missing.is_empty();
        if record.complete {
            info!(
                mint = %record.mint,
                price_usd = ?record.price_usd,
                liquidity_usd = ?record.liquidity_usd,
                risk_score = ?record.risk_score,
                "✨ Token record assembled"
            );
        } else {
            warn!(mint = %record.mint, missing = ?missing, "Token record incomplete");
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::WSOL_MINT;
    use crate::enrich::providers::{HolderStake, PriceSnapshot, RiskReport, TokenMeta};
    use crate::util::Growth;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            growth: Growth::Exponential,
            jitter: false,
        }
    }

    struct MockPrice {
        calls: AtomicUsize,
        /// Calls that return Ok(None) before the snapshot appears
        unlisted_for: usize,
        snapshot: Option<PriceSnapshot>,
        delay: Duration,
    }

    impl MockPrice {
        fn listed(price: f64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                unlisted_for: 0,
                snapshot: Some(PriceSnapshot {
                    price_usd: price,
                    liquidity_usd: Some(80_000.0),
                    market_cap_usd: Some(45_000.0),
                    pair_created_at: None,
                    has_socials: Some(true),
                }),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl PriceProvider for MockPrice {
        async fn price(&self, _mint: &str) -> Result<Option<PriceSnapshot>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if call < self.unlisted_for {
                return Ok(None);
            }
            Ok(self.snapshot.clone())
        }
    }

    struct MockMeta {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TokenMetaProvider for MockMeta {
        async fn meta(&self, _mint: &str) -> Result<TokenMeta> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("meta provider down");
            }
            Ok(TokenMeta {
                name: Some("Token".into()),
                symbol: Some("TKN".into()),
                holder_count: Some(40),
                mint_authority_renounced: Some(true),
                freeze_authority_revoked: Some(true),
                immutable_metadata: Some(true),
                created_at: Some(Utc::now() - chrono::Duration::hours(1)),
            })
        }
    }

    struct MockRisk;

    #[async_trait]
    impl RiskProvider for MockRisk {
        async fn risk(&self, _mint: &str) -> Result<RiskReport> {
            Ok(RiskReport {
                score: 20.0,
                liquidity_burnt: Some(true),
                moon_score: Some(85.0),
            })
        }
    }

    struct MockHolders;

    #[async_trait]
    impl TopHoldersProvider for MockHolders {
        async fn top_holders(&self, _mint: &str, _limit: usize) -> Result<Vec<HolderStake>> {
            Ok(vec![
                HolderStake { address: "a".into(), pct: 10.0 },
                HolderStake { address: "b".into(), pct: 5.0 },
            ])
        }
    }

    struct MockPoolInfo;

    #[async_trait]
    impl PoolInfoProvider for MockPoolInfo {
        async fn pool_size_sol(&self, _quote_vault: &str) -> Result<f64> {
            Ok(25.0)
        }
    }

    fn pool_event() -> PoolEvent {
        PoolEvent {
            signature: "sig".into(),
            pool_address: "pool".into(),
            base_mint: "Mint1111111111111111111111111111111111111111".into(),
            quote_mint: WSOL_MINT.into(),
            lp_mint: "lp".into(),
            base_vault: "bv".into(),
            quote_vault: "qv".into(),
            market_id: "mkt".into(),
            detected_at: Utc::now(),
        }
    }

    fn pipeline_with(
        price: Arc<MockPrice>,
        meta: Arc<MockMeta>,
    ) -> EnrichmentPipeline {
        EnrichmentPipeline::new(
            Arc::new(MetadataCache::new(60, 3600)),
            price,
            meta,
            Arc::new(MockRisk),
            Arc::new(MockHolders),
            Arc::new(MockPoolInfo),
        )
        .with_price_policy(fast_policy(4))
        .with_provider_policy(fast_policy(3))
    }

    #[tokio::test]
    async fn assembles_complete_record() {
        let price = Arc::new(MockPrice::listed(0.01));
        let meta = Arc::new(MockMeta { calls: AtomicUsize::new(0), fail: false });
        let pipeline = pipeline_with(Arc::clone(&price), meta);

        let record = pipeline.enrich(&pool_event(), Duration::from_secs(5)).await;
        assert!(record.complete);
        assert_eq!(record.price_usd, Some(0.01));
        assert_eq!(record.top10_holder_pct, Some(15.0));
        assert_eq!(record.pool_size_sol, Some(25.0));
        assert_eq!(record.risk_score, Some(20.0));
        assert_eq!(record.mint_authority_renounced, Some(true));
    }

    #[tokio::test]
    async fn second_enrich_hits_cache() {
        let price = Arc::new(MockPrice::listed(0.01));
        let meta = Arc::new(MockMeta { calls: AtomicUsize::new(0), fail: false });
        let pipeline = pipeline_with(Arc::clone(&price), Arc::clone(&meta));

        let first = pipeline.enrich(&pool_event(), Duration::from_secs(5)).await;
        let second = pipeline.enrich(&pool_event(), Duration::from_secs(5)).await;
        assert_eq!(first.price_usd, second.price_usd);
        assert_eq!(price.calls.load(Ordering::SeqCst), 1);
        assert_eq!(meta.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_enrichers_fetch_once() {
        let price = Arc::new(MockPrice {
            calls: AtomicUsize::new(0),
            unlisted_for: 0,
            snapshot: Some(PriceSnapshot {
                price_usd: 0.02,
                liquidity_usd: None,
                market_cap_usd: None,
                pair_created_at: None,
                has_socials: None,
            }),
            delay: Duration::from_millis(50),
        });
        let meta = Arc::new(MockMeta { calls: AtomicUsize::new(0), fail: false });
        let pipeline = Arc::new(pipeline_with(Arc::clone(&price), meta));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pipeline = Arc::clone(&pipeline);
            handles.push(tokio::spawn(async move {
                pipeline.enrich(&pool_event(), Duration::from_secs(5)).await
            }));
        }
        for handle in handles {
            let record = handle.await.unwrap();
            assert_eq!(record.price_usd, Some(0.02));
        }
        assert_eq!(price.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn price_retries_until_listed() {
        let price = Arc::new(MockPrice {
            calls: AtomicUsize::new(0),
            unlisted_for: 2,
            snapshot: Some(PriceSnapshot {
                price_usd: 0.5,
                liquidity_usd: None,
                market_cap_usd: None,
                pair_created_at: None,
                has_socials: None,
            }),
            delay: Duration::ZERO,
        });
        let meta = Arc::new(MockMeta { calls: AtomicUsize::new(0), fail: false });
        let pipeline = pipeline_with(Arc::clone(&price), meta);

        let record = pipeline.enrich(&pool_event(), Duration::from_secs(5)).await;
        assert_eq!(record.price_usd, Some(0.5));
        assert_eq!(price.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn deadline_returns_best_effort_record() {
        let price = Arc::new(MockPrice {
            calls: AtomicUsize::new(0),
            unlisted_for: 0,
            snapshot: Some(PriceSnapshot {
                price_usd: 0.03,
                liquidity_usd: None,
                market_cap_usd: None,
                pair_created_at: None,
                has_socials: None,
            }),
            delay: Duration::from_millis(300),
        });
        let meta = Arc::new(MockMeta { calls: AtomicUsize::new(0), fail: false });
        let pipeline = pipeline_with(Arc::clone(&price), meta);

        let started = std::time::Instant::now();
        let record = pipeline.enrich(&pool_event(), Duration::from_millis(50)).await;

        // The slow price provider was cut off; everything else landed
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(!record.complete);
        assert!(record.price_usd.is_none());
        assert_eq!(record.risk_score, Some(20.0));
        assert_eq!(record.pool_size_sol, Some(25.0));
        assert_eq!(record.name.as_deref(), Some("Token"));
    }

    #[tokio::test]
    async fn failed_provider_leaves_record_incomplete() {
        let price = Arc::new(MockPrice::listed(0.01));
        let meta = Arc::new(MockMeta { calls: AtomicUsize::new(0), fail: true });
        let pipeline = pipeline_with(Arc::clone(&price), Arc::clone(&meta));

        let record = pipeline.enrich(&pool_event(), Duration::from_secs(5)).await;
        assert!(!record.complete);
        assert!(record.name.is_none());
        assert!(record.mint_authority_renounced.is_none());
        // Price side still populated
        assert_eq!(record.price_usd, Some(0.01));
        // All three transient attempts were spent
        assert_eq!(meta.calls.load(Ordering::SeqCst), 3);
    }
}
