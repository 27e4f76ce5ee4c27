/// Metadata provider clients.
///
/// Each upstream sits behind a small trait so the pipeline (and its
/// tests) never depend on a concrete HTTP client. All providers are
/// flaky by nature; callers decide the retry policy.

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::core::constants::LAMPORTS_PER_SOL;

/// Price and market view of a token, as reported by an aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub price_usd: f64,
    pub liquidity_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub pair_created_at: Option<DateTime<Utc>>,
    pub has_socials: Option<bool>,
}

/// On-chain token metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenMeta {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub holder_count: Option<u64>,
    pub mint_authority_renounced: Option<bool>,
    pub freeze_authority_revoked: Option<bool>,
    pub immutable_metadata: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Risk provider verdict
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskReport {
    /// 0 (clean) to 100 (radioactive)
    pub score: f64,
    pub liquidity_burnt: Option<bool>,
    /// Upside score, 0 to 100, derived from the provider's normalized rating
    pub moon_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HolderStake {
    pub address: String,
    /// Share of supply, in percent
    pub pct: f64,
}

/// Price source. `Ok(None)` means the token is not listed yet, which is
/// expected for seconds-old pools and retried on a slow cadence.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn price(&self, mint: &str) -> Result<Option<PriceSnapshot>>;
}

#[async_trait]
pub trait TokenMetaProvider: Send + Sync {
    async fn meta(&self, mint: &str) -> Result<TokenMeta>;
}

#[async_trait]
pub trait RiskProvider: Send + Sync {
    async fn risk(&self, mint: &str) -> Result<RiskReport>;
}

#[async_trait]
pub trait TopHoldersProvider: Send + Sync {
    async fn top_holders(&self, mint: &str, limit: usize) -> Result<Vec<HolderStake>>;
}

/// Depth of a freshly created pool, read straight from the chain
#[async_trait]
pub trait PoolInfoProvider: Send + Sync {
    async fn pool_size_sol(&self, quote_vault: &str) -> Result<f64>;
}

// ---------------------------------------------------------------------------
// DexScreener price aggregator

pub struct DexScreenerClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DexScreenerResponse {
    pairs: Option<Vec<DexScreenerPair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DexScreenerPair {
    price_usd: Option<String>,
    liquidity: Option<DexScreenerLiquidity>,
    fdv: Option<f64>,
    market_cap: Option<f64>,
    /// Milliseconds since epoch
    pair_created_at: Option<i64>,
    info: Option<DexScreenerInfo>,
}

#[derive(Debug, Deserialize)]
struct DexScreenerLiquidity {
    usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DexScreenerInfo {
    socials: Option<Vec<serde_json::Value>>,
    websites: Option<Vec<serde_json::Value>>,
}

impl DexScreenerClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create DexScreener HTTP client")?;
        Ok(Self {
            client,
            base_url: config.dexscreener_url.clone(),
        })
    }
}

#[async_trait]
impl PriceProvider for DexScreenerClient {
    async fn price(&self, mint: &str) -> Result<Option<PriceSnapshot>> {
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, mint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("DexScreener request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("DexScreener returned {}: {}", status, body);
        }

        let parsed: DexScreenerResponse = response
            .json()
            .await
            .context("Failed to parse DexScreener response")?;

        let pairs = match parsed.pairs {
            Some(pairs) if !pairs.is_empty() => pairs,
            _ => {
                debug!(mint, "Token not listed on DexScreener yet");
                return Ok(None);
            }
        };

        // The deepest pair is the canonical price source
        let best = match pairs.into_iter().max_by(|a, b| {
            let la = a.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
            let lb = b.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
            la.total_cmp(&lb)
        }) {
            Some(pair) => pair,
            None => return Ok(None),
        };

        let price_usd = match best.price_usd.as_deref().and_then(|p| p.parse::<f64>().ok()) {
            Some(price) => price,
            None => return Ok(None),
        };

        let has_socials = best.info.as_ref().map(|info| {
            info.socials.as_ref().map(|s| !s.is_empty()).unwrap_or(false)
                || info.websites.as_ref().map(|w| !w.is_empty()).unwrap_or(false)
        });

        Ok(Some(PriceSnapshot {
            price_usd,
            liquidity_usd: best.liquidity.and_then(|l| l.usd),
            market_cap_usd: best.market_cap.or(best.fdv),
            pair_created_at: best
                .pair_created_at
                .and_then(|ms| DateTime::<Utc>::from_timestamp(ms / 1000, 0)),
            has_socials,
        }))
    }
}

// ---------------------------------------------------------------------------
// Solscan token metadata and holder distribution

pub struct SolscanClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SolscanMetaResponse {
    data: Option<SolscanMeta>,
}

#[derive(Debug, Deserialize)]
struct SolscanMeta {
    name: Option<String>,
    symbol: Option<String>,
    holder: Option<u64>,
    mint_authority: Option<String>,
    freeze_authority: Option<String>,
    is_mutable: Option<bool>,
    /// Seconds since epoch
    created_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SolscanHoldersResponse {
    data: Option<SolscanHoldersData>,
}

#[derive(Debug, Deserialize)]
struct SolscanHoldersData {
    items: Vec<SolscanHolderItem>,
}

#[derive(Debug, Deserialize)]
struct SolscanHolderItem {
    owner: String,
    /// Share of supply in percent, precomputed by the API
    percentage: Option<f64>,
}

impl SolscanClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create Solscan HTTP client")?;
        Ok(Self {
            client,
            base_url: config.solscan_url.clone(),
            api_key: config.solscan_api_key.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("token", &self.api_key)
            .send()
            .await
            .context("Solscan request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Solscan returned {}: {}", status, body);
        }

        response.json().await.context("Failed to parse Solscan response")
    }
}

#[async_trait]
impl TokenMetaProvider for SolscanClient {
    async fn meta(&self, mint: &str) -> Result<TokenMeta> {
        let url = format!("{}/token/meta?address={}", self.base_url, mint);
        let parsed: SolscanMetaResponse = self.get_json(&url).await?;

        let meta = parsed
            .data
            .with_context(|| format!("Solscan has no metadata for {mint}"))?;

        Ok(TokenMeta {
            name: meta.name,
            symbol: meta.symbol,
            holder_count: meta.holder,
            // Renounced/revoked means the authority field is cleared
            mint_authority_renounced: Some(meta.mint_authority.is_none()),
            freeze_authority_revoked: Some(meta.freeze_authority.is_none()),
            immutable_metadata: meta.is_mutable.map(|mutable| !mutable),
            created_at: meta
                .created_time
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        })
    }
}

#[async_trait]
impl TopHoldersProvider for SolscanClient {
    async fn top_holders(&self, mint: &str, limit: usize) -> Result<Vec<HolderStake>> {
        let url = format!(
            "{}/token/holders?address={}&page=1&page_size={}",
            self.base_url, mint, limit
        );
        let parsed: SolscanHoldersResponse = self.get_json(&url).await?;

        let items = parsed.data.map(|d| d.items).unwrap_or_default();
        Ok(items
            .into_iter()
            .filter_map(|item| {
                item.percentage.map(|pct| HolderStake {
                    address: item.owner,
                    pct,
                })
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Risk scoring

pub struct RugcheckClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RugcheckSummary {
    score: Option<f64>,
    score_normalised: Option<f64>,
    risks: Option<Vec<RugcheckRisk>>,
}

#[derive(Debug, Deserialize)]
struct RugcheckRisk {
    name: String,
    level: Option<String>,
}

impl RugcheckClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create risk HTTP client")?;
        Ok(Self {
            client,
            base_url: config.risk_url.clone(),
        })
    }
}

#[async_trait]
impl RiskProvider for RugcheckClient {
    async fn risk(&self, mint: &str) -> Result<RiskReport> {
        let url = format!("{}/tokens/{}/report/summary", self.base_url, mint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Risk provider request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Risk provider returned {}: {}", status, body);
        }

        let summary: RugcheckSummary = response
            .json()
            .await
            .context("Failed to parse risk report")?;

        let risks = summary.risks.unwrap_or_default();
        let lp_unlocked = risks.iter().any(|risk| {
            risk.name.to_lowercase().contains("lp unlocked")
                && risk.level.as_deref() != Some("info")
        });

        let normalised = summary.score_normalised.or(summary.score).unwrap_or(100.0);
        Ok(RiskReport {
            score: normalised.clamp(0.0, 100.0),
            liquidity_burnt: Some(!lp_unlocked),
            moon_score: Some((100.0 - normalised).clamp(0.0, 100.0)),
        })
    }
}

// ---------------------------------------------------------------------------
// On-chain pool depth

pub struct RpcPoolInfo {
    rpc: RpcClient,
}

impl RpcPoolInfo {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            rpc: RpcClient::new(rpc_url.to_string()),
        }
    }
}

#[async_trait]
impl PoolInfoProvider for RpcPoolInfo {
    async fn pool_size_sol(&self, quote_vault: &str) -> Result<f64> {
        let vault = Pubkey::from_str(quote_vault)
            .with_context(|| format!("Invalid vault address {quote_vault}"))?;
        let lamports = self
            .rpc
            .get_balance(&vault)
            .await
            .context("Failed to read vault balance")?;
        if lamports == 0 {
            warn!(quote_vault, "Vault balance is zero");
        }
        Ok(lamports as f64 / LAMPORTS_PER_SOL as f64)
    }
}
