/// Shared domain types flowing between the engine's stages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::constants::{USDC_MINT, WSOL_MINT};

/// A newly initialized trading pool observed on the ledger feed.
///
/// Emitted exactly once per pool: the ingest stage deduplicates by
/// transaction signature before this leaves the watcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolEvent {
    /// Signature of the transaction that initialized the pool
    pub signature: String,
    /// AMM pool account
    pub pool_address: String,
    /// Base-side token mint
    pub base_mint: String,
    /// Quote-side token mint (usually WSOL or USDC)
    pub quote_mint: String,
    /// LP token mint
    pub lp_mint: String,
    /// Base-side vault account
    pub base_vault: String,
    /// Quote-side vault account
    pub quote_vault: String,
    /// Serum/OpenBook market backing the pool
    pub market_id: String,
    /// When the watcher saw the initialization
    pub detected_at: DateTime<Utc>,
}

impl PoolEvent {
    /// The tradeable (non-quote) side of the pool. Pools are laid out
    /// either token/WSOL or WSOL/token, so pick whichever mint is not a
    /// known quote currency.
    pub fn token_mint(&self) -> &str {
        if self.base_mint == WSOL_MINT || self.base_mint == USDC_MINT {
            &self.quote_mint
        } else {
            &self.base_mint
        }
    }
}

/// Enriched view of a token, merged from several metadata providers.
///
/// Every field a provider failed to deliver stays `None`; filters treat
/// a missing field as a failed check rather than guessing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRecord {
    pub mint: String,
    pub name: Option<String>,
    pub symbol: Option<String>,

    pub price_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    /// Quote-side depth of the freshly created pool, in SOL
    pub pool_size_sol: Option<f64>,

    pub has_socials: Option<bool>,
    pub liquidity_burnt: Option<bool>,
    pub immutable_metadata: Option<bool>,
    pub mint_authority_renounced: Option<bool>,
    pub freeze_authority_revoked: Option<bool>,

    pub holder_count: Option<u64>,
    /// Share of supply held by the ten largest holders, in percent
    pub top10_holder_pct: Option<f64>,
    /// Provider risk score, 0 (clean) to 100 (radioactive)
    pub risk_score: Option<f64>,
    /// Provider upside score, 0 to 100
    pub moon_score: Option<f64>,

    /// On-chain creation time of the token, if a provider reported one
    pub created_at: Option<DateTime<Utc>>,
    /// When this record was assembled
    pub fetched_at: DateTime<Utc>,
    /// True only when price, metadata, and risk providers all answered
    pub complete: bool,
}

impl TokenRecord {
    pub fn new(mint: impl Into<String>) -> Self {
        Self {
            mint: mint.into(),
            fetched_at: Utc::now(),
            ..Default::default()
        }
    }

    /// Age of the token in seconds, if creation time is known
    pub fn age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.created_at
            .map(|created| now.signed_duration_since(created).num_seconds())
    }
}

/// Per-user trading configuration, read-only for the engine's lifetime.
///
/// Slippage is carried in basis points everywhere; any percent-style
/// input is converted once at the config boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Wallet address, the user's identity throughout the engine
    pub wallet: String,
    /// Base58-encoded signing key for this wallet
    pub private_key_b58: String,
    pub enabled: bool,
    pub premium: bool,

    pub buy_amount_sol: f64,
    pub buy_slippage_bps: u16,
    pub sell_slippage_bps: u16,

    /// Exit when price gains this percent over entry
    pub take_profit_pct: f64,
    /// Exit when price loses this percent from entry
    pub stop_loss_pct: f64,
    /// Exit when price falls this percent from its peak (None = disabled)
    pub trailing_stop_pct: Option<f64>,
    /// Force-exit after this many seconds in position (None = no limit)
    pub timeout_secs: Option<u64>,

    // Filter thresholds
    pub min_pool_size_sol: f64,
    pub require_socials: bool,
    pub require_liquidity_burnt: bool,
    pub require_immutable_metadata: bool,
    pub require_mint_renounced: bool,
    pub require_freeze_revoked: bool,

    // Premium-only thresholds
    pub max_top10_holder_pct: Option<f64>,
    pub min_moon_score: Option<f64>,
    /// Premium users skip tokens younger than this (seconds)
    pub safety_window_secs: Option<u64>,

    /// Route submissions through the bundle relay instead of plain RPC
    pub use_bundle_relay: bool,
}

impl UserConfig {
    /// A conservative default profile used as the starting point for new users
    pub fn standard(wallet: impl Into<String>, private_key_b58: impl Into<String>) -> Self {
        Self {
            wallet: wallet.into(),
            private_key_b58: private_key_b58.into(),
            enabled: true,
            premium: false,
            buy_amount_sol: 0.1,
            buy_slippage_bps: 100,
            sell_slippage_bps: 200,
            take_profit_pct: 50.0,
            stop_loss_pct: 20.0,
            trailing_stop_pct: None,
            timeout_secs: None,
            min_pool_size_sol: 10.0,
            require_socials: true,
            require_liquidity_burnt: true,
            require_immutable_metadata: true,
            require_mint_renounced: true,
            require_freeze_revoked: true,
            max_top10_holder_pct: None,
            min_moon_score: None,
            safety_window_secs: None,
            use_bundle_relay: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    /// A sell has been claimed for this position but has not settled yet
    Closing,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closing => "closing",
            PositionStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PositionStatus::Open),
            "closing" => Some(PositionStatus::Closing),
            "closed" => Some(PositionStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    Timeout,
    Manual,
    /// The position was terminated by a failure, not an exit rule
    Error,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TakeProfit => "take_profit",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TrailingStop => "trailing_stop",
            CloseReason::Timeout => "timeout",
            CloseReason::Manual => "manual",
            CloseReason::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "take_profit" => Some(CloseReason::TakeProfit),
            "stop_loss" => Some(CloseReason::StopLoss),
            "trailing_stop" => Some(CloseReason::TrailingStop),
            "timeout" => Some(CloseReason::Timeout),
            "manual" => Some(CloseReason::Manual),
            "error" => Some(CloseReason::Error),
            _ => None,
        }
    }
}

/// An open or settled holding. Exit thresholds are frozen from the
/// user's config at entry time so later config edits never change the
/// rules of a live position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub wallet: String,
    pub mint: String,
    pub entry_price: f64,
    /// Token amount in raw base units, exactly as the fill reported it
    pub quantity: u64,
    pub sol_spent: f64,
    /// Highest price observed since entry, drives the trailing stop
    pub peak_price: f64,
    pub status: PositionStatus,
    pub close_reason: Option<CloseReason>,
    /// Percent gain or loss locked in at close
    pub realized_pnl_pct: Option<f64>,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub trailing_stop_pct: Option<f64>,
    pub timeout_secs: Option<i64>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub buy_signature: Option<String>,
    pub sell_signature: Option<String>,
}

impl Position {
    pub fn pnl_pct(&self, current_price: f64) -> f64 {
        if self.entry_price > 0.0 {
            ((current_price - self.entry_price) / self.entry_price) * 100.0
        } else {
            0.0
        }
    }

    pub fn drawdown_from_peak_pct(&self, current_price: f64) -> f64 {
        if self.peak_price > 0.0 {
            ((self.peak_price - current_price) / self.peak_price) * 100.0
        } else {
            0.0
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.opened_at).num_seconds()
    }
}

/// Events fanned out to per-user notification channels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    Log {
        level: String,
        message: String,
    },
    NewPool {
        mint: String,
        pool_address: String,
        signature: String,
    },
    TradeUpdate {
        wallet: String,
        mint: String,
        side: TradeSide,
        status: String,
        signature: Option<String>,
        detail: Option<String>,
    },
    PositionClosed {
        wallet: String,
        mint: String,
        reason: CloseReason,
        pnl_pct: f64,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}
