/// Shared on-chain addresses and engine-wide timing constants

/// Raydium AMM v4 program, watched for pool initializations
pub const RAYDIUM_AMM_PROGRAM: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

/// Wrapped SOL mint
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// USDC mint, accepted as a quote side alongside WSOL
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// How long a buy lock is held before self-expiring (seconds)
pub const BUY_LOCK_TTL_SECS: u64 = 60;

/// A cached token record younger than this is served without refetching (seconds)
pub const METADATA_FRESH_SECS: i64 = 60;

/// Cached token records older than this are evicted (seconds)
pub const METADATA_TTL_SECS: i64 = 3600;

/// Position monitor poll cadence (seconds)
pub const MONITOR_POLL_SECS: u64 = 4;

/// Monitor re-poll delay after a price fetch error (seconds)
pub const MONITOR_ERROR_POLL_SECS: u64 = 10;

/// Slippage ceiling applied after widening (basis points)
pub const MAX_SLIPPAGE_BPS: u16 = 1500;

/// Pools below this liquidity get widened slippage (USD)
pub const LOW_LIQUIDITY_USD: f64 = 50_000.0;
