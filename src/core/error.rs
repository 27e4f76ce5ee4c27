/// Execution error taxonomy.
///
/// Swap failures arrive as loose strings and numeric program codes from
/// the router and the RPC layer; everything downstream (retry loops,
/// notifications, lock handling) branches on the classified variant
/// instead of re-parsing messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("insufficient liquidity for {mint}: router quoted zero output")]
    InsufficientLiquidity { mint: String },

    #[error("slippage tolerance exceeded: {0}")]
    SlippageExceeded(String),

    #[error("blockhash or order expired: {0}")]
    StaleBlockhash(String),

    #[error("buy lock contended for {wallet}/{mint}")]
    LockContended { wallet: String, mint: String },

    #[error("token record incomplete for {mint}: missing {missing}")]
    IncompleteMetadata { mint: String, missing: String },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("signing failure: {0}")]
    Signing(String),

    #[error("bundle relay failure: {0}")]
    Relay(String),

    #[error("swap failed: {0}")]
    Unknown(String),
}

impl ExecutionError {
    /// Whether a retry with the same parameters (modulo slippage
    /// widening and a fresh order) has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::TransientNetwork(_)
                | ExecutionError::SlippageExceeded(_)
                | ExecutionError::StaleBlockhash(_)
                | ExecutionError::Relay(_)
        )
    }

    /// Classify a raw router/RPC failure message.
    ///
    /// Program error 6025 is the router's slippage-exceeded code; the
    /// remaining patterns match the error strings observed in practice.
    pub fn classify(message: &str, code: Option<i64>) -> Self {
        if code == Some(6025) {
            return ExecutionError::SlippageExceeded(message.to_string());
        }

        let lower = message.to_lowercase();
        if lower.contains("slippage") || lower.contains("0x1789") {
            ExecutionError::SlippageExceeded(message.to_string())
        } else if lower.contains("blockhash")
            || lower.contains("block height exceeded")
            || lower.contains("request id") && lower.contains("expired")
            || lower.contains("expired")
        {
            ExecutionError::StaleBlockhash(message.to_string())
        } else if lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("connection")
            || lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("502")
            || lower.contains("503")
        {
            ExecutionError::TransientNetwork(message.to_string())
        } else {
            ExecutionError::Unknown(message.to_string())
        }
    }
}
