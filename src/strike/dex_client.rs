/// Swap router client.
///
/// Order-then-execute flow: the router returns an unsigned transaction
/// for a quote, we sign it locally and post it back for submission.
/// All router failures are classified into `ExecutionError` variants so
/// the executor's retry loop can branch without string matching.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::RouterConfig;
use crate::core::constants::{LOW_LIQUIDITY_USD, MAX_SLIPPAGE_BPS};
use crate::core::error::ExecutionError;
use crate::core::types::TradeSide;

/// Parameters for a swap order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    /// Input token mint
    pub input_mint: String,
    /// Output token mint
    pub output_mint: String,
    /// Amount to swap, in the input token's base units
    pub amount: u64,
    /// Slippage tolerance in basis points
    pub slippage_bps: u16,
    /// Public key that will sign and pay
    pub taker: String,
}

/// An order handed back by the router, ready for local signing
#[derive(Debug, Clone)]
pub struct SwapOrder {
    /// Router-side order handle; executes must reference it
    pub request_id: String,
    /// Unsigned transaction, base64
    pub transaction_b64: String,
    pub in_amount: u64,
    pub out_amount: u64,
}

/// Settled execution result
#[derive(Debug, Clone)]
pub struct SwapReceipt {
    pub signature: String,
    pub in_amount: u64,
    pub out_amount: u64,
}

/// Router order response wire shape
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    request_id: String,
    transaction: Option<String>,
    in_amount: Option<String>,
    out_amount: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    signed_transaction: &'a str,
    request_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    status: String,
    signature: Option<String>,
    error: Option<String>,
    code: Option<i64>,
    input_amount_result: Option<String>,
    output_amount_result: Option<String>,
}

/// Seam between the executor and the swap router
#[async_trait]
pub trait SwapRouter: Send + Sync {
    async fn create_order(&self, request: &OrderRequest) -> Result<SwapOrder, ExecutionError>;

    async fn execute_order(
        &self,
        signed_transaction_b64: &str,
        request_id: &str,
    ) -> Result<SwapReceipt, ExecutionError>;
}

pub struct HttpSwapClient {
    client: Client,
    api_url: String,
}

impl HttpSwapClient {
    pub fn new(config: &RouterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create router HTTP client")?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
        })
    }
}

#[async_trait]
impl SwapRouter for HttpSwapClient {
    #[instrument(skip(self))]
    async fn create_order(&self, request: &OrderRequest) -> Result<SwapOrder, ExecutionError> {
        let url = format!("{}/order", self.api_url);
        let params = [
            ("inputMint", request.input_mint.as_str()),
            ("outputMint", request.output_mint.as_str()),
            ("amount", &request.amount.to_string()),
            ("slippageBps", &request.slippage_bps.to_string()),
            ("taker", request.taker.as_str()),
        ];

        debug!(
            input_mint = %request.input_mint,
            output_mint = %request.output_mint,
            amount = request.amount,
            slippage_bps = request.slippage_bps,
            "🔍 Requesting swap order"
        );

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| ExecutionError::TransientNetwork(format!("order request: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutionError::TransientNetwork(format!("order body: {e}")))?;

        if !status.is_success() {
            return Err(ExecutionError::classify(
                &format!("router order failed with {status}: {body}"),
                None,
            ));
        }

        let order: OrderResponse = serde_json::from_str(&body)
            .map_err(|e| ExecutionError::Unknown(format!("unparseable order response: {e}")))?;

        if let Some(error) = order.error {
            return Err(ExecutionError::classify(&error, None));
        }

        let transaction_b64 = order.transaction.ok_or_else(|| {
            ExecutionError::InsufficientLiquidity {
                mint: request.output_mint.clone(),
            }
        })?;

        let parse_amount = |raw: Option<&str>| raw.and_then(|a| a.parse::<u64>().ok()).unwrap_or(0);
        Ok(SwapOrder {
            request_id: order.request_id,
            transaction_b64,
            in_amount: parse_amount(order.in_amount.as_deref()),
            out_amount: parse_amount(order.out_amount.as_deref()),
        })
    }

    #[instrument(skip(self, signed_transaction_b64))]
    async fn execute_order(
        &self,
        signed_transaction_b64: &str,
        request_id: &str,
    ) -> Result<SwapReceipt, ExecutionError> {
        let url = format!("{}/execute", self.api_url);
        let payload = ExecuteRequest {
            signed_transaction: signed_transaction_b64,
            request_id,
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ExecutionError::TransientNetwork(format!("execute request: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutionError::TransientNetwork(format!("execute body: {e}")))?;

        if !status.is_success() {
            return Err(ExecutionError::classify(
                &format!("router execute failed with {status}: {body}"),
                None,
            ));
        }

        let result: ExecuteResponse = serde_json::from_str(&body)
            .map_err(|e| ExecutionError::Unknown(format!("unparseable execute response: {e}")))?;

        if !result.status.eq_ignore_ascii_case("success") {
            let message = result.error.unwrap_or_else(|| "swap execution failed".into());
            warn!(request_id, error = %message, code = ?result.code, "Router rejected execution");
            return Err(ExecutionError::classify(&message, result.code));
        }

        let signature = result
            .signature
            .ok_or_else(|| ExecutionError::Unknown("success without signature".into()))?;
        let parse_amount = |raw: Option<&str>| raw.and_then(|a| a.parse::<u64>().ok()).unwrap_or(0);

        Ok(SwapReceipt {
            signature,
            in_amount: parse_amount(result.input_amount_result.as_deref()),
            out_amount: parse_amount(result.output_amount_result.as_deref()),
        })
    }
}

/// Slippage for retry `attempt` (1-based).
///
/// Thin pools move violently between quote and fill, so the tolerance
/// widens per retry: 1.5x per step on buys, 3x on sells (a stuck sell
/// is worse than a bad fill), but only for pools under the liquidity
/// threshold. Deep pools widen gently. Always capped.
pub fn slippage_for_attempt(
    base_bps: u16,
    attempt: u32,
    side: TradeSide,
    liquidity_usd: Option<f64>,
) -> u16 {
    if attempt <= 1 {
        return base_bps.min(MAX_SLIPPAGE_BPS);
    }

    let low_liquidity = liquidity_usd.map(|usd| usd < LOW_LIQUIDITY_USD).unwrap_or(true);
    let factor: f64 = match (low_liquidity, side) {
        (true, TradeSide::Buy) => 1.5,
        (true, TradeSide::Sell) => 3.0,
        (false, _) => 1.25,
    };

    let widened = f64::from(base_bps) * factor.powi(attempt as i32 - 1);
    widened.min(f64::from(MAX_SLIPPAGE_BPS)) as u16
}
