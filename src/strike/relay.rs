/// Bundle relay submission.
///
/// Wraps a signed swap transaction together with a tip transfer into a
/// bundle, posts it to the relay, and polls until the bundle lands or
/// the deadline passes. Used instead of plain RPC submission for users
/// who opt into relay routing.

use anyhow::Result;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde_json::{json, Value};
use solana_sdk::{signature::Signer, system_instruction, transaction::Transaction};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, instrument, warn};

use crate::config::RelayConfig;
use crate::core::error::ExecutionError;
use crate::strike::wallet::WalletSigner;
use crate::util::{retry_with_backoff, BackoffPolicy};

/// Relay tip accounts; one is picked at random per bundle
const TIP_ACCOUNTS: &[&str] = &[
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
];

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleStatus {
    Pending,
    Landed,
    Failed,
    Invalid,
}

impl BundleStatus {
    fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "landed" | "confirmed" | "finalized" => BundleStatus::Landed,
            "failed" => BundleStatus::Failed,
            "invalid" => BundleStatus::Invalid,
            _ => BundleStatus::Pending,
        }
    }
}

pub struct BundleRelay {
    client: Client,
    config: RelayConfig,
}

impl BundleRelay {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create relay HTTP client: {e}"))?;
        Ok(Self { client, config })
    }

    /// Submit a signed swap transaction through the relay.
    ///
    /// Builds the tip transfer against the swap transaction's own
    /// blockhash so both expire together, sends the two-transaction
    /// bundle, and blocks until it lands. Returns the swap signature.
    #[instrument(skip(self, signed_transaction_b64, signer))]
    pub async fn submit_with_tip(
        &self,
        signed_transaction_b64: &str,
        signer: &WalletSigner,
    ) -> Result<String, ExecutionError> {
        let swap_bytes = base64::decode(signed_transaction_b64)
            .map_err(|e| ExecutionError::Relay(format!("swap tx not base64: {e}")))?;
        let swap_tx: Transaction = bincode::deserialize(&swap_bytes)
            .map_err(|e| ExecutionError::Relay(format!("undecodable swap tx: {e}")))?;

        let swap_signature = swap_tx
            .signatures
            .first()
            .ok_or_else(|| ExecutionError::Relay("swap tx is unsigned".into()))?
            .to_string();

        let tip_tx = self.build_tip_transaction(signer, &swap_tx)?;
        let tip_bytes = bincode::serialize(&tip_tx)
            .map_err(|e| ExecutionError::Relay(format!("tip tx serialize: {e}")))?;

        let bundle = vec![
            bs58::encode(&swap_bytes).into_string(),
            bs58::encode(&tip_bytes).into_string(),
        ];

        let bundle_id = self.send_bundle(&bundle).await?;
        info!(bundle_id = %bundle_id, signature = %swap_signature, "📦 Bundle submitted");

        self.wait_for_landed(&bundle_id).await?;
        Ok(swap_signature)
    }

    fn build_tip_transaction(
        &self,
        signer: &WalletSigner,
        swap_tx: &Transaction,
    ) -> Result<Transaction, ExecutionError> {
        let tip_account = TIP_ACCOUNTS
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| ExecutionError::Relay("no tip accounts configured".into()))?;
        let tip_pubkey = tip_account
            .parse()
            .map_err(|_| ExecutionError::Relay(format!("bad tip account {tip_account}")))?;

        let instruction =
            system_instruction::transfer(&signer.pubkey(), &tip_pubkey, self.config.tip_lamports);
        let tx = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&signer.pubkey()),
            &[signer.keypair()],
            swap_tx.message.recent_blockhash,
        );
        debug!(tip_account, tip_lamports = self.config.tip_lamports, "Tip transaction built");
        Ok(tx)
    }

    async fn send_bundle(&self, bundle: &[String]) -> Result<String, ExecutionError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [bundle],
        });

        retry_with_backoff(
            &BackoffPolicy::transient(),
            "send_bundle",
            || async {
                let response = self
                    .client
                    .post(&self.config.url)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| ExecutionError::Relay(format!("send_bundle request: {e}")))?;

                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| ExecutionError::Relay(format!("send_bundle body: {e}")))?;

                if let Some(error) = body.get("error") {
                    return Err(ExecutionError::Relay(format!("relay error: {error}")));
                }

                body.get("result")
                    .and_then(|r| r.as_str())
                    .map(|s| s.to_string())
                    .ok_or_else(|| ExecutionError::Relay("send_bundle returned no id".into()))
            },
            |e| e.is_retryable() || matches!(e, ExecutionError::Relay(_)),
        )
        .await
    }

    async fn bundle_status(&self, bundle_id: &str) -> Result<BundleStatus, ExecutionError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBundleStatuses",
            "params": [[bundle_id]],
        });

        let response = self
            .client
            .post(&self.config.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ExecutionError::Relay(format!("status request: {e}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| ExecutionError::Relay(format!("status body: {e}")))?;

        let status = body
            .get("result")
            .and_then(|r| r.get("value"))
            .and_then(|v| v.as_array())
            .and_then(|entries| entries.first())
            .and_then(|entry| {
                entry
                    .get("confirmation_status")
                    .or_else(|| entry.get("status"))
            })
            .and_then(|s| s.as_str())
            .map(BundleStatus::parse)
            .unwrap_or(BundleStatus::Pending);

        Ok(status)
    }

    async fn wait_for_landed(&self, bundle_id: &str) -> Result<(), ExecutionError> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.land_timeout_secs);

        loop {
            match self.bundle_status(bundle_id).await {
                Ok(BundleStatus::Landed) => {
                    info!(bundle_id, "✅ Bundle landed");
                    return Ok(());
                }
                Ok(BundleStatus::Failed) => {
                    return Err(ExecutionError::Relay(format!("bundle {bundle_id} failed")));
                }
                Ok(BundleStatus::Invalid) => {
                    return Err(ExecutionError::Relay(format!("bundle {bundle_id} invalid")));
                }
                Ok(BundleStatus::Pending) => {
                    debug!(bundle_id, "Bundle still pending");
                }
                Err(e) => {
                    warn!(bundle_id, error = %e, "Bundle status check failed");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ExecutionError::Relay(format!(
                    "bundle {bundle_id} did not land within {}s",
                    self.config.land_timeout_secs
                )));
            }
            sleep(STATUS_POLL_INTERVAL).await;
        }
    }
}
