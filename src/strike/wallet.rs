/// Keypair custody and local transaction signing.
///
/// Router order payloads are signed locally; the private key never
/// leaves the process.

use anyhow::{Context, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};
use tracing::debug;

use crate::core::error::ExecutionError;

pub struct WalletSigner {
    keypair: Keypair,
}

impl std::fmt::Debug for WalletSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSigner")
            .field("pubkey", &self.pubkey())
            .finish_non_exhaustive()
    }
}

impl WalletSigner {
    /// Build a signer from a base58-encoded 64-byte keypair.
    pub fn from_base58(private_key_b58: &str) -> Result<Self> {
        let bytes = bs58::decode(private_key_b58)
            .into_vec()
            .context("Private key is not valid base58")?;
        let keypair =
            Keypair::from_bytes(&bytes).context("Private key bytes are not a valid keypair")?;
        Ok(Self { keypair })
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Sign a base64-encoded transaction from the router and return the
    /// re-encoded signed transaction plus its signature string.
    pub fn sign_order_transaction(
        &self,
        transaction_b64: &str,
    ) -> Result<(String, String), ExecutionError> {
        let transaction_bytes = base64::decode(transaction_b64)
            .map_err(|e| ExecutionError::Signing(format!("transaction not base64: {e}")))?;

        let mut transaction: Transaction = bincode::deserialize(&transaction_bytes)
            .map_err(|e| ExecutionError::Signing(format!("undecodable transaction: {e}")))?;

        transaction.sign(&[&self.keypair], transaction.message.recent_blockhash);

        let signature = transaction
            .signatures
            .first()
            .ok_or_else(|| ExecutionError::Signing("signed transaction has no signature".into()))?
            .to_string();

        let signed_bytes = bincode::serialize(&transaction)
            .map_err(|e| ExecutionError::Signing(format!("reserialize failed: {e}")))?;

        debug!(signature = %signature, "✍️ Order transaction signed");
        Ok((base64::encode(signed_bytes), signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsigned_order_tx(payer: &Pubkey) -> String {
        let tx = Transaction::new_unsigned(solana_sdk::message::Message::new(&[], Some(payer)));
        base64::encode(bincode::serialize(&tx).unwrap())
    }

    #[test]
    fn base58_round_trip_preserves_pubkey() {
        let keypair = Keypair::new();
        let encoded = bs58::encode(keypair.to_bytes()).into_string();
        let signer = WalletSigner::from_base58(&encoded).unwrap();
        assert_eq!(signer.pubkey(), keypair.pubkey());
    }

    #[test]
    fn rejects_garbage_keys() {
        assert!(WalletSigner::from_base58("not-base58-!!").is_err());
        // Valid base58 but wrong length
        assert!(WalletSigner::from_base58("3mJr7AoUXx2Wqd").is_err());
    }

    #[test]
    fn signs_and_reencodes_order_transaction() {
        let signer = WalletSigner::from_keypair(Keypair::new());
        let payload = unsigned_order_tx(&signer.pubkey());

        let (signed_b64, signature) = signer.sign_order_transaction(&payload).unwrap();
        let decoded: Transaction =
            bincode::deserialize(&base64::decode(signed_b64).unwrap()).unwrap();
        assert_eq!(decoded.signatures.len(), 1);
        assert_eq!(decoded.signatures[0].to_string(), signature);
        assert!(decoded.verify_with_results().iter().all(|ok| *ok));
    }

    #[test]
    fn malformed_payload_is_a_signing_error() {
        let signer = WalletSigner::from_keypair(Keypair::new());
        let err = signer.sign_order_transaction("%%%").unwrap_err();
        assert!(matches!(err, ExecutionError::Signing(_)));

        let err = signer
            .sign_order_transaction(&base64::encode(b"junk"))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Signing(_)));
    }
}
