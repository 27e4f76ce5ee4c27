/// Pool-creation recognition.
///
/// The feed delivers whole confirmed blocks mentioning the AMM program;
/// this module picks out the pool-initialization instructions and maps
/// their account lists into `PoolEvent`s.

use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::constants::RAYDIUM_AMM_PROGRAM;
use crate::core::types::PoolEvent;

/// Opcode of the AMM `initialize2` instruction
const INITIALIZE2_OPCODE: u8 = 1;

/// initialize2 carries at least 17 accounts; the ones we care about sit
/// at fixed offsets in the instruction's account list.
const MIN_INITIALIZE2_ACCOUNTS: usize = 17;
const IDX_POOL: usize = 4;
const IDX_LP_MINT: usize = 7;
const IDX_BASE_MINT: usize = 8;
const IDX_QUOTE_MINT: usize = 9;
const IDX_BASE_VAULT: usize = 10;
const IDX_QUOTE_VAULT: usize = 11;
const IDX_MARKET_ID: usize = 16;

/// Recently seen transaction signatures. The feed replays transactions
/// across reconnects and commitment updates; each signature passes this
/// window exactly once within its TTL.
#[derive(Debug)]
pub struct SignatureWindow {
    seen: DashMap<String, Instant>,
    capacity: usize,
    ttl: Duration,
}

impl SignatureWindow {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Record `signature`; returns true only the first time it is seen
    /// within the TTL.
    pub fn insert_if_new(&self, signature: &str) -> bool {
        let now = Instant::now();
        if self.seen.len() >= self.capacity {
            let ttl = self.ttl;
            self.seen.retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
        }

        match self.seen.entry(signature.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if now.duration_since(*occupied.get()) >= self.ttl {
                    occupied.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Scan a block notification payload for AMM pool initializations.
///
/// `block` is the JSON block object (`transactions` + metadata) as the
/// RPC delivers it with full transaction details.
pub fn parse_block_for_pools(block: &Value, dedup: &SignatureWindow) -> Vec<PoolEvent> {
    let mut events = Vec::new();

    let transactions = match block.get("transactions").and_then(|t| t.as_array()) {
        Some(txs) => txs,
        None => return events,
    };

    for entry in transactions {
        // Skip transactions that failed on-chain
        if entry
            .get("meta")
            .and_then(|m| m.get("err"))
            .map(|e| !e.is_null())
            .unwrap_or(false)
        {
            continue;
        }

        let tx = match entry.get("transaction") {
            Some(tx) => tx,
            None => continue,
        };

        let signature = match tx
            .get("signatures")
            .and_then(|s| s.as_array())
            .and_then(|s| s.first())
            .and_then(|s| s.as_str())
        {
            Some(sig) => sig,
            None => continue,
        };

        if let Some(event) = parse_transaction_for_pool(tx, signature) {
            if dedup.insert_if_new(signature) {
                debug!(
                    signature,
                    pool = %event.pool_address,
                    base_mint = %event.base_mint,
                    "🆕 Pool initialization detected"
                );
                events.push(event);
            } else {
                debug!(signature, "Duplicate pool initialization skipped");
            }
        }
    }

    events
}

fn parse_transaction_for_pool(tx: &Value, signature: &str) -> Option<PoolEvent> {
    let message = tx.get("message")?;
    let account_keys: Vec<&str> = message
        .get("accountKeys")
        .and_then(|k| k.as_array())?
        .iter()
        .filter_map(|k| k.as_str().or_else(|| k.get("pubkey").and_then(|p| p.as_str())))
        .collect();

    let instructions = message.get("instructions").and_then(|i| i.as_array())?;

    for instruction in instructions {
        let program_idx = instruction
            .get("programIdIndex")
            .and_then(|i| i.as_u64())? as usize;
        if account_keys.get(program_idx).copied() != Some(RAYDIUM_AMM_PROGRAM) {
            continue;
        }

        let data_b58 = instruction.get("data").and_then(|d| d.as_str())?;
        let data = match bs58::decode(data_b58).into_vec() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(signature, error = %e, "Undecodable instruction data");
                continue;
            }
        };
        if data.first().copied() != Some(INITIALIZE2_OPCODE) {
            continue;
        }

        let accounts: Vec<usize> = instruction
            .get("accounts")
            .and_then(|a| a.as_array())?
            .iter()
            .filter_map(|i| i.as_u64().map(|i| i as usize))
            .collect();
        if accounts.len() < MIN_INITIALIZE2_ACCOUNTS {
            debug!(
                signature,
                accounts = accounts.len(),
                "AMM instruction with too few accounts, not initialize2"
            );
            continue;
        }

        let key_at = |idx: usize| -> Option<String> {
            accounts
                .get(idx)
                .and_then(|&i| account_keys.get(i))
                .map(|s| s.to_string())
        };

        return Some(PoolEvent {
            signature: signature.to_string(),
            pool_address: key_at(IDX_POOL)?,
            lp_mint: key_at(IDX_LP_MINT)?,
            base_mint: key_at(IDX_BASE_MINT)?,
            quote_mint: key_at(IDX_QUOTE_MINT)?,
            base_vault: key_at(IDX_BASE_VAULT)?,
            quote_vault: key_at(IDX_QUOTE_VAULT)?,
            market_id: key_at(IDX_MARKET_ID)?,
            detected_at: Utc::now(),
        });
    }

    None
}
