/// Durable position ledger, sqlite-backed.
///
/// The status column is the single source of truth for a position's
/// life: `claim_close` flips open -> closing atomically, so exactly one
/// actor ever sells a position no matter how many monitors or manual
/// closes race.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, instrument};

use crate::core::types::{CloseReason, Position, PositionStatus};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS positions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    wallet TEXT NOT NULL,
    mint TEXT NOT NULL,
    entry_price REAL NOT NULL,
    quantity INTEGER NOT NULL,
    sol_spent REAL NOT NULL,
    peak_price REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    close_reason TEXT,
    realized_pnl_pct REAL,
    take_profit_pct REAL NOT NULL,
    stop_loss_pct REAL NOT NULL,
    trailing_stop_pct REAL,
    timeout_secs INTEGER,
    opened_at INTEGER NOT NULL,
    closed_at INTEGER,
    buy_signature TEXT,
    sell_signature TEXT
)
"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_positions_wallet_mint ON positions(wallet, mint)";

/// Fields needed to open a position; the rest is derived
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub wallet: String,
    pub mint: String,
    pub entry_price: f64,
    /// Raw base-unit token amount from the fill receipt
    pub quantity: u64,
    pub sol_spent: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub trailing_stop_pct: Option<f64>,
    pub timeout_secs: Option<i64>,
    pub buy_signature: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PositionStore {
    pool: SqlitePool,
}

impl PositionStore {
    #[instrument]
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open position ledger at {path}"))?;

        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .context("Failed to create positions table")?;
        sqlx::query(CREATE_INDEX)
            .execute(&pool)
            .await
            .context("Failed to create positions index")?;

        info!("Position ledger ready at {path}");
        Ok(Self { pool })
    }

    /// Persist a freshly filled buy as an open position.
    pub async fn open(&self, new: NewPosition) -> Result<Position> {
        let opened_at = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO positions
                (wallet, mint, entry_price, quantity, sol_spent, peak_price, status,
                 take_profit_pct, stop_loss_pct, trailing_stop_pct, timeout_secs,
                 opened_at, buy_signature)
            VALUES (?, ?, ?, ?, ?, ?, 'open', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.wallet)
        .bind(&new.mint)
        .bind(new.entry_price)
        .bind(new.quantity as i64)
        .bind(new.sol_spent)
        .bind(new.entry_price) // peak starts at entry
        .bind(new.take_profit_pct)
        .bind(new.stop_loss_pct)
        .bind(new.trailing_stop_pct)
        .bind(new.timeout_secs)
        .bind(opened_at)
        .bind(&new.buy_signature)
        .execute(&self.pool)
        .await
        .context("Failed to insert position")?;

        let id = result.last_insert_rowid();
        debug!(id, wallet = %new.wallet, mint = %new.mint, "Position opened");

        match self.get(id).await? {
            Some(position) => Ok(position),
            None => bail!("Position {id} vanished after insert"),
        }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch position")?;
        row.map(|r| row_to_position(&r)).transpose()
    }

    /// The live (open or closing) position for (wallet, mint), if any.
    pub async fn live_position_for(&self, wallet: &str, mint: &str) -> Result<Option<Position>> {
        let row = sqlx::query(
            "SELECT * FROM positions WHERE wallet = ? AND mint = ? AND status IN ('open', 'closing')",
        )
        .bind(wallet)
        .bind(mint)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch live position")?;
        row.map(|r| row_to_position(&r)).transpose()
    }

    pub async fn list_open(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE status = 'open' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list open positions")?;
        rows.iter().map(row_to_position).collect()
    }

    /// Raise the recorded peak price. Only ever moves up.
    pub async fn update_peak(&self, id: i64, peak_price: f64) -> Result<()> {
        sqlx::query("UPDATE positions SET peak_price = ? WHERE id = ? AND peak_price < ?")
            .bind(peak_price)
            .bind(id)
            .bind(peak_price)
            .execute(&self.pool)
            .await
            .context("Failed to update peak price")?;
        Ok(())
    }

    /// Claim the right to close a position. Returns true for exactly
    /// one caller; everyone else sees the position already claimed.
    pub async fn claim_close(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE positions SET status = 'closing' WHERE id = ? AND status = 'open'")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to claim position close")?;
        Ok(result.rows_affected() == 1)
    }

    /// Settle a claimed close.
    pub async fn mark_closed(
        &self,
        id: i64,
        reason: CloseReason,
        sell_signature: Option<&str>,
        realized_pnl_pct: Option<f64>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE positions SET status = 'closed', close_reason = ?, sell_signature = ?, realized_pnl_pct = ?, closed_at = ? WHERE id = ?",
        )
        .bind(reason.as_str())
        .bind(sell_signature)
        .bind(realized_pnl_pct)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark position closed")?;
        info!(id, reason = reason.as_str(), "Position closed");
        Ok(())
    }

    /// Hand a claimed-but-unsold position back to the monitor.
    pub async fn release_claim(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE positions SET status = 'open' WHERE id = ? AND status = 'closing'")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to release close claim")?;
        Ok(())
    }

    /// Hand back every claim left over from a previous run. A `closing`
    /// row at startup has no seller behind it any more; it must go back
    /// to `open` or nothing will ever adopt it.
    pub async fn release_stale_claims(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE positions SET status = 'open' WHERE status = 'closing'")
            .execute(&self.pool)
            .await
            .context("Failed to release stale close claims")?;
        let count = result.rows_affected();
        if count > 0 {
            info!(count, "Released close claims from a previous run");
        }
        Ok(count)
    }
}

fn row_to_position(row: &SqliteRow) -> Result<Position> {
    let status_raw: String = row.try_get("status")?;
    let status = match PositionStatus::parse(&status_raw) {
        Some(status) => status,
        None => bail!("Unknown position status '{status_raw}'"),
    };

    let close_reason = row
        .try_get::<Option<String>, _>("close_reason")?
        .as_deref()
        .and_then(CloseReason::parse);

    let opened_at_secs: i64 = row.try_get("opened_at")?;
    let opened_at = DateTime::<Utc>::from_timestamp(opened_at_secs, 0)
        .with_context(|| format!("Bad opened_at timestamp {opened_at_secs}"))?;
    let closed_at = row
        .try_get::<Option<i64>, _>("closed_at")?
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

    Ok(Position {
        id: row.try_get("id")?,
        wallet: row.try_get("wallet")?,
        mint: row.try_get("mint")?,
        entry_price: row.try_get("entry_price")?,
        quantity: row.try_get::<i64, _>("quantity")? as u64,
        sol_spent: row.try_get("sol_spent")?,
        peak_price: row.try_get("peak_price")?,
        status,
        close_reason,
        realized_pnl_pct: row.try_get("realized_pnl_pct")?,
        take_profit_pct: row.try_get("take_profit_pct")?,
        stop_loss_pct: row.try_get("stop_loss_pct")?,
        trailing_stop_pct: row.try_get("trailing_stop_pct")?,
        timeout_secs: row.try_get("timeout_secs")?,
        opened_at,
        closed_at,
        buy_signature: row.try_get("buy_signature")?,
        sell_signature: row.try_get("sell_signature")?,
    })
}
