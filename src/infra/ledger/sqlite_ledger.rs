// SQLite implementation of the CoinLedger trait

use crate::core::powerups::{CoinLedger, LedgerEntry, LedgerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

/// How long a writer waits on another connection's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn store_error(e: sqlx::Error) -> LedgerError {
    LedgerError::Store(e.to_string())
}

fn to_db_amount(amount: u64) -> Result<i64, LedgerError> {
    i64::try_from(amount).map_err(|_| LedgerError::Store(format!("amount {} out of range", amount)))
}

/// A player's wallet stored in SQLite, with an audit trail of every change.
pub struct SqliteCoinLedger {
    pool: SqlitePool,
    player_id: i64,
    new_wallet: bool,
}

impl SqliteCoinLedger {
    /// Open (or create) the database and the wallet for `player_id`.
    pub async fn new(database_path: &str, player_id: u64) -> anyhow::Result<Self> {
        let connection_string = format!("sqlite://{}?mode=rwc", database_path);
        let options = SqliteConnectOptions::from_str(&connection_string)?.busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let player_id = i64::try_from(player_id)?;
        let mut ledger = Self {
            pool,
            player_id,
            new_wallet: false,
        };
        ledger.migrate().await?;
        ledger.new_wallet = ledger.ensure_wallet().await?;
        Ok(ledger)
    }

    /// True if the wallet row was created when this ledger was opened.
    pub fn is_new_wallet(&self) -> bool {
        self.new_wallet
    }

    /// Run database migrations to create tables.
    async fn migrate(&self) -> anyhow::Result<()> {
        // The CHECK keeps the balance non-negative even for writers that bypass spend()
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                player_id INTEGER PRIMARY KEY,
                balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id INTEGER NOT NULL,
                amount INTEGER NOT NULL,
                reason TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ledger_entries_player
            ON ledger_entries(player_id, id DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ensure_wallet(&self) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO wallets (player_id, balance)
            VALUES (?, 0)
            "#,
        )
        .bind(self.player_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fetch_balance<'e, E>(&self, executor: E) -> Result<u64, LedgerError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let row = sqlx::query("SELECT balance FROM wallets WHERE player_id = ?")
            .bind(self.player_id)
            .fetch_optional(executor)
            .await
            .map_err(store_error)?;

        let balance = row.map(|r| r.get::<i64, _>("balance")).unwrap_or(0);
        u64::try_from(balance)
            .map_err(|_| LedgerError::Store(format!("negative balance {} in database", balance)))
    }

    /// Apply a signed change inside one transaction and log it.
    ///
    /// Spends use a conditional UPDATE so the check and the deduction are a
    /// single statement; zero rows affected means the wallet couldn't cover it.
    async fn apply_change(&self, entry: LedgerEntry, amount: u64) -> Result<u64, LedgerError> {
        let db_amount = to_db_amount(amount)?;
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let result = if entry.amount < 0 {
            sqlx::query(
                r#"
                UPDATE wallets
                SET balance = balance - ?, updated_at = CURRENT_TIMESTAMP
                WHERE player_id = ? AND balance >= ?
                "#,
            )
            .bind(db_amount)
            .bind(self.player_id)
            .bind(db_amount)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?
        } else {
            sqlx::query(
                r#"
                UPDATE wallets
                SET balance = balance + ?, updated_at = CURRENT_TIMESTAMP
                WHERE player_id = ?
                "#,
            )
            .bind(db_amount)
            .bind(self.player_id)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?
        };

        if result.rows_affected() == 0 {
            let available = self.fetch_balance(&mut *tx).await?;
            tx.rollback().await.map_err(store_error)?;
            if entry.amount >= 0 {
                return Err(LedgerError::Store(format!(
                    "no wallet for player {}",
                    self.player_id
                )));
            }
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (player_id, amount, reason, timestamp)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(self.player_id)
        .bind(entry.amount)
        .bind(entry.reason.as_str())
        .bind(entry.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        let new_balance = self.fetch_balance(&mut *tx).await?;
        tx.commit().await.map_err(store_error)?;

        Ok(new_balance)
    }
}

#[async_trait]
impl CoinLedger for SqliteCoinLedger {
    async fn balance(&self) -> Result<u64, LedgerError> {
        self.fetch_balance(&self.pool).await
    }

    async fn spend(&self, amount: u64, reason: &str) -> Result<u64, LedgerError> {
        if amount == 0 {
            return self.balance().await;
        }
        self.apply_change(LedgerEntry::spend(amount, reason), amount)
            .await
    }

    async fn credit(&self, amount: u64, reason: &str) -> Result<u64, LedgerError> {
        if amount == 0 {
            return self.balance().await;
        }
        self.apply_change(LedgerEntry::credit(amount, reason), amount)
            .await
    }

    async fn recent_entries(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT amount, reason, timestamp
            FROM ledger_entries
            WHERE player_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(self.player_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let entries = rows
            .iter()
            .filter_map(|row| {
                let timestamp_str: String = row.get("timestamp");
                let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                    .ok()?
                    .with_timezone(&Utc);

                Some(LedgerEntry {
                    amount: row.get("amount"),
                    reason: row.get("reason"),
                    timestamp,
                })
            })
            .collect();

        Ok(entries)
    }
}
