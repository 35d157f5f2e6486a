// In-memory implementation of CoinLedger.
//
// Nothing survives a restart. Used for demo sessions and as a reference for
// the persistent ledgers.

use super::push_entry;
use crate::core::powerups::{CoinLedger, LedgerEntry, LedgerError};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Wallet {
    balance: u64,
    entries: Vec<LedgerEntry>,
}

/// Single-player wallet held in process memory.
///
/// The mutex is never held across an await, so a plain std lock is enough.
#[derive(Debug, Default)]
pub struct InMemoryCoinLedger {
    wallet: Mutex<Wallet>,
}

impl InMemoryCoinLedger {
    pub fn new(balance: u64) -> Self {
        Self {
            wallet: Mutex::new(Wallet {
                balance,
                entries: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Wallet>, LedgerError> {
        self.wallet
            .lock()
            .map_err(|_| LedgerError::Store("wallet lock poisoned".to_string()))
    }
}

#[async_trait]
impl CoinLedger for InMemoryCoinLedger {
    async fn balance(&self) -> Result<u64, LedgerError> {
        Ok(self.lock()?.balance)
    }

    async fn spend(&self, amount: u64, reason: &str) -> Result<u64, LedgerError> {
        let mut wallet = self.lock()?;
        if amount == 0 {
            return Ok(wallet.balance);
        }

        // Check and deduct under the same lock
        let new_balance =
            wallet
                .balance
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientFunds {
                    required: amount,
                    available: wallet.balance,
                })?;
        wallet.balance = new_balance;
        push_entry(&mut wallet.entries, LedgerEntry::spend(amount, reason));
        Ok(new_balance)
    }

    async fn credit(&self, amount: u64, reason: &str) -> Result<u64, LedgerError> {
        let mut wallet = self.lock()?;
        if amount == 0 {
            return Ok(wallet.balance);
        }

        wallet.balance = wallet
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Store("balance overflow".to_string()))?;
        push_entry(&mut wallet.entries, LedgerEntry::credit(amount, reason));
        Ok(wallet.balance)
    }

    async fn recent_entries(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let wallet = self.lock()?;
        Ok(wallet.entries.iter().rev().take(limit).cloned().collect())
    }
}
