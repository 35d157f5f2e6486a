use super::push_entry;
use crate::core::powerups::{CoinLedger, LedgerEntry, LedgerError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// On-disk layout of the save file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SaveFile {
    balance: u64,
    #[serde(default)]
    entries: Vec<LedgerEntry>,
}

/// Wallet kept in a JSON save file, the way a local-only game stores progress.
pub struct JsonCoinLedger {
    path: PathBuf,
    save: Mutex<SaveFile>,
    new_wallet: bool,
}

fn write_error(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Store(format!("failed to write save file: {}", e))
}

fn write_synced(path: &Path, save: &SaveFile) -> Result<(), LedgerError> {
    let file = std::fs::File::create(path).map_err(write_error)?;
    serde_json::to_writer_pretty(&file, save).map_err(write_error)?;
    file.sync_all().map_err(write_error)
}

impl JsonCoinLedger {
    /// Load the save file, or start an empty wallet if it doesn't exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let (save, new_wallet) = if path.exists() {
            let file = std::fs::File::open(&path)
                .map_err(|e| LedgerError::Store(format!("failed to open save file: {}", e)))?;
            let save: SaveFile = serde_json::from_reader(file)
                .map_err(|e| LedgerError::Store(format!("corrupt save file: {}", e)))?;
            (save, false)
        } else {
            (SaveFile::default(), true)
        };

        Ok(Self {
            path,
            save: Mutex::new(save),
            new_wallet,
        })
    }

    pub fn is_new_wallet(&self) -> bool {
        self.new_wallet
    }

    fn scratch_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Replace the save file with `save`.
    ///
    /// The save file is only ever replaced by renaming a fully synced
    /// scratch file over it, never truncated in place.
    fn persist(&self, save: &SaveFile) -> Result<(), LedgerError> {
        let scratch = self.scratch_path();
        if let Err(e) = write_synced(&scratch, save) {
            let _ = std::fs::remove_file(&scratch);
            return Err(e);
        }
        std::fs::rename(&scratch, &self.path).map_err(write_error)
    }

    /// Write the changed wallet out, then swap it in.
    /// If the write fails the in-memory copy is left untouched.
    fn commit(
        &self,
        save: &mut SaveFile,
        new_balance: u64,
        entry: LedgerEntry,
    ) -> Result<u64, LedgerError> {
        let mut next = save.clone();
        next.balance = new_balance;
        push_entry(&mut next.entries, entry);

        self.persist(&next)?;
        *save = next;
        Ok(new_balance)
    }
}

#[async_trait]
impl CoinLedger for JsonCoinLedger {
    async fn balance(&self) -> Result<u64, LedgerError> {
        Ok(self.save.lock().await.balance)
    }

    async fn spend(&self, amount: u64, reason: &str) -> Result<u64, LedgerError> {
        let mut save = self.save.lock().await;
        if amount == 0 {
            return Ok(save.balance);
        }

        let new_balance = save
            .balance
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientFunds {
                required: amount,
                available: save.balance,
            })?;

        self.commit(&mut save, new_balance, LedgerEntry::spend(amount, reason))
    }

    async fn credit(&self, amount: u64, reason: &str) -> Result<u64, LedgerError> {
        let mut save = self.save.lock().await;
        if amount == 0 {
            return Ok(save.balance);
        }

        let new_balance = save
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Store("balance overflow".to_string()))?;
        self.commit(&mut save, new_balance, LedgerEntry::credit(amount, reason))
    }

    async fn recent_entries(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let save = self.save.lock().await;
        Ok(save.entries.iter().rev().take(limit).cloned().collect())
    }
}
