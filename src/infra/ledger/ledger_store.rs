// Implementations of the coin ledger port.

use crate::core::powerups::LedgerEntry;

pub mod in_memory;
pub mod json_ledger;
pub mod sqlite_ledger;

// Re-export for convenience
pub use in_memory::InMemoryCoinLedger;
pub use json_ledger::JsonCoinLedger;
pub use sqlite_ledger::SqliteCoinLedger;

/// How many audit entries the file and memory ledgers keep.
pub const ENTRY_HISTORY_LIMIT: usize = 200;

/// Append an entry, dropping the oldest ones past the history limit.
fn push_entry(entries: &mut Vec<LedgerEntry>, entry: LedgerEntry) {
    entries.push(entry);
    if entries.len() > ENTRY_HISTORY_LIMIT {
        let excess = entries.len() - ENTRY_HISTORY_LIMIT;
        entries.drain(..excess);
    }
}
