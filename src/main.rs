// This is the entry point of the powerup shop.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (ledgers)
// - `terminal/` = Terminal adapters (console prompts, demo board, commands)
//
// This file's job is to:
// 1. Load configuration
// 2. Pick and open the ledger backend
// 3. Wire the controller (dependency injection)
// 4. Run the terminal session

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with several mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "terminal/terminal_layer.rs"]
mod terminal;

use crate::core::powerups::{CoinLedger, PowerupController};
use crate::infra::ledger::{InMemoryCoinLedger, JsonCoinLedger, SqliteCoinLedger};
use crate::terminal::{run_session, Console, DemoBoard, TerminalSurface};
use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Where the player's coins live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedgerBackend {
    Sqlite,
    Json,
    Memory,
}

impl LedgerBackend {
    fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(LedgerBackend::Sqlite),
            "json" => Some(LedgerBackend::Json),
            "memory" => Some(LedgerBackend::Memory),
            _ => None,
        }
    }
}

/// Settings read from the environment (and `.env`, if present).
#[derive(Debug, Clone)]
struct AppConfig {
    backend: LedgerBackend,
    data_dir: String,
    player_id: u64,
    starting_balance: u64,
}

impl AppConfig {
    fn from_env() -> anyhow::Result<Self> {
        let backend = match std::env::var("POWERUP_LEDGER") {
            Ok(value) => LedgerBackend::from_str(&value)
                .with_context(|| format!("Unknown POWERUP_LEDGER value: {}", value))?,
            Err(_) => LedgerBackend::Sqlite,
        };
        let data_dir = std::env::var("POWERUP_DATA_DIR").unwrap_or_else(|_| "data".to_string());
        let player_id = parse_env("POWERUP_PLAYER_ID", 1)?;
        let starting_balance = parse_env("POWERUP_STARTING_BALANCE", 0)?;

        Ok(Self {
            backend,
            data_dir,
            player_id,
            starting_balance,
        })
    }
}

fn parse_env(name: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{} must be a non-negative integer, got {}", name, value)),
        Err(_) => Ok(default),
    }
}

/// Credit the configured starting balance into a wallet that was just created.
async fn seed_wallet<L: CoinLedger>(ledger: &L, is_new: bool, amount: u64) -> anyhow::Result<()> {
    if is_new && amount > 0 {
        let balance = ledger.credit(amount, "Starting balance").await?;
        tracing::info!(balance, "Seeded new wallet");
    }
    Ok(())
}

async fn play<L: CoinLedger>(ledger: L) -> anyhow::Result<()> {
    let console = Arc::new(Console::new(
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    ));
    let controller = PowerupController::new(ledger, TerminalSurface::new(console), DemoBoard::new());

    run_session(&controller).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Logs go to stderr so they don't interleave with the session on stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(
        backend = ?config.backend,
        player_id = config.player_id,
        "Starting powerup shop"
    );

    // Keep save files in a dedicated folder so the working directory stays tidy.
    if config.backend != LedgerBackend::Memory {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data directory {}", config.data_dir))?;
    }

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    match config.backend {
        LedgerBackend::Sqlite => {
            let path = format!("{}/ledger.db", config.data_dir);
            let ledger = SqliteCoinLedger::new(&path, config.player_id)
                .await
                .context("Failed to initialize SQLite ledger")?;
            seed_wallet(&ledger, ledger.is_new_wallet(), config.starting_balance).await?;
            play(ledger).await
        }
        LedgerBackend::Json => {
            let path = format!("{}/player_{}.json", config.data_dir, config.player_id);
            let ledger = JsonCoinLedger::open(&path).context("Failed to open JSON save file")?;
            seed_wallet(&ledger, ledger.is_new_wallet(), config.starting_balance).await?;
            play(ledger).await
        }
        LedgerBackend::Memory => play(InMemoryCoinLedger::new(config.starting_balance)).await,
    }
}
