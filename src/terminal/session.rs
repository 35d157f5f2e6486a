// Command loop for a terminal play session.

use super::console::{Console, TerminalSurface};
use super::demo_board::DemoBoard;
use crate::core::powerups::{
    ButtonState, CoinLedger, LedgerError, PowerupController, PowerupDefinition, PowerupKind,
    PurchaseOutcome,
};
use tokio::io::{AsyncBufRead, AsyncWrite};

const DEFAULT_PAIRS: u32 = 8;
const HISTORY_LIMIT: usize = 10;

const HELP: &str = "\
Commands:
  bar              show powerups, prices and balance
  use <powerup>    buy and use a powerup (bomb, glimpse, skip)
  match            match one pair by hand
  new [pairs]      start a new level
  pause / resume   pause or resume the level
  lock / unlock    disable or enable the powerup bar
  history          show recent coin movements
  quit             leave the session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Bar,
    Use(PowerupKind),
    Match,
    NewLevel(u32),
    Pause,
    Resume,
    Lock,
    Unlock,
    History,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(Command::Help);
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "help" | "?" => Command::Help,
            "bar" | "balance" => Command::Bar,
            "use" | "buy" => {
                let name = words.next().ok_or("Which powerup? Try `use bomb`.")?;
                let kind = PowerupKind::from_str(name).ok_or_else(|| {
                    let known: Vec<&str> = PowerupKind::all().iter().map(|k| k.as_str()).collect();
                    format!("Unknown powerup: {} (try {})", name, known.join(", "))
                })?;
                Command::Use(kind)
            }
            "match" => Command::Match,
            "new" => {
                let pairs = match words.next() {
                    Some(n) => n
                        .parse::<u32>()
                        .map_err(|_| format!("Not a number of pairs: {}", n))?,
                    None => DEFAULT_PAIRS,
                };
                Command::NewLevel(pairs)
            }
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "lock" => Command::Lock,
            "unlock" => Command::Unlock,
            "history" => Command::History,
            "quit" | "exit" => Command::Quit,
            // A bare powerup name is a shortcut for `use`
            other => match PowerupKind::from_str(other) {
                Some(kind) => Command::Use(kind),
                None => return Err(format!("Unknown command: {}. Type `help`.", other)),
            },
        };

        Ok(command)
    }
}

fn describe_outcome(outcome: &PurchaseOutcome) -> String {
    match outcome {
        PurchaseOutcome::Declined => "Cancelled.".to_string(),
        PurchaseOutcome::Ineligible(reason) => format!("Can't use powerups right now ({}).", reason),
        PurchaseOutcome::InsufficientFunds { price, balance } => {
            format!("Not enough coins: {} needed, {} available.", price, balance)
        }
        PurchaseOutcome::LedgerFailed { reason } => format!("Wallet unavailable: {}", reason),
        PurchaseOutcome::Applied {
            kind,
            price,
            new_balance,
        } => {
            let definition = kind.definition();
            format!(
                "{} {} used for {} coins. Balance: {}",
                definition.emoji, definition.name, price, new_balance
            )
        }
        PurchaseOutcome::EffectAnomaly { kind, price, reason } => format!(
            "{} cost {} coins but didn't take effect: {}",
            kind.definition().name,
            price,
            reason
        ),
    }
}

type TerminalController<L, R, W> = PowerupController<L, TerminalSurface<R, W>, DemoBoard>;

/// A ledger that can't be read only spoils the current command.
async fn report_wallet_error<R, W>(console: &Console<R, W>, error: LedgerError) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    tracing::warn!(error = %error, "Wallet read failed");
    console
        .write_line(&format!("Wallet unavailable: {}", error))
        .await
}

async fn show_bar<L, R, W>(controller: &TerminalController<L, R, W>) -> anyhow::Result<()>
where
    L: CoinLedger,
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let console = controller.surface().console();
    let board = controller.effect();
    let balance = match controller.ledger().balance().await {
        Ok(balance) => balance,
        Err(e) => return report_wallet_error(console, e).await,
    };
    let session = board.snapshot();

    console.write_line(&board.describe()).await?;
    for definition in PowerupDefinition::all() {
        let state = controller.button_state(
            definition.kind,
            session.phase,
            balance,
            session.ui_disabled,
        );
        let marker = match state {
            ButtonState::Affordable => "ready",
            ButtonState::Unaffordable => "need coins",
            ButtonState::Disabled => "disabled",
        };
        console
            .write_line(&format!(
                "  {} {:<8} {:>4} coins  [{}]",
                definition.emoji, definition.name, definition.price, marker
            ))
            .await?;
    }
    console.write_line(&format!("  💰 {} coins", balance)).await?;
    Ok(())
}

async fn show_history<L, R, W>(controller: &TerminalController<L, R, W>) -> anyhow::Result<()>
where
    L: CoinLedger,
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let console = controller.surface().console();
    let entries = match controller.ledger().recent_entries(HISTORY_LIMIT).await {
        Ok(entries) => entries,
        Err(e) => return report_wallet_error(console, e).await,
    };
    if entries.is_empty() {
        console.write_line("No coin movements yet.").await?;
    }
    for entry in entries {
        console
            .write_line(&format!(
                "  {} {:+} {}",
                entry.timestamp.format("%Y-%m-%d %H:%M"),
                entry.amount,
                entry.reason
            ))
            .await?;
    }
    Ok(())
}

/// Read commands until `quit` or end of input.
pub async fn run_session<L, R, W>(controller: &TerminalController<L, R, W>) -> anyhow::Result<()>
where
    L: CoinLedger,
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let console = controller.surface().console();
    let board = controller.effect();

    console.write_line(HELP).await?;
    let level = board.start_level(DEFAULT_PAIRS);
    console
        .write_line(&format!("Level {} started with {} pairs.", level, DEFAULT_PAIRS))
        .await?;

    while let Some(line) = console.read_line().await? {
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                console.write_line(&message).await?;
                continue;
            }
        };

        match command {
            Command::Help => console.write_line(HELP).await?,
            Command::Bar => show_bar(controller).await?,
            Command::Use(kind) => {
                let outcome = controller.use_powerup(kind, board.snapshot()).await;
                console.write_line(&describe_outcome(&outcome)).await?;
                console.write_line(&board.describe()).await?;
            }
            Command::Match => {
                if board.match_pair() {
                    console.write_line(&board.describe()).await?;
                } else {
                    console.write_line("Nothing to match.").await?;
                }
            }
            Command::NewLevel(pairs) => {
                let level = board.start_level(pairs);
                console
                    .write_line(&format!("Level {} started.", level))
                    .await?;
            }
            Command::Pause => {
                board.pause();
                console.write_line(&board.describe()).await?;
            }
            Command::Resume => {
                board.resume();
                console.write_line(&board.describe()).await?;
            }
            Command::Lock => {
                board.set_ui_disabled(true);
                console.write_line("Powerup bar locked.").await?;
            }
            Command::Unlock => {
                board.set_ui_disabled(false);
                console.write_line("Powerup bar unlocked.").await?;
            }
            Command::History => show_history(controller).await?,
            Command::Quit => break,
        }
    }

    tracing::info!("Terminal session ended");
    Ok(())
}
