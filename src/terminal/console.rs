// Line-based console and the confirmation surface built on it.

use crate::core::powerups::{Confirmation, ConfirmationSurface, Notice, PurchasePrompt};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::Mutex;

/// Shared input and output for one terminal session.
///
/// Commands and confirmation answers come from the same input, so both go
/// through here.
pub struct Console<R, W> {
    input: Mutex<Lines<R>>,
    output: Mutex<W>,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            input: Mutex::new(reader.lines()),
            output: Mutex::new(writer),
        }
    }

    /// Next line of input, or `None` at end of input.
    pub async fn read_line(&self) -> anyhow::Result<Option<String>> {
        let mut input = self.input.lock().await;
        Ok(input.next_line().await?)
    }

    pub async fn write_line(&self, line: &str) -> anyhow::Result<()> {
        let mut output = self.output.lock().await;
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
        Ok(())
    }
}

/// Asks for confirmation on the console.
pub struct TerminalSurface<R, W> {
    console: Arc<Console<R, W>>,
}

impl<R, W> TerminalSurface<R, W> {
    pub fn new(console: Arc<Console<R, W>>) -> Self {
        Self { console }
    }

    pub fn console(&self) -> &Console<R, W> {
        &self.console
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "use"
    )
}

#[async_trait]
impl<R, W> ConfirmationSurface for TerminalSurface<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn ask(&self, prompt: &PurchasePrompt) -> Confirmation {
        let question = format!(
            "{}\n{}\nSpend {} coins? [y/N]",
            prompt.title, prompt.description, prompt.price
        );
        if let Err(e) = self.console.write_line(&question).await {
            tracing::warn!("Failed to show confirmation prompt: {}", e);
            return Confirmation::Declined;
        }

        match self.console.read_line().await {
            Ok(Some(answer)) if is_yes(&answer) => Confirmation::Confirmed,
            Ok(_) => Confirmation::Declined,
            Err(e) => {
                tracing::warn!("Failed to read confirmation answer: {}", e);
                Confirmation::Declined
            }
        }
    }

    async fn notify(&self, notice: Notice) {
        let line = format!("{}: {}", notice.title(), notice.message());
        if let Err(e) = self.console.write_line(&line).await {
            tracing::warn!("Failed to show notice: {}", e);
        }
    }
}
