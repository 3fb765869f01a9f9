//! Manual trigger gate.
//!
//! The sell leg only starts after an operator enters a line containing
//! `sell` (any case).
//! Other input is rejected with a re-prompt. The gate has no timeout and
//! cannot be cancelled; a closed console ends the run instead.

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tracing::{info, warn};

use crate::error::RunError;

const CONFIRMATION: &str = "sell";
const PROMPT: &str = "Type 'sell' to sell all positions: ";

/// Line-oriented operator I/O.
#[async_trait]
pub trait OperatorConsole: Send {
    async fn write(&mut self, message: &str) -> Result<()>;

    /// Next input line without its terminator, `None` once input is closed.
    async fn read_line(&mut self) -> Result<Option<String>>;
}

pub struct LineConsole<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> LineConsole<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl LineConsole<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> OperatorConsole for LineConsole<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, message: &str) -> Result<()> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

pub struct ManualTriggerGate<C> {
    console: C,
}

impl<C: OperatorConsole> ManualTriggerGate<C> {
    pub fn new(console: C) -> Self {
        Self { console }
    }

    pub fn into_inner(self) -> C {
        self.console
    }

    /// Block until the operator confirms. Returns the number of rejected
    /// inputs before the confirmation.
    pub async fn wait_for_confirmation(&mut self) -> Result<u32, RunError> {
        let mut rejected = 0;
        loop {
            self.console
                .write(PROMPT)
                .await
                .map_err(|e| unavailable(&e))?;

            let line = match self.console.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Err(RunError::OperatorUnavailable),
                Err(e) => return Err(unavailable(&e)),
            };

            if is_confirmation(&line) {
                info!(rejected, "Sell confirmed by operator");
                return Ok(rejected);
            }

            rejected += 1;
            warn!(input = %line.trim(), "Rejected operator input");
            self.console
                .write(&format!(
                    "'{}' is not a sell confirmation, try again\n",
                    line.trim()
                ))
                .await
                .map_err(|e| unavailable(&e))?;
        }
    }
}

/// Any line mentioning the confirmation word, in any case.
fn is_confirmation(input: &str) -> bool {
    input.to_ascii_lowercase().contains(CONFIRMATION)
}

fn unavailable(err: &anyhow::Error) -> RunError {
    warn!(error = %err, "Operator console failed");
    RunError::OperatorUnavailable
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
