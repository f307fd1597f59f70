//! Local desktop glue: the clipboard-backed introducer and the terminal key
//! prompt

use async_trait::async_trait;
use pmb_core::{BusError, BusResult, IntroducerActions, KeySource};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

/// Introducer side effects for this machine.
///
/// Only the clipboard is wired up; URLs and notifications are logged so a
/// wrapper script can pick them up.
pub struct Desktop;

#[async_trait]
impl IntroducerActions for Desktop {
    async fn copy_to_clipboard(&mut self, data: &str) -> BusResult<()> {
        let data = data.to_string();
        tokio::task::spawn_blocking(move || {
            arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(data))
        })
        .await
        .map_err(|e| BusError::Transport(format!("clipboard task failed: {}", e)))?
        .map_err(|e| BusError::Transport(format!("clipboard unavailable: {}", e)))
    }

    async fn open_url(&mut self, url: &str) -> BusResult<()> {
        info!(%url, "Open URL requested");
        Ok(())
    }

    async fn display_notification(
        &mut self,
        message: &str,
        url: &str,
        level: f64,
    ) -> BusResult<()> {
        info!(notification = %message, %url, level, "Notification");
        Ok(())
    }
}

/// Prompts on stderr and reads one line from stdin
pub struct TerminalKeySource;

#[async_trait]
impl KeySource for TerminalKeySource {
    async fn read_key(&mut self) -> BusResult<String> {
        let mut stderr = tokio::io::stderr();
        stderr.write_all(b"Enter key: ").await?;
        stderr.flush().await?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        match lines.next_line().await? {
            Some(line) => Ok(line.trim().to_string()),
            None => Err(BusError::Closed),
        }
    }
}
