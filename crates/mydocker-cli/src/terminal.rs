//! Terminal handling for attached container sessions.

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::io::{AsyncWriteExt, copy};
use tokio::net::UnixStream;
use tokio::signal::unix::{signal, SignalKind};

/// RAII guard that restores terminal mode on drop.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Enables raw mode and returns a guard that restores cooked mode on
    /// drop.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal refuses raw mode.
    pub fn new() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Bridges local stdio to the attached socket.
///
/// Two concurrent copies: stdin → socket and socket → stdout. The bridge
/// ends when either copy returns (EOF or error) or when SIGINT/SIGTERM
/// arrives, so the caller can restore the terminal before exiting.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn bridge(stream: UnixStream) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let mut stdin_task = tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let _ = copy(&mut stdin, &mut writer).await;
        // Local EOF: tell the daemon we are done writing.
        let _ = writer.shutdown().await;
    });
    let mut stdout_task = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let _ = copy(&mut reader, &mut stdout).await;
        let _ = stdout.flush().await;
    });

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install handler")?;

    tokio::select! {
        _ = &mut stdin_task => {
            stdout_task.abort();
            let _ = stdout_task.await;
        }
        _ = &mut stdout_task => {
            stdin_task.abort();
            let _ = stdin_task.await;
        }
        _ = tokio::signal::ctrl_c() => {
            stdin_task.abort();
            stdout_task.abort();
        }
        _ = sigterm.recv() => {
            stdin_task.abort();
            stdout_task.abort();
        }
    }

    Ok(())
}
