//! Interactive bridge between a caller's I/O and a hosted terminal.
//!
//! Two Tokio tasks relay bytes: one copies the session's output (recent
//! history first, then live chunks) to the caller, the other copies caller
//! input to the PTY. Either side ending, the detach key, or an explicit
//! [`DetachSignal::detach`] stops both. The hosted program keeps running.

use std::sync::Arc;

use squad_pty::HostedTerminal;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::{Result, SessionError};

/// Cooperative cancellation for one bridge. Cloning shares the signal.
#[derive(Clone, Debug)]
pub struct DetachSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl DetachSignal {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the bridge to stop. Idempotent.
    pub fn detach(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_detached(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Puts the caller's terminal in raw mode until dropped.
///
/// Without it the tty line-buffers and echoes input, and with IXON set it
/// swallows Ctrl-Q before the bridge can see the detach key.
pub(crate) struct RawModeGuard(());

impl RawModeGuard {
    pub(crate) fn enable() -> Result<Self> {
        crossterm::terminal::enable_raw_mode()
            .map_err(|e| SessionError::Attach(format!("failed to enable raw mode: {e}")))?;
        Ok(Self(()))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            log::warn!("failed to restore terminal mode: {e}");
        }
    }
}

/// Handle to a running bridge, returned by attach.
pub struct AttachHandle {
    signal: DetachSignal,
    task: JoinHandle<()>,
}

impl AttachHandle {
    pub fn signal(&self) -> DetachSignal {
        self.signal.clone()
    }

    pub fn detach(&self) {
        self.signal.detach();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until both relays have stopped.
    pub async fn wait(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| SessionError::Attach(format!("bridge task failed: {e}")))
    }
}

/// Start relaying between `input`/`output` and `host`.
///
/// Must be called from within a Tokio runtime. `raw_mode` is released once
/// both relays have stopped.
pub(crate) fn spawn_bridge<R, W>(
    label: &str,
    host: Arc<HostedTerminal>,
    input: R,
    output: W,
    detach_key: u8,
    raw_mode: Option<RawModeGuard>,
) -> Result<AttachHandle>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| SessionError::Attach(format!("no Tokio runtime: {e}")))?;

    let (replay, rx) = host
        .subscribe()
        .map_err(|e| SessionError::Attach(e.to_string()))?
        .ok_or_else(|| SessionError::Attach("session output has closed".to_string()))?;

    let signal = DetachSignal::new();
    let output_task = runtime.spawn(relay_output(replay, rx, output, signal.clone()));
    let input_task = runtime.spawn(relay_input(host, input, detach_key, signal.clone()));

    log::debug!("attached to {label}");
    let label = label.to_string();
    let task = runtime.spawn(async move {
        let _ = output_task.await;
        let _ = input_task.await;
        drop(raw_mode);
        log::debug!("detached from {label}");
    });

    Ok(AttachHandle { signal, task })
}

async fn relay_output<W>(
    replay: Vec<u8>,
    mut rx: broadcast::Receiver<Vec<u8>>,
    mut output: W,
    signal: DetachSignal,
) where
    W: AsyncWrite + Unpin,
{
    let mut stop = signal.subscribe();

    if let Err(e) = write_chunk(&mut output, &replay).await {
        log::debug!("attach output closed: {e}");
        signal.detach();
        return;
    }

    loop {
        let chunk = tokio::select! {
            _ = stop.wait_for(|detached| *detached) => break,
            received = rx.recv() => match received {
                Ok(chunk) => chunk,
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("attached client fell behind, dropped {skipped} chunks");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        if signal.is_detached() {
            break;
        }
        if let Err(e) = write_chunk(&mut output, &chunk).await {
            log::debug!("attach output closed: {e}");
            break;
        }
    }

    signal.detach();
}

async fn relay_input<R>(host: Arc<HostedTerminal>, mut input: R, detach_key: u8, signal: DetachSignal)
where
    R: AsyncRead + Unpin,
{
    let mut stop = signal.subscribe();
    let mut buf = [0u8; 4096];

    loop {
        let n = tokio::select! {
            _ = stop.wait_for(|detached| *detached) => break,
            read = input.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    log::debug!("attach input closed: {e}");
                    break;
                }
            },
        };

        let (data, detach_requested) = split_at_detach_key(&buf[..n], detach_key);
        if !data.is_empty() && !signal.is_detached() {
            if let Err(e) = host.write_input(data) {
                log::warn!("failed to forward attach input: {e}");
                break;
            }
        }
        if detach_requested {
            break;
        }
    }

    signal.detach();
}

async fn write_chunk<W>(output: &mut W, chunk: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if chunk.is_empty() {
        return Ok(());
    }
    output.write_all(chunk).await?;
    output.flush().await
}

/// Bytes to forward, and whether the detach key was among them.
fn split_at_detach_key(chunk: &[u8], detach_key: u8) -> (&[u8], bool) {
    match chunk.iter().position(|&b| b == detach_key) {
        Some(idx) => (&chunk[..idx], true),
        None => (chunk, false),
    }
}
