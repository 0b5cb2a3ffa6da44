//! Per-session I/O thread that reads PTY output and feeds it into the VT terminal.
//!
//! PTY reads are blocking, so every hosted terminal gets its own OS thread.
//! The reader is owned by the thread directly (not behind any mutex), so a
//! blocked read never prevents captures, input or resizes.

use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::host::Shared;
use crate::pty::PtyError;

/// Start the read loop for a hosted terminal on a dedicated OS thread.
pub(crate) fn start_io_thread(
    label: &str,
    shared: Arc<Shared>,
    reader: Box<dyn Read + Send>,
    mut stop_rx: mpsc::Receiver<()>,
) -> Result<(), PtyError> {
    std::thread::Builder::new()
        .name(format!("squad-pty-io-{label}"))
        .spawn(move || {
            io_loop(&shared, reader, &mut stop_rx);
            shared.close_output();
            log::debug!("PTY reader thread finished");
        })?;
    Ok(())
}

fn io_loop(shared: &Shared, mut reader: Box<dyn Read + Send>, stop_rx: &mut mpsc::Receiver<()>) {
    let mut buf = [0u8; 65536];

    loop {
        match stop_rx.try_recv() {
            Ok(()) => return,
            Err(mpsc::error::TryRecvError::Disconnected) => return,
            Err(mpsc::error::TryRecvError::Empty) => {}
        }

        let n = match reader.read(&mut buf) {
            Ok(0) => return, // EOF: PTY closed
            Ok(n) => n,
            Err(e) => {
                // EIO is how Linux reports a hung-up PTY.
                log::debug!("PTY read ended: {e}");
                return;
            }
        };
        let chunk = &buf[..n];

        if let Err(e) = feed(shared, chunk) {
            log::warn!("stopping PTY reader: {e}");
            return;
        }
    }
}

/// Feed one chunk into the VT, answer its queries, then fan it out.
fn feed(shared: &Shared, chunk: &[u8]) -> Result<(), PtyError> {
    let write_backs = {
        let mut vt = shared.lock_vt()?;
        vt.write(chunk);
        vt.take_pty_writes()
    };

    if !write_backs.is_empty() {
        let mut pty = shared.lock_pty()?;
        for data in &write_backs {
            if let Err(e) = pty.write(data.as_bytes()) {
                log::warn!("failed to answer terminal query: {e}");
            }
        }
    }

    // Replay and broadcast move together under the replay lock, so a
    // subscriber sees every chunk exactly once.
    let mut replay = shared.lock_replay()?;
    replay.push(chunk);
    shared.has_output.store(true, Ordering::Release);
    shared.broadcast(chunk);
    Ok(())
}
