use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use squad_vt::{ScreenView, VtTerminal};
use tokio::sync::{broadcast, mpsc};

use crate::io_thread::start_io_thread;
use crate::pty::{PtyError, PtyHandle, SpawnOptions};

/// Chunks buffered per attached client before it starts lagging.
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// Emulator-side settings for a hosted terminal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostOptions {
    /// Lines of scrollback kept by the VT.
    pub scrollback: usize,
    /// Raw output bytes kept for replay to newly attached clients.
    pub replay_bytes: usize,
    /// Used to name the reader thread.
    pub label: String,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            scrollback: squad_vt::terminal::DEFAULT_SCROLLBACK,
            replay_bytes: 64 * 1024,
            label: "session".to_string(),
        }
    }
}

/// Bounded tail of raw PTY output.
pub(crate) struct ReplayBuffer {
    bytes: VecDeque<u8>,
    max: usize,
}

impl ReplayBuffer {
    fn new(max: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(max.min(64 * 1024)),
            max,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend(chunk);
        if self.bytes.len() > self.max {
            let excess = self.bytes.len() - self.max;
            self.bytes.drain(..excess);
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        self.bytes.iter().copied().collect()
    }
}

/// State shared between a `HostedTerminal` and its reader thread.
pub(crate) struct Shared {
    vt: Mutex<VtTerminal>,
    pty: Mutex<PtyHandle>,
    replay: Mutex<ReplayBuffer>,
    /// Dropped by the reader thread on exit so subscribers see the end of output.
    output: Mutex<Option<broadcast::Sender<Vec<u8>>>>,
    pub(crate) has_output: AtomicBool,
}

impl Shared {
    pub(crate) fn lock_vt(&self) -> Result<MutexGuard<'_, VtTerminal>, PtyError> {
        self.vt.lock().map_err(|_| PtyError::Poisoned("VT terminal"))
    }

    pub(crate) fn lock_pty(&self) -> Result<MutexGuard<'_, PtyHandle>, PtyError> {
        self.pty.lock().map_err(|_| PtyError::Poisoned("PTY"))
    }

    pub(crate) fn lock_replay(&self) -> Result<MutexGuard<'_, ReplayBuffer>, PtyError> {
        self.replay.lock().map_err(|_| PtyError::Poisoned("replay buffer"))
    }

    pub(crate) fn broadcast(&self, chunk: &[u8]) {
        if let Ok(output) = self.output.lock() {
            if let Some(tx) = output.as_ref() {
                // No receivers simply means nobody is attached.
                let _ = tx.send(chunk.to_vec());
            }
        }
    }

    pub(crate) fn close_output(&self) {
        let mut output = self.output.lock().unwrap_or_else(|e| e.into_inner());
        output.take();
    }
}

/// A program running in a PTY with a live VT model of its screen.
///
/// All methods take `&self`; each one locks only the piece of state it
/// touches, and never across a blocking PTY read.
pub struct HostedTerminal {
    shared: Arc<Shared>,
    io_stop: mpsc::Sender<()>,
}

impl HostedTerminal {
    /// Spawn the program and start the reader thread.
    pub fn launch(spawn: &SpawnOptions, options: &HostOptions) -> Result<Self, PtyError> {
        let mut pty = PtyHandle::spawn(spawn)?;
        let reader = pty
            .take_reader()
            .ok_or_else(|| PtyError::SpawnFailed("PTY reader unavailable".to_string()))?;

        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            vt: Mutex::new(VtTerminal::new(spawn.cols, spawn.rows, options.scrollback)),
            pty: Mutex::new(pty),
            replay: Mutex::new(ReplayBuffer::new(options.replay_bytes)),
            output: Mutex::new(Some(output_tx)),
            has_output: AtomicBool::new(false),
        });

        let (io_stop, io_stop_rx) = mpsc::channel::<()>(1);
        // On failure `shared` drops here and PtyHandle's Drop kills the child.
        start_io_thread(&options.label, Arc::clone(&shared), reader, io_stop_rx)?;

        Ok(Self { shared, io_stop })
    }

    /// Write input bytes to the program.
    pub fn write_input(&self, data: &[u8]) -> Result<(), PtyError> {
        self.shared.lock_pty()?.write(data)
    }

    /// Resize both the PTY and the VT grid.
    ///
    /// The VT is only touched once the PTY accepted the new size.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.shared.lock_pty()?.resize(cols, rows)?;
        self.shared.lock_vt()?.resize(cols, rows);
        Ok(())
    }

    /// Exit code of the program, or `None` while it runs.
    pub fn try_wait(&self) -> Option<u32> {
        self.shared.lock_pty().ok()?.try_wait()
    }

    /// Whether the program is still running.
    pub fn is_alive(&self) -> bool {
        match self.shared.lock_pty() {
            Ok(mut pty) => pty.is_alive(),
            Err(_) => false,
        }
    }

    /// Whether the program has written anything yet.
    pub fn has_output(&self) -> bool {
        self.shared.has_output.load(Ordering::Acquire)
    }

    pub fn process_id(&self) -> Option<u32> {
        self.shared.lock_pty().ok()?.process_id()
    }

    /// Title set by the program through OSC escape sequences.
    pub fn title(&self) -> Option<String> {
        self.shared.lock_vt().ok()?.title_owned()
    }

    /// Run `f` against the current screen.
    pub fn with_screen<R>(&self, f: impl FnOnce(&ScreenView<'_>) -> R) -> Result<R, PtyError> {
        let vt = self.shared.lock_vt()?;
        Ok(f(&vt.screen()))
    }

    /// Recent raw output plus a receiver for everything after it.
    ///
    /// Returns `None` once the program's output has closed.
    pub fn subscribe(&self) -> Result<Option<(Vec<u8>, broadcast::Receiver<Vec<u8>>)>, PtyError> {
        let replay = self.shared.lock_replay()?;
        let output = self.shared.output.lock().map_err(|_| PtyError::Poisoned("output"))?;
        let subscription = output.as_ref().map(|tx| (replay.snapshot(), tx.subscribe()));
        Ok(subscription)
    }

    /// Copy of the recent raw output.
    pub fn replay(&self) -> Result<Vec<u8>, PtyError> {
        Ok(self.shared.lock_replay()?.snapshot())
    }

    /// Kill the program and its descendants, wait up to `timeout` for it to
    /// exit, stop the reader.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), PtyError> {
        let result = {
            let mut pty = self.shared.lock_pty()?;
            pty.kill_tree().and_then(|()| match pty.wait_timeout(timeout) {
                Some(_) => Ok(()),
                None => Err(PtyError::KillFailed(format!(
                    "process still running {}ms after kill",
                    timeout.as_millis()
                ))),
            })
        };
        // Full means a stop is already queued.
        let _ = self.io_stop.try_send(());
        result
    }
}

impl Drop for HostedTerminal {
    fn drop(&mut self) {
        // The reader thread holds `shared` until the PTY reaches EOF.
        if let Ok(mut pty) = self.shared.lock_pty() {
            if let Err(e) = pty.kill_tree() {
                log::debug!("kill on drop: {e}");
            }
        }
        let _ = self.io_stop.try_send(());
    }
}
