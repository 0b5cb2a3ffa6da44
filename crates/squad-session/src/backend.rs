use std::path::Path;

use crate::attach::AttachHandle;
use crate::error::Result;

/// The interface a session registry drives, whatever hosts the session.
///
/// Object safe, so a registry can hold `Box<dyn SessionBackend>` for a mix of
/// implementations.
pub trait SessionBackend: Send + Sync {
    /// Launch the program. `work_dir` is ignored when empty.
    fn start(&self, work_dir: &Path) -> Result<()>;

    /// Re-derive the running state from the process. Never fails on its own.
    fn restore(&self) -> Result<()>;

    /// Whether the hosted process is alive.
    fn exists(&self) -> bool;

    /// Deliver `keys` literally to the session's input.
    fn send_keys(&self, keys: &str) -> Result<()>;

    fn tap_enter(&self) -> Result<()> {
        self.send_keys("\r")
    }

    /// `(updated, has_prompt)` relative to the previous call.
    fn has_updated(&self) -> (bool, bool);

    /// The visible screen.
    fn capture_pane_content(&self) -> Result<String>;

    /// A range of scrollback and screen; see [`crate::capture`] for the grammar.
    fn capture_pane_content_with_options(&self, start: &str, end: &str) -> Result<String>;

    fn set_detached_size(&self, width: u16, height: u16) -> Result<()>;

    /// Bridge the process's stdin/stdout to the session.
    fn attach(&self) -> Result<AttachHandle>;

    /// End any active bridge, leaving the session running.
    fn detach_safely(&self) -> Result<()>;

    /// Kill the process and release it. Idempotent.
    fn close(&self) -> Result<()>;
}
