//! squad-session: terminal sessions for the squad session manager.
//!
//! Each [`TerminalSession`] hosts one program (usually a coding agent) in a
//! pseudo-terminal and exposes the operations a session registry needs:
//! start, liveness, screen capture, keystroke injection, resize, attach and
//! close. The registry talks to sessions through [`SessionBackend`], so
//! other hosts can sit behind the same interface.
//!
//! # Architecture
//!
//! - [`session`]: `TerminalSession` and its lifecycle.
//! - [`attach`]: Tokio relay between a caller's I/O and a running session.
//! - [`capture`]: Scrollback/screen range selectors.
//! - [`monitor`]: Change and prompt detection across captures.
//! - [`cleanup`]: Killing processes left behind by a previous run.
//! - [`config`]: `SessionConfig`, loaded from TOML.

pub mod attach;
pub mod backend;
pub mod capture;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod monitor;
pub mod naming;
pub mod session;

pub use attach::{AttachHandle, DetachSignal};
pub use backend::SessionBackend;
pub use capture::{CaptureRange, LineBound};
pub use cleanup::{cleanup_sessions, SESSION_MARKER_ENV};
pub use config::{ConfigError, SessionConfig};
pub use error::{Result, SessionError};
pub use naming::{sanitize_name, sanitize_with_prefix};
pub use session::{SessionState, TerminalSession};
