//! squad-pty: PTY process management for hosted squad sessions.
//!
//! This crate sits between the PTY (the real program) and the VT terminal
//! (screen state). It reads program output, feeds it into `VtTerminal`, fans
//! the raw bytes out to attached clients, and writes input back to the
//! program.
//!
//! # Architecture
//!
//! - [`PtyHandle`]: Low-level PTY process management (spawn, read, write, resize, kill).
//! - [`HostedTerminal`]: Pairs a `PtyHandle` with a `VtTerminal` and a
//!   dedicated reader thread, giving one thread-safe handle per session.

mod io_thread;

pub mod host;
pub mod pty;

pub use host::{HostOptions, HostedTerminal};
pub use pty::{PtyError, PtyHandle, SpawnOptions};
