//! squad-vt: Terminal emulation for hosted squad sessions.
//!
//! Wraps `alacritty_terminal` so the session layer can feed raw PTY output in
//! and read the resulting screen back out as plain text, including the
//! scrollback history.

pub mod screen;
pub mod terminal;

pub use screen::ScreenView;
pub use terminal::VtTerminal;
