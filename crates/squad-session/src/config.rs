//! Session adapter configuration.
//!
//! Every field has a default, so an empty or partial TOML document is a
//! valid configuration:
//!
//! ```toml
//! name_prefix = "claudesquad_"
//! cols = 120
//! rows = 40
//! startup_timeout_ms = 800
//! prompt_patterns = ["Do you want to proceed\\?"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::naming::DEFAULT_PREFIX;

/// Ctrl-Q ends an attach bridge, as in the tmux adapter.
pub const DEFAULT_DETACH_KEY: u8 = 0x11;

/// Prompts printed by the agents this adapter is used to host.
pub const DEFAULT_PROMPT_PATTERNS: [&str; 3] = [
    r"No, and tell Claude what to do differently",
    r"\(Y\)es/\(N\)o/\(D\)on't ask again",
    r"Yes, allow once",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid session config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid prompt pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid session config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Namespace prefix for sanitized identifiers.
    pub name_prefix: String,
    /// Initial PTY width in cells.
    pub cols: u16,
    /// Initial PTY height in cells.
    pub rows: u16,
    pub scrollback_lines: usize,
    /// Upper bound on the post-launch readiness wait.
    pub startup_timeout_ms: u64,
    pub startup_poll_ms: u64,
    /// How long Close waits for the killed process to be reaped.
    pub close_timeout_ms: u64,
    /// Raw output replayed to a newly attached client.
    pub replay_buffer_bytes: usize,
    /// Byte that ends an attach bridge when read from the client.
    pub detach_key: u8,
    /// `TERM` exported to the hosted program.
    pub term: String,
    /// Regexes; a capture matching any of them is reported as a prompt.
    pub prompt_patterns: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_PREFIX.to_string(),
            cols: 80,
            rows: 24,
            scrollback_lines: 10_000,
            startup_timeout_ms: 500,
            startup_poll_ms: 20,
            close_timeout_ms: 2_000,
            replay_buffer_bytes: 64 * 1024,
            detach_key: DEFAULT_DETACH_KEY,
            term: "xterm-256color".to_string(),
            prompt_patterns: DEFAULT_PROMPT_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cols == 0 || self.rows == 0 {
            return Err(ConfigError::Invalid(format!(
                "terminal size {}x{} must be non-zero",
                self.cols, self.rows
            )));
        }
        if self.startup_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "startup_poll_ms must be non-zero".to_string(),
            ));
        }
        for pattern in &self.prompt_patterns {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn startup_poll(&self) -> Duration {
        Duration::from_millis(self.startup_poll_ms.max(1))
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
