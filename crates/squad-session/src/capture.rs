//! Capture range selectors.
//!
//! Both ends of a range accept the same grammar, modelled on
//! `tmux capture-pane -S <start> -E <end>`:
//!
//! | selector | as start                 | as end                |
//! |----------|--------------------------|-----------------------|
//! | `-`      | oldest scrollback line   | last visible row      |
//! | `""`     | top visible row (`0`)    | last visible row      |
//! | `N`      | line `N`                 | line `N`              |
//!
//! Line `0` is the top visible row; negative lines count back into
//! scrollback (`-1` is the newest history line). Out-of-range lines clamp
//! to what exists, and a start past the end captures nothing.

use std::str::FromStr;

use crate::error::SessionError;

/// One end of a capture range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineBound {
    /// `-`: as far as the buffer goes in this direction.
    Edge,
    /// Empty selector: the edge of the visible screen.
    Screen,
    Line(i32),
}

impl FromStr for LineBound {
    type Err = SessionError;

    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        match selector.trim() {
            "-" => Ok(LineBound::Edge),
            "" => Ok(LineBound::Screen),
            value => value
                .parse::<i32>()
                .map(LineBound::Line)
                .map_err(|_| SessionError::InvalidRange(selector.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureRange {
    pub start: LineBound,
    pub end: LineBound,
}

impl CaptureRange {
    /// Scrollback and screen together.
    pub const FULL_HISTORY: CaptureRange = CaptureRange {
        start: LineBound::Edge,
        end: LineBound::Edge,
    };

    /// The visible screen only.
    pub const VISIBLE: CaptureRange = CaptureRange {
        start: LineBound::Screen,
        end: LineBound::Screen,
    };

    pub fn parse(start: &str, end: &str) -> Result<Self, SessionError> {
        Ok(Self {
            start: start.parse()?,
            end: end.parse()?,
        })
    }

    /// Concrete `(first, last)` lines for a buffer spanning
    /// `first_line..=last_line`, clamped to it.
    pub fn resolve(&self, first_line: i32, last_line: i32) -> (i32, i32) {
        let first = match self.start {
            LineBound::Edge => first_line,
            LineBound::Screen => 0,
            LineBound::Line(n) => n.max(first_line),
        };
        let last = match self.end {
            LineBound::Edge | LineBound::Screen => last_line,
            LineBound::Line(n) => n.min(last_line),
        };
        (first, last)
    }
}
