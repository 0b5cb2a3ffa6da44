use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::{Column, Line};
use alacritty_terminal::term::cell::Flags;
use alacritty_terminal::term::Term;

use crate::terminal::EventProxy;

/// A read-only text view into the terminal grid.
///
/// Lines are addressed the way tmux addresses them: line 0 is the top of the
/// visible screen, `rows() - 1` the bottom, and negative lines reach back
/// into scrollback (`-1` is the newest history line).
pub struct ScreenView<'a> {
    term: &'a Term<EventProxy>,
}

impl<'a> ScreenView<'a> {
    pub(crate) fn new(term: &'a Term<EventProxy>) -> Self {
        Self { term }
    }

    /// Number of visible rows.
    pub fn rows(&self) -> u16 {
        self.term.screen_lines() as u16
    }

    /// Number of columns.
    pub fn cols(&self) -> u16 {
        self.term.columns() as u16
    }

    /// Number of lines currently held in scrollback.
    pub fn history_size(&self) -> usize {
        self.term.grid().history_size()
    }

    /// Oldest addressable line (a negative number, or 0 without history).
    pub fn first_line(&self) -> i32 {
        -(self.history_size() as i32)
    }

    /// Last visible line.
    pub fn last_line(&self) -> i32 {
        self.term.screen_lines() as i32 - 1
    }

    /// Text of a single line with trailing blanks removed.
    ///
    /// Lines outside the addressable range read as empty.
    pub fn line_text(&self, line: i32) -> String {
        if line < self.first_line() || line > self.last_line() {
            return String::new();
        }

        let row = &self.term.grid()[Line(line)];
        let mut text = String::with_capacity(self.term.columns());
        for col in 0..self.term.columns() {
            let cell = &row[Column(col)];
            if cell.flags.contains(Flags::WIDE_CHAR_SPACER) {
                continue;
            }
            text.push(cell.c);
            if let Some(zerowidth) = cell.zerowidth() {
                text.extend(zerowidth);
            }
        }
        text.truncate(text.trim_end().len());
        text
    }

    /// The visible screen, one line per row, joined with `\n`.
    pub fn visible_text(&self) -> String {
        self.text_range(0, self.last_line())
    }

    /// Lines `first..=last`, clamped to the addressable range.
    ///
    /// Returns an empty string when the clamped range is empty.
    pub fn text_range(&self, first: i32, last: i32) -> String {
        let first = first.max(self.first_line());
        let last = last.min(self.last_line());
        if first > last {
            return String::new();
        }
        (first..=last)
            .map(|line| self.line_text(line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
