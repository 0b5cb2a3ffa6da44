//! Change and prompt detection over successive captures.

use std::convert::Infallible;
use std::sync::Mutex;

use regex::Regex;

/// Remembers the last capture so polls can tell whether output moved.
#[derive(Default)]
pub struct ContentTracker {
    last: Mutex<String>,
}

impl ContentTracker {
    /// Store `content` and report whether it differs from the previous one.
    ///
    /// The compare and the store happen under one lock, so concurrent
    /// pollers never lose an update.
    pub fn observe(&self, content: String) -> bool {
        match self.observe_with(|| Ok::<_, Infallible>(content)) {
            Ok(updated) => updated,
            Err(never) => match never {},
        }
    }

    /// Like [`observe`](Self::observe), but takes the capture while holding
    /// the lock, so concurrent pollers store captures in the order they were
    /// taken. An error leaves the stored content untouched.
    pub fn observe_with<E>(&self, capture: impl FnOnce() -> Result<String, E>) -> Result<bool, E> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let content = capture()?;
        if *last == content {
            return Ok(false);
        }
        *last = content;
        Ok(true)
    }

    pub fn reset(&self) {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// A set of regexes, any of which marks a capture as waiting on the user.
#[derive(Clone, Debug, Default)]
pub struct PromptMatcher {
    patterns: Vec<Regex>,
}

impl PromptMatcher {
    /// Compile `patterns`, skipping (and logging) any that do not compile.
    ///
    /// `SessionConfig::validate` rejects bad patterns up front; this only
    /// guards configs built by hand.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern.as_ref()) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("ignoring prompt pattern {:?}: {e}", pattern.as_ref());
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn matches(&self, content: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(content))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
