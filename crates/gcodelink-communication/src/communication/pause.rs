//! Pause and resume tracking
//!
//! Two independent holds can stop a stream: the controller holding on an
//! `M0`-class line, and the host holding after an explicit stop. A resume
//! clears both, along with the pause reason.

/// Progress of a controller-initiated hold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControllerHold {
    /// No pause command in flight
    #[default]
    None,
    /// Pause command written, not yet acknowledged
    Pending,
    /// Pause command acknowledged; the controller is waiting for a resume
    Waiting,
}

/// Tracks controller and host holds
#[derive(Debug, Clone)]
pub struct PauseTracker {
    controller_hold: ControllerHold,
    host_hold: bool,
    reason: Option<String>,
    commands: Vec<String>,
    comment_marker: char,
}

impl PauseTracker {
    /// Create a tracker recognising `commands` as pause commands
    pub fn new<I, S>(commands: I, comment_marker: char) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            controller_hold: ControllerHold::None,
            host_hold: false,
            reason: None,
            commands: commands
                .into_iter()
                .map(|c| c.as_ref().trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
            comment_marker,
        }
    }

    /// Check if a prepared line starts with a pause command
    ///
    /// A leading `N` line number is skipped. Matching is case-insensitive and
    /// exact on the command word, so `M0` does not match `M03`.
    pub fn is_pause_command(&self, line: &str) -> bool {
        match command_word(line) {
            Some(word) => self.commands.iter().any(|c| *c == word),
            None => false,
        }
    }

    /// Record a written line; returns true if it started a controller hold
    ///
    /// `raw` is the line as queued (comment included); `prepared` is what was
    /// actually written.
    pub fn on_line_written(&mut self, raw: &str, prepared: &str) -> bool {
        if !self.is_pause_command(prepared) {
            return false;
        }
        self.controller_hold = ControllerHold::Pending;
        self.reason = self.extract_reason(raw);
        tracing::info!(
            "Controller hold requested{}",
            self.reason
                .as_deref()
                .map(|r| format!(": {}", r))
                .unwrap_or_default()
        );
        true
    }

    /// Record an acknowledgment of the outstanding line
    pub fn on_ack(&mut self) {
        if self.controller_hold == ControllerHold::Pending {
            self.controller_hold = ControllerHold::Waiting;
        }
    }

    /// Drop a controller hold whose command was never acknowledged
    pub fn cancel_pending(&mut self) {
        if self.controller_hold == ControllerHold::Pending {
            self.controller_hold = ControllerHold::None;
            if !self.host_hold {
                self.reason = None;
            }
        }
    }

    /// Record a host-initiated hold
    pub fn hold_by_host(&mut self) {
        self.host_hold = true;
    }

    /// Clear both holds and the reason together
    pub fn resume(&mut self) {
        self.controller_hold = ControllerHold::None;
        self.host_hold = false;
        self.reason = None;
    }

    /// Check if a resume would release a hold
    pub fn can_resume(&self) -> bool {
        self.controller_hold == ControllerHold::Waiting || self.host_hold
    }

    /// Check if either hold is active or pending
    pub fn is_paused(&self) -> bool {
        self.controller_hold != ControllerHold::None || self.host_hold
    }

    /// Current controller hold
    pub fn controller_hold(&self) -> ControllerHold {
        self.controller_hold
    }

    /// Check if a host hold is active
    pub fn host_hold(&self) -> bool {
        self.host_hold
    }

    /// Reason given by the pause command, if any
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Reason text: comment first, then a parenthetical, then trailing text
    fn extract_reason(&self, raw: &str) -> Option<String> {
        let (code, comment) = match raw.split_once(self.comment_marker) {
            Some((code, comment)) => (code, Some(comment.trim())),
            None => (raw, None),
        };
        if let Some(comment) = comment.filter(|c| !c.is_empty()) {
            return Some(comment.to_string());
        }

        let mut rest = code.to_string();
        if let Some(open) = code.find('(') {
            if let Some(len) = code[open..].find(')') {
                let inner = code[open + 1..open + len].trim();
                if !inner.is_empty() {
                    return Some(inner.to_string());
                }
                rest.replace_range(open..open + len + 1, " ");
            }
        }

        let mut words = rest.split_whitespace().peekable();
        if words.peek().is_some_and(|w| is_line_number(w)) {
            words.next();
        }
        words.next();
        let trailing = words.collect::<Vec<_>>().join(" ");
        (!trailing.is_empty()).then_some(trailing)
    }
}

impl Default for PauseTracker {
    fn default() -> Self {
        Self::new(["M0", "M00", "M1", "M01"], ';')
    }
}

fn is_line_number(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some('N' | 'n'))
        && !word[1..].is_empty()
        && chars.all(|c| c.is_ascii_digit())
}

/// First command word, uppercased, skipping a line number
fn command_word(line: &str) -> Option<String> {
    let mut words = line.split_whitespace();
    let mut word = words.next()?;
    if is_line_number(word) {
        word = words.next()?;
    }
    let end = word
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '.'))
        .unwrap_or(word.len());
    let word = &word[..end];
    (!word.is_empty()).then(|| word.to_ascii_uppercase())
}
