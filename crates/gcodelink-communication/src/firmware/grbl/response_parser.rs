//! GRBL response classification
//!
//! Sorts a complete text line from the controller into the kinds the link
//! cares about: the `ok` acknowledgment, an `error:` rejection, an `ALARM:`
//! notice, or anything else.

use super::error_decoder::{format_alarm, format_error};
use super::ACK_TOKEN;
use std::fmt;

/// Classified text response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Acknowledgment, standalone or embedded in a longer line
    Ok,
    /// Line rejected by the controller
    Error {
        /// Numeric code, when the controller sent one
        code: Option<u16>,
        /// Raw line
        text: String,
    },
    /// Alarm raised by the controller
    Alarm {
        /// Numeric code, when the controller sent one
        code: Option<u16>,
        /// Raw line
        text: String,
    },
    /// Any other text
    Message(String),
}

impl Response {
    /// Classify a complete, trimmed text line
    pub fn classify(line: &str) -> Self {
        let line = line.trim();

        if let Some(rest) = strip_prefix_ignore_case(line, "error:") {
            return Self::Error {
                code: rest.trim().parse().ok(),
                text: line.to_string(),
            };
        }

        if let Some(rest) = strip_prefix_ignore_case(line, "ALARM:") {
            return Self::Alarm {
                code: rest.trim().parse().ok(),
                text: line.to_string(),
            };
        }

        if contains_ack(line) {
            return Self::Ok;
        }

        Self::Message(line.to_string())
    }

    /// Check if this response ends the outstanding line
    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Ok | Self::Error { .. })
    }

    /// Readable message, with the code decoded where possible
    pub fn describe(&self) -> String {
        match self {
            Self::Ok => ACK_TOKEN.to_string(),
            Self::Error {
                code: Some(code), ..
            } => format_error(*code),
            Self::Alarm {
                code: Some(code), ..
            } => format_alarm(*code),
            Self::Error { text, .. } | Self::Alarm { text, .. } => text.clone(),
            Self::Message(text) => text.clone(),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &line[prefix.len()..])
}

/// True when `ok` appears as a whole word
fn contains_ack(line: &str) -> bool {
    line.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word == ACK_TOKEN)
}
