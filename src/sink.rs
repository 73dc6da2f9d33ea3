//! Host-facing output boundary.
//!
//! The session never prints. Everything the user should see goes through a
//! [`HostSink`], which an editor integration implements on top of its own
//! buffer and variable APIs.

use std::collections::HashMap;

/// Trait for the host that displays session output.
///
/// This trait abstracts the front end to enable:
/// - Embedding the session in any editor or terminal host
/// - Testing dispatch without a display
pub trait HostSink {
    /// Append text to the visible transcript.
    fn emit_text(&mut self, text: &str);

    /// Publish a named session flag, e.g. `debug_activated`.
    fn set_variable(&mut self, name: &str, value: &str);
}

/// A sink that records everything, for hosts that render later and for tests.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    /// Concatenated transcript text.
    pub text: String,
    /// Latest value of every variable set.
    pub variables: HashMap<String, String>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value of a variable, if it was ever set.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Take the recorded text, leaving the transcript empty.
    pub fn take_text(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

impl HostSink for Transcript {
    fn emit_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn set_variable(&mut self, name: &str, value: &str) {
        self.variables.insert(name.to_string(), value.to_string());
    }
}
