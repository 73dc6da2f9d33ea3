//! Session state and input routing.

use crate::registry::ThreadTarget;
use crate::session::commands::{self, Command, Outbound};

/// Package a fresh session evaluates in.
pub const DEFAULT_PACKAGE: &str = "COMMON-LISP-USER";

/// Prompt shown before the server reports its own.
pub const DEFAULT_PROMPT: &str = "CL-USER";

/// Thread designator used until the debugger names one.
pub const MAIN_THREAD: &str = "0";

/// A server thread blocked reading a line from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRead {
    pub thread: String,
    pub tag: String,
}

/// Mutable state of one SWANK session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub current_package: String,
    pub prompt: String,
    pub debug_activated: bool,
    pub current_thread: String,
    pub pending_read: Option<PendingRead>,
    /// Port of the dedicated output stream, once the server opened one.
    pub output_port: Option<u16>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            current_package: DEFAULT_PACKAGE.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            debug_activated: false,
            current_thread: MAIN_THREAD.to_string(),
            pending_read: None,
            output_port: None,
        }
    }
}

impl SessionState {
    /// The prompt as it appears in the transcript.
    pub fn prompt_line(&self) -> String {
        format!("{}> ", self.prompt)
    }

    /// Decide what a line of user input means in the current mode.
    ///
    /// In order: an answer to a pending read, a debugger shorthand, inspector
    /// navigation, or plain evaluation in `package` (falling back to the
    /// current package).
    pub fn route_input(&self, line: &str, package: Option<&str>) -> Outbound {
        if let Some(read) = &self.pending_read {
            return Outbound::Raw(commands::return_string(read, line));
        }

        let first = line.chars().next();

        if self.debug_activated && !matches!(first, None | Some('(') | Some(' ')) {
            return Outbound::Request(self.debugger_command(line));
        }

        if first == Some('[') {
            if let Some(command) = inspector_command(line) {
                return Outbound::Request(command);
            }
        }

        let package = package
            .filter(|p| !p.is_empty())
            .unwrap_or(self.current_package.as_str());
        Outbound::Request(commands::listener_eval(line, package))
    }

    fn debugger_command(&self, line: &str) -> Command {
        let thread = ThreadTarget::Id(self.current_thread.clone());
        let mut chars = line.chars();
        let first = chars.next().map(|c| c.to_ascii_lowercase());

        match first {
            Some('#') => commands::frame_locals(chars.as_str().trim(), thread),
            Some('q') => commands::throw_to_toplevel(thread),
            Some('a') => commands::sldb_abort(thread),
            Some('c') => commands::sldb_continue(thread),
            _ => commands::invoke_nth_restart("1", line.trim(), thread),
        }
    }
}

/// `[-` or `[<<` pops, `[n]` selects part `n`.
fn inspector_command(line: &str) -> Option<Command> {
    let rest = line.strip_prefix('[')?;
    if rest.starts_with('-') || rest.starts_with("<<") {
        return Some(commands::inspector_pop());
    }

    let rest = rest.trim_end();
    let inner = rest.strip_suffix(']').unwrap_or(rest).trim();
    inner.parse().ok().map(commands::inspect_nth_part)
}
