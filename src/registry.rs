//! Request/reply correlation for `:emacs-rex` requests.
//!
//! Requests are fire-and-forget: the server answers each one later with a
//! `(:return <value> <id>)` message, possibly after unrelated pushes and out
//! of order with respect to other requests. The registry hands out ids,
//! remembers what each id was for, and lets the host collect finished
//! results without blocking.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::sexpr::requote;

/// The server thread a request should run in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadTarget {
    /// Any thread (`t`).
    Any,
    /// The listener thread (`:repl-thread`).
    Repl,
    /// A specific thread, e.g. the one the debugger was activated in.
    Id(String),
}

impl fmt::Display for ThreadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadTarget::Any => f.write_str("t"),
            ThreadTarget::Repl => f.write_str(":repl-thread"),
            ThreadTarget::Id(id) => f.write_str(id),
        }
    }
}

/// An outstanding (or finished but not yet collected) request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingAction {
    /// Request id, unique within a session.
    pub id: u64,
    /// Logical command name, e.g. `listener-eval`.
    pub name: String,
    /// True until the matching `:return` arrives.
    pub pending: bool,
    /// Text accumulated when the reply was handled.
    pub result: String,
    /// When the request was sent.
    pub submitted_at: DateTime<Utc>,
}

/// Id allocator and pending-action table.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    /// Last id handed out; ids start at 1.
    last_id: u64,
    /// Actions keyed by id, so iteration order is submission order.
    actions: BTreeMap<u64, PendingAction>,
}

impl RequestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and build its `:emacs-rex` payload.
    ///
    /// `package` of `None` is sent as `nil`; a package name is sent as a
    /// string literal. Returns the allocated id and the payload to frame.
    pub fn submit(
        &mut self,
        name: &str,
        command: &str,
        package: Option<&str>,
        thread: &ThreadTarget,
    ) -> (u64, String) {
        self.last_id += 1;
        let id = self.last_id;

        self.actions.insert(
            id,
            PendingAction {
                id,
                name: name.to_string(),
                pending: true,
                result: String::new(),
                submitted_at: Utc::now(),
            },
        );

        let package = package.map_or_else(|| "nil".to_string(), requote);
        let payload = format!("(:emacs-rex {} {} {} {})", command, package, thread, id);
        (id, payload)
    }

    /// Mark the action with wire id `id` as finished with `text`.
    ///
    /// An action finishes once. Returns `false` (and logs) when no action
    /// has that id or it already finished; its stored result is kept.
    pub fn resolve(&mut self, id: &str, text: &str) -> bool {
        let action = id
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|key| self.actions.get_mut(&key));

        match action {
            Some(action) if !action.pending => {
                warn!("Duplicate reply for request id {} ignored", id);
                false
            }
            Some(action) => {
                action.pending = false;
                action.result = text.to_string();
                true
            }
            None => {
                warn!("Reply for unknown request id {}", id);
                false
            }
        }
    }

    /// Remove and return the oldest finished action, optionally by name.
    ///
    /// Pending actions are never returned.
    pub fn take_first_matching(&mut self, name: Option<&str>) -> Option<PendingAction> {
        let key = self
            .actions
            .values()
            .find(|a| !a.pending && name.map_or(true, |n| n == a.name))
            .map(|a| a.id)?;
        self.actions.remove(&key)
    }

    /// Look up an action by id.
    pub fn get(&self, id: u64) -> Option<&PendingAction> {
        self.actions.get(&id)
    }

    /// Number of actions not yet collected, finished or not.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True when nothing is outstanding or waiting to be collected.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of actions still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.actions.values().filter(|a| a.pending).count()
    }

    /// Dump the action table at debug level.
    pub fn log_actions(&self) {
        for action in self.actions.values() {
            let state = if action.pending { "pending " } else { "finished" };
            debug!(
                "{}: {} {} (sent {}) {:?}",
                action.id,
                state,
                action.name,
                action.submitted_at.format("%H:%M:%S%.3f"),
                action.result
            );
        }
    }
}
