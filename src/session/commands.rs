//! Builders for client-to-server requests.
//!
//! [`Command`]s become `:emacs-rex` requests with an id and a reply. The
//! free functions returning `String` build raw messages that the server
//! never answers.

use crate::registry::ThreadTarget;
use crate::sexpr::requote;
use crate::session::state::PendingRead;

/// A request to run a SWANK function remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Logical name, used to collect the result later.
    pub name: &'static str,
    /// The form evaluated by the server.
    pub form: String,
    /// Package to evaluate in; `None` sends `nil`.
    pub package: Option<String>,
    /// Thread to evaluate in.
    pub thread: ThreadTarget,
}

impl Command {
    fn new(name: &'static str, form: String, thread: ThreadTarget) -> Self {
        Self {
            name,
            form,
            package: None,
            thread,
        }
    }
}

/// What to send for a line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A correlated request.
    Request(Command),
    /// A raw message with no reply.
    Raw(String),
}

/// Ask for the server's implementation, version, pid and package.
pub fn connection_info() -> Command {
    Command::new("connection-info", "(swank:connection-info)".into(), ThreadTarget::Any)
}

/// Create the listener REPL on the server.
pub fn create_repl() -> Command {
    Command::new("create-repl", "(swank:create-repl nil)".into(), ThreadTarget::Any)
}

/// Evaluate `expr` in the listener, in `package`.
pub fn listener_eval(expr: &str, package: &str) -> Command {
    Command {
        package: Some(package.to_string()),
        ..Command::new(
            "listener-eval",
            format!("(swank:listener-eval {})", requote(expr)),
            ThreadTarget::Repl,
        )
    }
}

/// Evaluate `expr` in the listener and pretty-print the result.
pub fn pprint_eval(expr: &str, package: &str) -> Command {
    Command {
        package: Some(package.to_string()),
        ..Command::new(
            "pprint-eval",
            format!("(swank:pprint-eval {})", requote(expr)),
            ThreadTarget::Repl,
        )
    }
}

/// Invoke a debugger restart. `level` and `restart` are sent verbatim.
pub fn invoke_nth_restart(level: &str, restart: &str, thread: ThreadTarget) -> Command {
    Command::new(
        "invoke-nth-restart-for-emacs",
        format!("(swank:invoke-nth-restart-for-emacs {} {})", level, restart),
        thread,
    )
}

/// Leave the debugger and return to the top level.
pub fn throw_to_toplevel(thread: ThreadTarget) -> Command {
    Command::new("throw-to-toplevel", "(swank:throw-to-toplevel)".into(), thread)
}

/// Abort the computation that entered the debugger.
pub fn sldb_abort(thread: ThreadTarget) -> Command {
    Command::new("sldb-abort", "(swank:sldb-abort)".into(), thread)
}

/// Continue from the debugger.
pub fn sldb_continue(thread: ThreadTarget) -> Command {
    Command::new("sldb-continue", "(swank:sldb-continue)".into(), thread)
}

/// Show the locals of a backtrace frame. `frame` is sent verbatim.
pub fn frame_locals(frame: &str, thread: ThreadTarget) -> Command {
    Command::new(
        "frame-locals-for-emacs",
        format!("(swank:frame-locals-for-emacs {})", frame),
        thread,
    )
}

/// Describe the symbol named `symbol`.
pub fn describe_symbol(symbol: &str) -> Command {
    Command::new(
        "describe-symbol",
        format!("(swank:describe-symbol {})", requote(symbol)),
        ThreadTarget::Any,
    )
}

/// Describe the function named `symbol`.
pub fn describe_function(symbol: &str) -> Command {
    Command::new(
        "describe-function",
        format!("(swank:describe-function {})", requote(symbol)),
        ThreadTarget::Any,
    )
}

/// Argument list of `operator` as seen from `package`.
pub fn operator_arglist(operator: &str, package: &str) -> Command {
    Command::new(
        "operator-arglist",
        format!(
            "(swank:operator-arglist {} {})",
            requote(operator),
            requote(package)
        ),
        ThreadTarget::Any,
    )
}

/// Open the inspector on the value of `symbol`.
pub fn init_inspector(symbol: &str) -> Command {
    Command::new(
        "init-inspector",
        format!("(swank:init-inspector {})", requote(symbol)),
        ThreadTarget::Any,
    )
}

/// Inspect part `part` of the current inspector object.
pub fn inspect_nth_part(part: u32) -> Command {
    Command::new(
        "inspect-nth-part",
        format!("(swank:inspect-nth-part {})", part),
        ThreadTarget::Any,
    )
}

/// Go back to the previously inspected object.
pub fn inspector_pop() -> Command {
    Command::new("inspector-pop", "(swank:inspector-pop)".into(), ThreadTarget::Any)
}

/// Toggle tracing of the function named `symbol`.
pub fn toggle_trace(symbol: &str) -> Command {
    Command::new(
        "swank-toggle-trace",
        format!("(swank:swank-toggle-trace {})", requote(symbol)),
        ThreadTarget::Any,
    )
}

/// Remove all traces.
pub fn untrace_all() -> Command {
    Command::new("untrace-all", "(swank:untrace-all)".into(), ThreadTarget::Any)
}

/// Interrupt whatever the listener thread is doing.
pub fn interrupt() -> String {
    "(:emacs-interrupt :repl-thread)".to_string()
}

/// Answer a `:read-string` request with one line of input.
pub fn return_string(read: &PendingRead, line: &str) -> String {
    format!(
        "(:emacs-return-string {} {} {})",
        read.thread,
        read.tag,
        requote(&format!("{}\n", line))
    )
}

/// Acknowledge a `:ping`.
pub fn pong(thread: &str, tag: &str) -> String {
    format!("(:emacs-pong {} {})", thread, tag)
}
