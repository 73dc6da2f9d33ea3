//! SWANK session: connection, request correlation and message dispatch.
//!
//! A [`Session`] owns everything one connection needs: the framed stream,
//! the [`RequestRegistry`] and the [`SessionState`]. The host drives it with
//! short [`Session::poll`] calls from its own event loop; each poll handles
//! at most `max_messages` frames and returns the text they produced.
//!
//! ```ignore
//! let mut session = Session::new(&Config::load()?);
//! session.connect("localhost", 4005).await?;
//! session.submit(commands::create_repl()).await?;
//!
//! let mut transcript = Transcript::new();
//! loop {
//!     session.poll(&mut transcript).await?;
//!     print!("{}", transcript.take_text());
//! }
//! ```

pub mod commands;
mod message;
mod state;

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::inspector::format_inspector;
use crate::ipc::{SwankConnection, SwankError};
use crate::registry::{PendingAction, RequestRegistry};
use crate::sexpr::{plist_get, Node, Parser};
use crate::sink::HostSink;

pub use commands::{Command, Outbound};
pub use message::{DebugInfo, Message, ReturnValue};
pub use state::{PendingRead, SessionState, DEFAULT_PACKAGE, DEFAULT_PROMPT, MAIN_THREAD};

/// What the poll loop should do after a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading frames.
    Continue,
    /// End this poll.
    Stop,
    /// Send this raw message, then keep reading.
    Reply(String),
}

/// One client session with a SWANK server.
pub struct Session {
    state: SessionState,
    registry: RequestRegistry,
    connection: Option<SwankConnection>,
    parser: Parser,
    max_messages: usize,
    poll_timeout: Duration,
    connect_attempts: u32,
    /// Port the session connected to, shown in the banner.
    input_port: u16,
    /// Whether the transcript emitted so far ends at the start of a line.
    at_line_start: bool,
    /// Last `swank_connected` value given to the host.
    published_connected: Option<bool>,
}

impl Session {
    /// Create a disconnected session.
    pub fn new(config: &Config) -> Self {
        Self {
            state: SessionState::default(),
            registry: RequestRegistry::new(),
            connection: None,
            parser: Parser::new(config.max_depth),
            max_messages: config.max_messages.max(1),
            poll_timeout: config.poll_timeout(),
            connect_attempts: config.connect_attempts.max(1),
            input_port: config.port,
            at_line_start: true,
            published_connected: None,
        }
    }

    /// Current package, prompt and mode flags.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Requests sent and not yet collected.
    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    /// Check if a connection is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Connect over TCP and request the server's connection info.
    ///
    /// Retries up to the configured number of attempts. Returns the id of
    /// the `connection-info` request.
    ///
    /// # Errors
    ///
    /// Returns `SwankError::ConnectionFailed` if every attempt fails.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<u64, SwankError> {
        let mut connection =
            SwankConnection::connect_with_retry(host, port, self.connect_attempts).await?;
        connection.set_poll_timeout(self.poll_timeout);
        info!("Connected to SWANK server at {}:{}", host, port);
        self.attach(connection, port).await
    }

    /// Start a session on an already-open connection.
    ///
    /// Resets state and the registry, then sends `connection-info`.
    pub async fn attach(
        &mut self,
        connection: SwankConnection,
        port: u16,
    ) -> Result<u64, SwankError> {
        self.reset();
        self.connection = Some(connection);
        self.input_port = port;
        self.submit(commands::connection_info()).await
    }

    /// Close the connection and reset the session.
    pub fn disconnect(&mut self, sink: &mut dyn HostSink) {
        self.drop_connection();
        self.publish_connected(sink);
    }

    fn drop_connection(&mut self) {
        if self.connection.take().is_some() {
            info!("Connection to SWANK server is closed.");
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = SessionState::default();
        self.registry = RequestRegistry::new();
        self.at_line_start = true;
    }

    fn publish_connected(&mut self, sink: &mut dyn HostSink) {
        let connected = self.is_connected();
        if self.published_connected != Some(connected) {
            sink.set_variable("swank_connected", if connected { "1" } else { "0" });
            self.published_connected = Some(connected);
        }
    }

    /// Register and send a request. Returns its id.
    ///
    /// # Errors
    ///
    /// Returns `SwankError::NotConnected` without a connection. A failed send
    /// disconnects the session and returns the transport error.
    pub async fn submit(&mut self, command: Command) -> Result<u64, SwankError> {
        if self.connection.is_none() {
            return Err(SwankError::NotConnected);
        }
        let (id, payload) = self.registry.submit(
            command.name,
            &command.form,
            command.package.as_deref(),
            &command.thread,
        );
        self.send_raw(&payload).await?;
        Ok(id)
    }

    /// Send a message that gets no reply.
    ///
    /// # Errors
    ///
    /// Same as [`Session::submit`].
    pub async fn send_raw(&mut self, payload: &str) -> Result<(), SwankError> {
        let connection = self.connection.as_mut().ok_or(SwankError::NotConnected)?;
        if let Err(e) = connection.send(payload).await {
            error!("Socket error when sending to SWANK server: {}", e);
            self.drop_connection();
            return Err(e);
        }
        Ok(())
    }

    /// Send a line of user input, routed by the current mode.
    ///
    /// Returns the request id, or `None` for an answer to a pending read.
    ///
    /// # Errors
    ///
    /// Same as [`Session::submit`].
    pub async fn send_input(
        &mut self,
        line: &str,
        package: Option<&str>,
    ) -> Result<Option<u64>, SwankError> {
        // The user's own newline ends the transcript line.
        self.at_line_start = true;
        match self.state.route_input(line, package) {
            Outbound::Request(command) => self.submit(command).await.map(Some),
            Outbound::Raw(payload) => self.send_raw(&payload).await.map(|()| None),
        }
    }

    /// Interrupt the listener thread.
    ///
    /// # Errors
    ///
    /// Same as [`Session::submit`].
    pub async fn interrupt(&mut self) -> Result<(), SwankError> {
        self.send_raw(&commands::interrupt()).await
    }

    /// Handle the frames available now, up to `max_messages`.
    ///
    /// The produced text is emitted to `sink` and also returned.
    ///
    /// # Errors
    ///
    /// Returns `SwankError::NotConnected` without a connection, or the
    /// transport error that broke the connection. In the latter case the
    /// session is reset, and text handled before the failure is still
    /// emitted.
    pub async fn poll(&mut self, sink: &mut dyn HostSink) -> Result<String, SwankError> {
        self.publish_connected(sink);
        if self.connection.is_none() {
            return Err(SwankError::NotConnected);
        }

        let mut out = String::new();
        let mut result = Ok(());

        for _ in 0..self.max_messages {
            let frame = match self.connection.as_mut() {
                Some(connection) => connection.poll_frame().await,
                None => break,
            };
            let payload = match frame {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(e) => {
                    warn!("Lost connection to SWANK server: {}", e);
                    self.drop_connection();
                    result = Err(e);
                    break;
                }
            };

            match self.handle_frame(payload, &mut out, sink) {
                Flow::Continue => {}
                Flow::Stop => break,
                Flow::Reply(reply) => {
                    if let Err(e) = self.send_raw(&reply).await {
                        result = Err(e);
                        break;
                    }
                }
            }
        }

        if !out.is_empty() {
            sink.emit_text(&out);
            self.at_line_start = out.ends_with('\n');
        }
        self.publish_connected(sink);
        result.map(|()| out)
    }

    /// Decode a raw frame body as UTF-8 and handle it.
    ///
    /// A body that is not valid UTF-8 is logged and skipped; the frame was
    /// read whole, so the connection stays usable.
    pub fn handle_frame(&mut self, body: Vec<u8>, out: &mut String, sink: &mut dyn HostSink) -> Flow {
        match String::from_utf8(body) {
            Ok(payload) => self.handle_payload(&payload, out, sink),
            Err(e) => {
                warn!(
                    "Discarding frame that is not valid UTF-8 ({}): {}",
                    e.utf8_error(),
                    String::from_utf8_lossy(e.as_bytes())
                );
                Flow::Continue
            }
        }
    }

    /// Parse, decode and dispatch one frame payload.
    ///
    /// Unparsable and malformed frames are logged and skipped.
    pub fn handle_payload(
        &mut self,
        payload: &str,
        out: &mut String,
        sink: &mut dyn HostSink,
    ) -> Flow {
        let node = match self.parser.parse(payload) {
            Ok(parsed) => parsed.node,
            Err(e) => {
                warn!("Discarding unparsable frame ({}), partial: {}", e, e.partial);
                return Flow::Continue;
            }
        };

        match Message::from_node(&node) {
            Ok(message) => self.dispatch(message, out, sink),
            Err(e) => {
                warn!("Discarding frame {}: {}", node, e);
                Flow::Continue
            }
        }
    }

    /// Apply one message to the session, appending visible text to `out`.
    ///
    /// Inspector views replace `out` instead, so an inspector action
    /// resolves with the view alone.
    pub fn dispatch(&mut self, message: Message, out: &mut String, sink: &mut dyn HostSink) -> Flow {
        match message {
            Message::OpenDedicatedOutputStream { port } => {
                debug!("Server opened dedicated output stream on port {}", port);
                self.state.output_port = Some(port);
                return Flow::Stop;
            }
            Message::WriteString { text } => out.push_str(&text),
            Message::ReadString { thread, tag } => {
                self.state.pending_read = Some(PendingRead { thread, tag });
            }
            Message::NewPackage { package, prompt } => {
                self.state.current_package = package;
                self.state.prompt = prompt;
            }
            Message::Return { value, id } => self.handle_return(value, id, out, sink),
            Message::Inspect { payload } => *out = format_inspector(&payload),
            Message::Debug(info) => self.render_debug(&info, out),
            Message::DebugActivate { thread, level } => {
                debug!("Debugger activated in thread {} at level {}", thread, level);
                self.state.current_thread = thread;
                self.set_debug_activated(true, sink);
            }
            Message::DebugReturn { level, .. } => {
                self.set_debug_activated(false, sink);
                out.push_str(&format!("; Quit to level {}\n", level));
                out.push_str(&self.state.prompt_line());
            }
            Message::Ping { thread, tag } => return Flow::Reply(commands::pong(&thread, &tag)),
            Message::Unknown { tag } => debug!("Ignoring message {}", tag),
        }
        Flow::Continue
    }

    /// Collect the oldest finished action, optionally by command name.
    ///
    /// Emits its text and updates `swank_action` and
    /// `swank_actions_pending`.
    pub fn take_action_result(
        &mut self,
        name: Option<&str>,
        sink: &mut dyn HostSink,
    ) -> Option<PendingAction> {
        let action = self.registry.take_first_matching(name);
        match &action {
            Some(action) => {
                sink.set_variable("swank_action", &action.name);
                sink.emit_text(&action.result);
            }
            None => sink.set_variable("swank_action", ""),
        }
        sink.set_variable("swank_actions_pending", &self.registry.len().to_string());
        action
    }

    fn set_debug_activated(&mut self, active: bool, sink: &mut dyn HostSink) {
        self.state.debug_activated = active;
        sink.set_variable("debug_activated", if active { "1" } else { "0" });
    }

    fn handle_return(
        &mut self,
        value: ReturnValue,
        id: Option<String>,
        out: &mut String,
        sink: &mut dyn HostSink,
    ) {
        self.state.pending_read = None;

        match value {
            ReturnValue::Ok(node) => self.render_ok(&node, out, sink),
            ReturnValue::Abort(reason) => {
                self.set_debug_activated(false, sink);
                match reason {
                    Some(reason) => out.push_str(&format!("; Evaluation aborted on {}\n", reason)),
                    None => out.push_str("; Evaluation aborted\n"),
                }
                out.push_str(&self.state.prompt_line());
            }
            ReturnValue::Other(status) => debug!("Unhandled return status {}", status),
        }

        if let Some(id) = id {
            self.registry.resolve(&id, out);
        }
        self.registry.log_actions();
    }

    fn render_ok(&mut self, value: &Node, out: &mut String, sink: &mut dyn HostSink) {
        let items = match value {
            Node::Atom(_) if value.is_nil() => {
                self.finish_line(out);
                out.push_str(&self.state.prompt_line());
                return;
            }
            Node::Atom(_) => {
                out.push_str(&value.text().unwrap_or_default());
                return;
            }
            Node::List(items) => match items.first() {
                Some(Node::List(inner)) => inner.as_slice(),
                _ => items.as_slice(),
            },
        };

        let tag = items
            .first()
            .and_then(Node::as_atom)
            .unwrap_or_default()
            .to_ascii_lowercase();

        match tag.as_str() {
            ":present" => {
                let presented = items.get(1).and_then(Node::as_list).unwrap_or_default();
                for entry in presented {
                    let text = match entry {
                        Node::List(parts) => parts.first().and_then(Node::text),
                        Node::Atom(_) => entry.text(),
                    };
                    out.push_str(&text.unwrap_or_default());
                    out.push('\n');
                }
                out.push_str(&self.state.prompt_line());
            }
            ":values" => {
                for value in &items[1..] {
                    out.push_str(&value.text().unwrap_or_else(|| value.to_string()));
                    out.push('\n');
                }
            }
            ":suppress-output" => {}
            ":pid" => self.render_connection_info(items, out, sink),
            ":name" => {
                let name = plist_get(items, ":name").and_then(Node::text).unwrap_or_default();
                let value = plist_get(items, ":value").and_then(Node::text).unwrap_or_default();
                out.push_str(&format!("  {} = {}\n", name, value));
            }
            ":title" => *out = format_inspector(items),
            _ => debug!("Unhandled return value {}", value),
        }
    }

    /// Banner for the `connection-info` reply; also adopts the server's
    /// package and prompt.
    fn render_connection_info(&mut self, info: &[Node], out: &mut String, sink: &mut dyn HostSink) {
        let text_of = |key: &str| plist_get(info, key).and_then(Node::text).unwrap_or_default();
        let pid = text_of(":pid");
        let version = text_of(":version");
        let imp_type = plist_get(info, ":lisp-implementation")
            .and_then(Node::as_list)
            .and_then(|imp| plist_get(imp, ":type"))
            .and_then(Node::text)
            .unwrap_or_default();

        if let Some(package) = plist_get(info, ":package").and_then(Node::as_list) {
            if let Some(name) = plist_get(package, ":name").and_then(Node::text) {
                self.state.current_package = name;
            }
            if let Some(prompt) = plist_get(package, ":prompt").and_then(Node::text) {
                self.state.prompt = prompt;
            }
        }

        sink.set_variable("swank_version", &version);
        out.push_str(&format!(
            "{}  Port: {}  Pid: {}\n; SWANK {}",
            imp_type, self.input_port, pid, version
        ));
    }

    fn render_debug(&self, info: &DebugInfo, out: &mut String) {
        out.push('\n');
        for line in info.condition.iter().take(2) {
            out.push_str(line);
            out.push('\n');
        }

        out.push_str("\nRestarts:\n");
        for (index, (name, description)) in info.restarts.iter().enumerate() {
            out.push_str(&format!("{:>3}: [{}] {}\n", index, name, description));
        }

        out.push_str("\nBacktrace:\n");
        for (index, description) in &info.frames {
            out.push_str(&format!("{:>3}: {}\n", index, description));
        }

        out.push_str(&self.state.prompt_line());
    }

    /// Start a new line unless the transcript is already at one.
    fn finish_line(&self, out: &mut String) {
        let at_line_start = match out.chars().last() {
            Some(last) => last == '\n',
            None => self.at_line_start,
        };
        if !at_line_start {
            out.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Transcript;
    use pretty_assertions::assert_eq;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn session() -> Session {
        Session::new(&Config::default())
    }

    fn feed(session: &mut Session, frames: &[&str]) -> (String, Transcript) {
        let mut out = String::new();
        let mut sink = Transcript::new();
        for frame in frames {
            session.handle_payload(frame, &mut out, &mut sink);
        }
        (out, sink)
    }

    /// A session attached to one end of an in-memory pipe.
    async fn attached() -> (Session, DuplexStream) {
        let (client, server) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut connection = SwankConnection::from_parts(read_half, write_half);
        connection.set_poll_timeout(Duration::from_millis(20));

        let mut session = session();
        session.attach(connection, 4005).await.unwrap();
        (session, server)
    }

    async fn read_payload(server: &mut DuplexStream) -> String {
        let mut header = [0u8; 6];
        server.read_exact(&mut header).await.unwrap();
        let len = usize::from_str_radix(std::str::from_utf8(&header).unwrap(), 16).unwrap();
        let mut body = vec![0u8; len];
        server.read_exact(&mut body).await.unwrap();
        String::from_utf8(body).unwrap()
    }

    async fn write_payload(server: &mut DuplexStream, payload: &str) {
        let frame = format!("{:06x}{}", payload.len(), payload);
        server.write_all(frame.as_bytes()).await.unwrap();
    }

    #[test]
    fn test_new_package_then_nil_prompt() {
        let mut s = session();
        let (out, _) = feed(
            &mut s,
            &[
                "(:new-package \"CL-USER\" \"CL-USER\")",
                "(:write-string \"done\n\" :repl-result)",
                "(:return (:ok nil) 3)",
            ],
        );
        assert_eq!(s.state().current_package, "CL-USER");
        assert_eq!(s.state().prompt, "CL-USER");
        assert_eq!(out, "done\nCL-USER> ");
    }

    #[test]
    fn test_nil_adds_single_newline_after_partial_line() {
        let mut s = session();
        let (out, _) = feed(
            &mut s,
            &["(:write-string \"done\")", "(:return (:ok nil) 3)"],
        );
        assert_eq!(out, "done\nCL-USER> ");
    }

    #[test]
    fn test_values_resolve_action() {
        let mut s = session();
        let (id, payload) = s.registry.submit(
            "listener-eval",
            "(swank:listener-eval \"(+ 1 2)\")",
            None,
            &crate::registry::ThreadTarget::Repl,
        );
        assert_eq!(
            payload,
            "(:emacs-rex (swank:listener-eval \"(+ 1 2)\") nil :repl-thread 1)"
        );

        let (out, _) = feed(&mut s, &["(:return (:ok (:values \"3\")) 1)"]);
        assert_eq!(out, "3\n");

        let action = s.registry().get(id).unwrap();
        assert!(!action.pending);
        assert_eq!(action.result, "3\n");
        assert_eq!(s.registry().pending_count(), 0);
    }

    #[test]
    fn test_unknown_return_id_still_shows_text() {
        let mut s = session();
        let (out, _) = feed(&mut s, &["(:return (:ok \"hello\") 99)"]);
        assert_eq!(out, "hello");
        assert!(s.registry().is_empty());
    }

    #[test]
    fn test_present_renders_values_and_prompt() {
        let mut s = session();
        let (out, _) = feed(
            &mut s,
            &["(:return (:ok (:present ((\"1\" . 0) (\"2\" . 1)))) 4)"],
        );
        assert_eq!(out, "1\n2\nCL-USER> ");
    }

    #[test]
    fn test_debugger_lifecycle() {
        let mut s = session();
        let (out, sink) = feed(&mut s, &["(:debug-activate 1 1 nil)"]);
        assert!(out.is_empty());
        assert!(s.state().debug_activated);
        assert_eq!(s.state().current_thread, "1");
        assert_eq!(sink.variable("debug_activated"), Some("1"));

        let (out, sink) = feed(&mut s, &["(:debug-return 1 1 nil)"]);
        assert!(!s.state().debug_activated);
        assert_eq!(out, "; Quit to level 1\nCL-USER> ");
        assert_eq!(sink.variable("debug_activated"), Some("0"));
    }

    #[test]
    fn test_abort_clears_debugger() {
        let mut s = session();
        feed(&mut s, &["(:debug-activate 2 1 nil)"]);
        let (out, _) = feed(&mut s, &["(:return (:abort \"SIMPLE-ERROR\") 5)"]);
        assert!(!s.state().debug_activated);
        assert_eq!(out, "; Evaluation aborted on SIMPLE-ERROR\nCL-USER> ");

        let (out, _) = feed(&mut s, &["(:return (:abort) 6)"]);
        assert_eq!(out, "; Evaluation aborted\nCL-USER> ");
    }

    #[test]
    fn test_debug_rendering() {
        let mut s = session();
        let text = "(:debug 1 1 (\"arithmetic error\" \"  [Condition of type DIVISION-BY-ZERO]\" nil) ((\"RETRY\" \"Retry\") (\"ABORT\" \"Return to top level.\")) ((0 \"(SB-KERNEL::INTEGER-/-INTEGER 1 0)\") (1 \"(/ 1\\n 0)\")) (nil))";
        let (out, _) = feed(&mut s, &[text]);
        assert_eq!(
            out,
            "\narithmetic error\n  [Condition of type DIVISION-BY-ZERO]\n\
             \nRestarts:\n  0: [RETRY] Retry\n  1: [ABORT] Return to top level.\n\
             \nBacktrace:\n  0: (SB-KERNEL::INTEGER-/-INTEGER 1 0)\n  1: (/ 1 0)\n\
             CL-USER> "
        );
        assert!(!s.state().debug_activated);
    }

    #[test]
    fn test_read_string_until_return() {
        let mut s = session();
        feed(&mut s, &["(:read-string 1 7)"]);
        assert_eq!(
            s.state().pending_read,
            Some(PendingRead {
                thread: "1".into(),
                tag: "7".into()
            })
        );
        feed(&mut s, &["(:return (:ok nil) 2)"]);
        assert_eq!(s.state().pending_read, None);
    }

    #[test]
    fn test_connection_info_banner() {
        let mut s = session();
        let text = "(:return (:ok (:pid 4242 :style :spawn :lisp-implementation (:type \"SBCL\" :name \"sbcl\" :version \"2.4.0\") :package (:name \"COMMON-LISP-USER\" :prompt \"CL-USER\") :version \"2.29\")) 1)";
        let (out, sink) = feed(&mut s, &[text]);
        assert_eq!(out, "SBCL  Port: 4005  Pid: 4242\n; SWANK 2.29");
        assert_eq!(sink.variable("swank_version"), Some("2.29"));
        assert_eq!(s.state().prompt, "CL-USER");
    }

    #[test]
    fn test_inspect_and_name_rendering() {
        let mut s = session();
        let (out, _) = feed(
            &mut s,
            &["(:inspect (:title \"42\" :content ((\"Value\" \": \" (:value \"42\" 0)) 0 0 0)))"],
        );
        assert_eq!(
            out,
            "\n \nInspecting 42\n--------------------\n[0]  Value: 42\n \n[<<]"
        );

        let (out, _) = feed(&mut s, &["(:return (:ok (:name \"x\" :value \"1\")) 2)"]);
        assert_eq!(out, "  x = 1\n");

        // Keys are only matched at key positions.
        let (out, _) = feed(&mut s, &["(:return (:ok (:name :value :value \"1\")) 3)"]);
        assert_eq!(out, "  :value = 1\n");
    }

    #[test]
    fn test_inspector_view_replaces_earlier_output() {
        let mut s = session();
        let (id, _) = s.registry.submit(
            "init-inspector",
            "(swank:init-inspector \"*x*\")",
            None,
            &crate::registry::ThreadTarget::Any,
        );
        let view = "\n \nInspecting 42\n--------------------\n[0]  Value: 42\n \n[<<]";

        let (out, _) = feed(
            &mut s,
            &[
                "(:write-string \"noise\")",
                "(:return (:ok (:title \"42\" :id 0 :content ((\"Value\" \": \" (:value \"42\" 0)) 0 0 0))) 1)",
            ],
        );
        assert_eq!(out, view);
        assert_eq!(s.registry().get(id).unwrap().result, view);

        let (out, _) = feed(
            &mut s,
            &[
                "(:write-string \"noise\")",
                "(:inspect (:title \"42\" :content ((\"Value\" \": \" (:value \"42\" 0)) 0 0 0)))",
            ],
        );
        assert_eq!(out, view);
    }

    #[test]
    fn test_flow_control_messages() {
        let mut s = session();
        let mut out = String::new();
        let mut sink = Transcript::new();

        assert_eq!(
            s.handle_payload("(:ping 1 5)", &mut out, &mut sink),
            Flow::Reply("(:emacs-pong 1 5)".to_string())
        );
        assert_eq!(
            s.handle_payload("(:open-dedicated-output-stream 4006)", &mut out, &mut sink),
            Flow::Stop
        );
        assert_eq!(s.state().output_port, Some(4006));
    }

    #[test]
    fn test_bad_frames_are_skipped() {
        let mut s = session();
        let before = s.state().clone();
        let (out, _) = feed(
            &mut s,
            &["(:return (:ok", "(:new-package \"X\")", "(:frobnicate 1)", "   "],
        );
        assert!(out.is_empty());
        assert_eq!(s.state(), &before);
    }

    #[test]
    fn test_take_action_result() {
        let mut s = session();
        let (id, _) = s.registry.submit(
            "describe-symbol",
            "(swank:describe-symbol \"car\")",
            None,
            &crate::registry::ThreadTarget::Any,
        );
        s.registry.resolve(&id.to_string(), "CAR names a function");

        let mut sink = Transcript::new();
        assert!(s.take_action_result(Some("listener-eval"), &mut sink).is_none());
        assert_eq!(sink.variable("swank_action"), Some(""));

        let action = s.take_action_result(Some("describe-symbol"), &mut sink).unwrap();
        assert_eq!(action.id, id);
        assert_eq!(sink.text, "CAR names a function");
        assert_eq!(sink.variable("swank_action"), Some("describe-symbol"));
        assert_eq!(sink.variable("swank_actions_pending"), Some("0"));
    }

    #[tokio::test]
    async fn test_poll_without_connection() {
        let mut s = session();
        let mut sink = Transcript::new();
        let err = s.poll(&mut sink).await.unwrap_err();
        assert!(matches!(err, SwankError::NotConnected));
        assert_eq!(sink.variable("swank_connected"), Some("0"));

        assert!(matches!(
            s.send_input("(+ 1 2)", None).await,
            Err(SwankError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_poll_answers_ping_and_evaluates() {
        let (mut s, mut server) = attached().await;
        assert_eq!(
            read_payload(&mut server).await,
            "(:emacs-rex (swank:connection-info) nil t 1)"
        );

        let id = s.send_input("(+ 1 2)", None).await.unwrap();
        assert_eq!(id, Some(2));
        assert_eq!(
            read_payload(&mut server).await,
            "(:emacs-rex (swank:listener-eval \"(+ 1 2)\") \"COMMON-LISP-USER\" :repl-thread 2)"
        );

        write_payload(&mut server, "(:ping 1 9)").await;
        write_payload(&mut server, "(:return (:ok (:values \"3\")) 2)").await;

        let mut sink = Transcript::new();
        let out = s.poll(&mut sink).await.unwrap();
        assert_eq!(out, "3\n");
        assert_eq!(sink.text, "3\n");
        assert_eq!(sink.variable("swank_connected"), Some("1"));
        assert_eq!(read_payload(&mut server).await, "(:emacs-pong 1 9)");

        let action = s.take_action_result(Some("listener-eval"), &mut sink).unwrap();
        assert_eq!(action.result, "3\n");
    }

    #[tokio::test]
    async fn test_poll_respects_message_limit() {
        let config = Config {
            max_messages: 2,
            ..Config::default()
        };
        let (client, mut server) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut connection = SwankConnection::from_parts(read_half, write_half);
        connection.set_poll_timeout(Duration::from_millis(20));
        let mut s = Session::new(&config);
        s.attach(connection, 4005).await.unwrap();

        for text in ["a", "b", "c"] {
            write_payload(&mut server, &format!("(:write-string \"{}\")", text)).await;
        }

        let mut sink = Transcript::new();
        assert_eq!(s.poll(&mut sink).await.unwrap(), "ab");
        assert_eq!(s.poll(&mut sink).await.unwrap(), "c");
        assert_eq!(s.poll(&mut sink).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_non_utf8_frame_is_skipped() {
        let (mut s, mut server) = attached().await;
        read_payload(&mut server).await;

        server.write_all(b"000004\xff\xfe\xfd\xfc").await.unwrap();
        write_payload(&mut server, "(:write-string \"after\")").await;

        let mut sink = Transcript::new();
        assert_eq!(s.poll(&mut sink).await.unwrap(), "after");
        assert!(s.is_connected());
        assert_eq!(s.registry().pending_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_stream_disconnects() {
        let (mut s, mut server) = attached().await;
        write_payload(&mut server, "(:write-string \"bye\")").await;
        drop(server);

        let mut sink = Transcript::new();
        let err = s.poll(&mut sink).await.unwrap_err();
        assert!(matches!(err, SwankError::Transport(_)));
        assert_eq!(sink.text, "bye");
        assert!(!s.is_connected());
        assert_eq!(sink.variable("swank_connected"), Some("0"));
        assert!(s.registry().is_empty());
    }
}
