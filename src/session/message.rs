//! Typed view of server-to-client messages.
//!
//! Each frame holds one list whose first atom is the message tag. Decoding
//! into [`Message`] checks the shape once, so the dispatcher can match on
//! variants instead of indexing into raw lists.

use crate::ipc::SwankError;
use crate::sexpr::{unquote, Node};

/// A message pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `(:open-dedicated-output-stream port)`
    OpenDedicatedOutputStream { port: u16 },
    /// `(:write-string text ...)`
    WriteString { text: String },
    /// `(:read-string thread tag)`
    ReadString { thread: String, tag: String },
    /// `(:new-package package prompt)`
    NewPackage { package: String, prompt: String },
    /// `(:return (status ...) id)`
    Return { value: ReturnValue, id: Option<String> },
    /// `(:inspect plist ...)`
    Inspect { payload: Vec<Node> },
    /// `(:debug thread level condition restarts frames conts)`
    Debug(DebugInfo),
    /// `(:debug-activate thread level ...)`
    DebugActivate { thread: String, level: String },
    /// `(:debug-return thread level ...)`
    DebugReturn { thread: String, level: String },
    /// `(:ping thread tag)`
    Ping { thread: String, tag: String },
    /// Any tag this client does not handle.
    Unknown { tag: String },
}

/// Outcome carried by a `:return` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnValue {
    /// `(:ok value)`
    Ok(Node),
    /// `(:abort)` or `(:abort reason)`
    Abort(Option<String>),
    /// Any other status keyword.
    Other(String),
}

/// Contents of a `:debug` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub thread: String,
    pub level: String,
    /// Condition description lines, typically message then type.
    pub condition: Vec<String>,
    /// `(name, description)` per restart, in selection order.
    pub restarts: Vec<(String, String)>,
    /// `(index, description)` per backtrace frame, each on one line.
    pub frames: Vec<(String, String)>,
}

impl Message {
    /// Decode a parsed top-level list.
    ///
    /// # Errors
    ///
    /// Returns `SwankError::Protocol` if the node is not a tagged list, or a
    /// known tag is missing an element it requires.
    pub fn from_node(node: &Node) -> Result<Self, SwankError> {
        let items = node
            .as_list()
            .ok_or_else(|| protocol("message is not a list"))?;
        let tag = items
            .first()
            .and_then(Node::as_atom)
            .ok_or_else(|| protocol("message has no tag"))?
            .to_ascii_lowercase();

        let message = match tag.as_str() {
            ":open-dedicated-output-stream" => {
                let raw = atom_at(items, 1, &tag)?;
                let port = raw
                    .parse()
                    .map_err(|_| protocol(format!("{} has invalid port {}", tag, raw)))?;
                Message::OpenDedicatedOutputStream { port }
            }
            ":write-string" => Message::WriteString {
                text: text_at(items, 1, &tag)?,
            },
            ":read-string" => Message::ReadString {
                thread: atom_at(items, 1, &tag)?,
                tag: atom_at(items, 2, &tag)?,
            },
            ":new-package" => Message::NewPackage {
                package: text_at(items, 1, &tag)?,
                prompt: text_at(items, 2, &tag)?,
            },
            ":return" => decode_return(items)?,
            ":inspect" => Message::Inspect {
                payload: seq_at(items, 1, &tag)?.to_vec(),
            },
            ":debug" => Message::Debug(decode_debug(items)?),
            ":debug-activate" => Message::DebugActivate {
                thread: atom_at(items, 1, &tag)?,
                level: atom_at(items, 2, &tag)?,
            },
            ":debug-return" => Message::DebugReturn {
                thread: atom_at(items, 1, &tag)?,
                level: atom_at(items, 2, &tag)?,
            },
            ":ping" => Message::Ping {
                thread: atom_at(items, 1, &tag)?,
                tag: atom_at(items, 2, &tag)?,
            },
            _ => Message::Unknown { tag },
        };
        Ok(message)
    }
}

fn decode_return(items: &[Node]) -> Result<Message, SwankError> {
    let status = seq_at(items, 1, ":return")?;
    let keyword = status
        .first()
        .and_then(Node::as_atom)
        .ok_or_else(|| protocol(":return has no status"))?
        .to_ascii_lowercase();

    let value = match keyword.as_str() {
        ":ok" => ReturnValue::Ok(status.get(1).cloned().unwrap_or_else(|| Node::atom("nil"))),
        ":abort" => ReturnValue::Abort(status.get(1).map(|reason| match reason {
            Node::Atom(raw) => unquote(raw),
            Node::List(_) => reason.to_string(),
        })),
        _ => ReturnValue::Other(keyword),
    };

    let id = if items.len() > 2 {
        items.last().and_then(Node::as_atom).map(str::to_string)
    } else {
        None
    };

    Ok(Message::Return { value, id })
}

fn decode_debug(items: &[Node]) -> Result<DebugInfo, SwankError> {
    let tag = ":debug";
    let thread = atom_at(items, 1, tag)?;
    let level = atom_at(items, 2, tag)?;

    let condition = seq_at(items, 3, tag)?
        .iter()
        .filter_map(Node::text)
        .collect();

    let restarts = seq_at(items, 4, tag)?
        .iter()
        .map(|restart| pair_of(restart, tag))
        .collect::<Result<Vec<_>, _>>()?;

    let frames = seq_at(items, 5, tag)?
        .iter()
        .map(|frame| frame_of(frame, tag))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DebugInfo {
        thread,
        level,
        condition,
        restarts,
        frames,
    })
}

/// First two atoms of a sub-list, unquoted.
fn pair_of(node: &Node, tag: &str) -> Result<(String, String), SwankError> {
    let items = node
        .as_list()
        .ok_or_else(|| protocol(format!("{} entry is not a list: {}", tag, node)))?;
    Ok((text_at(items, 0, tag)?, text_at(items, 1, tag)?))
}

/// Backtrace frame flattened to one line, with `\n` escapes dropped.
fn frame_of(node: &Node, tag: &str) -> Result<(String, String), SwankError> {
    let items = node
        .as_list()
        .ok_or_else(|| protocol(format!("{} frame is not a list: {}", tag, node)))?;
    let raw = atom_at(items, 1, tag)?.replace("\\n", "");
    Ok((text_at(items, 0, tag)?, unquote(&raw).replace('\n', "")))
}

fn protocol(msg: impl Into<String>) -> SwankError {
    SwankError::Protocol(msg.into())
}

fn node_at<'a>(items: &'a [Node], index: usize, tag: &str) -> Result<&'a Node, SwankError> {
    items
        .get(index)
        .ok_or_else(|| protocol(format!("{} is missing element {}", tag, index)))
}

/// Raw atom text (quotes kept), for ids and thread designators.
fn atom_at(items: &[Node], index: usize, tag: &str) -> Result<String, SwankError> {
    node_at(items, index, tag)?
        .as_atom()
        .map(str::to_string)
        .ok_or_else(|| protocol(format!("{} element {} is not an atom", tag, index)))
}

/// Literal atom value (quotes and escapes removed).
fn text_at(items: &[Node], index: usize, tag: &str) -> Result<String, SwankError> {
    node_at(items, index, tag)?
        .text()
        .ok_or_else(|| protocol(format!("{} element {} is not an atom", tag, index)))
}

/// A list element; `nil` counts as the empty list.
fn seq_at<'a>(items: &'a [Node], index: usize, tag: &str) -> Result<&'a [Node], SwankError> {
    let node = node_at(items, index, tag)?;
    match node {
        Node::List(children) => Ok(children),
        Node::Atom(_) if node.is_nil() => Ok(&[]),
        Node::Atom(_) => Err(protocol(format!("{} element {} is not a list", tag, index))),
    }
}
