//! Transport layer for talking to a SWANK server.
//!
//! This module owns the byte stream to the Lisp runtime and nothing else:
//! it knows how to frame and unframe payloads, but not what they mean.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐        TCP (localhost)        ┌─────────────────┐
//! │   swank-client   │ ◄───────────────────────────► │  SWANK server   │
//! │ (SwankConnection)│  hex length + s-expression    │ (Lisp runtime)  │
//! └──────────────────┘                               └─────────────────┘
//! ```
//!
//! # Protocol
//!
//! Messages carry a six-digit hexadecimal byte length followed by the
//! payload:
//!
//! ```text
//! 00002c(:emacs-rex (swank:connection-info) nil t 1)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use swank_client::ipc::SwankConnection;
//!
//! let mut conn = SwankConnection::connect("localhost", 4005).await?;
//! conn.send("(:emacs-rex (swank:connection-info) nil t 1)").await?;
//! if let Some(reply) = conn.poll_frame().await? {
//!     println!("{}", String::from_utf8_lossy(&reply));
//! }
//! ```

mod client;
mod framing;

pub use client::{SwankConnection, SwankError, DEFAULT_POLL_TIMEOUT};
pub use framing::{decode_header, encode_frame, read_frame, write_frame, MAX_FRAME_SIZE};
