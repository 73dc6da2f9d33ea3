//! SWANK client library
//!
//! A client-side engine for the SWANK protocol, the wire protocol spoken by
//! Common Lisp development servers:
//!
//! - `sexpr` - S-expression parser with partial results on error
//! - `ipc` - Length-prefixed framing and the server connection
//! - `registry` - Request ids and pending-result bookkeeping
//! - `session` - Session state, input routing and message dispatch
//! - `inspector` - Text rendering of inspector payloads
//! - `sink` - The host-facing output boundary
//! - `config` - Client configuration
//!
//! # Example
//!
//! ```ignore
//! use swank_client::{config::Config, session::{commands, Session}, sink::Transcript};
//!
//! let mut session = Session::new(&Config::default());
//! session.connect("localhost", 4005).await?;
//! let id = session.send_input("(+ 1 2)", None).await?;
//!
//! let mut transcript = Transcript::new();
//! session.poll(&mut transcript).await?;
//! ```

pub mod config;
pub mod inspector;
pub mod ipc;
pub mod registry;
pub mod session;
pub mod sexpr;
pub mod sink;
