//! Connection to a SWANK server.
//!
//! `SwankConnection` exclusively owns one duplex byte stream. It sends
//! fire-and-forget frames and polls for incoming ones; correlating replies
//! with requests is the session's job.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::ipc::framing::{read_frame, write_frame};

/// Default wait for the first header byte of a frame.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Transport and protocol error types.
///
/// Parse failures are not represented here; they are reported by
/// [`crate::sexpr::ParseError`] and never tear down a connection.
#[derive(Debug, Error)]
pub enum SwankError {
    /// Failed to connect to the server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),

    /// No connection is open.
    #[error("SWANK server is not connected.")]
    NotConnected,

    /// Sending or receiving a frame failed; the connection is unusable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A message arrived with a shape its tag does not allow.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error outside of framing.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for SwankError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                SwankError::ConnectionFailed(err)
            }
            _ => SwankError::Io(err),
        }
    }
}

/// A framed duplex stream to a SWANK server.
///
/// # Example
///
/// ```ignore
/// let mut conn = SwankConnection::connect_with_retry("localhost", 4005, 5).await?;
/// conn.send("(:emacs-interrupt :repl-thread)").await?;
/// ```
pub struct SwankConnection {
    /// Buffered reader for incoming frames.
    reader: BufReader<BoxedReader>,
    /// Writer for outgoing frames.
    writer: BoxedWriter,
    /// How long `poll_frame` waits for a header.
    poll_timeout: Duration,
}

impl SwankConnection {
    /// Connect to a SWANK server over TCP.
    ///
    /// # Errors
    ///
    /// Returns `SwankError::ConnectionFailed` if the server cannot be reached.
    pub async fn connect(host: &str, port: u16) -> Result<Self, SwankError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(SwankError::ConnectionFailed)?;
        stream.set_nodelay(true)?;
        debug!("Connected to SWANK server at {}:{}", host, port);

        let (read_half, write_half) = stream.into_split();
        Ok(Self::from_parts(read_half, write_half))
    }

    /// Connect with automatic retry and exponential backoff.
    ///
    /// Retries with delays of 100ms, 200ms, 400ms, etc. Useful right after
    /// the Lisp runtime was started and is still loading SWANK.
    ///
    /// # Errors
    ///
    /// Returns the last connection error if all attempts fail.
    pub async fn connect_with_retry(
        host: &str,
        port: u16,
        max_attempts: u32,
    ) -> Result<Self, SwankError> {
        let mut last_error = SwankError::NotConnected;

        for attempt in 1..=max_attempts {
            match Self::connect(host, port).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    debug!("Connect attempt {}/{} failed: {}", attempt, max_attempts, e);
                    last_error = e;
                    if attempt < max_attempts {
                        // Exponential backoff: 100ms, 200ms, 400ms, ...
                        let delay = Duration::from_millis(100 * (1 << (attempt - 1).min(10)));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    /// Wrap an already-open reader/writer pair.
    pub fn from_parts<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader) as BoxedReader),
            writer: Box::new(writer),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Set how long `poll_frame` waits for a header.
    ///
    /// Default is 100 milliseconds.
    pub fn set_poll_timeout(&mut self, poll_timeout: Duration) {
        self.poll_timeout = poll_timeout;
    }

    /// Frame and send one payload.
    ///
    /// # Errors
    ///
    /// Returns `SwankError::Transport` if the payload is too large for a
    /// frame or the write fails.
    pub async fn send(&mut self, payload: &str) -> Result<(), SwankError> {
        trace!("[---Sent---] {}", payload);
        write_frame(&mut self.writer, payload)
            .await
            .map_err(|e| SwankError::Transport(format!("Failed to send frame: {:#}", e)))
    }

    /// Receive the next frame if one arrives within the poll timeout.
    ///
    /// The payload is returned undecoded.
    ///
    /// # Errors
    ///
    /// Returns `SwankError::Transport` if the stream closed or a frame was
    /// malformed or cut short.
    pub async fn poll_frame(&mut self) -> Result<Option<Vec<u8>>, SwankError> {
        let frame = read_frame(&mut self.reader, self.poll_timeout)
            .await
            .map_err(|e| SwankError::Transport(format!("Failed to receive frame: {:#}", e)))?;
        if let Some(payload) = &frame {
            trace!("[-Received-] {}", String::from_utf8_lossy(payload));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_swank_error_display() {
        assert_eq!(
            SwankError::NotConnected.to_string(),
            "SWANK server is not connected."
        );

        let protocol_err = SwankError::Protocol("missing port".to_string());
        assert_eq!(protocol_err.to_string(), "Protocol error: missing port");
    }

    #[test]
    fn test_swank_error_from_io() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: SwankError = refused.into();
        assert!(matches!(err, SwankError::ConnectionFailed(_)));

        let other = std::io::Error::new(std::io::ErrorKind::Other, "other");
        let err: SwankError = other.into();
        assert!(matches!(err, SwankError::Io(_)));
    }

    #[tokio::test]
    async fn test_send_writes_framed_payload() {
        let (client_end, mut server_end) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(client_end);
        let mut conn = SwankConnection::from_parts(read_half, write_half);

        conn.send("(:emacs-pong 0 1)").await.unwrap();

        let mut buf = vec![0u8; 23];
        server_end.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"000011(:emacs-pong 0 1)");
    }

    #[tokio::test]
    async fn test_poll_frame_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"00000b(:ping 0 1)").await.unwrap();
            socket
        });

        let mut conn = SwankConnection::connect("127.0.0.1", port).await.unwrap();
        let frame = conn.poll_frame().await.unwrap();
        assert_eq!(frame.as_deref(), Some(&b"(:ping 0 1)"[..]));

        conn.set_poll_timeout(Duration::from_millis(10));
        assert!(conn.poll_frame().await.unwrap().is_none());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_poll_frame_after_close_is_transport_error() {
        let (client_end, server_end) = duplex(64);
        let (read_half, write_half) = tokio::io::split(client_end);
        let mut conn = SwankConnection::from_parts(read_half, write_half);
        drop(server_end);

        let err = conn.poll_frame().await.unwrap_err();
        assert!(matches!(err, SwankError::Transport(_)), "got: {:?}", err);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = SwankConnection::connect_with_retry("127.0.0.1", port, 2).await;
        assert!(matches!(result, Err(SwankError::ConnectionFailed(_))));
    }
}
