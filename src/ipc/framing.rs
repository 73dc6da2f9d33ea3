//! Hex length-prefixed message framing for SWANK over TCP.
//!
//! Every message is preceded by its byte length as exactly six lowercase,
//! zero-padded hexadecimal digits. There is no terminator and no other
//! header.
//!
//! # Wire Format
//!
//! ```text
//! 00002c(:emacs-rex (swank:connection-info) nil t 1)
//! ^^^^^^
//! length (bytes) of what follows
//! ```
//!
//! Reading is split in two phases so an interactive caller is never stuck:
//! the header wait is bounded by a short poll timeout, while the body is
//! read to completion once its length is known.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;

/// Number of hex digits in the length header.
pub const HEADER_LEN: usize = 6;

/// Largest payload the six-digit header can describe (16^6 - 1 bytes).
pub const MAX_FRAME_SIZE: usize = 0xff_ffff;

/// Encode a payload as a complete frame.
///
/// # Errors
///
/// Returns an error if the payload is longer than [`MAX_FRAME_SIZE`] bytes;
/// such a length cannot be represented in the header.
///
/// # Example
///
/// ```ignore
/// assert_eq!(encode_frame("(:ping)")?, "000007(:ping)");
/// ```
pub fn encode_frame(payload: &str) -> Result<String> {
    let len = payload.len();
    if len > MAX_FRAME_SIZE {
        return Err(anyhow!(
            "Frame size {} exceeds maximum {} bytes",
            len,
            MAX_FRAME_SIZE
        ));
    }
    Ok(format!("{:06x}{}", len, payload))
}

/// Parse a six-digit hex length header.
///
/// # Errors
///
/// Returns an error if the header is not exactly six hex digits.
pub fn decode_header(header: &[u8]) -> Result<usize> {
    if header.len() != HEADER_LEN || !header.iter().all(u8::is_ascii_hexdigit) {
        return Err(anyhow!(
            "Invalid frame header: {:?}",
            String::from_utf8_lossy(header)
        ));
    }
    let text = std::str::from_utf8(header).context("Frame header is not ASCII")?;
    usize::from_str_radix(text, 16).with_context(|| format!("Invalid frame header: {}", text))
}

/// Write one frame and flush it.
///
/// # Errors
///
/// Returns an error if the payload is too large, or the write or flush fails.
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(payload)?;

    writer
        .write_all(frame.as_bytes())
        .await
        .context("Failed to write frame")?;

    writer.flush().await.context("Failed to flush frame")?;

    Ok(())
}

/// Read one frame if one starts arriving within `poll_timeout`.
///
/// # Protocol
///
/// 1. Wait up to `poll_timeout` for any byte to become readable
/// 2. Read exactly six header bytes and decode the length
/// 3. Read exactly that many payload bytes, however many reads it takes
///
/// Returns `Ok(None)` when nothing arrived in time. Waiting only inspects the
/// read buffer, so a timeout never discards bytes.
///
/// # Errors
///
/// Returns an error if:
/// - The stream is closed (EOF)
/// - The header is not six hex digits
/// - The payload cannot be read completely
///
/// The payload is returned as raw bytes. A body that is not valid UTF-8 is
/// still a complete frame, so the stream stays in sync and the caller
/// decides what to do with it.
pub async fn read_frame<R>(
    reader: &mut BufReader<R>,
    poll_timeout: Duration,
) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    match timeout(poll_timeout, reader.fill_buf()).await {
        Err(_) => return Ok(None),
        Ok(Err(e)) => return Err(e).context("Failed to poll for frame header"),
        Ok(Ok(available)) if available.is_empty() => {
            return Err(anyhow!("Connection closed by server"));
        }
        Ok(Ok(_)) => {}
    }

    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .context("Failed to read frame header")?;
    let size = decode_header(&header)?;

    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .await
        .context("Failed to read frame body")?;

    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    /// Short poll timeout for tests that expect data.
    const POLL: Duration = Duration::from_millis(100);

    /// Test timeout to prevent hanging tests.
    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// In-memory pipe: bytes written to the first end are read from the second.
    fn pipe() -> (DuplexStream, BufReader<DuplexStream>) {
        let (writer, reader) = duplex(64 * 1024);
        (writer, BufReader::new(reader))
    }

    #[test]
    fn test_encode_header_is_lowercase_hex() {
        assert_eq!(encode_frame("").unwrap(), "000000");
        assert_eq!(encode_frame("(:ping 0 1)").unwrap(), "00000b(:ping 0 1)");

        let payload = "x".repeat(0xabc);
        let frame = encode_frame(&payload).unwrap();
        assert_eq!(&frame[..HEADER_LEN], "000abc");
        assert_eq!(frame.len(), HEADER_LEN + 0xabc);
    }

    #[test]
    fn test_encode_counts_bytes_not_chars() {
        let frame = encode_frame("(λ)").unwrap();
        assert_eq!(&frame[..HEADER_LEN], "000004");
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = "x".repeat(MAX_FRAME_SIZE + 1);
        let err = encode_frame(&payload).unwrap_err().to_string();
        assert!(err.contains("exceeds maximum"), "got: {}", err);
    }

    #[test]
    fn test_decode_header() {
        assert_eq!(decode_header(b"00002a").unwrap(), 42);
        assert_eq!(decode_header(b"ffffff").unwrap(), MAX_FRAME_SIZE);
        assert!(decode_header(b"00002g").is_err());
        assert!(decode_header(b"+00002").is_err());
        assert!(decode_header(b"0002a").is_err());
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let (mut writer, mut reader) = pipe();
        let message = "(:return (:ok (:values \"3\")) 1)";

        write_frame(&mut writer, message).await.unwrap();

        let received = timeout(TEST_TIMEOUT, read_frame(&mut reader, POLL))
            .await
            .expect("Test timed out")
            .expect("Read failed");
        assert_eq!(received.as_deref(), Some(message.as_bytes()));
    }

    #[tokio::test]
    async fn test_read_returns_none_when_idle() {
        let (_writer, mut reader) = pipe();

        let started = std::time::Instant::now();
        let received = read_frame(&mut reader, Duration::from_millis(20))
            .await
            .expect("Idle poll should not fail");

        assert!(received.is_none());
        assert!(started.elapsed() < TEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_read_accumulates_split_body() {
        let (mut writer, mut reader) = pipe();
        let message = "(:write-string \"hello world\")";
        let frame = encode_frame(message).unwrap();
        let (first, rest) = frame.as_bytes().split_at(HEADER_LEN + 5);
        let rest = rest.to_vec();

        writer.write_all(first).await.unwrap();
        let late_writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer.write_all(&rest).await.unwrap();
            writer
        });

        let received = timeout(TEST_TIMEOUT, read_frame(&mut reader, POLL))
            .await
            .expect("Test timed out")
            .expect("Read failed");
        assert_eq!(received.as_deref(), Some(message.as_bytes()));
        late_writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_consecutive_frames() {
        let (mut writer, mut reader) = pipe();
        let raw = format!(
            "{}{}",
            encode_frame("(:new-package \"FOO\" \"FOO\")").unwrap(),
            encode_frame("(:ping 1 2)").unwrap()
        );
        writer.write_all(raw.as_bytes()).await.unwrap();

        let first = read_frame(&mut reader, POLL).await.unwrap();
        let second = read_frame(&mut reader, POLL).await.unwrap();
        let third = read_frame(&mut reader, Duration::from_millis(20)).await.unwrap();

        assert_eq!(first.as_deref(), Some(&b"(:new-package \"FOO\" \"FOO\")"[..]));
        assert_eq!(second.as_deref(), Some(&b"(:ping 1 2)"[..]));
        assert!(third.is_none());
    }

    #[tokio::test]
    async fn test_read_keeps_stream_in_sync_after_non_utf8_body() {
        let (mut writer, mut reader) = pipe();
        writer.write_all(b"000004\xff\xfe\xfd\xfc00000b(:ping 0 1)").await.unwrap();

        let first = read_frame(&mut reader, POLL).await.unwrap();
        let second = read_frame(&mut reader, POLL).await.unwrap();

        assert_eq!(first.as_deref(), Some(&[0xff, 0xfe, 0xfd, 0xfc][..]));
        assert_eq!(second.as_deref(), Some(&b"(:ping 0 1)"[..]));
    }

    #[tokio::test]
    async fn test_read_rejects_bad_header() {
        let (mut writer, mut reader) = pipe();
        writer.write_all(b"zzzzzz(:ping)").await.unwrap();

        let err = read_frame(&mut reader, POLL).await.unwrap_err().to_string();
        assert!(err.contains("Invalid frame header"), "got: {}", err);
    }

    #[tokio::test]
    async fn test_connection_closed_returns_error() {
        let (writer, mut reader) = pipe();
        drop(writer);

        let result = timeout(TEST_TIMEOUT, read_frame(&mut reader, POLL))
            .await
            .expect("Test timed out");

        let err = result.unwrap_err().to_string();
        assert!(err.contains("closed"), "got: {}", err);
    }

    #[tokio::test]
    async fn test_truncated_body_returns_error() {
        let (mut writer, mut reader) = pipe();
        writer.write_all(b"000010(:ping").await.unwrap();
        drop(writer);

        let err = read_frame(&mut reader, POLL).await.unwrap_err().to_string();
        assert!(err.contains("frame body"), "got: {}", err);
    }
}
