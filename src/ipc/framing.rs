//! Newline framing for talking to a shell process.
//!
//! Every message is one compact JSON value followed by `\n`. The reader
//! skips lines that are not JSON (stray prints from a misbehaving child)
//! with a warning instead of failing the exchange.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

/// Maximum message size (100MB). Reads stop one byte past it, so a runaway
/// child cannot make the reader buffer an unbounded line.
const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Read the next JSON line from the stream.
///
/// Blank lines and lines that do not parse as JSON are skipped.
///
/// # Errors
///
/// Returns an error if:
/// - The stream is closed (EOF) before a JSON line arrives
/// - A line exceeds MAX_MESSAGE_SIZE (100MB)
/// - Reading fails
pub async fn read_line_message<R>(reader: &mut R) -> Result<Value>
where
    R: AsyncBufRead + Unpin,
{
    read_bounded_message(reader, MAX_MESSAGE_SIZE).await
}

async fn read_bounded_message<R>(reader: &mut R, max_size: usize) -> Result<Value>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let bytes_read = (&mut *reader)
            .take(max_size as u64 + 1)
            .read_until(b'\n', &mut line)
            .await
            .context("Failed to read message line")?;

        if bytes_read == 0 {
            return Err(anyhow!("Connection closed by shell"));
        }
        if line.len() > max_size {
            return Err(anyhow!("Message size exceeds maximum {} bytes", max_size));
        }

        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_slice(trimmed) {
            Ok(value) => return Ok(value),
            Err(e) => warn!(
                error = %e,
                line = %String::from_utf8_lossy(trimmed),
                "skipping non-JSON line from shell"
            ),
        }
    }
}

/// Write one message as a JSON line and flush.
///
/// # Errors
///
/// Returns an error if serialization, the write or the flush fails.
pub async fn write_line_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut line = serde_json::to_vec(message).context("Failed to serialize message")?;
    line.push(b'\n');

    writer
        .write_all(&line)
        .await
        .context("Failed to write message")?;
    writer.flush().await.context("Failed to flush message")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{duplex, BufReader};
    use tokio::time::timeout;

    /// Test timeout to prevent hanging tests.
    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_write_then_read() {
        let (client, server) = duplex(1024);
        let (_, mut write_half) = tokio::io::split(client);
        let (read_half, _) = tokio::io::split(server);

        write_line_message(&mut write_half, &json!({"method": "status"}))
            .await
            .expect("Write failed");

        let mut reader = BufReader::new(read_half);
        let received = timeout(TEST_TIMEOUT, read_line_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Read failed");

        assert_eq!(received, json!({"method": "status"}));
    }

    #[tokio::test]
    async fn test_written_message_is_one_line() {
        let mut out = Vec::new();
        write_line_message(&mut out, &json!({"code": "a\nb"}))
            .await
            .expect("Write failed");
        assert_eq!(out, b"{\"code\":\"a\\nb\"}\n".to_vec());
    }

    #[tokio::test]
    async fn test_read_skips_noise_and_blank_lines() {
        let mut reader = BufReader::new(&b"\nWarning: something\r\n{\"ready\":true}\r\n"[..]);
        let received = timeout(TEST_TIMEOUT, read_line_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Read failed");
        assert_eq!(received, json!({"ready": true}));
    }

    #[tokio::test]
    async fn test_read_accepts_final_line_without_newline() {
        let mut reader = BufReader::new(&b"\"0110\""[..]);
        let received = read_line_message(&mut reader).await.expect("Read failed");
        assert_eq!(received, json!("0110"));
    }

    #[tokio::test]
    async fn test_oversized_line_stops_reading_at_limit() {
        let mut data = vec![b'x'; 64];
        data.extend_from_slice(b"\n{\"ready\":true}\n");
        let mut reader = BufReader::with_capacity(4, &data[..]);

        let err = read_bounded_message(&mut reader, 16).await.unwrap_err();
        assert!(
            err.to_string().contains("exceeds maximum 16 bytes"),
            "unexpected error: {}",
            err
        );

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest.len(), data.len() - 17);
    }

    #[tokio::test]
    async fn test_line_within_limit_is_read() {
        let mut reader = BufReader::new(&b"{\"ready\":true}\n"[..]);
        let received = read_bounded_message(&mut reader, 16).await.unwrap();
        assert_eq!(received, json!({"ready": true}));
    }

    #[tokio::test]
    async fn test_connection_closed_returns_error() {
        let mut reader = BufReader::new(&b"not json\n"[..]);
        let err = read_line_message(&mut reader).await.unwrap_err();
        assert!(
            err.to_string().contains("closed"),
            "Expected connection closed error, got: {}",
            err
        );
    }
}
