//! Response serialization for the shell's output stream.
//!
//! Each message becomes exactly one JSON line, flushed immediately so a
//! parent blocked on `readline` sees it without delay.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::errors::ShellError;
use crate::protocol::ShellMessage;

/// Writer that serializes shell messages to a stream.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one message as a JSON line and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, writing or flushing fails.
    pub async fn write_message(&mut self, message: &ShellMessage) -> Result<(), ShellError> {
        let mut line = serde_json::to_vec(message).map_err(ShellError::Serialize)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Writes the `{"ready":true}` handshake.
    pub async fn write_ready(&mut self) -> Result<(), ShellError> {
        self.write_message(&ShellMessage::ready()).await
    }

    /// Writes the terminal `{"error":"stdin closed"}` line.
    pub async fn write_stdin_closed(&mut self) -> Result<(), ShellError> {
        self.write_message(&ShellMessage::stdin_closed()).await
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
