//! The stdio request shell.
//!
//! The shell reads newline-delimited JSON requests, runs each one against a
//! [`Connection`] and writes exactly one JSON line per request:
//!
//! ```text
//!  bytes ──► LineFramer ──► Dispatcher ──► Connection / driver ──► ResponseWriter ──► bytes
//!                               ▲
//!             unplug events ────┘ (applied between requests)
//! ```
//!
//! Requests are handled one at a time. A line's device work finishes before
//! the next line is dispatched, and unplug notifications are applied to the
//! connection between requests. The shell stops on `exit` or at end of
//! input; only a broken output stream ends it with an error.

mod arguments;
mod connection;
mod errors;
mod framing;
mod handler;
mod response;
mod router;
mod storage;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, info, warn};

use crate::config::ShellConfig;
use crate::driver::Calculator;
use crate::protocol::ShellMessage;

pub use connection::{Connection, DetectPolicy};
pub use errors::ShellError;
pub use framing::{Frame, LineFramer};
pub use handler::{Dispatcher, Outcome};
pub use response::ResponseWriter;
pub use router::{Arity, ControlMethod, DriverMethod, Method};
pub use storage::{build_native, parse_snapshot, snapshot_from_native, StorageError};

/// Size of each read from the input stream.
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Why [`Shell::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    /// A client sent `exit`.
    ExitRequested,
    /// The input stream reached its end.
    InputClosed,
}

/// Request loop over one input and one output stream.
pub struct Shell<C> {
    dispatcher: Dispatcher<C>,
    max_line_bytes: usize,
}

impl<C: Calculator> Shell<C> {
    pub fn new(connection: Connection<C>, config: &ShellConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(connection),
            max_line_bytes: config.max_line_bytes,
        }
    }

    pub fn connection(&self) -> &Connection<C> {
        self.dispatcher.connection()
    }

    /// Writes the handshake, then serves requests until `exit` or end of input.
    ///
    /// # Errors
    ///
    /// Returns an error only when reading input or writing output fails.
    pub async fn run<R, W>(&mut self, mut input: R, output: W) -> Result<ShellExit, ShellError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut writer = ResponseWriter::new(output);
        let mut framer = LineFramer::new(self.max_line_bytes);
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];

        writer.write_ready().await?;
        info!(max_line_bytes = self.max_line_bytes, "shell ready");

        loop {
            tokio::select! {
                biased;

                generation = self.dispatcher.connection_mut().next_unplug() => {
                    self.dispatcher.connection_mut().handle_unplug(generation);
                }

                read = input.read(&mut chunk) => {
                    let n = read?;
                    if n == 0 {
                        if framer.buffered() > 0 {
                            debug!(bytes = framer.buffered(), "dropping unterminated line at end of input");
                        }
                        info!("input closed");
                        writer.write_stdin_closed().await?;
                        return Ok(ShellExit::InputClosed);
                    }

                    for frame in framer.push(&chunk[..n]) {
                        let outcome = match frame {
                            Frame::Line(line) => self.dispatcher.handle_line(&line).await,
                            Frame::Oversized { size } => {
                                let error = ShellError::request_too_large(size, self.max_line_bytes);
                                warn!(error = %error, "request rejected");
                                Outcome::Reply(ShellMessage::error(error.to_string()))
                            }
                        };

                        match outcome {
                            Outcome::Reply(message) => writer.write_message(&message).await?,
                            Outcome::Exit => {
                                info!("exit requested");
                                return Ok(ShellExit::ExitRequested);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{VirtualBench, VirtualCalculator};
    use crate::protocol::Status;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn shell(bench: &VirtualBench, max_line_bytes: usize) -> Shell<VirtualCalculator> {
        let config = ShellConfig {
            detect_backoff: Duration::ZERO,
            max_line_bytes,
            ..ShellConfig::default()
        };
        let bench = bench.clone();
        Shell::new(
            Connection::new(move || bench.calculator(), config.detect_policy()),
            &config,
        )
    }

    async fn session(shell: &mut Shell<VirtualCalculator>, input: &str) -> (ShellExit, Vec<String>) {
        let mut output = Vec::new();
        let exit = shell.run(input.as_bytes(), &mut output).await.unwrap();
        let lines = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        (exit, lines)
    }

    #[tokio::test]
    async fn test_handshake_then_stdin_closed() {
        let bench = VirtualBench::default();
        let (exit, lines) = session(&mut shell(&bench, 1024), "").await;
        assert_eq!(exit, ShellExit::InputClosed);
        assert_eq!(lines, vec![r#"{"ready":true}"#, r#"{"error":"stdin closed"}"#]);
    }

    #[tokio::test]
    async fn test_one_response_per_request() {
        let bench = VirtualBench::default();
        let input = "{\"method\":\"status\"}\n\n{\"method\":\"connect\"}\n{\"method\":\"status\"}\n";
        let (_, lines) = session(&mut shell(&bench, 1024), input).await;
        assert_eq!(
            lines,
            vec![
                r#"{"ready":true}"#,
                r#"{"status":"disconnected"}"#,
                r#"{"status":"connected"}"#,
                r#"{"status":"connected"}"#,
                r#"{"error":"stdin closed"}"#,
            ]
        );
    }

    #[tokio::test]
    async fn test_exit_writes_nothing() {
        let bench = VirtualBench::default();
        let input = "{\"method\":\"exit\"}\n{\"method\":\"status\"}\n";
        let (exit, lines) = session(&mut shell(&bench, 1024), input).await;
        assert_eq!(exit, ShellExit::ExitRequested);
        assert_eq!(lines, vec![r#"{"ready":true}"#]);
    }

    #[tokio::test]
    async fn test_oversized_line_reported_once() {
        let bench = VirtualBench::default();
        let input = format!("{}\n{{\"method\":\"status\"}}\n", "x".repeat(64));
        let (_, lines) = session(&mut shell(&bench, 32), &input).await;
        assert_eq!(
            lines,
            vec![
                r#"{"ready":true}"#.to_string(),
                r#"{"error":"request too large: 64 bytes exceeds 32 byte limit"}"#.to_string(),
                r#"{"status":"disconnected"}"#.to_string(),
                r#"{"error":"stdin closed"}"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_unterminated_line_dropped_at_eof() {
        let bench = VirtualBench::default();
        let (_, lines) = session(&mut shell(&bench, 1024), "{\"method\":\"connect\"}").await;
        assert_eq!(lines, vec![r#"{"ready":true}"#, r#"{"error":"stdin closed"}"#]);
        assert_eq!(bench.call_count(crate::driver::Operation::Detect), 0);
    }

    #[tokio::test]
    async fn test_state_persists_across_runs() {
        let bench = VirtualBench::default();
        let mut shell = shell(&bench, 1024);
        session(&mut shell, "{\"method\":\"connect\"}\n").await;
        assert_eq!(shell.connection().status(), Status::Connected);
    }
}
