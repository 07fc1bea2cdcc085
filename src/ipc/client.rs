//! Client that drives a shell over its stdio pipes.
//!
//! `ShellClient` spawns the shell (or wraps any pair of streams), waits for
//! the `{"ready":true}` handshake and sends one request at a time with
//! automatic timeout handling.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::ipc::framing::{read_line_message, write_line_message};
use crate::models::{PlatformInfo, StorageSnapshot};
use crate::protocol::{Request, ShellMessage, Status};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `stop` waits for the shell to exit.
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client-side error types.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The shell process could not be started.
    #[error("Failed to start shell: {0}")]
    Spawn(#[source] std::io::Error),

    /// Request timed out waiting for response.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Protocol-level error (framing, encoding, unexpected reply shape).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The shell answered with `{"error": ...}`.
    #[error("Shell error: {0}")]
    Shell(String),

    /// I/O error while managing the child process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Deserialize)]
struct StatusReply {
    status: Status,
}

/// Client for one shell instance.
///
/// Requests are strictly sequential: each call writes one line and reads
/// one line back, matching the shell's one-response-per-request contract.
pub struct ShellClient<R = ChildStdout, W = ChildStdin> {
    /// Buffered reader over the shell's output.
    reader: BufReader<R>,
    /// Writer for requests; `None` once input was closed.
    writer: Option<W>,
    /// The shell process, when this client spawned it.
    child: Option<Child>,
    /// Request timeout duration.
    timeout: Duration,
    /// Timeout for `connect`; `None` waits for as long as detection takes.
    connect_timeout: Option<Duration>,
    /// Set once a call timed out; its reply may still arrive and would be
    /// read as the answer to the next request.
    out_of_sync: bool,
}

impl ShellClient {
    /// Start the shell binary at `program` and wait for its handshake.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Spawn` if the process cannot be started, or a
    /// protocol/timeout error if the handshake does not arrive.
    pub async fn spawn(program: impl AsRef<OsStr>) -> Result<Self, ClientError> {
        Self::spawn_command(Command::new(program)).await
    }

    /// Start the shell from a prepared command (extra args, env, cwd).
    ///
    /// The command's stdio is replaced with pipes. The child's stderr is
    /// forwarded line by line into `tracing`.
    pub async fn spawn_command(mut command: Command) -> Result<Self, ClientError> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(ClientError::Spawn)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Protocol("shell stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Protocol("shell stdout was not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "upsilon_shell::child", "{line}");
                }
            });
        }

        info!(pid = ?child.id(), "shell process started");
        let mut client = ShellClient::from_streams(stdout, stdin);
        client.child = Some(child);
        client.wait_ready().await?;
        Ok(client)
    }
}

impl<R, W> ShellClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap an already-running shell's output and input streams.
    ///
    /// Call [`ShellClient::wait_ready`] before the first request.
    pub fn from_streams(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Some(writer),
            child: None,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: None,
            out_of_sync: false,
        }
    }

    /// Set the request timeout duration.
    ///
    /// Default is 30 seconds.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Bound how long `connect` may wait for a calculator.
    pub fn set_connect_timeout(&mut self, timeout: Option<Duration>) {
        self.connect_timeout = timeout;
    }

    /// Wait for the `{"ready":true}` handshake.
    pub async fn wait_ready(&mut self) -> Result<(), ClientError> {
        self.check_in_sync()?;
        let limit = self.timeout;
        match timeout(limit, self.read_handshake()).await {
            Ok(result) => result,
            Err(_) => Err(self.timed_out(limit)),
        }
    }

    async fn read_handshake(&mut self) -> Result<(), ClientError> {
        loop {
            match self.read_reply().await? {
                ShellMessage::Ready { ready: true } => return Ok(()),
                other => warn!(message = ?other, "unexpected message before handshake"),
            }
        }
    }

    /// Send a request and wait for its response, using the default timeout.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Request times out (`ClientError::Timeout`)
    /// - The shell replies with an error (`ClientError::Shell`)
    /// - The pipes break or the reply is not JSON (`ClientError::Protocol`)
    pub async fn call(&mut self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        let limit = Some(self.timeout);
        self.call_with_timeout(method, args, limit).await
    }

    /// Send a request with an explicit timeout; `None` waits indefinitely.
    ///
    /// After a timeout the client refuses further requests with a protocol
    /// error, since the late reply would be taken for the next answer.
    pub async fn call_with_timeout(
        &mut self,
        method: &str,
        args: Vec<Value>,
        limit: Option<Duration>,
    ) -> Result<Value, ClientError> {
        self.check_in_sync()?;
        let request = Request::new(method, args);
        let reply = match limit {
            Some(limit) => match timeout(limit, self.send_receive(&request)).await {
                Ok(reply) => reply?,
                Err(_) => return Err(self.timed_out(limit)),
            },
            None => self.send_receive(&request).await?,
        };
        reply.into_result().map_err(ClientError::Shell)
    }

    /// Send `connect` and wait until a calculator is bound.
    pub async fn connect(&mut self) -> Result<Status, ClientError> {
        let limit = self.connect_timeout;
        let value = self.call_with_timeout("connect", Vec::new(), limit).await?;
        decode::<StatusReply>(value).map(|reply| reply.status)
    }

    pub async fn disconnect(&mut self) -> Result<Status, ClientError> {
        let value = self.call("disconnect", Vec::new()).await?;
        decode::<StatusReply>(value).map(|reply| reply.status)
    }

    pub async fn status(&mut self) -> Result<Status, ClientError> {
        let value = self.call("status", Vec::new()).await?;
        decode::<StatusReply>(value).map(|reply| reply.status)
    }

    /// Connect unless the shell already reports a bound calculator.
    pub async fn ensure_connected(&mut self) -> Result<Status, ClientError> {
        match self.status().await? {
            Status::Connected => Ok(Status::Connected),
            _ => self.connect().await,
        }
    }

    pub async fn get_model(&mut self, exclude_modded: bool) -> Result<String, ClientError> {
        let value = self
            .call("getModel", vec![Value::Bool(exclude_modded)])
            .await?;
        decode(value)
    }

    pub async fn get_platform_info(&mut self) -> Result<PlatformInfo, ClientError> {
        let value = self.call("getPlatformInfo", Vec::new()).await?;
        decode(value)
    }

    pub async fn backup_storage(&mut self) -> Result<StorageSnapshot, ClientError> {
        let value = self.call("backupStorage", Vec::new()).await?;
        decode(value)
    }

    /// Replace the calculator's storage with `snapshot`.
    pub async fn install_storage(&mut self, snapshot: &StorageSnapshot) -> Result<(), ClientError> {
        let arg = serde_json::to_value(snapshot)
            .map_err(|e| ClientError::Protocol(format!("Failed to serialize snapshot: {}", e)))?;
        let value = self.call("installStorage", vec![arg]).await?;
        expect_ok(value)
    }

    pub async fn flash_internal(&mut self, image: &[u8]) -> Result<(), ClientError> {
        let value = self.call("flashInternal", vec![bytes_arg(image)]).await?;
        expect_ok(value)
    }

    pub async fn flash_external(&mut self, image: &[u8]) -> Result<(), ClientError> {
        let value = self.call("flashExternal", vec![bytes_arg(image)]).await?;
        expect_ok(value)
    }

    /// Disconnect, close the shell's input and wait for it to exit.
    ///
    /// A failing `disconnect` is logged; the shell is stopped either way.
    /// Returns the exit status when this client spawned the process.
    pub async fn stop(mut self) -> Result<Option<ExitStatus>, ClientError> {
        if let Err(e) = self.disconnect().await {
            warn!(error = %e, "disconnect before stop failed");
        }
        self.writer = None;
        self.wait_exit().await
    }

    /// Ask the shell to exit immediately, without disconnecting.
    pub async fn exit(mut self) -> Result<Option<ExitStatus>, ClientError> {
        let writer = self.writer_mut()?;
        write_line_message(writer, &Request::new("exit", Vec::new()))
            .await
            .map_err(|e| ClientError::Protocol(format!("Failed to send exit: {}", e)))?;
        self.writer = None;
        self.wait_exit().await
    }

    async fn wait_exit(&mut self) -> Result<Option<ExitStatus>, ClientError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        match timeout(EXIT_TIMEOUT, child.wait()).await {
            Ok(status) => {
                let status = status?;
                info!(%status, "shell process exited");
                Ok(Some(status))
            }
            Err(_) => {
                warn!("shell did not exit in time, killing it");
                child.kill().await?;
                Err(ClientError::Timeout(EXIT_TIMEOUT))
            }
        }
    }

    /// Send a request and receive the reply (internal, no timeout).
    async fn send_receive(&mut self, request: &Request) -> Result<ShellMessage, ClientError> {
        debug!(method = %request.method, "sending request");
        let writer = self.writer_mut()?;
        write_line_message(writer, request)
            .await
            .map_err(|e| ClientError::Protocol(format!("Failed to send request: {}", e)))?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<ShellMessage, ClientError> {
        let value = read_line_message(&mut self.reader)
            .await
            .map_err(|e| ClientError::Protocol(format!("Failed to read response: {}", e)))?;
        decode(value)
    }

    fn timed_out(&mut self, limit: Duration) -> ClientError {
        warn!(?limit, "request timed out, client is out of sync with the shell");
        self.out_of_sync = true;
        ClientError::Timeout(limit)
    }

    fn check_in_sync(&self) -> Result<(), ClientError> {
        if self.out_of_sync {
            return Err(ClientError::Protocol(
                "shell out of sync after timeout".to_string(),
            ));
        }
        Ok(())
    }

    fn writer_mut(&mut self) -> Result<&mut W, ClientError> {
        self.writer
            .as_mut()
            .ok_or_else(|| ClientError::Protocol("shell input already closed".to_string()))
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value)
        .map_err(|e| ClientError::Protocol(format!("Failed to parse response: {}", e)))
}

fn expect_ok(value: Value) -> Result<(), ClientError> {
    match decode::<StatusReply>(value)?.status {
        Status::Ok => Ok(()),
        other => Err(ClientError::Protocol(format!(
            "Expected status ok, got {}",
            other
        ))),
    }
}

fn bytes_arg(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
}
