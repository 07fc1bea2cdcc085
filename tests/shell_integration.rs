//! Full protocol sessions against an in-process shell.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::io::{duplex, AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, ReadBuf};
use tokio::time::timeout;

use upsilon_shell::config::ShellConfig;
use upsilon_shell::driver::{Operation, VirtualBench, VirtualCalculator, VirtualDeviceConfig};
use upsilon_shell::shell::{Connection, Shell, ShellExit};

/// Test timeout to prevent hanging tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reader that hands out its data in fixed, caller-chosen pieces.
struct ChunkedInput {
    chunks: VecDeque<Vec<u8>>,
}

impl ChunkedInput {
    fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }

    /// Splits `data` into pieces of `size` bytes.
    fn every(data: &[u8], size: usize) -> Self {
        Self::new(data.chunks(size).map(<[u8]>::to_vec).collect())
    }
}

impl AsyncRead for ChunkedInput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(mut chunk) = self.chunks.pop_front() {
            let n = chunk.len().min(buf.remaining());
            buf.put_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push_front(chunk.split_off(n));
            }
        }
        Poll::Ready(Ok(()))
    }
}

fn config() -> ShellConfig {
    ShellConfig {
        detect_backoff: Duration::ZERO,
        ..ShellConfig::default()
    }
}

fn shell_for(bench: &VirtualBench, config: &ShellConfig) -> Shell<VirtualCalculator> {
    let factory_bench = bench.clone();
    Shell::new(
        Connection::new(move || factory_bench.calculator(), config.detect_policy()),
        config,
    )
}

async fn run_session<R>(bench: &VirtualBench, input: R) -> (ShellExit, Vec<Value>)
where
    R: AsyncRead + Unpin,
{
    let mut shell = shell_for(bench, &config());
    let mut output = Vec::new();
    let exit = timeout(TEST_TIMEOUT, shell.run(input, &mut output))
        .await
        .expect("Test timed out")
        .expect("shell failed");
    (exit, parse_lines(&output))
}

fn parse_lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8(output.to_vec())
        .expect("output is UTF-8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("every output line is JSON"))
        .collect()
}

#[tokio::test]
async fn test_basic_session() {
    let bench = VirtualBench::default();
    let input = concat!(
        "{\"method\":\"status\"}\n",
        "{\"method\":\"connect\",\"args\":[]}\n",
        "{\"method\":\"connect\"}\n",
        "{\"method\":\"getModel\",\"args\":[true]}\n",
        "{\"method\":\"disconnect\"}\n",
        "{\"method\":\"disconnect\"}\n",
    );

    let (exit, lines) = run_session(&bench, input.as_bytes()).await;

    assert_eq!(exit, ShellExit::InputClosed);
    assert_eq!(
        lines,
        vec![
            json!({"ready": true}),
            json!({"status": "disconnected"}),
            json!({"status": "connected"}),
            json!({"status": "connected"}),
            json!("0110"),
            json!({"status": "disconnected"}),
            json!({"status": "disconnected"}),
            json!({"error": "stdin closed"}),
        ]
    );
    assert_eq!(bench.call_count(Operation::Detect), 1);
}

#[tokio::test]
async fn test_byte_by_byte_input() {
    let bench = VirtualBench::default();
    let data = b"{\"method\":\"connect\"}\n{\"method\":\"status\"}\n";

    let (_, lines) = run_session(&bench, ChunkedInput::every(data, 1)).await;

    assert_eq!(
        lines,
        vec![
            json!({"ready": true}),
            json!({"status": "connected"}),
            json!({"status": "connected"}),
            json!({"error": "stdin closed"}),
        ]
    );
}

#[tokio::test]
async fn test_many_requests_in_one_chunk_after_split_line() {
    let bench = VirtualBench::default();
    let input = ChunkedInput::new(vec![
        b"{\"meth".to_vec(),
        b"od\":\"connect\"}\n{\"method\":\"status\"}\n{\"method\":\"getModel\"}\n".to_vec(),
    ]);

    let (_, lines) = run_session(&bench, input).await;

    assert_eq!(
        lines,
        vec![
            json!({"ready": true}),
            json!({"status": "connected"}),
            json!({"status": "connected"}),
            json!("0110"),
            json!({"error": "stdin closed"}),
        ]
    );
}

#[tokio::test]
async fn test_bad_requests_do_not_stop_the_shell() {
    let bench = VirtualBench::default();
    let input = concat!(
        "{not json\n",
        "{\"method\":\"unknownThing\",\"args\":[]}\n",
        "{\"method\":\"getModel\"}\n",
        "{\"method\":\"status\",\"args\":[1]}\n",
        "{\"method\":\"status\"}\n",
    );

    let (_, lines) = run_session(&bench, input.as_bytes()).await;

    assert_eq!(lines.len(), 7);
    assert!(lines[1]["error"]
        .as_str()
        .unwrap()
        .starts_with("malformed request:"));
    assert_eq!(lines[2], json!({"error": "unknown method: unknownThing"}));
    assert_eq!(lines[3], json!({"error": "no calculator connected"}));
    assert_eq!(
        lines[4],
        json!({"error": "invalid arguments for status: expected no arguments, got 1"})
    );
    assert_eq!(lines[5], json!({"status": "disconnected"}));
    assert_eq!(lines[6], json!({"error": "stdin closed"}));
}

#[tokio::test]
async fn test_install_storage_reaches_driver_once() {
    let bench = VirtualBench::default();
    let install = json!({
        "method": "installStorage",
        "args": [{"records": [{"name": "main", "type": "py", "autoImport": true, "code": "print(1)"}]}]
    });
    let input = format!("{{\"method\":\"connect\"}}\n{}\n", install);

    let (_, lines) = run_session(&bench, input.as_bytes()).await;

    assert_eq!(lines[2], json!({"status": "ok"}));
    let installs = bench.installs();
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].records.len(), 1);
    assert_eq!(installs[0].records[0].name, "main");
    assert_eq!(installs[0].records[0].payload, b"print(1)".to_vec());
}

#[tokio::test]
async fn test_exit_stops_without_response() {
    let bench = VirtualBench::default();
    let input = "{\"method\":\"connect\"}\n{\"method\":\"exit\"}\n{\"method\":\"status\"}\n";

    let (exit, lines) = run_session(&bench, input.as_bytes()).await;

    assert_eq!(exit, ShellExit::ExitRequested);
    assert_eq!(
        lines,
        vec![json!({"ready": true}), json!({"status": "connected"})]
    );
}

#[tokio::test]
async fn test_connect_waits_for_delayed_device() {
    let bench = VirtualBench::new(VirtualDeviceConfig {
        detect_after: 25,
        ..VirtualDeviceConfig::default()
    });

    let (_, lines) = run_session(&bench, &b"{\"method\":\"connect\"}\n"[..]).await;

    assert_eq!(lines[1], json!({"status": "connected"}));
    assert_eq!(bench.call_count(Operation::Detect), 26);
}

#[tokio::test]
async fn test_oversized_request_then_valid_request() {
    let bench = VirtualBench::default();
    let config = ShellConfig {
        max_line_bytes: 64,
        ..config()
    };
    let mut shell = shell_for(&bench, &config);
    let mut data = vec![b'x'; 200];
    data.extend_from_slice(b"\n{\"method\":\"status\"}\n");

    let mut output = Vec::new();
    timeout(
        TEST_TIMEOUT,
        shell.run(ChunkedInput::every(&data, 50), &mut output),
    )
    .await
    .expect("Test timed out")
    .expect("shell failed");

    assert_eq!(
        parse_lines(&output),
        vec![
            json!({"ready": true}),
            json!({"error": "request too large: 200 bytes exceeds 64 byte limit"}),
            json!({"status": "disconnected"}),
            json!({"error": "stdin closed"}),
        ]
    );
}

#[tokio::test]
async fn test_unplug_between_requests() {
    let bench = VirtualBench::default();
    let mut shell = shell_for(&bench, &config());
    let (client, shell_io) = duplex(64 * 1024);
    let (shell_read, shell_write) = tokio::io::split(shell_io);
    let (client_read, mut client_write) = tokio::io::split(client);

    let host = async {
        let mut lines = BufReader::new(client_read).lines();
        let mut replies = vec![read_json(&mut lines).await];

        send(&mut client_write, "connect").await;
        replies.push(read_json(&mut lines).await);

        assert_eq!(bench.unplug(), 1);

        send(&mut client_write, "status").await;
        replies.push(read_json(&mut lines).await);
        send(&mut client_write, "getModel").await;
        replies.push(read_json(&mut lines).await);

        bench.plug();
        send(&mut client_write, "connect").await;
        replies.push(read_json(&mut lines).await);

        client_write.shutdown().await.unwrap();
        replies.push(read_json(&mut lines).await);
        replies
    };

    let (exit, replies) = timeout(TEST_TIMEOUT, async {
        tokio::join!(shell.run(shell_read, shell_write), host)
    })
    .await
    .expect("Test timed out");

    assert_eq!(exit.unwrap(), ShellExit::InputClosed);
    assert_eq!(
        replies,
        vec![
            json!({"ready": true}),
            json!({"status": "connected"}),
            json!({"status": "disconnected"}),
            json!({"error": "no calculator connected"}),
            json!({"status": "connected"}),
            json!({"error": "stdin closed"}),
        ]
    );
    assert_eq!(shell.connection().generation(), 1);
}

async fn send<W>(writer: &mut W, method: &str)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let line = format!("{}\n", json!({ "method": method }));
    writer.write_all(line.as_bytes()).await.unwrap();
}

async fn read_json<R>(lines: &mut tokio::io::Lines<BufReader<R>>) -> Value
where
    R: AsyncRead + Unpin,
{
    let line = lines
        .next_line()
        .await
        .expect("read failed")
        .expect("shell closed its output");
    serde_json::from_str(&line).expect("reply is JSON")
}
