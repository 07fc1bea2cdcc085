//! Host-side client for the calculator shell.
//!
//! This module is the parent half of the stdio protocol: it starts the
//! `upsilon-shell` binary, waits for its handshake and turns protocol calls
//! into typed Rust results.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐        stdin / stdout         ┌─────────────────────┐
//! │   host process  │  ◄──────────────────────────► │   upsilon-shell     │
//! │  (ShellClient)  │     one JSON value per line   │ (Connection+driver) │
//! └─────────────────┘                               └─────────────────────┘
//!                          stderr ──► tracing
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use upsilon_shell::ipc::ShellClient;
//!
//! let mut client = ShellClient::spawn("upsilon-shell").await?;
//! client.ensure_connected().await?;
//! let model = client.get_model(true).await?;
//! client.stop().await?;
//! ```

mod client;
mod framing;

pub use client::{ClientError, ShellClient, DEFAULT_TIMEOUT};
pub use framing::{read_line_message, write_line_message};
