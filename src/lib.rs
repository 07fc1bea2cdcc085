//! Upsilon Shell Library
//!
//! This library provides the components of the calculator shell:
//!
//! - `shell` - the stdio request loop, connection state machine and dispatcher
//! - `driver` - the calculator capability interface and a virtual calculator
//! - `protocol` - request and response wire types
//! - `models` - storage snapshots and device descriptions
//! - `config` - environment-driven settings
//! - `ipc` - host-side client that spawns and drives a shell process
//!
//! # Running a shell in-process
//!
//! ```ignore
//! use upsilon_shell::config::ShellConfig;
//! use upsilon_shell::driver::VirtualBench;
//! use upsilon_shell::shell::{Connection, Shell};
//!
//! let config = ShellConfig::from_env()?;
//! let bench = VirtualBench::new(config.virtual_device.clone());
//! let connection = Connection::new(move || bench.calculator(), config.detect_policy());
//! let mut shell = Shell::new(connection, &config);
//! shell.run(tokio::io::stdin(), tokio::io::stdout()).await?;
//! ```

pub mod config;
pub mod driver;
pub mod ipc;
pub mod models;
pub mod protocol;
pub mod shell;
