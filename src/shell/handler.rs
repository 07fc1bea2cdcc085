//! Per-request dispatch.
//!
//! [`Dispatcher::handle_line`] is the error boundary of the shell: whatever
//! goes wrong while parsing, validating or executing one request becomes a
//! single `{"error": ...}` reply and the shell moves on to the next line.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::arguments;
use super::connection::Connection;
use super::errors::ShellError;
use super::router::{ControlMethod, DriverMethod, Method};
use super::storage;
use crate::driver::Calculator;
use crate::protocol::{Request, ShellMessage, Status};

/// What the shell does after handling one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Write this message as the response.
    Reply(ShellMessage),
    /// Stop without writing anything.
    Exit,
}

/// Routes parsed requests to the connection or the driver handle.
pub struct Dispatcher<C> {
    connection: Connection<C>,
}

impl<C: Calculator> Dispatcher<C> {
    pub fn new(connection: Connection<C>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection<C> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection<C> {
        &mut self.connection
    }

    /// Handles one framed line. Never fails: errors become replies.
    pub async fn handle_line(&mut self, line: &[u8]) -> Outcome {
        match self.dispatch(line).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "request failed");
                Outcome::Reply(ShellMessage::error(e.to_string()))
            }
        }
    }

    async fn dispatch(&mut self, line: &[u8]) -> Result<Outcome, ShellError> {
        let request = Request::parse(line)?;
        let method = Method::parse(&request.method)?;
        debug!(%method, args = request.args.len(), "dispatching request");

        // `exit` takes whatever it is given.
        if method != Method::Control(ControlMethod::Exit) {
            arguments::check_arity(method, &request.args)?;
        }

        match method {
            Method::Control(control) => self.call_control(control, &request.args).await,
            Method::Driver(driver) => self
                .call_driver(method, driver, &request.args)
                .await
                .map(Outcome::Reply),
        }
    }

    async fn call_control(
        &mut self,
        control: ControlMethod,
        args: &[Value],
    ) -> Result<Outcome, ShellError> {
        let status = match control {
            ControlMethod::Connect => self.connection.connect().await?,
            ControlMethod::Disconnect => self.connection.disconnect().await,
            ControlMethod::Status => {
                self.connection.drain_unplugs();
                self.connection.status()
            }
            ControlMethod::InstallStorage => {
                let snapshot = arguments::required(
                    Method::Control(ControlMethod::InstallStorage),
                    args,
                    0,
                )?;
                storage::install(&mut self.connection, snapshot).await?
            }
            ControlMethod::Exit => return Ok(Outcome::Exit),
        };
        Ok(Outcome::Reply(ShellMessage::status(status)))
    }

    async fn call_driver(
        &mut self,
        method: Method,
        driver: DriverMethod,
        args: &[Value],
    ) -> Result<ShellMessage, ShellError> {
        let handle = self.connection.driver_mut();
        match driver {
            DriverMethod::GetModel => {
                let exclude_modded = arguments::optional_bool(method, args, 0, true)?;
                let model = handle.get_model(exclude_modded).await?;
                Ok(ShellMessage::Value(Value::String(model)))
            }
            DriverMethod::GetPlatformInfo => {
                let info = handle.get_platform_info().await?;
                to_message(&info)
            }
            DriverMethod::BackupStorage => {
                let backup = handle.backup_storage().await?;
                to_message(&storage::snapshot_from_native(&backup))
            }
            DriverMethod::FlashInternal => {
                let image = arguments::byte_array(method, args, 0)?;
                handle.flash_internal(image).await?;
                Ok(ShellMessage::status(Status::Ok))
            }
            DriverMethod::FlashExternal => {
                let image = arguments::byte_array(method, args, 0)?;
                handle.flash_external(image).await?;
                Ok(ShellMessage::status(Status::Ok))
            }
        }
    }
}

fn to_message<T: Serialize>(value: &T) -> Result<ShellMessage, ShellError> {
    serde_json::to_value(value)
        .map(ShellMessage::Value)
        .map_err(ShellError::Serialize)
}
