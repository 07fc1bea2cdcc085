//! Capability interface for calculator drivers.
//!
//! The shell never talks USB itself. It drives an object implementing
//! [`Calculator`], which owns device detection, the bound device reference
//! and every device operation the protocol exposes.
//!
//! # Unplug notification
//!
//! Hardware can disappear outside any request. The shell hands each driver
//! handle a [`DisconnectNotifier`] tagged with the handle's generation; the
//! transport calls [`DisconnectNotifier::notify`] when the device goes away
//! and the shell's event loop applies it to the live handle.

mod virtual_device;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::models::{DeviceInfo, NativeStorage, PlatformInfo};

pub use virtual_device::{
    Operation, VirtualBench, VirtualCalculator, VirtualDeviceConfig, NUMWORKS_PRODUCT_ID,
    NUMWORKS_VENDOR_ID,
};

/// Failures reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// No calculator is bound to this handle.
    #[error("no calculator connected")]
    NotConnected,

    /// Detection found no calculator on the bus.
    #[error("no calculator found")]
    NotFound,

    /// The calculator went away while an operation was running.
    #[error("calculator disconnected during {operation}")]
    Disconnected { operation: &'static str },

    /// The calculator stopped answering.
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    /// The calculator rejected or failed the operation.
    #[error("{operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },
}

impl DriverError {
    pub fn operation(operation: &'static str, message: impl Into<String>) -> Self {
        DriverError::Operation {
            operation,
            message: message.into(),
        }
    }
}

/// Callback handle through which a transport reports an unplugged device.
#[derive(Debug, Clone)]
pub struct DisconnectNotifier {
    generation: u64,
    sender: UnboundedSender<u64>,
}

impl DisconnectNotifier {
    pub fn new(generation: u64, sender: UnboundedSender<u64>) -> Self {
        Self { generation, sender }
    }

    /// Generation of the driver handle this notifier was issued to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reports that the device went away.
    ///
    /// Returns `false` if the shell is no longer listening.
    pub fn notify(&self) -> bool {
        self.sender.send(self.generation).is_ok()
    }
}

/// Operations a calculator driver must provide.
///
/// Handles are used from a single task and are not required to be
/// reentrant: the shell awaits each call before issuing the next.
#[allow(async_fn_in_trait)] // Driven from a current-thread runtime; no Send bound wanted
pub trait Calculator {
    /// Attempts to locate and bind a calculator.
    ///
    /// Success means [`Calculator::device`] now returns `Some`.
    async fn detect(&mut self) -> Result<(), DriverError>;

    /// The bound device, if any.
    fn device(&self) -> Option<&DeviceInfo>;

    /// Releases the bound device.
    async fn close(&mut self) -> Result<(), DriverError>;

    /// Registers the unplug callback for this handle.
    fn set_disconnect_notifier(&mut self, notifier: DisconnectNotifier);

    /// Hardware model, e.g. `"0110"`.
    async fn get_model(&mut self, exclude_modded: bool) -> Result<String, DriverError>;

    async fn get_platform_info(&mut self) -> Result<PlatformInfo, DriverError>;

    /// Reads the whole storage area.
    async fn backup_storage(&mut self) -> Result<NativeStorage, DriverError>;

    /// Replaces the whole storage area.
    async fn install_storage(&mut self, storage: NativeStorage) -> Result<(), DriverError>;

    /// Writes a firmware image to internal flash.
    async fn flash_internal(&mut self, image: Vec<u8>) -> Result<(), DriverError>;

    /// Writes a firmware image to external flash.
    async fn flash_external(&mut self, image: Vec<u8>) -> Result<(), DriverError>;
}
