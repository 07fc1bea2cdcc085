//! Method routing for request dispatch.
//!
//! The protocol exposes a closed set of methods. Control methods act on the
//! shell's connection state; driver methods are forwarded to the calculator
//! handle. Any other name is rejected before anything touches the device.

use super::errors::ShellError;

/// Methods handled by the shell itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMethod {
    Connect,
    Disconnect,
    Status,
    InstallStorage,
    Exit,
}

/// Methods forwarded to the driver handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMethod {
    GetModel,
    GetPlatformInfo,
    BackupStorage,
    FlashInternal,
    FlashExternal,
}

/// A resolved protocol method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Control(ControlMethod),
    Driver(DriverMethod),
}

/// Accepted argument count for a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: usize,
}

impl Arity {
    const NONE: Self = Self { min: 0, max: 0 };
    const ONE: Self = Self { min: 1, max: 1 };
    const OPTIONAL: Self = Self { min: 0, max: 1 };

    pub fn accepts(&self, count: usize) -> bool {
        (self.min..=self.max).contains(&count)
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.min, self.max) {
            (0, 0) => f.write_str("no arguments"),
            (min, max) if min == max => write!(f, "{min} argument{}", plural(min)),
            (min, max) => write!(f, "{min} to {max} arguments"),
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

impl Method {
    /// Every method of the protocol.
    pub const ALL: [Method; 10] = [
        Method::Control(ControlMethod::Connect),
        Method::Control(ControlMethod::Disconnect),
        Method::Control(ControlMethod::Status),
        Method::Control(ControlMethod::InstallStorage),
        Method::Control(ControlMethod::Exit),
        Method::Driver(DriverMethod::GetModel),
        Method::Driver(DriverMethod::GetPlatformInfo),
        Method::Driver(DriverMethod::BackupStorage),
        Method::Driver(DriverMethod::FlashInternal),
        Method::Driver(DriverMethod::FlashExternal),
    ];

    /// Resolves a method name (case-sensitive).
    ///
    /// # Errors
    ///
    /// Returns `ShellError::UnknownMethod` for names outside the protocol.
    pub fn parse(name: &str) -> Result<Self, ShellError> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == name)
            .ok_or_else(|| ShellError::unknown_method(name))
    }

    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Control(ControlMethod::Connect) => "connect",
            Method::Control(ControlMethod::Disconnect) => "disconnect",
            Method::Control(ControlMethod::Status) => "status",
            Method::Control(ControlMethod::InstallStorage) => "installStorage",
            Method::Control(ControlMethod::Exit) => "exit",
            Method::Driver(DriverMethod::GetModel) => "getModel",
            Method::Driver(DriverMethod::GetPlatformInfo) => "getPlatformInfo",
            Method::Driver(DriverMethod::BackupStorage) => "backupStorage",
            Method::Driver(DriverMethod::FlashInternal) => "flashInternal",
            Method::Driver(DriverMethod::FlashExternal) => "flashExternal",
        }
    }

    /// Number of positional arguments the method takes.
    pub fn arity(&self) -> Arity {
        match self {
            Method::Control(ControlMethod::InstallStorage) => Arity::ONE,
            Method::Control(_) => Arity::NONE,
            Method::Driver(DriverMethod::GetModel) => Arity::OPTIONAL,
            Method::Driver(DriverMethod::FlashInternal | DriverMethod::FlashExternal) => {
                Arity::ONE
            }
            Method::Driver(_) => Arity::NONE,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
