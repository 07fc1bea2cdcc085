//! In-process stand-in for a USB-attached calculator.
//!
//! A [`VirtualBench`] is the simulated hardware: whether a calculator is
//! plugged in, what its storage holds, and which calls reached it. Each
//! [`VirtualCalculator`] is one driver handle bound to a bench. Dropping
//! a handle and building a new one keeps the bench, the same way replacing
//! a USB driver object leaves the calculator's files alone.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{Calculator, DisconnectNotifier, DriverError};
use crate::models::{
    DeviceInfo, FirmwareExtension, NativeStorage, PlatformInfo, StorageRegion,
};

/// USB vendor id of NumWorks calculators (STMicroelectronics).
pub const NUMWORKS_VENDOR_ID: u16 = 0x0483;

/// USB product id of a NumWorks calculator in DFU mode.
pub const NUMWORKS_PRODUCT_ID: u16 = 0xa291;

/// Behaviour of a simulated calculator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDeviceConfig {
    /// Model string returned by `getModel`.
    pub model: String,
    /// Model reported when modded boards are not excluded.
    pub modded_model: Option<String>,
    /// Number of detection attempts that fail before the device shows up.
    pub detect_after: u32,
    /// Whether the calculator starts plugged in.
    pub plugged: bool,
    pub serial: String,
}

impl Default for VirtualDeviceConfig {
    fn default() -> Self {
        Self {
            model: "0110".to_string(),
            modded_model: None,
            detect_after: 0,
            plugged: true,
            serial: "VIRTUAL00000001".to_string(),
        }
    }
}

/// Calls a virtual calculator can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Detect,
    Close,
    GetModel,
    GetPlatformInfo,
    BackupStorage,
    InstallStorage,
    FlashInternal,
    FlashExternal,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Detect => "detect",
            Operation::Close => "close",
            Operation::GetModel => "getModel",
            Operation::GetPlatformInfo => "getPlatformInfo",
            Operation::BackupStorage => "backupStorage",
            Operation::InstallStorage => "installStorage",
            Operation::FlashInternal => "flashInternal",
            Operation::FlashExternal => "flashExternal",
        }
    }
}

#[derive(Debug)]
struct BenchState {
    config: VirtualDeviceConfig,
    plugged: bool,
    failed_detects: u32,
    storage: NativeStorage,
    platform: PlatformInfo,
    calls: Vec<Operation>,
    installs: Vec<NativeStorage>,
    flashes: Vec<(Operation, usize)>,
    injected: Vec<(Operation, DriverError)>,
    notifiers: Vec<DisconnectNotifier>,
}

impl BenchState {
    fn take_injected(&mut self, operation: Operation) -> Option<DriverError> {
        let pos = self.injected.iter().position(|(op, _)| *op == operation)?;
        Some(self.injected.remove(pos).1)
    }
}

/// Shared simulated hardware behind one or more virtual driver handles.
#[derive(Debug, Clone)]
pub struct VirtualBench {
    state: Arc<Mutex<BenchState>>,
}

impl VirtualBench {
    pub fn new(config: VirtualDeviceConfig) -> Self {
        let plugged = config.plugged;
        Self {
            state: Arc::new(Mutex::new(BenchState {
                config,
                plugged,
                failed_detects: 0,
                storage: NativeStorage::new(),
                platform: default_platform_info(),
                calls: Vec::new(),
                installs: Vec::new(),
                flashes: Vec::new(),
                injected: Vec::new(),
                notifiers: Vec::new(),
            })),
        }
    }

    /// Builds a fresh, unbound driver handle for this bench.
    pub fn calculator(&self) -> VirtualCalculator {
        VirtualCalculator {
            bench: self.clone(),
            device: None,
            notifier: None,
        }
    }

    /// Plugs the calculator in. Detection delays start counting again.
    pub fn plug(&self) {
        let mut state = self.lock();
        state.plugged = true;
        state.failed_detects = 0;
    }

    /// Pulls the cable and fires the unplug callback of every bound handle.
    ///
    /// Returns the number of notifiers that were still listening.
    pub fn unplug(&self) -> usize {
        let notifiers = {
            let mut state = self.lock();
            state.plugged = false;
            state.failed_detects = 0;
            std::mem::take(&mut state.notifiers)
        };
        debug!(handles = notifiers.len(), "virtual calculator unplugged");
        notifiers.iter().filter(|n| n.notify()).count()
    }

    /// Makes the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: Operation, error: DriverError) {
        self.lock().injected.push((operation, error));
    }

    /// Number of times `operation` reached the bench.
    pub fn call_count(&self, operation: Operation) -> usize {
        self.lock().calls.iter().filter(|op| **op == operation).count()
    }

    /// Every storage object passed to `install_storage`, oldest first.
    pub fn installs(&self) -> Vec<NativeStorage> {
        self.lock().installs.clone()
    }

    pub fn set_storage(&self, storage: NativeStorage) {
        self.lock().storage = storage;
    }

    /// Firmware writes as `(target, image length)`.
    pub fn flashes(&self) -> Vec<(Operation, usize)> {
        self.lock().flashes.clone()
    }

    fn lock(&self) -> MutexGuard<'_, BenchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for VirtualBench {
    fn default() -> Self {
        Self::new(VirtualDeviceConfig::default())
    }
}

/// Driver handle for a [`VirtualBench`].
#[derive(Debug)]
pub struct VirtualCalculator {
    bench: VirtualBench,
    device: Option<DeviceInfo>,
    notifier: Option<DisconnectNotifier>,
}

impl VirtualCalculator {
    /// Records the call and checks the handle can talk to the device.
    fn begin(&self, operation: Operation) -> Result<(), DriverError> {
        let mut state = self.bench.lock();
        state.calls.push(operation);
        if let Some(error) = state.take_injected(operation) {
            return Err(error);
        }
        if self.device.is_none() {
            return Err(DriverError::NotConnected);
        }
        if !state.plugged {
            return Err(DriverError::Disconnected {
                operation: operation.as_str(),
            });
        }
        Ok(())
    }

    /// Simulates the transfer, failing if the cable was pulled meanwhile.
    async fn transfer(&self, operation: Operation) -> Result<MutexGuard<'_, BenchState>, DriverError> {
        tokio::task::yield_now().await;
        let state = self.bench.lock();
        if !state.plugged {
            return Err(DriverError::Disconnected {
                operation: operation.as_str(),
            });
        }
        Ok(state)
    }

    async fn flash(&mut self, operation: Operation, image: Vec<u8>) -> Result<(), DriverError> {
        self.begin(operation)?;
        if image.is_empty() {
            return Err(DriverError::operation(
                operation.as_str(),
                "firmware image is empty",
            ));
        }
        let mut state = self.transfer(operation).await?;
        state.flashes.push((operation, image.len()));
        Ok(())
    }
}

impl Calculator for VirtualCalculator {
    async fn detect(&mut self) -> Result<(), DriverError> {
        tokio::task::yield_now().await;

        let serial = {
            let mut state = self.bench.lock();
            state.calls.push(Operation::Detect);
            if let Some(error) = state.take_injected(Operation::Detect) {
                return Err(error);
            }
            if !state.plugged {
                return Err(DriverError::NotFound);
            }
            if state.failed_detects < state.config.detect_after {
                state.failed_detects += 1;
                return Err(DriverError::NotFound);
            }
            if let Some(notifier) = &self.notifier {
                let generation = notifier.generation();
                if !state.notifiers.iter().any(|n| n.generation() == generation) {
                    state.notifiers.push(notifier.clone());
                }
            }
            state.config.serial.clone()
        };

        self.device = Some(DeviceInfo {
            vendor_id: NUMWORKS_VENDOR_ID,
            product_id: NUMWORKS_PRODUCT_ID,
            serial: Some(serial),
        });
        debug!("virtual calculator bound");
        Ok(())
    }

    fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        let injected = {
            let mut state = self.bench.lock();
            state.calls.push(Operation::Close);
            if let Some(generation) = self.notifier.as_ref().map(DisconnectNotifier::generation) {
                state.notifiers.retain(|n| n.generation() != generation);
            }
            state.take_injected(Operation::Close)
        };
        self.device = None;
        match injected {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn set_disconnect_notifier(&mut self, notifier: DisconnectNotifier) {
        self.notifier = Some(notifier);
    }

    async fn get_model(&mut self, exclude_modded: bool) -> Result<String, DriverError> {
        self.begin(Operation::GetModel)?;
        let state = self.transfer(Operation::GetModel).await?;
        let model = match (&state.config.modded_model, exclude_modded) {
            (Some(modded), false) => modded.clone(),
            _ => state.config.model.clone(),
        };
        Ok(model)
    }

    async fn get_platform_info(&mut self) -> Result<PlatformInfo, DriverError> {
        self.begin(Operation::GetPlatformInfo)?;
        let state = self.transfer(Operation::GetPlatformInfo).await?;
        Ok(state.platform.clone())
    }

    async fn backup_storage(&mut self) -> Result<NativeStorage, DriverError> {
        self.begin(Operation::BackupStorage)?;
        let state = self.transfer(Operation::BackupStorage).await?;
        Ok(state.storage.clone())
    }

    async fn install_storage(&mut self, storage: NativeStorage) -> Result<(), DriverError> {
        self.begin(Operation::InstallStorage)?;
        let capacity = self.bench.lock().platform.storage.size as usize;
        if storage.payload_bytes() > capacity {
            return Err(DriverError::operation(
                Operation::InstallStorage.as_str(),
                format!(
                    "{} bytes of records exceed the {} byte storage area",
                    storage.payload_bytes(),
                    capacity
                ),
            ));
        }
        let mut state = self.transfer(Operation::InstallStorage).await?;
        state.storage = storage.clone();
        state.installs.push(storage);
        Ok(())
    }

    async fn flash_internal(&mut self, image: Vec<u8>) -> Result<(), DriverError> {
        self.flash(Operation::FlashInternal, image).await
    }

    async fn flash_external(&mut self, image: Vec<u8>) -> Result<(), DriverError> {
        self.flash(Operation::FlashExternal, image).await
    }
}

fn default_platform_info() -> PlatformInfo {
    PlatformInfo {
        magik: true,
        old_platform: false,
        version: "15.3.2".to_string(),
        commit: "c0ffee1".to_string(),
        storage: StorageRegion {
            address: 0x2000_0ae8,
            size: 32 * 1024,
        },
        omega: FirmwareExtension {
            installed: true,
            version: Some("2.0.2".to_string()),
            user: None,
        },
        upsilon: FirmwareExtension {
            installed: true,
            version: Some("1.0.1".to_string()),
            user: None,
        },
    }
}
