//! Connection state machine around the driver handle.
//!
//! [`Connection`] is the single owner of the live driver handle. It binds a
//! calculator on `connect`, and on `disconnect` or an unplug event throws the
//! handle away and builds a fresh one through its factory. Every handle gets
//! a new generation number so unplug notifications issued to an earlier
//! handle can be told apart and ignored.

use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::errors::ShellError;
use crate::driver::{Calculator, DisconnectNotifier};
use crate::protocol::Status;

/// Retry behaviour of `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectPolicy {
    /// Pause between failed attempts. Zero yields to the runtime instead.
    pub backoff: Duration,
    /// Give up after this many attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for DetectPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(100),
            max_attempts: None,
        }
    }
}

type Factory<C> = Box<dyn FnMut() -> C>;

/// Owner of the driver handle and its connection lifecycle.
pub struct Connection<C> {
    driver: C,
    factory: Factory<C>,
    generation: u64,
    unplug_tx: UnboundedSender<u64>,
    unplug_rx: UnboundedReceiver<u64>,
    policy: DetectPolicy,
}

impl<C: Calculator> Connection<C> {
    /// Builds the first handle from `factory` and starts disconnected.
    pub fn new<F>(mut factory: F, policy: DetectPolicy) -> Self
    where
        F: FnMut() -> C + 'static,
    {
        let (unplug_tx, unplug_rx) = mpsc::unbounded_channel();
        let mut driver = factory();
        driver.set_disconnect_notifier(DisconnectNotifier::new(0, unplug_tx.clone()));
        Self {
            driver,
            factory: Box::new(factory),
            generation: 0,
            unplug_tx,
            unplug_rx,
            policy,
        }
    }

    /// Current status as reported to clients. Never touches the device.
    pub fn status(&self) -> Status {
        if self.driver.device().is_some() {
            Status::Connected
        } else {
            Status::Disconnected
        }
    }

    /// Generation of the live handle.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Binds a calculator, retrying detection until one shows up.
    ///
    /// Returns at once when a device is already bound.
    ///
    /// # Errors
    ///
    /// Returns `ShellError::DeviceNotFound` once the attempt cap is reached.
    pub async fn connect(&mut self) -> Result<Status, ShellError> {
        self.drain_unplugs();
        if self.driver.device().is_some() {
            debug!(generation = self.generation, "already connected");
            return Ok(Status::Connected);
        }

        let attempts = self.detect_until_found().await?;

        info!(
            generation = self.generation,
            attempts,
            device = ?self.driver.device(),
            "calculator connected"
        );
        Ok(Status::Connected)
    }

    async fn detect_until_found(&mut self) -> Result<u32, ShellError> {
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            match self.driver.detect().await {
                Ok(()) if self.driver.device().is_some() => return Ok(attempts),
                Ok(()) => debug!(attempt = attempts, "detect returned without a device"),
                Err(e) => debug!(attempt = attempts, error = %e, "detection failed"),
            }

            if self
                .policy
                .max_attempts
                .is_some_and(|max| attempts >= max)
            {
                warn!(attempts, "giving up on calculator detection");
                return Err(ShellError::DeviceNotFound { attempts });
            }

            if self.policy.backoff.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }
    }

    /// Closes the bound device, if any, and replaces the handle.
    ///
    /// Close failures are logged and otherwise ignored.
    pub async fn disconnect(&mut self) -> Status {
        self.drain_unplugs();
        if self.driver.device().is_some() {
            if let Err(e) = self.driver.close().await {
                warn!(error = %e, "closing calculator failed");
            }
            info!(generation = self.generation, "calculator disconnected");
        }
        self.replace_handle();
        Status::Disconnected
    }

    /// Waits for the next unplug notification and returns its generation.
    pub async fn next_unplug(&mut self) -> u64 {
        match self.unplug_rx.recv().await {
            Some(generation) => generation,
            // The sender lives in `self`, so the channel never closes.
            None => std::future::pending().await,
        }
    }

    /// Applies an unplug notification.
    ///
    /// Returns `false` when the notification belongs to a discarded handle.
    pub fn handle_unplug(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "ignoring unplug for stale handle"
            );
            return false;
        }
        info!(generation, "calculator unplugged");
        self.replace_handle();
        true
    }

    /// Applies every unplug notification already queued.
    pub fn drain_unplugs(&mut self) {
        while let Ok(generation) = self.unplug_rx.try_recv() {
            self.handle_unplug(generation);
        }
    }

    /// Live handle, after applying pending unplug notifications.
    pub fn driver_mut(&mut self) -> &mut C {
        self.drain_unplugs();
        &mut self.driver
    }

    pub fn driver(&self) -> &C {
        &self.driver
    }

    fn replace_handle(&mut self) {
        self.generation += 1;
        let mut driver = (self.factory)();
        driver.set_disconnect_notifier(DisconnectNotifier::new(
            self.generation,
            self.unplug_tx.clone(),
        ));
        self.driver = driver;
    }
}
