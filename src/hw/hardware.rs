use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::Stream;
use tracing::instrument;

use super::btleplug_backend::BtleplugBackend;
use super::fake_backend::{FakeBackend, FakeDevice};
use super::model::FoundDevice;
use crate::error::InteractionError;
use crate::protocol::EndpointId;

/// Ordered stream of raw notification payloads from one endpoint.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// BLE write mode requested by protocol handlers.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteMode {
    /// ATT write request; waits for the peripheral to acknowledge.
    WithResponse,
    /// ATT write command; fire and forget.
    WithoutResponse,
}

/// Wireless transport collaborator used by the collector.
#[async_trait]
pub trait HardwareClient: Send + Sync {
    /// Scans until a peripheral advertising exactly `name` is seen or the window elapses.
    async fn discover(
        &self,
        name: &str,
        scan_window: Duration,
    ) -> Result<FoundDevice, InteractionError>;

    /// Opens a fresh connection to a previously discovered peripheral.
    async fn connect(&self, device: &FoundDevice) -> Result<DeviceSession, InteractionError>;
}

/// Creates a hardware client backed by `btleplug`.
#[must_use]
pub fn real_hardware_client() -> Box<dyn HardwareClient> {
    Box::new(RealHardwareClient {
        backend: BtleplugBackend::default(),
    })
}

/// Creates a hardware client backed by one scripted fake device.
#[must_use]
pub fn fake_hardware_client(device: FakeDevice) -> Box<dyn HardwareClient> {
    Box::new(FakeHardwareClient {
        backend: FakeBackend::new(device),
    })
}

#[derive(Debug)]
struct RealHardwareClient {
    backend: BtleplugBackend,
}

#[async_trait]
impl HardwareClient for RealHardwareClient {
    async fn discover(
        &self,
        name: &str,
        scan_window: Duration,
    ) -> Result<FoundDevice, InteractionError> {
        self.backend.discover(name, scan_window).await
    }

    async fn connect(&self, device: &FoundDevice) -> Result<DeviceSession, InteractionError> {
        let session = self.backend.connect(device).await?;
        Ok(DeviceSession::new(Box::new(session)))
    }
}

#[derive(Debug)]
struct FakeHardwareClient {
    backend: FakeBackend,
}

#[async_trait]
impl HardwareClient for FakeHardwareClient {
    async fn discover(
        &self,
        name: &str,
        scan_window: Duration,
    ) -> Result<FoundDevice, InteractionError> {
        self.backend.discover(name, scan_window).await
    }

    async fn connect(&self, device: &FoundDevice) -> Result<DeviceSession, InteractionError> {
        let session = self.backend.connect(device)?;
        Ok(DeviceSession::new(Box::new(session)))
    }
}

/// Operations a connected backend session must provide.
#[async_trait]
pub(crate) trait ConnectedBleSession: Send + Sync {
    fn device(&self) -> &FoundDevice;

    async fn write_endpoint(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError>;

    async fn subscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError>;

    async fn unsubscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError>;

    async fn is_connected(&self) -> Result<bool, InteractionError>;

    async fn notifications(
        &self,
        endpoint: EndpointId,
    ) -> Result<NotificationStream, InteractionError>;

    async fn close(self: Box<Self>) -> Result<(), InteractionError>;
}

/// One open connection to the logger.
pub struct DeviceSession {
    inner: Box<dyn ConnectedBleSession>,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", self.inner.device())
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    pub(crate) fn new(inner: Box<dyn ConnectedBleSession>) -> Self {
        Self { inner }
    }

    /// Returns details for the connected device.
    #[must_use]
    pub fn device(&self) -> &FoundDevice {
        self.inner.device()
    }

    /// Writes one payload to an endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint is missing or the BLE write fails.
    #[instrument(skip(self, payload), level = "trace", fields(%endpoint, payload_len = payload.len()))]
    pub async fn write_endpoint(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError> {
        self.inner.write_endpoint(endpoint, payload, mode).await
    }

    /// Enables notifications on an endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint is missing or the BLE subscribe fails.
    pub async fn subscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        self.inner.subscribe_endpoint(endpoint).await
    }

    /// Disables notifications on an endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint is missing or the BLE unsubscribe fails.
    pub async fn unsubscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        self.inner.unsubscribe_endpoint(endpoint).await
    }

    /// Whether the link to the device is still up.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot report the link state.
    pub async fn is_connected(&self) -> Result<bool, InteractionError> {
        self.inner.is_connected().await
    }

    /// Opens a stream yielding every notification payload from an endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot open a notification stream.
    pub async fn notifications(
        &self,
        endpoint: EndpointId,
    ) -> Result<NotificationStream, InteractionError> {
        self.inner.notifications(endpoint).await
    }

    /// Disconnects from the device.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails to disconnect.
    #[instrument(skip(self), level = "debug")]
    pub async fn close(self) -> Result<(), InteractionError> {
        self.inner.close().await
    }
}
