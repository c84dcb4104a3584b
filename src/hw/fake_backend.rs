use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::bon;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::time::sleep;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use super::hardware::{ConnectedBleSession, NotificationStream, WriteMode};
use super::model::FoundDevice;
use crate::error::InteractionError;
use crate::protocol::{ADVERTISEMENT_MANUFACTURER_ID, COMMAND_MARKER, EndpointId};

const FAKE_ADAPTER_NAME: &str = "fake0";
const FAKE_DEVICE_ID: &str = "FA:KE:00:00:00:01";
const FAKE_RSSI: i16 = -52;

/// How a scripted response ends the link.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum LinkLoss {
    /// The notification stream ends with the link.
    CloseStream,
    /// The link goes down but the stream stays open and quiet.
    Silent,
}

/// Notification chunks the fake device emits after receiving a matching command.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FakeResponse {
    command_prefix: String,
    chunks: Vec<Vec<u8>>,
    link_loss: Option<LinkLoss>,
}

impl FakeResponse {
    /// Creates a response for commands starting with `command_prefix`.
    ///
    /// ```
    /// let response = pepperoni::FakeResponse::new(
    ///     "turndata disp",
    ///     ["Data readings\n", "Total readings:0\n"],
    /// );
    /// let _ = response;
    /// ```
    #[must_use]
    pub fn new<I, C>(command_prefix: impl Into<String>, chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        Self {
            command_prefix: command_prefix.into(),
            chunks: chunks
                .into_iter()
                .map(|chunk| chunk.as_ref().to_vec())
                .collect(),
            link_loss: None,
        }
    }

    /// Drops the link after the chunks and closes the notification stream.
    ///
    /// Every later operation on the same session fails.
    #[must_use]
    pub fn then_disconnect(mut self) -> Self {
        self.link_loss = Some(LinkLoss::CloseStream);
        self
    }

    /// Drops the link after the chunks but leaves the notification stream
    /// open, the way some BLE stacks report a lost peripheral.
    #[must_use]
    pub fn then_lose_link_silently(mut self) -> Self {
        self.link_loss = Some(LinkLoss::Silent);
        self
    }
}

#[derive(Debug, Default)]
struct FakeState {
    advertised_session_time: Option<u32>,
    remaining_connection_failures: usize,
    responses: Vec<(FakeResponse, bool)>,
    written_commands: Vec<String>,
    discoveries: usize,
    connection_attempts: usize,
    open_subscriptions: usize,
}

impl FakeState {
    fn take_response(&mut self, command: &str) -> Option<FakeResponse> {
        let matching = |(response, _used): &(FakeResponse, bool)| {
            command.starts_with(response.command_prefix.as_str())
        };
        let index = self
            .responses
            .iter()
            .position(|entry| matching(entry) && !entry.1)
            .or_else(|| self.responses.iter().rposition(matching))?;

        let entry = &mut self.responses[index];
        entry.1 = true;
        Some(entry.0.clone())
    }
}

/// Scripted stand-in for the logger, shared between a test and the fake backend.
///
/// Clones share the same state, so a test can keep one handle to inspect the
/// commands the collector sent.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    name: String,
    discovery_delay: Duration,
    state: Arc<Mutex<FakeState>>,
}

#[bon]
impl FakeDevice {
    /// Creates a fake device.
    ///
    /// ```
    /// let device = pepperoni::FakeDevice::builder()
    ///     .name("peppe")
    ///     .advertised_session_time(1000)
    ///     .build();
    /// assert_eq!(0, device.connection_attempts());
    /// ```
    #[builder]
    pub fn new(
        #[builder(into)] name: String,
        advertised_session_time: Option<u32>,
        #[builder(default)] responses: Vec<FakeResponse>,
        #[builder(default)] connection_failures: usize,
        #[builder(default)] discovery_delay: Duration,
    ) -> Self {
        let state = FakeState {
            advertised_session_time,
            remaining_connection_failures: connection_failures,
            responses: responses
                .into_iter()
                .map(|response| (response, false))
                .collect(),
            ..FakeState::default()
        };

        Self {
            name,
            discovery_delay,
            state: Arc::new(Mutex::new(state)),
        }
    }
}

impl FakeDevice {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        lock_state(&self.state)
    }

    /// Changes the timestamp advertised on the next discovery.
    pub fn set_advertised_session_time(&self, timestamp: Option<u32>) {
        self.state().advertised_session_time = timestamp;
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next_connections(&self, count: usize) {
        self.state().remaining_connection_failures = count;
    }

    /// Commands received so far, without the command marker.
    #[must_use]
    pub fn written_commands(&self) -> Vec<String> {
        self.state().written_commands.clone()
    }

    /// Number of discovery scans that ran against this device.
    #[must_use]
    pub fn discoveries(&self) -> usize {
        self.state().discoveries
    }

    /// Number of connection attempts, including rejected ones.
    #[must_use]
    pub fn connection_attempts(&self) -> usize {
        self.state().connection_attempts
    }

    /// Number of notification subscriptions left open.
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.state().open_subscriptions
    }

    fn found_device(&self) -> FoundDevice {
        let manufacturer_data = self
            .state()
            .advertised_session_time
            .map(|timestamp| {
                let mut payload = vec![0x05, 0xFF];
                payload.extend_from_slice(&timestamp.to_le_bytes());
                HashMap::from([(ADVERTISEMENT_MANUFACTURER_ID, payload)])
            })
            .unwrap_or_default();

        FoundDevice::new(
            FAKE_ADAPTER_NAME,
            FAKE_DEVICE_ID,
            Some(self.name.clone()),
            Some(FAKE_RSSI),
        )
        .with_manufacturer_data(manufacturer_data)
    }
}

fn lock_state(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fake backend used in tests and non-hardware environments.
#[derive(Debug)]
pub(crate) struct FakeBackend {
    device: FakeDevice,
}

impl FakeBackend {
    pub(crate) fn new(device: FakeDevice) -> Self {
        Self { device }
    }

    pub(crate) async fn discover(
        &self,
        name: &str,
        scan_window: Duration,
    ) -> Result<FoundDevice, InteractionError> {
        self.device.state().discoveries += 1;

        let visible = self.device.name == name && self.device.discovery_delay <= scan_window;
        let wait = if visible {
            self.device.discovery_delay
        } else {
            scan_window
        };
        if !wait.is_zero() {
            sleep(wait).await;
        }

        if visible {
            Ok(self.device.found_device())
        } else {
            Err(InteractionError::DiscoveryTimeout {
                name: name.to_string(),
                scan_window,
            })
        }
    }

    pub(crate) fn connect(
        &self,
        device: &FoundDevice,
    ) -> Result<FakeDeviceSession, InteractionError> {
        let mut state = self.device.state();
        state.connection_attempts += 1;
        if state.remaining_connection_failures > 0 {
            state.remaining_connection_failures -= 1;
            debug!("fake device rejecting connection");
            return Err(InteractionError::ConnectionRejected {
                device_id: device.device_id().to_string(),
            });
        }

        Ok(FakeDeviceSession {
            device: device.clone(),
            state: Arc::clone(&self.device.state),
            link: Mutex::new(FakeLink::default()),
        })
    }
}

#[derive(Debug, Default)]
struct FakeLink {
    subscribed: bool,
    dropped: bool,
    sender: Option<UnboundedSender<Vec<u8>>>,
}

/// A connected fake session.
#[derive(Debug)]
pub(crate) struct FakeDeviceSession {
    device: FoundDevice,
    state: Arc<Mutex<FakeState>>,
    link: Mutex<FakeLink>,
}

impl FakeDeviceSession {
    fn link(&self) -> MutexGuard<'_, FakeLink> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_command_endpoint(endpoint: EndpointId) -> Result<(), InteractionError> {
        match endpoint {
            EndpointId::CommandCharacteristic => Ok(()),
            EndpointId::CommandService => Err(InteractionError::MissingEndpoint { endpoint }),
        }
    }

    fn link_up(&self) -> Result<MutexGuard<'_, FakeLink>, InteractionError> {
        let link = self.link();
        if link.dropped {
            return Err(InteractionError::LinkDropped {
                device_id: self.device.device_id().to_string(),
            });
        }
        Ok(link)
    }

    fn emit(&self, response: FakeResponse) {
        let mut link = self.link();
        if !link.subscribed {
            trace!("dropping fake response because notifications are disabled");
            return;
        }

        if let Some(sender) = &link.sender {
            for chunk in response.chunks {
                if sender.send(chunk).is_err() {
                    break;
                }
            }
        }

        let Some(loss) = response.link_loss else {
            return;
        };
        debug!(?loss, "fake device dropping the link");
        link.dropped = true;
        link.subscribed = false;
        let mut state = lock_state(&self.state);
        state.open_subscriptions = state.open_subscriptions.saturating_sub(1);
        if loss == LinkLoss::CloseStream {
            link.sender = None;
        }
    }
}

#[async_trait]
impl ConnectedBleSession for FakeDeviceSession {
    fn device(&self) -> &FoundDevice {
        &self.device
    }

    async fn write_endpoint(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        _mode: WriteMode,
    ) -> Result<(), InteractionError> {
        Self::ensure_command_endpoint(endpoint)?;
        drop(self.link_up()?);
        let text = String::from_utf8_lossy(payload);
        let command = text.strip_prefix(COMMAND_MARKER).unwrap_or(&text).to_string();

        let response = {
            let mut state = lock_state(&self.state);
            state.written_commands.push(command.clone());
            state.take_response(&command)
        };
        if let Some(response) = response {
            self.emit(response);
        }
        Ok(())
    }

    async fn subscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        Self::ensure_command_endpoint(endpoint)?;
        let mut link = self.link_up()?;
        if !link.subscribed {
            link.subscribed = true;
            lock_state(&self.state).open_subscriptions += 1;
        }
        Ok(())
    }

    async fn unsubscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        Self::ensure_command_endpoint(endpoint)?;
        let mut link = self.link_up()?;
        if link.subscribed {
            link.subscribed = false;
            let mut state = lock_state(&self.state);
            state.open_subscriptions = state.open_subscriptions.saturating_sub(1);
        }
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, InteractionError> {
        Ok(!self.link().dropped)
    }

    async fn notifications(
        &self,
        endpoint: EndpointId,
    ) -> Result<NotificationStream, InteractionError> {
        Self::ensure_command_endpoint(endpoint)?;
        let mut link = self.link_up()?;
        let (sender, receiver) = unbounded_channel();
        link.sender = Some(sender);
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn close(self: Box<Self>) -> Result<(), InteractionError> {
        let mut link = self.link();
        link.sender = None;
        if link.subscribed {
            link.subscribed = false;
            let mut state = lock_state(&self.state);
            state.open_subscriptions = state.open_subscriptions.saturating_sub(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn device_with(responses: Vec<FakeResponse>) -> FakeDevice {
        FakeDevice::builder()
            .name("peppe")
            .advertised_session_time(42)
            .responses(responses)
            .build()
    }

    #[test]
    fn take_response_consumes_in_order_then_repeats_last() {
        let device = device_with(vec![
            FakeResponse::new("turndata disp", ["first"]),
            FakeResponse::new("turndata disp", ["second"]),
        ]);
        let mut state = device.state();

        let chunks = |response: Option<FakeResponse>| response.map(|value| value.chunks);
        assert_eq!(
            Some(vec![b"first".to_vec()]),
            chunks(state.take_response("turndata disp 1"))
        );
        assert_eq!(
            Some(vec![b"second".to_vec()]),
            chunks(state.take_response("turndata disp 1"))
        );
        assert_eq!(
            Some(vec![b"second".to_vec()]),
            chunks(state.take_response("turndata disp 1"))
        );
        assert_eq!(None, chunks(state.take_response("version")));
    }

    #[tokio::test(start_paused = true)]
    async fn discover_times_out_for_other_names() {
        let backend = FakeBackend::new(device_with(Vec::new()));

        let result = backend.discover("other", Duration::from_secs(60)).await;

        assert_matches!(result, Err(InteractionError::DiscoveryTimeout { .. }));
    }

    #[tokio::test]
    async fn discover_advertises_configured_session_time() -> anyhow::Result<()> {
        let backend = FakeBackend::new(device_with(Vec::new()));

        let found = backend.discover("peppe", Duration::from_secs(60)).await?;

        assert_eq!(42, found.advertised_session_time());
        Ok(())
    }

    #[tokio::test]
    async fn dropped_link_fails_later_operations() -> anyhow::Result<()> {
        let device = device_with(vec![FakeResponse::new("version", ["v"]).then_disconnect()]);
        let backend = FakeBackend::new(device.clone());
        let found = backend.discover("peppe", Duration::from_secs(1)).await?;
        let session = backend.connect(&found)?;
        let endpoint = EndpointId::CommandCharacteristic;

        let _stream = session.notifications(endpoint).await?;
        session.subscribe_endpoint(endpoint).await?;
        session
            .write_endpoint(endpoint, b"gjcommand:version", WriteMode::WithResponse)
            .await?;

        assert!(!session.is_connected().await?);
        assert_eq!(0, device.open_subscriptions());
        assert_matches!(
            session
                .write_endpoint(endpoint, b"gjcommand:version", WriteMode::WithResponse)
                .await,
            Err(InteractionError::LinkDropped { .. })
        );
        assert_matches!(
            session.subscribe_endpoint(endpoint).await,
            Err(InteractionError::LinkDropped { .. })
        );
        assert_matches!(
            session.unsubscribe_endpoint(endpoint).await,
            Err(InteractionError::LinkDropped { .. })
        );

        let reconnected = backend.connect(&found)?;
        assert!(reconnected.is_connected().await?);
        Ok(())
    }

    #[tokio::test]
    async fn connect_rejects_scripted_failures() -> anyhow::Result<()> {
        let device = device_with(Vec::new());
        device.fail_next_connections(1);
        let backend = FakeBackend::new(device.clone());
        let found = backend.discover("peppe", Duration::from_secs(1)).await?;

        assert_matches!(
            backend.connect(&found),
            Err(InteractionError::ConnectionRejected { .. })
        );
        assert!(backend.connect(&found).is_ok());
        assert_eq!(2, device.connection_attempts());
        Ok(())
    }
}
