use std::time::Duration;

use tokio::time::timeout;
use tokio_stream::StreamExt;
use tracing::{debug, instrument, trace};

use crate::error::InteractionError;
use crate::hw::{DeviceSession, NotificationStream, WriteMode};
use crate::protocol::{DeviceCommand, EndpointId};

use super::LineFramer;

/// Why a correlated exchange stopped waiting.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExchangeEnd {
    /// The completion predicate accepted a chunk.
    Completed,
    /// No chunk arrived within the idle timeout.
    IdleTimeout,
}

/// Bytes accumulated during one command exchange.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExchangeReply {
    data: Vec<u8>,
    ended_by: ExchangeEnd,
}

impl ExchangeReply {
    /// Every byte received, in arrival order.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Condition that ended the wait.
    #[must_use]
    pub fn ended_by(&self) -> ExchangeEnd {
        self.ended_by
    }

    /// Reply split into trimmed, non-empty lines, including an unterminated tail.
    ///
    /// ```
    /// use pepperoni::{ExchangeEnd, ExchangeReply};
    ///
    /// let reply = ExchangeReply::new(b"build 12\n\rpartial".to_vec(), ExchangeEnd::IdleTimeout);
    /// assert_eq!(vec!["build 12", "partial"], reply.lines());
    /// ```
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut framer = LineFramer::new();
        let mut lines = framer.push(&self.data);
        let tail = String::from_utf8_lossy(framer.pending());
        let tail = tail.trim();
        if !tail.is_empty() {
            lines.push(tail.to_string());
        }
        lines
    }

    /// Creates a reply from raw bytes.
    #[must_use]
    pub fn new(data: Vec<u8>, ended_by: ExchangeEnd) -> Self {
        Self { data, ended_by }
    }
}

/// Sends one command and collects its notification reply.
pub struct CommandCorrelator;

impl CommandCorrelator {
    /// Writes `command` and waits for the reply.
    ///
    /// The wait ends when `is_complete` accepts the latest chunk or when no
    /// chunk arrives for `idle_timeout`. The timeout restarts on every chunk.
    /// Running out of time is not an error: the caller decides from the
    /// returned data whether the reply is usable. Notifications are disabled
    /// again before returning, on every path.
    ///
    /// ```
    /// # async fn demo(session: pepperoni::DeviceSession) -> Result<(), pepperoni::InteractionError> {
    /// use std::time::Duration;
    ///
    /// use pepperoni::{CommandCorrelator, DeviceCommand};
    ///
    /// let reply = CommandCorrelator::send(
    ///     &session,
    ///     &DeviceCommand::Version,
    ///     Duration::from_secs(2),
    ///     |_chunk| false,
    /// )
    /// .await?;
    /// println!("{:?}", reply.lines());
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when subscribing or writing the command fails, and
    /// [`InteractionError::LinkDropped`] when the link goes down before the
    /// reply completes.
    #[instrument(
        skip(session, is_complete),
        level = "debug",
        fields(%command, idle_timeout = %humantime::format_duration(idle_timeout))
    )]
    pub async fn send<F>(
        session: &DeviceSession,
        command: &DeviceCommand,
        idle_timeout: Duration,
        mut is_complete: F,
    ) -> Result<ExchangeReply, InteractionError>
    where
        F: FnMut(&[u8]) -> bool + Send,
    {
        let endpoint = EndpointId::CommandCharacteristic;
        let mut stream = session.notifications(endpoint).await?;
        session.subscribe_endpoint(endpoint).await?;

        let result = exchange(
            session,
            &mut stream,
            command,
            idle_timeout,
            &mut is_complete,
        )
        .await;
        drop(stream);

        if let Err(error) = session.unsubscribe_endpoint(endpoint).await {
            debug!(?error, "failed to unsubscribe cleanly");
        }

        let reply = result?;
        debug!(
            ended_by = ?reply.ended_by,
            bytes = reply.data.len(),
            "command exchange finished"
        );
        Ok(reply)
    }
}

async fn exchange<F>(
    session: &DeviceSession,
    stream: &mut NotificationStream,
    command: &DeviceCommand,
    idle_timeout: Duration,
    is_complete: &mut F,
) -> Result<ExchangeReply, InteractionError>
where
    F: FnMut(&[u8]) -> bool + Send,
{
    session
        .write_endpoint(
            EndpointId::CommandCharacteristic,
            &command.encode(),
            WriteMode::WithResponse,
        )
        .await?;

    let link_dropped = || InteractionError::LinkDropped {
        device_id: session.device().device_id().to_string(),
    };

    let mut data = Vec::new();
    let ended_by = loop {
        match timeout(idle_timeout, stream.next()).await {
            Err(_elapsed) => {
                // Some backends keep a dead stream open, so ask the link directly.
                if !session.is_connected().await? {
                    return Err(link_dropped());
                }
                break ExchangeEnd::IdleTimeout;
            }
            Ok(None) => return Err(link_dropped()),
            Ok(Some(chunk)) => {
                trace!(chunk = %hex::encode(&chunk), "notification chunk");
                data.extend_from_slice(&chunk);
                if is_complete(&chunk) {
                    break ExchangeEnd::Completed;
                }
            }
        }
    };

    Ok(ExchangeReply { data, ended_by })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hw::{FakeDevice, FakeResponse, HardwareClient, fake_hardware_client};

    async fn connect(device: &FakeDevice) -> anyhow::Result<DeviceSession> {
        let client: Box<dyn HardwareClient> = fake_hardware_client(device.clone());
        let found = client.discover("peppe", Duration::from_secs(1)).await?;
        Ok(client.connect(&found).await?)
    }

    #[tokio::test(start_paused = true)]
    async fn send_stops_at_completion_predicate() -> anyhow::Result<()> {
        let device = FakeDevice::builder()
            .name("peppe")
            .responses(vec![FakeResponse::new("version", ["v1\n", "v2\n"])])
            .build();
        let session = connect(&device).await?;

        let reply = CommandCorrelator::send(
            &session,
            &DeviceCommand::Version,
            Duration::from_secs(2),
            |chunk| chunk.contains(&b'\n'),
        )
        .await?;

        assert_eq!(ExchangeEnd::Completed, reply.ended_by());
        assert_eq!(b"v1\n", reply.data());
        assert_eq!(0, device.open_subscriptions());
        assert_eq!(vec!["version".to_string()], device.written_commands());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn send_returns_partial_data_on_idle_timeout() -> anyhow::Result<()> {
        let device = FakeDevice::builder()
            .name("peppe")
            .responses(vec![FakeResponse::new("version", ["build", " 7\n"])])
            .build();
        let session = connect(&device).await?;

        let reply = CommandCorrelator::send(
            &session,
            &DeviceCommand::Version,
            Duration::from_secs(2),
            |_chunk| false,
        )
        .await?;

        assert_eq!(ExchangeEnd::IdleTimeout, reply.ended_by());
        assert_eq!(vec!["build 7".to_string()], reply.lines());
        assert_eq!(0, device.open_subscriptions());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn send_fails_when_link_drops_mid_reply() -> anyhow::Result<()> {
        let device = FakeDevice::builder()
            .name("peppe")
            .responses(vec![FakeResponse::new("version", ["v"]).then_disconnect()])
            .build();
        let session = connect(&device).await?;

        let result = CommandCorrelator::send(
            &session,
            &DeviceCommand::Version,
            Duration::from_secs(2),
            |_chunk| false,
        )
        .await;

        assert_matches!(result, Err(InteractionError::LinkDropped { .. }));
        assert_eq!(0, device.open_subscriptions());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn send_checks_link_when_reply_goes_quiet() -> anyhow::Result<()> {
        let device = FakeDevice::builder()
            .name("peppe")
            .responses(vec![
                FakeResponse::new("version", ["v"]).then_lose_link_silently(),
            ])
            .build();
        let session = connect(&device).await?;

        let result = CommandCorrelator::send(
            &session,
            &DeviceCommand::Version,
            Duration::from_secs(2),
            |_chunk| false,
        )
        .await;

        assert_matches!(result, Err(InteractionError::LinkDropped { .. }));
        Ok(())
    }
}
