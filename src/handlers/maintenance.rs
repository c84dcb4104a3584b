use tracing::{info, instrument};

use crate::error::ProtocolError;
use crate::hw::DeviceSession;
use crate::protocol::DeviceCommand;

use super::CommandCorrelator;
use super::time_sync::SHORT_REPLY_TIMEOUT;

/// Handler for erasing the device's session storage.
pub struct ClearHandler;

impl ClearHandler {
    /// Sends `turndata clear`.
    ///
    /// ```
    /// # async fn demo(session: pepperoni::DeviceSession) -> Result<(), pepperoni::ProtocolError> {
    /// pepperoni::ClearHandler::clear(&session).await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the BLE exchange fails.
    #[instrument(skip(session), level = "debug")]
    pub async fn clear(session: &DeviceSession) -> Result<(), ProtocolError> {
        CommandCorrelator::send(
            session,
            &DeviceCommand::TurnDataClear,
            SHORT_REPLY_TIMEOUT,
            |chunk| chunk.contains(&b'\n'),
        )
        .await?;
        info!("device sessions cleared");
        Ok(())
    }
}

/// Handler for the firmware `version` report.
pub struct VersionHandler;

impl VersionHandler {
    /// Sends `version` and collects every line until the device goes quiet.
    ///
    /// # Errors
    ///
    /// Returns an error when the BLE exchange fails.
    #[instrument(skip(session), level = "debug")]
    pub async fn query(session: &DeviceSession) -> Result<Vec<String>, ProtocolError> {
        let reply = CommandCorrelator::send(
            session,
            &DeviceCommand::Version,
            SHORT_REPLY_TIMEOUT,
            |_chunk| false,
        )
        .await?;

        let lines = reply.lines();
        for line in &lines {
            info!(line = %line, "firmware");
        }
        Ok(lines)
    }
}
