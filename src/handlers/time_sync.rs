use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::error::ProtocolError;
use crate::hw::DeviceSession;
use crate::protocol::DeviceCommand;

use super::CommandCorrelator;

pub(crate) const SHORT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Handler for device clock synchronisation.
pub struct TimeSyncHandler;

impl TimeSyncHandler {
    fn command_for(timestamp: OffsetDateTime) -> DeviceCommand {
        DeviceCommand::UnixTime {
            timestamp: timestamp.unix_timestamp(),
        }
    }

    /// Sets the device clock with `unixtime <epoch>`.
    ///
    /// ```
    /// # async fn demo(session: pepperoni::DeviceSession) -> Result<(), pepperoni::ProtocolError> {
    /// use pepperoni::TimeSyncHandler;
    /// use time::OffsetDateTime;
    ///
    /// TimeSyncHandler::sync_time(&session, OffsetDateTime::now_utc()).await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the BLE exchange fails.
    #[instrument(
        skip(session),
        level = "debug",
        fields(unix_timestamp = timestamp.unix_timestamp())
    )]
    pub async fn sync_time(
        session: &DeviceSession,
        timestamp: OffsetDateTime,
    ) -> Result<(), ProtocolError> {
        let reply = CommandCorrelator::send(
            session,
            &Self::command_for(timestamp),
            SHORT_REPLY_TIMEOUT,
            |chunk| chunk.contains(&b'\n'),
        )
        .await?;
        debug!(reply = ?reply.lines(), "device clock set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use time::{Date, Month, PrimitiveDateTime, Time, UtcOffset};

    use super::*;

    #[test]
    fn command_carries_unix_seconds() -> anyhow::Result<()> {
        let timestamp = PrimitiveDateTime::new(
            Date::from_calendar_date(2026, Month::February, 16)?,
            Time::from_hms(9, 30, 45)?,
        )
        .assume_offset(UtcOffset::UTC);

        assert_eq!(
            "unixtime 1771234245",
            TimeSyncHandler::command_for(timestamp).to_string()
        );
        Ok(())
    }
}
