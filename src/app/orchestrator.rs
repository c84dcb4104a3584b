use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::state::DeviceState;
use crate::error::ProtocolError;
use crate::handlers::{ClearHandler, SessionFetchHandler, TimeSyncHandler, VersionHandler};
use crate::hw::{DeviceSession, FoundDevice, HardwareClient};
use crate::store::LocalStore;

/// First attempt plus five retries.
pub(crate) const CYCLE_ATTEMPTS: usize = 6;

/// What one successful device cycle did.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct CycleReport {
    sessions: usize,
    cleared: bool,
    attempts: usize,
}

impl CycleReport {
    /// Sessions appended to the pending store.
    #[must_use]
    pub fn sessions(&self) -> usize {
        self.sessions
    }

    /// Whether `turndata clear` was issued.
    #[must_use]
    pub fn cleared(&self) -> bool {
        self.cleared
    }

    /// Connection attempts used, including the successful one.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

/// Runs the per-connection exchange sequence with retries.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOrchestrator {
    fetch: SessionFetchHandler,
    clear_enabled: bool,
}

impl ConnectionOrchestrator {
    #[must_use]
    pub fn new(fetch: SessionFetchHandler, clear_enabled: bool) -> Self {
        Self {
            fetch,
            clear_enabled,
        }
    }

    /// Connects to `device` and runs clock sync, fetch, then the optional
    /// clear and version exchanges.
    ///
    /// A failed attempt is retried from a fresh connection. The session is
    /// closed after every attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::RetriesExhausted`] wrapping the last failure
    /// once every attempt failed.
    #[instrument(skip_all, level = "info", fields(device_id = device.device_id()))]
    pub async fn run_cycle(
        &self,
        hardware: &dyn HardwareClient,
        device: &FoundDevice,
        state: &mut DeviceState,
        store: &LocalStore,
    ) -> Result<CycleReport, ProtocolError> {
        let mut attempt = 1;
        loop {
            match self.attempt(hardware, device, state, store).await {
                Ok(report) => {
                    return Ok(CycleReport {
                        attempts: attempt,
                        ..report
                    });
                }
                Err(error) if attempt < CYCLE_ATTEMPTS => {
                    warn!(attempt, %error, "device cycle failed; retrying");
                    attempt += 1;
                }
                Err(error) => {
                    return Err(ProtocolError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        hardware: &dyn HardwareClient,
        device: &FoundDevice,
        state: &mut DeviceState,
        store: &LocalStore,
    ) -> Result<CycleReport, ProtocolError> {
        info!("connecting to logger");
        let session = hardware.connect(device).await?;

        let result = self.exchange(&session, state, store).await;

        if let Err(error) = session.close().await {
            debug!(?error, "failed to close session cleanly");
        }
        result
    }

    async fn exchange(
        &self,
        session: &DeviceSession,
        state: &mut DeviceState,
        store: &LocalStore,
    ) -> Result<CycleReport, ProtocolError> {
        TimeSyncHandler::sync_time(session, OffsetDateTime::now_utc()).await?;

        let batch = self
            .fetch
            .fetch(session, state.newest_session_time())
            .await?
            .into_complete()?;
        store.append_pending(batch.lines())?;
        state.record_batch(&batch);

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let cleared = state.clear_due(self.clear_enabled, now);
        if cleared {
            ClearHandler::clear(session).await?;
            state.mark_cleared();
        }

        if state.take_diagnostics() {
            VersionHandler::query(session).await?;
        }

        Ok(CycleReport {
            sessions: batch.lines().len(),
            cleared,
            attempts: 1,
        })
    }
}
