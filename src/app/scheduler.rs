use std::time::{Duration, SystemTime};

use time::OffsetDateTime;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::orchestrator::{ConnectionOrchestrator, CycleReport};
use super::state::DeviceState;
use crate::cli::CollectorConfig;
use crate::error::{InteractionError, ProtocolError};
use crate::handlers::SessionFetchHandler;
use crate::hw::HardwareClient;
use crate::store::{LocalStore, MergeReport};
use crate::upload::UploadForwarder;

/// Shortest wait between two reads.
pub const MIN_READ_DELAY: Duration = Duration::from_secs(15 * 60);
/// Pause forced after repeated cycle failures.
pub const ERROR_COOLDOWN: Duration = Duration::from_secs(30);
/// Consecutive failures that trigger the cooldown.
pub const ERROR_COOLDOWN_THRESHOLD: u32 = 5;

const SESSIONS_PER_SLOT: i64 = 16;
const GRACE_SECONDS: i64 = 60;

/// Seconds until the device should have a new session, which may be negative.
///
/// `None` while the high-water mark or the period is unknown.
///
/// ```
/// assert_eq!(Some(-30), pepperoni::candidate_delay(1000, Some(60), 1000 + 60 * 16 + 90));
/// assert_eq!(None, pepperoni::candidate_delay(0, Some(60), 5000));
/// ```
#[must_use]
pub fn candidate_delay(newest_session_time: i64, period: Option<u32>, now: i64) -> Option<i64> {
    let period = period?;
    if newest_session_time == 0 {
        return None;
    }
    Some(newest_session_time + i64::from(period) * SESSIONS_PER_SLOT + GRACE_SECONDS - now)
}

/// Delay before the next read, never shorter than [`MIN_READ_DELAY`].
///
/// ```
/// use std::time::Duration;
///
/// assert_eq!(Duration::from_secs(900), pepperoni::next_read_delay(1000, Some(60), 1990));
/// assert_eq!(Duration::from_secs(1000), pepperoni::next_read_delay(10_000, Some(60), 10_020));
/// ```
#[must_use]
pub fn next_read_delay(newest_session_time: i64, period: Option<u32>, now: i64) -> Duration {
    candidate_delay(newest_session_time, period, now)
        .and_then(|seconds| u64::try_from(seconds).ok())
        .map(Duration::from_secs)
        .map_or(MIN_READ_DELAY, |candidate| candidate.max(MIN_READ_DELAY))
}

/// Result of one scheduling tick.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TickOutcome {
    /// No logger answered within the scan window.
    NotFound,
    /// The advertisement showed nothing new.
    UpToDate,
    /// Sessions were fetched and merged.
    Collected {
        cycle: CycleReport,
        merge: MergeReport,
    },
}

/// Drives discovery, collection and merging for one logger.
pub struct ScheduleController {
    hardware: Box<dyn HardwareClient>,
    store: LocalStore,
    forwarder: UploadForwarder,
    orchestrator: ConnectionOrchestrator,
    device_name: String,
    scan_window: Duration,
    state: DeviceState,
}

impl std::fmt::Debug for ScheduleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleController")
            .field("device_name", &self.device_name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ScheduleController {
    /// Creates a controller from configuration and collaborators.
    #[must_use]
    pub fn new(
        config: &CollectorConfig,
        hardware: Box<dyn HardwareClient>,
        forwarder: UploadForwarder,
    ) -> Self {
        Self {
            hardware,
            store: LocalStore::new(config.confirmed_path(), config.pending_path()),
            forwarder,
            orchestrator: ConnectionOrchestrator::new(
                SessionFetchHandler::new(config.debug()),
                config.clear_enabled(),
            ),
            device_name: config.device_name().to_string(),
            scan_window: config.scan_window(),
            state: DeviceState::new(config.diagnostics()),
        }
    }

    /// Current collector state.
    #[must_use]
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    #[must_use]
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Runs one tick and returns how long to wait before the next.
    ///
    /// A failed tick is counted and then waits the usual read delay. After
    /// [`ERROR_COOLDOWN_THRESHOLD`] failures in a row the next tick first
    /// pauses for [`ERROR_COOLDOWN`] and rescans.
    pub async fn tick(&mut self) -> Duration {
        if self.state.consecutive_errors() >= ERROR_COOLDOWN_THRESHOLD {
            warn!(
                errors = self.state.consecutive_errors(),
                cooldown = %humantime::format_duration(ERROR_COOLDOWN),
                "too many consecutive failures; pausing before rediscovery"
            );
            sleep(ERROR_COOLDOWN).await;
            self.state.reset_errors();
            self.state.forget_device();
        }

        match self.cycle().await {
            Ok(outcome) => {
                self.state.reset_errors();
                info!(?outcome, "cycle finished");
                self.next_delay()
            }
            Err(error) => {
                let errors = self.state.record_error();
                warn!(%error, errors, "cycle failed");
                self.next_delay()
            }
        }
    }

    /// One discovery, collection and merge pass.
    ///
    /// # Errors
    ///
    /// Returns an error when discovery fails for a reason other than a
    /// timeout, every connection attempt fails, or the store is unusable.
    #[instrument(skip(self), level = "info", fields(device_name = %self.device_name))]
    pub async fn cycle(&mut self) -> Result<TickOutcome, ProtocolError> {
        let device = match self.state.device() {
            Some(device) => device.clone(),
            None => match self
                .hardware
                .discover(&self.device_name, self.scan_window)
                .await
            {
                Ok(device) => {
                    self.state.remember_device(device.clone());
                    device
                }
                Err(error @ InteractionError::DiscoveryTimeout { .. }) => {
                    info!(%error, "logger not found");
                    return Ok(TickOutcome::NotFound);
                }
                Err(error) => return Err(error.into()),
            },
        };

        let advertised = device.advertised_session_time();
        info!(
            advertised,
            newest = self.state.newest_session_time(),
            "advertised session time"
        );

        let outcome = if advertised != 0
            && i64::from(advertised) != self.state.newest_session_time()
        {
            let cycle = self
                .orchestrator
                .run_cycle(
                    self.hardware.as_ref(),
                    &device,
                    &mut self.state,
                    &self.store,
                )
                .await?;
            let merge = self.store.merge(&self.forwarder).await?;
            TickOutcome::Collected { cycle, merge }
        } else {
            TickOutcome::UpToDate
        };

        // The cached advertisement never refreshes, so always rescan next time.
        self.state.forget_device();
        Ok(outcome)
    }

    /// Merges a pending store left behind by an earlier run.
    ///
    /// # Errors
    ///
    /// Returns an error when the store files cannot be read or written.
    pub async fn flush(&self) -> Result<MergeReport, ProtocolError> {
        Ok(self.store.merge(&self.forwarder).await?)
    }

    /// Ticks until `shutdown` is cancelled. Cancellation only interrupts the
    /// wait between ticks.
    pub async fn run(mut self, shutdown: CancellationToken) {
        if self.store.has_pending()
            && let Err(error) = self.flush().await
        {
            warn!(%error, "failed to merge leftover pending sessions");
        }

        loop {
            let delay = self.tick().await;
            info!(
                next_read = %humantime::format_rfc3339_seconds(SystemTime::now() + delay),
                "waiting for next read"
            );

            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                () = sleep(delay) => {}
            }
        }
    }

    fn next_delay(&self) -> Duration {
        next_read_delay(
            self.state.newest_session_time(),
            self.state.period(),
            OffsetDateTime::now_utc().unix_timestamp(),
        )
    }
}
