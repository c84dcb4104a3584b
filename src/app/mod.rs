mod orchestrator;
mod scheduler;
mod state;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::cli::{CollectorConfig, Command};
use crate::hw::HardwareClient;
use crate::telemetry;
use crate::upload::{UploadClient, UploadForwarder};

pub use self::orchestrator::{ConnectionOrchestrator, CycleReport};
pub use self::scheduler::{
    ERROR_COOLDOWN, ERROR_COOLDOWN_THRESHOLD, MIN_READ_DELAY, ScheduleController, TickOutcome,
    candidate_delay, next_read_delay,
};
pub use self::state::DeviceState;

const SERVICE_NAME: &str = "pepperoni";

/// Builds a controller wired to the given collaborators.
///
/// ```
/// use pepperoni::{CollectorConfig, FakeDevice, ReqwestUploadClient, build_controller, fake_hardware_client};
///
/// let config = CollectorConfig::builder()
///     .server("http://collector.local")
///     .confirmed_path("/tmp/readings.txt")
///     .pending_path("/tmp/newreadings.txt")
///     .build();
/// let device = FakeDevice::builder().name("peppe").build();
/// let controller = build_controller(
///     &config,
///     fake_hardware_client(device),
///     Box::new(ReqwestUploadClient::new()?),
/// );
/// assert_eq!(0, controller.state().newest_session_time());
/// # Ok::<(), pepperoni::UploadError>(())
/// ```
#[must_use]
pub fn build_controller(
    config: &CollectorConfig,
    hardware_client: Box<dyn HardwareClient>,
    upload_client: Box<dyn UploadClient>,
) -> ScheduleController {
    let forwarder = UploadForwarder::new(upload_client, config.server(), config.device_name());
    ScheduleController::new(config, hardware_client, forwarder)
}

/// Runs a collector command with injected clients.
///
/// Installs tracing on first use. `shutdown` ends the `run` loop at its next wait.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, or a `once`/`flush`
/// command fails.
#[instrument(
    skip(config, hardware_client, upload_client, shutdown),
    level = "info",
    fields(?command, device_name = config.device_name())
)]
pub async fn run(
    command: Command,
    config: CollectorConfig,
    hardware_client: Box<dyn HardwareClient>,
    upload_client: Box<dyn UploadClient>,
    shutdown: CancellationToken,
) -> Result<()> {
    telemetry::initialise_tracing(SERVICE_NAME, config.log_level())?;

    let mut controller = build_controller(&config, hardware_client, upload_client);
    match command {
        Command::Run => controller.run(shutdown).await,
        Command::Once => {
            let outcome = controller.cycle().await?;
            info!(?outcome, "single cycle finished");
        }
        Command::Flush => {
            let report = controller.flush().await?;
            info!(
                uploaded = report.merged(),
                duplicates = report.duplicates(),
                "flush finished"
            );
        }
    }
    Ok(())
}
