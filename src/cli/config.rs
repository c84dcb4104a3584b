use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use tracing::level_filters::LevelFilter;

pub(crate) const DEFAULT_DEVICE_NAME: &str = "peppe";
pub(crate) const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(60);

/// Runtime settings shared by every collector component.
///
/// ```
/// use pepperoni::CollectorConfig;
///
/// let config = CollectorConfig::builder()
///     .server("http://collector.local")
///     .confirmed_path("/tmp/readings.txt")
///     .pending_path("/tmp/newreadings.txt")
///     .build();
/// assert_eq!("peppe", config.device_name());
/// ```
#[derive(Debug, Clone, Builder)]
pub struct CollectorConfig {
    #[builder(into, default = DEFAULT_DEVICE_NAME.to_string())]
    device_name: String,
    #[builder(into)]
    server: String,
    #[builder(into)]
    confirmed_path: PathBuf,
    #[builder(into)]
    pending_path: PathBuf,
    #[builder(default)]
    clear_enabled: bool,
    #[builder(default)]
    debug: bool,
    #[builder(default)]
    diagnostics: bool,
    #[builder(default = DEFAULT_SCAN_WINDOW)]
    scan_window: Duration,
}

impl CollectorConfig {
    /// Exact local name the logger advertises.
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Base URL of the remote collector.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    #[must_use]
    pub fn confirmed_path(&self) -> &Path {
        &self.confirmed_path
    }

    #[must_use]
    pub fn pending_path(&self) -> &Path {
        &self.pending_path
    }

    /// Whether the periodic `turndata clear` is allowed.
    #[must_use]
    pub fn clear_enabled(&self) -> bool {
        self.clear_enabled
    }

    /// Whether device output is echoed and debug logging enabled.
    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Whether to run the `version` exchange on the first connection.
    #[must_use]
    pub fn diagnostics(&self) -> bool {
        self.diagnostics
    }

    /// How long one discovery scan may run.
    #[must_use]
    pub fn scan_window(&self) -> Duration {
        self.scan_window
    }

    /// Default log level when `RUST_LOG` is unset.
    #[must_use]
    pub fn log_level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        }
    }
}
