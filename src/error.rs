use std::path::PathBuf;
use std::time::Duration;

use derive_more::From;
use thiserror::Error;

use crate::protocol::{EndpointId, endpoint_metadata};
use crate::record::RecordParseError;

/// Errors returned by BLE interaction operations.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error(
        "no device advertising as `{name}` was found within {}",
        humantime::format_duration(*scan_window)
    )]
    DiscoveryTimeout { name: String, scan_window: Duration },
    #[error("device `{device_id}` is no longer known to the adapter")]
    UnknownDevice { device_id: String },
    #[error(
        "required {kind} `{name}` ({uuid}) was not found on the connected device",
        kind = endpoint_metadata(*endpoint).kind(),
        name = endpoint_metadata(*endpoint).name(),
        uuid = endpoint_metadata(*endpoint).uuid()
    )]
    MissingEndpoint { endpoint: EndpointId },
    #[error("device `{device_id}` rejected the connection")]
    ConnectionRejected { device_id: String },
    #[error("link to device `{device_id}` dropped during an exchange")]
    LinkDropped { device_id: String },
}

/// Errors returned by the local session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access session store `{}`", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors returned while forwarding a session to the remote collector.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("collector request failed")]
    Http(#[from] reqwest::Error),
    #[error("session line cannot be uploaded")]
    Record(#[from] RecordParseError),
}

/// Errors returned when validating runtime options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("--server is required")]
    MissingServer,
    #[error("no platform data directory is available; pass --readings and --new-readings")]
    MissingDataDirectory,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level protocol errors wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum ProtocolError {
    #[error("device declared {declared} sessions but {collected} were received")]
    #[from(ignore)]
    IncompleteTransfer { declared: usize, collected: usize },
    #[error("device ended its listing with an unreadable session count: `{line}`")]
    #[from(ignore)]
    UnreadableSessionCount { line: String },
    #[error("device cycle failed after {attempts} attempts")]
    #[from(ignore)]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: Box<ProtocolError>,
    },
    #[error(transparent)]
    #[from(InteractionError, Box<InteractionError>)]
    Interaction(Box<InteractionError>),
    #[error(transparent)]
    #[from(StoreError, Box<StoreError>)]
    Store(Box<StoreError>),
}
