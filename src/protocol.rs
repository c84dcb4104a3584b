use std::collections::HashMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// Prefix the device firmware expects in front of every command write.
pub const COMMAND_MARKER: &str = "gjcommand:";

/// Manufacturer-data key carrying the advertised session timestamp.
pub const ADVERTISEMENT_MANUFACTURER_ID: u16 = 0xFFFF;

/// Known device protocol endpoints.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum EndpointId {
    /// Service hosting the command characteristic.
    #[strum(to_string = "command_service")]
    CommandService,
    /// Characteristic used for command writes and response notifications.
    #[strum(to_string = "command_characteristic")]
    CommandCharacteristic,
}

/// Endpoint category in GATT.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub(crate) enum EndpointKind {
    #[strum(to_string = "service")]
    Service,
    #[strum(to_string = "characteristic")]
    Characteristic,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    uuid: &'static str,
    kind: EndpointKind,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// Endpoint UUID.
    pub(crate) fn uuid(self) -> &'static str {
        self.uuid
    }

    /// Endpoint kind.
    pub(crate) fn kind(self) -> EndpointKind {
        self.kind
    }
}

pub(crate) static ENDPOINTS_BY_ID: LazyLock<HashMap<EndpointId, EndpointMetadata>> =
    LazyLock::new(|| {
        EndpointId::iter()
            .map(|endpoint| (endpoint, metadata_for(endpoint)))
            .collect()
    });

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    *ENDPOINTS_BY_ID
        .get(&endpoint)
        .unwrap_or(&metadata_for(endpoint))
}

fn metadata_for(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::CommandService => EndpointMetadata {
            name: "logger command service",
            uuid: "000000ee-0000-1000-8000-00805f9b34fb",
            kind: EndpointKind::Service,
        },
        EndpointId::CommandCharacteristic => EndpointMetadata {
            name: "logger command/notify data",
            uuid: "0000ee01-0000-1000-8000-00805f9b34fb",
            kind: EndpointKind::Characteristic,
        },
    }
}

/// Text commands understood by the logger firmware.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum DeviceCommand {
    /// Lists every stored session whose start time is at or after `min_time`.
    #[display("turndata disp {min_time}")]
    TurnDataDisplay { min_time: i64 },
    /// Erases the device's session storage.
    #[display("turndata clear")]
    TurnDataClear,
    /// Sets the device clock.
    #[display("unixtime {timestamp}")]
    UnixTime { timestamp: i64 },
    /// Prints firmware build information.
    #[display("version")]
    Version,
}

impl DeviceCommand {
    /// Encodes the command as the single write payload sent to the device.
    ///
    /// ```
    /// use pepperoni::DeviceCommand;
    ///
    /// let payload = DeviceCommand::TurnDataDisplay { min_time: 1001 }.encode();
    /// assert_eq!(b"gjcommand:turndata disp 1001".to_vec(), payload);
    /// ```
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        format!("{COMMAND_MARKER}{self}").into_bytes()
    }
}
