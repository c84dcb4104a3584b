use std::collections::HashMap;

use super::advertisement::AdvertisementDecoder;

/// A discovered BLE peripheral that matched the configured device name.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FoundDevice {
    adapter_name: String,
    device_id: String,
    local_name: Option<String>,
    rssi: Option<i16>,
    manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl FoundDevice {
    /// Creates a new discovered-device record.
    #[must_use]
    pub fn new(
        adapter_name: impl Into<String>,
        device_id: impl Into<String>,
        local_name: Option<String>,
        rssi: Option<i16>,
    ) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            device_id: device_id.into(),
            local_name,
            rssi,
            manufacturer_data: HashMap::new(),
        }
    }

    /// Attaches the manufacturer data captured from the advertisement.
    #[must_use]
    pub fn with_manufacturer_data(mut self, manufacturer_data: HashMap<u16, Vec<u8>>) -> Self {
        self.manufacturer_data = manufacturer_data;
        self
    }

    /// Returns the adapter name used to discover this device.
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Returns the backend-specific device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the RSSI observed at discovery time, if present.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Returns the raw manufacturer data keyed by company identifier.
    #[must_use]
    pub fn manufacturer_data(&self) -> &HashMap<u16, Vec<u8>> {
        &self.manufacturer_data
    }

    /// Returns the session timestamp advertised by the device, or `0`.
    #[must_use]
    pub fn advertised_session_time(&self) -> u32 {
        AdvertisementDecoder::decode(&self.manufacturer_data)
    }
}
