use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::OnceCell;
use tokio::time::{Instant, sleep};
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, trace};

use super::hardware::{ConnectedBleSession, NotificationStream, WriteMode};
use super::model::FoundDevice;
use crate::error::InteractionError;
use crate::protocol::{EndpointId, endpoint_metadata};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Hardware backend backed by `btleplug`.
#[derive(Default)]
pub(crate) struct BtleplugBackend {
    manager: OnceCell<Manager>,
    peripherals: Mutex<HashMap<String, Peripheral>>,
}

impl fmt::Debug for BtleplugBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BtleplugBackend")
            .field("initialised", &self.manager.initialized())
            .finish_non_exhaustive()
    }
}

impl BtleplugBackend {
    async fn manager(&self) -> Result<&Manager, InteractionError> {
        self.manager
            .get_or_try_init(|| async { Manager::new().await.map_err(InteractionError::from) })
            .await
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<AdapterHandle>, InteractionError> {
        let adapters = self.manager().await?.adapters().await?;
        if adapters.is_empty() {
            return Err(InteractionError::NoAdapters);
        }

        let mut handles = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let name = adapter.adapter_info().await?;
            handles.push(AdapterHandle { adapter, name });
        }
        Ok(handles)
    }

    /// Scans every adapter until a peripheral advertises exactly `name`.
    #[instrument(skip(self), level = "debug", fields(scan_window = %humantime::format_duration(scan_window)))]
    pub(crate) async fn discover(
        &self,
        name: &str,
        scan_window: Duration,
    ) -> Result<FoundDevice, InteractionError> {
        let adapters = self.adapters().await?;
        info!(adapter_count = adapters.len(), "starting BLE scan");

        for adapter in &adapters {
            adapter.adapter.start_scan(ScanFilter::default()).await?;
        }

        let deadline = Instant::now() + scan_window;
        let scan_result = async {
            loop {
                if let Some(found) = find_named_peripheral(&adapters, name).await? {
                    return Ok(Some(found));
                }
                if Instant::now() >= deadline {
                    return Ok::<_, InteractionError>(None);
                }
                sleep(SCAN_POLL_INTERVAL).await;
            }
        }
        .await;

        for handle in &adapters {
            if let Err(error) = handle.adapter.stop_scan().await {
                debug!(?error, "failed to stop adapter scan cleanly");
            }
        }

        match scan_result? {
            Some((device, peripheral)) => {
                info!(
                    device_id = device.device_id(),
                    rssi = ?device.rssi(),
                    "found matching peripheral"
                );
                self.cache_peripheral(device.device_id(), peripheral);
                Ok(device)
            }
            None => Err(InteractionError::DiscoveryTimeout {
                name: name.to_string(),
                scan_window,
            }),
        }
    }

    fn cache_peripheral(&self, device_id: &str, peripheral: Peripheral) {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.to_string(), peripheral);
    }

    fn cached_peripheral(&self, device_id: &str) -> Option<Peripheral> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
    }

    /// Connects to a discovered peripheral and resolves the command characteristic.
    #[instrument(skip(self), level = "debug", fields(device_id = device.device_id()))]
    pub(crate) async fn connect(
        &self,
        device: &FoundDevice,
    ) -> Result<RealDeviceSession, InteractionError> {
        let peripheral = self.cached_peripheral(device.device_id()).ok_or_else(|| {
            InteractionError::UnknownDevice {
                device_id: device.device_id().to_string(),
            }
        })?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let Some(characteristic) = find_command_characteristic(&peripheral) else {
            if let Err(error) = peripheral.disconnect().await {
                debug!(
                    ?error,
                    "failed to disconnect after endpoint validation error"
                );
            }
            return Err(InteractionError::MissingEndpoint {
                endpoint: EndpointId::CommandCharacteristic,
            });
        };

        info!("connected to logger");
        Ok(RealDeviceSession {
            device: device.clone(),
            peripheral,
            characteristic,
        })
    }
}

async fn find_named_peripheral(
    adapters: &[AdapterHandle],
    name: &str,
) -> Result<Option<(FoundDevice, Peripheral)>, InteractionError> {
    for adapter in adapters {
        for peripheral in adapter.adapter.peripherals().await? {
            let Some(properties) = peripheral.properties().await? else {
                continue;
            };
            if properties.local_name.as_deref() != Some(name) {
                trace!(local_name = ?properties.local_name, "skipping non-matching peripheral");
                continue;
            }

            let device = found_device_from_properties(
                adapter.name.clone(),
                peripheral.id().to_string(),
                properties,
            );
            return Ok(Some((device, peripheral)));
        }
    }

    Ok(None)
}

fn found_device_from_properties(
    adapter_name: String,
    device_id: String,
    properties: PeripheralProperties,
) -> FoundDevice {
    let PeripheralProperties {
        local_name,
        rssi,
        manufacturer_data,
        ..
    } = properties;
    FoundDevice::new(adapter_name, device_id, local_name, rssi)
        .with_manufacturer_data(manufacturer_data)
}

fn find_command_characteristic(peripheral: &Peripheral) -> Option<Characteristic> {
    let service_uuid = endpoint_metadata(EndpointId::CommandService).uuid();
    let characteristic_uuid = endpoint_metadata(EndpointId::CommandCharacteristic).uuid();

    peripheral
        .services()
        .into_iter()
        .filter(|service| {
            service
                .uuid
                .to_string()
                .eq_ignore_ascii_case(service_uuid)
        })
        .flat_map(|service| service.characteristics)
        .find(|characteristic| {
            characteristic
                .uuid
                .to_string()
                .eq_ignore_ascii_case(characteristic_uuid)
        })
}

/// Active session bound to a real peripheral.
#[derive(Debug)]
pub(crate) struct RealDeviceSession {
    device: FoundDevice,
    peripheral: Peripheral,
    characteristic: Characteristic,
}

impl RealDeviceSession {
    fn characteristic_for(
        &self,
        endpoint: EndpointId,
    ) -> Result<&Characteristic, InteractionError> {
        match endpoint {
            EndpointId::CommandCharacteristic => Ok(&self.characteristic),
            EndpointId::CommandService => Err(InteractionError::MissingEndpoint { endpoint }),
        }
    }
}

#[async_trait]
impl ConnectedBleSession for RealDeviceSession {
    fn device(&self) -> &FoundDevice {
        &self.device
    }

    #[instrument(skip(self, payload), level = "trace", fields(?endpoint, ?mode, payload_len = payload.len()))]
    async fn write_endpoint(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral
            .write(characteristic, payload, write_type)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace", fields(?endpoint))]
    async fn subscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral.subscribe(characteristic).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace", fields(?endpoint))]
    async fn unsubscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral.unsubscribe(characteristic).await?;
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, InteractionError> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn notifications(
        &self,
        endpoint: EndpointId,
    ) -> Result<NotificationStream, InteractionError> {
        let expected_uuid = self.characteristic_for(endpoint)?.uuid;
        let notifications = self.peripheral.notifications().await?;
        Ok(Box::pin(notifications.filter_map(move |notification| {
            (notification.uuid == expected_uuid).then_some(notification.value)
        })))
    }

    #[instrument(skip(self), level = "debug")]
    async fn close(self: Box<Self>) -> Result<(), InteractionError> {
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct AdapterHandle {
    adapter: Adapter,
    name: String,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn found_device_keeps_advertised_manufacturer_data() {
        let mut properties = PeripheralProperties {
            local_name: Some("peppe".to_string()),
            rssi: Some(-61),
            ..PeripheralProperties::default()
        };
        properties
            .manufacturer_data
            .insert(0xFFFF, vec![0x05, 0xFF, 0x10, 0x00, 0x00, 0x00]);

        let device =
            found_device_from_properties("hci0".to_string(), "AA:BB".to_string(), properties);

        assert_eq!(Some("peppe"), device.local_name());
        assert_eq!(Some(-61), device.rssi());
        assert_eq!(16, device.advertised_session_time());
    }
}
