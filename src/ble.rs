use async_trait::async_trait;
use btleplug::{
    api::{
        BDAddr, Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures::stream::StreamExt;
use std::{collections::HashMap, time::Duration};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{BikeError, Result},
    transport::{Connection, NotificationSender, Transport},
    types::{DeviceInfo, ScanParams},
};

/// How often the adapter's peripheral list is checked while looking for a device
const DISCOVERY_POLL: Duration = Duration::from_millis(250);

/// btleplug-backed transport
pub struct BleTransport {
    manager: Manager,
    scan: ScanParams,
}

impl BleTransport {
    /// Create a transport on the system's Bluetooth stack
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Ble`] if the Bluetooth manager cannot be initialized.
    pub async fn new() -> Result<Self> {
        Self::with_scan_params(ScanParams::default()).await
    }

    /// Create a transport that uses `scan` when locating devices
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Ble`] if the Bluetooth manager cannot be initialized.
    pub async fn with_scan_params(scan: ScanParams) -> Result<Self> {
        let manager = Manager::new().await?;
        Ok(Self { manager, scan })
    }

    /// List nearby devices, strongest signal first
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::DeviceNotFound`] if no Bluetooth adapter is available,
    /// or [`BikeError::Ble`] for other Bluetooth-related errors.
    pub async fn scan_for_devices(&self, params: &ScanParams) -> Result<Vec<DeviceInfo>> {
        info!("Starting scan for {}ms...", params.scan_timeout_ms);

        let central = self.adapter().await?;
        central.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(Duration::from_millis(params.scan_timeout_ms)).await;
        central.stop_scan().await?;

        let filter = params.name_filter.as_ref().map(|f| f.to_lowercase());
        let mut devices = Vec::new();
        for peripheral in central.peripherals().await? {
            let Some(info) = extract_device_info(&peripheral).await else {
                continue;
            };
            if let Some(filter) = &filter {
                if !info.name.to_lowercase().contains(filter) {
                    continue;
                }
            }
            debug!("Found device: {} (rssi {})", info, info.rssi);
            devices.push(info);
        }

        devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        info!("Scan completed. Found {} device(s)", devices.len());
        Ok(devices)
    }

    async fn adapter(&self) -> Result<Adapter> {
        self.manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BikeError::DeviceNotFound)
    }

    /// Scan until a peripheral matching `device_id` shows up or the scan window closes
    async fn find_peripheral(&self, central: &Adapter, device_id: &str) -> Result<Peripheral> {
        central.start_scan(ScanFilter::default()).await?;
        let deadline = Instant::now() + Duration::from_millis(self.scan.scan_timeout_ms);

        let found = loop {
            let mut found = None;
            for peripheral in central.peripherals().await? {
                let address = peripheral.address().to_string();
                let id = peripheral.id().to_string();
                if matches_device(device_id, &address, &id) {
                    found = Some(peripheral);
                    break;
                }
            }
            if found.is_some() || Instant::now() >= deadline {
                break found;
            }
            tokio::time::sleep(DISCOVERY_POLL).await;
        };

        if let Err(e) = central.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        found.ok_or(BikeError::DeviceNotFound)
    }
}

#[async_trait]
impl Transport for BleTransport {
    type Connection = BleConnection;

    async fn connect(&self, device_id: &str) -> Result<BleConnection> {
        info!("Connecting to device: {}", device_id);

        let central = self.adapter().await?;
        let peripheral = self.find_peripheral(&central, device_id).await?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral
                .connect()
                .await
                .map_err(|e| BikeError::ConnectionFailed(e.to_string()))?;
        }
        peripheral.discover_services().await?;

        info!("Successfully connected to {}", device_id);
        Ok(BleConnection {
            peripheral,
            forwarders: HashMap::new(),
        })
    }
}

/// Open connection to a bike
pub struct BleConnection {
    peripheral: Peripheral,
    forwarders: HashMap<Uuid, JoinHandle<()>>,
}

impl BleConnection {
    /// Characteristics the bike can be driven through: writable and notifying
    #[must_use]
    pub fn writable_characteristics(&self) -> Vec<Uuid> {
        self.peripheral
            .characteristics()
            .into_iter()
            .filter(|c| {
                c.properties.contains(CharPropFlags::NOTIFY)
                    && c.properties
                        .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
            })
            .map(|c| c.uuid)
            .collect()
    }

    /// Get device address
    #[must_use]
    pub fn address(&self) -> BDAddr {
        self.peripheral.address()
    }

    fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| BikeError::Protocol(format!("Characteristic {uuid} not found")))
    }
}

#[async_trait]
impl Connection for BleConnection {
    async fn subscribe(&mut self, characteristic: Uuid, handler: NotificationSender) -> Result<()> {
        let target = self.find_characteristic(characteristic)?;

        // Open the stream first so no notification slips between subscribe and forwarding.
        let stream = self.peripheral.notifications().await?;
        self.peripheral
            .subscribe(&target)
            .await
            .map_err(|e| BikeError::SubscribeFailed(e.to_string()))?;

        let forwarder = tokio::spawn(handle_notifications(stream, characteristic, handler));
        if let Some(previous) = self.forwarders.insert(characteristic, forwarder) {
            previous.abort();
        }

        debug!("Subscribed to {}", characteristic);
        Ok(())
    }

    async fn write(&mut self, characteristic: Uuid, data: &[u8], require_ack: bool) -> Result<()> {
        let target = self.find_characteristic(characteristic)?;
        let write_type = if require_ack {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.peripheral
            .write(&target, data, write_type)
            .await
            .map_err(|e| BikeError::WriteFailed(e.to_string()))
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<()> {
        if let Some(forwarder) = self.forwarders.remove(&characteristic) {
            forwarder.abort();
        }

        let target = self.find_characteristic(characteristic)?;
        self.peripheral
            .unsubscribe(&target)
            .await
            .map_err(|e| BikeError::SubscribeFailed(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<()> {
        for (_, forwarder) in self.forwarders.drain() {
            forwarder.abort();
        }
        self.peripheral.disconnect().await?;
        info!("Disconnected from {}", self.peripheral.address());
        Ok(())
    }
}

impl Drop for BleConnection {
    fn drop(&mut self) {
        for forwarder in self.forwarders.values() {
            forwarder.abort();
        }
    }
}

/// Forward notifications for `characteristic` until the stream or the handler closes
async fn handle_notifications<S>(mut stream: S, characteristic: Uuid, sender: NotificationSender)
where
    S: futures::Stream<Item = btleplug::api::ValueNotification> + Send + Unpin + 'static,
{
    while let Some(notification) = stream.next().await {
        if notification.uuid == characteristic && sender.send(notification.value).is_err() {
            break;
        }
    }
    debug!("Notification stream for {} closed", characteristic);
}

/// Read name, address and signal strength; `None` for unnamed peripherals
async fn extract_device_info(peripheral: &Peripheral) -> Option<DeviceInfo> {
    let properties = peripheral.properties().await.ok()??;
    let name = properties.local_name?;
    Some(DeviceInfo::new(
        name,
        properties.address.to_string(),
        properties.rssi.unwrap_or(0),
    ))
}

/// Case-insensitive match against either the MAC address or the platform id
fn matches_device(device_id: &str, address: &str, id: &str) -> bool {
    let wanted = device_id.trim();
    !wanted.is_empty() && (wanted.eq_ignore_ascii_case(address) || wanted.eq_ignore_ascii_case(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_device_by_address() {
        assert!(matches_device(
            "aa:bb:cc:dd:ee:ff",
            "AA:BB:CC:DD:EE:FF",
            "hci0/dev_AA_BB_CC_DD_EE_FF"
        ));
        assert!(matches_device(" AA:BB:CC:DD:EE:FF ", "AA:BB:CC:DD:EE:FF", ""));
    }

    #[test]
    fn test_matches_device_by_platform_id() {
        assert!(matches_device(
            "5D1E0E4A-6C3B-4E0F-9E21-000000000000",
            "00:00:00:00:00:00",
            "5d1e0e4a-6c3b-4e0f-9e21-000000000000"
        ));
    }

    #[test]
    fn test_matches_device_rejects_others() {
        assert!(!matches_device("AA:BB:CC:DD:EE:00", "AA:BB:CC:DD:EE:FF", "x"));
        assert!(!matches_device("", "", ""));
    }
}
