//! btleplug-backed [`BleTransport`] for native hosts.
//!
//! Provides scanning, connecting, service discovery and characteristic
//! writes. Peripherals seen during a scan are cached by id so later calls
//! can address them without rescanning.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{Mutex, broadcast};

use crate::ble_init::{RETRY_COUNT, RETRY_DELAY, is_central_manager_transient, wrap_ble_init_error};
use crate::transport::{
    BleTransport, CharacteristicInfo, DeviceInfo, TransportCapabilities, TransportEvent, WriteMode,
};
use crate::{PrinterError, Result};

const EVENT_CAPACITY: usize = 32;

/// Native BLE transport over the first available adapter.
pub struct BtleplugTransport {
    adapter: Adapter,
    peripherals: Mutex<HashMap<String, Peripheral>>,
    events: broadcast::Sender<TransportEvent>,
}

impl BtleplugTransport {
    /// Initialize the platform BLE adapter (first available) and start
    /// forwarding disconnect events.
    pub async fn new() -> Result<Self> {
        let mut attempt = 0;
        let adapter = loop {
            match first_adapter().await {
                Ok(adapter) => break adapter,
                Err(err) if is_central_manager_transient(&err) && attempt + 1 < RETRY_COUNT => {
                    attempt += 1;
                    tracing::debug!(attempt, "BLE central manager not ready, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => return Err(wrap_ble_init_error(err)),
            }
        };

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut central_events = adapter.events().await.map_err(connection_error)?;
        let tx = events.clone();
        tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    tracing::info!(id = %id, "BLE device disconnected");
                    let _ = tx.send(TransportEvent::Disconnected(id.to_string()));
                }
            }
        });

        Ok(Self {
            adapter,
            peripherals: Mutex::new(HashMap::new()),
            events,
        })
    }

    async fn peripheral(&self, device_id: &str) -> Result<Peripheral> {
        if let Some(p) = self.peripherals.lock().await.get(device_id) {
            return Ok(p.clone());
        }

        // Not seen by our own scan; the platform may still know it.
        let known = self.adapter.peripherals().await.map_err(connection_error)?;
        let found = known
            .into_iter()
            .find(|p| p.id().to_string().eq_ignore_ascii_case(device_id))
            .ok_or_else(|| PrinterError::DeviceNotFound(device_id.to_string()))?;
        self.peripherals
            .lock()
            .await
            .insert(device_id.to_string(), found.clone());
        Ok(found)
    }
}

async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.map_err(connection_error)?;
    let adapters = manager.adapters().await.map_err(connection_error)?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| PrinterError::BleConnection("No BLE adapter found".into()))
}

fn connection_error(e: btleplug::Error) -> PrinterError {
    PrinterError::BleConnection(e.to_string())
}

fn scan_error(e: btleplug::Error) -> PrinterError {
    PrinterError::BleScan(e.to_string())
}

fn find_characteristic(peripheral: &Peripheral, info: &CharacteristicInfo) -> Result<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == info.uuid && c.service_uuid == info.service_uuid)
        .ok_or(PrinterError::NoWritableCharacteristic)
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    fn capabilities(&self) -> TransportCapabilities {
        // btleplug negotiates the ATT MTU internally but does not expose it.
        TransportCapabilities {
            mtu_negotiation: false,
            filtered_discovery_only: false,
        }
    }

    async fn request_permissions(&self) -> Result<()> {
        self.adapter
            .adapter_info()
            .await
            .map(|info| tracing::debug!(adapter = %info, "BLE adapter ready"))
            .map_err(|e| wrap_ble_init_error(connection_error(e)))
    }

    async fn scan(&self, window: Duration) -> Result<Vec<DeviceInfo>> {
        tracing::info!("Starting BLE scan ({}s window)", window.as_secs());

        let mut events = self.adapter.events().await.map_err(scan_error)?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(scan_error)?;

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        let mut found = Vec::new();
        let mut seen_ids = HashSet::new();

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => {
                    let id = match event {
                        Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => id,
                        Some(_) => continue,
                        None => break,
                    };
                    let id_str = id.to_string();
                    if seen_ids.contains(&id_str) {
                        continue;
                    }
                    let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                        continue;
                    };
                    let Ok(Some(props)) = peripheral.properties().await else {
                        continue;
                    };
                    let name = props.local_name.unwrap_or_default();
                    tracing::debug!(name = %name, id = %id_str, rssi = ?props.rssi, "Discovered device");
                    seen_ids.insert(id_str.clone());
                    self.peripherals.lock().await.insert(id_str.clone(), peripheral);
                    found.push(DeviceInfo {
                        id: id_str,
                        name,
                        rssi: props.rssi,
                    });
                }
            }
        }

        self.adapter.stop_scan().await.map_err(scan_error)?;

        tracing::info!(count = found.len(), "BLE scan complete");
        Ok(found)
    }

    async fn connect(&self, device_id: &str) -> Result<()> {
        let peripheral = self.peripheral(device_id).await?;
        peripheral.connect().await.map_err(connection_error)
    }

    async fn discover_characteristics(&self, device_id: &str) -> Result<Vec<CharacteristicInfo>> {
        let peripheral = self.peripheral(device_id).await?;
        peripheral
            .discover_services()
            .await
            .map_err(connection_error)?;

        let characteristics = peripheral
            .services()
            .into_iter()
            .flat_map(|service| service.characteristics.into_iter())
            .map(|c| CharacteristicInfo {
                service_uuid: c.service_uuid,
                uuid: c.uuid,
                write_with_response: c.properties.contains(CharPropFlags::WRITE),
                write_without_response: c
                    .properties
                    .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            id = %device_id,
            count = characteristics.len(),
            "Discovered characteristics"
        );
        Ok(characteristics)
    }

    async fn request_mtu(&self, _device_id: &str, _mtu: u16) -> Result<u16> {
        Err(PrinterError::MtuNegotiation(
            "btleplug does not expose the ATT MTU exchange".into(),
        ))
    }

    async fn write(
        &self,
        device_id: &str,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let peripheral = self.peripheral(device_id).await?;
        let target = find_characteristic(&peripheral, characteristic)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        peripheral
            .write(&target, data, write_type)
            .await
            .map_err(|e| PrinterError::BleWrite(e.to_string()))
    }

    async fn disconnect(&self, device_id: &str) -> Result<()> {
        let peripheral = self.peripheral(device_id).await?;
        tracing::info!(id = %device_id, "Disconnecting BLE device");
        peripheral.disconnect().await.map_err(connection_error)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
