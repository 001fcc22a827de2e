//! BLE transport abstraction.
//!
//! Session managers talk to the radio only through [`BleTransport`], so the
//! same connect/discover/write logic runs over btleplug on a native host or
//! over an in-memory mock in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::Result;

/// Discovered BLE device information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Platform-specific device identifier (address on Linux, UUID on macOS).
    pub id: String,
    /// Device display name (may be empty if not advertised).
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
}

/// GATT write flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// A characteristic found during service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacteristicInfo {
    pub service_uuid: Uuid,
    pub uuid: Uuid,
    pub write_with_response: bool,
    pub write_without_response: bool,
}

impl CharacteristicInfo {
    pub fn is_writable(&self) -> bool {
        self.write_with_response || self.write_without_response
    }

    /// Preferred write mode: without-response when available (no ack wait).
    pub fn preferred_write_mode(&self) -> Option<WriteMode> {
        if self.write_without_response {
            Some(WriteMode::WithoutResponse)
        } else if self.write_with_response {
            Some(WriteMode::WithResponse)
        } else {
            None
        }
    }
}

/// What the underlying BLE stack can do. Used to pick a session variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// The stack exposes an MTU exchange.
    pub mtu_negotiation: bool,
    /// Discovery must be filtered (by name or service), as in browsers.
    pub filtered_discovery_only: bool,
}

/// Events raised by the transport outside of any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The peripheral dropped the link (out of range, powered off).
    Disconnected(String),
}

/// Operations a session manager needs from a BLE stack.
#[async_trait]
pub trait BleTransport: Send + Sync {
    fn capabilities(&self) -> TransportCapabilities;

    /// Ensure the adapter is usable (powered, permitted).
    async fn request_permissions(&self) -> Result<()>;

    /// Scan for advertising peripherals for `window`.
    async fn scan(&self, window: Duration) -> Result<Vec<DeviceInfo>>;

    /// Open the raw link. Completes when the link is up.
    async fn connect(&self, device_id: &str) -> Result<()>;

    /// Discover services and list every characteristic.
    async fn discover_characteristics(&self, device_id: &str) -> Result<Vec<CharacteristicInfo>>;

    /// Request an ATT MTU; returns the MTU the link settled on.
    async fn request_mtu(&self, device_id: &str, mtu: u16) -> Result<u16>;

    async fn write(
        &self,
        device_id: &str,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()>;

    async fn disconnect(&self, device_id: &str) -> Result<()>;

    /// Subscribe to unsolicited link events.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}
