//! Printer session management.
//!
//! A session manager owns the single active [`PrinterSession`]: it scans,
//! connects (with a timeout and best-effort cleanup), picks a writable
//! characteristic, sizes writes, and streams encoded print jobs through
//! the paced chunk writer.
//!
//! Two variants implement [`PrinterDevice`]:
//! - [`NativePrinter`]: any writable characteristic on any service, MTU
//!   negotiation with a silent fallback.
//! - [`DirectPrinter`]: browser-style filtered discovery by known model
//!   names, a fixed list of candidate services and a fixed chunk size.
//!
//! Unsolicited disconnects move the session to [`SessionState::Idle`] and
//! are never followed by an automatic reconnect.

mod direct;
mod native;
mod shared;
#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image_processor::BitBitmap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::Result;
use crate::transport::{BleTransport, CharacteristicInfo, DeviceInfo, WriteMode};

pub use direct::{DIRECT_CHUNK_SIZE, DirectPrinter};
pub use native::{FALLBACK_MTU, NativePrinter, TARGET_MTU};

/// Time allowed for the raw link to come up.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for the MTU exchange before falling back.
pub const MTU_TIMEOUT: Duration = Duration::from_secs(5);

/// Default BLE scan window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);

/// ATT header bytes subtracted from the MTU to get the write payload.
pub const ATT_OVERHEAD: u16 = 3;

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Scanning,
    /// The last scan found at least one printer.
    DeviceFound,
    /// The last scan found nothing suitable.
    NoDevices,
    Connecting,
    ServiceDiscovery,
    CharacteristicFound,
    MtuNegotiating,
    Connected,
    /// Transient; followed by `Idle` once cleanup is done.
    ConnectFailed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::DeviceFound => "device_found",
            Self::NoDevices => "no_devices",
            Self::Connecting => "connecting",
            Self::ServiceDiscovery => "service_discovery",
            Self::CharacteristicFound => "characteristic_found",
            Self::MtuNegotiating => "mtu_negotiating",
            Self::Connected => "connected",
            Self::ConnectFailed => "connect_failed",
        };
        f.write_str(name)
    }
}

/// The active link to a printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterSession {
    pub device: DeviceInfo,
    pub characteristic: CharacteristicInfo,
    pub write_mode: WriteMode,
    /// Payload bytes per BLE write (MTU minus ATT overhead, or a fixed size).
    pub chunk_size: usize,
    pub connected: bool,
}

/// Phase of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintStage {
    Encoding,
    Sending,
    Complete,
}

impl fmt::Display for PrintStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Encoding => "encoding",
            Self::Sending => "sending",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Print progress, 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrintProgress {
    pub stage: PrintStage,
    pub percent: u8,
}

/// Notifications published by a session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Progress(PrintProgress),
    /// The session ended. `unexpected` is set when the peripheral dropped
    /// the link on its own.
    Disconnected { device_id: String, unexpected: bool },
}

/// Which session manager implementation is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionVariant {
    Native,
    Direct,
}

/// Configured variant choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariantPreference {
    /// Decide from the transport's capabilities.
    #[default]
    Auto,
    Native,
    Direct,
}

impl FromStr for VariantPreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "native" => Ok(Self::Native),
            "direct" | "web" => Ok(Self::Direct),
            other => Err(format!("unknown printer variant: {other}")),
        }
    }
}

/// Settings shared by both variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub scan_window: Duration,
    /// Print width used when no model override applies.
    pub default_width: u16,
    /// ATT MTU assumed when negotiation is unavailable or fails.
    pub fallback_mtu: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_window: DEFAULT_SCAN_WINDOW,
            default_width: crate::DEFAULT_PRINT_WIDTH,
            fallback_mtu: FALLBACK_MTU,
        }
    }
}

/// Capability interface shared by the native and direct session managers.
#[async_trait]
pub trait PrinterDevice: Send + Sync {
    fn variant(&self) -> SessionVariant;

    /// Make sure the BLE stack is usable before scanning.
    async fn request_permissions(&self) -> Result<()>;

    /// Scan for printers. Fails with [`crate::PrinterError::NoDevices`]
    /// when nothing suitable was seen.
    async fn scan_devices(&self) -> Result<Vec<DeviceInfo>>;

    async fn connect(&self, device_id: &str) -> Result<PrinterSession>;

    async fn disconnect(&self) -> Result<()>;

    /// Encode and send a bitmap. Rejects immediately when another print
    /// is in flight.
    async fn print_bitmap(&self, bitmap: &BitBitmap) -> Result<()>;

    fn state(&self) -> SessionState;

    fn session(&self) -> Option<PrinterSession>;

    /// Pixel width images should be prepared at for the current printer.
    fn print_width(&self) -> u32;

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}

/// Build the session manager that fits `transport`.
///
/// `Auto` picks the direct variant only for stacks that require filtered
/// discovery; everything else gets the native variant.
pub fn select_device(
    transport: Arc<dyn BleTransport>,
    preference: VariantPreference,
    config: SessionConfig,
) -> Arc<dyn PrinterDevice> {
    let caps = transport.capabilities();
    let variant = match preference {
        VariantPreference::Native => SessionVariant::Native,
        VariantPreference::Direct => SessionVariant::Direct,
        VariantPreference::Auto if caps.filtered_discovery_only => SessionVariant::Direct,
        VariantPreference::Auto => SessionVariant::Native,
    };
    tracing::info!(?variant, ?preference, ?caps, "Selected printer session variant");

    match variant {
        SessionVariant::Native => Arc::new(NativePrinter::new(transport, config)),
        SessionVariant::Direct => Arc::new(DirectPrinter::new(transport, config)),
    }
}
