//! Native session manager: unrestricted discovery, any writable
//! characteristic, MTU negotiation.

use std::sync::Arc;

use async_trait::async_trait;
use image_processor::BitBitmap;
use tokio::sync::broadcast;

use super::shared::{ChunkSizing, ServiceFilter, SessionCore};
use super::{PrinterDevice, PrinterSession, SessionConfig, SessionEvent, SessionState, SessionVariant};
use crate::Result;
use crate::protocol::{EscPosProtocol, find_model};
use crate::transport::{BleTransport, DeviceInfo};

/// ATT MTU requested after connecting.
pub const TARGET_MTU: u16 = 512;

/// Minimum ATT MTU, assumed when negotiation is unavailable.
pub const FALLBACK_MTU: u16 = 23;

pub struct NativePrinter {
    core: Arc<SessionCore>,
    protocol: EscPosProtocol,
}

impl NativePrinter {
    pub fn new(transport: Arc<dyn BleTransport>, config: SessionConfig) -> Self {
        Self {
            core: SessionCore::new(transport, config),
            protocol: EscPosProtocol::new(),
        }
    }
}

/// Known printer models first, then by name.
fn sort_devices(devices: &mut [DeviceInfo]) {
    devices.sort_by(|a, b| {
        let a_known = find_model(&a.name).is_some();
        let b_known = find_model(&b.name).is_some();
        b_known.cmp(&a_known).then_with(|| a.name.cmp(&b.name))
    });
}

#[async_trait]
impl PrinterDevice for NativePrinter {
    fn variant(&self) -> SessionVariant {
        SessionVariant::Native
    }

    async fn request_permissions(&self) -> Result<()> {
        self.core.request_permissions().await
    }

    async fn scan_devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut devices = self.core.scan(|d| !d.name.trim().is_empty()).await?;
        sort_devices(&mut devices);
        Ok(devices)
    }

    async fn connect(&self, device_id: &str) -> Result<PrinterSession> {
        self.core
            .connect(
                device_id,
                ServiceFilter::Any,
                ChunkSizing::Negotiate {
                    target_mtu: TARGET_MTU,
                },
            )
            .await
    }

    async fn disconnect(&self) -> Result<()> {
        self.core.disconnect().await
    }

    async fn print_bitmap(&self, bitmap: &BitBitmap) -> Result<()> {
        self.core.print(bitmap, &self.protocol).await
    }

    fn state(&self) -> SessionState {
        self.core.state()
    }

    fn session(&self) -> Option<PrinterSession> {
        self.core.session()
    }

    fn print_width(&self) -> u32 {
        u32::from(self.core.config().default_width)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.subscribe()
    }
}
