//! Direct session manager for stacks that only allow filtered discovery.
//!
//! Only devices whose advertised name matches a known printer model are
//! offered, the write characteristic is looked up on a fixed list of
//! printer services, and writes use a fixed chunk size. Paper width and
//! feed/cut behaviour come from the matched model.

use std::sync::Arc;

use async_trait::async_trait;
use image_processor::BitBitmap;
use tokio::sync::broadcast;

use super::shared::{ChunkSizing, ServiceFilter, SessionCore};
use super::{PrinterDevice, PrinterSession, SessionConfig, SessionEvent, SessionState, SessionVariant};
use crate::Result;
use crate::protocol::{CANDIDATE_SERVICES, EscPosProtocol, PrinterModel, find_model};
use crate::transport::{BleTransport, DeviceInfo};

/// Bytes per write when the MTU cannot be negotiated.
pub const DIRECT_CHUNK_SIZE: usize = 100;

pub struct DirectPrinter {
    core: Arc<SessionCore>,
}

impl DirectPrinter {
    pub fn new(transport: Arc<dyn BleTransport>, config: SessionConfig) -> Self {
        Self {
            core: SessionCore::new(transport, config),
        }
    }

    fn connected_model(&self) -> Option<&'static PrinterModel> {
        self.core
            .session()
            .and_then(|s| find_model(&s.device.name))
    }
}

#[async_trait]
impl PrinterDevice for DirectPrinter {
    fn variant(&self) -> SessionVariant {
        SessionVariant::Direct
    }

    async fn request_permissions(&self) -> Result<()> {
        self.core.request_permissions().await
    }

    async fn scan_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.core.scan(|d| find_model(&d.name).is_some()).await
    }

    async fn connect(&self, device_id: &str) -> Result<PrinterSession> {
        self.core
            .connect(
                device_id,
                ServiceFilter::Candidates(CANDIDATE_SERVICES),
                ChunkSizing::Fixed(DIRECT_CHUNK_SIZE),
            )
            .await
    }

    async fn disconnect(&self) -> Result<()> {
        self.core.disconnect().await
    }

    async fn print_bitmap(&self, bitmap: &BitBitmap) -> Result<()> {
        let protocol = self
            .connected_model()
            .map(EscPosProtocol::for_model)
            .unwrap_or_default();
        self.core.print(bitmap, &protocol).await
    }

    fn state(&self) -> SessionState {
        self.core.state()
    }

    fn session(&self) -> Option<PrinterSession> {
        self.core.session()
    }

    fn print_width(&self) -> u32 {
        let width = self
            .connected_model()
            .map_or(self.core.config().default_width, |m| m.width_px);
        u32::from(width)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.subscribe()
    }
}
