//! Host side of the bridge: dispatches client requests to the printer
//! session and publishes results.
//!
//! Long operations (scan, connect, print) run as spawned tasks so the
//! dispatcher stays responsive and a second print request reaches the
//! session's busy guard instead of queuing behind the first.

use std::sync::{Arc, Weak};

use image_processor::{
    BitBitmap, DitherMode, DitherParams, PreprocessOptions, decode_data_url, dither, preprocess,
};
use thermal_printer::{PrinterDevice, SessionEvent};
use tokio::sync::{Mutex, broadcast};

use crate::chunked::Reassembler;
use crate::message::{
    BridgeEvent, BridgeRequest, DevicesFound, PrintImageRequest, ProgressReport, StatusReport,
};
use crate::{BridgeError, Result};

const EVENT_CAPACITY: usize = 256;

/// How `PRINT_IMAGE` payloads are turned into bitmaps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImagePipeline {
    /// `target_width` is replaced by the printer's width at print time.
    pub preprocess: PreprocessOptions,
    pub mode: DitherMode,
    pub params: DitherParams,
}

impl ImagePipeline {
    /// Decode, prepare and halftone a data URL at `width` pixels.
    pub fn render(&self, data_url: &str, width: u32, mode: Option<DitherMode>) -> Result<BitBitmap> {
        let img = decode_data_url(data_url)?;
        let options = PreprocessOptions {
            target_width: width,
            ..self.preprocess.clone()
        };
        let mut raster = preprocess(&img, &options)?;
        Ok(dither(&mut raster, mode.unwrap_or(self.mode), self.params))
    }
}

pub struct BridgeHost {
    device: Arc<dyn PrinterDevice>,
    pipeline: ImagePipeline,
    reassembler: Mutex<Reassembler>,
    events: broadcast::Sender<BridgeEvent>,
}

impl BridgeHost {
    /// Must be called inside a tokio runtime: spawns the session event
    /// forwarder.
    pub fn new(device: Arc<dyn PrinterDevice>, pipeline: ImagePipeline) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let session_events = device.subscribe();
        let host = Arc::new(Self {
            device,
            pipeline,
            reassembler: Mutex::new(Reassembler::new()),
            events,
        });
        spawn_session_forwarder(Arc::downgrade(&host), session_events);
        host
    }

    pub fn device(&self) -> &Arc<dyn PrinterDevice> {
        &self.device
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: BridgeEvent) {
        let _ = self.events.send(event);
    }

    pub fn status(&self) -> StatusReport {
        let session = self.device.session();
        StatusReport {
            connected: session.as_ref().is_some_and(|s| s.connected),
            state: self.device.state(),
            variant: self.device.variant(),
            print_width: self.device.print_width(),
            device: session.map(|s| s.device.into()),
        }
    }

    /// Parse and dispatch one text frame. Malformed frames are logged and
    /// dropped.
    pub async fn handle_text(self: &Arc<Self>, text: &str) {
        match BridgeRequest::from_json(text) {
            Ok(request) => self.handle(request).await,
            Err(e) => tracing::warn!(error = %e, "Ignoring malformed bridge message"),
        }
    }

    pub async fn handle(self: &Arc<Self>, request: BridgeRequest) {
        match request {
            BridgeRequest::ScanBluetoothPrinters => {
                let host = Arc::clone(self);
                tokio::spawn(async move { host.scan().await });
            }
            BridgeRequest::ConnectBluetoothPrinter(req) => {
                let host = Arc::clone(self);
                tokio::spawn(async move { host.connect(&req.device_id).await });
            }
            BridgeRequest::DisconnectBluetoothPrinter => {
                let host = Arc::clone(self);
                tokio::spawn(async move { host.disconnect().await });
            }
            BridgeRequest::PrintDitheredBitmapStart(start) => {
                let done = self.reassembler.lock().await.start(start);
                self.finish_transfer(done);
            }
            BridgeRequest::PrintDitheredBitmapChunk(chunk) => {
                let done = self.reassembler.lock().await.chunk(chunk);
                self.finish_transfer(done);
            }
            BridgeRequest::PrintImage(req) => {
                let host = Arc::clone(self);
                tokio::spawn(async move { host.print_image(req).await });
            }
            BridgeRequest::GetPrinterStatus => {
                self.publish(BridgeEvent::PrinterStatus(self.status()));
            }
        }
    }

    fn finish_transfer(self: &Arc<Self>, done: Result<Option<BitBitmap>>) {
        match done {
            Ok(Some(bitmap)) => {
                let host = Arc::clone(self);
                tokio::spawn(async move { host.print(bitmap).await });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Bitmap transfer failed");
                self.publish(BridgeEvent::print_failed(&e));
            }
        }
    }

    async fn scan(&self) {
        let result = async {
            self.device.request_permissions().await?;
            self.device.scan_devices().await
        }
        .await;

        match result {
            Ok(devices) => {
                let devices = devices.into_iter().map(Into::into).collect();
                self.publish(BridgeEvent::BluetoothDevicesFound(DevicesFound { devices }));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Printer scan failed");
                self.publish(BridgeEvent::error(&e));
            }
        }
    }

    async fn connect(&self, device_id: &str) {
        let had_session = self.device.session().is_some();
        match self.device.connect(device_id).await {
            Ok(session) => self.publish(BridgeEvent::connected(session.device)),
            Err(e) => {
                // A switch that failed still closed the previous printer.
                if had_session && self.device.session().is_none() {
                    self.publish(BridgeEvent::disconnected());
                }
                self.publish(BridgeEvent::error(&e));
            }
        }
    }

    async fn disconnect(&self) {
        match self.device.disconnect().await {
            Ok(()) => self.publish(BridgeEvent::disconnected()),
            Err(e) => {
                // The session is gone either way.
                tracing::warn!(error = %e, "Printer disconnect reported an error");
                self.publish(BridgeEvent::error(&e));
                self.publish(BridgeEvent::disconnected());
            }
        }
    }

    async fn print(&self, bitmap: BitBitmap) {
        let width = self.device.print_width();
        if bitmap.width() != width {
            tracing::warn!(
                bitmap_width = bitmap.width(),
                print_width = width,
                "Bitmap width differs from printer width"
            );
        }
        match self.device.print_bitmap(&bitmap).await {
            Ok(()) => self.publish(BridgeEvent::print_success()),
            Err(e) => self.publish(BridgeEvent::print_failed(&e)),
        }
    }

    async fn print_image(&self, req: PrintImageRequest) {
        match self.render(req).await {
            Ok(bitmap) => self.print(bitmap).await,
            Err(e) => {
                tracing::warn!(error = %e, "Could not prepare image for printing");
                self.publish(BridgeEvent::print_failed(&e));
            }
        }
    }

    async fn render(&self, req: PrintImageRequest) -> Result<BitBitmap> {
        let mode = req.mode.as_deref().map(str::parse::<DitherMode>).transpose()?;
        let width = self.device.print_width();
        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || pipeline.render(&req.data_url, width, mode))
            .await
            .map_err(|e| BridgeError::Task(e.to_string()))?
    }

    fn forward(&self, event: SessionEvent) {
        match event {
            SessionEvent::Progress(p) => self.publish(BridgeEvent::PrintProgress(ProgressReport {
                status: p.stage.to_string(),
                progress: p.percent,
            })),
            SessionEvent::Disconnected {
                unexpected: true, ..
            } => self.publish(BridgeEvent::disconnected()),
            SessionEvent::Disconnected { .. } | SessionEvent::StateChanged(_) => {}
        }
    }
}

fn spawn_session_forwarder(host: Weak<BridgeHost>, mut rx: broadcast::Receiver<SessionEvent>) {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Session events lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(host) = host.upgrade() else {
                break;
            };
            host.forward(event);
        }
    });
}
