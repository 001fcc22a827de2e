//! Photo-booth print host.
//!
//! Owns the BLE printer session and exposes the print bridge over a
//! WebSocket so a booth UI can scan, connect and print.

pub mod app;
pub mod config;
pub mod server;

use std::sync::Arc;

use print_bridge::BridgeHost;
use thermal_printer::{BleTransport, BtleplugTransport, PrinterDevice, select_device};

use crate::app::SharedState;
use crate::config::HostConfig;

/// Load `.env` from the working directory or its parents.
pub fn load_dotenv() {
    let candidates = [".env", "../.env", "../../.env"];
    for path in &candidates {
        if dotenvy::from_filename(path).is_ok() {
            tracing::info!("Loaded .env from: {path}");
            return;
        }
    }
    tracing::info!("No .env file found, using system environment variables");
}

/// Load configuration and build the printer session and bridge.
pub async fn init_foundation() -> anyhow::Result<SharedState> {
    load_dotenv();
    let config = HostConfig::load();
    tracing::info!(?config, "Configuration loaded");

    let transport: Arc<dyn BleTransport> = Arc::new(BtleplugTransport::new().await?);
    let device = select_device(transport, config.printer_variant, config.session_config());
    let bridge = BridgeHost::new(device, config.image_pipeline());
    Ok(SharedState::new(config, bridge))
}

/// Connect to the configured printer, if any. A scan runs first so the
/// platform knows the peripheral; failures are logged, not fatal.
pub async fn auto_connect(state: SharedState) {
    let Some(address) = state.config().printer_address.clone() else {
        return;
    };
    let device: &Arc<dyn PrinterDevice> = state.device();

    tracing::info!(address = %address, "Auto-connecting to configured printer");
    if let Err(e) = device.request_permissions().await {
        tracing::warn!("Bluetooth unavailable, skipping auto-connect: {e}");
        return;
    }
    if let Err(e) = device.scan_devices().await {
        tracing::warn!("Scan before auto-connect failed: {e}");
    }
    match device.connect(&address).await {
        Ok(session) => tracing::info!(
            name = %session.device.name,
            chunk_size = session.chunk_size,
            "Printer ready"
        ),
        Err(e) => tracing::warn!("Auto-connect to {address} failed: {e}"),
    }
}

/// Stop serving and release the printer.
pub async fn graceful_shutdown(state: &SharedState) {
    tracing::info!("Shutdown sequence started");
    state.shutdown_token().cancel();

    if state.device().session().is_some() {
        match state.device().disconnect().await {
            Ok(()) => tracing::info!("Shutdown: printer disconnected"),
            Err(e) => tracing::warn!("Shutdown: printer disconnect failed: {e}"),
        }
    }
    tracing::info!("Shutdown sequence completed");
}
