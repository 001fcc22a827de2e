//! ESC/POS thermal printer control over Bluetooth Low Energy.
//!
//! Provides the raster command encoder, a paced chunk writer, a BLE
//! transport abstraction with a btleplug backend, and two session manager
//! variants (native and direct) behind the [`PrinterDevice`] trait.

pub mod ble;
mod ble_init;
pub mod chunker;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use ble::BtleplugTransport;
pub use protocol::{EscPosProtocol, PrinterModel, PrinterProtocol};
pub use session::{
    DirectPrinter, NativePrinter, PrintProgress, PrintStage, PrinterDevice, PrinterSession,
    SessionConfig, SessionEvent, SessionState, SessionVariant, VariantPreference, select_device,
};
pub use transport::{BleTransport, CharacteristicInfo, DeviceInfo, TransportCapabilities, WriteMode};

/// Print width in pixels for 58mm printers.
pub const DEFAULT_PRINT_WIDTH: u16 = 384;

/// Errors that can occur during printer operations.
#[derive(Debug, thiserror::Error)]
pub enum PrinterError {
    #[error("Bluetooth permission denied: {0}")]
    PermissionDenied(String),

    #[error("No printers found during BLE scan")]
    NoDevices,

    #[error("Printer device '{0}' not found")]
    DeviceNotFound(String),

    #[error("No writable characteristic found on device")]
    NoWritableCharacteristic,

    #[error("BLE connection error: {0}")]
    BleConnection(String),

    #[error("Connection timeout after {0} seconds")]
    ConnectionTimeout(u64),

    #[error("BLE write error: {0}")]
    BleWrite(String),

    #[error("BLE scan error: {0}")]
    BleScan(String),

    #[error("MTU negotiation failed: {0}")]
    MtuNegotiation(String),

    #[error("No printer connected")]
    NotConnected,

    #[error("Print already in progress")]
    PrintInProgress,

    #[error("Printer operation already in progress")]
    OperationInProgress,

    #[error("Invalid bitmap: {0}")]
    InvalidBitmap(String),
}

/// Result type alias for thermal-printer operations.
pub type Result<T> = std::result::Result<T, PrinterError>;
