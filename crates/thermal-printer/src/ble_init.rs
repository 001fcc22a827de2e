//! Retry and error helpers for BLE adapter initialization (macOS CentralManager).

use std::time::Duration;

use crate::PrinterError;

pub(crate) const RETRY_COUNT: usize = 6;
pub(crate) const RETRY_DELAY: Duration = Duration::from_millis(500);

/// CoreBluetooth reports "invalid state (have=0)" while the central manager
/// is still powering up; that clears on its own after a short wait.
pub(crate) fn is_central_manager_transient(err: &PrinterError) -> bool {
    #[cfg(target_os = "macos")]
    {
        if let PrinterError::BleConnection(msg) = err {
            let msg = msg.to_ascii_lowercase();
            return msg.contains("central manager has invalid state") && msg.contains("have=0");
        }
    }
    #[cfg(not(target_os = "macos"))]
    let _ = err;

    false
}

/// Turn adapter init failures into permission errors with a usable hint.
pub(crate) fn wrap_ble_init_error(err: PrinterError) -> PrinterError {
    let PrinterError::BleConnection(msg) = &err else {
        return err;
    };
    let lower = msg.to_ascii_lowercase();

    if lower.contains("central manager has invalid state") {
        return PrinterError::PermissionDenied(format!(
            "{msg} (macOS: turn Bluetooth on and allow this app under System Settings > Privacy & Security > Bluetooth)"
        ));
    }
    if lower.contains("permission") || lower.contains("not authorized") || lower.contains("access denied") {
        return PrinterError::PermissionDenied(msg.clone());
    }

    err
}
