//! Bridge envelopes: `{"type": "...", "data": {...}}`.

use serde::{Deserialize, Serialize};
use thermal_printer::{DeviceInfo, SessionState, SessionVariant};

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeRequest {
    ScanBluetoothPrinters,
    ConnectBluetoothPrinter(ConnectRequest),
    DisconnectBluetoothPrinter,
    PrintDitheredBitmapStart(BitmapStart),
    PrintDitheredBitmapChunk(BitmapChunk),
    /// Full-color image the host prepares and dithers itself.
    PrintImage(PrintImageRequest),
    GetPrinterStatus,
}

impl BridgeRequest {
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub device_id: String,
}

/// First frame of a chunked bitmap transfer. Carries chunk 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitmapStart {
    pub width: u32,
    pub height: u32,
    pub total_chunks: usize,
    #[serde(default)]
    pub chunk_index: usize,
    pub bitmap_base64: String,
    pub is_last: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitmapChunk {
    pub bitmap_base64: String,
    pub chunk_index: usize,
    pub is_last: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintImageRequest {
    pub data_url: String,
    /// Dither mode name; the host default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Messages published to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeEvent {
    BluetoothDevicesFound(DevicesFound),
    BluetoothConnected(Connected),
    BluetoothDisconnected(Disconnected),
    BluetoothError(ErrorReport),
    PrintProgress(ProgressReport),
    PrintSuccess(PrintOutcome),
    PrintFailed(PrintOutcome),
    PrinterStatus(StatusReport),
}

impl BridgeEvent {
    pub fn to_json(&self) -> String {
        // Every payload is plain data with string keys.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn connected(device: DeviceInfo) -> Self {
        Self::BluetoothConnected(Connected {
            connected: true,
            device: device.into(),
        })
    }

    pub fn disconnected() -> Self {
        Self::BluetoothDisconnected(Disconnected { connected: false })
    }

    pub fn error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::BluetoothError(ErrorReport::from_error(err))
    }

    pub fn print_success() -> Self {
        Self::PrintSuccess(PrintOutcome {
            success: true,
            progress: 100,
            error: None,
        })
    }

    pub fn print_failed(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::PrintFailed(PrintOutcome {
            success: false,
            progress: 0,
            error: Some(err.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicesFound {
    pub devices: Vec<DeviceSummary>,
}

/// Device as shown to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
}

impl From<DeviceInfo> for DeviceSummary {
    fn from(d: DeviceInfo) -> Self {
        Self {
            id: d.id,
            name: d.name,
            rssi: d.rssi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connected {
    pub connected: bool,
    pub device: DeviceSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnected {
    pub connected: bool,
}

/// Error details: the message, a debug rendering and the full source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_error: Option<String>,
}

impl ErrorReport {
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = vec![err.to_string()];
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            error: err.to_string(),
            stack: Some(format!("{err:?}")),
            full_error: Some(chain.join(": ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub status: String,
    pub progress: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintOutcome {
    pub success: bool,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub connected: bool,
    pub state: SessionState,
    pub variant: SessionVariant,
    pub print_width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceSummary>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_unit_requests() {
        let req = BridgeRequest::from_json(r#"{"type":"SCAN_BLUETOOTH_PRINTERS"}"#).unwrap();
        assert_eq!(req, BridgeRequest::ScanBluetoothPrinters);

        let req = BridgeRequest::from_json(r#"{"type":"GET_PRINTER_STATUS"}"#).unwrap();
        assert_eq!(req, BridgeRequest::GetPrinterStatus);
    }

    #[test]
    fn test_parse_connect_request() {
        let req = BridgeRequest::from_json(
            r#"{"type":"CONNECT_BLUETOOTH_PRINTER","data":{"deviceId":"AA:BB"}}"#,
        )
        .unwrap();
        assert_eq!(
            req,
            BridgeRequest::ConnectBluetoothPrinter(ConnectRequest {
                device_id: "AA:BB".into()
            })
        );
    }

    #[test]
    fn test_parse_bitmap_frames() {
        let start = json!({
            "type": "PRINT_DITHERED_BITMAP_START",
            "data": {
                "width": 384,
                "height": 10,
                "totalChunks": 2,
                "chunkIndex": 0,
                "bitmapBase64": "AAAA",
                "isLast": false
            }
        });
        let req: BridgeRequest = serde_json::from_value(start).unwrap();
        let BridgeRequest::PrintDitheredBitmapStart(start) = req else {
            panic!("wrong variant: {req:?}");
        };
        assert_eq!((start.width, start.height, start.total_chunks), (384, 10, 2));

        let chunk = json!({
            "type": "PRINT_DITHERED_BITMAP_CHUNK",
            "data": {"bitmapBase64": "BBBB", "chunkIndex": 1, "isLast": true}
        });
        let req: BridgeRequest = serde_json::from_value(chunk).unwrap();
        assert!(matches!(
            req,
            BridgeRequest::PrintDitheredBitmapChunk(BitmapChunk { chunk_index: 1, is_last: true, .. })
        ));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(BridgeRequest::from_json(r#"{"type":"REBOOT"}"#).is_err());
        assert!(BridgeRequest::from_json("not json").is_err());
    }

    #[test]
    fn test_event_envelopes() {
        let found = BridgeEvent::BluetoothDevicesFound(DevicesFound {
            devices: vec![DeviceSummary {
                id: "AA".into(),
                name: "PT-210".into(),
                rssi: None,
            }],
        });
        assert_eq!(
            serde_json::to_value(&found).unwrap(),
            json!({
                "type": "BLUETOOTH_DEVICES_FOUND",
                "data": {"devices": [{"id": "AA", "name": "PT-210"}]}
            })
        );

        assert_eq!(
            serde_json::to_value(BridgeEvent::disconnected()).unwrap(),
            json!({"type": "BLUETOOTH_DISCONNECTED", "data": {"connected": false}})
        );

        assert_eq!(
            serde_json::to_value(BridgeEvent::print_success()).unwrap(),
            json!({"type": "PRINT_SUCCESS", "data": {"success": true, "progress": 100}})
        );
    }

    #[test]
    fn test_error_report_includes_source_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer failure")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::other("radio off"));
        let report = ErrorReport::from_error(&err);
        assert_eq!(report.error, "outer failure");
        assert_eq!(report.full_error.as_deref(), Some("outer failure: radio off"));
        assert!(report.stack.unwrap().contains("Outer"));

        let json = serde_json::to_value(BridgeEvent::error(&err)).unwrap();
        assert_eq!(json["type"], "BLUETOOTH_ERROR");
        assert_eq!(json["data"]["fullError"], "outer failure: radio off");
    }

    #[test]
    fn test_status_report_shape() {
        let status = BridgeEvent::PrinterStatus(StatusReport {
            connected: false,
            state: SessionState::Idle,
            variant: SessionVariant::Native,
            print_width: 384,
            device: None,
        });
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({
                "type": "PRINTER_STATUS",
                "data": {"connected": false, "state": "idle", "variant": "native", "printWidth": 384}
            })
        );
    }
}
