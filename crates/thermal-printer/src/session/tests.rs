use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image_processor::BitBitmap;
use tokio::sync::{Semaphore, broadcast};
use uuid::Uuid;

use super::*;
use crate::PrinterError;
use crate::protocol::{CANDIDATE_SERVICES, EscPosProtocol, PrinterProtocol};
use crate::transport::{TransportCapabilities, TransportEvent};

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceInfo>,
    characteristics: Vec<CharacteristicInfo>,
    hang_connect: bool,
    hang_mtu: bool,
    mtu: Option<u16>,
    fail_write_at: Option<usize>,
    connects: Vec<String>,
    disconnects: Vec<String>,
    mtu_requests: usize,
    write_attempts: usize,
    writes: Vec<Vec<u8>>,
}

struct MockTransport {
    caps: TransportCapabilities,
    state: Mutex<MockState>,
    gated: AtomicBool,
    gate: Semaphore,
    events: broadcast::Sender<TransportEvent>,
}

impl MockTransport {
    fn new(caps: TransportCapabilities) -> Arc<Self> {
        let (events, _) = broadcast::channel(8);
        Arc::new(Self {
            caps,
            state: Mutex::new(MockState {
                devices: vec![device("AA", "PT-210_A1"), device("BB", "Speaker")],
                characteristics: vec![generic_writable()],
                ..Default::default()
            }),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            events,
        })
    }

    fn native() -> Arc<Self> {
        Self::new(TransportCapabilities {
            mtu_negotiation: false,
            filtered_discovery_only: false,
        })
    }

    fn with<F: FnOnce(&mut MockState)>(self: &Arc<Self>, f: F) -> Arc<Self> {
        f(&mut self.state.lock().unwrap());
        self.clone()
    }

    fn hold_writes(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    fn release_writes(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(1);
    }

    fn drop_link(&self, id: &str) {
        let _ = self.events.send(TransportEvent::Disconnected(id.to_string()));
    }

    fn snapshot<T, F: FnOnce(&MockState) -> T>(&self, f: F) -> T {
        f(&self.state.lock().unwrap())
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    fn capabilities(&self) -> TransportCapabilities {
        self.caps
    }

    async fn request_permissions(&self) -> crate::Result<()> {
        Ok(())
    }

    async fn scan(&self, _window: Duration) -> crate::Result<Vec<DeviceInfo>> {
        Ok(self.state.lock().unwrap().devices.clone())
    }

    async fn connect(&self, device_id: &str) -> crate::Result<()> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.connects.push(device_id.to_string());
            state.hang_connect
        };
        if hang {
            return std::future::pending().await;
        }
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        _device_id: &str,
    ) -> crate::Result<Vec<CharacteristicInfo>> {
        Ok(self.state.lock().unwrap().characteristics.clone())
    }

    async fn request_mtu(&self, _device_id: &str, _mtu: u16) -> crate::Result<u16> {
        let (hang, mtu) = {
            let mut state = self.state.lock().unwrap();
            state.mtu_requests += 1;
            (state.hang_mtu, state.mtu)
        };
        if hang {
            return std::future::pending().await;
        }
        mtu.ok_or_else(|| PrinterError::MtuNegotiation("rejected".into()))
    }

    async fn write(
        &self,
        _device_id: &str,
        _characteristic: &CharacteristicInfo,
        data: &[u8],
        _mode: WriteMode,
    ) -> crate::Result<()> {
        let attempt = {
            let mut state = self.state.lock().unwrap();
            state.write_attempts += 1;
            state.write_attempts
        };
        if self.gated.load(Ordering::SeqCst) {
            drop(self.gate.acquire().await.unwrap());
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_write_at == Some(attempt) {
            return Err(PrinterError::BleWrite("link lost".into()));
        }
        state.writes.push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> crate::Result<()> {
        self.state
            .lock()
            .unwrap()
            .disconnects
            .push(device_id.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

fn device(id: &str, name: &str) -> DeviceInfo {
    DeviceInfo {
        id: id.to_string(),
        name: name.to_string(),
        rssi: Some(-60),
    }
}

fn generic_writable() -> CharacteristicInfo {
    CharacteristicInfo {
        service_uuid: Uuid::from_u128(0x1234),
        uuid: Uuid::from_u128(0x5678),
        write_with_response: true,
        write_without_response: true,
    }
}

fn read_only() -> CharacteristicInfo {
    CharacteristicInfo {
        write_with_response: false,
        write_without_response: false,
        ..generic_writable()
    }
}

fn checker(width: u32, height: u32) -> BitBitmap {
    let bits = (0..width * height)
        .map(|i| ((i % width + i / width) % 2) as u8)
        .collect();
    BitBitmap::new(width, height, bits).unwrap()
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn states(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionState> {
    drain(rx)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged(s) => Some(s),
            _ => None,
        })
        .collect()
}

async fn next_disconnect(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let event = rx.recv().await.unwrap();
            if matches!(event, SessionEvent::Disconnected { .. }) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

fn native(transport: &Arc<MockTransport>) -> Arc<dyn PrinterDevice> {
    Arc::new(NativePrinter::new(transport.clone(), SessionConfig::default()))
}

fn direct(transport: &Arc<MockTransport>) -> Arc<dyn PrinterDevice> {
    Arc::new(DirectPrinter::new(transport.clone(), SessionConfig::default()))
}

async fn connected(transport: &Arc<MockTransport>) -> Arc<dyn PrinterDevice> {
    let device = native(transport);
    device.scan_devices().await.unwrap();
    device.connect("AA").await.unwrap();
    device
}

#[tokio::test]
async fn test_select_device_by_capabilities() {
    let plain = MockTransport::native();
    assert_eq!(
        select_device(plain.clone(), VariantPreference::Auto, SessionConfig::default()).variant(),
        SessionVariant::Native
    );
    assert_eq!(
        select_device(plain, VariantPreference::Direct, SessionConfig::default()).variant(),
        SessionVariant::Direct
    );

    let filtered = MockTransport::new(TransportCapabilities {
        mtu_negotiation: false,
        filtered_discovery_only: true,
    });
    assert_eq!(
        select_device(filtered.clone(), VariantPreference::Auto, SessionConfig::default())
            .variant(),
        SessionVariant::Direct
    );
    assert_eq!(
        select_device(filtered, VariantPreference::Native, SessionConfig::default()).variant(),
        SessionVariant::Native
    );
}

#[test]
fn test_variant_preference_parsing() {
    assert_eq!("auto".parse(), Ok(VariantPreference::Auto));
    assert_eq!(" Native ".parse(), Ok(VariantPreference::Native));
    assert_eq!("web".parse(), Ok(VariantPreference::Direct));
    assert!("bluetooth".parse::<VariantPreference>().is_err());
}

#[tokio::test]
async fn test_native_scan_lists_named_devices() {
    let transport = MockTransport::native().with(|s| s.devices.push(device("CC", "  ")));
    let device = native(&transport);

    let mut events = device.subscribe();

    let found = device.scan_devices().await.unwrap();
    let ids: Vec<_> = found.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["AA", "BB"]);
    assert_eq!(device.state(), SessionState::DeviceFound);
    assert_eq!(
        states(&mut events),
        [SessionState::Scanning, SessionState::DeviceFound]
    );
}

#[tokio::test]
async fn test_direct_scan_filters_by_model_name() {
    let transport = MockTransport::native();
    let device = direct(&transport);

    let found = device.scan_devices().await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "PT-210_A1");
}

#[tokio::test]
async fn test_scan_without_results_reports_no_devices() {
    let transport = MockTransport::native().with(|s| s.devices.clear());
    let device = native(&transport);
    let mut events = device.subscribe();

    let err = device.scan_devices().await.unwrap_err();
    assert!(matches!(err, PrinterError::NoDevices));
    assert_eq!(device.state(), SessionState::NoDevices);
    assert_eq!(
        states(&mut events),
        [SessionState::Scanning, SessionState::NoDevices]
    );
}

#[tokio::test]
async fn test_scan_while_connected_keeps_connected_state() {
    let transport = MockTransport::native();
    let device = connected(&transport).await;

    device.scan_devices().await.unwrap();
    assert_eq!(device.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_connect_walks_state_machine() {
    let transport = MockTransport::new(TransportCapabilities {
        mtu_negotiation: true,
        filtered_discovery_only: false,
    })
    .with(|s| s.mtu = Some(185));
    let device = native(&transport);
    device.scan_devices().await.unwrap();
    let mut events = device.subscribe();

    let session = device.connect("AA").await.unwrap();
    assert_eq!(session.device.name, "PT-210_A1");
    assert_eq!(session.chunk_size, 182);
    assert_eq!(session.write_mode, WriteMode::WithoutResponse);
    assert!(session.connected);
    assert_eq!(device.state(), SessionState::Connected);

    assert_eq!(
        states(&mut events),
        [
            SessionState::Connecting,
            SessionState::ServiceDiscovery,
            SessionState::CharacteristicFound,
            SessionState::MtuNegotiating,
            SessionState::Connected,
        ]
    );
}

#[tokio::test]
async fn test_mtu_fallback_when_transport_cannot_negotiate() {
    let transport = MockTransport::native();
    let device = connected(&transport).await;

    assert_eq!(device.session().unwrap().chunk_size, 20);
    assert_eq!(transport.snapshot(|s| s.mtu_requests), 0);
}

#[tokio::test]
async fn test_mtu_fallback_when_request_fails() {
    let transport = MockTransport::new(TransportCapabilities {
        mtu_negotiation: true,
        filtered_discovery_only: false,
    });
    let device = connected(&transport).await;

    assert_eq!(device.session().unwrap().chunk_size, 20);
    assert_eq!(transport.snapshot(|s| s.mtu_requests), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mtu_fallback_when_request_never_answers() {
    let transport = MockTransport::new(TransportCapabilities {
        mtu_negotiation: true,
        filtered_discovery_only: false,
    })
    .with(|s| s.hang_mtu = true);
    let device = native(&transport);
    let mut events = device.subscribe();

    let session = device.connect("AA").await.unwrap();
    assert_eq!(session.chunk_size, 20);
    assert_eq!(device.state(), SessionState::Connected);
    assert_eq!(transport.snapshot(|s| s.mtu_requests), 1);
    assert!(states(&mut events).contains(&SessionState::MtuNegotiating));

    // The guard was released: a second operation is accepted.
    device.connect("AA").await.unwrap();
}

#[tokio::test]
async fn test_configured_fallback_mtu() {
    let transport = MockTransport::native();
    let config = SessionConfig {
        fallback_mtu: 103,
        ..SessionConfig::default()
    };
    let device = NativePrinter::new(transport.clone(), config);
    let session = device.connect("AA").await.unwrap();
    assert_eq!(session.chunk_size, 100);
}

#[tokio::test(start_paused = true)]
async fn test_connect_times_out_and_cleans_up() {
    let transport = MockTransport::native().with(|s| s.hang_connect = true);
    let device = native(&transport);
    let mut events = device.subscribe();

    let err = device.connect("AA").await.unwrap_err();
    assert!(matches!(err, PrinterError::ConnectionTimeout(10)));
    assert_eq!(
        states(&mut events),
        [
            SessionState::Connecting,
            SessionState::ConnectFailed,
            SessionState::Idle,
        ]
    );
    assert_eq!(err.to_string(), "Connection timeout after 10 seconds");
    assert_eq!(device.state(), SessionState::Idle);
    assert!(device.session().is_none());
    assert_eq!(transport.snapshot(|s| s.disconnects.clone()), ["AA"]);
}

#[tokio::test]
async fn test_read_only_characteristics_fail_connect() {
    let transport = MockTransport::native().with(|s| s.characteristics = vec![read_only()]);
    let device = native(&transport);

    let err = device.connect("AA").await.unwrap_err();
    assert!(matches!(err, PrinterError::NoWritableCharacteristic));
    assert_eq!(device.state(), SessionState::Idle);
    assert!(device.session().is_none());
    assert_eq!(transport.snapshot(|s| s.disconnects.clone()), ["AA"]);
}

#[tokio::test]
async fn test_direct_connect_uses_candidate_service_and_fixed_chunks() {
    let candidate = CharacteristicInfo {
        service_uuid: CANDIDATE_SERVICES[1],
        uuid: Uuid::from_u128(0xbeef),
        write_with_response: true,
        write_without_response: false,
    };
    let transport = MockTransport::native().with(|s| {
        s.devices = vec![device("DD", "PT-280")];
        s.characteristics = vec![generic_writable(), candidate.clone()];
    });
    let device = direct(&transport);
    device.scan_devices().await.unwrap();

    let session = device.connect("DD").await.unwrap();
    assert_eq!(session.characteristic, candidate);
    assert_eq!(session.write_mode, WriteMode::WithResponse);
    assert_eq!(session.chunk_size, DIRECT_CHUNK_SIZE);
    assert_eq!(device.print_width(), 576);
}

#[tokio::test]
async fn test_direct_connect_rejects_unknown_services() {
    let transport = MockTransport::native();
    let device = direct(&transport);

    let err = device.connect("AA").await.unwrap_err();
    assert!(matches!(err, PrinterError::NoWritableCharacteristic));
    assert_eq!(device.print_width(), 384);
}

#[tokio::test]
async fn test_reconnect_to_same_device_is_noop() {
    let transport = MockTransport::native();
    let device = connected(&transport).await;

    device.connect("AA").await.unwrap();
    assert_eq!(transport.snapshot(|s| s.connects.clone()), ["AA"]);
}

#[tokio::test]
async fn test_connect_to_other_device_disconnects_first() {
    let transport = MockTransport::native();
    let device = connected(&transport).await;

    let session = device.connect("BB").await.unwrap();
    assert_eq!(session.device.id, "BB");
    assert_eq!(transport.snapshot(|s| s.disconnects.clone()), ["AA"]);
    assert_eq!(transport.snapshot(|s| s.connects.clone()), ["AA", "BB"]);
}

#[tokio::test]
async fn test_print_requires_connection() {
    let transport = MockTransport::native();
    let device = native(&transport);

    let err = device.print_bitmap(&checker(8, 8)).await.unwrap_err();
    assert!(matches!(err, PrinterError::NotConnected));
    assert_eq!(transport.snapshot(|s| s.write_attempts), 0);
}

#[tokio::test(start_paused = true)]
async fn test_print_streams_encoded_payload() {
    let transport = MockTransport::native();
    let device = connected(&transport).await;
    let mut events = device.subscribe();
    let bitmap = checker(16, 12);

    device.print_bitmap(&bitmap).await.unwrap();

    let expected = EscPosProtocol::new().encode(&bitmap).unwrap();
    let writes = transport.snapshot(|s| s.writes.clone());
    assert!(writes.iter().all(|w| w.len() <= 20));
    assert_eq!(writes.concat(), expected);

    let progress: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::Progress(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(progress.first().map(|p| p.stage), Some(PrintStage::Encoding));
    assert_eq!(
        progress.last(),
        Some(&PrintProgress {
            stage: PrintStage::Complete,
            percent: 100
        })
    );
    assert!(progress.windows(2).all(|w| w[0].percent <= w[1].percent));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_print_is_rejected_without_writes() {
    let transport = MockTransport::native();
    let device = connected(&transport).await;
    transport.hold_writes();

    let first = tokio::spawn({
        let device = device.clone();
        async move { device.print_bitmap(&checker(8, 8)).await }
    });
    while transport.snapshot(|s| s.write_attempts) == 0 {
        tokio::task::yield_now().await;
    }

    let err = device.print_bitmap(&checker(8, 8)).await.unwrap_err();
    assert!(matches!(err, PrinterError::PrintInProgress));
    assert_eq!(transport.snapshot(|s| s.write_attempts), 1);

    transport.release_writes();
    first.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_keeps_session() {
    let transport = MockTransport::native().with(|s| s.fail_write_at = Some(2));
    let device = connected(&transport).await;

    let err = device.print_bitmap(&checker(32, 16)).await.unwrap_err();
    assert!(matches!(err, PrinterError::BleWrite(ref m) if m.starts_with("chunk 2/")));
    assert_eq!(device.state(), SessionState::Connected);
    assert!(device.session().is_some());
    assert_eq!(transport.snapshot(|s| s.writes.len()), 1);
}

#[tokio::test]
async fn test_unsolicited_disconnect_returns_to_idle() {
    let transport = MockTransport::native();
    let device = connected(&transport).await;
    let mut events = device.subscribe();

    transport.drop_link("AA");

    let event = next_disconnect(&mut events).await;
    assert_eq!(
        event,
        SessionEvent::Disconnected {
            device_id: "AA".into(),
            unexpected: true
        }
    );
    assert_eq!(device.state(), SessionState::Idle);
    assert!(device.session().is_none());
    assert_eq!(transport.snapshot(|s| s.connects.len()), 1);

    let err = device.print_bitmap(&checker(8, 8)).await.unwrap_err();
    assert!(matches!(err, PrinterError::NotConnected));
}

#[tokio::test]
async fn test_link_events_for_other_devices_are_ignored() {
    let transport = MockTransport::native();
    let device = connected(&transport).await;

    transport.drop_link("ZZ");
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert_eq!(device.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_explicit_disconnect() {
    let transport = MockTransport::native();
    let device = connected(&transport).await;
    let mut events = device.subscribe();

    device.disconnect().await.unwrap();
    assert_eq!(device.state(), SessionState::Idle);
    assert!(device.session().is_none());
    assert!(drain(&mut events).contains(&SessionEvent::Disconnected {
        device_id: "AA".into(),
        unexpected: false
    }));

    // Nothing left to close.
    device.disconnect().await.unwrap();
    assert_eq!(transport.snapshot(|s| s.disconnects.clone()), ["AA"]);
}
