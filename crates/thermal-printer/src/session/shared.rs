//! Connection and print logic shared by both session variants.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use image_processor::BitBitmap;
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use super::{
    ATT_OVERHEAD, CONNECT_TIMEOUT, MTU_TIMEOUT, PrintProgress, PrintStage, PrinterSession,
    SessionConfig, SessionEvent, SessionState,
};
use crate::chunker::{self, WriteProgress};
use crate::protocol::PrinterProtocol;
use crate::transport::{BleTransport, CharacteristicInfo, DeviceInfo, TransportEvent};
use crate::{PrinterError, Result};

const EVENT_CAPACITY: usize = 64;

/// Where to look for the write characteristic.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ServiceFilter {
    /// First writable characteristic on any service.
    Any,
    /// Probe these services in order; first writable characteristic wins.
    Candidates(&'static [Uuid]),
}

/// How the per-write payload size is decided.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ChunkSizing {
    Negotiate { target_mtu: u16 },
    Fixed(usize),
}

pub(crate) struct SessionCore {
    transport: Arc<dyn BleTransport>,
    config: SessionConfig,
    state: RwLock<SessionState>,
    session: RwLock<Option<PrinterSession>>,
    /// Devices seen by the last scans, for names on connect.
    known: RwLock<HashMap<String, DeviceInfo>>,
    /// Held for the whole of a connect, scan or print.
    op_guard: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl SessionCore {
    /// Must be called inside a tokio runtime: spawns the disconnect watcher.
    pub(crate) fn new(transport: Arc<dyn BleTransport>, config: SessionConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let link_events = transport.subscribe();
        let core = Arc::new(Self {
            transport,
            config,
            state: RwLock::new(SessionState::Idle),
            session: RwLock::new(None),
            known: RwLock::new(HashMap::new()),
            op_guard: Mutex::new(()),
            events,
        });
        spawn_disconnect_watcher(Arc::downgrade(&core), link_events);
        core
    }

    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> SessionState {
        *read(&self.state)
    }

    pub(crate) fn session(&self) -> Option<PrinterSession> {
        read(&self.session).clone()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn set_state(&self, next: SessionState) {
        let changed = {
            let mut state = write(&self.state);
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            tracing::debug!(state = %next, "Printer session state changed");
            let _ = self.events.send(SessionEvent::StateChanged(next));
        }
    }

    /// Back to `Connected` if a session survives, otherwise `outcome`.
    fn settle_state(&self, outcome: SessionState) {
        let next = if self.session().is_some() {
            SessionState::Connected
        } else {
            outcome
        };
        self.set_state(next);
    }

    fn emit_progress(&self, stage: PrintStage, percent: u8) {
        let _ = self
            .events
            .send(SessionEvent::Progress(PrintProgress { stage, percent }));
    }

    pub(crate) async fn request_permissions(&self) -> Result<()> {
        self.transport.request_permissions().await
    }

    pub(crate) async fn scan<F>(&self, keep: F) -> Result<Vec<DeviceInfo>>
    where
        F: Fn(&DeviceInfo) -> bool + Send,
    {
        let _guard = self
            .op_guard
            .try_lock()
            .map_err(|_| PrinterError::OperationInProgress)?;

        self.set_state(SessionState::Scanning);
        let devices: Vec<DeviceInfo> = match self.transport.scan(self.config.scan_window).await {
            Ok(found) => found.into_iter().filter(|d| keep(d)).collect(),
            Err(e) => {
                self.settle_state(SessionState::Idle);
                return Err(e);
            }
        };
        if devices.is_empty() {
            tracing::info!("No printers found during BLE scan");
            self.settle_state(SessionState::NoDevices);
            return Err(PrinterError::NoDevices);
        }
        self.settle_state(SessionState::DeviceFound);

        {
            let mut known = write(&self.known);
            for device in &devices {
                known.insert(device.id.clone(), device.clone());
            }
        }
        tracing::info!(count = devices.len(), "Found printer candidates");
        Ok(devices)
    }

    /// Connect to `device_id`. A no-op when already connected to it; an
    /// existing session to another device is closed first.
    pub(crate) async fn connect(
        &self,
        device_id: &str,
        filter: ServiceFilter,
        sizing: ChunkSizing,
    ) -> Result<PrinterSession> {
        let _guard = self
            .op_guard
            .try_lock()
            .map_err(|_| PrinterError::OperationInProgress)?;

        if let Some(current) = self.session() {
            if current.connected && current.device.id == device_id {
                tracing::debug!(id = %device_id, "Already connected to printer");
                return Ok(current);
            }
            tracing::info!(from = %current.device.id, to = %device_id, "Switching printer");
            if let Err(e) = self.end_session().await {
                tracing::warn!(error = %e, "Failed to disconnect previous printer");
            }
        }

        tracing::info!(id = %device_id, "Connecting to printer");
        match self.establish(device_id, filter, sizing).await {
            Ok(session) => {
                *write(&self.session) = Some(session.clone());
                self.set_state(SessionState::Connected);
                tracing::info!(
                    id = %device_id,
                    characteristic = %session.characteristic.uuid,
                    chunk_size = session.chunk_size,
                    "Printer connected"
                );
                Ok(session)
            }
            Err(err) => {
                tracing::warn!(id = %device_id, error = %err, "Printer connection failed");
                if let Err(e) = self.transport.disconnect(device_id).await {
                    tracing::debug!(error = %e, "Cleanup disconnect failed");
                }
                self.set_state(SessionState::ConnectFailed);
                self.set_state(SessionState::Idle);
                Err(err)
            }
        }
    }

    async fn establish(
        &self,
        device_id: &str,
        filter: ServiceFilter,
        sizing: ChunkSizing,
    ) -> Result<PrinterSession> {
        self.set_state(SessionState::Connecting);
        tokio::time::timeout(CONNECT_TIMEOUT, self.transport.connect(device_id))
            .await
            .map_err(|_| PrinterError::ConnectionTimeout(CONNECT_TIMEOUT.as_secs()))??;

        self.set_state(SessionState::ServiceDiscovery);
        let characteristics = self.transport.discover_characteristics(device_id).await?;
        let characteristic = pick_characteristic(&characteristics, filter)
            .ok_or(PrinterError::NoWritableCharacteristic)?;
        let write_mode = characteristic
            .preferred_write_mode()
            .ok_or(PrinterError::NoWritableCharacteristic)?;
        self.set_state(SessionState::CharacteristicFound);

        let chunk_size = match sizing {
            ChunkSizing::Fixed(size) => size.max(1),
            ChunkSizing::Negotiate { target_mtu } => {
                self.negotiate_chunk_size(device_id, target_mtu).await
            }
        };

        let device = read(&self.known)
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| DeviceInfo {
                id: device_id.to_string(),
                name: String::new(),
                rssi: None,
            });

        Ok(PrinterSession {
            device,
            characteristic,
            write_mode,
            chunk_size,
            connected: true,
        })
    }

    /// Negotiation failure or timeout is not fatal: the configured fallback
    /// MTU is used.
    async fn negotiate_chunk_size(&self, device_id: &str, target_mtu: u16) -> usize {
        let fallback = self.config.fallback_mtu;
        let mtu = if self.transport.capabilities().mtu_negotiation {
            self.set_state(SessionState::MtuNegotiating);
            let request = self.transport.request_mtu(device_id, target_mtu);
            match tokio::time::timeout(MTU_TIMEOUT, request).await {
                Ok(Ok(mtu)) => {
                    tracing::debug!(mtu, "MTU negotiated");
                    mtu
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, fallback, "MTU negotiation failed, using fallback");
                    fallback
                }
                Err(_) => {
                    tracing::warn!(
                        fallback,
                        "MTU negotiation timed out after {}s, using fallback",
                        MTU_TIMEOUT.as_secs()
                    );
                    fallback
                }
            }
        } else {
            tracing::debug!(fallback, "Transport has no MTU exchange, using fallback");
            fallback
        };
        usize::from(mtu.saturating_sub(ATT_OVERHEAD).max(1))
    }

    pub(crate) async fn disconnect(&self) -> Result<()> {
        self.end_session().await
    }

    async fn end_session(&self) -> Result<()> {
        let taken = write(&self.session).take();
        let Some(current) = taken else {
            self.set_state(SessionState::Idle);
            return Ok(());
        };
        self.set_state(SessionState::Idle);

        let result = self.transport.disconnect(&current.device.id).await;
        let _ = self.events.send(SessionEvent::Disconnected {
            device_id: current.device.id.clone(),
            unexpected: false,
        });
        tracing::info!(id = %current.device.id, "Printer disconnected");
        result
    }

    /// Encode `bitmap` with `protocol` and stream it to the printer.
    ///
    /// A failed write leaves the session in place; the caller decides
    /// whether to retry or disconnect.
    pub(crate) async fn print(
        &self,
        bitmap: &BitBitmap,
        protocol: &dyn PrinterProtocol,
    ) -> Result<()> {
        let _guard = self
            .op_guard
            .try_lock()
            .map_err(|_| PrinterError::PrintInProgress)?;
        let session = self
            .session()
            .filter(|s| s.connected)
            .ok_or(PrinterError::NotConnected)?;

        self.emit_progress(PrintStage::Encoding, 0);
        let payload = protocol.encode(bitmap)?;
        tracing::info!(
            width = bitmap.width(),
            height = bitmap.height(),
            bytes = payload.len(),
            chunk_size = session.chunk_size,
            "Printing bitmap"
        );

        let events = &self.events;
        let result = chunker::write_paced(
            self.transport.as_ref(),
            &session.device.id,
            &session.characteristic,
            session.write_mode,
            &payload,
            session.chunk_size,
            |p: WriteProgress| {
                let percent = (p.bytes_written * 100 / p.total_bytes.max(1)) as u8;
                let _ = events.send(SessionEvent::Progress(PrintProgress {
                    stage: PrintStage::Sending,
                    percent,
                }));
            },
        )
        .await;

        match result {
            Ok(()) => {
                self.emit_progress(PrintStage::Complete, 100);
                tracing::info!("Print complete");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Print failed");
                Err(e)
            }
        }
    }

    /// The peripheral dropped the link on its own.
    fn link_lost(&self, device_id: &str) {
        let lost = {
            let mut session = write(&self.session);
            if session
                .as_ref()
                .is_some_and(|s| s.device.id.eq_ignore_ascii_case(device_id))
            {
                session.take()
            } else {
                None
            }
        };
        let Some(lost) = lost else {
            return;
        };

        tracing::warn!(id = %lost.device.id, "Printer disconnected unexpectedly");
        self.set_state(SessionState::Idle);
        let _ = self.events.send(SessionEvent::Disconnected {
            device_id: lost.device.id,
            unexpected: true,
        });
    }
}

/// First write-without-response characteristic, else the first writable one.
fn preferred<'a, I>(characteristics: I) -> Option<&'a CharacteristicInfo>
where
    I: Iterator<Item = &'a CharacteristicInfo>,
{
    characteristics
        .filter(|c| c.is_writable())
        .min_by_key(|c| !c.write_without_response)
}

fn pick_characteristic(
    characteristics: &[CharacteristicInfo],
    filter: ServiceFilter,
) -> Option<CharacteristicInfo> {
    match filter {
        ServiceFilter::Any => preferred(characteristics.iter()).cloned(),
        ServiceFilter::Candidates(services) => services
            .iter()
            .find_map(|service| {
                preferred(
                    characteristics
                        .iter()
                        .filter(|c| c.service_uuid == *service),
                )
            })
            .cloned(),
    }
}

fn spawn_disconnect_watcher(
    core: Weak<SessionCore>,
    mut link_events: broadcast::Receiver<TransportEvent>,
) {
    tokio::spawn(async move {
        loop {
            let event = match link_events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed BLE link events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(core) = core.upgrade() else {
                break;
            };
            match event {
                TransportEvent::Disconnected(id) => core.link_lost(&id),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn characteristic(service: u128, uuid: u128, writable: bool) -> CharacteristicInfo {
        CharacteristicInfo {
            service_uuid: Uuid::from_u128(service),
            uuid: Uuid::from_u128(uuid),
            write_with_response: writable,
            write_without_response: false,
        }
    }

    fn unacknowledged(service: u128, uuid: u128) -> CharacteristicInfo {
        CharacteristicInfo {
            write_with_response: false,
            write_without_response: true,
            ..characteristic(service, uuid, false)
        }
    }

    #[test]
    fn test_any_filter_takes_first_writable() {
        let chars = [characteristic(1, 10, false), characteristic(2, 20, true)];
        let picked = pick_characteristic(&chars, ServiceFilter::Any).unwrap();
        assert_eq!(picked.uuid, Uuid::from_u128(20));
    }

    #[test]
    fn test_candidate_filter_respects_service_order() {
        static SERVICES: [Uuid; 2] = [Uuid::from_u128(2), Uuid::from_u128(1)];
        let chars = [characteristic(1, 10, true), characteristic(2, 20, true)];
        let picked = pick_characteristic(&chars, ServiceFilter::Candidates(&SERVICES)).unwrap();
        assert_eq!(picked.service_uuid, Uuid::from_u128(2));
    }

    #[test]
    fn test_any_filter_prefers_write_without_response() {
        let chars = [characteristic(1, 0x2222, true), unacknowledged(1, 0x4444)];
        let picked = pick_characteristic(&chars, ServiceFilter::Any).unwrap();
        assert_eq!(picked.uuid, Uuid::from_u128(0x4444));
        assert_eq!(
            picked.preferred_write_mode(),
            Some(crate::transport::WriteMode::WithoutResponse)
        );
    }

    #[test]
    fn test_candidate_filter_prefers_write_without_response_within_service() {
        static SERVICES: [Uuid; 2] = [Uuid::from_u128(1), Uuid::from_u128(2)];
        let chars = [
            unacknowledged(2, 30),
            characteristic(1, 10, true),
            unacknowledged(1, 20),
        ];
        let picked = pick_characteristic(&chars, ServiceFilter::Candidates(&SERVICES)).unwrap();
        assert_eq!(picked.uuid, Uuid::from_u128(20));
    }

    #[test]
    fn test_candidate_filter_ignores_other_services() {
        static SERVICES: [Uuid; 1] = [Uuid::from_u128(3)];
        let chars = [characteristic(1, 10, true)];
        assert!(pick_characteristic(&chars, ServiceFilter::Candidates(&SERVICES)).is_none());
    }
}
