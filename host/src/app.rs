use std::sync::Arc;

use print_bridge::BridgeHost;
use thermal_printer::PrinterDevice;
use tokio_util::sync::CancellationToken;

use crate::config::HostConfig;

/// Application shared state accessible from axum handlers and background
/// tasks.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<SharedStateInner>,
}

struct SharedStateInner {
    config: HostConfig,
    bridge: Arc<BridgeHost>,
    shutdown: CancellationToken,
}

impl SharedState {
    pub fn new(config: HostConfig, bridge: Arc<BridgeHost>) -> Self {
        Self {
            inner: Arc::new(SharedStateInner {
                config,
                bridge,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn bridge(&self) -> &Arc<BridgeHost> {
        &self.inner.bridge
    }

    pub fn device(&self) -> &Arc<dyn PrinterDevice> {
        self.inner.bridge.device()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}
