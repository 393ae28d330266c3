use std::{fmt, sync::Arc};

use rollcall_core::log::EventLog;
use tokio_util::sync::CancellationToken;

use crate::{
    application::ingress::IngressGate,
    infra::{
        config::Config,
        live::{BridgeSettings, FanoutBridge},
        websocket::ConnectionManager,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ingress: Arc<IngressGate>,
    pub websocket_manager: ConnectionManager,
    pub fanout: Arc<FanoutBridge>,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire the gate and the bridge onto their own log handles.
    pub fn new(
        config: Arc<Config>,
        ingress_log: Arc<dyn EventLog>,
        fanout_log: Arc<dyn EventLog>,
        shutdown: CancellationToken,
    ) -> Self {
        let websocket_manager = ConnectionManager::new();
        let fanout = Arc::new(FanoutBridge::new(
            fanout_log,
            websocket_manager.clone(),
            BridgeSettings {
                block: config.fanout.block,
                count: config.fanout.count,
                retry: config.retry,
            },
            shutdown.clone(),
        ));

        Self {
            config,
            ingress: Arc::new(IngressGate::new(ingress_log)),
            websocket_manager,
            fanout,
            shutdown,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        self.ingress.log()
    }
}
