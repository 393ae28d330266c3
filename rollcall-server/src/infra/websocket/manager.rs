use crate::infra::websocket::connection::Connection;
use dashmap::DashMap;
use rollcall_core::domain::LiveNotification;
use std::{fmt, sync::Arc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;

/// Registry of live observers.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    /// Active WebSocket connections mapped by connection ID
    connections: Arc<DashMap<Uuid, Arc<Connection>>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_count", &self.connections.len())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection
    pub fn add_connection(&self, connection: Arc<Connection>) {
        self.connections.insert(connection.id, connection);
    }

    pub fn remove_connection(&self, conn_id: Uuid) {
        self.connections.remove(&conn_id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Push a notification to every observer. Observers whose buffer is full
    /// or whose socket has closed are dropped from the registry. Returns the
    /// number of observers that received it.
    pub fn broadcast(&self, notification: &LiveNotification) -> usize {
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for entry in self.connections.iter() {
            match entry.value().try_notify(notification.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(
                        conn_id = %entry.key(),
                        "Observer buffer full; dropping"
                    );
                    evicted.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => evicted.push(*entry.key()),
            }
        }

        for conn_id in evicted {
            self.connections.remove(&conn_id);
        }

        delivered
    }
}
